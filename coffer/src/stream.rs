//! Self-delimiting encrypted streams over raw store objects.
//!
//! A safe stream is lz4-compressed, then cut into chunks that are sealed
//! individually with the stream key. Closing the writer emits an
//! authenticated terminal frame, so truncation is always detectable.

use crate::crypto::{self, CryptoError, StreamKey, SALT_SIZE, TAG_SIZE};

use lz4_flex::frame::{BlockMode, BlockSize, FrameDecoder, FrameEncoder, FrameInfo};
use secrecy::SecretString;
use thiserror::Error;

use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 8] = b"coffer01";

const CHUNK_SIZE: usize = 64 * 1024;
const MAX_SEALED: usize = CHUNK_SIZE + TAG_SIZE;
const FINAL_BIT: u32 = 1 << 31;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("Crypto error: {source}")]
    Crypto {
        #[from]
        source: CryptoError,
    },
    #[error("Compression error: {source}")]
    Compress {
        #[from]
        source: lz4_flex::frame::Error,
    },
    #[error("Not a coffer stream")]
    BadMagic,
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Counts the bytes committed to the wrapped writer.
pub struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        CountingWriter { inner, written: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn compressor<W: Write>(w: W) -> FrameEncoder<W> {
    let mut config = FrameInfo::new();

    config.block_size = BlockSize::Max64KB;
    config.block_mode = BlockMode::Linked;
    config.block_checksums = false;

    FrameEncoder::with_frame_info(config, w)
}

/// Writer half of a safe stream.
///
/// Data written here counts in logical (pre-compression) bytes; the wire
/// size is whatever reaches the writer underneath, typically a
/// [`CountingWriter`] around a store object.
pub struct SafeWriter<W: Write> {
    encoder: FrameEncoder<ChunkSealer<W>>,
}

impl<W: Write> SafeWriter<W> {
    pub fn new(mut inner: W, passphrase: &SecretString) -> Result<SafeWriter<W>> {
        let salt = crypto::random_salt();
        let key = StreamKey::derive(passphrase, &salt)?;

        inner.write_all(MAGIC)?;
        inner.write_all(&salt)?;

        Ok(SafeWriter {
            encoder: compressor(ChunkSealer {
                inner,
                key,
                buf: Vec::with_capacity(CHUNK_SIZE),
                counter: 0,
            }),
        })
    }

    /// Flush all buffered data, emit the terminal frame, and hand back the
    /// inner writer.
    pub fn finish(self) -> Result<W> {
        let sealer = self.encoder.finish()?;
        sealer.finish()
    }
}

impl<W: Write> Write for SafeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

struct ChunkSealer<W: Write> {
    inner: W,
    key: StreamKey,
    buf: Vec<u8>,
    counter: u64,
}

impl<W: Write> ChunkSealer<W> {
    fn seal_chunk(&mut self, len: usize) -> io::Result<()> {
        let mut chunk: Vec<u8> = self.buf.drain(..len).collect();
        self.key.seal(self.counter, false, &mut chunk);
        self.counter += 1;

        self.inner.write_all(&(chunk.len() as u32).to_le_bytes())?;
        self.inner.write_all(&chunk)
    }

    fn finish(mut self) -> Result<W> {
        if !self.buf.is_empty() {
            let len = self.buf.len();
            self.seal_chunk(len)?;
        }

        let mut end = Vec::new();
        self.key.seal(self.counter, true, &mut end);
        self.inner
            .write_all(&((end.len() as u32) | FINAL_BIT).to_le_bytes())?;
        self.inner.write_all(&end)?;
        self.inner.flush()?;

        Ok(self.inner)
    }
}

impl<W: Write> Write for ChunkSealer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        while self.buf.len() >= CHUNK_SIZE {
            self.seal_chunk(CHUNK_SIZE)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // chunks are cut on size or at finish; only the transport flushes here
        self.inner.flush()
    }
}

/// Reader half of a safe stream. Strictly sequential; skipping forward
/// means reading and discarding.
pub struct SafeReader<R: Read> {
    decoder: FrameDecoder<ChunkOpener<R>>,
}

impl<R: Read> SafeReader<R> {
    pub fn new(mut inner: R, passphrase: &SecretString) -> Result<SafeReader<R>> {
        let mut magic = [0u8; MAGIC.len()];
        inner.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(StreamError::BadMagic);
        }

        let mut salt = [0u8; SALT_SIZE];
        inner.read_exact(&mut salt)?;
        let key = StreamKey::derive(passphrase, &salt)?;

        Ok(SafeReader {
            decoder: FrameDecoder::new(ChunkOpener {
                inner,
                key,
                buf: Vec::new(),
                pos: 0,
                counter: 0,
                done: false,
            }),
        })
    }
}

impl<R: Read> Read for SafeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.decoder.read(buf)?;
        if n == 0 && !buf.is_empty() {
            // the compressed stream has ended; the terminal frame must
            // still be there and authenticate
            self.decoder.get_mut().ensure_end()?;
        }
        Ok(n)
    }
}

struct ChunkOpener<R: Read> {
    inner: R,
    key: StreamKey,
    buf: Vec<u8>,
    pos: usize,
    counter: u64,
    done: bool,
}

impl<R: Read> ChunkOpener<R> {
    fn next_chunk(&mut self) -> io::Result<()> {
        let mut header = [0u8; 4];
        if let Err(err) = self.inner.read_exact(&mut header) {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream truncated before the closing frame",
                ));
            }
            return Err(err);
        }

        let raw = u32::from_le_bytes(header);
        let last = raw & FINAL_BIT != 0;
        let len = (raw & !FINAL_BIT) as usize;
        if !(TAG_SIZE..=MAX_SEALED).contains(&len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed stream frame",
            ));
        }

        let mut sealed = vec![0u8; len];
        self.inner.read_exact(&mut sealed)?;

        let plain_len = self
            .key
            .open(self.counter, last, &mut sealed)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?
            .len();
        self.counter += 1;

        if last {
            if plain_len != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "malformed closing frame",
                ));
            }
            self.done = true;
            return Ok(());
        }

        sealed.truncate(plain_len);
        self.buf = sealed;
        self.pos = 0;
        Ok(())
    }

    fn ensure_end(&mut self) -> io::Result<()> {
        while !self.done {
            self.next_chunk()?;
            if self.pos < self.buf.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unexpected data after stream end",
                ));
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for ChunkOpener<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.buf.len() {
            if self.done {
                return Ok(0);
            }
            self.next_chunk()?;
        }

        let n = buf.len().min(self.buf.len() - self.pos);
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use std::io::Cursor;

    fn passphrase() -> SecretString {
        Secret::new("hunter2, but longer".to_string())
    }

    fn seal(data: &[u8]) -> Vec<u8> {
        let counter = CountingWriter::new(Vec::new());
        let mut writer = SafeWriter::new(counter, &passphrase()).unwrap();
        writer.write_all(data).unwrap();
        let counter = writer.finish().unwrap();

        let counted = counter.bytes_written() as usize;
        let wire = counter.into_inner();
        assert_eq!(counted, wire.len());
        wire
    }

    fn unseal(wire: &[u8]) -> io::Result<Vec<u8>> {
        let mut reader = SafeReader::new(Cursor::new(wire), &passphrase())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn round_trip_small() {
        let data = b"hello world";
        assert_eq!(unseal(&seal(data)).unwrap(), data);
    }

    #[test]
    fn round_trip_multi_chunk() {
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(unseal(&seal(&data)).unwrap(), data);
    }

    #[test]
    fn round_trip_empty() {
        assert_eq!(unseal(&seal(b"")).unwrap(), b"");
    }

    #[test]
    fn empty_stream_size_is_constant() {
        let a = seal(b"");
        let b = seal(b"");
        assert_eq!(a.len(), b.len());
        assert!(a.len() < 100);
    }

    #[test]
    fn counting_writer_observes_wire_bytes() {
        let mut counter = CountingWriter::new(Vec::new());
        counter.write_all(b"123456").unwrap();
        assert_eq!(counter.bytes_written(), 6);
        assert_eq!(counter.into_inner(), b"123456");
    }

    #[test]
    fn wrong_passphrase_fails() {
        let wire = seal(b"secrets");
        let other = Secret::new("not the passphrase".to_string());
        let mut reader = SafeReader::new(Cursor::new(&wire), &other).unwrap();
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }

    #[test]
    fn tampering_is_detected() {
        let mut wire = seal(b"untouchable data");
        let target = wire.len() - 5;
        wire[target] ^= 0x01;
        assert!(unseal(&wire).is_err());
    }

    #[test]
    fn truncation_is_detected() {
        let wire = seal(b"do not cut this short");
        // drop the terminal frame entirely
        let cut = wire.len() - (4 + TAG_SIZE);
        let err = unseal(&wire[..cut]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn rejects_foreign_data() {
        assert!(matches!(
            SafeReader::new(Cursor::new(b"not a stream at all"), &passphrase()),
            Err(StreamError::BadMagic)
        ));
    }
}
