use blake2b_simd::blake2bp::Params as Blake2;
use getrandom::getrandom;
use ring::aead;
use secrecy::{ExposeSecret, Secret, SecretString};
use thiserror::Error;
use zeroize::Zeroize;

const KEY_SIZE: usize = 32;
pub const SALT_SIZE: usize = 16;
pub const TAG_SIZE: usize = 16;

type Nonce = [u8; 12];
type RawKey = Secret<[u8; KEY_SIZE]>;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key error: {source}")]
    Key {
        #[from]
        source: argon2::Error,
    },
    #[error("Authentication failed")]
    Verify,
}
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Per-stream sealing key, derived from the passphrase and the stream salt.
pub struct StreamKey {
    key: RawKey,
}

impl StreamKey {
    pub fn derive(passphrase: &SecretString, salt: &[u8; SALT_SIZE]) -> Result<StreamKey> {
        derive_argon2(salt, passphrase.expose_secret().as_bytes()).map(|key| StreamKey { key })
    }

    /// Encrypt `buf` in place, appending the authentication tag.
    pub fn seal(&self, counter: u64, last: bool, buf: &mut Vec<u8>) {
        let aead = get_aead(&self.key);
        aead.seal_in_place_append_tag(get_nonce(counter), get_aad(last), buf)
            .unwrap();
    }

    /// Decrypt `buf` in place and return the plaintext slice.
    pub fn open<'buf>(
        &self,
        counter: u64,
        last: bool,
        buf: &'buf mut [u8],
    ) -> Result<&'buf mut [u8]> {
        let aead = get_aead(&self.key);
        aead.open_in_place(get_nonce(counter), get_aad(last), buf)
            .map_err(|_| CryptoError::Verify)
    }
}

pub fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    getrandom(&mut salt).unwrap();
    salt
}

#[inline]
fn get_aead(key: &RawKey) -> aead::LessSafeKey {
    let key =
        aead::UnboundKey::new(&aead::CHACHA20_POLY1305, key.expose_secret()).expect("bad key");
    aead::LessSafeKey::new(key)
}

#[inline]
fn get_nonce(counter: u64) -> aead::Nonce {
    let mut nonce = Nonce::default();
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    aead::Nonce::assume_unique_for_key(nonce)
}

#[inline]
fn get_aad(last: bool) -> aead::Aad<&'static [u8]> {
    // the closing frame carries a distinct tag context so it cannot be
    // confused with a mid-stream frame
    if last {
        aead::Aad::from(&b"end"[..])
    } else {
        aead::Aad::from(&b""[..])
    }
}

fn derive_argon2(salt_raw: &[u8], password: &[u8]) -> Result<RawKey> {
    let salt = Blake2::new().hash_length(16).hash(salt_raw);

    let mut result = argon2::hash_raw(
        password,
        salt.as_bytes(),
        &argon2::Config {
            hash_length: KEY_SIZE as u32,
            variant: argon2::Variant::Argon2id,
            ..argon2::Config::default()
        },
    )?;

    let mut outbuf = [0; KEY_SIZE];
    outbuf.copy_from_slice(&result);
    result.zeroize();

    Ok(Secret::new(outbuf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passphrase() -> SecretString {
        Secret::new("correct horse battery staple".to_string())
    }

    #[test]
    fn seal_open_round_trip() {
        let salt = random_salt();
        let key = StreamKey::derive(&passphrase(), &salt).unwrap();

        let cleartext = b"the quick brown fox jumps over the lazy crab";
        let mut buf = cleartext.to_vec();
        key.seal(7, false, &mut buf);
        assert_eq!(buf.len(), cleartext.len() + TAG_SIZE);

        let plain = key.open(7, false, &mut buf).unwrap();
        assert_eq!(plain, cleartext);
    }

    #[test]
    fn wrong_counter_fails() {
        let salt = random_salt();
        let key = StreamKey::derive(&passphrase(), &salt).unwrap();

        let mut buf = b"payload".to_vec();
        key.seal(0, false, &mut buf);
        assert!(key.open(1, false, &mut buf).is_err());
    }

    #[test]
    fn frame_context_is_bound() {
        let salt = random_salt();
        let key = StreamKey::derive(&passphrase(), &salt).unwrap();

        let mut buf = Vec::new();
        key.seal(3, true, &mut buf);
        assert!(key.open(3, false, &mut buf).is_err());

        let mut buf = Vec::new();
        key.seal(3, true, &mut buf);
        assert!(key.open(3, true, &mut buf).is_ok());
    }

    #[test]
    fn distinct_salts_derive_distinct_keys() {
        let a = StreamKey::derive(&passphrase(), &[1u8; SALT_SIZE]).unwrap();
        let b = StreamKey::derive(&passphrase(), &[2u8; SALT_SIZE]).unwrap();

        let mut buf = b"payload".to_vec();
        a.seal(0, false, &mut buf);
        assert!(b.open(0, false, &mut buf).is_err());
    }
}
