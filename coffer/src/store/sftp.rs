use super::{ObjectWrite, Result, Store, StoreError};

use anyhow::{anyhow, Context};
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, Session, Sftp};

use std::{
    io::{Read, Write},
    net::TcpStream,
    path::PathBuf,
};

// LIBSSH2_FX_NO_SUCH_FILE
const SFTP_NO_SUCH_FILE: i32 = 2;

#[derive(Clone, Debug)]
pub struct SftpConfig {
    /// `host:port` of the ssh server.
    pub address: String,
    pub user: String,
    pub password: Option<String>,
    /// PEM private key material, as found in an openssh key file.
    pub private_key: Option<String>,
    /// Server keys in single-line known-hosts format. At least one must
    /// match or the connection is refused.
    pub host_public_keys: Vec<String>,
    /// Remote directory to read and write backups in.
    pub path: String,
}

/// Backups on an sftp server. The session lives for the duration of the
/// command and is torn down on `close`.
pub struct SftpStore {
    session: Session,
    sftp: Sftp,
    remote_path: PathBuf,
}

impl SftpStore {
    pub fn connect(config: &SftpConfig) -> Result<SftpStore> {
        let tcp = TcpStream::connect(&config.address)
            .with_context(|| format!("connecting to {}", config.address))?;

        let mut session = Session::new().context("creating ssh session")?;
        session.set_tcp_stream(tcp);
        session.handshake().context("ssh handshake")?;

        verify_host_key(&session, config)?;

        if let Some(key) = &config.private_key {
            session
                .userauth_pubkey_memory(&config.user, None, key, None)
                .context("private key authentication")?;
        } else if let Some(password) = &config.password {
            session
                .userauth_password(&config.user, password)
                .context("password authentication")?;
        } else {
            return Err(anyhow!("sftp needs a password or a private key").into());
        }
        if !session.authenticated() {
            return Err(anyhow!("sftp authentication failed").into());
        }

        let sftp = session.sftp().context("opening sftp channel")?;

        Ok(SftpStore {
            session,
            sftp,
            remote_path: PathBuf::from(&config.path),
        })
    }

    fn remote(&self, name: &str) -> PathBuf {
        self.remote_path.join(name)
    }
}

fn verify_host_key(session: &Session, config: &SftpConfig) -> Result<()> {
    let mut known = session.known_hosts().context("initializing known hosts")?;
    for line in &config.host_public_keys {
        known
            .read_str(line, KnownHostFileKind::OpenSSH)
            .with_context(|| format!("parsing host public key {line:?}"))?;
    }

    let (key, _) = session
        .host_key()
        .ok_or_else(|| anyhow!("server offered no host key"))?;

    let (host, port) = match config.address.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(22)),
        None => (config.address.as_str(), 22),
    };

    match known.check_port(host, port, key) {
        CheckResult::Match => Ok(()),
        _ => Err(anyhow!("host key mismatch for {}", config.address).into()),
    }
}

struct SftpObject {
    file: ssh2::File,
}

impl Write for SftpObject {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl ObjectWrite for SftpObject {
    fn complete(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

impl Store for SftpStore {
    fn list(&self) -> Result<Vec<String>> {
        let entries = self
            .sftp
            .readdir(&self.remote_path)
            .context("listing remote directory")?;

        let mut names: Vec<String> = entries
            .into_iter()
            .filter_map(|(path, _)| path.file_name()?.to_str().map(String::from))
            .collect();
        names.sort();
        Ok(names)
    }

    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        match self.sftp.open(&self.remote(name)) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => {
                Err(StoreError::NotFound { name: name.into() })
            }
            Err(err) => Err(anyhow::Error::new(err).context("opening remote file").into()),
        }
    }

    fn create(&self, name: &str) -> Result<Box<dyn ObjectWrite>> {
        let file = self
            .sftp
            .create(&self.remote(name))
            .context("creating remote file")?;
        Ok(Box::new(SftpObject { file }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.sftp
            .rename(&self.remote(from), &self.remote(to), None)
            .context("renaming remote file")?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        match self.sftp.unlink(&self.remote(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => Ok(()),
            Err(err) => Err(anyhow::Error::new(err)
                .context("removing remote file")
                .into()),
        }
    }

    fn ping(&self) -> Result<()> {
        self.sftp
            .stat(&self.remote_path)
            .context("remote path not reachable")?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.session
            .disconnect(None, "done", None)
            .context("disconnecting")?;
        Ok(())
    }
}
