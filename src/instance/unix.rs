//! Unix instance primitives
//!
//! Ownership is an advisory `flock` on `<dir>/<name>.lock`; the notify signal
//! is a Unix domain socket at `<dir>/<name>.sock` carrying one framed message
//! per later launch.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use super::{Acquisition, InitGuard, InstanceError, OwnershipToken, SignalListener};
use crate::events::InstanceEvent;
use crate::ipc::{read_message, write_message, InstanceMessage};

const SIGNAL_WRITE_TIMEOUT: Duration = Duration::from_millis(500);
const SIGNAL_READ_TIMEOUT: Duration = Duration::from_secs(1);
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Lock files and sockets under one runtime directory
#[derive(Debug, Clone)]
pub struct UnixPrimitives {
    runtime_dir: PathBuf,
    guard: InitGuard,
}

impl UnixPrimitives {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            guard: InitGuard::new(),
        }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.runtime_dir.join(format!("{}.lock", name))
    }

    fn socket_path(&self, name: &str) -> PathBuf {
        self.runtime_dir.join(format!("{}.sock", name))
    }
}

/// Exclusive lock on the instance lock file
///
/// The file holds the owner's pid while locked and is emptied on release,
/// so a non-empty file found by the next owner marks an abandoned lock.
pub struct LockToken {
    lock: Flock<File>,
    path: PathBuf,
}

impl OwnershipToken for LockToken {
    fn release(self) -> Result<(), InstanceError> {
        self.lock.set_len(0)?;
        debug!(path = %self.path.display(), "releasing instance lock");
        self.lock
            .unlock()
            .map(drop)
            .map_err(|(_, errno)| InstanceError::Os { code: errno as i32 })
    }
}

impl super::InstancePrimitives for UnixPrimitives {
    type Token = LockToken;
    type Listener = SocketListener;

    fn init_guard(&self) -> &InitGuard {
        &self.guard
    }

    fn acquire_exclusive_or_detect_existing(
        &self,
        name: &str,
    ) -> Result<Acquisition<LockToken>, InstanceError> {
        std::fs::create_dir_all(&self.runtime_dir)?;

        let path = self.lock_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Ok(Acquisition::AlreadyHeld);
            }
            Err((_, errno)) => return Err(InstanceError::Os { code: errno as i32 }),
        };

        let mut previous = String::new();
        lock.read_to_string(&mut previous)?;

        lock.set_len(0)?;
        lock.seek(SeekFrom::Start(0))?;
        lock.write_all(std::process::id().to_string().as_bytes())?;
        lock.flush()?;

        let token = LockToken { lock, path };
        if previous.trim().is_empty() {
            Ok(Acquisition::Owned(token))
        } else {
            debug!(previous_pid = previous.trim(), "found stale owner pid");
            Ok(Acquisition::Abandoned(token))
        }
    }

    fn create_signal(&self, name: &str) -> Result<SocketListener, InstanceError> {
        std::fs::create_dir_all(&self.runtime_dir)?;

        let path = self.socket_path(name);
        // Only the lock owner gets here, so an existing socket is stale
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        let inode = std::fs::metadata(&path)?.ino();

        debug!(path = %path.display(), "notify socket listening");
        Ok(SocketListener {
            listener,
            path,
            inode,
        })
    }

    fn signal_existing(&self, name: &str) -> Result<(), InstanceError> {
        let path = self.socket_path(name);
        let mut stream = StdUnixStream::connect(&path)
            .map_err(|e| InstanceError::SignalAccess(format!("{}: {}", path.display(), e)))?;
        stream.set_write_timeout(Some(SIGNAL_WRITE_TIMEOUT))?;

        write_message(
            &mut stream,
            &InstanceMessage::SecondInstanceStarted {
                pid: std::process::id(),
            },
        )
    }
}

/// Accepting end of the notify socket
pub struct SocketListener {
    listener: UnixListener,
    path: PathBuf,
    inode: u64,
}

impl SocketListener {
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_signal(stream: &mut UnixStream) -> Result<InstanceMessage, InstanceError> {
        match tokio::time::timeout(SIGNAL_READ_TIMEOUT, read_message(stream)).await {
            Ok(result) => result,
            Err(_) => Err(InstanceError::Protocol("timed out reading signal".to_string())),
        }
    }
}

impl SignalListener for SocketListener {
    async fn wait(&mut self) -> Option<InstanceEvent> {
        loop {
            let (mut stream, _addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(?e, "failed to accept on notify socket");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            match Self::read_signal(&mut stream).await {
                Ok(InstanceMessage::SecondInstanceStarted { pid }) => {
                    return Some(InstanceEvent::SecondInstanceStarted { pid: Some(pid) });
                }
                Err(e) => warn!(?e, "ignoring malformed signal"),
            }
        }
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        // A newer owner may have rebound the path already
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.ino() == self.inode => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    debug!(?e, "failed to remove notify socket");
                }
            }
            _ => {}
        }
    }
}
