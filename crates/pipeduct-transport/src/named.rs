use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// Default permission mode for created pipe paths.
///
/// World read/write so processes running under other local users can
/// connect; pass a tighter mode to `bind_with_mode` to restrict.
pub const DEFAULT_SOCKET_MODE: u32 = 0o666;

/// Suffix for the half the server reads from (clients write here).
const IN_SUFFIX: &str = "-IN";
/// Suffix for the half the server writes to (clients read here).
const OUT_SUFFIX: &str = "-OUT";

/// `sockaddr_un.sun_path` caps the address length: 108 bytes on Linux,
/// 104 on the BSD-derived platforms.
#[cfg(target_os = "linux")]
const SUN_PATH_MAX: usize = 108;
#[cfg(not(target_os = "linux"))]
const SUN_PATH_MAX: usize = 104;

/// Derive the duplex pair paths for a base pipe name.
///
/// Returns `(<base>-IN, <base>-OUT)`. The server reads the `-IN` half
/// and writes the `-OUT` half; a client mirrors that.
pub fn duplex_paths(base: impl AsRef<Path>) -> (PathBuf, PathBuf) {
    let base = base.as_ref();
    (suffixed(base, IN_SUFFIX), suffixed(base, OUT_SUFFIX))
}

fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// A listening named pipe.
///
/// Binding replaces a stale socket left by a dead server but refuses to
/// clobber anything else at the path. The bound path is removed again
/// on drop, unless something replaced it in the meantime.
pub struct PipeListener {
    listener: UnixListener,
    path: PathBuf,
    bound_id: Option<(u64, u64)>,
}

impl PipeListener {
    /// Bind and listen at `path` with the default permission mode.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen at `path` with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_addr_len(&path)?;
        clear_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|err| bind_err(&path, err))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|err| bind_err(&path, err))?;

        // Remember which inode we created so drop never removes a path
        // someone else has since taken over.
        let bound_id = socket_identity(&path);

        info!(path = %path.display(), "pipe listening");
        Ok(Self {
            listener,
            path,
            bound_id,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = %self.path.display(), "accepted pipe connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Accept an incoming connection, waiting at most `deadline`.
    ///
    /// Returns `Ok(None)` when nothing arrived before the deadline, so
    /// accept loops can interleave cancellation checks without parking
    /// forever in the OS.
    pub fn accept_deadline(&self, deadline: Duration) -> Result<Option<IpcStream>> {
        let mut pollfd = libc::pollfd {
            fd: self.listener.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = deadline.as_millis().min(i32::MAX as u128) as libc::c_int;

        // SAFETY: `pollfd` points at one valid, initialized pollfd and
        // the descriptor is owned by this listener for the whole call.
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        match rc {
            0 => Ok(None),
            n if n > 0 => self.accept().map(Some),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(None)
                } else {
                    Err(TransportError::Accept(err))
                }
            }
        }
    }

    /// The path this pipe is bound at.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PipeListener {
    fn drop(&mut self) {
        let Some(bound) = self.bound_id else {
            return;
        };
        match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.file_type().is_socket() && (meta.dev(), meta.ino()) == bound => {
                let _ = std::fs::remove_file(&self.path);
            }
            Ok(_) => {
                debug!(path = %self.path.display(), "bound path was replaced, leaving it alone");
            }
            Err(_) => {}
        }
    }
}

fn bind_err(path: &Path, source: io::Error) -> TransportError {
    TransportError::Bind {
        path: path.to_path_buf(),
        source,
    }
}

fn check_addr_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= SUN_PATH_MAX {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: SUN_PATH_MAX,
        });
    }
    Ok(())
}

/// Remove a leftover socket at `path`. Anything that is not a socket
/// stays put and fails the bind instead.
fn clear_stale_socket(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(bind_err(path, err)),
        Ok(meta) if meta.file_type().is_socket() => {
            debug!(path = %path.display(), "replacing stale socket");
            std::fs::remove_file(path).map_err(|err| bind_err(path, err))
        }
        Ok(_) => Err(bind_err(
            path,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                "path exists and is not a socket",
            ),
        )),
    }
}

fn socket_identity(path: &Path) -> Option<(u64, u64)> {
    std::fs::symlink_metadata(path)
        .ok()
        .map(|meta| (meta.dev(), meta.ino()))
}

/// Connect to a listening named pipe (blocking).
pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
        path: path.to_path_buf(),
        source: e,
    })?;
    debug!(path = %path.display(), "connected to named pipe");
    Ok(IpcStream::from_unix(stream))
}

/// Connect to a listening named pipe, retrying until `timeout` elapses.
///
/// `ConnectionRefused` and `NotFound` are retried (the server may not
/// have bound yet); anything else fails immediately.
pub fn connect_timeout(path: impl AsRef<Path>, timeout: Duration) -> Result<IpcStream> {
    let path = path.as_ref();
    let deadline = Instant::now() + timeout;
    loop {
        match UnixStream::connect(path) {
            Ok(stream) => {
                debug!(path = %path.display(), "connected to named pipe");
                return Ok(IpcStream::from_unix(stream));
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                if Instant::now() >= deadline {
                    return Err(TransportError::Connect {
                        path: path.to_path_buf(),
                        source: io::Error::new(io::ErrorKind::TimedOut, err),
                    });
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(err) => {
                return Err(TransportError::Connect {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }
}
