use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::os::unix::net::UnixStream;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// The child-side end of an anonymous bootstrap pipe, kept inheritable
/// until the peer process has been spawned.
///
/// The decimal descriptor number is the "client handle string" passed to
/// the spawned process on its command line. The spawner must keep this
/// handle alive across `launch` and drop it afterwards; the drop closes
/// the local copy while the child retains its inherited one.
pub struct InheritableHandle {
    fd: RawFd,
}

impl InheritableHandle {
    /// The handle string to pass to the spawned process.
    pub fn pipe_id(&self) -> String {
        self.fd.to_string()
    }

    /// Consume the handle without closing the descriptor.
    ///
    /// Only for same-process attachment (tests, in-process peers) where
    /// `attach_inherited` takes over ownership of the descriptor.
    pub fn into_pipe_id(self) -> String {
        let id = self.pipe_id();
        std::mem::forget(self);
        id
    }
}

impl Drop for InheritableHandle {
    fn drop(&mut self) {
        // SAFETY: the descriptor was obtained from into_raw_fd and is
        // owned exclusively by this handle.
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl std::fmt::Debug for InheritableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InheritableHandle")
            .field("fd", &self.fd)
            .finish()
    }
}

/// Create an anonymous pipe pair for the bootstrap handshake.
///
/// Returns the server-side stream and the inheritable child-side handle.
/// The child half has `FD_CLOEXEC` cleared so it survives exec in the
/// spawned process.
pub fn anonymous_pair() -> Result<(IpcStream, InheritableHandle)> {
    let (server, child) = UnixStream::pair()?;

    let child_fd = child.into_raw_fd();
    clear_cloexec(child_fd)?;

    debug!(fd = child_fd, "created anonymous bootstrap pipe");
    Ok((IpcStream::from_unix(server), InheritableHandle { fd: child_fd }))
}

/// Attach to an anonymous pipe via the inherited handle string.
///
/// The string must be the decimal descriptor number produced by the
/// spawner; anything else fails with `BadHandle`. Takes ownership of the
/// descriptor.
pub fn attach_inherited(pipe_id: &str) -> Result<IpcStream> {
    let fd: RawFd = pipe_id
        .trim()
        .parse()
        .map_err(|_| TransportError::BadHandle(pipe_id.to_string()))?;
    if fd < 0 {
        return Err(TransportError::BadHandle(pipe_id.to_string()));
    }

    // Probe the descriptor before claiming ownership so a stale or
    // never-inherited handle fails cleanly instead of aliasing a fd.
    // SAFETY: fcntl with F_GETFD reads descriptor flags only.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(TransportError::BadHandle(pipe_id.to_string()));
    }

    debug!(fd, "attached to inherited bootstrap pipe");
    // SAFETY: the descriptor was validated open above and was inherited
    // for exclusive use by this process; ownership transfers here.
    let stream = unsafe { UnixStream::from_raw_fd(fd) };
    Ok(IpcStream::from_unix(stream))
}

fn clear_cloexec(fd: RawFd) -> Result<()> {
    // SAFETY: fcntl on an open descriptor owned by the caller.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // SAFETY: same descriptor, only the FD_CLOEXEC bit changes.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// True if the descriptor currently has `FD_CLOEXEC` set.
#[cfg(test)]
fn is_cloexec(fd: RawFd) -> bool {
    // SAFETY: fcntl with F_GETFD reads descriptor flags only.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    flags >= 0 && (flags & libc::FD_CLOEXEC) != 0
}

impl AsRawFd for InheritableHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn pair_carries_bytes() {
        let (mut server, handle) = anonymous_pair().unwrap();

        let pipe_id = handle.into_pipe_id();
        let mut child = attach_inherited(&pipe_id).unwrap();

        server.write_all(b"key-material").unwrap();
        let mut buf = [0u8; 12];
        child.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"key-material");
    }

    #[test]
    fn child_half_is_inheritable() {
        let (_server, handle) = anonymous_pair().unwrap();
        assert!(!is_cloexec(handle.as_raw_fd()));
    }

    #[test]
    fn pipe_id_is_decimal_fd() {
        let (_server, handle) = anonymous_pair().unwrap();
        let parsed: RawFd = handle.pipe_id().parse().unwrap();
        assert_eq!(parsed, handle.as_raw_fd());
    }

    #[test]
    fn attach_rejects_garbage_handles() {
        assert!(matches!(
            attach_inherited("not-a-number"),
            Err(TransportError::BadHandle(_))
        ));
        assert!(matches!(
            attach_inherited("-3"),
            Err(TransportError::BadHandle(_))
        ));
        // Almost certainly not an open descriptor in a test process.
        assert!(matches!(
            attach_inherited("999999"),
            Err(TransportError::BadHandle(_))
        ));
    }
}
