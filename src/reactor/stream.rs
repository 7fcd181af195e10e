use crate::{WireError, WireResult};
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

/// A non-blocking byte stream the reactor can multiplex.
///
/// `sync_read`/`sync_write` are called after poll reports readiness and
/// must return partial counts rather than blocking: `Ok(0)` from a ready
/// read means the peer closed the stream, and a would-block condition
/// surfaces as an [`Io`](crate::WireError::Io) error the reactor treats
/// as "no progress yet".
pub trait Stream: std::fmt::Debug + Send {
    fn native_handle(&self) -> RawFd;

    fn sync_read(&mut self, buf: &mut [u8]) -> WireResult<usize>;

    fn sync_write(&mut self, buf: &[u8]) -> WireResult<usize>;

    fn is_open(&self) -> bool;

    /// Abandon any in-flight transport work. Most poll-driven streams
    /// have nothing to do here.
    fn cancel(&mut self) {}
}

/// How streams are shared between their owner and the reactor.
pub type SharedStream = Arc<Mutex<dyn Stream>>;

pub fn shared<S: Stream + 'static>(stream: S) -> SharedStream {
    Arc::new(Mutex::new(stream))
}

/// A raw file descriptor (one end of a pipe or socketpair) exposed as a
/// [`Stream`]. Used for the reactor's self-pipe; handy in tests.
///
/// Closes the descriptor on drop when constructed with `owned`.
#[derive(Debug)]
pub struct PipeStream {
    fd: RawFd,
    owned: bool,
}

impl PipeStream {
    /// Wraps `fd` without taking ownership; the caller closes it.
    pub fn borrowed(fd: RawFd) -> Self {
        Self { fd, owned: false }
    }

    /// Wraps `fd` and closes it on drop.
    pub fn owned(fd: RawFd) -> Self {
        Self { fd, owned: true }
    }
}

impl Stream for PipeStream {
    fn native_handle(&self) -> RawFd {
        self.fd
    }

    fn sync_read(&mut self, buf: &mut [u8]) -> WireResult<usize> {
        loop {
            let r = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
            if let Ok(n) = usize::try_from(r) {
                return Ok(n);
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == IoErrorKind::Interrupted {
                continue;
            }
            return Err(WireError::Io { source: err });
        }
    }

    fn sync_write(&mut self, buf: &[u8]) -> WireResult<usize> {
        loop {
            let r = unsafe { libc::write(self.fd, buf.as_ptr().cast(), buf.len()) };
            if let Ok(n) = usize::try_from(r) {
                return Ok(n);
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == IoErrorKind::Interrupted {
                continue;
            }
            return Err(WireError::Io { source: err });
        }
    }

    fn is_open(&self) -> bool {
        self.fd >= 0
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        if self.owned && self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

impl Stream for std::net::TcpStream {
    fn native_handle(&self) -> RawFd {
        self.as_raw_fd()
    }

    fn sync_read(&mut self, buf: &mut [u8]) -> WireResult<usize> {
        loop {
            match Read::read(self, buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == IoErrorKind::Interrupted => {}
                Err(e) => return Err(WireError::Io { source: e }),
            }
        }
    }

    fn sync_write(&mut self, buf: &[u8]) -> WireResult<usize> {
        loop {
            match Write::write(self, buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == IoErrorKind::Interrupted => {}
                Err(e) => return Err(WireError::Io { source: e }),
            }
        }
    }

    fn is_open(&self) -> bool {
        self.peer_addr().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::{PipeStream, Stream};

    #[test]
    fn pipe_round_trip() {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        let mut reader = PipeStream::owned(fds[0]);
        let mut writer = PipeStream::owned(fds[1]);

        assert_eq!(writer.sync_write(b"ping").unwrap(), 4);

        let mut buf = [0_u8; 4];
        assert_eq!(reader.sync_read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"ping");
    }
}
