//! Non-consuming socket readability probe.
//!
//! An idle TCP connection gives no event when the peer performs an orderly
//! close. The only way to notice is to poll the socket for readability with a
//! zero timeout and, if it is readable, peek one byte: a zero-length peek means
//! the peer sent FIN. Windows has no per-call non-blocking peek, so there the
//! queued byte count and the poll's hang-up flag stand in for it.

use std::io;
use std::net::TcpStream;

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Not readable: the connection is open and idle.
    Idle,
    /// Readable with data waiting to be consumed.
    DataPending,
    /// Readable with nothing to read: the peer closed its side, or the socket
    /// is no longer connected.
    Closed,
}

impl Readiness {
    pub fn is_alive(self) -> bool {
        !matches!(self, Readiness::Closed)
    }
}

/// Probe `stream` without blocking and without consuming application data.
pub fn probe(stream: &TcpStream) -> io::Result<Readiness> {
    if stream.peer_addr().is_err() {
        return Ok(Readiness::Closed);
    }
    sys::probe(stream)
}

#[cfg(unix)]
mod sys {
    use std::io;
    use std::net::TcpStream;
    use std::os::fd::AsRawFd;

    use super::Readiness;

    pub(super) fn probe(stream: &TcpStream) -> io::Result<Readiness> {
        let fd = stream.as_raw_fd();
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: `pfd` is a valid pollfd for the duration of the call, nfds is 1,
        // and a zero timeout means the call never blocks.
        let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        if rc == 0 {
            return Ok(Readiness::Idle);
        }
        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        let mut byte = [0u8; 1];
        // SAFETY: `byte` is a writable one-byte buffer and `fd` is an open socket
        // owned by `stream`, which outlives this call.
        let n = unsafe {
            libc::recv(
                fd,
                byte.as_mut_ptr().cast::<libc::c_void>(),
                byte.len(),
                libc::MSG_PEEK | libc::MSG_DONTWAIT,
            )
        };

        match n {
            0 => Ok(Readiness::Closed),
            n if n > 0 => Ok(Readiness::DataPending),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    Ok(Readiness::Idle)
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Readiness of a socket that polled readable, from the byte count queued
/// on it and whether the poll also flagged a hang-up.
///
/// A readable socket with nothing queued and no hang-up was drained by a
/// concurrent reader after the poll, so it is still open.
#[cfg(any(windows, test))]
fn readable_state(queued: usize, hung_up: bool) -> Readiness {
    if queued > 0 {
        Readiness::DataPending
    } else if hung_up {
        Readiness::Closed
    } else {
        Readiness::Idle
    }
}

#[cfg(windows)]
mod sys {
    use std::io;
    use std::net::TcpStream;
    use std::os::windows::io::AsRawSocket;

    use windows_sys::Win32::Networking::WinSock::{
        ioctlsocket, WSAPoll, FIONREAD, POLLERR, POLLHUP, POLLNVAL, POLLRDNORM, SOCKET,
        SOCKET_ERROR, WSAPOLLFD,
    };

    use super::{readable_state, Readiness};

    // A peek would block here: the socket is in blocking mode for the reader
    // thread, which may drain it between the poll and the peek. The queued
    // byte count and the poll's hang-up flag answer the same question.
    pub(super) fn probe(stream: &TcpStream) -> io::Result<Readiness> {
        let socket = stream.as_raw_socket() as SOCKET;
        let mut pfd = WSAPOLLFD {
            fd: socket,
            events: POLLRDNORM as _,
            revents: 0,
        };

        // SAFETY: `pfd` is valid for the duration of the call; zero timeout never blocks.
        let rc = unsafe { WSAPoll(&mut pfd, 1, 0) };
        if rc == SOCKET_ERROR {
            return Err(io::Error::last_os_error());
        }
        if rc == 0 {
            return Ok(Readiness::Idle);
        }

        let revents = i32::from(pfd.revents);
        if revents & POLLNVAL as i32 != 0 {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }

        let mut queued: u32 = 0;
        // SAFETY: `queued` is a valid out-pointer and `socket` is owned by
        // `stream`, which outlives this call. FIONREAD never blocks.
        let rc = unsafe { ioctlsocket(socket, FIONREAD as _, &mut queued) };
        if rc == SOCKET_ERROR {
            return Err(io::Error::last_os_error());
        }

        let hung_up = revents & (POLLHUP as i32 | POLLERR as i32) != 0;
        Ok(readable_state(queued as usize, hung_up))
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::io;
    use std::net::TcpStream;

    use super::Readiness;

    pub(super) fn probe(_stream: &TcpStream) -> io::Result<Readiness> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "socket readability probe is not available on this platform",
        ))
    }
}

#[cfg(test)]
mod state_tests {
    use super::*;

    #[test]
    fn queued_bytes_mean_data_pending_even_after_hang_up() {
        assert_eq!(readable_state(3, false), Readiness::DataPending);
        assert_eq!(readable_state(3, true), Readiness::DataPending);
    }

    #[test]
    fn hang_up_with_nothing_queued_is_closed() {
        assert_eq!(readable_state(0, true), Readiness::Closed);
    }

    #[test]
    fn drained_between_poll_and_count_is_idle() {
        assert_eq!(readable_state(0, false), Readiness::Idle);
    }
}
