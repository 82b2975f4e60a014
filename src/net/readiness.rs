//! Readiness primitive: a thin wrapper over `poll(2)`.
//!
//! Exposes exactly the contract spec'd for this component — an array of
//! `{fd, events}`, a millisecond timeout, and `revents` populated per entry
//! plus an aggregate ready count — without pulling in a full reactor
//! (`mio`/`tokio`) that a two-descriptor, call-and-return engine doesn't need.

use std::os::fd::RawFd;
use std::time::Duration;

/// One descriptor's interest and, after [`poll`] returns, its result.
#[derive(Debug, Clone, Copy)]
pub struct PollFd {
    pub fd: RawFd,
    pub want_read: bool,
    pub want_write: bool,
    revents: libc::c_short,
}

impl PollFd {
    pub fn new(fd: RawFd, want_read: bool, want_write: bool) -> Self {
        PollFd {
            fd,
            want_read,
            want_write,
            revents: 0,
        }
    }

    pub fn readable(&self) -> bool {
        self.revents & (libc::POLLIN | libc::POLLPRI) as libc::c_short != 0
    }

    pub fn writable(&self) -> bool {
        self.revents & libc::POLLOUT as libc::c_short != 0
    }

    /// True if this descriptor reported an error, hangup, or invalid-fd
    /// condition — a distinct outcome from simple readability/writability.
    pub fn error_hangup_invalid(&self) -> bool {
        self.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) as libc::c_short != 0
    }
}

/// Waits up to `timeout` for any of `entries` to become ready, populating
/// each entry's `revents`.
///
/// Returns the number of descriptors with a non-zero `revents` (0 means the
/// timeout elapsed with nothing ready). Entries whose `fd` is negative are a
/// valid sentinel per `poll(2)`: they are ignored and never reported ready —
/// callers use this for directions whose socket is already invalid.
pub fn poll(entries: &mut [PollFd], timeout: Duration) -> std::io::Result<usize> {
    let mut raw: Vec<libc::pollfd> = entries
        .iter()
        .map(|e| {
            let mut events = 0;
            if e.want_read {
                events |= libc::POLLIN | libc::POLLPRI;
            }
            if e.want_write {
                events |= libc::POLLOUT;
            }
            libc::pollfd {
                fd: e.fd,
                events,
                revents: 0,
            }
        })
        .collect();

    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    let res = unsafe { libc::poll(raw.as_mut_ptr(), raw.len() as libc::nfds_t, timeout_ms) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    for (entry, raw_entry) in entries.iter_mut().zip(raw.iter()) {
        entry.revents = raw_entry.revents;
    }
    Ok(res as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::test_support::PairedSocket;
    use crate::net::socket::ProxySocket;
    use std::os::fd::AsRawFd;

    #[test]
    fn reports_writable_immediately_on_fresh_socket() {
        let (mut a, _b) = PairedSocket::pair();
        a.set_nonblocking(true).unwrap();
        let mut fds = [PollFd::new(a.as_raw_fd(), false, true)];
        let n = poll(&mut fds, Duration::from_millis(200)).unwrap();
        assert_eq!(n, 1);
        assert!(fds[0].writable());
        assert!(!fds[0].error_hangup_invalid());
    }

    #[test]
    fn times_out_when_nothing_ready() {
        let (mut a, _b) = PairedSocket::pair();
        a.set_nonblocking(true).unwrap();
        let mut fds = [PollFd::new(a.as_raw_fd(), true, false)];
        let n = poll(&mut fds, Duration::from_millis(50)).unwrap();
        assert_eq!(n, 0);
        assert!(!fds[0].readable());
    }

    #[test]
    fn becomes_readable_after_peer_writes() {
        let (mut a, mut b) = PairedSocket::pair();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        b.send_to(b"hi", None).unwrap();
        let mut fds = [PollFd::new(a.as_raw_fd(), true, false)];
        let n = poll(&mut fds, Duration::from_millis(500)).unwrap();
        assert_eq!(n, 1);
        assert!(fds[0].readable());
    }

    #[test]
    fn negative_fd_is_never_ready() {
        let mut fds = [PollFd::new(-1, true, true)];
        let n = poll(&mut fds, Duration::from_millis(50)).unwrap();
        assert_eq!(n, 0);
        assert!(!fds[0].readable());
        assert!(!fds[0].writable());
    }
}
