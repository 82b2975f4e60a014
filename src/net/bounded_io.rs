//! Non-blocking send/receive routines that honor a timeout, coalesce
//! partial transfers, and classify errors.

use crate::error::ErrorClass;
use crate::net::readiness::{poll, PollFd};
use crate::net::socket::ProxySocket;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

/// An I/O failure, reduced to the portable classification the engine
/// switches on plus the original error for display/logging.
#[derive(Debug)]
pub struct IoOutcome {
    pub class: ErrorClass,
    pub source: std::io::Error,
}

impl IoOutcome {
    fn from_error(source: std::io::Error) -> Self {
        IoOutcome {
            class: ErrorClass::classify(&source),
            source,
        }
    }
}

/// A single, non-retrying receive attempt. Classifies but does not wait.
pub fn recv_once<S: ProxySocket>(
    sock: &mut S,
    buf: &mut [u8],
) -> Result<(usize, Option<SocketAddr>), IoOutcome> {
    sock.recv(buf).map_err(IoOutcome::from_error)
}

/// A single, non-retrying send attempt. Classifies but does not wait.
pub fn send_once<S: ProxySocket>(
    sock: &mut S,
    data: &[u8],
    peer: Option<SocketAddr>,
) -> Result<usize, IoOutcome> {
    sock.send_to(data, peer).map_err(IoOutcome::from_error)
}

/// Sends all of `data`, looping over readiness waits and partial writes
/// until every byte is dispatched or a definitive error occurs.
///
/// `ConnectionAborted`/`ConnectionReset` are classified as `PeerClosed`
/// rather than `Fatal` — an expected, frequent outcome for a proxy, not a
/// bug.
pub fn send_bounded<S: ProxySocket>(
    sock: &mut S,
    data: &[u8],
    peer: Option<SocketAddr>,
    timeout: Duration,
) -> Result<usize, IoOutcome> {
    let deadline = Instant::now() + timeout;
    let mut sent = 0;
    while sent < data.len() {
        match send_once(sock, &data[sent..], peer) {
            Ok(n) => sent += n,
            Err(outcome) => match outcome.class {
                ErrorClass::Retry => {
                    if deadline.saturating_duration_since(Instant::now()).is_zero() {
                        return Err(outcome);
                    }
                    continue;
                }
                ErrorClass::WouldBlock => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(outcome);
                    }
                    let mut fds = [PollFd::new(sock.as_raw_fd(), false, true)];
                    match poll(&mut fds, remaining) {
                        Ok(_) => continue,
                        Err(e) => return Err(IoOutcome::from_error(e)),
                    }
                }
                ErrorClass::PeerClosed | ErrorClass::Fatal => return Err(outcome),
            },
        }
    }
    Ok(sent)
}

/// Waits once for readability, then drains a single receive.
///
/// This is the standalone component contract from the spec; the engine's
/// own read step (already gated on a POLLIN result from its own readiness
/// wait) calls [`recv_once`] directly instead, to keep one poll per outer
/// iteration rather than two.
pub fn recv_bounded<S: ProxySocket>(
    sock: &mut S,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(usize, Option<SocketAddr>), IoOutcome> {
    let mut fds = [PollFd::new(sock.as_raw_fd(), true, false)];
    poll(&mut fds, timeout).map_err(IoOutcome::from_error)?;
    if !fds[0].readable() {
        return Err(IoOutcome {
            class: ErrorClass::WouldBlock,
            source: std::io::Error::from(std::io::ErrorKind::WouldBlock),
        });
    }
    recv_once(sock, buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::test_support::PairedSocket;

    #[test]
    fn send_bounded_delivers_everything() {
        let (mut a, mut b) = PairedSocket::pair();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        let payload = vec![7u8; 4096];
        let sent = send_bounded(&mut a, &payload, None, Duration::from_secs(2)).unwrap();
        assert_eq!(sent, payload.len());

        let mut received = vec![0u8; payload.len()];
        let mut got = 0;
        while got < received.len() {
            let (n, _) = recv_bounded(
                &mut b,
                &mut received[got..],
                Duration::from_secs(2),
            )
            .unwrap();
            got += n;
        }
        assert_eq!(received, payload);
    }

    #[test]
    fn recv_bounded_times_out_with_would_block() {
        let (mut a, _b) = PairedSocket::pair();
        a.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 16];
        let err = recv_bounded(&mut a, &mut buf, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.class, ErrorClass::WouldBlock);
    }

    #[test]
    fn reset_is_classified_as_peer_closed() {
        let (mut a, b) = PairedSocket::pair();
        a.set_nonblocking(true).unwrap();
        b.arm_reset_on_close();
        drop(b);
        // give the kernel a moment to deliver the RST
        std::thread::sleep(Duration::from_millis(50));
        let mut buf = [0u8; 16];
        let err = recv_bounded(&mut a, &mut buf, Duration::from_millis(200)).unwrap_err();
        assert_eq!(err.class, ErrorClass::PeerClosed);
    }
}
