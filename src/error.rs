//! Error surface for the proxy engine.
//!
//! Two layers: [`ErrorClass`] is what the bounded I/O primitives return (a
//! small, OS-independent classification of a `std::io::Error`, never a raw
//! errno), and [`ProxyError`] is what the engine itself returns, covering
//! every failure row in the engine's error table.

use crate::direction::Direction;
use std::io;

/// Classification of an I/O outcome, independent of platform error codes.
///
/// The bounded send/receive primitives translate `std::io::ErrorKind` into
/// one of these four buckets; the engine only ever inspects the bucket, never
/// the underlying `io::Error`, so its control flow is portable across
/// platforms without a table of `WSAECONNRESET`/`ECONNRESET`/etc. aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The syscall was interrupted and should be retried immediately.
    Retry,
    /// The operation would have blocked; try again once the socket is ready.
    WouldBlock,
    /// The peer closed or reset the connection.
    PeerClosed,
    /// Any other error; not recoverable.
    Fatal,
}

impl ErrorClass {
    pub fn classify(err: &io::Error) -> ErrorClass {
        match err.kind() {
            io::ErrorKind::Interrupted => ErrorClass::Retry,
            io::ErrorKind::WouldBlock => ErrorClass::WouldBlock,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                ErrorClass::PeerClosed
            }
            _ => ErrorClass::Fatal,
        }
    }
}

/// Errors that terminate [`crate::engine::bidirectional_filtered_proxy_core`].
///
/// A `Timeout` is deliberately not a variant here: per the engine contract,
/// a readiness wait that elapses without any socket becoming ready is a
/// normal, non-error completion (`timed_out = true` in the result), not a
/// failure.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// A direction's socket was closed while its filter had not reached
    /// `QuitFilter`.
    #[error("{0:?}: socket closed during communication with filter not at QuitFilter")]
    SocketClosedDuringCommunication(Direction),

    /// The readiness primitive returned an error other than EINTR/EAGAIN.
    #[error("poll error: {0}")]
    PollError(#[source] io::Error),

    /// A readiness wait reported POLLERR/POLLHUP/POLLNVAL for a direction.
    #[error("{0:?}: peer error or hangup reported by readiness primitive")]
    PeerErrorHangup(Direction),

    /// A bounded send returned a non-peer-closed error.
    #[error("{0:?}: write error: {1}")]
    WriteError(Direction, #[source] io::Error),

    /// A bounded receive returned a non-peer-closed error.
    #[error("{0:?}: read error: {1}")]
    ReadError(Direction, #[source] io::Error),

    /// The engine reached its exit condition with a disconnected socket that
    /// still had placeholders pending future content.
    #[error("{0:?}: socket dropped with pending write operations")]
    SocketDroppedWithPendingWrites(Direction),

    /// The cumulative EINTR back-off exceeded the caller's timeout.
    #[error("cumulative back-off of {backoff_ms}ms exceeds timeout of {timeout_ms}ms")]
    BackoffExceedsTimeout { backoff_ms: u64, timeout_ms: u64 },
}

pub type ProxyResult<T> = Result<T, ProxyError>;
