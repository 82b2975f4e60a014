//! The per-direction buffered endpoint.

use crate::net::socket::ProxySocket;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// A reservation in a direction's write queue.
///
/// A placeholder may be created with its contents already known (an
/// immediate write) or pending (its contents will be supplied later by some
/// event outside the engine — e.g. an upstream lookup the filter kicked off).
/// [`Placeholder::pending`] hands back a [`PlaceholderHandle`] the caller
/// keeps and fulfills asynchronously; the queue entry itself only ever reads
/// the shared cell, never writes it.
#[derive(Clone)]
pub struct Placeholder {
    contents: Arc<Mutex<Option<Vec<u8>>>>,
}

impl fmt::Debug for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.contents.lock().unwrap();
        match &*guard {
            Some(bytes) => f
                .debug_struct("Placeholder")
                .field("contents_known", &true)
                .field("len", &bytes.len())
                .finish(),
            None => f
                .debug_struct("Placeholder")
                .field("contents_known", &false)
                .finish(),
        }
    }
}

impl Placeholder {
    /// Creates a placeholder whose contents are already known.
    ///
    /// Panics if `contents` is empty: per the data model, a placeholder
    /// with known contents always has a non-empty payload.
    pub fn known(contents: Vec<u8>) -> Self {
        assert!(
            !contents.is_empty(),
            "a known placeholder must have non-empty contents"
        );
        Placeholder {
            contents: Arc::new(Mutex::new(Some(contents))),
        }
    }

    /// Creates a placeholder with contents to be filled in later, returning
    /// the handle used to fulfill it.
    pub fn pending() -> (Self, PlaceholderHandle) {
        let contents = Arc::new(Mutex::new(None));
        (
            Placeholder {
                contents: contents.clone(),
            },
            PlaceholderHandle { contents },
        )
    }

    pub fn contents_known(&self) -> bool {
        self.contents.lock().unwrap().is_some()
    }

    pub fn contents_len(&self) -> Option<usize> {
        self.contents.lock().unwrap().as_ref().map(Vec::len)
    }

    /// Takes the contents out, leaving the placeholder emptied. Only called
    /// by the engine once it has fully transmitted them.
    fn take_contents(&self) -> Option<Vec<u8>> {
        self.contents.lock().unwrap().take()
    }

    /// Clones the contents without consuming them, for a send attempt that
    /// may fail partway and must leave the placeholder in place.
    fn take_contents_ref(&self) -> Option<Vec<u8>> {
        self.contents.lock().unwrap().clone()
    }
}

/// The external handle to a [`Placeholder`]'s contents, held by whatever
/// asynchronous event is expected to supply them.
#[derive(Debug, Clone)]
pub struct PlaceholderHandle {
    contents: Arc<Mutex<Option<Vec<u8>>>>,
}

impl PlaceholderHandle {
    /// Supplies the placeholder's contents. Panics if `contents` is empty,
    /// or if this placeholder was already fulfilled.
    pub fn fulfill(&self, contents: Vec<u8>) {
        assert!(!contents.is_empty(), "fulfilled contents must be non-empty");
        let mut guard = self.contents.lock().unwrap();
        assert!(guard.is_none(), "placeholder already fulfilled");
        *guard = Some(contents);
    }
}

/// One direction's buffered socket: the socket handle, its peer address (for
/// connectionless sends), the three byte regions, and the write queue.
#[derive(Debug)]
pub struct SockBuf<S: ProxySocket> {
    sock: Option<S>,
    peer_addr: Option<SocketAddr>,
    pub(crate) unfiltered_bytes: Vec<u8>,
    pub(crate) uncommitted_bytes: Vec<u8>,
    pub(crate) placeholders: VecDeque<Placeholder>,
    bytes_read_so_far: Vec<u8>,
    bytes_written_so_far: Vec<u8>,
    disconnected: bool,
}

impl<S: ProxySocket> SockBuf<S> {
    pub fn new(sock: S, peer_addr: Option<SocketAddr>) -> Self {
        SockBuf {
            sock: Some(sock),
            peer_addr,
            unfiltered_bytes: Vec::new(),
            uncommitted_bytes: Vec::new(),
            placeholders: VecDeque::new(),
            bytes_read_so_far: Vec::new(),
            bytes_written_so_far: Vec::new(),
            disconnected: false,
        }
    }

    /// Constructs an already-invalid `SockBuf` (no socket). Used when a
    /// caller only cares about one direction of a pair.
    pub fn invalid() -> Self {
        SockBuf {
            sock: None,
            peer_addr: None,
            unfiltered_bytes: Vec::new(),
            uncommitted_bytes: Vec::new(),
            placeholders: VecDeque::new(),
            bytes_read_so_far: Vec::new(),
            bytes_written_so_far: Vec::new(),
            disconnected: false,
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.sock.is_none()
    }

    pub fn disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub(crate) fn sock_mut(&mut self) -> Option<&mut S> {
        self.sock.as_mut()
    }

    pub fn bytes_read_so_far(&self) -> &[u8] {
        &self.bytes_read_so_far
    }

    pub fn bytes_written_so_far(&self) -> &[u8] {
        &self.bytes_written_so_far
    }

    pub(crate) fn record_read(&mut self, bytes: &[u8]) {
        self.bytes_read_so_far.extend_from_slice(bytes);
    }

    pub(crate) fn record_write(&mut self, bytes: &[u8]) {
        self.bytes_written_so_far.extend_from_slice(bytes);
    }

    pub fn push_placeholder(&mut self, placeholder: Placeholder) {
        self.placeholders.push_back(placeholder);
    }

    /// True if any placeholder — known or pending — remains in the queue.
    pub fn definitely_has_future_writes(&self) -> bool {
        !self.placeholders.is_empty()
    }

    /// True if the head-of-queue placeholder's contents are already known
    /// and so a write could proceed right now.
    pub fn has_known_writes_pending(&self) -> bool {
        self.placeholders
            .front()
            .is_some_and(Placeholder::contents_known)
    }

    /// Sum of content lengths over the contiguous prefix of placeholders
    /// whose contents are known; 0 if the socket is invalid or the queue's
    /// head is not yet known.
    pub(crate) fn known_write_len(&self) -> usize {
        if self.is_invalid() {
            return 0;
        }
        self.placeholders
            .iter()
            .take_while(|p| p.contents_known())
            .map(|p| p.contents_len().unwrap_or(0))
            .sum()
    }

    /// Clones the head placeholder's contents without removing it from the
    /// queue, so a failed send leaves the queue untouched. Only the engine's
    /// write step, which pops the entry itself once the send succeeds, calls
    /// this.
    pub(crate) fn peek_known_contents(&self) -> Option<Vec<u8>> {
        self.placeholders
            .front()
            .filter(|p| p.contents_known())
            .and_then(Placeholder::take_contents_ref)
    }

    /// The raw descriptor to poll for this direction, or `-1` if the socket
    /// is invalid — a valid `poll(2)` sentinel that is never reported ready.
    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        match &self.sock {
            Some(s) => s.as_raw_fd(),
            None => -1,
        }
    }

    /// Idempotently shuts down and releases the socket.
    pub fn shutdown_and_close(&mut self) {
        if let Some(mut sock) = self.sock.take() {
            let _ = sock.shutdown();
        }
        self.disconnected = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::test_support::PairedSocket;

    #[test]
    fn placeholder_known_roundtrip() {
        let p = Placeholder::known(b"hello".to_vec());
        assert!(p.contents_known());
        assert_eq!(p.contents_len(), Some(5));
        assert_eq!(p.take_contents(), Some(b"hello".to_vec()));
    }

    #[test]
    #[should_panic]
    fn placeholder_known_rejects_empty() {
        Placeholder::known(Vec::new());
    }

    #[test]
    fn placeholder_pending_starts_unknown_then_fulfilled() {
        let (p, handle) = Placeholder::pending();
        assert!(!p.contents_known());
        handle.fulfill(b"later".to_vec());
        assert!(p.contents_known());
        assert_eq!(p.contents_len(), Some(5));
    }

    #[test]
    fn known_write_len_stops_at_first_unknown() {
        let (a, b) = PairedSocket::pair();
        let mut sb = SockBuf::new(a, None);
        drop(b);
        sb.push_placeholder(Placeholder::known(vec![1, 2, 3]));
        let (pending, _handle) = Placeholder::pending();
        sb.push_placeholder(pending);
        sb.push_placeholder(Placeholder::known(vec![4, 5]));
        assert_eq!(sb.known_write_len(), 3);
        assert!(sb.has_known_writes_pending());
    }

    #[test]
    fn invalid_sockbuf_has_no_known_writes() {
        let mut sb: SockBuf<PairedSocket> = SockBuf::invalid();
        sb.push_placeholder(Placeholder::known(vec![1]));
        assert_eq!(sb.known_write_len(), 0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (a, b) = PairedSocket::pair();
        drop(b);
        let mut sb = SockBuf::new(a, None);
        sb.shutdown_and_close();
        assert!(sb.disconnected());
        assert!(sb.is_invalid());
        sb.shutdown_and_close();
        assert!(sb.disconnected());
    }
}
