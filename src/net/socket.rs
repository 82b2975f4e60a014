//! The socket abstraction a [`crate::sockbuf::SockBuf`] drives.
//!
//! Generalizes the teacher's `WriteTransport`/`ReadTransport` split (one
//! trait per direction, each backing a `TcpStream`) into a single duplex
//! trait, since a `SockBuf` owns one socket handle used for both directions
//! of traffic — matching a connected `TcpStream` as well as a connectionless
//! `UdpSocket`, where the peer address travels with each datagram rather
//! than being fixed at connect time.

use std::fmt::Debug;
use std::io;
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};

/// A socket the engine can poll, read from, and write to.
pub trait ProxySocket: Debug + AsRawFd {
    /// Puts the socket into non-blocking mode. Called once before the
    /// engine's first poll.
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;

    /// Receives into `buf`. Returns the byte count and, for connectionless
    /// transports, the sender's address.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)>;

    /// Sends `data`, to `peer` if given (connectionless transports) or to
    /// the already-connected peer otherwise. Returns the number of bytes
    /// actually written — callers must handle partial writes.
    fn send_to(&mut self, data: &[u8], peer: Option<SocketAddr>) -> io::Result<usize>;

    /// Shuts down both halves of the socket.
    fn shutdown(&mut self) -> io::Result<()>;

    /// True for a connected, stream-oriented transport (`TcpStream`) where a
    /// zero-length `recv` means the peer performed an orderly close. False
    /// for a connectionless transport (`UdpSocket`) where a zero-length
    /// `recv` is just a legitimately empty datagram — UDP has no disconnect
    /// to signal.
    fn is_connection_oriented(&self) -> bool;
}

impl ProxySocket for TcpStream {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        use std::io::Read;
        let n = self.read(buf)?;
        Ok((n, None))
    }

    fn send_to(&mut self, data: &[u8], _peer: Option<SocketAddr>) -> io::Result<usize> {
        use std::io::Write;
        self.write(data)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, std::net::Shutdown::Both)
    }

    fn is_connection_oriented(&self) -> bool {
        true
    }
}

impl ProxySocket for UdpSocket {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        UdpSocket::set_nonblocking(self, nonblocking)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        let (n, peer) = self.recv_from(buf)?;
        Ok((n, Some(peer)))
    }

    fn send_to(&mut self, data: &[u8], peer: Option<SocketAddr>) -> io::Result<usize> {
        match peer {
            Some(addr) => UdpSocket::send_to(self, data, addr),
            None => self.send(data),
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        // UDP has no shutdown handshake; dropping the socket is sufficient,
        // this is a no-op kept so the trait is uniform across transports.
        Ok(())
    }

    fn is_connection_oriented(&self) -> bool {
        false
    }
}

impl AsRawFd for Box<dyn ProxySocket> {
    fn as_raw_fd(&self) -> RawFd {
        (**self).as_raw_fd()
    }
}

impl ProxySocket for Box<dyn ProxySocket> {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        (**self).set_nonblocking(nonblocking)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        (**self).recv(buf)
    }

    fn send_to(&mut self, data: &[u8], peer: Option<SocketAddr>) -> io::Result<usize> {
        (**self).send_to(data, peer)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown()
    }

    fn is_connection_oriented(&self) -> bool {
        (**self).is_connection_oriented()
    }
}

/// Test doubles used by the engine's unit tests.
///
/// Backed by a real loopback `TcpStream` pair rather than an in-memory
/// queue, so the readiness primitive's real `poll(2)` call sees real file
/// descriptors — a hand-rolled mock would need its own fake `poll`, which
/// would test the mock instead of the engine.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    /// One half of a connected loopback TCP pair.
    #[derive(Debug)]
    pub struct PairedSocket(TcpStream);

    impl PairedSocket {
        /// Creates a connected pair over `127.0.0.1`.
        pub fn pair() -> (PairedSocket, PairedSocket) {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
            let addr = listener.local_addr().expect("local_addr");
            let client = TcpStream::connect(addr).expect("connect loopback client");
            let (server, _) = listener.accept().expect("accept loopback server");
            (PairedSocket(client), PairedSocket(server))
        }

        /// Arranges for this side's eventual close to send RST instead of
        /// FIN, so the peer observes a reset rather than an orderly close.
        ///
        /// Goes through `libc::setsockopt` directly rather than
        /// `TcpStream::set_linger`, which is still gated behind the
        /// unstable `tcp_linger` feature on stable Rust.
        pub fn arm_reset_on_close(&self) {
            let linger = libc::linger {
                l_onoff: 1,
                l_linger: 0,
            };
            let ret = unsafe {
                libc::setsockopt(
                    self.0.as_raw_fd(),
                    libc::SOL_SOCKET,
                    libc::SO_LINGER,
                    &linger as *const libc::linger as *const libc::c_void,
                    std::mem::size_of::<libc::linger>() as libc::socklen_t,
                )
            };
            if ret != 0 {
                panic!(
                    "set SO_LINGER(0): {}",
                    std::io::Error::last_os_error()
                );
            }
        }
    }

    impl AsRawFd for PairedSocket {
        fn as_raw_fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }
    }

    impl ProxySocket for PairedSocket {
        fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
            ProxySocket::set_nonblocking(&mut self.0, nonblocking)
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
            ProxySocket::recv(&mut self.0, buf)
        }

        fn send_to(&mut self, data: &[u8], peer: Option<SocketAddr>) -> io::Result<usize> {
            ProxySocket::send_to(&mut self.0, data, peer)
        }

        fn shutdown(&mut self) -> io::Result<()> {
            ProxySocket::shutdown(&mut self.0)
        }

        fn is_connection_oriented(&self) -> bool {
            ProxySocket::is_connection_oriented(&self.0)
        }
    }
}
