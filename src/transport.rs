//! Socket abstractions
//!
//! The core never talks to `std::net` directly outside of [`StdTcpSocket`]
//! and [`StdUdpSocket`]; every channel is generic over the two traits here,
//! matching a "socket provider" collaborator contract and keeping a
//! narrow hardware-facing trait separate from its concrete backend.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Socket, Type};

/// A blocking TCP client socket connected to exactly one DoIP server.
///
/// Implementors must support being split across two threads: the caller
/// thread writes, the reader thread reads. [`StdTcpSocket::try_clone`]
/// mirrors `std::net::TcpStream::try_clone`, which shares the same
/// underlying file descriptor so this is safe.
pub trait ClientTcpSocket: Send {
    /// Writes the entire buffer, blocking until done or an error occurs
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// Reads exactly `buf.len()` bytes, blocking until done or an error occurs
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
    /// Shuts down both halves of the connection
    fn shutdown(&mut self) -> io::Result<()>;
    /// Produces an independent handle to the same underlying connection,
    /// for handing to the background reader thread
    fn try_clone(&self) -> io::Result<Box<dyn ClientTcpSocket>>;
}

/// Factory for opening a [`ClientTcpSocket`] connection; kept separate from
/// the trait itself so a channel can hold a `Box<dyn ClientTcpSocket>`
/// without also needing the connecting constructor to be object safe.
pub trait TcpSocketProvider: Send + Sync {
    /// Connects to `addr`, returning a boxed client socket on success
    fn connect(&self, addr: SocketAddr) -> io::Result<Box<dyn ClientTcpSocket>>;
}

/// A UDP socket used for vehicle discovery. One instance is bound for
/// broadcast sending, one for receiving unicast announcements; both are
/// modeled by the same trait.
pub trait ClientUdpSocket: Send {
    /// Sends `buf` to `addr`
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
    /// Blocks (up to the configured read timeout) for the next datagram
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    /// Sets the blocking read timeout used by `recv_from`; `None` blocks forever
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
    /// The address this socket is actually bound to (useful when bound to
    /// an ephemeral port)
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Factory for opening the pair of UDP sockets a discovery channel needs.
pub trait UdpSocketProvider: Send + Sync {
    /// Binds a socket to `local_addr` with `SO_BROADCAST` + `SO_REUSEADDR` set
    fn bind_broadcast(&self, local_addr: SocketAddr) -> io::Result<Box<dyn ClientUdpSocket>>;
    /// Binds a socket to `local_addr` with `SO_REUSEADDR` set, for receiving
    /// unicast announcements
    fn bind_unicast(&self, local_addr: SocketAddr) -> io::Result<Box<dyn ClientUdpSocket>>;
}

/// Default [`ClientTcpSocket`] backed by `std::net::TcpStream`
#[derive(Debug)]
pub struct StdTcpSocket {
    stream: TcpStream,
}

impl StdTcpSocket {
    /// Wraps an already-connected stream (used by tests that accept a
    /// connection directly rather than going through a [`TcpSocketProvider`])
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl ClientTcpSocket for StdTcpSocket {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.stream, buf)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        io::Read::read_exact(&mut self.stream, buf)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }

    fn try_clone(&self) -> io::Result<Box<dyn ClientTcpSocket>> {
        Ok(Box::new(StdTcpSocket {
            stream: self.stream.try_clone()?,
        }))
    }
}

/// Default [`TcpSocketProvider`] that dials `std::net::TcpStream::connect`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdTcpSocketProvider;

impl TcpSocketProvider for StdTcpSocketProvider {
    fn connect(&self, addr: SocketAddr) -> io::Result<Box<dyn ClientTcpSocket>> {
        let stream = TcpStream::connect(addr)?;
        Ok(Box::new(StdTcpSocket { stream }))
    }
}

/// Default [`ClientUdpSocket`] backed by `std::net::UdpSocket`
#[derive(Debug)]
pub struct StdUdpSocket {
    socket: UdpSocket,
}

impl ClientUdpSocket for StdUdpSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, addr)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Default [`UdpSocketProvider`] backed by `std::net::UdpSocket`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdUdpSocketProvider;

impl UdpSocketProvider for StdUdpSocketProvider {
    fn bind_broadcast(&self, local_addr: SocketAddr) -> io::Result<Box<dyn ClientUdpSocket>> {
        let socket = bind_with_reuse_address(local_addr)?;
        socket.set_broadcast(true)?;
        Ok(Box::new(StdUdpSocket { socket }))
    }

    fn bind_unicast(&self, local_addr: SocketAddr) -> io::Result<Box<dyn ClientUdpSocket>> {
        let socket = bind_with_reuse_address(local_addr)?;
        Ok(Box::new(StdUdpSocket { socket }))
    }
}

/// Binds a UDP socket with `SO_REUSEADDR` set before binding, the way the
/// source's `boost::asio` client sets `reuse_address` ahead of `bind`.
/// `std::net::UdpSocket` has no portable way to set this option pre-bind,
/// so the socket is built and configured through `socket2` and then
/// converted back into the standard type the rest of the module uses.
fn bind_with_reuse_address(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Resolves a bare IP + port into a [`SocketAddr`], accepting either an
/// IPv4 or IPv6 literal (the JSON config stores addresses as plain strings)
pub fn make_addr(ip: IpAddr, port: u16) -> SocketAddr {
    SocketAddr::new(ip, port)
}

/// Resolves a configured host (IP literal or DNS name) plus port into a
/// [`SocketAddr`], taking the first candidate `ToSocketAddrs` yields.
pub fn resolve_addr(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, format!("could not resolve host '{host}'")))
}
