//! Sockets of the host network stack, used when the bearer is WLAN or LTE.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::debug;

use super::{DatagramSocket, Endpoint, SocketError, StreamSocket};

const RECV_BUFFER: usize = 2048;
/// `set_read_timeout` rejects a zero duration.
const MIN_WAIT: Duration = Duration::from_millis(1);

fn is_idle(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

pub struct HostUdp {
    socket: UdpSocket,
}

impl HostUdp {
    pub fn bind() -> Result<Self, SocketError> {
        Self::bind_to("0.0.0.0:0")
    }

    pub fn bind_to(addr: &str) -> Result<Self, SocketError> {
        Ok(Self {
            socket: UdpSocket::bind(addr)?,
        })
    }
}

impl DatagramSocket for HostUdp {
    fn send_to(&mut self, data: &[u8], to: &Endpoint) -> Result<usize, SocketError> {
        Ok(self.socket.send_to(data, (to.host.as_str(), to.port))?)
    }

    fn recv_from(&mut self, timeout: Duration) -> Result<(Vec<u8>, Option<Endpoint>), SocketError> {
        self.socket.set_read_timeout(Some(timeout.max(MIN_WAIT)))?;
        let mut buf = [0u8; RECV_BUFFER];
        match self.socket.recv_from(&mut buf) {
            Ok((n, from)) => Ok((buf[..n].to_vec(), Some(Endpoint::new(from.ip().to_string(), from.port())))),
            Err(e) if is_idle(&e) => Ok((Vec::new(), None)),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<(), SocketError> {
        Ok(())
    }
}

pub struct HostTcp {
    stream: Option<TcpStream>,
    read_timeout: Duration,
}

impl HostTcp {
    pub fn new() -> Self {
        Self {
            stream: None,
            read_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn stream(&mut self) -> Result<&mut TcpStream, SocketError> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected).into())
    }
}

impl Default for HostTcp {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSocket for HostTcp {
    fn connect(&mut self, to: &Endpoint) -> Result<(), SocketError> {
        let addr = (to.host.as_str(), to.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", to)))?;
        let stream = TcpStream::connect_timeout(&addr, self.read_timeout)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, SocketError> {
        self.stream()?.write_all(data)?;
        Ok(data.len())
    }

    fn recv(&mut self) -> Result<Vec<u8>, SocketError> {
        let stream = self.stream()?;
        let mut buf = [0u8; RECV_BUFFER];
        match stream.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if is_idle(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<(), SocketError> {
        if let Some(stream) = self.stream.take() {
            // Peer may already have closed its side.
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("tcp shutdown: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn udp_exchange_over_loopback() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_port = peer.local_addr().unwrap().port();
        let mut sock = HostUdp::bind_to("127.0.0.1:0").unwrap();

        let to = Endpoint::new("127.0.0.1", peer_port);
        assert_eq!(sock.send_to(b"ping", &to).unwrap(), 4);
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        peer.send_to(b"pong", from).unwrap();

        let (data, src) = sock.recv_from(Duration::from_millis(200)).unwrap();
        assert_eq!(data, b"pong");
        assert_eq!(src, Some(to));
    }

    #[test]
    fn udp_silence_is_empty() {
        let mut sock = HostUdp::bind_to("127.0.0.1:0").unwrap();
        let (data, src) = sock.recv_from(Duration::from_millis(200)).unwrap();
        assert!(data.is_empty());
        assert!(src.is_none());
    }

    #[test]
    fn tcp_reads_until_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut req = [0u8; 5];
            conn.read_exact(&mut req).unwrap();
            conn.write_all(b"reply").unwrap();
        });

        let mut sock = HostTcp::new().with_read_timeout(Duration::from_secs(2));
        sock.connect(&Endpoint::new("127.0.0.1", port)).unwrap();
        sock.send(b"hello").unwrap();
        let mut got = Vec::new();
        loop {
            let chunk = sock.recv().unwrap();
            if chunk.is_empty() {
                break;
            }
            got.extend(chunk);
        }
        server.join().unwrap();
        assert_eq!(got, b"reply");
        sock.close().unwrap();
    }

    #[test]
    fn tcp_send_before_connect() {
        let mut sock = HostTcp::new();
        let err = sock.send(b"x").unwrap_err();
        assert!(matches!(err, SocketError::Io(e) if e.kind() == io::ErrorKind::NotConnected));
    }
}
