use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::NetworkConfig;
use crate::error::Error;
use crate::event::ScanEvent;

const LINK_RETRY_DELAY: Duration = Duration::from_millis(500);
const LISTEN_TICK: Duration = Duration::from_millis(500);

/// Block until a socket can be bound on the configured source address.
///
/// With a static IP this waits for the interface to actually carry that
/// address; under DHCP the wildcard bind succeeds as soon as the stack is
/// up. Gives up after `connect_timeout_ms`.
pub fn wait_for_link(network: &NetworkConfig) -> Result<(), Error> {
    let timeout = Duration::from_millis(network.connect_timeout_ms);
    let source = network.source_addr();
    let start = Instant::now();
    loop {
        match UdpSocket::bind(SocketAddrV4::new(source, 0)) {
            Ok(_) => {
                tracing::info!(%source, "network link is up");
                return Ok(());
            }
            Err(e) if start.elapsed() < timeout => {
                tracing::debug!("waiting for link: {e}");
                thread::sleep(LINK_RETRY_DELAY);
            }
            Err(_) => return Err(Error::LinkTimeout(timeout)),
        }
    }
}

/// Socket for the companion listener: all interfaces, short read timeout so
/// the caller can poll for shutdown between datagrams.
pub fn listen_socket(port: u16) -> Result<UdpSocket, Error> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    socket.set_read_timeout(Some(LISTEN_TICK))?;
    Ok(socket)
}

/// Sends scan events as JSON datagrams to the broadcast address.
///
/// The socket is bound lazily and dropped on a send error, so the next send
/// starts from a fresh bind instead of flogging a dead socket. The failed
/// event itself is not retried; the stream stays in order.
pub struct Broadcaster {
    source: Ipv4Addr,
    dest: SocketAddrV4,
    socket: Option<UdpSocket>,
}

impl Broadcaster {
    pub fn new(source: Ipv4Addr, dest: SocketAddrV4) -> Self {
        Self {
            source,
            dest,
            socket: None,
        }
    }

    pub fn send(&mut self, event: &ScanEvent) -> Result<(), Error> {
        let payload = serde_json::to_vec(event)?;
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => self.bind()?,
        };
        match socket.send_to(&payload, self.dest) {
            Ok(_) => {
                self.socket = Some(socket);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn bind(&self) -> Result<UdpSocket, Error> {
        let socket = UdpSocket::bind(SocketAddrV4::new(self.source, 0))?;
        socket.set_broadcast(true)?;
        tracing::debug!(dest = %self.dest, "broadcast socket bound");
        Ok(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn broadcaster_delivers_json_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let dest = match receiver.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };

        let mut broadcaster = Broadcaster::new(Ipv4Addr::LOCALHOST, dest);
        let event = ScanEvent::new("node-1".to_string(), 1, "12345".to_string());
        broadcaster.send(&event).unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        let received: ScanEvent = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(received.node, "node-1");
        assert_eq!(received.seq, 1);
        assert_eq!(received.barcode, "12345");
        // wire format carries millisecond precision
        assert_eq!(
            received.timestamp.timestamp_millis(),
            event.timestamp.timestamp_millis()
        );
    }

    #[test]
    fn broadcaster_reuses_its_socket() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let dest = match receiver.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };

        let mut broadcaster = Broadcaster::new(Ipv4Addr::LOCALHOST, dest);
        let mut buf = [0u8; 2048];
        let mut sources = Vec::new();
        for seq in 1..=2 {
            let event = ScanEvent::new("node-1".to_string(), seq, "x".to_string());
            broadcaster.send(&event).unwrap();
            let (_, from) = receiver.recv_from(&mut buf).unwrap();
            sources.push(from);
        }
        assert_eq!(sources[0], sources[1]);
    }

    #[test]
    fn link_wait_succeeds_on_loopback() {
        let network = NetworkConfig {
            use_static_ip: true,
            static_ip: Ipv4Addr::LOCALHOST,
            ..NetworkConfig::default()
        };
        assert!(wait_for_link(&network).is_ok());
    }

    #[test]
    fn link_wait_times_out_on_an_address_the_host_does_not_have() {
        let network = NetworkConfig {
            use_static_ip: true,
            // TEST-NET-1, never assigned locally
            static_ip: Ipv4Addr::new(192, 0, 2, 1),
            connect_timeout_ms: 50,
            ..NetworkConfig::default()
        };
        assert!(matches!(
            wait_for_link(&network),
            Err(Error::LinkTimeout(_))
        ));
    }
}
