//! UDP vehicle-discovery channel
//!
//! One instance lives for the whole client: it owns the broadcast-capable
//! send socket and the unicast receive socket, and aggregates the
//! [`VehicleAnnouncement`]s a discovery request collects within a bounded
//! window. Unlike [`crate::tcp_channel::TcpChannel`], there is no
//! per-request exclusivity concept here — a discovery request simply opens
//! a window, and every unicast announcement that lands inside it is kept.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::doip::{
    decode_header, encode_frame, FrameError, PayloadType, VehicleAnnouncement, VehicleIdentificationRequest,
};
use crate::error::{DiagClientError, DiagClientResult};
use crate::timer::SyncTimer;
use crate::transport::{resolve_addr, ClientUdpSocket, UdpSocketProvider};

struct Shared {
    running: AtomicBool,
    /// `Some` only while a discovery window is open; `None` means any
    /// announcement that arrives is outside a window and gets discarded.
    aggregation: Mutex<Option<HashMap<(IpAddr, u16), VehicleAnnouncement>>>,
    window_timer: SyncTimer,
}

/// The client-wide UDP discovery channel
pub struct UdpChannel {
    shared: Arc<Shared>,
    broadcast_socket: Box<dyn ClientUdpSocket>,
    broadcast_addr: SocketAddr,
    unicast_local_addr: SocketAddr,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl UdpChannel {
    /// Binds the broadcast-send and unicast-receive sockets and starts the
    /// reader thread. `local_addr` is the `UdpIpAddress` from the client
    /// config; `broadcast_addr` is `UdpBroadcastAddress`, both on
    /// [`crate::config::DEFAULT_DOIP_PORT`] unless overridden.
    pub fn open(
        provider: &dyn UdpSocketProvider,
        local_addr: IpAddr,
        broadcast_addr: IpAddr,
        port: u16,
    ) -> DiagClientResult<Self> {
        let broadcast_socket = provider
            .bind_broadcast(SocketAddr::new(local_addr, port))
            .map_err(DiagClientError::ConnectionFailed)?;
        let unicast_socket = provider
            .bind_unicast(SocketAddr::new(local_addr, 0))
            .map_err(DiagClientError::ConnectionFailed)?;
        unicast_socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(DiagClientError::ConnectionFailed)?;
        let unicast_local_addr = unicast_socket.local_addr().map_err(DiagClientError::ConnectionFailed)?;

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            aggregation: Mutex::new(None),
            window_timer: SyncTimer::new(),
        });

        let reader_shared = shared.clone();
        let handle = std::thread::spawn(move || reader_loop(reader_shared, unicast_socket));

        Ok(Self {
            shared,
            broadcast_socket,
            broadcast_addr: SocketAddr::new(broadcast_addr, port),
            unicast_local_addr,
            reader: Mutex::new(Some(handle)),
        })
    }

    /// The address the channel's unicast receive socket is bound to (useful
    /// for tests and for servers that need to target this client directly
    /// rather than via broadcast)
    pub fn unicast_local_addr(&self) -> SocketAddr {
        self.unicast_local_addr
    }

    /// Sends a vehicle identification request to the configured broadcast
    /// address, then blocks for `window` collecting every unicast
    /// announcement that arrives. Always returns `Ok`, even with an empty
    /// list: discovery is inherently best-effort.
    pub fn send_vehicle_identification_request(
        &self,
        preselection: VehicleIdentificationRequest,
        window: Duration,
    ) -> DiagClientResult<Vec<VehicleAnnouncement>> {
        let (payload_type, body) = preselection.encode();
        let frame = encode_frame(payload_type, &body);

        *self.shared.aggregation.lock().unwrap_or_else(|e| e.into_inner()) = Some(HashMap::new());

        self.broadcast_socket
            .send_to(&frame, self.broadcast_addr)
            .map_err(DiagClientError::TransmitFailed)?;
        log::debug!("udp_channel: sent vehicle identification request to {}", self.broadcast_addr);

        // Discovery never cancels early: every announcement within the
        // window is wanted, so the timer always runs to its full timeout.
        let _ = self.shared.window_timer.start(window);

        let collected = self
            .shared
            .aggregation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_default();
        let list: Vec<VehicleAnnouncement> = collected.into_values().collect();
        log::debug!("udp_channel: discovery window closed, {} entries", list.len());
        Ok(list)
    }

    /// Stops the reader thread. Idempotent.
    pub fn close(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.window_timer.shutdown();
        if let Some(handle) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UdpChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for UdpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpChannel")
            .field("broadcast_addr", &self.broadcast_addr)
            .field("unicast_local_addr", &self.unicast_local_addr)
            .finish()
    }
}

/// Resolves the pair of configured addresses (local bind, broadcast target)
/// used to open a [`UdpChannel`].
pub fn resolve_discovery_addrs(local: &str, broadcast: &str, port: u16) -> DiagClientResult<(IpAddr, IpAddr)> {
    let local_ip = resolve_addr(local, port).map_err(DiagClientError::ConnectionFailed)?.ip();
    let broadcast_ip = resolve_addr(broadcast, port).map_err(DiagClientError::ConnectionFailed)?.ip();
    Ok((local_ip, broadcast_ip))
}

fn reader_loop(shared: Arc<Shared>, socket: Box<dyn ClientUdpSocket>) {
    let mut buf = vec![0u8; 4096];
    while shared.running.load(Ordering::SeqCst) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => {
                log::warn!("udp_channel: reader socket error: {e}");
                continue;
            }
        };

        let header = match decode_header(&buf[..len], u32::MAX) {
            Ok(h) => h,
            Err(FrameError::UnknownPayloadType(raw)) => {
                log::debug!("udp_channel: discarding frame with unknown payload type 0x{raw:04X} from {from}");
                continue;
            }
            Err(e) => {
                log::debug!("udp_channel: discarding malformed frame from {from}: {e}");
                continue;
            }
        };

        if header.payload_type != PayloadType::VehicleAnnouncement {
            continue;
        }

        let announcement = match VehicleAnnouncement::decode(from.ip(), &header.payload) {
            Ok(a) => a,
            Err(e) => {
                log::debug!("udp_channel: malformed vehicle announcement from {from}: {e}");
                continue;
            }
        };

        let mut aggregation = shared.aggregation.lock().unwrap_or_else(|e| e.into_inner());
        match aggregation.as_mut() {
            Some(map) => {
                log::trace!(
                    "udp_channel: vehicle announcement from {} (VIN {})",
                    from,
                    announcement.vin_string()
                );
                map.insert(announcement.dedup_key(), announcement);
            }
            None => {
                log::trace!("udp_channel: discarding announcement from {from}, no discovery window open");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StdUdpSocketProvider;

    #[test]
    fn discovery_aggregates_distinct_announcements_and_dedups() {
        let provider = StdUdpSocketProvider;
        let channel = UdpChannel::open(&provider, "127.0.0.1".parse().unwrap(), "127.0.0.1".parse().unwrap(), 18401)
            .unwrap();

        // Loopback has no real broadcast delivery in a test sandbox, so the
        // fake "servers" below target the channel's unicast receive socket
        // directly, the same way a real DoIP entity replies unicast to the
        // address a request was sent from.
        let target = channel.unicast_local_addr();

        let servers: Vec<std::net::UdpSocket> = (0..2)
            .map(|_| std::net::UdpSocket::bind("127.0.0.1:0").unwrap())
            .collect();

        let announce = |logical_address: u16| {
            let mut body = Vec::new();
            body.extend_from_slice(b"ABCDEFGH123456789");
            body.extend_from_slice(&logical_address.to_be_bytes());
            body.extend_from_slice(&[0x00, 0x02, 0x36, 0x31, 0x00, 0x1C]);
            body.extend_from_slice(&[0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F]);
            body.push(0x00);
            encode_frame(PayloadType::VehicleAnnouncement, &body)
        };

        let senders: Vec<_> = servers
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let frame = announce(0xFA25 + i as u16);
                let dest = target;
                let sock = s.try_clone().unwrap();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(20));
                    sock.send_to(&frame, dest).unwrap();
                })
            })
            .collect();

        let list = channel
            .send_vehicle_identification_request(VehicleIdentificationRequest::None, Duration::from_millis(300))
            .unwrap();

        for s in senders {
            s.join().unwrap();
        }

        assert_eq!(list.len(), 2);
        let mut addrs: Vec<u16> = list.iter().map(|a| a.logical_address).collect();
        addrs.sort();
        assert_eq!(addrs, vec![0xFA25, 0xFA26]);
    }

    #[test]
    fn empty_window_returns_ok_empty_list() {
        let provider = StdUdpSocketProvider;
        let channel = UdpChannel::open(&provider, "127.0.0.1".parse().unwrap(), "127.0.0.1".parse().unwrap(), 18402)
            .unwrap();
        let list = channel
            .send_vehicle_identification_request(VehicleIdentificationRequest::None, Duration::from_millis(50))
            .unwrap();
        assert!(list.is_empty());
    }
}
