//! Client façade / conversation manager
//!
//! The top level entry point: [`DiagnosticClient::from_config_file`] loads
//! the JSON configuration, then
//! [`DiagnosticClient::get_diagnostic_client_conversation`] hands out named
//! [`Conversation`]s bound to fresh [`TcpChannel`]s built by the single
//! [`DoipTransportHandler`] this client owns. Vehicle discovery runs on the
//! client's one [`UdpChannel`], whose reader thread is the only thread that
//! lives for the lifetime of the client rather than for the lifetime of one
//! request.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::{ClientConfig, DEFAULT_DISCOVERY_WINDOW_MS};
use crate::conversation::Conversation;
use crate::doip::{VehicleAnnouncement, VehicleIdentificationRequest};
use crate::error::{ConfigError, DiagClientError, DiagClientResult};
use crate::handler::DoipTransportHandler;
use crate::transport::{StdTcpSocketProvider, StdUdpSocketProvider, TcpSocketProvider, UdpSocketProvider};
use crate::udp_channel::{resolve_discovery_addrs, UdpChannel};

/// Name reserved for the client-wide discovery pseudo-conversation
pub const VEHICLE_DISCOVERY_NAME: &str = "VehicleDiscovery";

/// The user-facing diagnostic client: owns the configuration, the
/// transport handler, and the lazily-opened discovery channel.
pub struct DiagnosticClient {
    config: ClientConfig,
    handler: DoipTransportHandler,
    tcp_provider: Box<dyn TcpSocketProvider>,
    udp_provider: Box<dyn UdpSocketProvider>,
    discovery: Mutex<Option<UdpChannel>>,
}

impl DiagnosticClient {
    /// Loads `path` as the JSON configuration and builds a client around
    /// it, using the default `std::net`-backed socket providers.
    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        let config = ClientConfig::from_file(path)?;
        Ok(Self::from_config(config))
    }

    /// Builds a client around an already-parsed configuration. Split out
    /// from [`DiagnosticClient::from_config_file`] so tests and
    /// non-filesystem embedders can skip the JSON round trip.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            handler: DoipTransportHandler::new(),
            tcp_provider: Box::new(StdTcpSocketProvider),
            udp_provider: Box::new(StdUdpSocketProvider),
            discovery: Mutex::new(None),
        }
    }

    /// Explicit initialization step, matching the `Initialize`/`DeInitialize`
    /// pair. Configuration is already validated at parse time, so this is
    /// currently infallible; kept as a named step so a future addition
    /// (e.g. eagerly opening the discovery sockets) has somewhere to live
    /// without changing the public surface.
    pub fn initialize(&self) -> DiagClientResult<()> {
        Ok(())
    }

    /// Tears down the discovery channel, if one was opened. Idempotent.
    pub fn deinitialize(&self) {
        if let Some(channel) = self.discovery.lock().unwrap_or_else(|e| e.into_inner()).take() {
            channel.close();
        }
    }

    /// Builds a fresh [`Conversation`] bound to the named configuration
    /// entry. Each call constructs a new, unconnected channel via this
    /// client's [`DoipTransportHandler`]; conversations are never shared.
    pub fn get_diagnostic_client_conversation(&self, name: &str) -> DiagClientResult<Conversation> {
        let config = self
            .config
            .conversations
            .get(name)
            .cloned()
            .ok_or_else(|| DiagClientError::UnknownConversation(name.to_string()))?;
        let channel = self.handler.find_or_create_tcp_connection(config.clone());
        Ok(Conversation::from_channel(config, channel))
    }

    /// The socket provider conversations should use to connect; exposed so
    /// callers building a [`Conversation`] through
    /// [`DiagnosticClient::get_diagnostic_client_conversation`] can then
    /// call [`Conversation::connect_to_diag_server`] with it.
    pub fn tcp_socket_provider(&self) -> &dyn TcpSocketProvider {
        self.tcp_provider.as_ref()
    }

    fn discovery_channel(&self) -> DiagClientResult<()> {
        let mut guard = self.discovery.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return Ok(());
        }
        let (local_ip, broadcast_ip) = resolve_discovery_addrs(
            &self.config.udp_ip_address,
            &self.config.udp_broadcast_address,
            crate::config::DEFAULT_DOIP_PORT,
        )?;
        let channel = UdpChannel::open(self.udp_provider.as_ref(), local_ip, broadcast_ip, crate::config::DEFAULT_DOIP_PORT)?;
        *guard = Some(channel);
        Ok(())
    }

    /// Broadcasts a vehicle identification request and collects every
    /// announcement received within [`DEFAULT_DISCOVERY_WINDOW_MS`].
    /// Always `Ok`, even with an empty list (discovery is best-effort).
    pub fn send_vehicle_identification_request(
        &self,
        preselection: VehicleIdentificationRequest,
    ) -> DiagClientResult<Vec<VehicleAnnouncement>> {
        self.discovery_channel()?;
        let guard = self.discovery.lock().unwrap_or_else(|e| e.into_inner());
        let channel = guard.as_ref().expect("discovery_channel just populated this");
        channel.send_vehicle_identification_request(
            preselection,
            Duration::from_millis(DEFAULT_DISCOVERY_WINDOW_MS as u64),
        )
    }

    /// Alias for [`DiagnosticClient::send_vehicle_identification_request`]
    /// with no preselection criteria.
    pub fn get_diagnostic_server_list(&self) -> DiagClientResult<Vec<VehicleAnnouncement>> {
        self.send_vehicle_identification_request(VehicleIdentificationRequest::None)
    }
}

impl Drop for DiagnosticClient {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

impl std::fmt::Debug for DiagnosticClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticClient")
            .field("conversations", &self.config.conversations.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    {
        "UdpIpAddress": "127.0.0.1",
        "UdpBroadcastAddress": "127.0.0.1",
        "Conversation": {
            "NumberOfConversation": 1,
            "ConversationProperty": [
                {
                    "ConversationName": "DiagTester",
                    "P2ClientMax": 1000,
                    "P2StarClientMax": 1000,
                    "RxBufferSize": 500,
                    "SourceAddress": 3584,
                    "Network": {
                        "TcpIpAddress": "127.0.0.1:13400"
                    }
                }
            ]
        }
    }"#;

    #[test]
    fn unknown_conversation_name_is_rejected() {
        let client = DiagnosticClient::from_config(ClientConfig::from_str(SAMPLE).unwrap());
        let err = client.get_diagnostic_client_conversation("NoSuchConversation").unwrap_err();
        assert!(matches!(err, DiagClientError::UnknownConversation(name) if name == "NoSuchConversation"));
    }

    #[test]
    fn known_conversation_name_builds_an_inactive_conversation() {
        let client = DiagnosticClient::from_config(ClientConfig::from_str(SAMPLE).unwrap());
        let conv = client.get_diagnostic_client_conversation("DiagTester").unwrap();
        assert_eq!(conv.name(), "DiagTester");
        assert_eq!(conv.status(), crate::conversation::ActivityStatus::Inactive);
    }
}
