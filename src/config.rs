//! JSON configuration loading
//!
//! Deserializes the configuration file shape described in the crate's
//! external interface: a UDP discovery section plus a named list of
//! per-conversation properties. Unrecognized keys are ignored; a missing
//! required key, or a conversation where `P2StarClientMax < P2ClientMax`,
//! fails [`ClientConfig::from_str`]/[`ClientConfig::from_file`] with a
//! [`ConfigError`].

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default DoIP UDP/TCP port (ISO 13400-2 §7.1); 13401 is reserved for TLS
/// but TLS handshake logic is out of scope for this core.
pub const DEFAULT_DOIP_PORT: u16 = 13400;

/// Default discovery window used by [`crate::udp_channel::UdpChannel`]
pub const DEFAULT_DISCOVERY_WINDOW_MS: u32 = 1000;

/// Default routing activation timeout
pub const DEFAULT_ACTIVATION_TIMEOUT_MS: u32 = 2000;

#[derive(Debug, Deserialize)]
struct RawNetwork {
    #[serde(rename = "TcpIpAddress")]
    tcp_ip_address: String,
    #[serde(rename = "TlsHandling", default)]
    tls_handling: bool,
}

#[derive(Debug, Deserialize)]
struct RawConversationProperty {
    #[serde(rename = "ConversationName")]
    conversation_name: String,
    #[serde(rename = "P2ClientMax")]
    p2_client_max: u16,
    #[serde(rename = "P2StarClientMax")]
    p2_star_client_max: u16,
    #[serde(rename = "RxBufferSize")]
    rx_buffer_size: u16,
    #[serde(rename = "SourceAddress")]
    source_address: u16,
    #[serde(rename = "Network")]
    network: RawNetwork,
}

#[derive(Debug, Deserialize)]
struct RawConversation {
    #[serde(rename = "NumberOfConversation")]
    number_of_conversation: u8,
    #[serde(rename = "ConversationProperty")]
    conversation_property: Vec<RawConversationProperty>,
}

#[derive(Debug, Deserialize)]
struct RawClientConfig {
    #[serde(rename = "UdpIpAddress")]
    udp_ip_address: String,
    #[serde(rename = "UdpBroadcastAddress")]
    udp_broadcast_address: String,
    #[serde(rename = "Conversation")]
    conversation: RawConversation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Per-conversation configuration, immutable once the client is constructed
pub struct ConversationConfig {
    /// Name, unique within the owning [`ClientConfig`]
    pub name: String,
    /// Client logical address used in routing activation and outgoing
    /// diagnostic messages
    pub client_logical_address: u16,
    /// Size of the receive buffer the channel enforces against the DoIP
    /// header's declared payload length
    pub rx_buffer_size: u16,
    /// Maximum time to wait for an ack or initial response
    pub p2_client_max_ms: u16,
    /// Maximum time to wait between response-pending frames
    pub p2_star_client_max_ms: u16,
    /// Remote DoIP server IP address or hostname
    pub remote_tcp_address: String,
    /// Remote DoIP TCP port
    pub remote_tcp_port: u16,
    /// Parsed, but never acted upon: TLS integration is out of scope for
    /// this core (see design notes)
    pub tls_handling: bool,
    /// Optional cap on consecutive response-pending frames before giving
    /// up with [`crate::error::DiagClientError::ResponseTimeout`].
    /// `None` (the default) means unlimited, per ISO 14229's silence on an
    /// upper bound.
    pub max_response_pending: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Top level client configuration, parsed once from the JSON config file
pub struct ClientConfig {
    /// Local address the discovery UDP sockets bind to
    pub udp_ip_address: String,
    /// Broadcast address vehicle identification requests are sent to
    pub udp_broadcast_address: String,
    /// Conversations by name
    pub conversations: HashMap<String, ConversationConfig>,
}

impl ClientConfig {
    /// Loads and validates a configuration file from `path`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&text)
    }

    /// Parses and validates configuration JSON already held in memory
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawClientConfig = serde_json::from_str(text)?;

        if raw.conversation.conversation_property.len() != raw.conversation.number_of_conversation as usize {
            log::warn!(
                "NumberOfConversation ({}) does not match ConversationProperty length ({}); using the list as authoritative",
                raw.conversation.number_of_conversation,
                raw.conversation.conversation_property.len()
            );
        }
        if raw.conversation.conversation_property.is_empty() {
            return Err(ConfigError::Invalid("Conversation.ConversationProperty is empty".into()));
        }

        let mut conversations = HashMap::with_capacity(raw.conversation.conversation_property.len());
        for prop in raw.conversation.conversation_property {
            if prop.p2_star_client_max < prop.p2_client_max {
                return Err(ConfigError::Invalid(format!(
                    "conversation '{}': P2StarClientMax ({}) must be >= P2ClientMax ({})",
                    prop.conversation_name, prop.p2_star_client_max, prop.p2_client_max
                )));
            }
            if conversations.contains_key(&prop.conversation_name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate conversation name '{}'",
                    prop.conversation_name
                )));
            }
            let (remote_tcp_address, remote_tcp_port) = split_host_port(&prop.network.tcp_ip_address);
            conversations.insert(
                prop.conversation_name.clone(),
                ConversationConfig {
                    name: prop.conversation_name,
                    client_logical_address: prop.source_address,
                    rx_buffer_size: prop.rx_buffer_size,
                    p2_client_max_ms: prop.p2_client_max,
                    p2_star_client_max_ms: prop.p2_star_client_max,
                    remote_tcp_address,
                    remote_tcp_port,
                    tls_handling: prop.network.tls_handling,
                    max_response_pending: None,
                },
            );
        }

        Ok(ClientConfig {
            udp_ip_address: raw.udp_ip_address,
            udp_broadcast_address: raw.udp_broadcast_address,
            conversations,
        })
    }
}

/// Splits an optional `"host:port"` address into its parts, defaulting the
/// port to [`DEFAULT_DOIP_PORT`] when absent (the JSON schema's
/// `TcpIpAddress` is usually a bare host).
fn split_host_port(address: &str) -> (String, u16) {
    match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            match port.parse::<u16>() {
                Ok(p) => (host.to_string(), p),
                Err(_) => (address.to_string(), DEFAULT_DOIP_PORT),
            }
        }
        _ => (address.to_string(), DEFAULT_DOIP_PORT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    {
        "UdpIpAddress": "172.16.25.128",
        "UdpBroadcastAddress": "172.16.25.255",
        "Conversation": {
            "NumberOfConversation": 1,
            "ConversationProperty": [
                {
                    "ConversationName": "DiagTester",
                    "P2ClientMax": 5000,
                    "P2StarClientMax": 5000,
                    "RxBufferSize": 500,
                    "SourceAddress": 3584,
                    "Network": {
                        "TcpIpAddress": "172.16.25.138",
                        "TlsHandling": false
                    },
                    "UnrecognizedExtraKey": "ignored"
                }
            ]
        }
    }"#;

    #[test]
    fn parses_minimal_valid_config() {
        let cfg = ClientConfig::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.udp_ip_address, "172.16.25.128");
        let conv = cfg.conversations.get("DiagTester").unwrap();
        assert_eq!(conv.client_logical_address, 3584);
        assert_eq!(conv.remote_tcp_address, "172.16.25.138");
        assert_eq!(conv.remote_tcp_port, DEFAULT_DOIP_PORT);
        assert!(!conv.tls_handling);
    }

    #[test]
    fn rejects_p2_star_less_than_p2() {
        let bad = SAMPLE.replace("\"P2StarClientMax\": 5000", "\"P2StarClientMax\": 10");
        let err = ClientConfig::from_str(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_missing_required_key() {
        let bad = SAMPLE.replace("\"SourceAddress\": 3584,", "");
        let err = ClientConfig::from_str(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("10.0.0.5"), ("10.0.0.5".to_string(), DEFAULT_DOIP_PORT));
        assert_eq!(split_host_port("10.0.0.5:13400"), ("10.0.0.5".to_string(), 13400));
    }
}
