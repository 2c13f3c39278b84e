//! Typed DoIP payload bodies
//!
//! Each payload type carried inside a [`super::frame::DoipHeader`] has its
//! own fixed or semi-fixed layout. The functions here convert between that
//! wire layout and a small typed struct; none of them touch a socket.

use super::frame::{FrameError, FrameResult};

const VIN_LEN: usize = 17;
const EID_LEN: usize = 6;
const GID_LEN: usize = 6;

fn read_addr(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// Body of a routing activation request (ISO 13400-2 Table 24)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingActivationRequest {
    /// Client logical address requesting activation
    pub source_address: u16,
    /// Activation type; `0x00` is the default activation used by this client
    pub activation_type: u8,
}

impl RoutingActivationRequest {
    /// Encodes the body (source address, activation type, 4 reserved zero bytes)
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(7);
        body.extend_from_slice(&self.source_address.to_be_bytes());
        body.push(self.activation_type);
        body.extend_from_slice(&[0u8; 4]);
        body
    }
}

/// Routing activation response code (ISO 13400-2 Table 26)
pub mod routing_activation_code {
    /// Routing successfully activated
    pub const SUCCESS: u8 = 0x10;
    /// Unknown source address
    pub const UNKNOWN_SOURCE_ADDRESS: u8 = 0x00;
    /// All concurrently supported TCP sockets registered and active
    pub const ALL_SOCKETS_REGISTERED: u8 = 0x02;
    /// Missing authentication
    pub const AUTHENTICATION_MISSING: u8 = 0x06;
    /// Confirmation rejected
    pub const CONFIRMATION_REJECTED: u8 = 0x07;
}

/// Body of a routing activation response (ISO 13400-2 Table 25)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingActivationResponse {
    /// Logical address of the client that requested activation
    pub client_address: u16,
    /// Logical address of the activated server entity
    pub server_address: u16,
    /// Response code, see [`routing_activation_code`]
    pub response_code: u8,
}

impl RoutingActivationResponse {
    /// Decodes a routing activation response body
    pub fn decode(body: &[u8]) -> FrameResult<Self> {
        if body.len() < 9 {
            return Err(FrameError::MalformedPayload("routing activation response too short"));
        }
        Ok(Self {
            client_address: read_addr(&body[0..2]),
            server_address: read_addr(&body[2..4]),
            response_code: body[4],
        })
    }

    /// `true` iff the response code is [`routing_activation_code::SUCCESS`]
    pub fn is_success(&self) -> bool {
        self.response_code == routing_activation_code::SUCCESS
    }
}

/// Body of a DoIP diagnostic message (ISO 13400-2 Table 29): source and
/// target logical address followed by the opaque UDS `A_Data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    /// Address of the sender
    pub source_address: u16,
    /// Address of the intended recipient
    pub target_address: u16,
    /// Opaque UDS payload (`A_Data`)
    pub user_data: Vec<u8>,
}

impl DiagnosticMessage {
    /// Encodes source, target and payload into a diagnostic message body
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(4 + self.user_data.len());
        body.extend_from_slice(&self.source_address.to_be_bytes());
        body.extend_from_slice(&self.target_address.to_be_bytes());
        body.extend_from_slice(&self.user_data);
        body
    }

    /// Decodes a diagnostic message body
    pub fn decode(body: &[u8]) -> FrameResult<Self> {
        if body.len() < 4 {
            return Err(FrameError::MalformedPayload("diagnostic message too short"));
        }
        Ok(Self {
            source_address: read_addr(&body[0..2]),
            target_address: read_addr(&body[2..4]),
            user_data: body[4..].to_vec(),
        })
    }

    /// `true` iff `user_data` is a negative response of the form
    /// `0x7F <echoed SID> 0x78` ("requestCorrectlyReceived-ResponsePending")
    pub fn is_response_pending(&self) -> bool {
        matches!(self.user_data.as_slice(), [0x7F, _, 0x78, ..])
    }
}

/// Diagnostic message ack code (ISO 13400-2 Table 31/33)
pub mod diag_ack_code {
    /// Positive acknowledgement
    pub const POSITIVE: u8 = 0x00;
    /// Negative: invalid source address
    pub const INVALID_SOURCE_ADDRESS: u8 = 0x02;
    /// Negative: unknown target address
    pub const UNKNOWN_TARGET_ADDRESS: u8 = 0x03;
    /// Negative: message too large
    pub const MESSAGE_TOO_LARGE: u8 = 0x04;
    /// Negative: out of memory
    pub const OUT_OF_MEMORY: u8 = 0x05;
    /// Negative: target unreachable
    pub const TARGET_UNREACHABLE: u8 = 0x06;
    /// Negative: unknown network
    pub const UNKNOWN_NETWORK: u8 = 0x07;
    /// Negative: transport protocol error
    pub const TRANSPORT_PROTOCOL_ERROR: u8 = 0x08;
}

/// Body of a diagnostic message ack (positive or negative); source, target,
/// ack/nack code, then an optional echo of the previous message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessageAck {
    /// Address of the sender of the ack (the server)
    pub source_address: u16,
    /// Address of the recipient (the client)
    pub target_address: u16,
    /// Ack code; `0x00` for a positive ack, see [`diag_ack_code`] otherwise
    pub ack_code: u8,
}

impl DiagnosticMessageAck {
    /// Decodes a diagnostic message ack body (the echoed previous message,
    /// if present, is not needed by the core and is discarded)
    pub fn decode(body: &[u8]) -> FrameResult<Self> {
        if body.len() < 5 {
            return Err(FrameError::MalformedPayload("diagnostic message ack too short"));
        }
        Ok(Self {
            source_address: read_addr(&body[0..2]),
            target_address: read_addr(&body[2..4]),
            ack_code: body[4],
        })
    }
}

/// Vehicle identification preselection criteria
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VehicleIdentificationRequest {
    /// No preselection: every reachable DoIP entity responds
    None,
    /// Only the entity matching this VIN responds
    Vin([u8; VIN_LEN]),
    /// Only the entity matching this EID responds
    Eid([u8; EID_LEN]),
}

impl VehicleIdentificationRequest {
    /// Encodes the request into its DoIP payload type and body
    pub fn encode(&self) -> (super::frame::PayloadType, Vec<u8>) {
        use super::frame::PayloadType;
        match self {
            VehicleIdentificationRequest::None => (PayloadType::VehicleIdentificationRequest, Vec::new()),
            VehicleIdentificationRequest::Vin(vin) => {
                (PayloadType::VehicleIdentificationRequestVin, vin.to_vec())
            }
            VehicleIdentificationRequest::Eid(eid) => {
                (PayloadType::VehicleIdentificationRequestEid, eid.to_vec())
            }
        }
    }
}

/// Parses an EID/GID/MAC style `"XX:XX:XX:XX:XX:XX"` hex string into 6 bytes.
pub fn parse_hex_id6(text: &str) -> FrameResult<[u8; 6]> {
    let mut out = [0u8; 6];
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 6 {
        return Err(FrameError::MalformedPayload("EID must be 6 colon-separated hex octets"));
    }
    for (slot, part) in out.iter_mut().zip(parts.iter()) {
        *slot = u8::from_str_radix(part, 16)
            .map_err(|_| FrameError::MalformedPayload("EID contains non-hex octet"))?;
    }
    Ok(out)
}

/// A decoded vehicle announcement (ISO 13400-2 Table 8), keyed by the source
/// IP it arrived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleAnnouncement {
    /// Source IP address the UDP datagram arrived from
    pub source_ip: std::net::IpAddr,
    /// 17 character ASCII VIN
    pub vin: [u8; VIN_LEN],
    /// Logical address of the entity that announced itself
    pub logical_address: u16,
    /// Entity ID (typically a MAC address)
    pub eid: [u8; EID_LEN],
    /// Group ID (shared by entities behind the same gateway)
    pub gid: [u8; GID_LEN],
    /// Further-action-required byte
    pub further_action: u8,
    /// Optional VIN/GID synchronization status (only present for 33 byte bodies)
    pub sync_status: Option<u8>,
}

impl VehicleAnnouncement {
    /// Decodes a vehicle announcement body (32 bytes, or 33 with sync status)
    pub fn decode(source_ip: std::net::IpAddr, body: &[u8]) -> FrameResult<Self> {
        if body.len() != 32 && body.len() != 33 {
            return Err(FrameError::MalformedPayload("vehicle announcement must be 32 or 33 bytes"));
        }
        let mut vin = [0u8; VIN_LEN];
        vin.copy_from_slice(&body[0..17]);
        let logical_address = read_addr(&body[17..19]);
        let mut eid = [0u8; EID_LEN];
        eid.copy_from_slice(&body[19..25]);
        let mut gid = [0u8; GID_LEN];
        gid.copy_from_slice(&body[25..31]);
        let further_action = body[31];
        let sync_status = body.get(32).copied();
        Ok(Self {
            source_ip,
            vin,
            logical_address,
            eid,
            gid,
            further_action,
            sync_status,
        })
    }

    /// VIN as a lossy ASCII string, for display/logging
    pub fn vin_string(&self) -> String {
        String::from_utf8_lossy(&self.vin).into_owned()
    }

    /// Dedup key: announcements from the same IP and logical address are
    /// the same vehicle entity.
    pub fn dedup_key(&self) -> (std::net::IpAddr, u16) {
        (self.source_ip, self.logical_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doip::frame::PayloadType;

    #[test]
    fn routing_activation_request_encodes_seven_bytes() {
        let req = RoutingActivationRequest {
            source_address: 0x0E00,
            activation_type: 0x00,
        };
        assert_eq!(req.encode(), vec![0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn routing_activation_response_decodes_success() {
        let body = [0x0Eu8, 0x00, 0xFA, 0x25, 0x10, 0x00, 0x00, 0x00, 0x00];
        let resp = RoutingActivationResponse::decode(&body).unwrap();
        assert_eq!(resp.client_address, 0x0E00);
        assert_eq!(resp.server_address, 0xFA25);
        assert!(resp.is_success());
    }

    #[test]
    fn diagnostic_message_round_trip() {
        let msg = DiagnosticMessage {
            source_address: 0x0E00,
            target_address: 0xFA25,
            user_data: vec![0x22, 0xF1, 0x90],
        };
        let encoded = msg.encode();
        let decoded = DiagnosticMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn detects_response_pending_pattern() {
        let msg = DiagnosticMessage {
            source_address: 0xFA25,
            target_address: 0x0E00,
            user_data: vec![0x7F, 0x22, 0x78],
        };
        assert!(msg.is_response_pending());

        let final_resp = DiagnosticMessage {
            source_address: 0xFA25,
            target_address: 0x0E00,
            user_data: vec![0x62, 0xF1, 0x90, 0x01],
        };
        assert!(!final_resp.is_response_pending());
    }

    #[test]
    fn parses_colon_hex_eid() {
        assert_eq!(
            parse_hex_id6("00:02:36:31:00:1C").unwrap(),
            [0x00, 0x02, 0x36, 0x31, 0x00, 0x1C]
        );
        assert!(parse_hex_id6("00:02:36").is_err());
    }

    #[test]
    fn vehicle_announcement_decode_without_sync_status() {
        let mut body = Vec::new();
        body.extend_from_slice(b"ABCDEFGH123456789");
        body.extend_from_slice(&[0xFA, 0x25]);
        body.extend_from_slice(&[0x00, 0x02, 0x36, 0x31, 0x00, 0x1C]);
        body.extend_from_slice(&[0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F]);
        body.push(0x00);
        assert_eq!(body.len(), 32);

        let ip: std::net::IpAddr = "10.0.0.5".parse().unwrap();
        let ann = VehicleAnnouncement::decode(ip, &body).unwrap();
        assert_eq!(ann.vin_string(), "ABCDEFGH123456789");
        assert_eq!(ann.logical_address, 0xFA25);
        assert_eq!(ann.sync_status, None);
        assert_eq!(ann.dedup_key(), (ip, 0xFA25));
    }

    #[test]
    fn vehicle_identification_request_encodes_payload_type() {
        let (ty, body) = VehicleIdentificationRequest::None.encode();
        assert_eq!(ty, PayloadType::VehicleIdentificationRequest);
        assert!(body.is_empty());

        let (ty, body) = VehicleIdentificationRequest::Eid([1, 2, 3, 4, 5, 6]).encode();
        assert_eq!(ty, PayloadType::VehicleIdentificationRequestEid);
        assert_eq!(body, vec![1, 2, 3, 4, 5, 6]);
    }
}
