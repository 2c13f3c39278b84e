//! Generic DoIP header codec
//!
//! Layout (big-endian), ISO 13400-2 Table 2:
//!
//! | Offset | Bytes | Field |
//! |---|---|---|
//! | 0 | 1 | Protocol version |
//! | 1 | 1 | Bitwise inverse of protocol version |
//! | 2 | 2 | Payload type |
//! | 4 | 4 | Payload length (bytes following the header) |

use strum_macros::{EnumIter, FromRepr};

/// Size in bytes of the generic DoIP header
pub const HEADER_LEN: usize = 8;

/// Protocol version emitted by this client. ISO 13400-2:2019 compatible.
pub const PROTOCOL_VERSION: u8 = 0x03;

/// Codec result
pub type FrameResult<T> = Result<T, FrameError>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Error produced while decoding a DoIP frame
pub enum FrameError {
    /// Fewer than [`HEADER_LEN`] bytes were available
    TooShort,
    /// The inverse-version byte did not match `!protocol_version`
    InverseVersionMismatch { version: u8, inverse: u8 },
    /// The payload type is not one supported by this client
    UnknownPayloadType(u16),
    /// The declared payload length did not match the bytes actually present
    LengthMismatch { declared: u32, actual: usize },
    /// The declared payload length exceeds the channel's configured receive
    /// buffer size
    PayloadTooLarge { declared: u32, max: u32 },
    /// A typed payload body was the wrong size for its type (e.g. a vehicle
    /// announcement that isn't 32 or 33 bytes)
    MalformedPayload(&'static str),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooShort => write!(f, "frame shorter than the 8 byte generic header"),
            FrameError::InverseVersionMismatch { version, inverse } => write!(
                f,
                "inverse version byte 0x{inverse:02X} does not match !0x{version:02X}"
            ),
            FrameError::UnknownPayloadType(t) => write!(f, "unknown DoIP payload type 0x{t:04X}"),
            FrameError::LengthMismatch { declared, actual } => write!(
                f,
                "declared payload length {declared} does not match {actual} bytes present"
            ),
            FrameError::PayloadTooLarge { declared, max } => write!(
                f,
                "declared payload length {declared} exceeds configured receive buffer {max}"
            ),
            FrameError::MalformedPayload(what) => write!(f, "malformed payload: {what}"),
        }
    }
}

impl std::error::Error for FrameError {}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, EnumIter)]
#[repr(u16)]
/// DoIP payload types used by the client core (ISO 13400-2 Table 3, core subset)
pub enum PayloadType {
    /// Generic DoIP header negative acknowledge, sent by this client when a
    /// received header fails to decode (ISO 13400-2 Table 4)
    GenericHeaderNegativeAck = 0x0000,
    /// Vehicle identification request, no preselection criteria (UDP, C->S)
    VehicleIdentificationRequest = 0x0001,
    /// Vehicle identification request with EID (UDP, C->S)
    VehicleIdentificationRequestEid = 0x0002,
    /// Vehicle identification request with VIN (UDP, C->S)
    VehicleIdentificationRequestVin = 0x0003,
    /// Vehicle announcement / identification response (UDP, S->C)
    VehicleAnnouncement = 0x0004,
    /// Routing activation request (TCP, C->S)
    RoutingActivationRequest = 0x0005,
    /// Routing activation response (TCP, S->C)
    RoutingActivationResponse = 0x0006,
    /// Diagnostic message (TCP, bidirectional)
    DiagnosticMessage = 0x8001,
    /// Diagnostic message positive acknowledgement (TCP, S->C)
    DiagnosticMessagePosAck = 0x8002,
    /// Diagnostic message negative acknowledgement (TCP, S->C)
    DiagnosticMessageNegAck = 0x8003,
}

impl PayloadType {
    /// Looks up a payload type by its raw wire value
    pub fn from_u16(raw: u16) -> FrameResult<Self> {
        Self::from_repr(raw).ok_or(FrameError::UnknownPayloadType(raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A decoded generic header plus its raw payload bytes
pub struct DoipHeader {
    /// Protocol version byte as received
    pub protocol_version: u8,
    /// Decoded payload type
    pub payload_type: PayloadType,
    /// Raw payload bytes (length equal to the declared payload length)
    pub payload: Vec<u8>,
}

/// Decodes a generic DoIP header plus payload from `bytes`.
///
/// `bytes` must contain at least [`HEADER_LEN`] + the declared payload
/// length. `max_payload_len`, when given, enforces the channel's configured
/// receive buffer size (`RxBufferSize`); pass `u32::MAX` to disable the
/// check (used for UDP, which has no configured buffer).
pub fn decode_header(bytes: &[u8], max_payload_len: u32) -> FrameResult<DoipHeader> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::TooShort);
    }
    let version = bytes[0];
    let inverse = bytes[1];
    if inverse != !version {
        return Err(FrameError::InverseVersionMismatch { version, inverse });
    }
    let raw_type = u16::from_be_bytes([bytes[2], bytes[3]]);
    let payload_type = PayloadType::from_u16(raw_type)?;
    let declared_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if declared_len > max_payload_len {
        return Err(FrameError::PayloadTooLarge {
            declared: declared_len,
            max: max_payload_len,
        });
    }
    let body = &bytes[HEADER_LEN..];
    if body.len() != declared_len as usize {
        return Err(FrameError::LengthMismatch {
            declared: declared_len,
            actual: body.len(),
        });
    }
    Ok(DoipHeader {
        protocol_version: version,
        payload_type,
        payload: body.to_vec(),
    })
}

#[derive(Debug, Copy, Clone)]
/// The fixed-size prefix of a DoIP frame, decoded before the variable-length
/// body has necessarily been read off the wire. Used by the TCP channel's
/// reader thread, which must read exactly 8 bytes, validate them, and only
/// then know how many further bytes to read for the body.
pub struct HeaderPrefix {
    /// Protocol version byte as received
    pub protocol_version: u8,
    /// Raw payload type, not yet checked against [`PayloadType`]
    pub payload_type_raw: u16,
    /// Declared payload length, in bytes, following the header
    pub payload_length: u32,
}

/// Validates and parses the first 8 bytes of a frame, without yet requiring
/// the body to be available. Checks version/inverse consistency only;
/// payload type membership and length bounds are the caller's concern once
/// it has decided how many more bytes to read.
pub fn decode_header_prefix(bytes: &[u8; HEADER_LEN]) -> FrameResult<HeaderPrefix> {
    let version = bytes[0];
    let inverse = bytes[1];
    if inverse != !version {
        return Err(FrameError::InverseVersionMismatch { version, inverse });
    }
    Ok(HeaderPrefix {
        protocol_version: version,
        payload_type_raw: u16::from_be_bytes([bytes[2], bytes[3]]),
        payload_length: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
    })
}

/// Encodes a generic header + payload body into a single frame buffer.
pub fn encode_frame(payload_type: PayloadType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.push(PROTOCOL_VERSION);
    out.push(!PROTOCOL_VERSION);
    out.extend_from_slice(&(payload_type as u16).to_be_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip_for_accepted_versions() {
        for version in [0x02u8, 0x03u8] {
            let mut frame = Vec::new();
            frame.push(version);
            frame.push(!version);
            frame.extend_from_slice(&(PayloadType::RoutingActivationRequest as u16).to_be_bytes());
            let body = [0xAAu8; 4];
            frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
            frame.extend_from_slice(&body);

            let decoded = decode_header(&frame, u32::MAX).unwrap();
            assert_eq!(decoded.protocol_version, version);
            assert_eq!(decoded.payload_type, PayloadType::RoutingActivationRequest);
            assert_eq!(decoded.payload, body);
        }
    }

    #[test]
    fn payload_framing_round_trip() {
        for len in [0usize, 1, 7, 8, 9, 255] {
            let body: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let frame = encode_frame(PayloadType::DiagnosticMessage, &body);
            let decoded = decode_header(&frame, u32::MAX).unwrap();
            assert_eq!(decoded.payload_type, PayloadType::DiagnosticMessage);
            assert_eq!(decoded.payload, body);
        }
    }

    #[test]
    fn rejects_short_buffers() {
        assert_eq!(decode_header(&[0x03, 0xFC, 0x00], u32::MAX), Err(FrameError::TooShort));
    }

    #[test]
    fn rejects_inverse_mismatch() {
        let mut frame = encode_frame(PayloadType::DiagnosticMessage, &[]);
        frame[1] = 0x00;
        assert_eq!(
            decode_header(&frame, u32::MAX),
            Err(FrameError::InverseVersionMismatch {
                version: 0x03,
                inverse: 0x00
            })
        );
    }

    #[test]
    fn rejects_unknown_payload_type() {
        let mut frame = encode_frame(PayloadType::DiagnosticMessage, &[]);
        frame[2] = 0x00;
        frame[3] = 0x07;
        assert_eq!(decode_header(&frame, u32::MAX), Err(FrameError::UnknownPayloadType(0x0007)));
    }

    #[test]
    fn header_prefix_parses_length_before_body_is_known() {
        let header = [0x03u8, 0xFC, 0x80, 0x01, 0x00, 0x00, 0x00, 0x07];
        let prefix = decode_header_prefix(&header).unwrap();
        assert_eq!(prefix.protocol_version, 0x03);
        assert_eq!(prefix.payload_type_raw, 0x8001);
        assert_eq!(prefix.payload_length, 7);
    }

    #[test]
    fn enforces_configured_rx_buffer() {
        let frame = encode_frame(PayloadType::DiagnosticMessage, &[0u8; 16]);
        assert_eq!(
            decode_header(&frame, 8),
            Err(FrameError::PayloadTooLarge { declared: 16, max: 8 })
        );
    }
}
