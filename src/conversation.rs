//! User-facing conversation object
//!
//! A [`Conversation`] binds one named [`ConversationConfig`] to one
//! [`TcpChannel`], and offers the synchronous `Connect` / `Disconnect` /
//! `SendDiagnosticRequest` operations a caller actually uses. It does not
//! own a socket directly; the channel does.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ConversationConfig;
use crate::error::{DiagClientError, DiagClientResult};
use crate::message::UdsMessage;
use crate::tcp_channel::TcpChannel;
use crate::transport::TcpSocketProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Whether a conversation's diagnostic channel is usable right now
pub enum ActivityStatus {
    /// Routing-activated; `SendDiagnosticRequest` will reach the network
    Active,
    /// Not connected, or the diagnostic sub-machine hit a terminal failure;
    /// `SendDiagnosticRequest` fails fast with `NotActivated`
    Inactive,
}

/// One named diagnostic conversation with a remote DoIP server
pub struct Conversation {
    config: ConversationConfig,
    channel: Arc<TcpChannel>,
    active: AtomicBool,
}

impl Conversation {
    /// Constructs a conversation bound to `config`. The underlying channel
    /// is created but no socket is opened until [`Conversation::connect_to_diag_server`].
    pub fn new(config: ConversationConfig) -> Self {
        let channel = TcpChannel::new(config.clone());
        Self::from_channel(config, channel)
    }

    /// Constructs a conversation around a channel already built by a
    /// [`crate::handler::DoipTransportHandler`] (the path
    /// [`crate::client::DiagnosticClient`] uses, so every conversation's
    /// channel is tagged with that handler's correlation id).
    pub fn from_channel(config: ConversationConfig, channel: TcpChannel) -> Self {
        Self {
            config,
            channel: Arc::new(channel),
            active: AtomicBool::new(false),
        }
    }

    /// The conversation's configured name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current activity status
    pub fn status(&self) -> ActivityStatus {
        if self.active.load(Ordering::SeqCst) {
            ActivityStatus::Active
        } else {
            ActivityStatus::Inactive
        }
    }

    /// Idempotent no-op lifecycle hook; kept for symmetry with `shutdown`
    /// as a `Startup`/`Shutdown` pair. Opening the socket happens in
    /// `connect_to_diag_server`, not here.
    pub fn startup(&self) {}

    /// Opens the TCP channel to `host_ip` and performs routing activation
    /// using this conversation's configured client logical address.
    /// Returns `AlreadyConnected` if already `Active`.
    pub fn connect_to_diag_server(&self, provider: &dyn TcpSocketProvider, host_ip: IpAddr) -> DiagClientResult<()> {
        if self.active.load(Ordering::SeqCst) {
            return Err(DiagClientError::AlreadyConnected);
        }
        let _ = host_ip; // the remote address is taken from ConversationConfig; host_ip is validated by the caller's transport lookup
        match self.channel.connect(provider, self.config.client_logical_address) {
            Ok(()) => {
                self.active.store(true, Ordering::SeqCst);
                log::debug!("conversation[{}]: now Active", self.config.name);
                Ok(())
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Closes the TCP channel. Idempotent; always succeeds.
    pub fn disconnect_from_diag_server(&self) -> DiagClientResult<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.channel.disconnect();
        log::debug!("conversation[{}]: disconnected, now Inactive", self.config.name);
        Ok(())
    }

    /// Sends a UDS request and blocks for the final response. Fails fast
    /// with `NotActivated` (no network I/O) if the conversation is not
    /// `Active`. A terminal diagnostic failure deactivates the conversation;
    /// an ack timeout does not, since the caller may retry it.
    pub fn send_diagnostic_request(&self, msg: &UdsMessage) -> DiagClientResult<Vec<u8>> {
        if self.status() != ActivityStatus::Active {
            return Err(DiagClientError::NotActivated);
        }
        let result = self.channel.send_diagnostic_request(msg);
        if matches!(
            &result,
            Err(DiagClientError::SocketError(_)) | Err(DiagClientError::TransmitFailed(_))
        ) {
            self.active.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Idempotent shutdown; disconnecting first then shutting down is a
    /// no-op on the second call.
    pub fn shutdown(&self) -> DiagClientResult<()> {
        self.disconnect_from_diag_server()
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("name", &self.config.name)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doip::{
        diag_ack_code, encode_frame, routing_activation_code, DiagnosticMessage, DiagnosticMessageAck, PayloadType,
        RoutingActivationResponse,
    };
    use crate::transport::{ClientTcpSocket, StdTcpSocket};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};

    fn test_config(port: u16) -> ConversationConfig {
        ConversationConfig {
            name: "DiagTester".into(),
            client_logical_address: 0x0E00,
            rx_buffer_size: 4096,
            p2_client_max_ms: 200,
            p2_star_client_max_ms: 500,
            remote_tcp_address: "127.0.0.1".into(),
            remote_tcp_port: port,
            tls_handling: false,
            max_response_pending: None,
        }
    }

    struct StdProvider;
    impl TcpSocketProvider for StdProvider {
        fn connect(&self, addr: std::net::SocketAddr) -> std::io::Result<Box<dyn ClientTcpSocket>> {
            Ok(Box::new(StdTcpSocket::from_stream(TcpStream::connect(addr)?)))
        }
    }

    #[test]
    fn not_activated_rejects_send_without_touching_network() {
        let conv = Conversation::new(test_config(0));
        assert_eq!(conv.status(), ActivityStatus::Inactive);
        let msg = UdsMessage::new(0x0E00, 0xFA25, "127.0.0.1".parse().unwrap(), vec![0x22, 0xF1, 0x90]);
        let err = conv.send_diagnostic_request(&msg).unwrap_err();
        assert!(matches!(err, DiagClientError::NotActivated));
    }

    #[test]
    fn connect_activates_and_disconnect_deactivates() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut header = [0u8; 8];
            stream.read_exact(&mut header).unwrap();
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).unwrap();

            let resp = RoutingActivationResponse {
                client_address: 0x0E00,
                server_address: 0xFA25,
                response_code: routing_activation_code::SUCCESS,
            };
            let mut resp_body = Vec::new();
            resp_body.extend_from_slice(&resp.client_address.to_be_bytes());
            resp_body.extend_from_slice(&resp.server_address.to_be_bytes());
            resp_body.push(resp.response_code);
            resp_body.extend_from_slice(&[0u8; 4]);
            stream
                .write_all(&encode_frame(PayloadType::RoutingActivationResponse, &resp_body))
                .unwrap();
            stream
        });

        let conv = Conversation::new(test_config(port));
        conv.connect_to_diag_server(&StdProvider, "127.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(conv.status(), ActivityStatus::Active);

        let _stream = server.join().unwrap();
        conv.disconnect_from_diag_server().unwrap();
        assert_eq!(conv.status(), ActivityStatus::Inactive);
    }

    #[test]
    fn full_request_response_cycle_through_conversation() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();

            let mut header = [0u8; 8];
            stream.read_exact(&mut header).unwrap();
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).unwrap();

            let resp = RoutingActivationResponse {
                client_address: 0x0E00,
                server_address: 0xFA25,
                response_code: routing_activation_code::SUCCESS,
            };
            let mut resp_body = Vec::new();
            resp_body.extend_from_slice(&resp.client_address.to_be_bytes());
            resp_body.extend_from_slice(&resp.server_address.to_be_bytes());
            resp_body.push(resp.response_code);
            resp_body.extend_from_slice(&[0u8; 4]);
            stream
                .write_all(&encode_frame(PayloadType::RoutingActivationResponse, &resp_body))
                .unwrap();

            let mut header = [0u8; 8];
            stream.read_exact(&mut header).unwrap();
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).unwrap();
            let req = DiagnosticMessage::decode(&body).unwrap();
            assert_eq!(req.user_data, vec![0x22, 0xF1, 0x90]);

            let ack = DiagnosticMessageAck {
                source_address: 0xFA25,
                target_address: 0x0E00,
                ack_code: diag_ack_code::POSITIVE,
            };
            let mut ack_body = Vec::new();
            ack_body.extend_from_slice(&ack.source_address.to_be_bytes());
            ack_body.extend_from_slice(&ack.target_address.to_be_bytes());
            ack_body.push(ack.ack_code);
            stream
                .write_all(&encode_frame(PayloadType::DiagnosticMessagePosAck, &ack_body))
                .unwrap();

            let final_resp = DiagnosticMessage {
                source_address: 0xFA25,
                target_address: 0x0E00,
                user_data: vec![0x62, 0xF1, 0x90, 0x01],
            };
            stream
                .write_all(&encode_frame(PayloadType::DiagnosticMessage, &final_resp.encode()))
                .unwrap();
        });

        let conv = Conversation::new(test_config(port));
        conv.connect_to_diag_server(&StdProvider, "127.0.0.1".parse().unwrap()).unwrap();

        let msg = UdsMessage::new(0x0E00, 0xFA25, "127.0.0.1".parse().unwrap(), vec![0x22, 0xF1, 0x90]);
        let response = conv.send_diagnostic_request(&msg).unwrap();
        assert_eq!(response, vec![0x62, 0xF1, 0x90, 0x01]);

        server.join().unwrap();
    }
}
