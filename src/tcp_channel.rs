//! TCP channel: routing activation and diagnostic message state machines
//!
//! One [`TcpChannel`] owns a single TCP connection to a DoIP server on
//! behalf of one conversation. A background reader thread (spawned in
//! [`TcpChannel::connect`]) decodes frames off the socket and
//! drops them into a shared event slot; the calling thread blocks on a
//! [`SyncTimer`] for that slot to be filled rather than polling it, which
//! keeps `connect`/`send_diagnostic_request` synchronous from the caller's
//! point of view.
//!
//! Only one request may be outstanding at a time per channel: the reader
//! thread has exactly one slot per sub-state-machine, so a second
//! concurrent `send_diagnostic_request` is rejected with
//! [`DiagClientError::RequestInFlight`] rather than silently interleaved.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{ConversationConfig, DEFAULT_ACTIVATION_TIMEOUT_MS};
use crate::doip::{
    decode_header_prefix, diag_ack_code, encode_frame, routing_activation_code, DiagnosticMessage,
    DiagnosticMessageAck, FrameError, PayloadType, RoutingActivationRequest, RoutingActivationResponse, HEADER_LEN,
};
use crate::error::{DiagClientError, DiagClientResult};
use crate::message::UdsMessage;
use crate::timer::SyncTimer;
use crate::transport::{ClientTcpSocket, TcpSocketProvider};

/// Default activation type used by this client (ISO 13400-2 Table 18):
/// "default activation without authentication"
const DEFAULT_ACTIVATION_TYPE: u8 = 0x00;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RoutingState {
    NotActivated,
    Pending,
    Activated,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DiagState {
    Idle,
    AwaitingAck,
    AwaitingResponse,
}

/// Outcome of a routing activation attempt, handed from the reader thread
/// to the blocked caller
#[derive(Debug, Clone, Copy)]
enum ActivationEvent {
    Accepted { server_address: u16 },
    Refused { response_code: u8 },
    SocketClosed,
}

/// Outcome of one step of the diagnostic message sub-state machine
#[derive(Debug, Clone)]
enum DiagEvent {
    Ack { code: u8 },
    Response(DiagnosticMessage),
    SocketClosed,
}

struct Shared {
    routing_state: Mutex<RoutingState>,
    diag_state: Mutex<DiagState>,
    activation_timer: SyncTimer<ActivationEvent>,
    diag_timer: SyncTimer<DiagEvent>,
    running: AtomicBool,
    writer: Mutex<Option<Box<dyn ClientTcpSocket>>>,
    config: ConversationConfig,
}

/// A per-conversation TCP channel to a DoIP server
pub struct TcpChannel {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl TcpChannel {
    /// Creates a channel bound to `config`; no socket is opened until
    /// [`TcpChannel::connect`] is called.
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                routing_state: Mutex::new(RoutingState::NotActivated),
                diag_state: Mutex::new(DiagState::Idle),
                activation_timer: SyncTimer::new(),
                diag_timer: SyncTimer::new(),
                running: AtomicBool::new(false),
                writer: Mutex::new(None),
                config,
            }),
            reader: Mutex::new(None),
        }
    }

    /// `true` once routing activation has succeeded
    pub fn is_active(&self) -> bool {
        *self.shared.routing_state.lock().unwrap_or_else(|e| e.into_inner()) == RoutingState::Activated
    }

    /// Opens the TCP connection, spawns the reader thread, and performs
    /// routing activation. Idempotent: calling `connect` again while
    /// already activated returns [`DiagClientError::AlreadyConnected`].
    pub fn connect(&self, provider: &dyn TcpSocketProvider, source_address: u16) -> DiagClientResult<()> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(DiagClientError::AlreadyConnected);
        }

        let addr = crate::transport::resolve_addr(
            &self.shared.config.remote_tcp_address,
            self.shared.config.remote_tcp_port,
        )
        .map_err(DiagClientError::ConnectionFailed)?;

        log::debug!(
            "tcp_channel[{}]: connecting to {addr}",
            self.shared.config.name
        );
        let socket = provider.connect(addr).map_err(DiagClientError::ConnectionFailed)?;
        let reader_socket = socket.try_clone().map_err(DiagClientError::ConnectionFailed)?;

        *self.shared.writer.lock().unwrap_or_else(|e| e.into_inner()) = Some(socket);
        self.shared.running.store(true, Ordering::SeqCst);
        *self.shared.routing_state.lock().unwrap_or_else(|e| e.into_inner()) = RoutingState::Pending;

        let shared = self.shared.clone();
        let handle = std::thread::spawn(move || reader_loop(shared, reader_socket));
        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        let result = self.activate_routing(source_address);
        if result.is_err() {
            self.teardown();
        }
        result
    }

    fn activate_routing(&self, source_address: u16) -> DiagClientResult<()> {
        let req = RoutingActivationRequest {
            source_address,
            activation_type: DEFAULT_ACTIVATION_TYPE,
        };
        let frame = encode_frame(PayloadType::RoutingActivationRequest, &req.encode());
        self.write_frame(&frame)?;

        let (_, event) = self
            .shared
            .activation_timer
            .start(Duration::from_millis(DEFAULT_ACTIVATION_TIMEOUT_MS as u64));

        match event {
            Some(ActivationEvent::Accepted { server_address }) => {
                *self.shared.routing_state.lock().unwrap_or_else(|e| e.into_inner()) = RoutingState::Activated;
                log::debug!(
                    "tcp_channel[{}]: routing activated, server address 0x{server_address:04X}",
                    self.shared.config.name
                );
                Ok(())
            }
            Some(ActivationEvent::Refused { response_code }) => {
                *self.shared.routing_state.lock().unwrap_or_else(|e| e.into_inner()) = RoutingState::NotActivated;
                Err(DiagClientError::RoutingActivationFailed(response_code))
            }
            Some(ActivationEvent::SocketClosed) => {
                *self.shared.routing_state.lock().unwrap_or_else(|e| e.into_inner()) = RoutingState::NotActivated;
                Err(DiagClientError::SocketError(
                    "connection closed awaiting routing activation response".into(),
                ))
            }
            None => {
                *self.shared.routing_state.lock().unwrap_or_else(|e| e.into_inner()) = RoutingState::NotActivated;
                Err(DiagClientError::ActivationTimeout)
            }
        }
    }

    /// Sends a UDS request and blocks until a final (non-pending) response,
    /// an ack-level rejection, or a timeout. Returns
    /// [`DiagClientError::RequestInFlight`] if another request is already
    /// outstanding on this channel.
    pub fn send_diagnostic_request(&self, request: &UdsMessage) -> DiagClientResult<Vec<u8>> {
        if !self.is_active() {
            return Err(DiagClientError::NotActivated);
        }
        if !request.is_valid_request() {
            return Err(DiagClientError::InvalidParameter);
        }

        {
            let mut diag_state = self.shared.diag_state.lock().unwrap_or_else(|e| e.into_inner());
            if *diag_state != DiagState::Idle {
                return Err(DiagClientError::RequestInFlight);
            }
            *diag_state = DiagState::AwaitingAck;
        }
        let result = self.drive_diagnostic_request(request);
        *self.shared.diag_state.lock().unwrap_or_else(|e| e.into_inner()) = DiagState::Idle;
        result
    }

    fn drive_diagnostic_request(&self, request: &UdsMessage) -> DiagClientResult<Vec<u8>> {
        let msg = DiagnosticMessage {
            source_address: request.source_address,
            target_address: request.target_address,
            user_data: request.payload.clone(),
        };
        let frame = encode_frame(PayloadType::DiagnosticMessage, &msg.encode());
        self.write_frame(&frame)?;

        let ack = self.await_diag_event(self.shared.config.p2_client_max_ms as u64, DiagClientError::AckTimeout)?;
        match ack {
            DiagEvent::Ack { code } if code == diag_ack_code::POSITIVE => {}
            DiagEvent::Ack { code } => return Err(DiagClientError::NegativeAck(code)),
            DiagEvent::SocketClosed => return Err(DiagClientError::SocketError("connection closed awaiting ack".into())),
            DiagEvent::Response(_) => return Err(DiagClientError::SocketError("response arrived before ack".into())),
        }

        *self.shared.diag_state.lock().unwrap_or_else(|e| e.into_inner()) = DiagState::AwaitingResponse;

        let mut pending_count: u32 = 0;
        loop {
            let event = self.await_diag_event(
                self.shared.config.p2_star_client_max_ms as u64,
                DiagClientError::ResponseTimeout,
            )?;
            match event {
                DiagEvent::Response(resp) if resp.is_response_pending() => {
                    pending_count += 1;
                    if let Some(max) = self.shared.config.max_response_pending {
                        if pending_count > max {
                            return Err(DiagClientError::ResponseTimeout);
                        }
                    }
                    log::debug!(
                        "tcp_channel[{}]: response pending #{pending_count}, re-arming P2*",
                        self.shared.config.name
                    );
                    continue;
                }
                DiagEvent::Response(resp) => return Ok(resp.user_data),
                DiagEvent::Ack { .. } => continue,
                DiagEvent::SocketClosed => {
                    return Err(DiagClientError::SocketError("connection closed awaiting response".into()))
                }
            }
        }
    }

    /// Waits for the reader thread to deposit the next [`DiagEvent`]. The
    /// payload is honored whenever present, regardless of whether the timer
    /// itself reports `Cancelled` or `Timeout`: both the signal and the
    /// payload are set atomically under the timer's own lock, so a `Some`
    /// here always means a real event arrived and a spurious timeout was
    /// never possible. Only an empty slot is a genuine timeout.
    fn await_diag_event(&self, timeout_ms: u64, on_timeout: DiagClientError) -> DiagClientResult<DiagEvent> {
        let (_, event) = self.shared.diag_timer.start(Duration::from_millis(timeout_ms));
        match event {
            Some(event) => Ok(event),
            None => Err(on_timeout),
        }
    }

    fn write_frame(&self, frame: &[u8]) -> DiagClientResult<()> {
        let mut guard = self.shared.writer.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_deref_mut() {
            Some(socket) => socket.write_all(frame).map_err(|e| {
                *self.shared.routing_state.lock().unwrap_or_else(|e| e.into_inner()) = RoutingState::NotActivated;
                DiagClientError::TransmitFailed(e)
            }),
            None => Err(DiagClientError::NoTransport),
        }
    }

    fn teardown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.activation_timer.shutdown();
        self.shared.diag_timer.shutdown();
        if let Some(socket) = self.shared.writer.lock().unwrap_or_else(|e| e.into_inner()).as_deref_mut() {
            let _ = socket.shutdown();
        }
        *self.shared.routing_state.lock().unwrap_or_else(|e| e.into_inner()) = RoutingState::NotActivated;
        if let Some(handle) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }

    /// Closes the TCP connection and stops the reader thread. Idempotent.
    pub fn disconnect(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        log::debug!("tcp_channel[{}]: disconnecting", self.shared.config.name);
        self.shared.activation_timer.shutdown();
        self.shared.diag_timer.shutdown();
        if let Some(socket) = self.shared.writer.lock().unwrap_or_else(|e| e.into_inner()).as_deref_mut() {
            let _ = socket.shutdown();
        }
        *self.shared.routing_state.lock().unwrap_or_else(|e| e.into_inner()) = RoutingState::NotActivated;
        if let Some(handle) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpChannel")
            .field("name", &self.shared.config.name)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Sends a generic header negative acknowledge and closes the connection;
/// called by the reader loop when a header fails to decode (ISO 13400-2
/// §7.2, "the receiver shall ... close the socket").
fn send_nack_and_close(socket: &mut dyn ClientTcpSocket) {
    let frame = encode_frame(PayloadType::GenericHeaderNegativeAck, &[]);
    let _ = socket.write_all(&frame);
    let _ = socket.shutdown();
}

fn reader_loop(shared: Arc<Shared>, mut socket: Box<dyn ClientTcpSocket>) {
    while shared.running.load(Ordering::SeqCst) {
        let mut header_buf = [0u8; HEADER_LEN];
        if let Err(e) = socket.read_exact(&mut header_buf) {
            if shared.running.load(Ordering::SeqCst) {
                log::warn!("tcp_channel[{}]: reader socket closed: {e}", shared.config.name);
            }
            break;
        }

        let prefix = match decode_header_prefix(&header_buf) {
            Ok(prefix) => prefix,
            Err(e) => {
                log::warn!("tcp_channel[{}]: malformed header: {e}", shared.config.name);
                send_nack_and_close(socket.as_mut());
                break;
            }
        };

        if prefix.payload_length > shared.config.rx_buffer_size as u32 {
            log::warn!(
                "tcp_channel[{}]: payload length {} exceeds configured rx buffer {}",
                shared.config.name,
                prefix.payload_length,
                shared.config.rx_buffer_size
            );
            send_nack_and_close(socket.as_mut());
            break;
        }

        let mut body = vec![0u8; prefix.payload_length as usize];
        if let Err(e) = socket.read_exact(&mut body) {
            log::warn!("tcp_channel[{}]: reader socket closed mid-body: {e}", shared.config.name);
            break;
        }

        let payload_type = match PayloadType::from_u16(prefix.payload_type_raw) {
            Ok(t) => t,
            Err(FrameError::UnknownPayloadType(raw)) => {
                log::warn!("tcp_channel[{}]: unknown payload type 0x{raw:04X}", shared.config.name);
                continue;
            }
            Err(_) => continue,
        };

        match payload_type {
            PayloadType::RoutingActivationResponse => match RoutingActivationResponse::decode(&body) {
                Ok(resp) if resp.is_success() => {
                    shared.activation_timer.signal(ActivationEvent::Accepted {
                        server_address: resp.server_address,
                    });
                }
                Ok(resp) => {
                    shared.activation_timer.signal(ActivationEvent::Refused {
                        response_code: resp.response_code,
                    });
                }
                Err(e) => log::warn!("tcp_channel[{}]: bad routing activation response: {e}", shared.config.name),
            },
            PayloadType::DiagnosticMessagePosAck | PayloadType::DiagnosticMessageNegAck => {
                match DiagnosticMessageAck::decode(&body) {
                    Ok(ack) => shared.diag_timer.signal(DiagEvent::Ack { code: ack.ack_code }),
                    Err(e) => log::warn!("tcp_channel[{}]: bad diagnostic message ack: {e}", shared.config.name),
                }
            }
            PayloadType::DiagnosticMessage => match DiagnosticMessage::decode(&body) {
                Ok(msg) => {
                    log::trace!("tcp_channel[{}]: rx diagnostic message {:02X?}", shared.config.name, msg.user_data);
                    shared.diag_timer.signal(DiagEvent::Response(msg));
                }
                Err(e) => log::warn!("tcp_channel[{}]: bad diagnostic message: {e}", shared.config.name),
            },
            _ => log::trace!(
                "tcp_channel[{}]: ignoring unexpected payload type {payload_type:?} on TCP channel",
                shared.config.name
            ),
        }
    }

    // Every exit path above (peer half-close, header decode failure, oversized
    // payload, mid-body read failure) falls through to here: any caller still
    // waiting is unblocked, and routing state is dropped back to NotActivated
    // so is_active() reflects reality the moment the socket is gone, rather
    // than only once a subsequent send/disconnect notices.
    shared.diag_timer.signal(DiagEvent::SocketClosed);
    shared.activation_timer.signal(ActivationEvent::SocketClosed);
    *shared.routing_state.lock().unwrap_or_else(|e| e.into_inner()) = RoutingState::NotActivated;
}
