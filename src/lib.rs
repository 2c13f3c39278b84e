#![deny(
    missing_docs,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_imports,
    unused_import_braces,
    unused_qualifications
)]

//! A DoIP (ISO 13400) diagnostic client library that tunnels UDS
//! (ISO 14229) request/response traffic to remote automotive ECUs.
//!
//! ## Overview
//!
//! A client application builds a [`client::DiagnosticClient`] from a JSON
//! configuration file, then asks it for one or more named
//! [`conversation::Conversation`]s, each bound to a `(client logical
//! address, server logical address, remote IP/port)` tuple. A conversation
//! offers three synchronous operations:
//!
//! * [`conversation::Conversation::connect_to_diag_server`] — opens the
//!   TCP connection and performs DoIP routing activation.
//! * [`conversation::Conversation::send_diagnostic_request`] — tunnels one
//!   UDS request, transparently re-arming the P2\* timer across any number
//!   of "response pending" negative responses, and returns the final
//!   response payload.
//! * [`conversation::Conversation::disconnect_from_diag_server`] — closes
//!   the channel.
//!
//! Vehicle discovery (broadcasting a DoIP vehicle identification request
//! and collecting unicast announcements) is a client-wide operation;
//! see [`client::DiagnosticClient::send_vehicle_identification_request`].
//!
//! ## Module map
//!
//! * [`doip`] — the pure, I/O-free wire codec: generic header plus every
//!   typed payload body the client core speaks.
//! * [`timer`] — the one-shot [`timer::SyncTimer`] synchronization
//!   primitive the state machines below block on.
//! * [`transport`] — socket abstractions (`ClientTcpSocket`,
//!   `ClientUdpSocket`) plus their `std::net`-backed default
//!   implementations.
//! * [`tcp_channel`] — the per-conversation TCP channel: routing-activation
//!   and diagnostic-message sub-state machines.
//! * [`udp_channel`] — the client-wide UDP vehicle-discovery channel.
//! * [`handler`] — the thin transport-handler factory that builds
//!   per-conversation TCP channels.
//! * [`conversation`] — the user-facing [`conversation::Conversation`] type.
//! * [`client`] — the [`client::DiagnosticClient`] façade and conversation
//!   manager.
//! * [`config`] — JSON configuration loading.
//! * [`message`] — the opaque [`message::UdsMessage`] tunneled over DoIP.
//! * [`error`] — crate-wide tagged-variant error types.
//!
//! ## Non-goals
//!
//! This crate implements the DoIP *client* role only: no gateway/server
//! role, no TLS handshake (the config schema's `TlsHandling` flag is
//! parsed and stored but never acted on), no power-mode/alive-check
//! messages, no broadcast-address autodetection, and no concurrent
//! diagnostic requests on one conversation. UDS semantics above the
//! service identifier byte are not interpreted, except for the
//! "response pending" negative-response pattern that governs P2\* timing.

/// Client façade and conversation manager
pub mod client;
/// JSON configuration loading
pub mod config;
/// The user-facing [`conversation::Conversation`] type
pub mod conversation;
/// DoIP wire protocol codec
pub mod doip;
/// Crate-wide tagged-variant error types
pub mod error;
/// Transport-handler factory for per-conversation TCP channels
pub mod handler;
/// The opaque UDS message type tunneled over DoIP
pub mod message;
/// Per-conversation TCP channel state machines
pub mod tcp_channel;
/// One-shot synchronization timer
pub mod timer;
/// Socket abstractions
pub mod transport;
/// Client-wide UDP vehicle-discovery channel
pub mod udp_channel;

pub use client::DiagnosticClient;
pub use conversation::Conversation;
pub use error::{DiagClientError, DiagClientResult};
pub use message::UdsMessage;
