//! DoIP transport handler
//!
//! A thin adapter that owns no channels itself but knows how to build one
//! on demand for a conversation. Each conversation gets its own
//! [`TcpChannel`]; connections are never shared across conversations, so
//! the handler's only persistent state is a correlation-id counter used
//! to tag log lines for diagnostic purposes only.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::ConversationConfig;
use crate::tcp_channel::TcpChannel;

/// Factory for per-conversation [`TcpChannel`]s
#[derive(Debug, Default)]
pub struct DoipTransportHandler {
    next_handler_id: AtomicU32,
}

impl DoipTransportHandler {
    /// Creates a handler with its correlation-id counter at zero
    pub fn new() -> Self {
        Self {
            next_handler_id: AtomicU32::new(0),
        }
    }

    /// Builds a new, unconnected [`TcpChannel`] for `config`, tagging it
    /// with the next handler id for log correlation. The caller owns the
    /// returned channel outright; the handler keeps no reference to it.
    pub fn find_or_create_tcp_connection(&self, config: ConversationConfig) -> TcpChannel {
        let id = self.next_handler_id.fetch_add(1, Ordering::SeqCst);
        log::debug!("transport_handler: creating TCP channel #{id} for conversation '{}'", config.name);
        TcpChannel::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(name: &str) -> ConversationConfig {
        ConversationConfig {
            name: name.into(),
            client_logical_address: 0x0E00,
            rx_buffer_size: 4096,
            p2_client_max_ms: 100,
            p2_star_client_max_ms: 100,
            remote_tcp_address: "127.0.0.1".into(),
            remote_tcp_port: 0,
            tls_handling: false,
            max_response_pending: None,
        }
    }

    #[test]
    fn each_conversation_gets_its_own_channel() {
        let handler = DoipTransportHandler::new();
        let a = handler.find_or_create_tcp_connection(cfg("A"));
        let b = handler.find_or_create_tcp_connection(cfg("B"));
        assert!(!a.is_active());
        assert!(!b.is_active());
    }
}
