//! Network module - Handles the channel to the compute server
//!
//! Provides:
//! - Connection framing (length-driven reads, whole-packet writes)
//! - Client with the request/reply state machine

mod client;
mod connection;

pub use client::*;
pub use connection::*;

use std::time::Duration;

use crate::protocol::LengthAccounting;

/// Configuration for channel operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// How long to wait for a complete reply, in milliseconds
    pub reply_timeout_ms: u64,
    /// Largest reply accepted, in bytes
    pub max_reply_bytes: usize,
    /// How the length field is counted on this link
    pub accounting: LengthAccounting,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            reply_timeout_ms: 30_000,
            max_reply_bytes: 256 * 1024 * 1024, // 256 MB
            accounting: LengthAccounting::Payload,
        }
    }
}

impl NetworkConfig {
    pub fn with_accounting(mut self, accounting: LengthAccounting) -> Self {
        self.accounting = accounting;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}
