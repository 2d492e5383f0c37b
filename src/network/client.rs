//! CurveLink Client
//!
//! Connects to the compute server and runs one evaluation at a time.

use std::future::Future;
use thiserror::Error;

use super::connection::{Connection, ConnectionError, ConnectionStats};
use super::NetworkConfig;
use crate::protocol::{interpret, Curve, DecodeError, EncodeError, EvaluationRequest, EvaluationResult};
use crate::transport::{self, BoxedChannel};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect {
        endpoint: String,
        #[source]
        reason: std::io::Error,
    },

    #[error("Connection timeout")]
    ConnectTimeout,

    #[error("Send failed: {0}")]
    Send(#[source] ConnectionError),

    #[error("Receive failed: {0}")]
    Receive(#[source] ConnectionError),

    #[error("Timed out waiting for reply")]
    ReceiveTimeout,

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Malformed reply: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid request: {0}")]
    Encode(#[from] EncodeError),

    #[error("Server reported: {0}")]
    ServerReported(String),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("A request is already in flight")]
    Busy,

    #[error("Request cancelled")]
    Cancelled,
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Whether the server understood the request and refused it,
    /// as opposed to the channel or the reply being broken
    pub fn is_server_rejection(&self) -> bool {
        matches!(self, ClientError::ServerReported(_))
    }
}

/// Client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    /// A request has been written and its reply is not yet consumed
    Busy,
}

/// CurveLink Client
pub struct Client {
    /// Client configuration
    config: NetworkConfig,
    /// Current state
    state: ClientState,
    /// The open channel, if any
    connection: Option<Connection>,
}

impl Client {
    /// Create a new, disconnected client
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            state: ClientState::Disconnected,
            connection: None,
        }
    }

    /// Connect to the server listening on `endpoint`
    pub async fn connect(&mut self, endpoint: &str) -> ClientResult<()> {
        if self.connection.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        self.state = ClientState::Connecting;
        tracing::info!("Connecting to {}", endpoint);

        let stream = match tokio::time::timeout(self.config.connect_timeout(), transport::open(endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ClientState::Disconnected;
                return Err(ClientError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: e,
                });
            }
            Err(_) => {
                self.state = ClientState::Disconnected;
                return Err(ClientError::ConnectTimeout);
            }
        };

        self.attach(stream, endpoint)?;
        tracing::info!("Connected to {}", endpoint);
        Ok(())
    }

    /// Adopt an already-open channel, e.g. one created by a custom transport
    pub fn attach(&mut self, stream: BoxedChannel, endpoint: &str) -> ClientResult<()> {
        if self.connection.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        self.connection = Some(Connection::new(stream, endpoint, &self.config));
        self.state = ClientState::Connected;
        Ok(())
    }

    /// Evaluate a function and wait for the full reply.
    ///
    /// A server rejection comes back as `ClientError::ServerReported`.
    /// If this future is dropped before it completes, the client stays
    /// `Busy` until `stop` or `disconnect` is called.
    pub async fn evaluate(&mut self, request: &EvaluationRequest) -> ClientResult<Curve> {
        match self.state {
            ClientState::Connected => {}
            ClientState::Busy => return Err(ClientError::Busy),
            ClientState::Disconnected | ClientState::Connecting => return Err(ClientError::NotConnected),
        }

        let reply_timeout = self.config.reply_timeout();
        let conn = self.connection.as_mut().ok_or(ClientError::NotConnected)?;

        self.state = ClientState::Busy;

        if let Err(e) = conn.send_request(request).await {
            return Err(self.fail_in_flight(e, ClientError::Send));
        }

        let envelope = match conn.recv_reply(request.sample_count, reply_timeout).await {
            Ok(envelope) => envelope,
            Err(e) => return Err(self.fail_in_flight(e, ClientError::Receive)),
        };

        self.state = ClientState::Connected;

        if let Some(conn) = &self.connection {
            tracing::debug!("Round trip took {} us", conn.stats().rtt_us);
        }

        match interpret(envelope) {
            EvaluationResult::Curve(points) => Ok(Curve::new(request, points)),
            EvaluationResult::Rejected(message) => {
                tracing::info!("Server rejected '{}': {}", request.function, message);
                Err(ClientError::ServerReported(message))
            }
        }
    }

    /// Evaluate, but give up as soon as `cancel` completes.
    ///
    /// On cancellation the server is told to stop and the channel is
    /// closed without waiting for acknowledgment.
    pub async fn evaluate_cancellable<F>(&mut self, request: &EvaluationRequest, cancel: F) -> ClientResult<Curve>
    where
        F: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            result = self.evaluate(request) => Some(result),
            _ = cancel => None,
        };

        match outcome {
            Some(result) => result,
            None => {
                self.stop().await?;
                Err(ClientError::Cancelled)
            }
        }
    }

    /// Ask the server to abandon the computation in flight, then abort
    /// the channel. The server may keep computing; nothing waits for it.
    pub async fn stop(&mut self) -> ClientResult<()> {
        let Some(mut conn) = self.connection.take() else {
            self.state = ClientState::Disconnected;
            return Err(ClientError::NotConnected);
        };

        tracing::info!("Sending stop to {}", conn.endpoint());
        if let Err(e) = conn.send_stop().await {
            tracing::warn!("Stop message not delivered: {}", e);
        }

        // Abort: drop without a graceful shutdown handshake.
        drop(conn);
        self.state = ClientState::Disconnected;
        Ok(())
    }

    /// Close the channel. Safe to call in any state, any number of times.
    pub async fn disconnect(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.shutdown().await;
            tracing::info!("Disconnected from {}", conn.endpoint());
        }
        self.state = ClientState::Disconnected;
    }

    /// Get the current state
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Check if connected (idle or busy)
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ClientState::Connected | ClientState::Busy)
    }

    /// Traffic statistics of the current channel
    pub fn stats(&self) -> Option<&ConnectionStats> {
        self.connection.as_ref().map(Connection::stats)
    }

    /// Map a transport failure during a request. The packet boundary is
    /// lost, so the channel is dropped and the client disconnected.
    fn fail_in_flight(&mut self, error: ConnectionError, wrap: fn(ConnectionError) -> ClientError) -> ClientError {
        let mapped = match error {
            ConnectionError::Decode(e) => {
                self.state = ClientState::Connected;
                return ClientError::Decode(e);
            }
            ConnectionError::Encode(e) => {
                self.state = ClientState::Connected;
                return ClientError::Encode(e);
            }
            ConnectionError::Timeout(_) => ClientError::ReceiveTimeout,
            ConnectionError::Closed => ClientError::ConnectionClosed,
            other => wrap(other),
        };

        tracing::warn!("Dropping channel after failed request: {}", mapped);
        self.connection = None;
        self.state = ClientState::Disconnected;
        mapped
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}
