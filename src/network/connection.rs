//! Connection handling for the compute server channel
//!
//! Manages one open channel, including:
//! - Request encoding and whole-packet writes
//! - Length-driven accumulation of replies
//! - Traffic statistics

use bytes::BytesMut;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::NetworkConfig;
use crate::protocol::{DecodeError, Decoder, EncodeError, Encoder, EvaluationRequest, ReplyEnvelope, StopRequest};
use crate::transport::BoxedChannel;

/// Most the read buffer grows by before the bytes actually arrive
const READ_CHUNK: usize = 64 * 1024;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Connection closed")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Reply too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Unusable length field: {0}")]
    BadHeader(#[source] DecodeError),
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Evaluation requests sent
    pub requests_sent: u64,
    /// Stop messages sent
    pub stops_sent: u64,
    /// Complete replies received
    pub replies_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Last request-to-reply time (microseconds)
    pub rtt_us: u64,
}

/// An open channel to the compute server
pub struct Connection {
    /// Endpoint this channel was opened on
    endpoint: String,
    /// The byte stream
    stream: BoxedChannel,
    /// Protocol encoder
    encoder: Encoder,
    /// Protocol decoder
    decoder: Decoder,
    /// Read buffer
    read_buf: BytesMut,
    /// Write buffer
    write_buf: BytesMut,
    /// Largest reply accepted
    max_reply_bytes: usize,
    /// When the request in flight was written
    request_sent_at: Option<Instant>,
    /// Statistics
    stats: ConnectionStats,
}

impl Connection {
    /// Wrap an already-open channel
    pub fn new(stream: BoxedChannel, endpoint: impl Into<String>, config: &NetworkConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            stream,
            encoder: Encoder::new(config.accounting),
            decoder: Decoder::new(config.accounting),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(256),
            max_reply_bytes: config.max_reply_bytes,
            request_sent_at: None,
            stats: ConnectionStats::default(),
        }
    }

    /// Get the endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Send an evaluation request
    pub async fn send_request(&mut self, request: &EvaluationRequest) -> ConnectionResult<()> {
        self.write_buf.clear();
        self.encoder.encode_request(request, &mut self.write_buf)?;
        self.flush_write_buf().await?;

        self.stats.requests_sent += 1;
        self.request_sent_at = Some(Instant::now());

        tracing::debug!(
            "Sent request for '{}' ({} bytes, {} samples)",
            request.function,
            self.write_buf.len(),
            request.sample_count
        );
        Ok(())
    }

    /// Send the stop control message
    pub async fn send_stop(&mut self) -> ConnectionResult<()> {
        self.write_buf.clear();
        self.encoder.encode_stop(&StopRequest, &mut self.write_buf)?;
        self.flush_write_buf().await?;

        self.stats.stops_sent += 1;
        Ok(())
    }

    async fn flush_write_buf(&mut self) -> ConnectionResult<()> {
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.bytes_sent += self.write_buf.len() as u64;
        Ok(())
    }

    /// Receive one complete reply packet.
    ///
    /// Reads until the length field and everything it announces have
    /// arrived. A peer that closes before that is an error.
    pub async fn recv_frame(&mut self) -> ConnectionResult<BytesMut> {
        loop {
            let header = self.decoder.frame_len(&self.read_buf).map_err(|e| {
                self.read_buf.clear();
                ConnectionError::BadHeader(e)
            })?;

            if let Some(total) = header {
                if total > self.max_reply_bytes {
                    return Err(ConnectionError::FrameTooLarge {
                        size: total,
                        max: self.max_reply_bytes,
                    });
                }

                if self.read_buf.len() >= total {
                    let frame = self.read_buf.split_to(total);
                    if !self.read_buf.is_empty() {
                        tracing::warn!(
                            "Discarding {} bytes received after a complete reply",
                            self.read_buf.len()
                        );
                        self.read_buf.clear();
                    }
                    self.complete_reply();
                    return Ok(frame);
                }

                self.read_buf.reserve((total - self.read_buf.len()).min(READ_CHUNK));
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ConnectionError::Closed);
            }

            self.stats.bytes_received += n as u64;
        }
    }

    /// Receive one complete reply packet with a timeout
    pub async fn recv_frame_timeout(&mut self, timeout: Duration) -> ConnectionResult<BytesMut> {
        match tokio::time::timeout(timeout, self.recv_frame()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(timeout)),
        }
    }

    /// Receive and decode the reply to a request for `expected_sample_count` samples
    pub async fn recv_reply(
        &mut self,
        expected_sample_count: u32,
        timeout: Duration,
    ) -> ConnectionResult<ReplyEnvelope> {
        let frame = self.recv_frame_timeout(timeout).await?;
        tracing::debug!("Received reply of {} bytes", frame.len());

        Ok(self.decoder.decode_envelope(&frame, expected_sample_count)?)
    }

    fn complete_reply(&mut self) {
        self.stats.replies_received += 1;
        if let Some(sent_at) = self.request_sent_at.take() {
            self.stats.rtt_us = sent_at.elapsed().as_micros() as u64;
        }
    }

    /// Close the channel. Errors are logged, never returned.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!("Shutdown of {} failed: {}", self.endpoint, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Point, ReplyBody};

    fn request_bytes(request: &EvaluationRequest) -> BytesMut {
        let mut buf = BytesMut::new();
        Encoder::default().encode_request(request, &mut buf).unwrap();
        buf
    }

    fn curve_bytes(points: &[Point]) -> BytesMut {
        let mut buf = BytesMut::new();
        Encoder::default().encode_curve_reply(points, &mut buf).unwrap();
        buf
    }

    #[tokio::test]
    async fn test_request_reply_over_mock() {
        let request = EvaluationRequest::new("sin", 0.0, 6.28, 2);
        let points = [Point::new(0.0, 0.0), Point::new(3.14, 1.0)];

        let mock = tokio_test::io::Builder::new()
            .write(&request_bytes(&request))
            .read(&curve_bytes(&points))
            .build();

        let mut conn = Connection::new(Box::new(mock), "mock", &NetworkConfig::default());
        conn.send_request(&request).await.unwrap();
        let envelope = conn.recv_reply(2, Duration::from_secs(1)).await.unwrap();

        assert_eq!(envelope.body, ReplyBody::Curve(vec![0.0, 0.0, 3.14, 1.0]));
        assert_eq!(conn.stats().requests_sent, 1);
        assert_eq!(conn.stats().replies_received, 1);
    }

    #[tokio::test]
    async fn test_reply_split_across_reads() {
        let reply = curve_bytes(&[Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);

        let mock = tokio_test::io::Builder::new()
            .read(&reply[..2])
            .read(&reply[2..11])
            .read(&reply[11..20])
            .read(&reply[20..])
            .build();

        let mut conn = Connection::new(Box::new(mock), "mock", &NetworkConfig::default());
        let frame = conn.recv_frame().await.unwrap();

        assert_eq!(&frame[..], &reply[..]);
        assert_eq!(conn.stats().bytes_received, reply.len() as u64);
    }

    #[tokio::test]
    async fn test_peer_closing_mid_reply() {
        let reply = curve_bytes(&[Point::new(1.0, 2.0)]);
        let (client, mut server) = tokio::io::duplex(64);

        server.write_all(&reply[..10]).await.unwrap();
        drop(server);

        let mut conn = Connection::new(Box::new(client), "duplex", &NetworkConfig::default());
        let err = conn.recv_frame().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
    }

    #[tokio::test]
    async fn test_reply_timeout() {
        let (client, _server) = tokio::io::duplex(64);

        let mut conn = Connection::new(Box::new(client), "duplex", &NetworkConfig::default());
        let err = conn
            .recv_frame_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_oversized_reply_rejected() {
        let mock = tokio_test::io::Builder::new()
            .read(&(1024u32).to_le_bytes())
            .build();

        let config = NetworkConfig {
            max_reply_bytes: 512,
            ..Default::default()
        };
        let mut conn = Connection::new(Box::new(mock), "mock", &config);
        let err = conn.recv_frame().await.unwrap_err();
        assert!(matches!(err, ConnectionError::FrameTooLarge { size: 1028, max: 512 }));
    }

    #[tokio::test]
    async fn test_large_header_does_not_preallocate() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(&(200u32 * 1024 * 1024).to_le_bytes()).await.unwrap();

        let mut conn = Connection::new(Box::new(client), "duplex", &NetworkConfig::default());
        let err = conn
            .recv_frame_timeout(Duration::from_millis(30))
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionError::Timeout(_)));
        assert_eq!(conn.read_buf.len(), 4);
        assert!(conn.read_buf.capacity() < 1024 * 1024);
    }

    #[tokio::test]
    async fn test_bad_header_clears_buffer() {
        let mock = tokio_test::io::Builder::new()
            .read(&3u32.to_le_bytes())
            .build();

        let config = NetworkConfig::default().with_accounting(crate::protocol::LengthAccounting::Inclusive);
        let mut conn = Connection::new(Box::new(mock), "mock", &config);
        let err = conn.recv_frame().await.unwrap_err();

        assert!(matches!(err, ConnectionError::BadHeader(DecodeError::MalformedBody(_))));
        assert!(conn.read_buf.is_empty());
    }

    #[tokio::test]
    async fn test_trailing_bytes_discarded() {
        let mut reply = curve_bytes(&[Point::new(5.0, 6.0)]);
        let frame_len = reply.len();
        reply.extend_from_slice(&[0xAA; 3]);

        let mock = tokio_test::io::Builder::new().read(&reply).build();

        let mut conn = Connection::new(Box::new(mock), "mock", &NetworkConfig::default());
        let frame = conn.recv_frame().await.unwrap();
        assert_eq!(frame.len(), frame_len);
        assert!(conn.read_buf.is_empty());
    }

    #[tokio::test]
    async fn test_send_stop() {
        let mut stop = BytesMut::new();
        Encoder::default().encode_stop(&StopRequest, &mut stop).unwrap();

        let mock = tokio_test::io::Builder::new().write(&stop).build();

        let mut conn = Connection::new(Box::new(mock), "mock", &NetworkConfig::default());
        conn.send_stop().await.unwrap();
        assert_eq!(conn.stats().stops_sent, 1);
        assert_eq!(conn.stats().bytes_sent, 14);
    }
}
