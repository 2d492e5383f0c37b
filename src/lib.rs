//! CurveLink - function-evaluation client for a local compute server
//!
//! Sends a request naming a function, a domain, a sample count and an
//! order parameter over a local pipe, and returns the curve the server
//! computed (or the error text it sent back).
//!
//! ```ignore
//! use curvelink::network::{Client, NetworkConfig};
//! use curvelink::protocol::EvaluationRequest;
//!
//! let mut client = Client::new(NetworkConfig::default());
//! client.connect(&curvelink::transport::default_endpoint()).await?;
//! let curve = client.evaluate(&EvaluationRequest::new("sin", 0.0, 6.28, 100)).await?;
//! client.disconnect().await;
//! ```

pub mod config;
pub mod network;
pub mod protocol;
pub mod transport;

pub use network::{Client, ClientError, ClientResult, ClientState};
pub use protocol::{Curve, EvaluationRequest, Point};
