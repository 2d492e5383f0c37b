//! Protocol message definitions
//!
//! Requests sent to the compute server and the replies it sends back.

use serde::{Deserialize, Serialize};

use super::{STOP_TOKEN, TAG_SIZE};

/// A request to evaluate one function over a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Selector naming the function, as listed in the function catalog
    pub function: String,
    /// First x value of the domain
    pub domain_start: f64,
    /// Last x value of the domain (may be below `domain_start`)
    pub domain_end: f64,
    /// Number of (x, y) pairs the server must return
    pub sample_count: u32,
    /// Order/degree for functions that take one; always transmitted
    pub order: u32,
}

impl EvaluationRequest {
    pub fn new(function: impl Into<String>, domain_start: f64, domain_end: f64, sample_count: u32) -> Self {
        Self {
            function: function.into(),
            domain_start,
            domain_end,
            sample_count,
            order: 0,
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }
}

/// Control message cancelling the computation in flight on the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopRequest;

impl StopRequest {
    pub fn token(&self) -> &'static str {
        STOP_TOKEN
    }
}

/// One sample of the evaluated function
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Points returned for a request, together with the requested domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub function: String,
    pub domain: (f64, f64),
    pub points: Vec<Point>,
}

impl Curve {
    pub fn new(request: &EvaluationRequest, points: Vec<Point>) -> Self {
        Self {
            function: request.function.clone(),
            domain: (request.domain_start, request.domain_end),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Horizontal axis range: the requested domain
    pub fn x_range(&self) -> (f64, f64) {
        self.domain
    }

    /// Vertical axis range: smallest and largest y, ignoring NaN.
    /// `None` when there is no finite-comparable y value.
    pub fn y_range(&self) -> Option<(f64, f64)> {
        self.points
            .iter()
            .map(|p| p.y)
            .filter(|y| !y.is_nan())
            .fold(None, |acc, y| match acc {
                None => Some((y, y)),
                Some((lo, hi)) => Some((lo.min(y), hi.max(y))),
            })
    }
}

/// Body of a decoded reply
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    /// Interleaved coordinates `[x0, y0, x1, y1, ..]`
    Curve(Vec<f64>),
    /// Error text sent by the server
    Message(String),
}

/// A fully decoded reply packet
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEnvelope {
    /// Value of the length field as sent by the server
    pub declared_length: u32,
    /// Raw tag window, zero-filled when the reply was shorter than the window
    pub tag: [u8; TAG_SIZE],
    pub body: ReplyBody,
}

impl ReplyEnvelope {
    pub fn is_curve(&self) -> bool {
        matches!(self.body, ReplyBody::Curve(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = EvaluationRequest::new("bessel", 0.0, 10.0, 50).with_order(3);
        assert_eq!(req.function, "bessel");
        assert_eq!(req.sample_count, 50);
        assert_eq!(req.order, 3);
    }

    #[test]
    fn test_curve_ranges() {
        let req = EvaluationRequest::new("sin", 0.0, 6.28, 3);
        let curve = Curve::new(
            &req,
            vec![Point::new(0.0, 0.0), Point::new(3.14, -1.0), Point::new(6.28, 0.5)],
        );
        assert_eq!(curve.x_range(), (0.0, 6.28));
        assert_eq!(curve.y_range(), Some((-1.0, 0.5)));
    }

    #[test]
    fn test_curve_y_range_skips_nan() {
        let req = EvaluationRequest::new("sin", 0.0, 1.0, 2);
        let curve = Curve::new(&req, vec![Point::new(0.0, f64::NAN), Point::new(1.0, 2.0)]);
        assert_eq!(curve.y_range(), Some((2.0, 2.0)));

        let empty = Curve::new(&req, Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.y_range(), None);
    }
}
