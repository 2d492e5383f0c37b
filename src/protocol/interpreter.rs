//! Turns a decoded reply into what the caller asked for

use super::{Point, ReplyBody, ReplyEnvelope};

/// Outcome of one evaluation as reported by the server
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResult {
    /// The server evaluated the function
    Curve(Vec<Point>),
    /// The server refused the request and said why
    Rejected(String),
}

/// Classify a reply. Even-indexed values are x, odd-indexed values are y.
pub fn interpret(envelope: ReplyEnvelope) -> EvaluationResult {
    match envelope.body {
        ReplyBody::Curve(values) => EvaluationResult::Curve(
            values
                .chunks_exact(2)
                .map(|pair| Point::new(pair[0], pair[1]))
                .collect(),
        ),
        ReplyBody::Message(message) => EvaluationResult::Rejected(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Decoder, Encoder, CURVE_TAG};
    use bytes::BytesMut;

    fn envelope(body: ReplyBody) -> ReplyEnvelope {
        ReplyEnvelope {
            declared_length: 0,
            tag: CURVE_TAG,
            body,
        }
    }

    #[test]
    fn test_pairs_are_positional() {
        let result = interpret(envelope(ReplyBody::Curve(vec![0.0, 0.0, 3.14, 1.0])));
        assert_eq!(
            result,
            EvaluationResult::Curve(vec![Point::new(0.0, 0.0), Point::new(3.14, 1.0)])
        );
    }

    #[test]
    fn test_empty_curve_is_success() {
        let result = interpret(envelope(ReplyBody::Curve(Vec::new())));
        assert_eq!(result, EvaluationResult::Curve(Vec::new()));
    }

    #[test]
    fn test_message_is_rejection() {
        let result = interpret(envelope(ReplyBody::Message("Invalid domain".to_string())));
        assert_eq!(result, EvaluationResult::Rejected("Invalid domain".to_string()));
    }

    #[test]
    fn test_decoded_reply_preserves_order() {
        let points: Vec<Point> = (0..64)
            .map(|i| Point::new(i as f64, -(i as f64) / 3.0))
            .collect();
        let mut buf = BytesMut::new();
        Encoder::default().encode_curve_reply(&points, &mut buf).unwrap();

        let decoded = Decoder::default().decode_envelope(&buf, 64).unwrap();
        assert_eq!(interpret(decoded), EvaluationResult::Curve(points));
    }
}
