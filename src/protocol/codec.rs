//! Protocol codec for encoding/decoding packets
//!
//! Pure byte-level work: nothing here touches the channel.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::{
    EvaluationRequest, LengthAccounting, Point, ReplyBody, ReplyEnvelope, StopRequest,
    CURVE_BODY_OFFSET, CURVE_TAG, LENGTH_FIELD_SIZE, REQUEST_TRAILER_SIZE, TAG_SIZE, TERMINATOR,
};

/// Errors raised while building a packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Text contains U+0000, which the peer reads as the end of the field: {0:?}")]
    EmbeddedTerminator(String),

    #[error("Packet too large: {0} bytes does not fit the length field")]
    TooLarge(usize),
}

/// Errors raised while reading a reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated header: {actual} bytes, need 4")]
    TruncatedHeader { actual: usize },

    #[error("Truncated body: {actual} bytes, declared frame is {expected}")]
    TruncatedBody { expected: usize, actual: usize },

    #[error("Malformed body: {0}")]
    MalformedBody(String),
}

/// Encodes requests (and, for a Rust peer or tests, replies) into the wire format
#[derive(Debug, Clone, Copy, Default)]
pub struct Encoder {
    accounting: LengthAccounting,
}

impl Encoder {
    pub fn new(accounting: LengthAccounting) -> Self {
        Self { accounting }
    }

    /// Encode an evaluation request into a buffer
    pub fn encode_request(&self, request: &EvaluationRequest, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let selector = utf16_bytes(&request.function)?;
        let payload_len = selector.len() + TERMINATOR.len() + REQUEST_TRAILER_SIZE;

        self.put_length(payload_len, buf)?;
        buf.put_slice(&selector);
        buf.put_slice(&TERMINATOR);
        buf.put_f64_le(request.domain_start);
        buf.put_f64_le(request.domain_end);
        buf.put_u32_le(request.sample_count);
        buf.put_u32_le(request.order);

        Ok(())
    }

    /// Encode the stop control message: selector and terminator, no numbers
    pub fn encode_stop(&self, stop: &StopRequest, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let token = utf16_bytes(stop.token())?;

        self.put_length(token.len() + TERMINATOR.len(), buf)?;
        buf.put_slice(&token);
        buf.put_slice(&TERMINATOR);

        Ok(())
    }

    /// Encode a success reply carrying `points`
    pub fn encode_curve_reply(&self, points: &[Point], buf: &mut BytesMut) -> Result<(), EncodeError> {
        let body_len = points
            .len()
            .checked_mul(16)
            .ok_or(EncodeError::TooLarge(usize::MAX))?;
        let payload_len = CURVE_BODY_OFFSET - LENGTH_FIELD_SIZE + body_len;

        self.put_length(payload_len, buf)?;
        buf.put_slice(&CURVE_TAG);
        buf.put_bytes(0, CURVE_BODY_OFFSET - LENGTH_FIELD_SIZE - TAG_SIZE);
        for point in points {
            buf.put_f64_le(point.x);
            buf.put_f64_le(point.y);
        }

        Ok(())
    }

    /// Encode an error reply carrying `message`
    pub fn encode_error_reply(&self, message: &str, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let text = utf16_bytes(message)?;

        self.put_length(text.len() + TERMINATOR.len(), buf)?;
        buf.put_slice(&text);
        buf.put_slice(&TERMINATOR);

        Ok(())
    }

    fn put_length(&self, payload_len: usize, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let declared = self
            .accounting
            .declared_for(payload_len)
            .ok_or(EncodeError::TooLarge(payload_len))?;

        buf.reserve(LENGTH_FIELD_SIZE + payload_len);
        buf.put_u32_le(declared);
        Ok(())
    }
}

/// Decodes replies from the wire format
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    accounting: LengthAccounting,
}

impl Decoder {
    pub fn new(accounting: LengthAccounting) -> Self {
        Self { accounting }
    }

    /// Size of the whole packet announced by the length field.
    /// Returns Ok(None) if the length field has not fully arrived yet.
    pub fn frame_len(&self, buf: &[u8]) -> Result<Option<usize>, DecodeError> {
        if buf.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let declared = (&buf[..LENGTH_FIELD_SIZE]).get_u32_le();
        self.accounting
            .frame_size(declared)
            .map(Some)
            .ok_or_else(|| {
                DecodeError::MalformedBody(format!(
                    "declared length {} is smaller than the length field",
                    declared
                ))
            })
    }

    /// Decode a complete reply.
    ///
    /// The tag is always read from bytes `[4, 14)` and curve data always
    /// starts at byte 16; the length field only has to agree with them.
    pub fn decode_envelope(&self, buf: &[u8], expected_sample_count: u32) -> Result<ReplyEnvelope, DecodeError> {
        let total = self
            .frame_len(buf)?
            .ok_or(DecodeError::TruncatedHeader { actual: buf.len() })?;

        if buf.len() < total {
            return Err(DecodeError::TruncatedBody {
                expected: total,
                actual: buf.len(),
            });
        }

        let declared_length = (&buf[..LENGTH_FIELD_SIZE]).get_u32_le();
        let frame = &buf[..total];

        let tag_end = (LENGTH_FIELD_SIZE + TAG_SIZE).min(total);
        let window = &frame[LENGTH_FIELD_SIZE..tag_end];
        let mut tag = [0u8; TAG_SIZE];
        tag[..window.len()].copy_from_slice(window);

        let body = if window.len() == TAG_SIZE && tag == CURVE_TAG {
            if buf.len() > total {
                return Err(DecodeError::MalformedBody(format!(
                    "{} bytes follow the declared frame of {}",
                    buf.len() - total,
                    total
                )));
            }
            ReplyBody::Curve(decode_coordinates(frame, expected_sample_count)?)
        } else {
            ReplyBody::Message(decode_utf16_lossy(&frame[LENGTH_FIELD_SIZE..]))
        };

        Ok(ReplyEnvelope {
            declared_length,
            tag,
            body,
        })
    }
}

fn decode_coordinates(frame: &[u8], expected_sample_count: u32) -> Result<Vec<f64>, DecodeError> {
    if frame.len() < CURVE_BODY_OFFSET {
        return Err(DecodeError::MalformedBody(format!(
            "curve reply of {} bytes is shorter than its {}-byte header",
            frame.len(),
            CURVE_BODY_OFFSET
        )));
    }

    let mut body = &frame[CURVE_BODY_OFFSET..];
    if body.len() % 8 != 0 {
        return Err(DecodeError::MalformedBody(format!(
            "{} body bytes is not a whole number of f64 values",
            body.len()
        )));
    }

    let count = body.len() / 8;
    let expected = u64::from(expected_sample_count) * 2;
    if count as u64 != expected {
        return Err(DecodeError::MalformedBody(format!(
            "expected {} values for {} samples, got {}",
            expected, expected_sample_count, count
        )));
    }

    let mut values = Vec::with_capacity(count);
    while body.has_remaining() {
        values.push(body.get_f64_le());
    }
    Ok(values)
}

/// UTF-16LE bytes of `text`, refusing anything the peer would cut short
fn utf16_bytes(text: &str) -> Result<Vec<u8>, EncodeError> {
    if text.contains('\0') {
        return Err(EncodeError::EmbeddedTerminator(text.to_string()));
    }

    let mut out = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    Ok(out)
}

/// Decode UTF-16LE text, dropping the trailing terminator(s).
/// Unpaired surrogates become U+FFFD; a dangling odd byte is ignored.
fn decode_utf16_lossy(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));

    let text: String = char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();

    text.trim_end_matches('\0').to_string()
}
