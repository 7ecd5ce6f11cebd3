use dictamesh_types::EventEnvelope;
use std::fmt;

/// Envelopes are a pointer plus a delta; anything near this bound is a
/// payload clone smuggled into the log.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    PayloadTooLarge { len: usize, max: usize },
    FrameTooShort { len: usize },
    FrameTooLarge { len: usize, max: usize },
    FrameTruncated { expected: usize, actual: usize },
    Json(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload too large: {len} > {max}")
            }
            Self::FrameTooShort { len } => write!(f, "frame too short: {len}"),
            Self::FrameTooLarge { len, max } => write!(f, "frame too large: {len} > {max}"),
            Self::FrameTruncated { expected, actual } => {
                write!(
                    f,
                    "truncated frame payload: expected {expected}, got {actual}"
                )
            }
            Self::Json(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// 4-byte big-endian length prefix around the payload.
pub fn encode_frame(payload: &[u8], max_payload_bytes: usize) -> Result<Vec<u8>, CodecError> {
    if payload.len() > max_payload_bytes {
        return Err(CodecError::PayloadTooLarge {
            len: payload.len(),
            max: max_payload_bytes,
        });
    }

    let payload_len = u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&payload_len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn decode_frame(frame: &[u8], max_payload_bytes: usize) -> Result<&[u8], CodecError> {
    if frame.len() < 4 {
        return Err(CodecError::FrameTooShort { len: frame.len() });
    }

    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&frame[..4]);
    let payload_len = u32::from_be_bytes(prefix) as usize;
    if payload_len > max_payload_bytes {
        return Err(CodecError::FrameTooLarge {
            len: payload_len,
            max: max_payload_bytes,
        });
    }

    let actual_payload_len = frame.len() - 4;
    if actual_payload_len != payload_len {
        return Err(CodecError::FrameTruncated {
            expected: payload_len,
            actual: actual_payload_len,
        });
    }

    Ok(&frame[4..])
}

pub fn encode_envelope(envelope: &EventEnvelope) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(envelope).map_err(|e| CodecError::Json(e.to_string()))?;
    encode_frame(&payload, DEFAULT_MAX_FRAME_BYTES)
}

pub fn decode_envelope(frame: &[u8]) -> Result<EventEnvelope, CodecError> {
    let payload = decode_frame(frame, DEFAULT_MAX_FRAME_BYTES)?;
    serde_json::from_slice(payload).map_err(|e| CodecError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dictamesh_types::{
        EntityPointer, EventId, EventType, SpanId, TraceContext, TraceId,
    };
    use std::collections::BTreeMap;

    fn envelope() -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new("e-1"),
            event_type: EventType::EntityUpdated,
            timestamp: 1_700_000_000_000,
            source_system: "directus".into(),
            domain: "customers".into(),
            entity: EntityPointer {
                entity_type: "customer".into(),
                id: "c-1".into(),
                version: 3,
                url: "https://api.directus.example/items/customer/{id}".into(),
                etag: Some("\"abc\"".into()),
            },
            changed_fields: vec!["email".into()],
            relationships: vec![],
            metadata: BTreeMap::new(),
            trace_context: TraceContext {
                trace_id: TraceId::new("0001000000000001"),
                span_id: SpanId::new("0001000000000002"),
                parent_span_id: None,
            },
        }
    }

    #[test]
    fn envelope_frame_roundtrip() {
        let frame = encode_envelope(&envelope()).expect("envelope should encode");
        let back = decode_envelope(&frame).expect("frame should decode");
        assert_eq!(back, envelope());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut frame = encode_envelope(&envelope()).expect("envelope should encode");
        frame.truncate(frame.len() - 1);
        let err = decode_envelope(&frame).expect_err("truncated frame should fail");
        assert!(matches!(err, CodecError::FrameTruncated { .. }));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; 16];
        let err = encode_frame(&payload, 8).expect_err("oversized payload should fail");
        assert_eq!(err, CodecError::PayloadTooLarge { len: 16, max: 8 });
    }

    #[test]
    fn garbage_payload_is_a_json_error() {
        let frame = encode_frame(b"not json", DEFAULT_MAX_FRAME_BYTES).expect("should frame");
        let err = decode_envelope(&frame).expect_err("garbage should fail to decode");
        assert!(matches!(err, CodecError::Json(_)));
    }
}
