//! JSON Wire Codec
//!
//! Serializes responses as JSON with `serde_json`, straight into the
//! capacity-limited encode buffer. An overflow surfaces from the writer as
//! an I/O error and is reported as [`CodecError::BufferTooSmall`] so the
//! encoder can retry with a larger buffer.

use crate::application::ports::{CodecError, EncodeBuffer, WireCodec};
use crate::domain::message::ResponseMsg;

/// JSON implementation of [`WireCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn encode(&self, msg: &ResponseMsg, buf: &mut EncodeBuffer) -> Result<(), CodecError> {
        buf.clear();

        match serde_json::to_writer(&mut *buf, msg) {
            Ok(()) => Ok(()),
            Err(e) if e.is_io() => {
                buf.clear();
                Err(CodecError::BufferTooSmall { limit: buf.limit() })
            }
            Err(e) => Err(CodecError::Encode(e.to_string())),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<ResponseMsg, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::message::{Payload, UpdateMsg};
    use crate::domain::payload::{FieldEntry, FieldValue, fid};
    use crate::domain::types::DomainType;

    fn update() -> ResponseMsg {
        ResponseMsg::Update(UpdateMsg {
            stream_id: 5,
            domain: DomainType::MarketPrice,
            key: None,
            post_user: None,
            payload: Payload::FieldList(vec![FieldEntry::new(fid::BID, FieldValue::Real(dec!(0.99)))]),
        })
    }

    #[test]
    fn encoded_message_decodes_to_itself() {
        let codec = JsonCodec;
        let mut buf = EncodeBuffer::with_limit(1024);

        codec.encode(&update(), &mut buf).unwrap();

        assert_eq!(codec.decode(buf.as_slice()).unwrap(), update());
    }

    #[test]
    fn overflow_reports_buffer_too_small() {
        let codec = JsonCodec;
        let mut buf = EncodeBuffer::with_limit(8);

        let err = codec.encode(&update(), &mut buf).unwrap_err();

        assert!(matches!(err, CodecError::BufferTooSmall { limit: 8 }));
        assert!(buf.is_empty());
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = JsonCodec.decode(b"{not json").unwrap_err();

        assert!(matches!(err, CodecError::Decode(_)));
    }
}
