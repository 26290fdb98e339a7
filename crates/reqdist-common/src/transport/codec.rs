use crate::protocol::error::{ReqdistError, Result};
use crate::protocol::{Request, Response};

/// JSON codec for protocol envelopes.
///
/// # Example
///
/// ```
/// use reqdist_common::protocol::{Call, Request, Response};
/// use reqdist_common::transport::JsonCodec;
/// use serde_json::json;
///
/// let request = Request::new(Call::Describe);
/// let encoded = JsonCodec::encode_request(&request).unwrap();
/// assert_eq!(JsonCodec::decode_request(&encoded).unwrap(), request);
///
/// let response = Response::success(request.id, json!("ok"));
/// let encoded = JsonCodec::encode_response(&response).unwrap();
/// assert_eq!(JsonCodec::decode_response(&encoded).unwrap(), response);
/// ```
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    pub fn decode_request(data: &[u8]) -> Result<Request> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    /// Decodes a response frame.
    ///
    /// A frame that does not parse means the peer is broken, so this reports
    /// `InvalidResponse` rather than a serialization error.
    pub fn decode_response(data: &[u8]) -> Result<Response> {
        serde_json::from_slice(data)
            .map_err(|e| ReqdistError::InvalidResponse(format!("malformed response: {}", e)))
    }
}
