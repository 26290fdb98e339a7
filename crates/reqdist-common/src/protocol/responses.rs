//! Response envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{Fault, ReqdistError, Result};
use super::RequestId;

/// A response to a [`Request`](super::Request).
///
/// A response without a fault succeeded, whatever its `result`, so a `null`
/// result stays a success. Faults keep the error kind so the caller can tell
/// a processing failure from a refused call.
///
/// # Example
///
/// ```
/// use reqdist_common::protocol::{ReqdistError, Response};
/// use serde_json::json;
///
/// let ok = Response::success(7, json!([2, 3, 5]));
/// assert_eq!(ok.into_result().unwrap(), json!([2, 3, 5]));
///
/// let failed = Response::error(8, &ReqdistError::Processing("bad input".into()));
/// assert!(matches!(failed.into_result(), Err(ReqdistError::Processing(_))));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Result value, `null` on error
    #[serde(default)]
    pub result: Value,
    /// Failure (present on error)
    pub fault: Option<Fault>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Response {
            id,
            result,
            fault: None,
        }
    }

    pub fn error(id: RequestId, error: &ReqdistError) -> Self {
        Response {
            id,
            result: Value::Null,
            fault: Some(error.to_fault()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.fault.is_none()
    }

    /// Turns the response back into the outcome the remote side produced.
    pub fn into_result(self) -> Result<Value> {
        match self.fault {
            Some(fault) => Err(fault.into()),
            None => Ok(self.result),
        }
    }
}
