//! Compute backends that perform the actual inference
//!
//! The gateway never scores images itself. A backend is either a sibling HTTP
//! service or a script spawned per request; both return the same JSON shape.

mod http;
mod invoker;
mod process;

pub use http::HttpBackend;
pub use invoker::{create_invoker, BackendConfig, BackendInvoker};
pub use process::ProcessBackend;

use crate::error::BackendError;
use crate::model::Prediction;

/// Offset of the prediction in script output.
///
/// The script may print diagnostics (for example a failed labels download)
/// before the JSON document, so the payload starts at the last line opening
/// with `{`. Output without such a line is returned whole.
fn prediction_start(output: &[u8]) -> usize {
    let mut start = 0;
    let mut offset = 0;
    for line in output.split_inclusive(|b| *b == b'\n') {
        if line.first() == Some(&b'{') {
            start = offset;
        }
        offset += line.len();
    }
    start
}

/// Check that a backend response looks like a prediction.
fn validate_payload(body: &[u8]) -> Result<(), BackendError> {
    serde_json::from_slice::<Prediction>(body)
        .map(|_| ())
        .map_err(|e| {
            let text = String::from_utf8_lossy(body);
            BackendError::Malformed(format!("{} (body: {})", e, text.trim()))
        })
}
