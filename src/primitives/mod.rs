use serde::{Deserialize, Serialize};

pub mod bls;

/// Path serving off-chain data by hash, followed by `/{hash}`.
pub const OFFCHAIN_DATA_PATH: &str = "/api/v1/offchain_data";
/// Path accepting signing requests for a [`crate::Sequence`].
pub const SIGN_SEQUENCE_PATH: &str = "/api/v1/sign_sequence";
/// Path serving the node [`crate::Status`].
pub const STATUS_PATH: &str = "/api/v1/status";

/// Machine readable error kind carried by every non-2xx member response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The requested data is not stored by this member.
    NotFound,
    /// The request could not be parsed or is malformed.
    BadRequest,
    /// Some submitted value does not hash to its key.
    InvalidData,
    /// The submitted sequence does not match what the trusted sequencer proposed.
    SequenceMismatch,
    /// The member's view of the sequencer is too old to sign against.
    StaleView,
    /// The request did not complete in time.
    Timeout,
    /// Storage failure on the member side.
    Internal,
}

/// Body of every non-2xx member response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// The error kind.
    pub error: ErrorCode,
    /// Human readable details.
    pub message: String,
}

impl ErrorResponse {
    /// Creates a new error response.
    pub fn new(error: ErrorCode, message: impl ToString) -> Self {
        Self { error, message: message.to_string() }
    }
}
