use std::time::Duration;

use alloy::primitives::{keccak256, Bytes, B256};
use async_trait::async_trait;
use blst::min_pk::Signature as BlsSignature;
use reqwest::{Response, StatusCode};
use tracing::{debug, instrument, trace};
use url::Url;

use crate::{
    common::{ClientError, Sequence},
    primitives::{
        bls::signature_from_bytes, ErrorCode, ErrorResponse, OFFCHAIN_DATA_PATH,
        SIGN_SEQUENCE_PATH, STATUS_PATH,
    },
    status::Status,
};

use super::PeerClient;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// An HTTP client for committee members.
#[derive(Debug, Clone)]
pub struct MemberClient {
    http: reqwest::Client,
}

impl MemberClient {
    /// Create a new client with the default request timeout.
    pub fn new() -> Result<Self, ClientError> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    /// Create a new client whose requests fail after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Read the status of the member at `url`.
    #[instrument(skip(self))]
    pub async fn status(&self, url: &str) -> Result<Status, ClientError> {
        let response = self.http.get(endpoint(url, STATUS_PATH)?).send().await?;
        let response = check(response).await?;

        response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PeerClient for MemberClient {
    #[instrument(skip(self))]
    async fn get_offchain_data(&self, url: &str, hash: B256) -> Result<Bytes, ClientError> {
        let path = format!("{OFFCHAIN_DATA_PATH}/{hash}");
        let response = self.http.get(endpoint(url, &path)?).send().await?;
        let value = check(response).await?.bytes().await?;

        if keccak256(&value) != hash {
            return Err(ClientError::InvalidResponse(format!(
                "value of {} bytes does not hash to {hash}",
                value.len()
            )));
        }

        trace!(len = value.len(), "Fetched off-chain data");
        Ok(value.into())
    }

    #[instrument(skip(self, sequence), fields(batch_number = sequence.batch_number))]
    async fn sign_sequence(
        &self,
        url: &str,
        sequence: &Sequence,
    ) -> Result<BlsSignature, ClientError> {
        let response =
            self.http.post(endpoint(url, SIGN_SEQUENCE_PATH)?).json(sequence).send().await?;
        let bytes = check(response).await?.bytes().await?;

        let signature = signature_from_bytes(&bytes).ok_or_else(|| {
            ClientError::InvalidResponse(format!("{} bytes are not a BLS signature", bytes.len()))
        })?;

        debug!("Received sequence signature");
        Ok(signature)
    }
}

fn endpoint(base: &str, path: &str) -> Result<Url, ClientError> {
    Ok(Url::parse(base)?.join(path)?)
}

/// Passes through successful responses and turns every other one into an error.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.bytes().await?;
    Err(classify(status, &body))
}

fn classify(status: StatusCode, body: &[u8]) -> ClientError {
    let Ok(ErrorResponse { error, message }) = serde_json::from_slice::<ErrorResponse>(body)
    else {
        return match status {
            StatusCode::NOT_FOUND => ClientError::NotFound,
            _ => ClientError::Remote {
                status: status.as_u16(),
                message: String::from_utf8_lossy(body).into_owned(),
            },
        };
    };

    match error {
        ErrorCode::NotFound => ClientError::NotFound,
        ErrorCode::BadRequest => ClientError::BadRequest(message),
        ErrorCode::InvalidData => ClientError::InvalidData(message),
        ErrorCode::SequenceMismatch => ClientError::SequenceMismatch(message),
        ErrorCode::StaleView => ClientError::StaleView(message),
        ErrorCode::Timeout | ErrorCode::Internal => {
            ClientError::Remote { status: status.as_u16(), message }
        }
    }
}
