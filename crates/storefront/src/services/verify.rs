//! Backend verification of host login tokens.
//!
//! The optional verification endpoint receives `POST {"token": ...}` and
//! answers with a partial profile. Any failure means the verified source
//! contributes nothing to the merge.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;
use url::Url;

use crate::config::VerifyConfig;
use crate::models::PartialProfile;

/// Verification failures. Never fatal to a login.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The endpoint could not be reached or timed out.
    #[error("verification unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("verification rejected with status {0}")]
    Rejected(u16),
}

/// Exchanges a host login token for a verified partial profile.
#[async_trait]
pub trait ProfileVerifier: Send + Sync {
    /// Verify `token` and return the profile fields the backend vouches for.
    async fn verify(&self, token: &str) -> Result<PartialProfile, VerifyError>;
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

/// [`ProfileVerifier`] over HTTP.
#[derive(Clone)]
pub struct HttpVerifier {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpVerifier {
    /// Create a verifier for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Unavailable` if the HTTP client cannot be built.
    pub fn new(config: &VerifyConfig) -> Result<Self, VerifyError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl ProfileVerifier for HttpVerifier {
    #[instrument(skip(self, token), fields(endpoint = %self.endpoint))]
    async fn verify(&self, token: &str) -> Result<PartialProfile, VerifyError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&VerifyRequest { token })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::Rejected(status.as_u16()));
        }

        Ok(response.json::<PartialProfile>().await?)
    }
}
