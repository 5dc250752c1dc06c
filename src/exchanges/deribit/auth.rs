use super::types::{DeribitAuthParams, DeribitAuthResult};
use crate::core::errors::EngineError;
use crate::core::kernel::signer::{generate_nonce, HmacSigner};
use crate::core::traits::Authenticator;
use async_trait::async_trait;
use serde_json::value::RawValue;
use serde_json::Value;
use tracing::info;

const AUTH_METHOD: &str = "public/auth";
const NONCE_LEN: usize = 16;

/// `client_signature` grant: HMAC-SHA256 over `timestamp\nnonce\n`.
pub struct DeribitAuthenticator {
    signer: HmacSigner,
}

impl DeribitAuthenticator {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            signer: HmacSigner::new(api_key, secret_key),
        }
    }

    pub fn params_at(&self, timestamp_ms: i64, nonce: &str) -> Result<DeribitAuthParams, EngineError> {
        let login = self.signer.sign_client_signature(timestamp_ms, nonce, "")?;
        Ok(DeribitAuthParams {
            grant_type: "client_signature",
            client_id: login.client_id,
            timestamp: login.timestamp,
            nonce: login.nonce,
            signature: login.signature,
            data: String::new(),
        })
    }
}

#[async_trait]
impl Authenticator for DeribitAuthenticator {
    async fn login_request(&self) -> Result<(String, Value), EngineError> {
        let now = chrono::Utc::now().timestamp_millis();
        let params = self.params_at(now, &generate_nonce(NONCE_LEN))?;
        Ok((AUTH_METHOD.to_string(), serde_json::to_value(params)?))
    }

    fn accept_login(&self, result: &RawValue) -> Result<(), EngineError> {
        let grant: DeribitAuthResult = serde_json::from_str(result.get())
            .map_err(|e| EngineError::malformed(format!("auth result: {}", e)))?;
        if grant.access_token.is_empty() {
            return Err(EngineError::AuthenticationFailed(
                "venue returned an empty access token".to_string(),
            ));
        }
        info!(
            scope = grant.scope.as_deref().unwrap_or_default(),
            expires_in = grant.expires_in.unwrap_or_default(),
            "access token granted"
        );
        Ok(())
    }
}
