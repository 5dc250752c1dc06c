use crate::core::errors::EngineError;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;

/// Fields of a signed login request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedLogin {
    pub client_id: String,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

/// HMAC-SHA256 signer for websocket logins.
pub struct HmacSigner {
    api_key: String,
    secret_key: Secret<String>,
}

impl HmacSigner {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key: Secret::new(secret_key),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Hex-encoded HMAC-SHA256 of `payload`.
    pub fn sign(&self, payload: &[u8]) -> Result<String, EngineError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.expose_secret().as_bytes())
            .map_err(|e| EngineError::AuthenticationFailed(format!("Invalid secret key: {}", e)))?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signs `"{timestamp}\n{nonce}\n{data}"`, the client-signature grant layout.
    pub fn sign_client_signature(
        &self,
        timestamp_ms: i64,
        nonce: &str,
        data: &str,
    ) -> Result<SignedLogin, EngineError> {
        let timestamp = timestamp_ms.to_string();
        let payload = format!("{}\n{}\n{}", timestamp, nonce, data);
        Ok(SignedLogin {
            client_id: self.api_key.clone(),
            signature: self.sign(payload.as_bytes())?,
            timestamp,
            nonce: nonce.to_string(),
        })
    }
}

/// Random alphanumeric nonce.
pub fn generate_nonce(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
