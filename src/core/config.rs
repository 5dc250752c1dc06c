use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;

/// Venue connection settings and credentials.
///
/// Credentials are only consulted when authenticated endpoints are enabled;
/// a config without them still streams every public channel.
#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub api_key: Secret<String>,
    pub secret_key: Secret<String>,
    pub testnet: bool,
    pub ws_url: Option<String>,
    pub authenticated_endpoints: bool,
}

// Credentials never leave the process through serialization
impl Serialize for VenueConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("VenueConfig", 5)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("secret_key", "[REDACTED]")?;
        state.serialize_field("testnet", &self.testnet)?;
        state.serialize_field("ws_url", &self.ws_url)?;
        state.serialize_field("authenticated_endpoints", &self.authenticated_endpoints)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for VenueConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct VenueConfigHelper {
            #[serde(default)]
            api_key: String,
            #[serde(default)]
            secret_key: String,
            #[serde(default)]
            testnet: bool,
            ws_url: Option<String>,
            authenticated_endpoints: Option<bool>,
        }

        let helper = VenueConfigHelper::deserialize(deserializer)?;
        let has_credentials = !helper.api_key.is_empty() && !helper.secret_key.is_empty();
        Ok(Self {
            api_key: Secret::new(helper.api_key),
            secret_key: Secret::new(helper.secret_key),
            testnet: helper.testnet,
            ws_url: helper.ws_url,
            authenticated_endpoints: helper.authenticated_endpoints.unwrap_or(has_credentials),
        })
    }
}

impl VenueConfig {
    /// Configuration with credentials; authenticated endpoints are enabled.
    #[must_use]
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
            testnet: false,
            ws_url: None,
            authenticated_endpoints: true,
        }
    }

    /// Public market data only.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            api_key: Secret::new(String::new()),
            secret_key: Secret::new(String::new()),
            testnet: false,
            ws_url: None,
            authenticated_endpoints: false,
        }
    }

    /// Reads `{PREFIX}_API_KEY`, `{PREFIX}_SECRET_KEY`, and the optional
    /// `{PREFIX}_TESTNET` and `{PREFIX}_WS_URL`.
    pub fn from_env(venue_prefix: &str) -> Result<Self, ConfigError> {
        let prefix = venue_prefix.to_uppercase();
        let api_key_var = format!("{}_API_KEY", prefix);
        let secret_key_var = format!("{}_SECRET_KEY", prefix);

        let api_key = env::var(&api_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_key_var))?;
        let secret_key = env::var(&secret_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(secret_key_var))?;

        let testnet = match env::var(format!("{}_TESTNET", prefix)) {
            Ok(raw) => raw.parse::<bool>().map_err(|_| {
                ConfigError::InvalidConfiguration(format!(
                    "{}_TESTNET must be true or false, got {:?}",
                    prefix, raw
                ))
            })?,
            Err(_) => false,
        };

        Ok(Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
            testnet,
            ws_url: env::var(format!("{}_WS_URL", prefix)).ok(),
            authenticated_endpoints: true,
        })
    }

    /// Loads `.env` (if present) before reading the environment.
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(venue_prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(venue_prefix, ".env")
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(
        venue_prefix: &str,
        env_file_path: &str,
    ) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            // missing file falls through to the process environment
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(venue_prefix)
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.expose_secret().is_empty() && !self.secret_key.expose_secret().is_empty()
    }

    /// Whether the session should attempt a login after dialing.
    #[must_use]
    pub fn wants_authentication(&self) -> bool {
        self.authenticated_endpoints && self.has_credentials()
    }

    #[must_use]
    pub const fn testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    #[must_use]
    pub fn ws_url(mut self, ws_url: String) -> Self {
        self.ws_url = Some(ws_url);
        self
    }

    #[must_use]
    pub const fn authenticated_endpoints(mut self, enabled: bool) -> Self {
        self.authenticated_endpoints = enabled;
        self
    }

    /// Resolved endpoint: explicit URL, otherwise the venue default for the
    /// selected network.
    pub fn endpoint(&self, mainnet: &str, testnet: &str) -> String {
        self.ws_url.clone().unwrap_or_else(|| {
            if self.testnet {
                testnet.to_string()
            } else {
                mainnet.to_string()
            }
        })
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get secret key (use carefully - exposes secret)
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
