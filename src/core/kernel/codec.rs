use crate::core::errors::EngineError;
use crate::core::kernel::correlator::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

pub const JSON_RPC_VERSION: &str = "2.0";

/// Outbound request envelope.
#[derive(Debug, Serialize)]
pub struct RequestEnvelope<'a, P: Serialize> {
    pub jsonrpc: &'a str,
    pub id: RequestId,
    pub method: &'a str,
    pub params: P,
}

/// Error object attached to a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Channel push parameters; heartbeats reuse the same object with `type`.
#[derive(Debug, Deserialize)]
pub struct PushParams {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Inbound envelope: a correlated response (`id` set) or an unsolicited
/// push (`params.channel` set).
#[derive(Debug, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Box<RawValue>>,
    #[serde(default)]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub params: Option<PushParams>,
}

impl ResponseEnvelope {
    pub fn channel(&self) -> Option<&str> {
        self.params.as_ref().and_then(|p| p.channel.as_deref())
    }

    /// The venue result, or its error object as `Api`.
    pub fn into_result(self) -> Result<Box<RawValue>, EngineError> {
        if let Some(error) = self.error {
            return Err(EngineError::Api {
                code: error.code,
                message: error.message,
            });
        }
        match self.result {
            Some(result) => Ok(result),
            None => Ok(RawValue::from_string("null".to_string())?),
        }
    }

    /// True for id-0 frames acknowledging a control call with `"ok"`.
    pub fn is_ok_ack(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.get() == "\"ok\"")
    }
}

/// JSON-RPC framing shared by all sessions.
#[derive(Debug, Clone)]
pub struct JsonRpcCodec {
    version: &'static str,
}

impl Default for JsonRpcCodec {
    fn default() -> Self {
        Self {
            version: JSON_RPC_VERSION,
        }
    }
}

impl JsonRpcCodec {
    pub fn encode_request<P: Serialize>(
        &self,
        id: RequestId,
        method: &str,
        params: &P,
    ) -> Result<Vec<u8>, EngineError> {
        let envelope = RequestEnvelope {
            jsonrpc: self.version,
            id,
            method,
            params,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    pub fn decode(&self, frame: &[u8]) -> Result<ResponseEnvelope, EngineError> {
        serde_json::from_slice(frame).map_err(|e| {
            EngineError::MalformedData(format!(
                "could not parse frame ({}): {}",
                e,
                String::from_utf8_lossy(frame)
            ))
        })
    }
}
