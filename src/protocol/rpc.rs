//! Stratum JSON-RPC message definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stratum request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Request ID
    pub id: String,
    /// Protocol version, always "2.0"
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Create a new request
    pub fn new(id: impl Into<String>, method: &str, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Stratum response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// ID of the request this responds to
    pub id: String,
    /// Protocol version, always "2.0"
    pub jsonrpc: String,
    /// Method of the request this responds to
    pub method: String,
    /// Result if successful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error if failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl RpcResponse {
    /// Create a successful response
    pub fn success(id: impl Into<String>, method: &str, result: Value) -> Self {
        Self {
            id: id.into(),
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: impl Into<String>, method: &str, err: RpcError) -> Self {
        Self {
            id: id.into(),
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            result: None,
            error: serde_json::to_value(err).ok(),
        }
    }

    /// Decode the error field, if present
    pub fn rpc_error(&self) -> Option<RpcError> {
        self.error
            .as_ref()
            .and_then(|e| serde_json::from_value(e.clone()).ok())
    }
}

/// Stratum error payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    /// Error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

impl RpcError {
    /// Create a new error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Generic Stratum message
#[derive(Debug, Clone)]
pub enum StratumMessage {
    /// Request (has a method, no result/error)
    Request(RpcRequest),
    /// Response to a request
    Response(RpcResponse),
}

impl StratumMessage {
    /// Parse a JSON line into a Stratum message
    ///
    /// Requests and responses both carry a `method` field on the grin
    /// stratum wire; a message with `result` or `error` is a response.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;

        if value.get("result").is_some() || value.get("error").is_some() {
            let response: RpcResponse = serde_json::from_value(value)?;
            Ok(StratumMessage::Response(response))
        } else {
            let request: RpcRequest = serde_json::from_value(value)?;
            Ok(StratumMessage::Request(request))
        }
    }

    /// Convert to a JSON line (no trailing newline)
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            StratumMessage::Request(req) => serde_json::to_string(req),
            StratumMessage::Response(resp) => serde_json::to_string(resp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_request() {
        let req = RpcRequest::new("Stratum", "getjobtemplate", None);
        assert_eq!(req.id, "Stratum");
        assert_eq!(req.jsonrpc, "2.0");
        assert_eq!(req.method, "getjobtemplate");

        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_rpc_response() {
        let ok = RpcResponse::success("1", "login", Value::String("ok".to_string()));
        assert!(ok.result.is_some());
        assert!(ok.error.is_none());

        let err = RpcResponse::error("1", "submit", RpcError::new(-32503, "Solution Submitted too late"));
        assert!(err.result.is_none());
        assert_eq!(
            err.rpc_error(),
            Some(RpcError::new(-32503, "Solution Submitted too late"))
        );
    }

    #[test]
    fn test_message_parsing() {
        let req_json = r#"{"id":"Stratum","jsonrpc":"2.0","method":"job","params":{"height":1,"job_id":2,"difficulty":1,"pre_pow":""}}"#;
        let msg = StratumMessage::from_json(req_json).unwrap();
        assert!(matches!(msg, StratumMessage::Request(_)));

        let resp_json = r#"{"id":"1","jsonrpc":"2.0","method":"login","result":"ok"}"#;
        let msg = StratumMessage::from_json(resp_json).unwrap();
        assert!(matches!(msg, StratumMessage::Response(_)));

        let err_json = r#"{"id":"1","jsonrpc":"2.0","method":"submit","error":{"code":-32501,"message":"Share rejected due to low difficulty"}}"#;
        let msg = StratumMessage::from_json(err_json).unwrap();
        match msg {
            StratumMessage::Response(resp) => {
                assert_eq!(resp.rpc_error().unwrap().code, -32501);
            }
            _ => panic!("expected a response"),
        }
    }
}
