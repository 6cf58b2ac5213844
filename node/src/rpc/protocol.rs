//! The JSON-RPC 2.0 wire types (`spec.md` §6.1). Every response carries
//! `{jsonrpc, id, result|error}`; a double newline terminates each response
//! so a non-parsing client can still demarcate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RpcError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn failure(id: Value, error: &RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ErrorObject { code: error.code(), message: error.to_string() }),
        }
    }

    /// Serialize with the trailing `\n\n` frame terminator.
    pub fn to_framed_string(&self) -> String {
        let mut s = serde_json::to_string(self).expect("Response is always serializable");
        s.push_str("\n\n");
        s
    }
}
