//! JSON-RPC error codes (`spec.md` §6.1: "Errors use a repository-private
//! numeric space"), grounded on the teacher's `command/server::ApiError`
//! pattern of wrapping a `thiserror` enum behind a stable numeric code.

use thiserror::Error;

use crate::error::UserError;

/// The repository-private JSON-RPC error code space.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    User(#[from] UserError),
    #[error("{0}")]
    InvalidParams(String),
    #[error("unknown method {0}")]
    UnknownMethod(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RpcError {
    /// `-1` is the generic LIGHTNINGD error; `-32602` is the standard
    /// JSON-RPC "invalid params" code; `-32601` is "method not found".
    pub fn code(&self) -> i64 {
        match self {
            Self::User(_) => -1,
            Self::InvalidParams(_) => -32602,
            Self::UnknownMethod(_) => -32601,
            Self::Internal(_) => -1,
        }
    }
}
