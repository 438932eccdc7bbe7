//! Domain error types and fault classification.

use serde::{Deserialize, Serialize};

/// A parse error with position information for condition parsing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Fault family an error belongs to. Nodes that fail are aborted with this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    ExternalService,
    Validation,
    RuleSchema,
    Persistence,
    Config,
    Internal,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FaultKind::ExternalService => "ExternalServiceError",
            FaultKind::Validation => "ValidationError",
            FaultKind::RuleSchema => "RuleSchemaError",
            FaultKind::Persistence => "PersistenceError",
            FaultKind::Config => "ConfigError",
            FaultKind::Internal => "InternalError",
        };
        f.write_str(s)
    }
}

/// Top-level error type for tradeloop.
#[derive(Debug, thiserror::Error)]
pub enum TradeloopError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("{service} call failed: {reason}")]
    ExternalService { service: String, reason: String },

    #[error("{service} call timed out after {millis}ms")]
    Timeout { service: String, millis: u64 },

    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error(transparent)]
    ConditionParse(#[from] ParseError),

    #[error("invalid rule candidate: {reason}")]
    RuleSchema { reason: String },

    #[error("rule store error: {reason}")]
    RuleStore { reason: String },

    #[error("rule version {id} not found")]
    VersionNotFound { id: u64 },

    #[error("trade record {id} not found")]
    RecordNotFound { id: i64 },

    #[error("state slot '{slot}' already written")]
    SlotOccupied { slot: &'static str },

    #[error("internal error: {reason}")]
    Internal { reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TradeloopError {
    pub fn external(service: &str, reason: impl Into<String>) -> Self {
        TradeloopError::ExternalService {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            TradeloopError::ExternalService { .. } | TradeloopError::Timeout { .. } => {
                FaultKind::ExternalService
            }
            TradeloopError::Validation { .. } => FaultKind::Validation,
            TradeloopError::ConditionParse(_) | TradeloopError::RuleSchema { .. } => {
                FaultKind::RuleSchema
            }
            TradeloopError::Database { .. }
            | TradeloopError::DatabaseQuery { .. }
            | TradeloopError::RuleStore { .. }
            | TradeloopError::RecordNotFound { .. }
            | TradeloopError::VersionNotFound { .. }
            | TradeloopError::Serialization(_)
            | TradeloopError::Io(_) => FaultKind::Persistence,
            TradeloopError::ConfigParse { .. }
            | TradeloopError::ConfigMissing { .. }
            | TradeloopError::ConfigInvalid { .. } => FaultKind::Config,
            TradeloopError::SlotOccupied { .. } | TradeloopError::Internal { .. } => {
                FaultKind::Internal
            }
        }
    }
}

impl From<&TradeloopError> for std::process::ExitCode {
    fn from(err: &TradeloopError) -> Self {
        let code: u8 = match err.kind() {
            FaultKind::Internal => 1,
            FaultKind::Config => 2,
            FaultKind::Persistence => 3,
            FaultKind::RuleSchema | FaultKind::Validation => 4,
            FaultKind::ExternalService => 5,
        };
        std::process::ExitCode::from(code)
    }
}
