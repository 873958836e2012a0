use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PropertyNotFound,
    Binding,
    Listener,
    Transport,
    Lifecycle,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            _ => 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorView {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorView {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("no property '{property}' on {type_name}")]
    PropertyNotFound {
        property: String,
        type_name: &'static str,
    },
    #[error("cannot bind '{path}': {reason}")]
    Binding { path: String, reason: String },
    #[error("listener on '{control}' failed: {message}")]
    Listener { control: String, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("control tree still growing after {passes} init passes")]
    InitLimit { passes: usize },
    #[error("forward chain exceeded {limit} hops at '{path}'")]
    ForwardLimit { limit: usize, path: String },
}

impl EngineError {
    pub fn binding(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Binding {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn listener(control: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Listener {
            control: control.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::PropertyNotFound { .. } => ErrorCode::PropertyNotFound,
            EngineError::Binding { .. } => ErrorCode::Binding,
            EngineError::Listener { .. } => ErrorCode::Listener,
            EngineError::Transport(_) => ErrorCode::Transport,
            EngineError::IllegalTransition { .. }
            | EngineError::InitLimit { .. }
            | EngineError::ForwardLimit { .. } => ErrorCode::Lifecycle,
        }
    }
}

impl From<EngineError> for ErrorView {
    fn from(value: EngineError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
        }
    }
}
