use std::sync::Arc;

use thiserror::Error;

use crate::arena::ScopeId;

/// Structured "abandon the current output and substitute another" transfer.
/// Raised above the core and passed through push/resolution unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("redirect {status} to `{location}`: {message}")]
pub struct Redirection {
    pub status: u16,
    pub location: Arc<str>,
    pub message: Arc<str>,
}

impl Redirection {
    pub fn new(status: u16, location: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            location: location.into(),
            message: message.into().into(),
        }
    }
}

/// The three error tiers of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Expected control transfer, not an error of the core.
    Redirection,
    /// Corrupted context tree; continuing would return wrong cached data.
    Fatal,
    /// Reportable condition, evaluation of the current request can stop cleanly.
    Recoverable,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    #[error("definition `{0}` resolved to nothing and cannot be pushed")]
    NullDefinition(String),
    #[error("undefined definition `{0}`")]
    UndefinedDefinition(String),
    #[error("maximum context depth of {limit} exceeded")]
    DepthExceeded { limit: usize },
    #[error("pointer chain for `{key}` exceeds {limit} hops")]
    PointerChainTooLong { key: String, limit: usize },
    #[error("dereferencing `{name}` exceeds {limit} hops")]
    DereferenceLoop { name: String, limit: usize },
    #[error("pop on an empty context")]
    StackUnderflow,
    #[error("scope {0:?} is no longer live")]
    StaleScope(ScopeId),
    #[error("no unpushed scope to repush")]
    NothingToRepush,
    #[error("scope {0:?} was unpushed from a different stack")]
    RepushMismatch(ScopeId),
    #[error(transparent)]
    Redirect(#[from] Redirection),
}

impl ContextError {
    pub fn severity(&self) -> Severity {
        match self {
            ContextError::Redirect(_) => Severity::Redirection,
            ContextError::DepthExceeded { .. } | ContextError::UndefinedDefinition(_) => {
                Severity::Recoverable
            }
            ContextError::NullDefinition(_)
            | ContextError::PointerChainTooLong { .. }
            | ContextError::DereferenceLoop { .. }
            | ContextError::StackUnderflow
            | ContextError::StaleScope(_)
            | ContextError::NothingToRepush
            | ContextError::RepushMismatch(_) => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Convert a recoverable condition into a reportable redirection.
    /// Fatal errors are returned unchanged.
    pub fn into_redirection(self) -> Result<Redirection, ContextError> {
        match self {
            ContextError::Redirect(redirection) => Ok(redirection),
            ContextError::DepthExceeded { limit } => Ok(Redirection::new(
                500,
                "",
                format!("maximum context depth of {limit} exceeded, probably runaway recursion"),
            )),
            ContextError::UndefinedDefinition(name) => Ok(Redirection::new(
                404,
                &name,
                format!("undefined definition `{name}`"),
            )),
            fatal => Err(fatal),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}
