//! # Runtime Errors
//!
//! This module defines the error taxonomy shared by every layer of the runtime.
//! Errors fall into three groups:
//!
//! - **Contract-level failures** ([`RuntimeError::Processing`]): expected failures carrying an
//!   [`ErrorCode`]. They travel over the wire as error replies instead of tearing down a channel.
//! - **Timeouts** ([`RuntimeError::Timeout`], [`RuntimeError::CoordinationTimeout`]): surfaced
//!   only to the caller that was waiting.
//! - **Infrastructure failures**: stopped fibers, closed channels, unknown actor types, codec
//!   errors. Each one is isolated to the operation that hit it.

use crate::actor::{ActorKey, ContractId, NodeId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Crate-wide result alias.
pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

/// Wire-level error codes carried by error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    DispatcherFuncNotFound,
    NonExistentActor,
    NonAuthorized,
    ConnectionFailed,
    OperationTimeout,
    Unknown,
    /// Codes defined by application protocols.
    Application(u16),
}

/// Errors that can occur within the actor runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("processing failed ({code:?}): {description}")]
    Processing { code: ErrorCode, description: String },

    #[error("request {request_id} expired after {after:?}")]
    Timeout { request_id: Uuid, after: Duration },

    #[error("actor {name} was not observed after {attempts} attempt(s)")]
    CoordinationTimeout { name: String, attempts: u32 },

    #[error("fiber was stopped")]
    FiberStopped,

    #[error("fiber queue is full")]
    FiberOverloaded,

    #[error("net channel was closed")]
    ChannelClosed,

    #[error("no actor type registered with primary contract {0}")]
    UnknownActorType(ContractId),

    #[error("primary contract {0} registered twice")]
    DuplicateContract(ContractId),

    #[error("no coordinator started for contract {0}")]
    UnknownCoordinator(ContractId),

    #[error("no channel to node {0}")]
    NoRoute(NodeId),

    #[error("actor {0} is not present on this node")]
    NonExistentActor(ActorKey),

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("coordinator is shut down")]
    CoordinatorClosed,

    #[error("serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl RuntimeError {
    /// Shorthand for a contract-level failure.
    pub fn processing(code: ErrorCode, description: impl Into<String>) -> Self {
        RuntimeError::Processing {
            code,
            description: description.into(),
        }
    }

    /// The code used when this error is translated into an error reply.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RuntimeError::Processing { code, .. } => *code,
            RuntimeError::NonExistentActor(_) => ErrorCode::NonExistentActor,
            RuntimeError::Timeout { .. }
            | RuntimeError::CoordinationTimeout { .. }
            | RuntimeError::FiberStopped => ErrorCode::OperationTimeout,
            RuntimeError::NoRoute(_) | RuntimeError::ChannelClosed => ErrorCode::ConnectionFailed,
            _ => ErrorCode::Unknown,
        }
    }

    /// Whether this is a contract-level failure with the given code.
    pub fn is_code(&self, expected: ErrorCode) -> bool {
        matches!(self, RuntimeError::Processing { code, .. } if *code == expected)
    }
}
