//! # Actor Mesh
//!
//! > **A distributed actor runtime built on Tokio.**
//!
//! A node hosts named actors (stateful service instances), routes typed messages to them
//! and coordinates their placement across a cluster, so that exactly one instance of an
//! actor with a given name exists cluster-wide at any time. Callers talk to actors only
//! by message; whether the actor lives on this node or on a peer is hidden behind an
//! [`ActorProxy`](actor::ActorProxy).
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Fibers instead of one task per actor
//!
//! Each actor owns a [`Fiber`](fiber::Fiber): a scheduler that grades every handler with a
//! lock. Write handlers run alone and in arrival order; Read handlers fan out next to each
//! other; None handlers bypass the queue. Read-only queries therefore never queue behind
//! each other while mutations keep sequential consistency.
//!
//! ### Pipelines instead of hand-written message loops
//!
//! Incoming operations go through a [`Processor`](pipeline::Processor) folded from stages
//! (tracing, fiber binding, dispatch, idle disconnect). Dispatch looks handlers up by the
//! tag of a closed protocol enum declared with [`protocol!`], never by runtime type.
//!
//! ### Agreement by delivery order
//!
//! The [`ReplicatedCoordinator`](coordination::ReplicatedCoordinator) never locks a name
//! before creating it. Creations race, every member sees the `ActorCreated` broadcasts in
//! one total order, and the first one delivered wins everywhere.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. Execution ([`fiber`], [`pipeline`])
//! - **Key items**: [`ReadWriteFiber`](fiber::ReadWriteFiber), [`PollingFiber`](fiber::PollingFiber),
//!   [`PipelineBuilder`](pipeline::PipelineBuilder), [`HandlerConfig`](pipeline::HandlerConfig).
//!
//! ### 2. Actors ([`actor`], [`message`])
//! - **Role**: Separates the *business state* (your [`ActorEntity`](actor::ActorEntity)) from
//!   the *plumbing* (fiber, pipeline, identity, disposal).
//! - **Key items**: [`ActorRepository`](actor::ActorRepository), [`ActorProxy`](actor::ActorProxy),
//!   [`Protocol`](message::Protocol).
//!
//! ### 3. Cluster ([`coordination`], [`channel`], [`transport`])
//! - **Role**: Name resolution across nodes, request/reply correlation over peer connections.
//! - **Key items**: [`ActorCoordinator`](coordination::ActorCoordinator),
//!   [`GroupHub`](coordination::GroupHub), [`NetChannel`](channel::NetChannel).
//!
//! ### 4. The Orchestrator ([`lifecycle`])
//! - **Role**: Wires a repository, coordinators and peer channels into a running [`Node`](lifecycle::Node).
//! - **Key items**: [`Node`](lifecycle::Node), [`setup_tracing`](lifecycle::setup_tracing).
//!
//! ## 👩‍💻 Architecture Notes
//!
//! ### 1. Type-Safe Error Handling
//! Every fallible call returns [`Result`] with a [`RuntimeError`]. Contract-level failures
//! carry an [`ErrorCode`] and cross the wire as error replies; timeouts reach only the
//! caller that was waiting.
//!
//! ### 2. Long awaits inside Write handlers
//! A Write handler suspended at an `.await` keeps its actor exclusive until it completes.
//! That is the price of sequential consistency; move slow I/O into Read or None handlers.
//!
//! ### 3. Observability
//! `tracing` everywhere with structured fields. See [`lifecycle::tracing`].
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Three in-process nodes hosting chat rooms
//! RUST_LOG=info cargo run
//!
//! cargo test
//! ```

pub mod actor;
pub mod channel;
pub mod config;
pub mod coordination;
pub mod error;
pub mod fiber;
pub mod lifecycle;
pub mod message;
pub mod pipeline;
pub mod transport;

pub use config::RuntimeConfig;
pub use error::{ErrorCode, Result, RuntimeError};

#[doc(hidden)]
pub mod __private {
    pub use paste::paste;
}
