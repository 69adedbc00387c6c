//! # Observability & Tracing
//!
//! This module provides the tracing setup for a node and documents what the runtime logs.
//!
//! ## Configuration
//!
//! [`setup_tracing`] installs a compact `tracing-subscriber` formatter filtered by
//! `RUST_LOG`. Module paths are hidden (`with_target(false)`): log lines carry structured
//! fields such as `node`, `key` and `actor_type` instead.
//!
//! ```bash
//! # Lifecycle only
//! RUST_LOG=info cargo run
//!
//! # Per-operation flow: dispatch, cache hits, request correlation
//! RUST_LOG=debug cargo run
//!
//! # Only the coordinators
//! RUST_LOG=info,actor_mesh::coordination=debug cargo run
//! ```
//!
//! ## What Gets Traced
//!
//! - **Lifecycle** (`info`): actor created/disposed, coordinator joined/ready, view changes,
//!   peers attached, channels closed
//! - **Operation flow** (`debug`): name map hits, requests sent and correlated
//! - **Dropped input** (`warn`): replies for unknown requests, undecodable bytes,
//!   duplicate creations, replies to one-way messages
//! - **Handler failures** (`error`): caught at the channel boundary and turned into
//!   error replies
//!
//! Channel pipelines open an `operation` span per message (see
//! [`PipelineBuilder::use_tracing`](crate::pipeline::PipelineBuilder::use_tracing)), so
//! everything a handler logs is nested under the operation that caused it:
//!
//! ```text
//!  INFO Actor created name="room1" key=2/1 actor_type="ChatRoom" size=1
//! DEBUG Actor added name="room1" key=2/1
//!  INFO operation{label="net" kind=Post activity_id=…}: Message posted room="room1" count=1
//! ```

/// Installs the global subscriber. Call once, at process start.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
