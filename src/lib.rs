//! # Waygate: Durable Workflow Execution Engine
//!
//! Waygate runs fixed, ordered multi-step "routes" against incoming
//! exchanges, checkpointing progress after every step so a crash or
//! restart can resume exactly where it left off instead of re-running
//! side effects. Routes can pause for human approval (blocking or
//! non-blocking) before continuing.
//!
//! ## Core Concepts
//!
//! - **Exchange**: one run of a route, tracked through a state machine
//!   (`PENDING -> RUNNING -> {PAUSED, WAITING_APPROVAL, COMPLETED, FAILED, CANCELLED}`).
//! - **Route**: a fixed, ordered list of [`route::Step`]s.
//! - **Checkpoint**: a durable record that a step has completed, keyed by
//!   `(exchange_id, step_name)` so re-execution is a no-op.
//! - **Approval gate**: a step that suspends an exchange for a human
//!   decision, either blocking the executing task or returning control
//!   immediately.
//! - **Event bus**: fans out lifecycle events to registered sinks,
//!   buffering before the first sink attaches.
//!
//! ## Module Guide
//!
//! - [`error`] - crate-wide error type
//! - [`config`] - environment-driven engine configuration
//! - [`event_bus`] - event types, sinks, and the bus itself
//! - [`store`] - SQLite persistence layer
//! - [`exchange`] - exchange state machine
//! - [`approval`] - approval gate service
//! - [`route`] - step/route definitions and the execution engine
//! - [`recovery`] - crash recovery and background tickers
//! - [`llm`] - LLM chat client contract and adapter
//! - [`api`] - HTTP/SSE surface

pub mod api;
pub mod approval;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod exchange;
pub mod llm;
pub mod recovery;
pub mod route;
pub mod store;
