//! # AOF — Agent Orchestration Filesystem control plane
//!
//! A content-addressed, directory-partitioned task store plus a scheduler
//! that routes tasks to agent executors under lease, dependency, and
//! throttle constraints, with an optional multi-gate review workflow
//! layered on top.
//!
//! ## Architecture
//!
//! - **Task Store** (`store`): sole authority for task persistence; status
//!   is encoded as the directory a task's record lives in.
//! - **Event Log** (`event_log`): append-only, daily-partitioned record of
//!   every state change and scheduler decision.
//! - **Dependency Analyzer** (`analyzer`): pure function computing blocked
//!   subtasks, circular dependencies, and resource occupancy.
//! - **Throttle Controller** (`throttle`): global/per-team concurrency caps
//!   and dispatch-interval gating.
//! - **Lease Manager** (`lease`): exclusive, time-bounded holds on
//!   in-progress tasks, with background renewal.
//! - **Dispatch Planner** (`planner`): eligibility filtering and ordering
//!   of ready tasks into planned actions.
//! - **Gate Engine** (`gate`): multi-gate review state machine layered on
//!   task status.
//! - **Scheduler** (`scheduler`): the poll loop tying every component
//!   together into one tick.
//!
//! The thing that actually executes an agent's work is out of scope for
//! this crate; `executor::Executor` is the trait seam a caller implements.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod event_log;
pub mod executor;
pub mod gate;
pub mod lease;
pub mod manifest;
pub mod model;
pub mod planner;
pub mod scheduler;
pub mod store;
pub mod throttle;

pub use error::{AofError, Result};
