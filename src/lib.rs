//! Conductor drives a multi-component task to completion.
//!
//! Components are layered into dependency-ordered waves and run
//! concurrently inside a wave. Each component moves through
//! `SKELETON -> IMPLEMENT -> VALIDATE -> TEST -> DOCUMENT -> COMPLETE`,
//! with a checkpoint on every forward transition and a multi-reviewer
//! validation gate at `VALIDATE`. Failing gates are remediated within a fix budget,
//! then decided by a judge vote. Sessions persist across restarts.

pub mod checkpoint;
pub mod conductor_config;
pub mod config;
pub mod consensus;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
pub mod review;
pub mod session;
pub mod store;
pub mod task;
pub mod worker;
