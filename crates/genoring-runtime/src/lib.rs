//! Container runtime layer for GenoRing.
//!
//! This crate implements the execution layer: the `ContainerRuntime` trait
//! with a compose CLI backend (`ComposeRuntime`) and an in-memory backend
//! for tests (`MockRuntime`), the explicit `ExecutionContext` threaded into
//! every hook and subprocess call, container states and run modes, and
//! prerequisite checking.

pub mod backend;
pub mod compose;
pub mod exec;
pub mod mock;
pub mod prereq;

pub use backend::{select_runtime, CommandOutput, ContainerRuntime, ContainerState, Mode};
pub use compose::ComposeRuntime;
pub use exec::{ExecutionContext, Platform};
pub use mock::{MockRuntime, RuntimeCall};
pub use prereq::{check_compose_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("container '{0}' is not running")]
    NotRunning(String),
    #[error("{command} failed with exit code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("unexpected runtime output: {0}")]
    ParseOutput(String),
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
}
