//! Core orchestration engine for GenoRing.
//!
//! This crate ties the module registry, the compose assembler, the hook
//! orchestrator, and a container runtime together into the [`Engine`], the
//! central API behind every lifecycle verb. Each verb runs as a transaction
//! (see [`operation`]) that stops the system, runs hooks, regenerates the
//! compose documents, and rolls everything back when a step fails.

pub mod alternatives;
pub mod assemble;
pub mod concurrency;
pub mod deps;
pub mod engine;
pub mod environment;
pub mod hooks;
pub mod merge;
pub mod operation;
pub mod state;

pub use assemble::{Assembler, Assembly, AssembledService, AssembledVolume};
pub use concurrency::{install_signal_handler, shutdown_requested, ProjectLock};
pub use engine::{Engine, ModuleStatusReport, StatusReport, BASE_MODULE, ENGINE_VERSION};
pub use hooks::{
    HookHandle, HookOrchestrator, HookOutcome, HookRegistry, HookReport, HookResult, HookTarget,
};
pub use operation::{HookStep, OperationContext, OperationReport};
pub use state::{
    module_state, system_state, wait_ready, Clock, ManualClock, NoPrompt, Prompt, SystemClock,
    SystemState,
};

use genoring_schema::Version;
use genoring_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("descriptor error: {0}")]
    Descriptor(#[from] genoring_schema::DescriptorError),
    #[error("environment file error: {0}")]
    EnvFile(#[from] genoring_schema::EnvFileError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] genoring_runtime::RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid compose fragment {}: {reason}", path.display())]
    Fragment { path: PathBuf, reason: String },
    #[error("failed to render compose document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("service '{service}' is defined by both '{first}' and '{second}'")]
    DuplicateService {
        service: String,
        first: String,
        second: String,
    },
    #[error(
        "volume '{volume}': '{first_module}' declares {first_version} but '{second_module}' \
         declares {second_version}; major versions must match"
    )]
    VolumeMajorConflict {
        volume: String,
        first_module: String,
        first_version: Version,
        second_module: String,
        second_version: Version,
    },
    #[error("start-order cycle in profile '{profile}': {}", services.join(" -> "))]
    DependencyCycle {
        profile: String,
        services: Vec<String>,
    },
    #[error("module not found: {0}")]
    ModuleNotFound(String),
    #[error("module '{0}' is already enabled")]
    AlreadyEnabled(String),
    #[error("module '{0}' is not enabled")]
    NotEnabled(String),
    #[error("module '{0}' is enabled; disable it first")]
    StillEnabled(String),
    #[error("module '{module}' needs engine {required} or newer (this is {current})")]
    EngineTooOld {
        module: String,
        required: Version,
        current: Version,
    },
    #[error("module '{module}': requirement not met: {constraint}")]
    Unmet { module: String, constraint: String },
    #[error("module '{module}': conflict: {constraint}")]
    Conflict { module: String, constraint: String },
    #[error("module '{dependent}' still requires '{module}' ({constraint})")]
    RequiredBy {
        module: String,
        dependent: String,
        constraint: String,
    },
    #[error("alternative '{alternative}' of module '{module}': {reason}")]
    Alternative {
        module: String,
        alternative: String,
        reason: String,
    },
    #[error("module '{module}' ships '{event}' hooks but no '{revert}' revert hook")]
    MissingRevertHook {
        module: String,
        event: String,
        revert: String,
    },
    #[error("{event} hooks failed:\n{details}")]
    HookFailed { event: String, details: String },
    #[error("timed out after {waited}s waiting for {target} (last state: {state})")]
    Timeout {
        target: String,
        waited: u64,
        state: String,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("interrupted by user")]
    Interrupted,
}

impl CoreError {
    /// Configuration and assembly errors: bad module content or a lifecycle
    /// request the current module set cannot satisfy. Raised before any
    /// container state is touched.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Descriptor(_)
            | Self::EnvFile(_)
            | Self::Fragment { .. }
            | Self::DuplicateService { .. }
            | Self::VolumeMajorConflict { .. }
            | Self::DependencyCycle { .. }
            | Self::ModuleNotFound(_)
            | Self::AlreadyEnabled(_)
            | Self::NotEnabled(_)
            | Self::StillEnabled(_)
            | Self::EngineTooOld { .. }
            | Self::Unmet { .. }
            | Self::Conflict { .. }
            | Self::RequiredBy { .. }
            | Self::Alternative { .. }
            | Self::MissingRevertHook { .. }
            | Self::InvalidArgument(_) => true,
            Self::Store(e) => matches!(
                e,
                StoreError::Descriptor(_)
                    | StoreError::ParseToml(_)
                    | StoreError::Config(_)
                    | StoreError::ModuleNotFound(_)
                    | StoreError::InvalidName(_)
                    | StoreError::BackupNotFound(_)
            ),
            _ => false,
        }
    }

    /// The container engine or compose CLI could not be reached at all.
    pub fn is_runtime_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Runtime(genoring_runtime::RuntimeError::Unavailable(_))
        )
    }
}
