use crate::exec::ExecutionContext;
use crate::RuntimeError;
use genoring_store::{EngineConfig, ProjectLayout};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Status of one container as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Paused,
    Dead,
    Exited,
    /// Unknown to the runtime (never created or removed).
    Empty,
}

impl ContainerState {
    /// Lenient parse; anything unrecognised is [`ContainerState::Empty`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "dead" => Self::Dead,
            "exited" => Self::Exited,
            _ => Self::Empty,
        }
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Paused => "paused",
            Self::Dead => "dead",
            Self::Exited => "exited",
            Self::Empty => "",
        })
    }
}

/// Which profile set the system runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Online,
    Backend,
    Offline,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "backend" => Some(Self::Backend),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    /// Concrete compose profile for this mode. Online resolves to the
    /// configured environment sub-profile.
    pub fn profile(self, environment: &str) -> String {
        match self {
            Self::Online => environment.to_owned(),
            Self::Backend => "backend".to_owned(),
            Self::Offline => "offline".to_owned(),
        }
    }

    /// Inverse of [`profile`](Self::profile).
    pub fn from_profile(profile: &str) -> Self {
        match profile {
            "backend" => Self::Backend,
            "offline" => Self::Offline,
            _ => Self::Online,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Backend => "backend",
            Self::Offline => "offline",
        })
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn from_output(output: &std::process::Output) -> Self {
        Self {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Operations the engine needs from a compose-style container runtime.
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Start every service of `profile` in the background. Safe to call
    /// when already running.
    fn up(&self, profile: &str) -> Result<(), RuntimeError>;

    /// Tear down every profile.
    fn down(&self) -> Result<(), RuntimeError>;

    /// Profile passed to the last successful `up`, cleared by `down`.
    fn active_profile(&self) -> Result<Option<String>, RuntimeError>;

    /// State of every container of the project, keyed by container name.
    fn container_states(&self) -> Result<BTreeMap<String, ContainerState>, RuntimeError>;

    fn container_state(&self, container: &str) -> Result<ContainerState, RuntimeError>;

    /// Run `command` inside a running container, non-interactively, as
    /// `ctx.user` (root when unset), with `ctx.env` injected.
    fn exec(
        &self,
        container: &str,
        command: &[String],
        ctx: &ExecutionContext,
    ) -> Result<CommandOutput, RuntimeError>;

    /// Copy a host file or directory to `dest` inside the container.
    fn copy_into(&self, source: &Path, container: &str, dest: &str) -> Result<(), RuntimeError>;

    fn build_image(&self, context: &Path, tag: &str) -> Result<(), RuntimeError>;

    fn pull(&self) -> Result<(), RuntimeError>;

    fn remove_volume(&self, volume: &str) -> Result<(), RuntimeError>;
}

/// Lets callers keep a handle on a runtime they hand to the engine.
impl<T: ContainerRuntime + ?Sized> ContainerRuntime for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn available(&self) -> bool {
        (**self).available()
    }

    fn up(&self, profile: &str) -> Result<(), RuntimeError> {
        (**self).up(profile)
    }

    fn down(&self) -> Result<(), RuntimeError> {
        (**self).down()
    }

    fn active_profile(&self) -> Result<Option<String>, RuntimeError> {
        (**self).active_profile()
    }

    fn container_states(&self) -> Result<BTreeMap<String, ContainerState>, RuntimeError> {
        (**self).container_states()
    }

    fn container_state(&self, container: &str) -> Result<ContainerState, RuntimeError> {
        (**self).container_state(container)
    }

    fn exec(
        &self,
        container: &str,
        command: &[String],
        ctx: &ExecutionContext,
    ) -> Result<CommandOutput, RuntimeError> {
        (**self).exec(container, command, ctx)
    }

    fn copy_into(&self, source: &Path, container: &str, dest: &str) -> Result<(), RuntimeError> {
        (**self).copy_into(source, container, dest)
    }

    fn build_image(&self, context: &Path, tag: &str) -> Result<(), RuntimeError> {
        (**self).build_image(context, tag)
    }

    fn pull(&self) -> Result<(), RuntimeError> {
        (**self).pull()
    }

    fn remove_volume(&self, volume: &str) -> Result<(), RuntimeError> {
        (**self).remove_volume(volume)
    }
}

pub fn select_runtime(
    name: &str,
    layout: &ProjectLayout,
    config: &EngineConfig,
) -> Result<Box<dyn ContainerRuntime>, RuntimeError> {
    match name {
        "compose" => Ok(Box::new(crate::compose::ComposeRuntime::new(layout, config))),
        "mock" => Ok(Box::new(
            crate::mock::MockRuntime::new().with_compose_file(layout.compose_file()),
        )),
        other => Err(RuntimeError::Unavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_runtimes() {
        let layout = ProjectLayout::new("/tmp/genoring-test");
        let config = EngineConfig::default();
        assert!(select_runtime("compose", &layout, &config).is_ok());
        assert!(select_runtime("mock", &layout, &config).is_ok());
        assert!(select_runtime("kubernetes", &layout, &config).is_err());
    }

    #[test]
    fn parses_container_states() {
        assert_eq!(ContainerState::parse("running"), ContainerState::Running);
        assert_eq!(ContainerState::parse(" Exited\n"), ContainerState::Exited);
        assert_eq!(ContainerState::parse(""), ContainerState::Empty);
        assert_eq!(ContainerState::parse("removing"), ContainerState::Empty);
    }

    #[test]
    fn mode_profiles() {
        assert_eq!(Mode::Online.profile("staging"), "staging");
        assert_eq!(Mode::from_profile("staging"), Mode::Online);
        assert_eq!(Mode::from_profile("backend"), Mode::Backend);
        assert_eq!(Mode::parse("offline"), Some(Mode::Offline));
        assert_eq!(Mode::parse("running"), None);
    }
}
