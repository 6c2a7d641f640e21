use crate::backend::{CommandOutput, ContainerRuntime, ContainerState};
use crate::exec::ExecutionContext;
use crate::RuntimeError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Up(String),
    Down,
    Exec {
        container: String,
        command: Vec<String>,
        user: String,
    },
    CopyInto {
        source: PathBuf,
        container: String,
        dest: String,
    },
    Build(String),
    Pull,
    RemoveVolume(String),
}

#[derive(Debug, Default)]
struct MockState {
    profile: Option<String>,
    containers: BTreeMap<String, ContainerState>,
    /// Containers pinned to a state regardless of up/down.
    pinned: BTreeMap<String, ContainerState>,
    exec_failures: Vec<String>,
    fail_up: bool,
    calls: Vec<RuntimeCall>,
}

/// In-memory runtime for tests and dry runs.
///
/// Containers are the services of the compose file (when one is attached)
/// plus any added with [`with_container`](Self::with_container). `up` marks
/// them running, `down` marks them exited.
#[derive(Default)]
pub struct MockRuntime {
    compose_file: Option<PathBuf>,
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_compose_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.compose_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_container(self, name: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state
                .containers
                .insert(name.to_owned(), ContainerState::Exited);
        }
        self
    }

    /// Pin a container to `state`; `up` and `down` no longer change it.
    pub fn pin_state(&self, container: &str, state: ContainerState) {
        if let Ok(mut s) = self.state.lock() {
            s.pinned.insert(container.to_owned(), state);
        }
    }

    /// Make every exec whose joined command line contains `pattern` exit 1.
    pub fn fail_exec_matching(&self, pattern: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.exec_failures.push(pattern.to_owned());
        }
    }

    pub fn fail_up(&self, fail: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_up = fail;
        }
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Joined command lines of every exec call, in order.
    pub fn exec_log(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Exec {
                    container, command, ..
                } => Some(format!("{container}: {}", command.join(" "))),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut s) = self.state.lock() {
            s.calls.clear();
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))
    }

    fn compose_services(&self) -> Result<Vec<String>, RuntimeError> {
        let Some(path) = &self.compose_file else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }
        let doc: serde_yaml::Value = serde_yaml::from_str(&std::fs::read_to_string(path)?)
            .map_err(|e| RuntimeError::ParseOutput(e.to_string()))?;
        Ok(doc
            .get("services")
            .and_then(serde_yaml::Value::as_mapping)
            .map(|m| {
                m.keys()
                    .filter_map(|k| k.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn effective(state: &MockState, container: &str) -> ContainerState {
        state
            .pinned
            .get(container)
            .or_else(|| state.containers.get(container))
            .copied()
            .unwrap_or(ContainerState::Empty)
    }
}

impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn up(&self, profile: &str) -> Result<(), RuntimeError> {
        let services = self.compose_services()?;
        let mut state = self.lock()?;
        state.calls.push(RuntimeCall::Up(profile.to_owned()));
        if state.fail_up {
            return Err(RuntimeError::CommandFailed {
                command: "compose up".to_owned(),
                code: 1,
                stderr: "mock failure".to_owned(),
            });
        }
        for service in services {
            state.containers.entry(service).or_insert(ContainerState::Exited);
        }
        for s in state.containers.values_mut() {
            *s = ContainerState::Running;
        }
        state.profile = Some(profile.to_owned());
        Ok(())
    }

    fn down(&self) -> Result<(), RuntimeError> {
        let mut state = self.lock()?;
        state.calls.push(RuntimeCall::Down);
        for s in state.containers.values_mut() {
            *s = ContainerState::Exited;
        }
        state.profile = None;
        Ok(())
    }

    fn active_profile(&self) -> Result<Option<String>, RuntimeError> {
        Ok(self.lock()?.profile.clone())
    }

    fn container_states(&self) -> Result<BTreeMap<String, ContainerState>, RuntimeError> {
        let state = self.lock()?;
        let mut names: Vec<&String> = state.containers.keys().collect();
        names.extend(state.pinned.keys());
        Ok(names
            .into_iter()
            .map(|n| (n.clone(), Self::effective(&state, n)))
            .collect())
    }

    fn container_state(&self, container: &str) -> Result<ContainerState, RuntimeError> {
        Ok(Self::effective(&*self.lock()?, container))
    }

    fn exec(
        &self,
        container: &str,
        command: &[String],
        ctx: &ExecutionContext,
    ) -> Result<CommandOutput, RuntimeError> {
        let mut state = self.lock()?;
        state.calls.push(RuntimeCall::Exec {
            container: container.to_owned(),
            command: command.to_vec(),
            user: ctx.user_or_root().to_owned(),
        });
        if !Self::effective(&state, container).is_running() {
            return Err(RuntimeError::NotRunning(container.to_owned()));
        }
        let line = command.join(" ");
        if state.exec_failures.iter().any(|p| line.contains(p.as_str())) {
            return Ok(CommandOutput {
                code: 1,
                stdout: String::new(),
                stderr: format!("mock failure: {line}"),
            });
        }
        Ok(CommandOutput {
            code: 0,
            stdout: format!("mock-exec: {line}\n"),
            stderr: String::new(),
        })
    }

    fn copy_into(&self, source: &Path, container: &str, dest: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock()?;
        state.calls.push(RuntimeCall::CopyInto {
            source: source.to_path_buf(),
            container: container.to_owned(),
            dest: dest.to_owned(),
        });
        if Self::effective(&state, container).is_running() {
            Ok(())
        } else {
            Err(RuntimeError::NotRunning(container.to_owned()))
        }
    }

    fn build_image(&self, _context: &Path, tag: &str) -> Result<(), RuntimeError> {
        self.lock()?.calls.push(RuntimeCall::Build(tag.to_owned()));
        Ok(())
    }

    fn pull(&self) -> Result<(), RuntimeError> {
        self.lock()?.calls.push(RuntimeCall::Pull);
        Ok(())
    }

    fn remove_volume(&self, volume: &str) -> Result<(), RuntimeError> {
        self.lock()?
            .calls
            .push(RuntimeCall::RemoveVolume(volume.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Platform;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Platform::detect())
    }

    #[test]
    fn mock_lifecycle() {
        let rt = MockRuntime::new().with_container("genoring-proxy");
        assert_eq!(
            rt.container_state("genoring-proxy").unwrap(),
            ContainerState::Exited
        );
        assert!(rt.active_profile().unwrap().is_none());

        rt.up("offline").unwrap();
        assert_eq!(rt.active_profile().unwrap().as_deref(), Some("offline"));
        assert_eq!(
            rt.container_state("genoring-proxy").unwrap(),
            ContainerState::Running
        );

        rt.down().unwrap();
        assert!(rt.active_profile().unwrap().is_none());
        assert_eq!(rt.calls(), vec![RuntimeCall::Up("offline".into()), RuntimeCall::Down]);
    }

    #[test]
    fn up_reads_services_from_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("docker-compose.yml");
        std::fs::write(&file, "services:\n  a:\n    image: x\n  b:\n    image: y\n").unwrap();
        let rt = MockRuntime::new().with_compose_file(&file);
        rt.up("prod").unwrap();
        let states = rt.container_states().unwrap();
        assert_eq!(states.len(), 2);
        assert!(states.values().all(|s| s.is_running()));
    }

    #[test]
    fn exec_requires_running_container() {
        let rt = MockRuntime::new().with_container("c");
        let cmd = vec!["true".to_owned()];
        assert!(matches!(
            rt.exec("c", &cmd, &ctx()).unwrap_err(),
            RuntimeError::NotRunning(_)
        ));
        rt.up("offline").unwrap();
        assert!(rt.exec("c", &cmd, &ctx()).unwrap().success());
    }

    #[test]
    fn exec_failures_and_pins() {
        let rt = MockRuntime::new().with_container("c");
        rt.pin_state("c", ContainerState::Running);
        rt.fail_exec_matching("broken.sh");
        let bad = vec!["/genoring/modules/x/broken.sh".to_owned()];
        let out = rt.exec("c", &bad, &ctx()).unwrap();
        assert_eq!(out.code, 1);
        assert_eq!(rt.exec_log(), vec!["c: /genoring/modules/x/broken.sh"]);

        rt.pin_state("c", ContainerState::Paused);
        rt.up("offline").unwrap();
        assert_eq!(rt.container_state("c").unwrap(), ContainerState::Paused);
    }
}
