//! Transactional envelope shared by every lifecycle verb.
//!
//! An [`OperationContext`] stops the system, takes an implicit backup, runs
//! the registered local hooks, applies the verb's mutation (which
//! regenerates the compose documents), starts the system in a maintenance
//! mode to run the container hooks, and finally puts the system back in the
//! mode it was in. When any phase fails, every hook that completed is
//! reverted in reverse order and the backup is restored.

use crate::concurrency::shutdown_requested;
use crate::engine::Engine;
use crate::hooks::{HookOrchestrator, HookReport};
use crate::state::{system_state, SystemState};
use crate::CoreError;
use genoring_runtime::Mode;
use genoring_schema::ModuleName;
use tracing::{debug, info, warn};

/// Local hook run after the implicit backup archive is written.
pub const BACKUP_EVENT: &str = "backup";
/// Local hook run after a backup archive is unpacked.
pub const RESTORE_EVENT: &str = "restore";

/// One hook invocation registered on an operation.
#[derive(Debug, Clone)]
pub struct HookStep {
    pub event: String,
    /// Event run to undo this step when a later step fails.
    pub revert: Option<String>,
    /// Steps run in ascending order; ties keep registration order.
    pub order: i32,
    pub scope: Option<ModuleName>,
    pub args: Vec<String>,
    /// Container hooks only: also run hooks of other modules that target
    /// services of the scoped module.
    pub related: bool,
    ok: bool,
}

impl HookStep {
    pub fn new(event: impl Into<String>, order: i32) -> Self {
        Self {
            event: event.into(),
            revert: None,
            order,
            scope: None,
            args: Vec::new(),
            related: false,
            ok: false,
        }
    }

    #[must_use]
    pub fn revert(mut self, event: impl Into<String>) -> Self {
        self.revert = Some(event.into());
        self
    }

    #[must_use]
    pub fn scope(mut self, module: Option<&ModuleName>) -> Self {
        self.scope = module.cloned();
        self
    }

    #[must_use]
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn related(mut self, related: bool) -> Self {
        self.related = related;
        self
    }

    /// Completed successfully in this operation.
    pub fn is_ok(&self) -> bool {
        self.ok
    }
}

/// What a finished operation produced.
#[derive(Debug, Default)]
pub struct OperationReport {
    pub warnings: Vec<String>,
    pub hooks: Vec<HookReport>,
}

#[derive(Debug)]
pub struct OperationContext {
    verb: String,
    previous: Option<SystemState>,
    /// Compose profile the system was running under, restarted as is.
    previous_profile: Option<String>,
    operation_mode: Mode,
    local: Vec<HookStep>,
    container: Vec<HookStep>,
    skip_backup: bool,
    backup: Option<String>,
}

impl OperationContext {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            previous: None,
            previous_profile: None,
            operation_mode: Mode::Offline,
            local: Vec::new(),
            container: Vec::new(),
            skip_backup: false,
            backup: None,
        }
    }

    /// Do not take the implicit backup.
    #[must_use]
    pub fn skip_backup(mut self) -> Self {
        self.skip_backup = true;
        self
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Mode the container phase runs in; known once the operation started.
    pub fn operation_mode(&self) -> Mode {
        self.operation_mode
    }

    pub fn local_steps(&self) -> &[HookStep] {
        &self.local
    }

    pub fn container_steps(&self) -> &[HookStep] {
        &self.container
    }

    /// Register a local hook step. A step with a revert event is refused when
    /// a module ships the forward hook without the revert hook.
    pub fn add_local(
        &mut self,
        hooks: &HookOrchestrator<'_>,
        step: HookStep,
    ) -> Result<(), CoreError> {
        if let Some(revert) = &step.revert {
            hooks.validate_local_revert(&step.event, revert, step.scope.as_ref())?;
        }
        self.local.push(step);
        Ok(())
    }

    pub fn add_container(
        &mut self,
        hooks: &HookOrchestrator<'_>,
        step: HookStep,
    ) -> Result<(), CoreError> {
        if let Some(revert) = &step.revert {
            hooks.validate_container_revert(
                &step.event,
                revert,
                step.scope.as_ref(),
                step.related,
            )?;
        }
        self.container.push(step);
        Ok(())
    }

    /// Run the whole transaction. `apply` performs the verb's mutation and
    /// returns assembly warnings. On failure the rollback runs before the
    /// error is returned; the previous mode is restored either way.
    pub fn run(
        &mut self,
        engine: &Engine,
        hooks: &HookOrchestrator<'_>,
        apply: impl FnOnce() -> Result<Vec<String>, CoreError>,
    ) -> Result<OperationReport, CoreError> {
        info!("{}: starting", self.verb);
        let mut report = OperationReport::default();
        let result = self.perform(engine, hooks, apply, &mut report);
        if let Err(e) = &result {
            warn!("{} failed: {e}", self.verb);
            self.cleanup(engine, hooks);
        }
        let end = self.end(engine);
        match (result, end) {
            (Err(e), end) => {
                if let Err(end) = end {
                    warn!("{}: could not restore previous mode: {end}", self.verb);
                }
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                info!("{}: done", self.verb);
                Ok(report)
            }
        }
    }

    fn perform(
        &mut self,
        engine: &Engine,
        hooks: &HookOrchestrator<'_>,
        apply: impl FnOnce() -> Result<Vec<String>, CoreError>,
        report: &mut OperationReport,
    ) -> Result<(), CoreError> {
        self.prepare(engine, hooks)?;
        self.perform_local(engine, hooks, report)?;
        check_interrupt()?;
        report.warnings.extend(apply()?);
        self.perform_container(engine, hooks, report)
    }

    fn prepare(&mut self, engine: &Engine, hooks: &HookOrchestrator<'_>) -> Result<(), CoreError> {
        let state = system_state(engine.runtime())?;
        self.operation_mode = match state.mode() {
            Some(Mode::Online | Mode::Backend) => Mode::Backend,
            _ => Mode::Offline,
        };
        debug!(
            "{}: system {state}, operating in {} mode",
            self.verb, self.operation_mode
        );
        self.previous = Some(state);
        self.previous_profile = engine.runtime().active_profile()?;
        engine.runtime().down()?;

        if !self.skip_backup {
            let name = format!("pre-{}", self.verb);
            engine.backups().create(&name, None)?;
            self.backup = Some(name.clone());
            hooks
                .run_local(BACKUP_EVENT, None, &[name])?
                .into_result()?;
        }
        Ok(())
    }

    fn perform_local(
        &mut self,
        engine: &Engine,
        hooks: &HookOrchestrator<'_>,
        report: &mut OperationReport,
    ) -> Result<(), CoreError> {
        if self.local.is_empty() {
            return Ok(());
        }
        engine.runtime().down()?;
        self.local.sort_by_key(|s| s.order);
        for step in &mut self.local {
            check_interrupt()?;
            let result = hooks
                .run_local(&step.event, step.scope.as_ref(), &step.args)?
                .into_result()?;
            step.ok = true;
            report.hooks.push(result);
        }
        Ok(())
    }

    fn perform_container(
        &mut self,
        engine: &Engine,
        hooks: &HookOrchestrator<'_>,
        report: &mut OperationReport,
    ) -> Result<(), CoreError> {
        if self.container.is_empty() {
            return Ok(());
        }
        let profile = self.operation_mode.profile(&engine.config().environment);
        engine.runtime().up(&profile)?;
        engine.wait_system_ready()?;
        self.container.sort_by_key(|s| s.order);
        for step in &mut self.container {
            check_interrupt()?;
            let result = hooks.run_container(&step.event, step.scope.as_ref(), step.related)?;
            report
                .warnings
                .extend(result.skipped().into_iter().map(|s| format!("skipped {s}")));
            let result = result.into_result()?;
            step.ok = true;
            report.hooks.push(result);
        }
        Ok(())
    }

    /// Undo completed steps and restore the implicit backup. Failures here
    /// are logged, never returned.
    fn cleanup(&self, engine: &Engine, hooks: &HookOrchestrator<'_>) {
        warn!("{}: rolling back", self.verb);
        for step in self.container.iter().rev().filter(|s| s.ok) {
            let Some(revert) = &step.revert else {
                continue;
            };
            info!("reverting container {} hooks with {revert}", step.event);
            match hooks.run_container(revert, step.scope.as_ref(), step.related) {
                Ok(r) => {
                    if let Err(e) = r.into_result() {
                        warn!("revert failed: {e}");
                    }
                }
                Err(e) => warn!("revert failed: {e}"),
            }
        }

        if let Err(e) = engine.runtime().down() {
            warn!("could not stop the system during rollback: {e}");
        }

        for step in self.local.iter().rev().filter(|s| s.ok) {
            let Some(revert) = &step.revert else {
                continue;
            };
            info!("reverting local {} hooks with {revert}", step.event);
            match hooks.run_local(revert, step.scope.as_ref(), &step.args) {
                Ok(r) => {
                    if let Err(e) = r.into_result() {
                        warn!("revert failed: {e}");
                    }
                }
                Err(e) => warn!("revert failed: {e}"),
            }
        }

        let Some(name) = &self.backup else {
            return;
        };
        info!("restoring implicit backup '{name}'");
        match engine.backups().restore(name) {
            Ok(_) => {
                engine.registry().invalidate();
                match hooks.run_local(RESTORE_EVENT, None, std::slice::from_ref(name)) {
                    Ok(r) => {
                        if let Err(e) = r.into_result() {
                            warn!("restore hooks failed: {e}");
                        }
                    }
                    Err(e) => warn!("restore hooks failed: {e}"),
                }
            }
            Err(e) => warn!("could not restore backup '{name}': {e}"),
        }
    }

    /// Put the system back in the mode it had before the operation.
    fn end(&self, engine: &Engine) -> Result<(), CoreError> {
        match self.previous {
            Some(SystemState::Running(mode)) => {
                let profile = self
                    .previous_profile
                    .clone()
                    .unwrap_or_else(|| mode.profile(&engine.config().environment));
                debug!("{}: restarting in {mode} mode ({profile})", self.verb);
                engine.runtime().up(&profile)?;
                engine.wait_system_ready()?;
                Ok(())
            }
            Some(SystemState::Stopped(_)) => {
                engine.runtime().down()?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn check_interrupt() -> Result<(), CoreError> {
    if shutdown_requested() {
        Err(CoreError::Interrupted)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genoring_runtime::{ContainerRuntime, MockRuntime, RuntimeCall};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::Arc;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// One module `app` with a service and a set of hooks that log their
    /// own name to `hooks.log` at the project root.
    fn project() -> (tempfile::TempDir, Engine, Arc<MockRuntime>) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "modules/app/module.toml", "name = \"app\"\nversion = \"1.0\"\n");
        write(root, "modules/app/services/app-web.yml", "image: web\n");
        for event in ["enable", "disable", "restore"] {
            write(
                root,
                &format!("modules/app/hooks/local/{event}.sh"),
                &format!("#!/bin/sh\necho {event} >> \"$GENORING_DIR/hooks.log\"\n"),
            );
        }
        for event in ["enable", "disable", "install"] {
            write(
                root,
                &format!("modules/app/hooks/container/{event}_app-web.sh"),
                "#!/bin/sh\ntrue\n",
            );
        }
        let runtime = Arc::new(
            MockRuntime::new()
                .with_compose_file(root.join("docker-compose.yml"))
                .with_container("app-web"),
        );
        let engine = Engine::open(root, Box::new(Arc::clone(&runtime)))
            .unwrap()
            .with_clock(Box::new(crate::state::ManualClock::new()));
        (dir, engine, runtime)
    }

    fn log(root: &Path) -> Vec<String> {
        fs::read_to_string(root.join("hooks.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn container_failure_reverts_only_completed_hooks() {
        let (dir, engine, runtime) = project();
        let app = ModuleName::new("app");
        let hooks = engine.hook_orchestrator().unwrap();

        let mut op = OperationContext::new("enable");
        op.add_local(&hooks, HookStep::new("enable", 0).revert("disable").scope(Some(&app)))
            .unwrap();
        op.add_container(
            &hooks,
            HookStep::new("enable", 0).revert("disable").scope(Some(&app)),
        )
        .unwrap();
        op.add_container(&hooks, HookStep::new("install", 1).scope(Some(&app)))
            .unwrap();
        runtime.fail_exec_matching("install_app-web.sh");

        let err = op
            .run(&engine, &hooks, || {
                engine.registry().set_status(
                    &app,
                    genoring_store::ModuleStatus::Enabled,
                    None,
                )?;
                engine.regenerate()
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::HookFailed { .. }));

        let steps = op.container_steps();
        assert!(steps[0].is_ok());
        assert!(!steps[1].is_ok());
        assert!(op.local_steps()[0].is_ok());

        let container_runs: Vec<String> = runtime
            .exec_log()
            .into_iter()
            .filter(|l| l.contains("/hooks/container/") && !l.starts_with("app-web: chmod"))
            .collect();
        assert_eq!(
            container_runs,
            vec![
                "app-web: /genoring/modules/app/hooks/container/enable_app-web.sh",
                "app-web: /genoring/modules/app/hooks/container/install_app-web.sh",
                "app-web: /genoring/modules/app/hooks/container/disable_app-web.sh",
            ]
        );
        // `app` was not enabled before the operation, so its restore hook
        // does not run after the backup is unpacked.
        assert_eq!(log(dir.path()), vec!["enable", "disable"]);

        // The registry is back to its pre-operation content.
        assert!(!engine.registry().is_enabled(&app).unwrap());
        assert_eq!(runtime.calls().last(), Some(&RuntimeCall::Down));
    }

    #[test]
    fn missing_revert_hook_is_refused_at_registration() {
        let (_dir, engine, _runtime) = project();
        let app = ModuleName::new("app");
        let hooks = engine.hook_orchestrator().unwrap();
        let mut op = OperationContext::new("install");
        let err = op
            .add_container(
                &hooks,
                HookStep::new("install", 0).revert("uninstall").scope(Some(&app)),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::MissingRevertHook { .. }));
        assert!(op.container_steps().is_empty());
    }

    #[test]
    fn running_system_is_restarted_under_its_previous_profile() {
        let (_dir, engine, runtime) = project();
        runtime.up("staging").unwrap();
        let app = ModuleName::new("app");
        let hooks = engine.hook_orchestrator().unwrap();
        let mut op = OperationContext::new("update").skip_backup();
        op.add_container(&hooks, HookStep::new("enable", 0).scope(Some(&app)))
            .unwrap();
        op.run(&engine, &hooks, || {
            engine
                .registry()
                .set_status(&app, genoring_store::ModuleStatus::Enabled, None)?;
            engine.regenerate()
        })
        .unwrap();

        assert_eq!(op.operation_mode(), Mode::Backend);
        let ups: Vec<RuntimeCall> = runtime
            .calls()
            .into_iter()
            .filter(|c| matches!(c, RuntimeCall::Up(_)))
            .collect();
        assert_eq!(
            ups,
            vec![
                RuntimeCall::Up("staging".to_owned()),
                RuntimeCall::Up("backend".to_owned()),
                RuntimeCall::Up("staging".to_owned()),
            ]
        );
        assert!(!engine.backups().exists("pre-update"));
    }
}
