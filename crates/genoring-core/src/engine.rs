use crate::alternatives;
use crate::assemble::Assembler;
use crate::deps::{check_disable, check_enable};
use crate::environment::{install_env_files, remove_env_files};
use crate::hooks::HookOrchestrator;
use crate::operation::{HookStep, OperationContext, OperationReport, RESTORE_EVENT};
use crate::state::{
    module_state, system_state, wait_ready, Clock, NoPrompt, Prompt, SystemClock, SystemState,
    STATE_EVENT,
};
use crate::CoreError;
use genoring_runtime::{ContainerRuntime, ContainerState, ExecutionContext, Mode};
use genoring_schema::{AlternativeName, ModuleName, ServiceName, Version};
use genoring_store::{
    default_backup_name, validate_backup_name, BackupManifest, BackupStore, EngineConfig,
    ModuleRegistry, ModuleStatus, ProjectLayout,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Version of this engine, compared against a module's `engine` field.
pub const ENGINE_VERSION: Version = Version::new(1, 0);

/// Module installed when `install` is given no module list.
pub const BASE_MODULE: &str = "genoring";

/// Central orchestration engine for a GenoRing project.
///
/// Owns the project layout, the module registry, the backup store, and the
/// container runtime, and exposes every lifecycle verb. Mutating verbs run
/// inside an [`OperationContext`]; gating checks run before it opens, so a
/// refused request never touches hooks, files, or containers.
pub struct Engine {
    layout: ProjectLayout,
    config: EngineConfig,
    registry: ModuleRegistry,
    backups: BackupStore,
    runtime: Box<dyn ContainerRuntime>,
    clock: Box<dyn Clock>,
    prompt: Box<dyn Prompt>,
    base: ExecutionContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatusReport {
    pub name: ModuleName,
    /// `None` for a module that was never installed.
    pub status: Option<ModuleStatus>,
    pub installed_version: Option<Version>,
    pub available_version: Version,
    pub description: Option<String>,
    pub alternatives: Vec<AlternativeName>,
    /// Only computed for enabled modules.
    pub state: Option<ContainerState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: String,
    pub mode: Option<Mode>,
    pub containers: BTreeMap<String, ContainerState>,
    pub modules: Vec<ModuleStatusReport>,
}

impl Engine {
    /// Open the project rooted at `root`. Reads `genoring.toml` when present.
    pub fn open(
        root: impl Into<PathBuf>,
        runtime: Box<dyn ContainerRuntime>,
    ) -> Result<Self, CoreError> {
        let layout = ProjectLayout::new(root);
        let config = EngineConfig::load(&layout)?;
        debug!(
            "project {} at {} (runtime: {})",
            config.project_name(&layout),
            layout.root().display(),
            runtime.name()
        );
        Ok(Self {
            registry: ModuleRegistry::new(layout.clone()),
            backups: BackupStore::new(layout.clone()),
            layout,
            config,
            runtime,
            clock: Box::new(SystemClock::new()),
            prompt: Box::new(NoPrompt),
            base: ExecutionContext::for_host(),
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Ask `prompt` before giving up on a readiness wait.
    #[must_use]
    pub fn with_prompt(mut self, prompt: Box<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// Hook orchestrator over every available module. Hook files are scanned
    /// once, here.
    pub fn hook_orchestrator(&self) -> Result<HookOrchestrator<'_>, CoreError> {
        HookOrchestrator::new(&self.registry, self.runtime.as_ref(), self.base.clone())
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(self.config.readiness_timeout_secs)
    }

    /// Wait until every container runs. A project without containers is
    /// ready at once.
    pub fn wait_system_ready(&self) -> Result<Duration, CoreError> {
        let mut check = || -> Result<ContainerState, CoreError> {
            Ok(match system_state(self.runtime())? {
                SystemState::Running(_) | SystemState::Stopped(ContainerState::Empty) => {
                    ContainerState::Running
                }
                SystemState::Stopped(state) => state,
            })
        };
        wait_ready(
            "system",
            &mut check,
            self.budget(),
            self.clock.as_ref(),
            self.prompt.as_ref(),
        )
    }

    /// Wait until `module` reports running, through its `state` hook when it
    /// ships one.
    pub fn wait_module_ready(&self, module: &ModuleName) -> Result<Duration, CoreError> {
        let hooks = self.hook_orchestrator()?;
        let mut check = || module_state(&hooks, &self.registry, self.runtime(), module);
        wait_ready(
            module,
            &mut check,
            self.budget(),
            self.clock.as_ref(),
            self.prompt.as_ref(),
        )
    }

    /// Reassemble the enabled modules and rewrite the compose documents.
    /// Returns the assembly warnings.
    pub fn regenerate(&self) -> Result<Vec<String>, CoreError> {
        let assembly = Assembler::new(&self.registry, &self.config).assemble_enabled()?;
        assembly.write(&self.layout)?;
        Ok(assembly.warnings)
    }

    fn require_available(&self, module: &ModuleName) -> Result<(), CoreError> {
        if self.registry.is_available(module)? {
            Ok(())
        } else {
            Err(CoreError::ModuleNotFound(module.to_string()))
        }
    }

    fn require_enabled(&self, module: &ModuleName) -> Result<(), CoreError> {
        self.require_available(module)?;
        if self.registry.is_enabled(module)? {
            Ok(())
        } else {
            Err(CoreError::NotEnabled(module.to_string()))
        }
    }

    fn require_disabled(&self, module: &ModuleName) -> Result<(), CoreError> {
        self.require_available(module)?;
        if self.registry.is_enabled(module)? {
            Err(CoreError::StillEnabled(module.to_string()))
        } else {
            Ok(())
        }
    }

    /// Mark `module` enabled, keeping an already recorded version.
    fn mark_enabled(&self, module: &ModuleName) -> Result<Vec<String>, CoreError> {
        let warnings = install_env_files(&self.layout, module)?;
        let version = match self.registry.installed_version(module)? {
            Some(_) => None,
            None => Some(self.registry.descriptor(module)?.version),
        };
        self.registry
            .set_status(module, ModuleStatus::Enabled, version)?;
        Ok(warnings)
    }

    // -- lifecycle verbs ----------------------------------------------------

    /// Install and enable `modules` in one transaction. An empty list
    /// installs the base module.
    pub fn install(&self, modules: &[ModuleName]) -> Result<OperationReport, CoreError> {
        self.layout.initialize()?;
        let modules: Vec<ModuleName> = if modules.is_empty() {
            vec![ModuleName::new(BASE_MODULE)]
        } else {
            modules.to_vec()
        };
        for module in &modules {
            self.require_available(module)?;
            if self.registry.is_enabled(module)? {
                return Err(CoreError::AlreadyEnabled(module.to_string()));
            }
        }
        check_enable(&self.registry, &modules)?;
        info!(
            "installing {}",
            modules.iter().map(ModuleName::as_str).collect::<Vec<_>>().join(", ")
        );

        let hooks = self.hook_orchestrator()?;
        let mut op = OperationContext::new("install");
        if self.registry.list_enabled()?.is_empty() {
            op = op.skip_backup();
        }
        for (order, module) in (0_i32..).zip(&modules) {
            op.add_local(
                &hooks,
                HookStep::new("install", order)
                    .revert("uninstall")
                    .scope(Some(module)),
            )?;
            op.add_container(
                &hooks,
                HookStep::new("install", order)
                    .scope(Some(module))
                    .related(true),
            )?;
        }
        op.run(self, &hooks, || {
            let mut warnings = Vec::new();
            for module in &modules {
                warnings.extend(install_env_files(&self.layout, module)?);
                let version = self.registry.descriptor(module)?.version;
                self.registry
                    .set_status(module, ModuleStatus::Enabled, Some(version))?;
            }
            warnings.extend(self.regenerate()?);
            Ok(warnings)
        })
    }

    pub fn enable(&self, module: &ModuleName) -> Result<OperationReport, CoreError> {
        self.require_available(module)?;
        if self.registry.is_enabled(module)? {
            return Err(CoreError::AlreadyEnabled(module.to_string()));
        }
        check_enable(&self.registry, std::slice::from_ref(module))?;

        let hooks = self.hook_orchestrator()?;
        let mut op = OperationContext::new("enable");
        op.add_local(
            &hooks,
            HookStep::new("enable", 0).revert("disable").scope(Some(module)),
        )?;
        op.add_container(
            &hooks,
            HookStep::new("enable", 0)
                .revert("disable")
                .scope(Some(module))
                .related(true),
        )?;
        op.run(self, &hooks, || {
            let mut warnings = self.mark_enabled(module)?;
            warnings.extend(self.regenerate()?);
            Ok(warnings)
        })
    }

    pub fn disable(&self, module: &ModuleName) -> Result<OperationReport, CoreError> {
        self.require_enabled(module)?;
        check_disable(&self.registry, module)?;

        let hooks = self.hook_orchestrator()?;
        let mut op = OperationContext::new("disable");
        op.add_local(
            &hooks,
            HookStep::new("disable", 0).revert("enable").scope(Some(module)),
        )?;
        op.add_container(
            &hooks,
            HookStep::new("disable", 0).revert("enable").scope(Some(module)),
        )?;
        op.run(self, &hooks, || {
            self.registry
                .set_status(module, ModuleStatus::Disabled, None)?;
            self.regenerate()
        })
    }

    /// Forget a disabled module: its project environment files, the volumes
    /// no enabled module still declares, and its configuration entry.
    ///
    /// Volumes are outside the implicit backup, so they are only dropped
    /// once the transaction has committed.
    pub fn uninstall(&self, module: &ModuleName) -> Result<OperationReport, CoreError> {
        self.require_disabled(module)?;
        let hooks = self.hook_orchestrator()?;
        let mut op = OperationContext::new("uninstall");
        op.add_local(&hooks, HookStep::new("uninstall", 0).scope(Some(module)))?;
        let mut orphaned = Vec::new();
        let mut report = op.run(self, &hooks, || {
            for volume in self.registry.volumes_of(module)? {
                if self.registry.volume_owners(&volume)?.is_empty() {
                    orphaned.push(volume);
                }
            }
            remove_env_files(&self.layout, module)?;
            self.registry.remove(module)?;
            self.regenerate()
        })?;
        for volume in orphaned {
            info!("removing volume {volume}");
            if let Err(e) = self.runtime.remove_volume(&volume) {
                let msg = format!("could not remove volume {volume}: {e}");
                warn!("{msg}");
                report.warnings.push(msg);
            }
        }
        Ok(report)
    }

    pub fn enable_alternative(
        &self,
        module: &ModuleName,
        alternative: &AlternativeName,
    ) -> Result<(), CoreError> {
        self.require_disabled(module)?;
        let descriptor = self.registry.descriptor(module)?;
        let mut active = self.registry.active_alternatives(module)?;
        alternatives::enable(&self.layout, &descriptor, &active, alternative)?;
        let previous = active.clone();
        active.push(alternative.clone());
        if let Err(e) = self.registry.set_alternatives(module, active) {
            alternatives::disable(&self.layout, &descriptor, &[alternative.clone()], alternative)?;
            self.registry.set_alternatives(module, previous)?;
            return Err(e.into());
        }
        self.registry.invalidate();
        Ok(())
    }

    pub fn disable_alternative(
        &self,
        module: &ModuleName,
        alternative: &AlternativeName,
    ) -> Result<(), CoreError> {
        self.require_disabled(module)?;
        let descriptor = self.registry.descriptor(module)?;
        let mut active = self.registry.active_alternatives(module)?;
        alternatives::disable(&self.layout, &descriptor, &active, alternative)?;
        active.retain(|a| a != alternative);
        self.registry.set_alternatives(module, active)?;
        self.registry.invalidate();
        Ok(())
    }

    /// Archive the project configuration (or one module's environment) and
    /// let `backup` hooks save data under the backup's data directory.
    pub fn backup(
        &self,
        name: Option<&str>,
        module: Option<&ModuleName>,
    ) -> Result<BackupManifest, CoreError> {
        let name = name.map_or_else(default_backup_name, str::to_owned);
        validate_backup_name(&name)?;
        if let Some(module) = module {
            self.require_enabled(module)?;
        }
        let manifest = self.backups.create(&name, module)?;

        let hooks = self.hook_orchestrator()?;
        let mut op = OperationContext::new("backup").skip_backup();
        op.add_local(
            &hooks,
            HookStep::new("backup", 0)
                .scope(module)
                .args(vec![name.clone()]),
        )?;
        op.add_container(
            &hooks,
            HookStep::new("backup", 0).scope(module).related(true),
        )?;
        if let Err(e) = op.run(self, &hooks, || Ok(Vec::new())) {
            if let Err(cleanup) = self.backups.remove(&name) {
                warn!("could not remove incomplete backup '{name}': {cleanup}");
            }
            return Err(e);
        }
        info!("backup '{name}' created");
        Ok(manifest)
    }

    pub fn restore(
        &self,
        name: &str,
        module: Option<&ModuleName>,
    ) -> Result<OperationReport, CoreError> {
        let manifest = self.backups.manifest(name)?;
        if let (Some(wanted), Some(saved)) = (module, &manifest.module) {
            if wanted != saved {
                return Err(CoreError::InvalidArgument(format!(
                    "backup '{name}' belongs to module '{saved}', not '{wanted}'"
                )));
            }
        }
        if let Some(module) = module {
            self.require_available(module)?;
        }
        let scope = module.or(manifest.module.as_ref());

        let hooks = self.hook_orchestrator()?;
        let mut op = OperationContext::new("restore");
        op.add_container(
            &hooks,
            HookStep::new(RESTORE_EVENT, 0).scope(scope).related(true),
        )?;
        op.run(self, &hooks, || {
            self.backups.restore(name)?;
            self.registry.invalidate();
            hooks
                .run_local(RESTORE_EVENT, scope, &[name.to_owned()])?
                .into_result()?;
            self.regenerate()
        })
    }

    /// Record the current descriptor version of `module` (or every enabled
    /// module), pick up new environment variables, and pull images.
    pub fn update(&self, module: Option<&ModuleName>) -> Result<OperationReport, CoreError> {
        if let Some(module) = module {
            self.require_enabled(module)?;
        }
        self.refresh_versions("update", module)
    }

    /// System-wide update run through the `upgrade` hooks.
    pub fn upgrade(&self) -> Result<OperationReport, CoreError> {
        self.refresh_versions("upgrade", None)
    }

    fn refresh_versions(
        &self,
        event: &str,
        module: Option<&ModuleName>,
    ) -> Result<OperationReport, CoreError> {
        let modules = match module {
            Some(m) => vec![m.clone()],
            None => self.registry.list_enabled()?,
        };
        check_enable(&self.registry, &modules)?;

        let hooks = self.hook_orchestrator()?;
        let mut op = OperationContext::new(event);
        op.add_local(&hooks, HookStep::new(event, 0).scope(module))?;
        op.add_container(&hooks, HookStep::new(event, 0).scope(module).related(true))?;
        op.run(self, &hooks, || {
            let mut warnings = Vec::new();
            for module in &modules {
                warnings.extend(install_env_files(&self.layout, module)?);
                let version = self.registry.descriptor(module)?.version;
                if self.registry.installed_version(module)? != Some(version) {
                    info!("{module} is now at version {version}");
                }
                self.registry
                    .set_status(module, ModuleStatus::Enabled, Some(version))?;
            }
            warnings.extend(self.regenerate()?);
            self.runtime.pull()?;
            Ok(warnings)
        })
    }

    /// Build the image of `service` from `modules/<module>/src/<service>`.
    /// Returns the image tag.
    pub fn compile(&self, module: &ModuleName, service: &ServiceName) -> Result<String, CoreError> {
        self.require_available(module)?;
        let descriptor = self.registry.descriptor(module)?;
        let known = descriptor.services.contains_key(service)
            || self.registry.services_of(module)?.contains(service);
        if !known {
            return Err(CoreError::InvalidArgument(format!(
                "module '{module}' has no service '{service}'"
            )));
        }
        let context = self.layout.module(module).build_context(service);
        if !context.is_dir() {
            return Err(CoreError::InvalidArgument(format!(
                "no build context for '{service}' at {}",
                context.display()
            )));
        }
        let hooks = self.hook_orchestrator()?;
        hooks
            .run_local("compile", Some(module), &[service.to_string()])?
            .into_result()?;
        let tag = format!(
            "genoring/{service}:{}",
            descriptor.service_version(service)
        );
        info!("building {tag}");
        self.runtime.build_image(&context, &tag)?;
        Ok(tag)
    }

    /// Redirect `service` to an external host, or clear the redirection
    /// when `ip` is `None`.
    pub fn set_external_host(
        &self,
        service: &ServiceName,
        ip: Option<&str>,
    ) -> Result<OperationReport, CoreError> {
        if let Some(ip) = ip {
            ip.parse::<IpAddr>().map_err(|_| {
                CoreError::InvalidArgument(format!("'{ip}' is not an IP address"))
            })?;
            if self.registry.service_owner(service)?.is_none() {
                return Err(CoreError::InvalidArgument(format!(
                    "no enabled module provides service '{service}'"
                )));
            }
        }
        let hooks = self.hook_orchestrator()?;
        let mut op = OperationContext::new("sethost");
        op.run(self, &hooks, || {
            self.registry.set_external_host(service, ip)?;
            self.regenerate()
        })
    }

    /// Run local `start` hooks and bring the system up in `mode`.
    pub fn start(&self, mode: Mode) -> Result<Vec<String>, CoreError> {
        let mut warnings = Vec::new();
        if !self.layout.compose_file().exists() {
            warnings.extend(self.regenerate()?);
        }
        let hooks = self.hook_orchestrator()?;
        hooks.run_local("start", None, &[mode.to_string()])?.into_result()?;
        let profile = mode.profile(&self.config.environment);
        info!("starting in {mode} mode (profile {profile})");
        self.runtime.up(&profile)?;
        self.wait_system_ready()?;
        // Containers can run before the application inside is usable; modules
        // shipping a state hook are waited on through it.
        for module in self.registry.list_enabled()? {
            if !hooks.hooks().local(STATE_EVENT, &module).is_empty() {
                self.wait_module_ready(&module)?;
            }
        }
        Ok(warnings)
    }

    pub fn stop(&self) -> Result<(), CoreError> {
        info!("stopping");
        self.runtime.down()?;
        let hooks = self.hook_orchestrator()?;
        hooks.run_local("stop", None, &[])?.into_result()?;
        Ok(())
    }

    fn module_report(
        &self,
        hooks: Option<&HookOrchestrator<'_>>,
        module: &ModuleName,
    ) -> Result<ModuleStatusReport, CoreError> {
        let descriptor = self.registry.descriptor(module)?;
        let record = self.registry.record(module)?;
        let status = record.as_ref().map(|r| r.status);
        let state = match (hooks, status) {
            (Some(hooks), Some(ModuleStatus::Enabled)) => Some(module_state(
                hooks,
                &self.registry,
                self.runtime(),
                module,
            )?),
            _ => None,
        };
        Ok(ModuleStatusReport {
            name: module.clone(),
            status,
            installed_version: record.as_ref().and_then(|r| r.version),
            available_version: descriptor.version,
            description: descriptor.description,
            alternatives: record.map(|r| r.alternatives).unwrap_or_default(),
            state,
        })
    }

    /// Every available module with its recorded status. No runtime calls.
    pub fn modules(&self) -> Result<Vec<ModuleStatusReport>, CoreError> {
        self.registry
            .list_available()?
            .iter()
            .map(|m| self.module_report(None, m))
            .collect()
    }

    /// System state, container states, and the state of `module` or of
    /// every enabled module.
    pub fn status(&self, module: Option<&ModuleName>) -> Result<StatusReport, CoreError> {
        let state = system_state(self.runtime())?;
        let hooks = self.hook_orchestrator()?;
        let modules = match module {
            Some(m) => {
                self.require_available(m)?;
                vec![m.clone()]
            }
            None => self.registry.list_enabled()?,
        };
        let modules = modules
            .iter()
            .map(|m| self.module_report(Some(&hooks), m))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StatusReport {
            state: state.to_string(),
            mode: state.mode(),
            containers: self.runtime.container_states()?,
            modules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ManualClock;
    use genoring_runtime::{MockRuntime, RuntimeCall};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    fn put(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn engine() -> (tempfile::TempDir, Engine, Arc<MockRuntime>) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        put(
            root,
            "modules/genoring/module.toml",
            "name = \"genoring\"\nversion = \"1.2\"\n\n[volumes.genoring-data]\ntype = \"shared\"\n",
        );
        put(root, "modules/genoring/services/genoring-proxy.yml", "image: nginx\n");
        put(root, "modules/genoring/env/genoring.env", "# @customizable\nSITE=demo\n");
        put(root, "modules/genoring/src/genoring-proxy/Dockerfile", "FROM nginx\n");
        put(
            root,
            "modules/brapi/module.toml",
            "name = \"brapi\"\nversion = \"2.0\"\n\n[alternatives.mock]\nsubstitute = { \"brapi-api\" = \"brapi-mock\" }\n",
        );
        put(root, "modules/brapi/services/brapi-api.yml", "image: brapi\n");
        put(root, "modules/brapi/alt/mock/brapi-mock.yml", "image: brapi-mock\n");

        let runtime = Arc::new(MockRuntime::new().with_compose_file(root.join("docker-compose.yml")));
        let engine = Engine::open(root, Box::new(Arc::clone(&runtime)))
            .unwrap()
            .with_clock(Box::new(ManualClock::new()));
        (dir, engine, runtime)
    }

    #[test]
    fn install_defaults_to_base_module() {
        let (dir, engine, _runtime) = engine();
        engine.install(&[]).unwrap();
        let genoring = ModuleName::new("genoring");
        assert!(engine.registry().is_enabled(&genoring).unwrap());
        assert_eq!(
            engine.registry().installed_version(&genoring).unwrap(),
            Some(Version::new(1, 2))
        );
        assert!(dir.path().join("env/genoring/genoring.env").is_file());
        let compose = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert!(compose.contains("genoring-proxy"));
        assert!(matches!(
            engine.install(&[genoring.clone()]).unwrap_err(),
            CoreError::AlreadyEnabled(_)
        ));
    }

    #[test]
    fn failed_uninstall_keeps_module_volumes() {
        let (dir, engine, runtime) = engine();
        let genoring = ModuleName::new("genoring");
        engine
            .install(&[genoring.clone(), ModuleName::new("brapi")])
            .unwrap();
        engine.disable(&genoring).unwrap();
        put(dir.path(), "modules/brapi/services/brapi-api.yml", "- not a mapping\n");

        assert!(engine.uninstall(&genoring).is_err());
        assert!(!runtime
            .calls()
            .iter()
            .any(|c| matches!(c, RuntimeCall::RemoveVolume(_))));
        assert!(engine.registry().record(&genoring).unwrap().is_some());
        assert!(dir.path().join("env/genoring/genoring.env").is_file());
    }

    #[test]
    fn uninstall_requires_disabled_module() {
        let (dir, engine, runtime) = engine();
        let genoring = ModuleName::new("genoring");
        engine.install(&[]).unwrap();
        assert!(matches!(
            engine.uninstall(&genoring).unwrap_err(),
            CoreError::StillEnabled(_)
        ));
        engine.disable(&genoring).unwrap();
        engine.uninstall(&genoring).unwrap();
        assert!(engine.registry().record(&genoring).unwrap().is_none());
        assert!(!dir.path().join("env/genoring/genoring.env").exists());
        assert!(runtime
            .calls()
            .contains(&RuntimeCall::RemoveVolume("genoring-data".to_owned())));
    }

    #[test]
    fn alternatives_need_a_disabled_module() {
        let (dir, engine, _runtime) = engine();
        let brapi = ModuleName::new("brapi");
        let mock = AlternativeName::new("mock");
        engine.enable_alternative(&brapi, &mock).unwrap();
        assert_eq!(
            engine.registry().active_alternatives(&brapi).unwrap(),
            vec![mock.clone()]
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("modules/brapi/services/brapi-api.yml")).unwrap(),
            "image: brapi-mock\n"
        );

        engine.install(&[brapi.clone()]).unwrap();
        assert!(matches!(
            engine.disable_alternative(&brapi, &mock).unwrap_err(),
            CoreError::StillEnabled(_)
        ));
    }

    #[test]
    fn external_host_is_validated_and_applied() {
        let (dir, engine, _runtime) = engine();
        engine.install(&[]).unwrap();
        let proxy = ServiceName::new("genoring-proxy");
        assert!(matches!(
            engine.set_external_host(&proxy, Some("not-an-ip")).unwrap_err(),
            CoreError::InvalidArgument(_)
        ));
        engine.set_external_host(&proxy, Some("10.0.0.5")).unwrap();
        let compose = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert!(!compose.contains("container_name: genoring-proxy"));

        engine.set_external_host(&proxy, None).unwrap();
        let compose = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert!(compose.contains("container_name: genoring-proxy"));
    }

    #[test]
    fn compile_tags_with_service_version() {
        let (_dir, engine, runtime) = engine();
        let genoring = ModuleName::new("genoring");
        let tag = engine
            .compile(&genoring, &ServiceName::new("genoring-proxy"))
            .unwrap();
        assert_eq!(tag, "genoring/genoring-proxy:1.2");
        assert!(runtime.calls().contains(&RuntimeCall::Build(tag)));
        assert!(engine
            .compile(&genoring, &ServiceName::new("genoring-db"))
            .is_err());
    }

    #[test]
    fn start_stop_and_status() {
        let (_dir, engine, runtime) = engine();
        engine.install(&[]).unwrap();
        engine.start(Mode::Online).unwrap();
        assert_eq!(runtime.active_profile().unwrap().as_deref(), Some("prod"));

        let status = engine.status(None).unwrap();
        assert_eq!(status.mode, Some(Mode::Online));
        assert_eq!(status.modules.len(), 1);
        assert_eq!(status.modules[0].state, Some(ContainerState::Running));

        engine.stop().unwrap();
        let status = engine.status(Some(&ModuleName::new("genoring"))).unwrap();
        assert_eq!(status.mode, None);
        assert_eq!(status.modules[0].state, Some(ContainerState::Exited));
    }

    #[test]
    fn start_waits_on_a_state_hook() {
        use std::os::unix::fs::PermissionsExt;
        let (dir, engine, _runtime) = engine();
        engine.install(&[]).unwrap();
        let script = dir.path().join("modules/genoring/hooks/local/state.sh");
        put(dir.path(), "modules/genoring/hooks/local/state.sh", "#!/bin/sh\necho restarting\n");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        match engine.start(Mode::Offline).unwrap_err() {
            CoreError::Timeout { target, state, .. } => {
                assert_eq!(target, "genoring");
                assert_eq!(state, "restarting");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn backup_and_restore_round_trip_configuration() {
        let (_dir, engine, _runtime) = engine();
        let genoring = ModuleName::new("genoring");
        engine.install(&[]).unwrap();
        engine.backup(Some("before-disable"), None).unwrap();
        engine.disable(&genoring).unwrap();
        assert!(!engine.registry().is_enabled(&genoring).unwrap());

        engine.restore("before-disable", None).unwrap();
        assert!(engine.registry().is_enabled(&genoring).unwrap());
        assert!(matches!(
            engine.restore("missing", None).unwrap_err(),
            CoreError::Store(genoring_store::StoreError::BackupNotFound(_))
        ));
    }
}
