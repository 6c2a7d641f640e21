//! Hook discovery and execution.
//!
//! Modules ship two kinds of hooks:
//!
//! - local hooks, `hooks/local/<event>[_<service>][.ext]`, run on the host
//!   while the platform is stopped (except `state`, which may run at any
//!   time); a service suffix is passed to the script as `GENORING_SERVICE`;
//! - container hooks, `hooks/container/<event>_<service>.sh`, run inside the
//!   running container of `<service>` as root.
//!
//! [`HookRegistry::scan`] indexes every hook once per orchestrator, so the
//! matching rules live here and nowhere else.

use crate::environment::resolve_module_env;
use crate::CoreError;
use genoring_runtime::{ContainerRuntime, ExecutionContext};
use genoring_schema::{ModuleName, ServiceName};
use genoring_store::{ModuleRegistry, ProjectLayout};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the modules tree is copied inside containers.
pub const CONTAINER_MODULES_DIR: &str = "/genoring/modules";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum HookTarget {
    /// Host-side hook, optionally about one service.
    Local(Option<ServiceName>),
    Container(ServiceName),
}

impl HookTarget {
    pub fn service(&self) -> Option<&ServiceName> {
        match self {
            Self::Local(service) => service.as_ref(),
            Self::Container(service) => Some(service),
        }
    }
}

/// Split a hook file stem into its event and optional service. Event names
/// never contain `_`.
fn split_hook_stem(stem: &str) -> Option<(&str, Option<&str>)> {
    match stem.split_once('_') {
        Some((event, service)) if !event.is_empty() && !service.is_empty() => {
            Some((event, Some(service)))
        }
        Some(_) => None,
        None if stem.is_empty() => None,
        None => Some((stem, None)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookHandle {
    pub module: ModuleName,
    pub event: String,
    pub path: PathBuf,
    pub target: HookTarget,
}

impl HookHandle {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Script location once the modules tree is copied into a container.
    pub fn container_path(&self) -> String {
        format!(
            "{CONTAINER_MODULES_DIR}/{}/hooks/container/{}",
            self.module,
            self.file_name()
        )
    }
}

impl fmt::Display for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.file_name())
    }
}

/// `(event, module)` → hooks, built by scanning module directories.
#[derive(Debug, Default)]
pub struct HookRegistry {
    local: BTreeMap<(String, ModuleName), Vec<HookHandle>>,
    container: BTreeMap<(String, ModuleName), Vec<HookHandle>>,
}

fn hook_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, CoreError> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if name.starts_with('.') || name.ends_with('~') {
            continue;
        }
        files.push((name, entry.path()));
    }
    files.sort();
    Ok(files)
}

impl HookRegistry {
    pub fn scan(layout: &ProjectLayout, modules: &[ModuleName]) -> Result<Self, CoreError> {
        let mut registry = Self::default();
        for module in modules {
            let paths = layout.module(module);
            for (name, path) in hook_files(&paths.local_hooks_dir())? {
                let stem = name.split('.').next().unwrap_or_default();
                let Some((event, service)) = split_hook_stem(stem) else {
                    debug!("{module}: {name} is not a local hook");
                    continue;
                };
                let target = HookTarget::Local(service.map(ServiceName::new));
                let handles = registry
                    .local
                    .entry((event.to_owned(), module.clone()))
                    .or_default();
                if let Some(existing) = handles.iter().find(|h| h.target == target) {
                    warn!("{module}: ignoring {name}, {stem} hook already provided by {existing}");
                    continue;
                }
                handles.push(HookHandle {
                    module: module.clone(),
                    event: event.to_owned(),
                    path,
                    target,
                });
            }
            for (name, path) in hook_files(&paths.container_hooks_dir())? {
                let parsed = name
                    .strip_suffix(".sh")
                    .and_then(split_hook_stem)
                    .and_then(|(event, service)| service.map(|service| (event, service)));
                let Some((event, service)) = parsed else {
                    debug!("{module}: {name} is not a container hook");
                    continue;
                };
                registry
                    .container
                    .entry((event.to_owned(), module.clone()))
                    .or_default()
                    .push(HookHandle {
                        module: module.clone(),
                        event: event.to_owned(),
                        path,
                        target: HookTarget::Container(ServiceName::new(service)),
                    });
            }
        }
        Ok(registry)
    }

    /// Local `event` hooks of `module`; the service-less one sorts first.
    pub fn local(&self, event: &str, module: &ModuleName) -> &[HookHandle] {
        self.local
            .get(&(event.to_owned(), module.clone()))
            .map_or(&[], Vec::as_slice)
    }

    pub fn container(&self, event: &str, module: &ModuleName) -> &[HookHandle] {
        self.container
            .get(&(event.to_owned(), module.clone()))
            .map_or(&[], Vec::as_slice)
    }

    /// Container hooks for `event` among `candidates` eligible under `scope`:
    /// any hook when no scope is given, hooks authored by the scoped module,
    /// and with `related`, hooks targeting a service the scoped module owns.
    pub fn eligible_container_hooks(
        &self,
        event: &str,
        candidates: &[ModuleName],
        scope: Option<&ModuleName>,
        related: bool,
        owner_of: impl Fn(&ServiceName) -> Option<ModuleName>,
    ) -> Vec<&HookHandle> {
        candidates
            .iter()
            .flat_map(|m| self.container(event, m))
            .filter(|hook| {
                let Some(scope) = scope else {
                    return true;
                };
                if &hook.module == scope {
                    return true;
                }
                match &hook.target {
                    HookTarget::Container(service) if related => {
                        owner_of(service).as_ref() == Some(scope)
                    }
                    _ => false,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Ok,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResult {
    pub module: ModuleName,
    pub hook: String,
    pub target: HookTarget,
    pub outcome: HookOutcome,
    pub stdout: String,
}

/// Per-hook results of one event. A failing hook never stops the others;
/// the caller decides what failures mean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookReport {
    pub event: String,
    pub results: Vec<HookResult>,
}

impl HookReport {
    pub fn new(event: &str) -> Self {
        Self {
            event: event.to_owned(),
            results: Vec::new(),
        }
    }

    fn push(&mut self, hook: &HookHandle, outcome: HookOutcome, stdout: String) {
        match &outcome {
            HookOutcome::Ok => debug!("hook {hook} succeeded"),
            HookOutcome::Failed(reason) => warn!("hook {hook} failed: {reason}"),
            HookOutcome::Skipped(reason) => warn!("hook {hook} skipped: {reason}"),
        }
        self.results.push(HookResult {
            module: hook.module.clone(),
            hook: hook.file_name(),
            target: hook.target.clone(),
            outcome,
            stdout,
        });
    }

    pub fn is_success(&self) -> bool {
        !self
            .results
            .iter()
            .any(|r| matches!(r.outcome, HookOutcome::Failed(_)))
    }

    /// Failure messages grouped by module.
    pub fn failures(&self) -> BTreeMap<ModuleName, Vec<String>> {
        let mut out: BTreeMap<ModuleName, Vec<String>> = BTreeMap::new();
        for r in &self.results {
            if let HookOutcome::Failed(reason) = &r.outcome {
                out.entry(r.module.clone())
                    .or_default()
                    .push(format!("{}: {reason}", r.hook));
            }
        }
        out
    }

    pub fn skipped(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                HookOutcome::Skipped(reason) => Some(format!("{}/{}: {reason}", r.module, r.hook)),
                _ => None,
            })
            .collect()
    }

    /// Convert accumulated failures into [`CoreError::HookFailed`].
    pub fn into_result(self) -> Result<Self, CoreError> {
        if self.is_success() {
            return Ok(self);
        }
        let details = self
            .failures()
            .into_iter()
            .flat_map(|(module, msgs)| msgs.into_iter().map(move |m| format!("  {module}/{m}")))
            .collect::<Vec<_>>()
            .join("\n");
        Err(CoreError::HookFailed {
            event: self.event,
            details,
        })
    }
}

/// Runs hooks for one engine invocation.
pub struct HookOrchestrator<'a> {
    registry: &'a ModuleRegistry,
    runtime: &'a dyn ContainerRuntime,
    hooks: HookRegistry,
    base: ExecutionContext,
}

impl<'a> HookOrchestrator<'a> {
    /// Scan every available module's hooks.
    pub fn new(
        registry: &'a ModuleRegistry,
        runtime: &'a dyn ContainerRuntime,
        base: ExecutionContext,
    ) -> Result<Self, CoreError> {
        let hooks = HookRegistry::scan(registry.layout(), &registry.list_available()?)?;
        Ok(Self {
            registry,
            runtime,
            hooks,
            base,
        })
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    fn selected_modules(&self, scope: Option<&ModuleName>) -> Result<Vec<ModuleName>, CoreError> {
        Ok(match scope {
            Some(m) => vec![m.clone()],
            None => self.registry.list_enabled()?,
        })
    }

    fn container_candidates(
        &self,
        event: &str,
        scope: Option<&ModuleName>,
        related: bool,
    ) -> Result<Vec<HookHandle>, CoreError> {
        let mut candidates = self.registry.list_enabled()?;
        if let Some(scope) = scope {
            if !candidates.contains(scope) {
                candidates.push(scope.clone());
            }
        }
        let mut owners: BTreeMap<ServiceName, Option<ModuleName>> = BTreeMap::new();
        for hook in candidates.iter().flat_map(|m| self.hooks.container(event, m)) {
            if let HookTarget::Container(service) = &hook.target {
                if !owners.contains_key(service) {
                    owners.insert(service.clone(), self.registry.service_owner(service)?);
                }
            }
        }
        Ok(self
            .hooks
            .eligible_container_hooks(event, &candidates, scope, related, |s| {
                owners.get(s).cloned().flatten()
            })
            .into_iter()
            .cloned()
            .collect())
    }

    /// Fail when a module about to run `event` hooks lacks the `revert`
    /// counterpart, so rollback never discovers a missing hook.
    pub fn validate_local_revert(
        &self,
        event: &str,
        revert: &str,
        scope: Option<&ModuleName>,
    ) -> Result<(), CoreError> {
        for module in self.selected_modules(scope)? {
            for hook in self.hooks.local(event, &module) {
                let has_revert = self
                    .hooks
                    .local(revert, &module)
                    .iter()
                    .any(|r| r.target == hook.target);
                if !has_revert {
                    return Err(CoreError::MissingRevertHook {
                        module: module.to_string(),
                        event: hook.file_name(),
                        revert: revert.to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn validate_container_revert(
        &self,
        event: &str,
        revert: &str,
        scope: Option<&ModuleName>,
        related: bool,
    ) -> Result<(), CoreError> {
        for hook in self.container_candidates(event, scope, related)? {
            let has_revert = self
                .hooks
                .container(revert, &hook.module)
                .iter()
                .any(|r| r.target == hook.target);
            if !has_revert {
                return Err(CoreError::MissingRevertHook {
                    module: hook.module.to_string(),
                    event: hook.file_name(),
                    revert: revert.to_owned(),
                });
            }
        }
        Ok(())
    }

    fn context(&self, module: &ModuleName, event: &str) -> Result<ExecutionContext, CoreError> {
        let layout = self.registry.layout();
        Ok(self
            .base
            .clone()
            .with_envs(resolve_module_env(layout, module)?)
            .with_env("GENORING_MODULE", module.as_str())
            .with_env("GENORING_EVENT", event))
    }

    /// Run the local `event` hook of the scoped module, or of every enabled
    /// module when no scope is given.
    pub fn run_local(
        &self,
        event: &str,
        scope: Option<&ModuleName>,
        args: &[String],
    ) -> Result<HookReport, CoreError> {
        let mut report = HookReport::new(event);
        let root = self.registry.layout().root().to_path_buf();
        for module in self.selected_modules(scope)? {
            for hook in self.hooks.local(event, &module) {
                info!("running local {event} hook {hook}");
                let mut ctx = self
                    .context(&module, event)?
                    .with_env("GENORING_DIR", root.to_string_lossy())
                    .in_dir(&root);
                if let Some(service) = hook.target.service() {
                    ctx = ctx.with_env("GENORING_SERVICE", service.as_str());
                }
                if let Err(e) = ensure_executable(&hook.path) {
                    report.push(hook, HookOutcome::Failed(e.to_string()), String::new());
                    continue;
                }
                match ctx.run(&hook.path, args) {
                    Ok(out) if out.success() => report.push(hook, HookOutcome::Ok, out.stdout),
                    Ok(out) => report.push(
                        hook,
                        HookOutcome::Failed(format!(
                            "exit code {}: {}",
                            out.code,
                            out.stderr.trim()
                        )),
                        out.stdout,
                    ),
                    Err(e) => report.push(hook, HookOutcome::Failed(e.to_string()), String::new()),
                }
            }
        }
        Ok(report)
    }

    /// Run eligible container hooks for `event`. Each target container gets a
    /// fresh copy of the modules tree before its first hook of this call.
    pub fn run_container(
        &self,
        event: &str,
        scope: Option<&ModuleName>,
        related: bool,
    ) -> Result<HookReport, CoreError> {
        let mut report = HookReport::new(event);
        let mut initialized: BTreeSet<ServiceName> = BTreeSet::new();
        for hook in self.container_candidates(event, scope, related)? {
            let HookTarget::Container(service) = &hook.target else {
                continue;
            };
            let state = self.runtime.container_state(service)?;
            if !state.is_running() {
                let state = if state.to_string().is_empty() {
                    "absent".to_owned()
                } else {
                    state.to_string()
                };
                report.push(
                    &hook,
                    HookOutcome::Skipped(format!("container {service} is {state}")),
                    String::new(),
                );
                continue;
            }
            if !initialized.contains(service) {
                if let Err(e) = self.refresh_modules(service) {
                    report.push(&hook, HookOutcome::Failed(e.to_string()), String::new());
                    continue;
                }
                initialized.insert(service.clone());
            }

            info!("running {event} hook of {} in {service}", hook.module);
            let mut ctx = self.context(&hook.module, event)?;
            if let Some(owner) = self.registry.service_owner(service)? {
                if owner != hook.module {
                    let mut env = resolve_module_env(self.registry.layout(), &owner)?;
                    env.extend(ctx.env);
                    ctx.env = env;
                }
            }
            let ctx = ctx.with_env("GENORING_SERVICE", service.as_str());
            let script = hook.container_path();
            let chmod = vec!["chmod".to_owned(), "+x".to_owned(), script.clone()];
            let outcome = self
                .runtime
                .exec(service, &chmod, &ctx)
                .and_then(|_| self.runtime.exec(service, &[script], &ctx));
            match outcome {
                Ok(out) if out.success() => report.push(&hook, HookOutcome::Ok, out.stdout),
                Ok(out) => report.push(
                    &hook,
                    HookOutcome::Failed(format!("exit code {}: {}", out.code, out.stderr.trim())),
                    out.stdout,
                ),
                Err(e) => report.push(&hook, HookOutcome::Failed(e.to_string()), String::new()),
            }
        }
        Ok(report)
    }

    fn refresh_modules(&self, service: &ServiceName) -> Result<(), CoreError> {
        debug!("copying modules into {service}");
        let root_ctx = self.base.clone();
        let parent = CONTAINER_MODULES_DIR
            .rsplit_once('/')
            .map_or("/", |(p, _)| p)
            .to_owned();
        for cmd in [
            vec!["rm".to_owned(), "-rf".to_owned(), CONTAINER_MODULES_DIR.to_owned()],
            vec!["mkdir".to_owned(), "-p".to_owned(), parent],
        ] {
            let out = self.runtime.exec(service, &cmd, &root_ctx)?;
            if !out.success() {
                return Err(CoreError::Runtime(
                    genoring_runtime::RuntimeError::CommandFailed {
                        command: cmd.join(" "),
                        code: out.code,
                        stderr: out.stderr.trim().to_owned(),
                    },
                ));
            }
        }
        self.runtime.copy_into(
            &self.registry.layout().modules_dir(),
            service,
            CONTAINER_MODULES_DIR,
        )?;
        Ok(())
    }
}

fn ensure_executable(path: &Path) -> Result<(), std::io::Error> {
    let mut perms = fs::metadata(path)?.permissions();
    if perms.mode() & 0o111 == 0 {
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use genoring_runtime::{MockRuntime, Platform, RuntimeCall};
    use genoring_store::ModuleStatus;

    fn m(name: &str) -> ModuleName {
        ModuleName::new(name)
    }

    struct Fixture {
        dir: tempfile::TempDir,
        registry: ModuleRegistry,
    }

    impl Fixture {
        fn new(modules: &[&str]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for name in modules {
                let root = dir.path().join("modules").join(name);
                fs::create_dir_all(root.join("services")).unwrap();
                fs::write(
                    root.join("module.toml"),
                    format!("name = \"{name}\"\nversion = \"1.0\"\n"),
                )
                .unwrap();
            }
            let layout = ProjectLayout::new(dir.path());
            layout.initialize().unwrap();
            Self {
                registry: ModuleRegistry::new(layout),
                dir,
            }
        }

        fn file(&self, rel: &str, content: &str) {
            let path = self.dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            self.registry.invalidate();
        }

        fn enable(&self, name: &str) {
            self.registry
                .set_status(&m(name), ModuleStatus::Enabled, None)
                .unwrap();
        }

        fn orchestrator<'a>(&'a self, runtime: &'a MockRuntime) -> HookOrchestrator<'a> {
            HookOrchestrator::new(
                &self.registry,
                runtime,
                ExecutionContext::new(Platform::detect()),
            )
            .unwrap()
        }
    }

    #[test]
    fn scan_indexes_local_and_container_hooks() {
        let fx = Fixture::new(&["gigwa"]);
        fx.file("modules/gigwa/hooks/local/enable.sh", "#!/bin/sh\n");
        fx.file("modules/gigwa/hooks/local/state", "#!/bin/sh\n");
        fx.file("modules/gigwa/hooks/local/.hidden", "");
        fx.file("modules/gigwa/hooks/container/enable_genoring-proxy.sh", "");
        fx.file("modules/gigwa/hooks/container/enable_genoring-gigwa.sh", "");
        fx.file("modules/gigwa/hooks/container/README", "");

        fx.file("modules/gigwa/hooks/local/enable_genoring-gigwa.sh", "#!/bin/sh\n");

        let reg = HookRegistry::scan(fx.registry.layout(), &[m("gigwa")]).unwrap();
        let enable: Vec<&HookTarget> = reg
            .local("enable", &m("gigwa"))
            .iter()
            .map(|h| &h.target)
            .collect();
        assert_eq!(
            enable,
            vec![
                &HookTarget::Local(None),
                &HookTarget::Local(Some(ServiceName::new("genoring-gigwa"))),
            ]
        );
        assert_eq!(reg.local("state", &m("gigwa")).len(), 1);
        assert!(reg.local("disable", &m("gigwa")).is_empty());
        assert!(reg.local("enable_genoring-gigwa", &m("gigwa")).is_empty());
        let targets: Vec<&HookTarget> = reg
            .container("enable", &m("gigwa"))
            .iter()
            .map(|h| &h.target)
            .collect();
        assert_eq!(
            targets,
            vec![
                &HookTarget::Container(ServiceName::new("genoring-gigwa")),
                &HookTarget::Container(ServiceName::new("genoring-proxy")),
            ]
        );
        assert_eq!(
            reg.container("enable", &m("gigwa"))[0].container_path(),
            "/genoring/modules/gigwa/hooks/container/enable_genoring-gigwa.sh"
        );
    }

    #[test]
    fn container_eligibility_rule() {
        let fx = Fixture::new(&["genoring", "gigwa"]);
        fx.file("modules/genoring/hooks/container/enable_genoring-proxy.sh", "");
        fx.file("modules/genoring/hooks/container/enable_genoring-gigwa.sh", "");
        fx.file("modules/gigwa/hooks/container/enable_genoring-proxy.sh", "");
        let reg = HookRegistry::scan(fx.registry.layout(), &[m("genoring"), m("gigwa")]).unwrap();
        let all = [m("genoring"), m("gigwa")];
        let owner = |s: &ServiceName| {
            Some(if s.as_str() == "genoring-gigwa" {
                m("gigwa")
            } else {
                m("genoring")
            })
        };
        let names = |hooks: Vec<&HookHandle>| -> Vec<String> {
            hooks.iter().map(|h| h.to_string()).collect()
        };

        // (i) no scope: everything.
        assert_eq!(reg.eligible_container_hooks("enable", &all, None, false, owner).len(), 3);
        // (ii) scope equals the author.
        assert_eq!(
            names(reg.eligible_container_hooks("enable", &all, Some(&m("gigwa")), false, owner)),
            vec!["gigwa/enable_genoring-proxy.sh"]
        );
        // (iii) related: also hooks of other modules targeting the scope's services.
        assert_eq!(
            names(reg.eligible_container_hooks("enable", &all, Some(&m("gigwa")), true, owner)),
            vec![
                "genoring/enable_genoring-gigwa.sh",
                "gigwa/enable_genoring-proxy.sh"
            ]
        );
    }

    #[test]
    fn local_failures_do_not_stop_other_modules() {
        let fx = Fixture::new(&["alpha", "beta", "gamma"]);
        fx.file("modules/alpha/hooks/local/backup.sh", "#!/bin/sh\nexit 4\n");
        fx.file("modules/beta/env/beta.env", "BETA_MSG=hello\n");
        fx.file(
            "modules/beta/hooks/local/backup.sh",
            "#!/bin/sh\necho \"$BETA_MSG $GENORING_MODULE $1\"\n",
        );
        fx.enable("alpha");
        fx.enable("beta");
        fx.enable("gamma");

        let runtime = MockRuntime::new();
        let orch = fx.orchestrator(&runtime);
        let report = orch
            .run_local("backup", None, &["nightly".to_owned()])
            .unwrap();
        assert_eq!(report.results.len(), 2);
        assert!(!report.is_success());
        assert_eq!(report.failures()[&m("alpha")].len(), 1);
        assert_eq!(report.results[1].outcome, HookOutcome::Ok);
        assert_eq!(report.results[1].stdout.trim(), "hello beta nightly");
        assert!(matches!(
            report.into_result().unwrap_err(),
            CoreError::HookFailed { .. }
        ));
    }

    #[test]
    fn service_local_hooks_receive_their_service() {
        let fx = Fixture::new(&["gigwa"]);
        fx.file(
            "modules/gigwa/hooks/local/enable.sh",
            "#!/bin/sh\necho \"any:$GENORING_SERVICE\"\n",
        );
        fx.file(
            "modules/gigwa/hooks/local/enable_genoring-gigwa.sh",
            "#!/bin/sh\necho \"one:$GENORING_SERVICE\"\n",
        );
        fx.file("modules/gigwa/hooks/local/disable.sh", "#!/bin/sh\n");
        fx.enable("gigwa");

        let runtime = MockRuntime::new();
        let orch = fx.orchestrator(&runtime);
        let report = orch.run_local("enable", Some(&m("gigwa")), &[]).unwrap();
        let out: Vec<&str> = report.results.iter().map(|r| r.stdout.trim()).collect();
        assert_eq!(out, vec!["any:", "one:genoring-gigwa"]);

        // The per-service hook needs its own revert.
        assert!(matches!(
            orch.validate_local_revert("enable", "disable", Some(&m("gigwa")))
                .unwrap_err(),
            CoreError::MissingRevertHook { .. }
        ));
    }

    #[test]
    fn container_hooks_copy_modules_once_and_skip_stopped_targets() {
        let fx = Fixture::new(&["genoring", "gigwa"]);
        fx.file("modules/genoring/services/genoring-proxy.yml", "image: nginx\n");
        fx.file("modules/genoring/services/genoring-db.yml", "image: db\n");
        fx.file("modules/gigwa/hooks/container/enable_genoring-proxy.sh", "");
        fx.file("modules/gigwa/hooks/container/enable_genoring-db.sh", "");
        fx.file("modules/gigwa/hooks/container/enable_genoring-gigwa.sh", "");
        fx.enable("genoring");

        let runtime = MockRuntime::new()
            .with_container("genoring-proxy")
            .with_container("genoring-db");
        runtime.up("offline").unwrap();
        runtime.pin_state("genoring-db", genoring_runtime::ContainerState::Exited);
        runtime.clear_calls();

        let orch = fx.orchestrator(&runtime);
        let report = orch.run_container("enable", Some(&m("gigwa")), false).unwrap();
        assert!(report.is_success());
        assert_eq!(report.skipped().len(), 2);

        let copies = runtime
            .calls()
            .into_iter()
            .filter(|c| matches!(c, RuntimeCall::CopyInto { .. }))
            .count();
        assert_eq!(copies, 1);
        assert_eq!(
            runtime.exec_log().last().unwrap(),
            "genoring-proxy: /genoring/modules/gigwa/hooks/container/enable_genoring-proxy.sh"
        );
        assert!(runtime.calls().iter().all(|c| match c {
            RuntimeCall::Exec { user, .. } => user == "root",
            _ => true,
        }));
    }

    #[test]
    fn missing_revert_hook_is_detected() {
        let fx = Fixture::new(&["gigwa"]);
        fx.file("modules/gigwa/hooks/local/enable.sh", "#!/bin/sh\n");
        let runtime = MockRuntime::new();
        let orch = fx.orchestrator(&runtime);
        let err = orch
            .validate_local_revert("enable", "disable", Some(&m("gigwa")))
            .unwrap_err();
        assert!(matches!(err, CoreError::MissingRevertHook { .. }));

        fx.file("modules/gigwa/hooks/local/disable.sh", "#!/bin/sh\n");
        let orch = fx.orchestrator(&runtime);
        assert!(orch
            .validate_local_revert("enable", "disable", Some(&m("gigwa")))
            .is_ok());
    }
}
