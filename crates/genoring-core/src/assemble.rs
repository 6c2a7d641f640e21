//! Compose assembly.
//!
//! Builds the desired-state documents from the enabled modules: the main
//! `docker-compose.yml` and one `compose/dependencies.<profile>.yml` overlay
//! per concrete profile holding the start-order edges. Every service of the
//! main document `extends` the overlay selected by `GENORING_PROFILE`, so the
//! runtime never has to evaluate profile-dependent ordering itself.
//!
//! Processing order is registry order (alphabetical module name). Overrides
//! of later modules apply after those of earlier ones, then merges likewise.

use crate::deps::{start_order, StartOrder};
use crate::environment::resolve_module_env;
use crate::merge::{apply_merge, apply_override, substitute_env};
use crate::CoreError;
use genoring_schema::{
    Clause, ConstraintKind, ModuleDescriptor, ModuleName, ModuleSet, ServiceName, Version,
    VolumeKind, VolumeName,
};
use genoring_store::{list_stems, EnabledSet, EngineConfig, ModuleRegistry, ProjectLayout};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const GENERATED_HEADER: &str = "# Generated by genoring; edit module fragments and run `genoring regenerate`.\n";

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledService {
    pub owner: ModuleName,
    pub definition: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledVolume {
    /// Module whose definition won.
    pub owner: ModuleName,
    pub version: Version,
    pub kind: VolumeKind,
    /// Every module declaring this volume.
    pub declared_by: BTreeSet<ModuleName>,
    /// Host directory of an exposed volume.
    pub host_path: Option<PathBuf>,
    pub definition: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    pub services: BTreeMap<ServiceName, AssembledService>,
    pub volumes: BTreeMap<VolumeName, AssembledVolume>,
    pub dependencies: StartOrder,
    /// `service:ip` entries given to every service.
    pub extra_hosts: Vec<String>,
    pub warnings: Vec<String>,
}

impl Assembly {
    fn warn(&mut self, msg: String) {
        warn!("{msg}");
        self.warnings.push(msg);
    }

    /// Services `service` waits for under `profile`.
    pub fn depends_on(&self, profile: &str, service: &str) -> Vec<&ServiceName> {
        self.dependencies
            .get(profile)
            .and_then(|edges| edges.get(service))
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// The main compose document.
    pub fn compose_document(&self) -> Value {
        let mut services = Mapping::new();
        for (name, service) in &self.services {
            let mut def = Mapping::new();
            def.insert("container_name".into(), name.as_str().into());
            let mut extends = Mapping::new();
            extends.insert(
                "file".into(),
                ProjectLayout::dependency_overlay_rel("${GENORING_PROFILE:-offline}").into(),
            );
            extends.insert("service".into(), name.as_str().into());
            def.insert("extends".into(), Value::Mapping(extends));
            if let Value::Mapping(fragment) = &service.definition {
                for (k, v) in fragment {
                    if !def.contains_key(k) {
                        def.insert(k.clone(), v.clone());
                    }
                }
            }
            services.insert(name.as_str().into(), Value::Mapping(def));
        }

        let mut doc = Mapping::new();
        doc.insert("services".into(), Value::Mapping(services));
        if !self.volumes.is_empty() {
            let mut volumes = Mapping::new();
            for (name, volume) in &self.volumes {
                let mut def = Mapping::new();
                def.insert("name".into(), name.as_str().into());
                if let Value::Mapping(fragment) = &volume.definition {
                    for (k, v) in fragment {
                        if !def.contains_key(k) {
                            def.insert(k.clone(), v.clone());
                        }
                    }
                }
                volumes.insert(name.as_str().into(), Value::Mapping(def));
            }
            doc.insert("volumes".into(), Value::Mapping(volumes));
        }
        Value::Mapping(doc)
    }

    /// Start-order overlay of one profile. Every service appears so that
    /// `extends` resolves under any profile.
    pub fn overlay_document(&self, profile: &str) -> Value {
        let mut services = Mapping::new();
        for name in self.services.keys() {
            let mut def = Mapping::new();
            let deps = self.depends_on(profile, name);
            if !deps.is_empty() {
                def.insert(
                    "depends_on".into(),
                    Value::Sequence(deps.iter().map(|d| d.as_str().into()).collect()),
                );
            }
            services.insert(name.as_str().into(), Value::Mapping(def));
        }
        let mut doc = Mapping::new();
        doc.insert("services".into(), Value::Mapping(services));
        Value::Mapping(doc)
    }

    /// Render the main document and every overlay, keyed by profile.
    pub fn render(&self) -> Result<(String, BTreeMap<String, String>), CoreError> {
        let compose = format!(
            "{GENERATED_HEADER}{}",
            serde_yaml::to_string(&self.compose_document())?
        );
        let mut overlays = BTreeMap::new();
        for profile in self.dependencies.keys() {
            overlays.insert(
                profile.clone(),
                format!(
                    "{GENERATED_HEADER}{}",
                    serde_yaml::to_string(&self.overlay_document(profile))?
                ),
            );
        }
        Ok((compose, overlays))
    }

    /// Write the documents, drop overlays of profiles that no longer exist,
    /// and create the host directories of exposed volumes.
    pub fn write(&self, layout: &ProjectLayout) -> Result<(), CoreError> {
        let (compose, overlays) = self.render()?;
        let compose_dir = layout.compose_dir();
        fs::create_dir_all(&compose_dir)?;
        for (profile, content) in &overlays {
            write_atomic(&layout.dependency_overlay(profile), content.as_bytes())?;
        }
        for entry in fs::read_dir(&compose_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let stale = name
                .strip_prefix("dependencies.")
                .and_then(|n| n.strip_suffix(".yml"))
                .is_some_and(|profile| !overlays.contains_key(profile));
            if stale {
                fs::remove_file(&path)?;
            }
        }
        write_atomic(&layout.compose_file(), compose.as_bytes())?;
        for volume in self.volumes.values() {
            if let Some(dir) = &volume.host_path {
                fs::create_dir_all(dir)?;
            }
        }
        info!(
            "compose documents written: {} services, {} volumes",
            self.services.len(),
            self.volumes.len()
        );
        Ok(())
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), CoreError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CoreError::Io(e.error))?;
    Ok(())
}

/// Read one fragment. An empty file is an empty mapping.
fn read_fragment(path: &Path) -> Result<Value, CoreError> {
    let content = fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&content).map_err(|e| CoreError::Fragment {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    match value {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        Value::Mapping(_) => Ok(value),
        _ => Err(CoreError::Fragment {
            path: path.to_path_buf(),
            reason: "expected a mapping".to_owned(),
        }),
    }
}

#[derive(Clone, Copy)]
enum Layer {
    Override,
    Merge,
}

pub struct Assembler<'a> {
    registry: &'a ModuleRegistry,
    config: &'a EngineConfig,
}

impl<'a> Assembler<'a> {
    pub fn new(registry: &'a ModuleRegistry, config: &'a EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn assemble_enabled(&self) -> Result<Assembly, CoreError> {
        self.assemble(&self.registry.list_enabled()?)
    }

    /// Assemble `modules` (registry order). Fatal errors abort before
    /// anything is written.
    pub fn assemble(&self, modules: &[ModuleName]) -> Result<Assembly, CoreError> {
        let mut asm = Assembly::default();
        let mut envs = BTreeMap::new();
        for module in modules {
            let env = resolve_module_env(self.registry.layout(), module)?;
            let descriptor = self.registry.descriptor(module)?;
            self.collect_services(module, &descriptor, &env, &mut asm)?;
            self.collect_volumes(module, &descriptor, &env, &mut asm)?;
            envs.insert(module.clone(), env);
        }
        for layer in [Layer::Override, Layer::Merge] {
            for module in modules {
                self.apply_layer(module, &envs[module], layer, &mut asm)?;
            }
        }
        self.expand_service_profiles(&mut asm);
        self.apply_external_hosts(&mut asm)?;
        asm.dependencies = start_order(self.registry, modules, &asm.services, self.config)?;
        self.check_volume_constraints(modules, &mut asm)?;
        debug!(
            "assembled {} services and {} volumes from {} modules",
            asm.services.len(),
            asm.volumes.len(),
            modules.len()
        );
        Ok(asm)
    }

    fn collect_services(
        &self,
        module: &ModuleName,
        descriptor: &ModuleDescriptor,
        env: &BTreeMap<String, String>,
        asm: &mut Assembly,
    ) -> Result<(), CoreError> {
        let paths = self.registry.layout().module(module);
        for service in self.registry.services_of(module)? {
            if let Some(existing) = asm.services.get(&service) {
                return Err(CoreError::DuplicateService {
                    service: service.to_string(),
                    first: existing.owner.to_string(),
                    second: module.to_string(),
                });
            }
            let mut definition = read_fragment(&paths.service_fragment(&service))?;
            substitute_env(&mut definition, env);
            let described = descriptor
                .services
                .get(&service)
                .is_some_and(|s| s.description.is_some());
            if !described {
                asm.warn(format!("{module}: service '{service}' has no description"));
            }
            asm.services.insert(
                service,
                AssembledService {
                    owner: module.clone(),
                    definition,
                },
            );
        }
        Ok(())
    }

    fn collect_volumes(
        &self,
        module: &ModuleName,
        descriptor: &ModuleDescriptor,
        env: &BTreeMap<String, String>,
        asm: &mut Assembly,
    ) -> Result<(), CoreError> {
        let layout = self.registry.layout();
        let paths = layout.module(module);
        for volume in self.registry.volumes_of(module)? {
            let fragment = paths.volume_fragment(&volume);
            let mut definition = if fragment.is_file() {
                read_fragment(&fragment)?
            } else {
                Value::Mapping(Mapping::new())
            };
            substitute_env(&mut definition, env);
            let decl = descriptor.volumes.get(&volume);
            let kind = decl.map(|d| d.kind).unwrap_or_default();
            let version = descriptor.volume_version(&volume);
            let host_path = (kind == VolumeKind::Exposed).then(|| {
                decl.and_then(|d| d.mapping.as_deref())
                    .map_or_else(|| layout.volumes_dir().join(&*volume), |m| layout.root().join(m))
            });
            if let (Some(dir), Value::Mapping(map)) = (&host_path, &mut definition) {
                let mut opts = Mapping::new();
                opts.insert("type".into(), "none".into());
                opts.insert("o".into(), "bind".into());
                opts.insert("device".into(), dir.to_string_lossy().into_owned().into());
                map.insert("driver".into(), "local".into());
                map.insert("driver_opts".into(), Value::Mapping(opts));
            }

            let mut declared_by = BTreeSet::from([module.clone()]);
            if let Some(existing) = asm.volumes.get_mut(&volume) {
                if !existing.version.major_matches(&version) {
                    return Err(CoreError::VolumeMajorConflict {
                        volume: volume.to_string(),
                        first_module: existing.owner.to_string(),
                        first_version: existing.version,
                        second_module: module.to_string(),
                        second_version: version,
                    });
                }
                existing.declared_by.insert(module.clone());
                if existing.version >= version {
                    debug!(
                        "volume {volume}: keeping {} from {} over {version} from {module}",
                        existing.version, existing.owner
                    );
                    continue;
                }
                declared_by.append(&mut existing.declared_by);
            }
            asm.volumes.insert(
                volume,
                AssembledVolume {
                    owner: module.clone(),
                    version,
                    kind,
                    declared_by,
                    host_path,
                    definition,
                },
            );
        }
        Ok(())
    }

    fn apply_layer(
        &self,
        module: &ModuleName,
        env: &BTreeMap<String, String>,
        layer: Layer,
        asm: &mut Assembly,
    ) -> Result<(), CoreError> {
        let paths = self.registry.layout().module(module);
        let dir = match layer {
            Layer::Override => paths.overrides_dir(),
            Layer::Merge => paths.merges_dir(),
        };
        for stem in list_stems(&dir, "yml")? {
            let Some(target) = asm.services.get_mut(stem.as_str()) else {
                debug!("{module}: no service '{stem}' to layer onto");
                continue;
            };
            let mut fragment = read_fragment(&dir.join(format!("{stem}.yml")))?;
            substitute_env(&mut fragment, env);
            match layer {
                Layer::Override => apply_override(&mut target.definition, &fragment),
                Layer::Merge => apply_merge(&mut target.definition, &fragment),
            }
        }
        Ok(())
    }

    /// `online` in a fragment's profile list stands for every online
    /// sub-profile.
    fn expand_service_profiles(&self, asm: &mut Assembly) {
        for service in asm.services.values_mut() {
            let Some(Value::Sequence(list)) = service.definition.get_mut("profiles") else {
                continue;
            };
            let mut expanded: Vec<Value> = Vec::new();
            for entry in list.iter() {
                let names: Vec<Value> = if entry.as_str() == Some("online") {
                    self.config
                        .online_profiles
                        .iter()
                        .map(|p| p.as_str().into())
                        .collect()
                } else {
                    vec![entry.clone()]
                };
                for name in names {
                    if !expanded.contains(&name) {
                        expanded.push(name);
                    }
                }
            }
            *list = expanded;
        }
    }

    fn apply_external_hosts(&self, asm: &mut Assembly) -> Result<(), CoreError> {
        let hosts = self.registry.external_hosts()?;
        if hosts.is_empty() {
            return Ok(());
        }
        for (service, ip) in &hosts {
            if asm.services.remove(service.as_str()).is_none() {
                asm.warn(format!(
                    "external host set for '{service}', which no enabled module provides"
                ));
            }
            asm.extra_hosts.push(format!("{service}:{ip}"));
        }
        let extra = Value::Mapping(Mapping::from_iter([(
            "extra_hosts".into(),
            Value::Sequence(asm.extra_hosts.iter().map(|h| h.as_str().into()).collect()),
        )]));
        let external = |d: &Value| d.as_str().is_some_and(|d| hosts.contains_key(d));
        for service in asm.services.values_mut() {
            let Value::Mapping(def) = &mut service.definition else {
                continue;
            };
            match def.get_mut("depends_on") {
                Some(Value::Sequence(deps)) => deps.retain(|d| !external(d)),
                Some(Value::Mapping(deps)) => {
                    *deps = deps
                        .iter()
                        .filter(|(d, _)| !external(*d))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                }
                _ => {}
            }
            apply_merge(&mut service.definition, &extra);
        }
        Ok(())
    }

    fn check_volume_constraints(
        &self,
        modules: &[ModuleName],
        asm: &mut Assembly,
    ) -> Result<(), CoreError> {
        let set = self.registry.set_of(modules)?;
        for module in modules {
            let constraints = self.registry.descriptor(module)?.constraints()?.volumes;
            for constraint in constraints.iter().filter(|c| c.kind.is_gating()) {
                let matched = constraint
                    .clauses
                    .iter()
                    .any(|clause| volume_clause_matches(clause, &set, asm));
                match constraint.kind {
                    ConstraintKind::Requires if !matched => {
                        asm.warn(format!("{module}: volume requirement not met: {constraint}"));
                    }
                    ConstraintKind::Conflicts if matched => {
                        asm.warn(format!("{module}: volume conflict: {constraint}"));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// A volume clause holds when its module is enabled and either the named
/// volume exists in the final set, declared by that module, at a matching
/// version, or no volume is named and the module version matches.
fn volume_clause_matches(clause: &Clause, set: &EnabledSet, asm: &Assembly) -> bool {
    let Some(module_version) = set.enabled_version(&clause.module) else {
        return false;
    };
    match &clause.element {
        Some(volume) => asm.volumes.get(volume.as_str()).is_some_and(|v| {
            v.declared_by.contains(&clause.module) && clause.version_matches(Some(&v.version))
        }),
        None => clause.version_matches(module_version.as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genoring_store::ModuleStatus;

    struct Fixture {
        dir: tempfile::TempDir,
        registry: ModuleRegistry,
        config: EngineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let layout = ProjectLayout::new(dir.path());
            layout.initialize().unwrap();
            Self {
                registry: ModuleRegistry::new(layout),
                config: EngineConfig::default(),
                dir,
            }
        }

        fn module(&self, name: &str, descriptor_tail: &str) -> PathBuf {
            let root = self.dir.path().join("modules").join(name);
            fs::create_dir_all(&root).unwrap();
            fs::write(
                root.join("module.toml"),
                format!("name = \"{name}\"\nversion = \"1.0\"\n{descriptor_tail}"),
            )
            .unwrap();
            self.registry.invalidate();
            root
        }

        fn file(&self, rel: &str, content: &str) {
            let path = self.dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
            self.registry.invalidate();
        }

        fn enable(&self, name: &str) {
            self.registry
                .set_status(&ModuleName::new(name), ModuleStatus::Enabled, None)
                .unwrap();
        }

        fn assemble(&self) -> Result<Assembly, CoreError> {
            Assembler::new(&self.registry, &self.config).assemble_enabled()
        }
    }

    #[test]
    fn substitutes_each_modules_own_environment() {
        let fx = Fixture::new();
        fx.module("alpha", "");
        fx.module("beta", "");
        fx.file("modules/alpha/env/a.env", "PORT=8080\n");
        fx.file("modules/beta/env/b.env", "PORT=9090\n");
        fx.file("modules/alpha/services/alpha-web.yml", "image: web\nports: ['${PORT}:80']\n");
        fx.file("modules/beta/services/beta-web.yml", "image: web\nports: ['${PORT}:80']\n");
        fx.enable("alpha");
        fx.enable("beta");

        let asm = fx.assemble().unwrap();
        assert_eq!(
            asm.services["alpha-web"].definition["ports"][0],
            Value::from("8080:80")
        );
        assert_eq!(
            asm.services["beta-web"].definition["ports"][0],
            Value::from("9090:80")
        );
    }

    #[test]
    fn duplicate_service_is_fatal() {
        let fx = Fixture::new();
        fx.module("alpha", "");
        fx.module("beta", "");
        fx.file("modules/alpha/services/shared-db.yml", "image: db\n");
        fx.file("modules/beta/services/shared-db.yml", "image: db\n");
        fx.enable("alpha");
        fx.enable("beta");
        let err = fx.assemble().unwrap_err();
        assert!(matches!(err, CoreError::DuplicateService { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn profiles_online_expands_to_sub_profiles() {
        let fx = Fixture::new();
        fx.module("alpha", "");
        fx.file(
            "modules/alpha/services/alpha-web.yml",
            "image: web\nprofiles: [online, backend]\n",
        );
        fx.enable("alpha");
        let asm = fx.assemble().unwrap();
        let profiles: Vec<&str> = asm.services["alpha-web"].definition["profiles"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(profiles, vec!["prod", "staging", "dev", "backend"]);
    }

    #[test]
    fn exposed_volume_binds_host_directory() {
        let fx = Fixture::new();
        fx.module(
            "alpha",
            "[volumes.alpha-data]\ntype = \"exposed\"\nmapping = \"data/alpha\"\n",
        );
        fx.enable("alpha");
        let asm = fx.assemble().unwrap();
        let vol = &asm.volumes["alpha-data"];
        let expected = fx.dir.path().join("data/alpha");
        assert_eq!(vol.host_path.as_deref(), Some(expected.as_path()));
        assert_eq!(vol.definition["driver_opts"]["o"], Value::from("bind"));

        asm.write(fx.registry.layout()).unwrap();
        assert!(expected.is_dir());
        let doc = fs::read_to_string(fx.dir.path().join("docker-compose.yml")).unwrap();
        assert!(doc.contains("name: alpha-data"));
    }

    #[test]
    fn external_host_replaces_service() {
        let fx = Fixture::new();
        fx.module("alpha", "");
        fx.file("modules/alpha/services/alpha-web.yml", "image: web\ndepends_on: [alpha-db]\n");
        fx.file("modules/alpha/services/alpha-db.yml", "image: db\n");
        fx.enable("alpha");
        fx.registry
            .set_external_host(&ServiceName::new("alpha-db"), Some("10.0.0.7"))
            .unwrap();

        let asm = fx.assemble().unwrap();
        assert!(!asm.services.contains_key("alpha-db"));
        let web = &asm.services["alpha-web"].definition;
        assert_eq!(web["extra_hosts"][0], Value::from("alpha-db:10.0.0.7"));
        assert!(web["depends_on"].as_sequence().unwrap().is_empty());
    }

    #[test]
    fn unmet_volume_requirement_is_a_warning() {
        let fx = Fixture::new();
        fx.module(
            "alpha",
            "[dependencies]\nvolumes = [\"REQUIRES beta beta-data\"]\n",
        );
        fx.file("modules/alpha/services/alpha-web.yml", "image: web\n");
        fx.enable("alpha");
        let asm = fx.assemble().unwrap();
        assert!(asm
            .warnings
            .iter()
            .any(|w| w.contains("volume requirement not met")));
    }

    #[test]
    fn stale_overlays_are_removed() {
        let fx = Fixture::new();
        fx.module("alpha", "");
        fx.file("modules/alpha/services/alpha-web.yml", "image: web\n");
        fx.file("compose/dependencies.retired.yml", "services: {}\n");
        fx.enable("alpha");
        fx.assemble().unwrap().write(fx.registry.layout()).unwrap();
        let compose = fx.dir.path().join("compose");
        assert!(!compose.join("dependencies.retired.yml").exists());
        assert!(compose.join("dependencies.offline.yml").exists());
        assert!(compose.join("dependencies.prod.yml").exists());
    }
}
