//! Module discovery and the persisted module configuration.
//!
//! Available modules are the directories under `modules/` whose name passes
//! [`is_valid_module_name`]. Status, installed version, and active
//! alternatives persist in `config/modules.toml`, which is rewritten
//! wholesale on every mutation.
//!
//! Derived lookups (enabled/disabled partitions, service and volume
//! ownership, parsed descriptors) are memoised in a [`RegistryCache`] owned by
//! the registry. Every mutating call invalidates it before returning.

use crate::layout::{list_stems, ProjectLayout};
use crate::{fsync_dir, StoreError};
use genoring_schema::{
    is_valid_module_name, load_descriptor, AlternativeName, ModuleDescriptor, ModuleName,
    ModuleSet, ServiceName, Version, VolumeName,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Enabled,
    Disabled,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Enabled => write!(f, "enabled"),
            ModuleStatus::Disabled => write!(f, "disabled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleRecord {
    pub status: ModuleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<AlternativeName>,
}

/// Contents of `config/modules.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedConfig {
    #[serde(default)]
    pub modules: BTreeMap<ModuleName, ModuleRecord>,
    /// Services redirected to an external host: service → IP address.
    #[serde(default)]
    pub external_hosts: BTreeMap<ServiceName, String>,
}

/// Memoised registry lookups. Cleared as a whole by [`invalidate`](Self::invalidate).
#[derive(Debug, Default)]
pub struct RegistryCache {
    config: Option<PersistedConfig>,
    available: Option<Vec<ModuleName>>,
    descriptors: BTreeMap<ModuleName, ModuleDescriptor>,
    services: BTreeMap<ModuleName, Vec<ServiceName>>,
    volumes: BTreeMap<ModuleName, Vec<VolumeName>>,
}

impl RegistryCache {
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.config.is_none()
            && self.available.is_none()
            && self.descriptors.is_empty()
            && self.services.is_empty()
            && self.volumes.is_empty()
    }
}

pub struct ModuleRegistry {
    layout: ProjectLayout,
    cache: RefCell<RegistryCache>,
}

impl ModuleRegistry {
    pub fn new(layout: ProjectLayout) -> Self {
        Self {
            layout,
            cache: RefCell::new(RegistryCache::default()),
        }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Drop every memoised lookup. Called by every mutation; also useful
    /// after module files change on disk behind the registry's back.
    pub fn invalidate(&self) {
        self.cache.borrow_mut().invalidate();
    }

    pub fn cache_is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }

    /// Module directories on disk, sorted by name.
    pub fn list_available(&self) -> Result<Vec<ModuleName>, StoreError> {
        if let Some(available) = &self.cache.borrow().available {
            return Ok(available.clone());
        }
        let dir = self.layout.modules_dir();
        let mut names = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if is_valid_module_name(name) {
                        names.push(ModuleName::new(name));
                    }
                }
            }
        }
        names.sort();
        self.cache.borrow_mut().available = Some(names.clone());
        Ok(names)
    }

    pub fn list_enabled(&self) -> Result<Vec<ModuleName>, StoreError> {
        self.partition(true)
    }

    pub fn list_disabled(&self) -> Result<Vec<ModuleName>, StoreError> {
        self.partition(false)
    }

    fn partition(&self, enabled: bool) -> Result<Vec<ModuleName>, StoreError> {
        let config = self.config()?;
        Ok(self
            .list_available()?
            .into_iter()
            .filter(|m| {
                let is_enabled = config
                    .modules
                    .get(m)
                    .is_some_and(|r| r.status == ModuleStatus::Enabled);
                is_enabled == enabled
            })
            .collect())
    }

    pub fn is_available(&self, module: &ModuleName) -> Result<bool, StoreError> {
        Ok(self.list_available()?.contains(module))
    }

    pub fn is_enabled(&self, module: &ModuleName) -> Result<bool, StoreError> {
        Ok(self.list_enabled()?.contains(module))
    }

    pub fn record(&self, module: &ModuleName) -> Result<Option<ModuleRecord>, StoreError> {
        Ok(self.config()?.modules.get(module).cloned())
    }

    /// Version recorded at install/update time, if any.
    pub fn installed_version(&self, module: &ModuleName) -> Result<Option<Version>, StoreError> {
        Ok(self.record(module)?.and_then(|r| r.version))
    }

    pub fn descriptor(&self, module: &ModuleName) -> Result<ModuleDescriptor, StoreError> {
        if let Some(d) = self.cache.borrow().descriptors.get(module) {
            return Ok(d.clone());
        }
        self.require_available(module)?;
        let descriptor = load_descriptor(self.layout.module(module).root())?;
        self.cache
            .borrow_mut()
            .descriptors
            .insert(module.clone(), descriptor.clone());
        Ok(descriptor)
    }

    /// Services whose fragment lives in the module's `services/` directory.
    pub fn services_of(&self, module: &ModuleName) -> Result<Vec<ServiceName>, StoreError> {
        if let Some(s) = self.cache.borrow().services.get(module) {
            return Ok(s.clone());
        }
        let services: Vec<ServiceName> =
            list_stems(&self.layout.module(module).services_dir(), "yml")?
                .into_iter()
                .map(ServiceName::from)
                .collect();
        self.cache
            .borrow_mut()
            .services
            .insert(module.clone(), services.clone());
        Ok(services)
    }

    /// Volumes with a fragment under `volumes/` or a descriptor entry.
    pub fn volumes_of(&self, module: &ModuleName) -> Result<Vec<VolumeName>, StoreError> {
        if let Some(v) = self.cache.borrow().volumes.get(module) {
            return Ok(v.clone());
        }
        let mut volumes: BTreeSet<VolumeName> =
            list_stems(&self.layout.module(module).volumes_dir(), "yml")?
                .into_iter()
                .map(VolumeName::from)
                .collect();
        volumes.extend(self.descriptor(module)?.volumes.into_keys());
        let volumes: Vec<VolumeName> = volumes.into_iter().collect();
        self.cache
            .borrow_mut()
            .volumes
            .insert(module.clone(), volumes.clone());
        Ok(volumes)
    }

    /// First enabled module, in registry order, that ships `service`.
    pub fn service_owner(&self, service: &str) -> Result<Option<ModuleName>, StoreError> {
        for module in self.list_enabled()? {
            if self.services_of(&module)?.iter().any(|s| s == service) {
                return Ok(Some(module));
            }
        }
        Ok(None)
    }

    /// Every enabled module declaring `volume`.
    pub fn volume_owners(&self, volume: &str) -> Result<Vec<ModuleName>, StoreError> {
        let mut owners = Vec::new();
        for module in self.list_enabled()? {
            if self.volumes_of(&module)?.iter().any(|v| v == volume) {
                owners.push(module);
            }
        }
        Ok(owners)
    }

    pub fn active_alternatives(
        &self,
        module: &ModuleName,
    ) -> Result<Vec<AlternativeName>, StoreError> {
        Ok(self
            .record(module)?
            .map(|r| r.alternatives)
            .unwrap_or_default())
    }

    pub fn external_hosts(&self) -> Result<BTreeMap<ServiceName, String>, StoreError> {
        Ok(self.config()?.external_hosts)
    }

    /// Snapshot of the enabled set for constraint evaluation.
    pub fn enabled_set(&self) -> Result<EnabledSet, StoreError> {
        self.set_of(&self.list_enabled()?)
    }

    /// Same as [`enabled_set`](Self::enabled_set) for an arbitrary module list.
    pub fn set_of(&self, modules: &[ModuleName]) -> Result<EnabledSet, StoreError> {
        let mut set = EnabledSet::default();
        for module in modules {
            let version = self.effective_version(module)?;
            let elements = self.elements_of(module)?;
            set.insert(module.clone(), version, elements);
        }
        Ok(set)
    }

    /// Installed version, falling back to the descriptor's.
    pub fn effective_version(&self, module: &ModuleName) -> Result<Option<Version>, StoreError> {
        Ok(match self.installed_version(module)? {
            Some(v) => Some(v),
            None => self.descriptor(module).ok().map(|d| d.version),
        })
    }

    /// Service and volume names a module provides.
    pub fn elements_of(&self, module: &ModuleName) -> Result<BTreeSet<String>, StoreError> {
        let mut elements: BTreeSet<String> = self
            .services_of(module)?
            .into_iter()
            .map(ServiceName::into_inner)
            .collect();
        elements.extend(self.volumes_of(module)?.into_iter().map(VolumeName::into_inner));
        Ok(elements)
    }

    // -- mutations --------------------------------------------------------

    pub fn set_status(
        &self,
        module: &ModuleName,
        status: ModuleStatus,
        version: Option<Version>,
    ) -> Result<(), StoreError> {
        self.require_available(module)?;
        self.mutate(|config| {
            let record = config
                .modules
                .entry(module.clone())
                .or_insert_with(|| ModuleRecord {
                    status,
                    version: None,
                    alternatives: Vec::new(),
                });
            record.status = status;
            if version.is_some() {
                record.version = version;
            }
        })?;
        debug!("module {module} marked {status}");
        Ok(())
    }

    /// Forget a module. Its directory is left untouched.
    pub fn remove(&self, module: &ModuleName) -> Result<(), StoreError> {
        self.mutate(|config| {
            config.modules.remove(module);
        })?;
        debug!("module {module} removed from configuration");
        Ok(())
    }

    pub fn set_alternatives(
        &self,
        module: &ModuleName,
        alternatives: Vec<AlternativeName>,
    ) -> Result<(), StoreError> {
        self.require_available(module)?;
        self.mutate(|config| {
            let record = config
                .modules
                .entry(module.clone())
                .or_insert_with(|| ModuleRecord {
                    status: ModuleStatus::Disabled,
                    version: None,
                    alternatives: Vec::new(),
                });
            record.alternatives = alternatives;
        })
    }

    /// Redirect `service` to an external IP, or clear the redirection.
    pub fn set_external_host(
        &self,
        service: &ServiceName,
        ip: Option<&str>,
    ) -> Result<(), StoreError> {
        self.mutate(|config| match ip {
            Some(ip) => {
                config.external_hosts.insert(service.clone(), ip.to_owned());
            }
            None => {
                config.external_hosts.remove(service);
            }
        })
    }

    pub fn config(&self) -> Result<PersistedConfig, StoreError> {
        if let Some(config) = &self.cache.borrow().config {
            return Ok(config.clone());
        }
        let path = self.layout.registry_file();
        let config = if path.exists() {
            toml::from_str(&fs::read_to_string(&path)?)?
        } else {
            PersistedConfig::default()
        };
        self.cache.borrow_mut().config = Some(config.clone());
        Ok(config)
    }

    fn mutate(&self, f: impl FnOnce(&mut PersistedConfig)) -> Result<(), StoreError> {
        let mut config = self.config()?;
        f(&mut config);
        let result = self.write_config(&config);
        self.invalidate();
        result
    }

    fn write_config(&self, config: &PersistedConfig) -> Result<(), StoreError> {
        let dir = self.layout.config_dir();
        fs::create_dir_all(&dir)?;
        let content = toml::to_string_pretty(config)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.registry_file())
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }

    fn require_available(&self, module: &ModuleName) -> Result<(), StoreError> {
        if self.is_available(module)? {
            Ok(())
        } else {
            Err(StoreError::ModuleNotFound(module.to_string()))
        }
    }
}

/// Enabled modules with their versions and provided elements.
///
/// Used to evaluate REQUIRES/CONFLICTS constraints, including against a
/// hypothetical set (`with`/`without`) before a lifecycle change is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnabledSet {
    modules: BTreeMap<ModuleName, (Option<Version>, BTreeSet<String>)>,
}

impl EnabledSet {
    pub fn insert(
        &mut self,
        module: ModuleName,
        version: Option<Version>,
        elements: BTreeSet<String>,
    ) {
        self.modules.insert(module, (version, elements));
    }

    #[must_use]
    pub fn with(
        mut self,
        module: ModuleName,
        version: Option<Version>,
        elements: BTreeSet<String>,
    ) -> Self {
        self.insert(module, version, elements);
        self
    }

    #[must_use]
    pub fn without(mut self, module: &ModuleName) -> Self {
        self.modules.remove(module);
        self
    }

    pub fn contains(&self, module: &ModuleName) -> bool {
        self.modules.contains_key(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleName> {
        self.modules.keys()
    }
}

impl ModuleSet for EnabledSet {
    fn enabled_version(&self, module: &ModuleName) -> Option<Option<Version>> {
        self.modules.get(module).map(|(v, _)| *v)
    }

    fn provides(&self, module: &ModuleName, element: &str) -> bool {
        self.modules
            .get(module)
            .is_some_and(|(_, elements)| elements.contains(element))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_module(root: &Path, name: &str, version: &str, services: &[&str]) {
        let dir = root.join("modules").join(name);
        fs::create_dir_all(dir.join("services")).unwrap();
        fs::write(
            dir.join("module.toml"),
            format!("name = \"{name}\"\nversion = \"{version}\"\n"),
        )
        .unwrap();
        for s in services {
            fs::write(dir.join("services").join(format!("{s}.yml")), "image: x\n").unwrap();
        }
    }

    fn fixture() -> (tempfile::TempDir, ModuleRegistry) {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "genoring", "1.2", &["genoring-proxy", "genoring-db"]);
        write_module(dir.path(), "gigwa", "1.0", &["genoring-gigwa"]);
        fs::create_dir_all(dir.path().join("modules").join("TEMPLATE")).unwrap();
        fs::create_dir_all(dir.path().join("modules").join("2fast")).unwrap();
        fs::write(dir.path().join("modules").join("stray_file"), "").unwrap();
        let layout = ProjectLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, ModuleRegistry::new(layout))
    }

    fn m(name: &str) -> ModuleName {
        ModuleName::new(name)
    }

    #[test]
    fn lists_available_modules_sorted_and_filtered() {
        let (_dir, reg) = fixture();
        assert_eq!(reg.list_available().unwrap(), vec![m("genoring"), m("gigwa")]);
        assert!(reg.list_enabled().unwrap().is_empty());
        assert_eq!(reg.list_disabled().unwrap().len(), 2);
    }

    #[test]
    fn set_status_is_visible_immediately() {
        let (_dir, reg) = fixture();
        // Warm the cache first.
        assert!(reg.list_enabled().unwrap().is_empty());
        assert!(!reg.cache_is_empty());

        reg.set_status(&m("genoring"), ModuleStatus::Enabled, Some(Version::new(1, 2)))
            .unwrap();
        assert!(reg.cache_is_empty());
        assert_eq!(reg.list_enabled().unwrap(), vec![m("genoring")]);
        assert_eq!(reg.list_disabled().unwrap(), vec![m("gigwa")]);
        assert_eq!(
            reg.installed_version(&m("genoring")).unwrap(),
            Some(Version::new(1, 2))
        );
        assert_eq!(
            reg.service_owner("genoring-proxy").unwrap(),
            Some(m("genoring"))
        );
        assert_eq!(reg.service_owner("genoring-gigwa").unwrap(), None);
    }

    #[test]
    fn set_status_keeps_version_when_none_given() {
        let (_dir, reg) = fixture();
        reg.set_status(&m("gigwa"), ModuleStatus::Enabled, Some(Version::new(1, 0)))
            .unwrap();
        reg.set_status(&m("gigwa"), ModuleStatus::Disabled, None)
            .unwrap();
        let record = reg.record(&m("gigwa")).unwrap().unwrap();
        assert_eq!(record.status, ModuleStatus::Disabled);
        assert_eq!(record.version, Some(Version::new(1, 0)));
    }

    #[test]
    fn config_persists_across_instances() {
        let (dir, reg) = fixture();
        reg.set_status(&m("gigwa"), ModuleStatus::Enabled, None)
            .unwrap();
        reg.set_external_host(&ServiceName::new("genoring-db"), Some("10.0.0.5"))
            .unwrap();

        let reopened = ModuleRegistry::new(ProjectLayout::new(dir.path()));
        assert_eq!(reopened.list_enabled().unwrap(), vec![m("gigwa")]);
        assert_eq!(
            reopened.external_hosts().unwrap().get("genoring-db").map(String::as_str),
            Some("10.0.0.5")
        );

        reopened.remove(&m("gigwa")).unwrap();
        assert!(reopened.record(&m("gigwa")).unwrap().is_none());
        assert!(reopened.list_enabled().unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_module() {
        let (_dir, reg) = fixture();
        let err = reg
            .set_status(&m("nope"), ModuleStatus::Enabled, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::ModuleNotFound(_)));
    }

    #[test]
    fn enabled_set_reports_versions_and_elements() {
        let (_dir, reg) = fixture();
        reg.set_status(&m("genoring"), ModuleStatus::Enabled, None)
            .unwrap();
        let set = reg.enabled_set().unwrap();
        assert_eq!(
            set.enabled_version(&m("genoring")),
            Some(Some(Version::new(1, 2)))
        );
        assert!(set.provides(&m("genoring"), "genoring-proxy"));
        assert!(!set.provides(&m("genoring"), "genoring-gigwa"));
        assert_eq!(set.enabled_version(&m("gigwa")), None);

        let without = set.without(&m("genoring"));
        assert!(!without.contains(&m("genoring")));
    }

    #[test]
    fn invalidate_picks_up_new_fragments() {
        let (dir, reg) = fixture();
        assert_eq!(reg.services_of(&m("gigwa")).unwrap().len(), 1);
        fs::write(
            dir.path()
                .join("modules/gigwa/services/genoring-gigwa-worker.yml"),
            "image: y\n",
        )
        .unwrap();
        assert_eq!(reg.services_of(&m("gigwa")).unwrap().len(), 1);
        reg.invalidate();
        assert_eq!(reg.services_of(&m("gigwa")).unwrap().len(), 2);
    }
}
