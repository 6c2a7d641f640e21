use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout of a GenoRing project.
///
/// Everything the engine reads or writes lives below one root: module
/// sources, the persisted module configuration, project environment
/// overrides, generated compose documents, and backup archives.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn modules_dir(&self) -> PathBuf {
        self.root.join("modules")
    }

    #[inline]
    pub fn module(&self, name: &str) -> ModulePaths {
        ModulePaths::new(self.modules_dir().join(name))
    }

    #[inline]
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    #[inline]
    pub fn registry_file(&self) -> PathBuf {
        self.config_dir().join("modules.toml")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.config_dir().join(".lock")
    }

    /// Marker holding the compose profile the system was last started with.
    #[inline]
    pub fn profile_marker(&self) -> PathBuf {
        self.config_dir().join(".profile")
    }

    #[inline]
    pub fn engine_config_file(&self) -> PathBuf {
        self.root.join("genoring.toml")
    }

    /// Project copies of module environment files.
    #[inline]
    pub fn env_dir(&self) -> PathBuf {
        self.root.join("env")
    }

    /// Project environment files of one module. Each module gets its own
    /// directory so no two modules can claim the same file.
    #[inline]
    pub fn module_env_dir(&self, module: &str) -> PathBuf {
        self.env_dir().join(module)
    }

    /// Project copy of `modules/<module>/env/<stem>.env`.
    #[inline]
    pub fn project_env_file(&self, module: &str, stem: &str) -> PathBuf {
        self.module_env_dir(module).join(format!("{stem}.env"))
    }

    #[inline]
    pub fn compose_file(&self) -> PathBuf {
        self.root.join("docker-compose.yml")
    }

    #[inline]
    pub fn compose_dir(&self) -> PathBuf {
        self.root.join("compose")
    }

    /// Start-order overlay for one profile, relative path as referenced by
    /// the main compose document.
    #[inline]
    pub fn dependency_overlay_rel(profile: &str) -> String {
        format!("compose/dependencies.{profile}.yml")
    }

    #[inline]
    pub fn dependency_overlay(&self, profile: &str) -> PathBuf {
        self.root.join(Self::dependency_overlay_rel(profile))
    }

    #[inline]
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Host directory for exposed volumes without an explicit mapping.
    #[inline]
    pub fn volumes_dir(&self) -> PathBuf {
        self.root.join("volumes")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.modules_dir())?;
        fs::create_dir_all(self.config_dir())?;
        fs::create_dir_all(self.env_dir())?;
        fs::create_dir_all(self.compose_dir())?;
        fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }
}

/// Paths inside one module directory.
#[derive(Debug, Clone)]
pub struct ModulePaths {
    root: PathBuf,
}

impl ModulePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn env_dir(&self) -> PathBuf {
        self.root.join("env")
    }

    #[inline]
    pub fn services_dir(&self) -> PathBuf {
        self.root.join("services")
    }

    #[inline]
    pub fn service_fragment(&self, service: &str) -> PathBuf {
        self.services_dir().join(format!("{service}.yml"))
    }

    #[inline]
    pub fn volumes_dir(&self) -> PathBuf {
        self.root.join("volumes")
    }

    #[inline]
    pub fn volume_fragment(&self, volume: &str) -> PathBuf {
        self.volumes_dir().join(format!("{volume}.yml"))
    }

    #[inline]
    pub fn overrides_dir(&self) -> PathBuf {
        self.root.join("overrides")
    }

    #[inline]
    pub fn merges_dir(&self) -> PathBuf {
        self.root.join("merges")
    }

    #[inline]
    pub fn local_hooks_dir(&self) -> PathBuf {
        self.root.join("hooks").join("local")
    }

    #[inline]
    pub fn container_hooks_dir(&self) -> PathBuf {
        self.root.join("hooks").join("container")
    }

    #[inline]
    pub fn alternative_dir(&self, alternative: &str) -> PathBuf {
        self.root.join("alt").join(alternative)
    }

    /// Fragments set aside by an active alternative, restored when it is
    /// disabled.
    #[inline]
    pub fn alternative_stash(&self, alternative: &str) -> PathBuf {
        self.alternative_dir(alternative).join(".stash")
    }

    /// Image build context of a service.
    #[inline]
    pub fn build_context(&self, service: &str) -> PathBuf {
        self.root.join("src").join(service)
    }
}

/// Sorted file stems of `*.<ext>` entries in `dir`. A missing directory
/// yields an empty list.
pub fn list_stems(dir: &Path, ext: &str) -> Result<Vec<String>, StoreError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut stems = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if !stem.starts_with('.') {
                stems.push(stem.to_owned());
            }
        }
    }
    stems.sort();
    Ok(stems)
}
