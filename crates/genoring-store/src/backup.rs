//! Project backups.
//!
//! A backup is a directory `backups/<name>/` holding:
//!
//! - `project.tar`: deterministic archive of the persisted configuration,
//!   project environment files, and generated compose documents (or only one
//!   module's environment files for a module-scoped backup),
//! - `manifest.json`: name, scope, creation time, and the blake3 checksum of
//!   `project.tar`,
//! - `data/<module>/`: free space where module `backup` hooks dump their data.

use crate::layout::ProjectLayout;
use crate::{fsync_dir, StoreError};
use genoring_schema::ModuleName;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const ARCHIVE_FILE: &str = "project.tar";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupManifest {
    pub name: String,
    /// `None` for a full project backup.
    #[serde(default)]
    pub module: Option<ModuleName>,
    pub created_at: String,
    /// blake3 of `project.tar`.
    pub checksum: String,
}

pub fn validate_backup_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > 64 {
        return Err(StoreError::InvalidName(
            "backup name must be 1-64 characters".to_owned(),
        ));
    }
    if name.starts_with('.')
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err(StoreError::InvalidName(
            "backup name must match [a-zA-Z0-9_.-] and not start with '.'".to_owned(),
        ));
    }
    Ok(())
}

/// Timestamped default name, e.g. `20260301-142501`.
pub fn default_backup_name() -> String {
    chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

pub struct BackupStore {
    layout: ProjectLayout,
}

impl BackupStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    #[inline]
    pub fn backup_dir(&self, name: &str) -> PathBuf {
        self.layout.backups_dir().join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.backup_dir(name).join(MANIFEST_FILE).is_file()
    }

    /// Archive the project state in scope. An existing backup of the same
    /// name is replaced.
    pub fn create(
        &self,
        name: &str,
        module: Option<&ModuleName>,
    ) -> Result<BackupManifest, StoreError> {
        validate_backup_name(name)?;
        let dir = self.backup_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        let archive = pack_paths(self.layout.root(), &Self::scope_paths(module))?;
        let checksum = blake3::hash(&archive).to_hex().to_string();
        write_atomic(&dir, ARCHIVE_FILE, &archive)?;

        let manifest = BackupManifest {
            name: name.to_owned(),
            module: module.cloned(),
            created_at: chrono::Utc::now().to_rfc3339(),
            checksum,
        };
        write_atomic(
            &dir,
            MANIFEST_FILE,
            serde_json::to_string_pretty(&manifest)?.as_bytes(),
        )?;
        debug!("backup '{name}' written ({} bytes)", archive.len());
        Ok(manifest)
    }

    pub fn manifest(&self, name: &str) -> Result<BackupManifest, StoreError> {
        validate_backup_name(name)?;
        let path = self.backup_dir(name).join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(StoreError::BackupNotFound(name.to_owned()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Put the archived files back. Files in scope that did not exist when
    /// the backup was taken are removed.
    pub fn restore(&self, name: &str) -> Result<BackupManifest, StoreError> {
        let manifest = self.manifest(name)?;
        let archive = fs::read(self.backup_dir(name).join(ARCHIVE_FILE))?;
        let actual = blake3::hash(&archive).to_hex().to_string();
        if actual != manifest.checksum {
            return Err(StoreError::IntegrityFailure {
                name: name.to_owned(),
                expected: manifest.checksum,
                actual,
            });
        }

        for path in Self::scope_paths(manifest.module.as_ref()) {
            let full = self.layout.root().join(&path);
            if full.is_dir() {
                fs::remove_dir_all(&full)?;
            } else if full.exists() {
                fs::remove_file(&full)?;
            }
        }
        unpack_archive(&archive, self.layout.root())?;
        debug!("backup '{name}' restored");
        Ok(manifest)
    }

    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        validate_backup_name(name)?;
        let dir = self.backup_dir(name);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Every readable backup, sorted by name.
    pub fn list(&self) -> Result<Vec<BackupManifest>, StoreError> {
        let dir = self.layout.backups_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if validate_backup_name(&name).is_err() || !self.exists(&name) {
                continue;
            }
            match self.manifest(&name) {
                Ok(m) => out.push(m),
                Err(e) => warn!("skipping unreadable backup '{name}': {e}"),
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Project-relative paths a backup of `module` (or the whole project)
    /// covers.
    fn scope_paths(module: Option<&ModuleName>) -> Vec<String> {
        let Some(module) = module else {
            return vec![
                "config/modules.toml".to_owned(),
                "env".to_owned(),
                "docker-compose.yml".to_owned(),
                "compose".to_owned(),
            ];
        };
        vec![format!("env/{module}")]
    }
}

fn write_atomic(dir: &Path, file: &str, data: &[u8]) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(file))
        .map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

/// Create a deterministic tar archive of `paths` (relative to `root`).
///
/// Entries are sorted by relative path, timestamps and ownership are zeroed,
/// permissions are kept. Missing paths are skipped. Only regular files,
/// directories, and symlinks are archived.
pub fn pack_paths(root: &Path, paths: &[String]) -> Result<Vec<u8>, StoreError> {
    let mut entries = Vec::new();
    for rel in paths {
        let full = root.join(rel);
        if full.symlink_metadata().is_err() {
            continue;
        }
        entries.push((rel.clone(), full.clone()));
        if full.is_dir() && !full.is_symlink() {
            entries.extend(collect_entries(root, &full)?);
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.dedup_by(|a, b| a.0 == b.0);

    let mut ar = tar::Builder::new(Vec::new());
    ar.follow_symlinks(false);
    for (rel_path, full_path) in &entries {
        let ft = full_path.symlink_metadata()?.file_type();
        if ft.is_file() {
            append_file(&mut ar, rel_path, full_path)?;
        } else if ft.is_dir() {
            append_dir(&mut ar, rel_path, full_path)?;
        } else if ft.is_symlink() {
            append_symlink(&mut ar, rel_path, full_path)?;
        } else {
            warn!("skipping unsupported file type: {rel_path}");
        }
    }
    Ok(ar.into_inner()?)
}

/// Extract an archive produced by [`pack_paths`] below `target_dir`.
pub fn unpack_archive(data: &[u8], target_dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(target_dir)?;
    let mut ar = tar::Archive::new(data);
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(false);
    ar.set_unpack_xattrs(false);
    ar.unpack(target_dir)?;
    Ok(())
}

fn collect_entries(root: &Path, current: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut result = Vec::new();
    for entry in fs::read_dir(current)? {
        let full = entry?.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| StoreError::Io(std::io::Error::other(format!("path strip: {e}"))))?
            .to_string_lossy()
            .into_owned();
        if full.symlink_metadata()?.is_dir() {
            result.push((rel, full.clone()));
            result.extend(collect_entries(root, &full)?);
        } else {
            result.push((rel, full));
        }
    }
    Ok(result)
}

fn header_for(full_path: &Path, entry_type: tar::EntryType) -> Result<tar::Header, StoreError> {
    let meta = full_path.symlink_metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(meta.permissions().mode());
    Ok(header)
}

fn append_file(
    ar: &mut tar::Builder<Vec<u8>>,
    rel_path: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let data = fs::read(full_path)?;
    let mut header = header_for(full_path, tar::EntryType::Regular)?;
    header.set_size(data.len() as u64);
    header.set_cksum();
    ar.append_data(&mut header, rel_path, data.as_slice())?;
    Ok(())
}

fn append_dir(
    ar: &mut tar::Builder<Vec<u8>>,
    rel_path: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let mut header = header_for(full_path, tar::EntryType::Directory)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_data(&mut header, format!("{rel_path}/"), &[] as &[u8])?;
    Ok(())
}

fn append_symlink(
    ar: &mut tar::Builder<Vec<u8>>,
    rel_path: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let target = fs::read_link(full_path)?;
    let mut header = header_for(full_path, tar::EntryType::Symlink)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_link(&mut header, rel_path, &target)?;
    Ok(())
}
