//! Per-module resolved environment.
//!
//! A module ships default environment files in `modules/<m>/env/`. The
//! project copy `env/<m>/<stem>.env`, when present, replaces the default of
//! the same stem. Values are only ever resolved for one module at a time.

use crate::CoreError;
use genoring_schema::{EnvFile, ModuleName};
use genoring_store::{list_stems, ProjectLayout};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Effective environment files of `module`, in stem order.
pub fn module_env_files(
    layout: &ProjectLayout,
    module: &ModuleName,
) -> Result<Vec<PathBuf>, CoreError> {
    let defaults = layout.module(module).env_dir();
    let mut files = Vec::new();
    for stem in list_stems(&defaults, "env")? {
        let project = layout.project_env_file(module, &stem);
        if project.is_file() {
            files.push(project);
        } else {
            files.push(defaults.join(format!("{stem}.env")));
        }
    }
    Ok(files)
}

/// Merge every effective environment file of `module` into one map.
pub fn resolve_module_env(
    layout: &ProjectLayout,
    module: &ModuleName,
) -> Result<BTreeMap<String, String>, CoreError> {
    let mut vars = BTreeMap::new();
    for file in module_env_files(layout, module)? {
        vars.extend(EnvFile::load(&file)?.vars());
    }
    Ok(vars)
}

/// Copy module default environment files into the project `env/` directory
/// where no project copy exists yet. Returns warnings for variables that
/// should be customized but are still empty.
pub fn install_env_files(
    layout: &ProjectLayout,
    module: &ModuleName,
) -> Result<Vec<String>, CoreError> {
    let defaults = layout.module(module).env_dir();
    let mut warnings = Vec::new();
    for stem in list_stems(&defaults, "env")? {
        let project = layout.project_env_file(module, &stem);
        let file = if project.is_file() {
            EnvFile::load(&project)?
        } else {
            let file = EnvFile::load(&defaults.join(format!("{stem}.env")))?;
            file.save(&project)?;
            debug!("installed {}", project.display());
            file
        };
        for key in file.uncustomized() {
            let msg = format!(
                "{module}: {key} in {} should be customized",
                project.display()
            );
            warn!("{msg}");
            warnings.push(msg);
        }
    }
    Ok(warnings)
}

/// Remove the project copies of `module`'s environment files.
pub fn remove_env_files(layout: &ProjectLayout, module: &ModuleName) -> Result<(), CoreError> {
    for stem in list_stems(&layout.module(module).env_dir(), "env")? {
        let project = layout.project_env_file(module, &stem);
        if project.is_file() {
            std::fs::remove_file(&project)?;
        }
    }
    let dir = layout.module_env_dir(module);
    if dir.is_dir() && std::fs::read_dir(&dir)?.next().is_none() {
        std::fs::remove_dir(&dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, ProjectLayout, ModuleName) {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        layout.initialize().unwrap();
        let env_dir = dir.path().join("modules/gigwa/env");
        fs::create_dir_all(&env_dir).unwrap();
        fs::write(
            env_dir.join("gigwa.env"),
            "# Public port\nGIGWA_PORT=8080\n# @customize\nGIGWA_ADMIN_PASSWORD=\n",
        )
        .unwrap();
        fs::write(env_dir.join("mongo.env"), "MONGO_HOST=mongo\n").unwrap();
        (dir, layout, ModuleName::new("gigwa"))
    }

    #[test]
    fn project_copy_overrides_defaults() {
        let (dir, layout, module) = fixture();
        assert_eq!(resolve_module_env(&layout, &module).unwrap()["GIGWA_PORT"], "8080");

        fs::create_dir_all(dir.path().join("env/gigwa")).unwrap();
        fs::write(dir.path().join("env/gigwa/gigwa.env"), "GIGWA_PORT=9090\n").unwrap();
        let vars = resolve_module_env(&layout, &module).unwrap();
        assert_eq!(vars["GIGWA_PORT"], "9090");
        assert_eq!(vars["MONGO_HOST"], "mongo");
        assert!(!vars.contains_key("GIGWA_ADMIN_PASSWORD"));
    }

    #[test]
    fn install_copies_and_reports_uncustomized() {
        let (dir, layout, module) = fixture();
        let warnings = install_env_files(&layout, &module).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("GIGWA_ADMIN_PASSWORD"));
        let copied = fs::read_to_string(dir.path().join("env/gigwa/gigwa.env")).unwrap();
        assert!(copied.starts_with("# Public port\n"));

        // An existing project copy is never overwritten.
        fs::write(dir.path().join("env/gigwa/mongo.env"), "MONGO_HOST=db\n").unwrap();
        install_env_files(&layout, &module).unwrap();
        assert_eq!(
            resolve_module_env(&layout, &module).unwrap()["MONGO_HOST"],
            "db"
        );

        remove_env_files(&layout, &module).unwrap();
        assert!(!dir.path().join("env/gigwa").exists());
    }

    #[test]
    fn modules_sharing_a_prefix_keep_separate_environments() {
        let (dir, layout, gigwa) = fixture();
        let tools_env = dir.path().join("modules/gigwa_tools/env");
        fs::create_dir_all(&tools_env).unwrap();
        fs::write(tools_env.join("gigwa.env"), "GIGWA_PORT=7070\n").unwrap();
        let tools = ModuleName::new("gigwa_tools");

        install_env_files(&layout, &gigwa).unwrap();
        install_env_files(&layout, &tools).unwrap();
        assert_eq!(resolve_module_env(&layout, &gigwa).unwrap()["GIGWA_PORT"], "8080");
        assert_eq!(resolve_module_env(&layout, &tools).unwrap()["GIGWA_PORT"], "7070");

        remove_env_files(&layout, &gigwa).unwrap();
        assert!(dir.path().join("env/gigwa_tools/gigwa.env").is_file());
    }
}
