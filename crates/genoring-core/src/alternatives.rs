//! Module alternatives: swap service fragments on disk while the module is
//! disabled.
//!
//! Enabling an alternative moves the fragments it replaces or removes into
//! `alt/<alternative>/.stash/` and copies its own fragments into
//! `services/`. Disabling it undoes exactly that.

use crate::CoreError;
use genoring_schema::{AlternativeDecl, AlternativeName, ModuleDescriptor, ServiceName};
use genoring_store::{ModulePaths, ProjectLayout};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

fn error(descriptor: &ModuleDescriptor, alternative: &AlternativeName, reason: String) -> CoreError {
    CoreError::Alternative {
        module: descriptor.name.to_string(),
        alternative: alternative.to_string(),
        reason,
    }
}

fn declaration<'a>(
    descriptor: &'a ModuleDescriptor,
    alternative: &AlternativeName,
) -> Result<&'a AlternativeDecl, CoreError> {
    descriptor
        .alternatives
        .get(alternative)
        .ok_or_else(|| error(descriptor, alternative, "not declared by the module".to_owned()))
}

/// Fragment file an alternative refers to, with or without `.yml`.
fn alternative_fragment(paths: &ModulePaths, alternative: &str, reference: &str) -> PathBuf {
    let file = if reference.ends_with(".yml") {
        reference.to_owned()
    } else {
        format!("{reference}.yml")
    };
    paths.alternative_dir(alternative).join(file)
}

fn stashed(paths: &ModulePaths, alternative: &str, service: &ServiceName) -> PathBuf {
    paths
        .alternative_stash(alternative)
        .join(format!("{service}.yml"))
}

/// Apply `alternative` to the module's fragments. `active` lists the
/// alternatives already applied; two alternatives may not touch the same
/// service.
pub fn enable(
    layout: &ProjectLayout,
    descriptor: &ModuleDescriptor,
    active: &[AlternativeName],
    alternative: &AlternativeName,
) -> Result<(), CoreError> {
    let decl = declaration(descriptor, alternative)?;
    if active.contains(alternative) {
        return Err(error(descriptor, alternative, "already enabled".to_owned()));
    }
    let touched = decl.touched_services();
    for other in active {
        let Some(other_decl) = descriptor.alternatives.get(other) else {
            continue;
        };
        if let Some(service) = other_decl
            .touched_services()
            .into_iter()
            .find(|s| touched.contains(s))
        {
            return Err(error(
                descriptor,
                alternative,
                format!("service '{service}' is already switched by alternative '{other}'"),
            ));
        }
    }

    let paths = layout.module(&descriptor.name);
    // Check every source before touching anything.
    for (service, reference) in &decl.substitute {
        let source = alternative_fragment(&paths, alternative, reference);
        if !source.is_file() {
            return Err(error(
                descriptor,
                alternative,
                format!("replacement for '{service}' not found: {}", source.display()),
            ));
        }
    }
    for service in &decl.add {
        let source = alternative_fragment(&paths, alternative, service);
        if !source.is_file() {
            return Err(error(
                descriptor,
                alternative,
                format!("fragment for added service not found: {}", source.display()),
            ));
        }
        if paths.service_fragment(service).exists() {
            return Err(error(
                descriptor,
                alternative,
                format!("added service '{service}' already exists"),
            ));
        }
    }

    let stash = paths.alternative_stash(alternative);
    fs::create_dir_all(&stash)?;
    fs::create_dir_all(paths.services_dir())?;
    for service in decl.substitute.keys().chain(decl.remove.iter()) {
        let current = paths.service_fragment(service);
        if current.exists() {
            debug!("stashing {}", current.display());
            fs::rename(&current, stashed(&paths, alternative, service))?;
        }
    }
    for (service, reference) in &decl.substitute {
        fs::copy(
            alternative_fragment(&paths, alternative, reference),
            paths.service_fragment(service),
        )?;
    }
    for service in &decl.add {
        fs::copy(
            alternative_fragment(&paths, alternative, service),
            paths.service_fragment(service),
        )?;
    }
    info!("alternative {alternative} of {} enabled", descriptor.name);
    Ok(())
}

/// Undo [`enable`]: drop the alternative's fragments and put stashed ones
/// back.
pub fn disable(
    layout: &ProjectLayout,
    descriptor: &ModuleDescriptor,
    active: &[AlternativeName],
    alternative: &AlternativeName,
) -> Result<(), CoreError> {
    let decl = declaration(descriptor, alternative)?;
    if !active.contains(alternative) {
        return Err(error(descriptor, alternative, "not enabled".to_owned()));
    }
    let paths = layout.module(&descriptor.name);
    for service in decl.substitute.keys().chain(decl.add.iter()) {
        let current = paths.service_fragment(service);
        if current.exists() {
            fs::remove_file(&current)?;
        }
    }
    for service in decl.substitute.keys().chain(decl.remove.iter()) {
        let saved = stashed(&paths, alternative, service);
        if saved.exists() {
            fs::rename(&saved, paths.service_fragment(service))?;
        }
    }
    let stash = paths.alternative_stash(alternative);
    if stash.exists() {
        fs::remove_dir_all(&stash)?;
    }
    info!("alternative {alternative} of {} disabled", descriptor.name);
    Ok(())
}
