use super::{EXIT_FAILURE, EXIT_SUCCESS};
use genoring_core::deps::check_enable;
use genoring_core::{Assembler, ProjectLock};
use genoring_store::{EngineConfig, ModuleRegistry, ProjectLayout};
use std::path::Path;

pub fn run(project: &Path, skip_prereqs: bool, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    let layout = ProjectLayout::new(project);
    let config = match EngineConfig::load(&layout) {
        Ok(config) => {
            checks.push(Check::pass("engine_config", "Engine configuration valid"));
            config
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail(
                "engine_config",
                &format!("genoring.toml is invalid: {e}"),
            ));
            EngineConfig::default()
        }
    };

    if skip_prereqs {
        checks.push(Check::info("runtime_prereqs", "Runtime prerequisite check skipped"));
    } else {
        check_prereqs(&config, &mut checks, &mut all_pass);
    }

    if layout.modules_dir().is_dir() {
        checks.push(Check::pass("modules_dir", "Modules directory exists"));
        check_modules(&layout, &config, &mut checks, &mut all_pass);
        check_disk_space(project, &mut checks);
    } else {
        all_pass = false;
        checks.push(Check::fail(
            "modules_dir",
            &format!("No modules directory at {}", layout.modules_dir().display()),
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(config: &EngineConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing =
        genoring_runtime::check_compose_prereqs(&config.container_command, &config.compose_command);
    if missing.is_empty() {
        checks.push(Check::pass(
            "runtime_prereqs",
            "Container runtime and compose plugin available",
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "runtime_prereqs",
            &genoring_runtime::format_missing(&missing),
        ));
    }
}

fn check_modules(
    layout: &ProjectLayout,
    config: &EngineConfig,
    checks: &mut Vec<Check>,
    all_pass: &mut bool,
) {
    let registry = ModuleRegistry::new(layout.clone());

    // Descriptors
    let available = match registry.list_available() {
        Ok(modules) => modules,
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("modules", &format!("Cannot list modules: {e}")));
            return;
        }
    };
    let broken: Vec<String> = available
        .iter()
        .filter_map(|m| registry.descriptor(m).err().map(|e| format!("{m}: {e}")))
        .collect();
    if broken.is_empty() {
        checks.push(Check::pass(
            "descriptors",
            &format!("{} module descriptors parse", available.len()),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "descriptors",
            &format!("Broken descriptors: {}", broken.join("; ")),
        ));
    }

    // Registry
    let enabled = match registry.list_enabled() {
        Ok(enabled) => enabled,
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "registry",
                &format!("config/modules.toml unreadable: {e}"),
            ));
            return;
        }
    };
    if enabled.is_empty() {
        checks.push(Check::info("registry", "No module enabled yet (run `genoring install`)"));
        return;
    }
    checks.push(Check::info(
        "registry",
        &format!("{} modules enabled", enabled.len()),
    ));

    // Dependencies
    match check_enable(&registry, &enabled) {
        Ok(()) => checks.push(Check::pass("dependencies", "Module requirements satisfied")),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("dependencies", &e.to_string()));
        }
    }

    // Assembly
    match Assembler::new(&registry, config).assemble_enabled() {
        Ok(assembly) if assembly.warnings.is_empty() => checks.push(Check::pass(
            "assembly",
            &format!("Compose assembly OK ({} services)", assembly.services.len()),
        )),
        Ok(assembly) => checks.push(Check::warn(
            "assembly",
            &format!(
                "Compose assembly OK with {} warnings: {}",
                assembly.warnings.len(),
                assembly.warnings.join("; ")
            ),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("assembly", &format!("Compose assembly fails: {e}")));
        }
    }

    if !layout.compose_file().exists() {
        checks.push(Check::warn(
            "compose_file",
            "docker-compose.yml missing (run `genoring regenerate`)",
        ));
    }

    // Lock
    match ProjectLock::try_acquire(layout) {
        Ok(Some(_)) => checks.push(Check::pass("project_lock", "Project lock is free")),
        Ok(None) => checks.push(Check::warn(
            "project_lock",
            &match ProjectLock::holder(layout) {
                Some(pid) => format!("Project lock is held by genoring process {pid}"),
                None => "Project lock is held by another genoring process".to_owned(),
            },
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "project_lock",
                &format!("Cannot check project lock: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("GenoRing Doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

fn check_disk_space(project: &Path, checks: &mut Vec<Check>) {
    let Ok(c_path) = std::ffi::CString::new(project.to_string_lossy().as_bytes()) else {
        return;
    };

    // SAFETY: zeroed statvfs is a valid initial state for the struct.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: valid NUL-terminated path and a stack-allocated output struct
    // that is only read when the call returns 0.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if ret != 0 {
        return;
    }

    let avail_mb = (stat.f_bavail * stat.f_frsize) / (1024 * 1024);
    // Backups and pulled images both land on this filesystem.
    if avail_mb < 512 {
        checks.push(Check::warn(
            "disk_space",
            &format!("Low disk space: {avail_mb} MB available for images and backups"),
        ));
    } else {
        checks.push(Check::pass(
            "disk_space",
            &format!("Disk space: {} GB available", avail_mb / 1024),
        ));
    }
}
