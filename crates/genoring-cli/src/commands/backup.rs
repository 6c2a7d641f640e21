use super::{core_error, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use genoring_core::Engine;
use genoring_schema::ModuleName;

pub fn run(
    engine: &Engine,
    name: Option<&str>,
    module: Option<&ModuleName>,
    json: bool,
) -> Result<u8, String> {
    let pb = spinner("creating backup", json);
    let manifest = match engine.backup(name, module) {
        Ok(m) => m,
        Err(e) => {
            spin_fail(&pb, "creating backup");
            return Err(core_error(&e));
        }
    };
    spin_ok(&pb, &format!("backup '{}' created", manifest.name));
    if json {
        println!("{}", json_pretty(&manifest)?);
    } else {
        println!("location: {}", engine.backups().backup_dir(&manifest.name).display());
    }
    Ok(EXIT_SUCCESS)
}

/// `backup --list`.
pub fn list(engine: &Engine, json: bool) -> Result<u8, String> {
    let backups = engine.backups().list().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&backups)?);
    } else if backups.is_empty() {
        println!("no backups found");
    } else {
        println!("{:<28} {:<16} CREATED", "NAME", "SCOPE");
        for b in &backups {
            let scope = b.module.as_ref().map_or("project", ModuleName::as_str);
            println!("{:<28} {:<16} {}", b.name, scope, b.created_at);
        }
    }
    Ok(EXIT_SUCCESS)
}
