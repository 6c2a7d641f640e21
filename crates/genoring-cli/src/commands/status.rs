use super::{colorize_state, core_error, json_pretty, EXIT_SUCCESS};
use genoring_core::{Engine, ModuleStatusReport};
use genoring_schema::ModuleName;

pub fn run(engine: &Engine, module: Option<&ModuleName>, json: bool) -> Result<u8, String> {
    let report = engine.status(module).map_err(|e| core_error(&e))?;
    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("GenoRing is {}", colorize_state(&report.state));
    if !report.containers.is_empty() {
        println!();
        println!("{:<32} STATE", "CONTAINER");
        for (name, state) in &report.containers {
            println!("{name:<32} {}", colorize_state(&state.to_string()));
        }
    }
    if !report.modules.is_empty() {
        println!();
        println!("{:<20} {:<10} STATE", "MODULE", "VERSION");
        for m in &report.modules {
            println!("{:<20} {:<10} {}", m.name.as_str(), version_of(m), module_state(m));
        }
    }
    Ok(EXIT_SUCCESS)
}

fn version_of(m: &ModuleStatusReport) -> String {
    m.installed_version
        .map_or_else(|| "-".to_owned(), |v| v.to_string())
}

fn module_state(m: &ModuleStatusReport) -> String {
    match (m.state, m.status) {
        (Some(state), _) => colorize_state(&state.to_string()),
        (None, Some(status)) => colorize_state(&status.to_string()),
        (None, None) => colorize_state("absent"),
    }
}
