use super::{colorize_state, core_error, json_pretty, EXIT_SUCCESS};
use genoring_core::Engine;
use genoring_schema::AlternativeName;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let modules = engine.modules().map_err(|e| core_error(&e))?;
    if json {
        println!("{}", json_pretty(&modules)?);
        return Ok(EXIT_SUCCESS);
    }
    if modules.is_empty() {
        println!("no modules found in {}", engine.layout().modules_dir().display());
        return Ok(EXIT_SUCCESS);
    }
    println!(
        "{:<20} {:<14} {:<10} {:<10} DESCRIPTION",
        "MODULE", "STATUS", "INSTALLED", "AVAILABLE"
    );
    for m in &modules {
        let status = m
            .status
            .map_or_else(|| "not installed".to_owned(), |s| s.to_string());
        let installed = m
            .installed_version
            .map_or_else(|| "-".to_owned(), |v| v.to_string());
        let mut description = m.description.clone().unwrap_or_default();
        if !m.alternatives.is_empty() {
            let alts: Vec<&str> = m.alternatives.iter().map(AlternativeName::as_str).collect();
            description.push_str(&format!(" [alternatives: {}]", alts.join(", ")));
        }
        // Escape codes would skew `{:<14}`, so pad by hand.
        let pad = " ".repeat(14usize.saturating_sub(status.len()));
        println!(
            "{:<20} {}{pad} {:<10} {:<10} {}",
            m.name.as_str(),
            colorize_state(&status),
            installed,
            m.available_version.to_string(),
            description.trim()
        );
    }
    Ok(EXIT_SUCCESS)
}
