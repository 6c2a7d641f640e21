use super::{core_error, json_pretty, print_warnings, EXIT_SUCCESS};
use genoring_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let warnings = engine.regenerate().map_err(|e| core_error(&e))?;
    let compose = engine.layout().compose_file();
    if json {
        let payload = serde_json::json!({
            "compose_file": compose.display().to_string(),
            "warnings": warnings,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        print_warnings(&warnings);
        println!("wrote {}", compose.display());
    }
    Ok(EXIT_SUCCESS)
}
