use super::{core_error, EXIT_SUCCESS};
use genoring_core::Engine;
use genoring_schema::{AlternativeName, ModuleName};

pub fn run_enable(
    engine: &Engine,
    module: &ModuleName,
    alternative: &AlternativeName,
    json: bool,
) -> Result<u8, String> {
    engine
        .enable_alternative(module, alternative)
        .map_err(|e| core_error(&e))?;
    report(engine, module, &format!("alternative {alternative} of {module} enabled"), json)
}

pub fn run_disable(
    engine: &Engine,
    module: &ModuleName,
    alternative: &AlternativeName,
    json: bool,
) -> Result<u8, String> {
    engine
        .disable_alternative(module, alternative)
        .map_err(|e| core_error(&e))?;
    report(engine, module, &format!("alternative {alternative} of {module} disabled"), json)
}

fn report(engine: &Engine, module: &ModuleName, msg: &str, json: bool) -> Result<u8, String> {
    if json {
        let active = engine
            .registry()
            .active_alternatives(module)
            .map_err(|e| e.to_string())?;
        let payload = serde_json::json!({ "module": module, "alternatives": active });
        println!("{}", super::json_pretty(&payload)?);
    } else {
        println!("{msg}");
    }
    Ok(EXIT_SUCCESS)
}
