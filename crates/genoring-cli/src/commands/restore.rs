use super::run_operation;
use genoring_core::Engine;
use genoring_schema::ModuleName;

pub fn run(engine: &Engine, name: &str, module: Option<&ModuleName>, json: bool) -> Result<u8, String> {
    let scope = module.map_or_else(String::new, |m| format!(" ({m})"));
    run_operation(
        &format!("restoring backup '{name}'{scope}"),
        &format!("restored backup '{name}'{scope}"),
        json,
        || engine.restore(name, module),
    )
}
