use super::run_operation;
use genoring_core::Engine;
use genoring_schema::ModuleName;

pub fn run(engine: &Engine, module: &ModuleName, json: bool) -> Result<u8, String> {
    run_operation(
        &format!("enabling {module}"),
        &format!("enabled {module}"),
        json,
        || engine.enable(module),
    )
}
