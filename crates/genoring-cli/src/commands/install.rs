use super::run_operation;
use genoring_core::{Engine, BASE_MODULE};
use genoring_schema::ModuleName;

pub fn run(engine: &Engine, modules: &[ModuleName], json: bool) -> Result<u8, String> {
    let names = if modules.is_empty() {
        BASE_MODULE.to_owned()
    } else {
        modules
            .iter()
            .map(ModuleName::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    };
    run_operation(
        &format!("installing {names}"),
        &format!("installed {names}"),
        json,
        || engine.install(modules),
    )
}
