use super::run_operation;
use genoring_core::Engine;
use genoring_schema::ModuleName;

pub fn run(engine: &Engine, module: Option<&ModuleName>, json: bool) -> Result<u8, String> {
    let what = module.map_or_else(|| "enabled modules".to_owned(), ToString::to_string);
    run_operation(
        &format!("updating {what}"),
        &format!("updated {what}"),
        json,
        || engine.update(module),
    )
}

pub fn run_upgrade(engine: &Engine, json: bool) -> Result<u8, String> {
    run_operation("upgrading", "upgraded", json, || engine.upgrade())
}
