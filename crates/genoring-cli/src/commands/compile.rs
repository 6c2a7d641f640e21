use super::{core_error, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use genoring_core::Engine;
use genoring_schema::{ModuleName, ServiceName};

pub fn run(engine: &Engine, module: &ModuleName, service: &ServiceName, json: bool) -> Result<u8, String> {
    let label = format!("building {service}");
    let pb = spinner(&label, json);
    let tag = match engine.compile(module, service) {
        Ok(tag) => tag,
        Err(e) => {
            spin_fail(&pb, &label);
            return Err(core_error(&e));
        }
    };
    spin_ok(&pb, &format!("built {tag}"));
    if json {
        println!("{}", super::json_pretty(&serde_json::json!({ "image": tag }))?);
    }
    Ok(EXIT_SUCCESS)
}
