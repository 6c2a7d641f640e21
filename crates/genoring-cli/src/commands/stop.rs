use super::{core_error, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use genoring_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let pb = spinner("stopping", json);
    if let Err(e) = engine.stop() {
        spin_fail(&pb, "stopping");
        return Err(core_error(&e));
    }
    spin_ok(&pb, "stopped");
    if json {
        println!("{{\"state\": \"stopped\"}}");
    }
    Ok(EXIT_SUCCESS)
}
