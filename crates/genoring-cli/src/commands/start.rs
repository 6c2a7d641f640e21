use super::{core_error, json_pretty, print_warnings, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use genoring_core::Engine;
use genoring_runtime::Mode;

pub fn run(engine: &Engine, mode: Mode, json: bool) -> Result<u8, String> {
    let label = format!("starting in {mode} mode");
    let pb = spinner(&label, json);
    let warnings = match engine.start(mode) {
        Ok(w) => w,
        Err(e) => {
            spin_fail(&pb, &label);
            return Err(core_error(&e));
        }
    };
    spin_ok(&pb, &format!("started in {mode} mode"));
    if json {
        let payload = serde_json::json!({ "mode": mode, "warnings": warnings });
        println!("{}", json_pretty(&payload)?);
    } else {
        print_warnings(&warnings);
    }
    Ok(EXIT_SUCCESS)
}
