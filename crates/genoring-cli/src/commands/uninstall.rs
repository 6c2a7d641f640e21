use super::{run_operation, EXIT_FAILURE};
use genoring_core::Engine;
use genoring_schema::ModuleName;

/// Uninstalling drops the module's volumes, so it asks first unless `--yes`
/// was given. Without a terminal to ask on, `--yes` is required.
pub fn run(engine: &Engine, module: &ModuleName, assume_yes: bool, json: bool) -> Result<u8, String> {
    if !assume_yes {
        if !console::Term::stderr().is_term() {
            return Err(format!(
                "uninstalling '{module}' deletes its data volumes; pass --yes to confirm"
            ));
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Uninstall '{module}' and delete the data volumes only it uses?"
            ))
            .default(false)
            .interact()
            .map_err(|e| format!("confirmation failed: {e}"))?;
        if !confirmed {
            eprintln!("aborted");
            return Ok(EXIT_FAILURE);
        }
    }
    run_operation(
        &format!("uninstalling {module}"),
        &format!("uninstalled {module}"),
        json,
        || engine.uninstall(module),
    )
}
