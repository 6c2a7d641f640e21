pub mod alternative;
pub mod backup;
pub mod compile;
pub mod completions;
pub mod disable;
pub mod doctor;
pub mod enable;
pub mod install;
pub mod modules;
pub mod regenerate;
pub mod restore;
pub mod sethost;
pub mod start;
pub mod status;
pub mod stop;
pub mod uninstall;
pub mod update;

use console::Style;
use genoring_core::{CoreError, HookOutcome, OperationReport};
use genoring_schema::{is_valid_module_name, ModuleName};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_RUNTIME_ERROR: u8 = 3;

/// Message prefixes `main` maps back to exit codes.
pub const CONFIG_PREFIX: &str = "configuration error: ";
pub const RUNTIME_PREFIX: &str = "container runtime unavailable: ";

/// Render a core error for the user, tagged with its exit class.
pub fn core_error(err: &CoreError) -> String {
    if err.is_configuration() {
        format!("{CONFIG_PREFIX}{err}")
    } else if err.is_runtime_unavailable() {
        format!("{RUNTIME_PREFIX}{err}")
    } else {
        err.to_string()
    }
}

pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with(CONFIG_PREFIX) {
        EXIT_CONFIG_ERROR
    } else if msg.starts_with(RUNTIME_PREFIX) {
        EXIT_RUNTIME_ERROR
    } else {
        EXIT_FAILURE
    }
}

/// clap value parser for module arguments.
pub fn parse_module(s: &str) -> Result<ModuleName, String> {
    if is_valid_module_name(s) {
        Ok(ModuleName::new(s))
    } else {
        Err(format!(
            "invalid module name '{s}': start with a lowercase letter, then letters, digits or '_'"
        ))
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn warn_user(msg: &str) {
    eprintln!("{} {msg}", Style::new().yellow().bold().apply_to("WARNING:"));
}

pub fn print_warnings(warnings: &[String]) {
    for w in warnings {
        warn_user(w);
    }
}

pub fn spinner(msg: &str, json: bool) -> ProgressBar {
    if json {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    let style = match state {
        "running" | "enabled" => Style::new().green(),
        "restarting" | "paused" | "created" => Style::new().yellow(),
        "exited" | "dead" => Style::new().red(),
        "disabled" | "stopped" | "absent" => Style::new().dim(),
        s if s.starts_with("running") => Style::new().cyan().bold(),
        _ => return state.to_owned(),
    };
    style.apply_to(state).to_string()
}

/// Run a transactional verb behind a spinner and print what it produced.
pub fn run_operation(
    label: &str,
    done: &str,
    json: bool,
    op: impl FnOnce() -> Result<OperationReport, CoreError>,
) -> Result<u8, String> {
    let pb = spinner(label, json);
    let report = match op() {
        Ok(report) => report,
        Err(e) => {
            spin_fail(&pb, label);
            return Err(core_error(&e));
        }
    };
    spin_ok(&pb, done);
    if json {
        println!("{}", json_pretty(&report_json(done, &report))?);
    } else {
        print_warnings(&report.warnings);
    }
    Ok(EXIT_SUCCESS)
}

fn report_json(done: &str, report: &OperationReport) -> serde_json::Value {
    let hooks: Vec<serde_json::Value> = report
        .hooks
        .iter()
        .flat_map(|r| {
            r.results.iter().map(move |h| {
                let (outcome, reason) = match &h.outcome {
                    HookOutcome::Ok => ("ok", None),
                    HookOutcome::Failed(why) => ("failed", Some(why.as_str())),
                    HookOutcome::Skipped(why) => ("skipped", Some(why.as_str())),
                };
                serde_json::json!({
                    "event": r.event,
                    "module": h.module,
                    "hook": h.hook,
                    "outcome": outcome,
                    "reason": reason,
                })
            })
        })
        .collect();
    serde_json::json!({
        "result": done,
        "warnings": report.warnings,
        "hooks": hooks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        let config = core_error(&CoreError::ModuleNotFound("gigwa".to_owned()));
        assert_eq!(exit_code_for(&config), EXIT_CONFIG_ERROR);

        let runtime = core_error(&CoreError::Runtime(
            genoring_runtime::RuntimeError::Unavailable("docker".to_owned()),
        ));
        assert_eq!(exit_code_for(&runtime), EXIT_RUNTIME_ERROR);

        let fatal = core_error(&CoreError::Interrupted);
        assert_eq!(exit_code_for(&fatal), EXIT_FAILURE);
    }

    #[test]
    fn module_arguments_are_validated() {
        assert_eq!(parse_module("gigwa").unwrap().as_str(), "gigwa");
        assert!(parse_module("../etc").is_err());
        assert!(parse_module("").is_err());
    }

    #[test]
    fn unknown_states_are_left_alone() {
        assert_eq!(colorize_state("mystery"), "mystery");
        assert!(colorize_state("running").contains("running"));
    }

    #[test]
    fn report_json_lists_hook_outcomes() {
        let mut report = OperationReport::default();
        report.warnings.push("hook skipped".to_owned());
        let json = report_json("enabled gigwa", &report);
        assert_eq!(json["result"], "enabled gigwa");
        assert_eq!(json["warnings"][0], "hook skipped");
        assert!(json["hooks"].as_array().unwrap().is_empty());
    }
}
