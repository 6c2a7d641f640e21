use genoring_core::Prompt;
use std::time::Duration;

/// Asks on the terminal whether to keep waiting for containers that are
/// slow to come up. With `--yes` it extends without asking.
pub struct TerminalPrompt {
    extension: Duration,
    assume_yes: bool,
}

impl TerminalPrompt {
    pub fn new(extension: Duration, assume_yes: bool) -> Self {
        Self {
            extension,
            assume_yes,
        }
    }
}

impl Prompt for TerminalPrompt {
    fn extend(&self, target: &str, waited: Duration) -> Option<Duration> {
        if self.assume_yes {
            return Some(self.extension);
        }
        if !console::Term::stderr().is_term() {
            return None;
        }
        dialoguer::Confirm::new()
            .with_prompt(format!(
                "{target} is still not running after {}s. Wait another {}s?",
                waited.as_secs(),
                self.extension.as_secs()
            ))
            .default(true)
            .interact()
            .ok()
            .filter(|yes| *yes)
            .map(|_| self.extension)
    }
}
