//! Runtime state and readiness polling.

use crate::concurrency::shutdown_requested;
use crate::hooks::{HookOrchestrator, HookOutcome};
use crate::CoreError;
use genoring_runtime::{ContainerRuntime, ContainerState, Mode};
use genoring_schema::ModuleName;
use genoring_store::ModuleRegistry;
use std::cell::Cell;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Name of the local hook a module may ship to report its own state.
pub const STATE_EVENT: &str = "state";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    /// Every container runs; the mode comes from the active profile.
    Running(Mode),
    /// First container found not running, or `Empty` when there are none.
    Stopped(ContainerState),
}

impl SystemState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }

    pub fn mode(&self) -> Option<Mode> {
        match self {
            Self::Running(mode) => Some(*mode),
            Self::Stopped(_) => None,
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running(mode) => write!(f, "running ({mode})"),
            Self::Stopped(ContainerState::Empty) => f.write_str("stopped"),
            Self::Stopped(state) => write!(f, "stopped ({state})"),
        }
    }
}

pub trait Clock {
    /// Time since an arbitrary fixed origin.
    fn elapsed(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when slept on.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Asked once when a readiness wait runs out of time.
pub trait Prompt {
    /// Extra time to keep waiting, or `None` to give up.
    fn extend(&self, target: &str, waited: Duration) -> Option<Duration>;
}

/// Non-interactive: never extends.
pub struct NoPrompt;

impl Prompt for NoPrompt {
    fn extend(&self, _target: &str, _waited: Duration) -> Option<Duration> {
        None
    }
}

/// Poll `check` every [`POLL_INTERVAL`] until it reports running. When
/// `budget` is spent, `prompt` may extend it once; otherwise the wait fails
/// with [`CoreError::Timeout`]. Returns the time waited.
pub fn wait_ready(
    target: &str,
    check: &mut dyn FnMut() -> Result<ContainerState, CoreError>,
    budget: Duration,
    clock: &dyn Clock,
    prompt: &dyn Prompt,
) -> Result<Duration, CoreError> {
    let start = clock.elapsed();
    let mut deadline = budget;
    let mut extended = false;
    loop {
        let state = check()?;
        let waited = clock.elapsed().saturating_sub(start);
        if state.is_running() {
            debug!("{target} ready after {}s", waited.as_secs());
            return Ok(waited);
        }
        if waited >= deadline {
            if !extended {
                if let Some(extra) = prompt.extend(target, waited) {
                    deadline += extra;
                    extended = true;
                    continue;
                }
            }
            return Err(CoreError::Timeout {
                target: target.to_owned(),
                waited: waited.as_secs(),
                state: if state == ContainerState::Empty {
                    "absent".to_owned()
                } else {
                    state.to_string()
                },
            });
        }
        if shutdown_requested() {
            return Err(CoreError::Interrupted);
        }
        clock.sleep(POLL_INTERVAL);
    }
}

/// Global state: running only if every container runs, otherwise the first
/// non-running state found.
pub fn system_state(runtime: &dyn ContainerRuntime) -> Result<SystemState, CoreError> {
    let states = runtime.container_states()?;
    if states.is_empty() {
        return Ok(SystemState::Stopped(ContainerState::Empty));
    }
    if let Some((name, state)) = states.iter().find(|(_, s)| !s.is_running()) {
        debug!("container {name} is {state}");
        return Ok(SystemState::Stopped(*state));
    }
    let mode = runtime
        .active_profile()?
        .map_or(Mode::Online, |p| Mode::from_profile(&p));
    Ok(SystemState::Running(mode))
}

/// State of one module. Its `state` hook, when shipped, is trusted over
/// container status: the first word of its output is the state.
pub fn module_state(
    hooks: &HookOrchestrator<'_>,
    registry: &ModuleRegistry,
    runtime: &dyn ContainerRuntime,
    module: &ModuleName,
) -> Result<ContainerState, CoreError> {
    if !hooks.hooks().local(STATE_EVENT, module).is_empty() {
        let report = hooks.run_local(STATE_EVENT, Some(module), &[])?;
        match report.results.first() {
            Some(r) if r.outcome == HookOutcome::Ok => {
                let word = r.stdout.split_whitespace().next().unwrap_or_default();
                return Ok(ContainerState::parse(word));
            }
            Some(r) => warn!("{module}: state hook failed ({:?}), using container status", r.outcome),
            None => {}
        }
    }
    let external = registry.external_hosts()?;
    let mut aggregate = ContainerState::Empty;
    for service in registry.services_of(module)? {
        if external.contains_key(&service) {
            continue;
        }
        let state = runtime.container_state(&service)?;
        if !state.is_running() {
            return Ok(state);
        }
        aggregate = ContainerState::Running;
    }
    Ok(aggregate)
}
