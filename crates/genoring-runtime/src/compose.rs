use crate::backend::{CommandOutput, ContainerRuntime, ContainerState};
use crate::exec::ExecutionContext;
use crate::RuntimeError;
use genoring_store::{EngineConfig, ProjectLayout};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Drives `docker compose` (or a compatible CLI) against the generated
/// project documents.
pub struct ComposeRuntime {
    root: PathBuf,
    compose_file: PathBuf,
    profile_marker: PathBuf,
    compose_command: Vec<String>,
    container_command: String,
    project_name: String,
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "State", default)]
    state: String,
}

impl ComposeRuntime {
    pub fn new(layout: &ProjectLayout, config: &EngineConfig) -> Self {
        Self {
            root: layout.root().to_path_buf(),
            compose_file: layout.compose_file(),
            profile_marker: layout.profile_marker(),
            compose_command: config.compose_command.clone(),
            container_command: config.container_command.clone(),
            project_name: config.project_name(layout),
        }
    }

    fn compose(&self) -> Command {
        let (program, rest) = self
            .compose_command
            .split_first()
            .map_or(("docker", &[][..]), |(p, r)| (p.as_str(), r));
        let mut cmd = Command::new(program);
        cmd.args(rest)
            .arg("-p")
            .arg(&self.project_name)
            .arg("-f")
            .arg(&self.compose_file)
            .current_dir(&self.root);
        cmd
    }

    fn container_cli(&self) -> Command {
        let mut cmd = Command::new(&self.container_command);
        cmd.current_dir(&self.root);
        cmd
    }

    fn run(&self, mut cmd: Command, what: &str) -> Result<CommandOutput, RuntimeError> {
        debug!("{what}: {cmd:?}");
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RuntimeError::Unavailable(format!("{what}: {e}")))?;
        Ok(CommandOutput::from_output(&output))
    }

    fn run_checked(&self, cmd: Command, what: &str) -> Result<CommandOutput, RuntimeError> {
        let out = self.run(cmd, what)?;
        if out.success() {
            Ok(out)
        } else {
            Err(RuntimeError::CommandFailed {
                command: what.to_owned(),
                code: out.code,
                stderr: out.stderr.trim().to_owned(),
            })
        }
    }

    fn write_marker(&self, profile: &str) -> Result<(), RuntimeError> {
        let dir = self
            .profile_marker
            .parent()
            .unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(profile.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.profile_marker)
            .map_err(|e| RuntimeError::Io(e.error))?;
        Ok(())
    }
}

/// `docker compose ps --format json` prints either one JSON array or one
/// object per line depending on the compose version.
fn parse_ps(stdout: &str) -> Result<BTreeMap<String, ContainerState>, RuntimeError> {
    let trimmed = stdout.trim();
    let entries: Vec<PsEntry> = if trimmed.is_empty() {
        Vec::new()
    } else if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| RuntimeError::ParseOutput(e.to_string()))?
    } else {
        trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()
            .map_err(|e| RuntimeError::ParseOutput(e.to_string()))?
    };
    Ok(entries
        .into_iter()
        .map(|e| (e.name, ContainerState::parse(&e.state)))
        .collect())
}

impl ContainerRuntime for ComposeRuntime {
    fn name(&self) -> &'static str {
        "compose"
    }

    fn available(&self) -> bool {
        let mut cmd = self.compose();
        cmd.arg("version").stdout(Stdio::null()).stderr(Stdio::null());
        cmd.status().is_ok_and(|s| s.success())
    }

    fn up(&self, profile: &str) -> Result<(), RuntimeError> {
        info!("starting services (profile {profile})");
        let mut cmd = self.compose();
        cmd.env("GENORING_PROFILE", profile)
            .args(["--profile", profile, "up", "-d", "--remove-orphans"]);
        self.run_checked(cmd, "compose up")?;
        self.write_marker(profile)
    }

    fn down(&self) -> Result<(), RuntimeError> {
        info!("stopping services");
        let mut cmd = self.compose();
        cmd.args(["--profile", "*", "down"]);
        self.run_checked(cmd, "compose down")?;
        if self.profile_marker.exists() {
            fs::remove_file(&self.profile_marker)?;
        }
        Ok(())
    }

    fn active_profile(&self) -> Result<Option<String>, RuntimeError> {
        if !self.profile_marker.exists() {
            return Ok(None);
        }
        let profile = fs::read_to_string(&self.profile_marker)?.trim().to_owned();
        Ok((!profile.is_empty()).then_some(profile))
    }

    fn container_states(&self) -> Result<BTreeMap<String, ContainerState>, RuntimeError> {
        let mut cmd = self.compose();
        cmd.args(["--profile", "*", "ps", "--all", "--format", "json"]);
        let out = self.run_checked(cmd, "compose ps")?;
        parse_ps(&out.stdout)
    }

    fn container_state(&self, container: &str) -> Result<ContainerState, RuntimeError> {
        let mut cmd = self.container_cli();
        cmd.args(["inspect", "--format", "{{.State.Status}}", container]);
        let out = self.run(cmd, "inspect")?;
        if out.success() {
            Ok(ContainerState::parse(&out.stdout))
        } else {
            Ok(ContainerState::Empty)
        }
    }

    fn exec(
        &self,
        container: &str,
        command: &[String],
        ctx: &ExecutionContext,
    ) -> Result<CommandOutput, RuntimeError> {
        let mut cmd = self.container_cli();
        cmd.args(["exec", "-u", ctx.user_or_root()])
            .args(ctx.env_args())
            .arg(container)
            .args(command);
        self.run(cmd, "exec")
    }

    fn copy_into(&self, source: &Path, container: &str, dest: &str) -> Result<(), RuntimeError> {
        let mut cmd = self.container_cli();
        cmd.arg("cp")
            .arg(source)
            .arg(format!("{container}:{dest}"));
        self.run_checked(cmd, "cp")?;
        Ok(())
    }

    fn build_image(&self, context: &Path, tag: &str) -> Result<(), RuntimeError> {
        info!("building image {tag}");
        let mut cmd = self.container_cli();
        cmd.args(["build", "-t", tag]).arg(context);
        self.run_checked(cmd, "build")?;
        Ok(())
    }

    fn pull(&self) -> Result<(), RuntimeError> {
        let mut cmd = self.compose();
        cmd.args(["--profile", "*", "pull", "--ignore-buildable"]);
        self.run_checked(cmd, "compose pull")?;
        Ok(())
    }

    fn remove_volume(&self, volume: &str) -> Result<(), RuntimeError> {
        let mut cmd = self.container_cli();
        cmd.args(["volume", "rm", "-f", volume]);
        self.run_checked(cmd, "volume rm")?;
        Ok(())
    }
}
