//! Explicit execution context for hooks and other subprocesses.
//!
//! Nothing is passed to child processes through the engine's own
//! environment or working directory: every variable, the target user, and
//! the working directory come from an [`ExecutionContext`].

use crate::backend::CommandOutput;
use crate::RuntimeError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

#[allow(unsafe_code)]
fn current_uid() -> u32 {
    // SAFETY: getuid() takes no arguments and cannot fail.
    unsafe { libc::getuid() }
}

#[allow(unsafe_code)]
fn current_gid() -> u32 {
    // SAFETY: getgid() takes no arguments and cannot fail.
    unsafe { libc::getgid() }
}

/// Host facts hooks may branch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    pub uid: u32,
    pub gid: u32,
}

impl Platform {
    pub fn detect() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
            uid: current_uid(),
            gid: current_gid(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub env: BTreeMap<String, String>,
    /// Container user for in-container execution; `None` means root.
    pub user: Option<String>,
    pub workdir: Option<PathBuf>,
    pub platform: Platform,
}

impl ExecutionContext {
    pub fn new(platform: Platform) -> Self {
        Self {
            env: BTreeMap::new(),
            user: None,
            workdir: None,
            platform,
        }
    }

    /// Context with the platform flags exported as `GENORING_*` variables.
    pub fn for_host() -> Self {
        let platform = Platform::detect();
        let mut ctx = Self::new(platform.clone());
        ctx.env.insert("GENORING_PLATFORM".to_owned(), platform.os);
        ctx.env.insert("GENORING_ARCH".to_owned(), platform.arch);
        ctx.env
            .insert("GENORING_UID".to_owned(), platform.uid.to_string());
        ctx.env
            .insert("GENORING_GID".to_owned(), platform.gid.to_string());
        ctx
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    #[must_use]
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn user_or_root(&self) -> &str {
        self.user.as_deref().unwrap_or("root")
    }

    /// Build a host command carrying this context.
    pub fn command(&self, program: impl AsRef<std::ffi::OsStr>) -> Command {
        let mut cmd = Command::new(program);
        cmd.envs(&self.env);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run a host program to completion, capturing its output.
    pub fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput, RuntimeError> {
        debug!("running {} {}", program.display(), args.join(" "));
        let output = self
            .command(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RuntimeError::ExecFailed(format!("{}: {e}", program.display())))?;
        Ok(CommandOutput::from_output(&output))
    }

    /// `-e KEY=VALUE` pairs for container exec.
    pub fn env_args(&self) -> Vec<String> {
        self.env
            .iter()
            .flat_map(|(k, v)| ["-e".to_owned(), format!("{k}={v}")])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn host_context_exports_platform() {
        let ctx = ExecutionContext::for_host();
        assert_eq!(ctx.env["GENORING_PLATFORM"], std::env::consts::OS);
        assert_eq!(ctx.user_or_root(), "root");
        assert_eq!(ctx.env["GENORING_UID"], ctx.platform.uid.to_string());
        assert_eq!(ctx.as_user("www-data").user_or_root(), "www-data");
    }

    #[test]
    fn run_uses_context_env_and_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("show.sh");
        fs::write(&script, "#!/bin/sh\necho \"$HOOK_VALUE:$(cat marker)\"\n").unwrap();
        fs::write(dir.path().join("marker"), "here").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let ctx = ExecutionContext::new(Platform::detect())
            .with_env("HOOK_VALUE", "42")
            .in_dir(dir.path());
        let out = ctx.run(&script, &[]).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "42:here");
    }

    #[test]
    fn run_reports_exit_code() {
        let ctx = ExecutionContext::new(Platform::detect());
        let out = ctx
            .run(Path::new("/bin/sh"), &["-c".to_owned(), "exit 3".to_owned()])
            .unwrap();
        assert_eq!(out.code, 3);
        assert!(!out.success());
    }

    #[test]
    fn env_args_are_pairs() {
        let ctx = ExecutionContext::new(Platform::detect())
            .with_env("B", "2")
            .with_env("A", "1");
        assert_eq!(ctx.env_args(), vec!["-e", "A=1", "-e", "B=2"]);
    }
}
