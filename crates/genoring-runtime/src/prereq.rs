use genoring_schema::Version;
use std::fmt;
use std::process::{Command, Stdio};

/// Oldest compose CLI whose `--profile "*"` and JSON `ps` output we rely on.
pub const MIN_COMPOSE_VERSION: Version = Version::new(2, 0);

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
}

/// Pull `MAJOR.MINOR` out of a version banner such as
/// `Docker Compose version v2.24.5`.
pub fn parse_tool_version(banner: &str) -> Option<Version> {
    banner.split_whitespace().find_map(|word| {
        let word = word.trim_start_matches('v');
        let mut parts = word.split('.');
        let major = parts.next()?;
        let minor = parts.next()?;
        let minor: String = minor.chars().take_while(char::is_ascii_digit).collect();
        Version::parse(&format!("{major}.{minor}"))
    })
}

/// Check the container CLI, its daemon, and the compose plugin.
/// Returns the missing items; empty means the runtime is usable.
pub fn check_compose_prereqs(
    container_command: &str,
    compose_command: &[String],
) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if command_output(container_command, &["--version"]).is_none() {
        missing.push(MissingPrereq {
            name: container_command.to_owned(),
            purpose: "running the platform containers",
            install_hint: "https://docs.docker.com/engine/install/",
        });
        return missing;
    }

    if command_output(container_command, &["info", "--format", "{{.ServerVersion}}"]).is_none() {
        missing.push(MissingPrereq {
            name: format!("{container_command} daemon"),
            purpose: "container engine reachable by the current user",
            install_hint: "start the daemon and add your user to the docker group",
        });
    }

    let (program, rest) = compose_command
        .split_first()
        .map_or(("docker", &[][..]), |(p, r)| (p.as_str(), r));
    let mut args: Vec<&str> = rest.iter().map(String::as_str).collect();
    args.push("version");
    match command_output(program, &args).as_deref().and_then(parse_tool_version) {
        Some(v) if v >= MIN_COMPOSE_VERSION => {}
        Some(v) => missing.push(MissingPrereq {
            name: format!("compose {v} (need >= {MIN_COMPOSE_VERSION})"),
            purpose: "generated compose documents",
            install_hint: "upgrade the docker compose plugin",
        }),
        None => missing.push(MissingPrereq {
            name: compose_command.join(" "),
            purpose: "generated compose documents",
            install_hint: "https://docs.docker.com/compose/install/",
        }),
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nGenoRing needs a working container runtime to manage the platform.");
    msg
}
