mod commands;
mod prompt;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{core_error, exit_code_for, parse_module, CONFIG_PREFIX, RUNTIME_PREFIX};
use genoring_core::{install_signal_handler, CoreError, Engine, ProjectLock};
use genoring_runtime::{select_runtime, Mode};
use genoring_schema::{AlternativeName, ModuleName, ServiceName};
use genoring_store::{EngineConfig, ProjectLayout};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "genoring",
    version,
    about = "Module composition and lifecycle engine for GenoRing platforms"
)]
struct Cli {
    /// GenoRing project directory (holds modules/, config/ and the compose files).
    #[arg(long, default_value = ".", global = true)]
    project: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    /// Answer yes to confirmations and readiness extensions.
    #[arg(short, long, default_value_t = false, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the platform.
    Start {
        /// online, offline or backend.
        #[arg(default_value = "online", value_parser = parse_mode)]
        mode: Mode,
    },
    /// Stop every container.
    Stop,
    /// Show the platform state, or the state of one module.
    Status {
        #[arg(value_parser = parse_module)]
        module: Option<ModuleName>,
    },
    /// List available modules with their status and versions.
    Modules,
    /// Install and enable modules (the base `genoring` module by default).
    Install {
        #[arg(value_parser = parse_module)]
        modules: Vec<ModuleName>,
    },
    /// Enable an installed or available module.
    Enable {
        #[arg(value_parser = parse_module)]
        module: ModuleName,
    },
    /// Disable a module, keeping its data.
    Disable {
        #[arg(value_parser = parse_module)]
        module: ModuleName,
    },
    /// Remove a disabled module, its environment files and its data volumes.
    Uninstall {
        #[arg(value_parser = parse_module)]
        module: ModuleName,
    },
    /// Enable an alternative of a disabled module.
    Enalt {
        #[arg(value_parser = parse_module)]
        module: ModuleName,
        alternative: String,
    },
    /// Disable an alternative of a disabled module.
    Disalt {
        #[arg(value_parser = parse_module)]
        module: ModuleName,
        alternative: String,
    },
    /// Back up the project configuration, or one module, and its data.
    Backup {
        /// Backup name (defaults to a timestamp).
        name: Option<String>,
        #[arg(value_parser = parse_module)]
        module: Option<ModuleName>,
        /// List existing backups instead of creating one.
        #[arg(long, default_value_t = false, conflicts_with_all = ["name", "module"])]
        list: bool,
    },
    /// Restore a backup.
    Restore {
        name: String,
        #[arg(value_parser = parse_module)]
        module: Option<ModuleName>,
    },
    /// Record new module versions, refresh environment files and pull images.
    Update {
        #[arg(value_parser = parse_module)]
        module: Option<ModuleName>,
    },
    /// System-wide update through the modules' upgrade hooks.
    Upgrade,
    /// Build a service image from its module's sources.
    Compile {
        #[arg(value_parser = parse_module)]
        module: ModuleName,
        service: String,
    },
    /// Point a service at an external host, or run it locally again.
    Sethost {
        service: String,
        /// IP address of the external host; omit to clear.
        ip: Option<String>,
    },
    /// Rewrite docker-compose.yml and the dependency overlays.
    Regenerate,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Run diagnostic checks on the host and the project.
    Doctor,
}

impl Commands {
    /// Verbs that change project files or container state take the project
    /// lock.
    fn mutates(&self) -> bool {
        !matches!(
            self,
            Self::Status { .. }
                | Self::Modules
                | Self::Backup { list: true, .. }
                | Self::Completions { .. }
                | Self::Doctor
        )
    }

    fn needs_containers(&self) -> bool {
        !matches!(
            self,
            Self::Modules
                | Self::Regenerate
                | Self::Enalt { .. }
                | Self::Disalt { .. }
                | Self::Backup { list: true, .. }
                | Self::Completions { .. }
                | Self::Doctor
        )
    }
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    Mode::parse(s).ok_or_else(|| format!("unknown mode '{s}' (online, offline or backend)"))
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GENORING_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("{} {msg}", console::Style::new().red().bold().apply_to("ERROR:"));
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn run(cli: Cli) -> Result<u8, String> {
    let json = cli.json;
    let skip_prereqs = std::env::var("GENORING_SKIP_PREREQS").as_deref() == Ok("1");

    match cli.command {
        Commands::Completions { shell } => return commands::completions::run::<Cli>(shell),
        Commands::Doctor => return commands::doctor::run(&cli.project, skip_prereqs, json),
        _ => {}
    }

    install_signal_handler();

    let layout = ProjectLayout::new(&cli.project);
    if !layout.modules_dir().is_dir() {
        return Err(format!(
            "{CONFIG_PREFIX}no modules directory in {}; is this a GenoRing project?",
            cli.project.display()
        ));
    }
    let config = EngineConfig::load(&layout)
        .map_err(|e| format!("{CONFIG_PREFIX}{e}"))?;

    let runtime_name = std::env::var("GENORING_RUNTIME").unwrap_or_else(|_| "compose".to_owned());
    if cli.command.needs_containers() && runtime_name == "compose" && !skip_prereqs {
        let missing = genoring_runtime::check_compose_prereqs(
            &config.container_command,
            &config.compose_command,
        );
        if !missing.is_empty() {
            return Err(format!(
                "{RUNTIME_PREFIX}{}",
                genoring_runtime::format_missing(&missing)
            ));
        }
    }
    let runtime = select_runtime(&runtime_name, &layout, &config)
        .map_err(|e| core_error(&CoreError::from(e)))?;
    tracing::debug!("using the {runtime_name} runtime");

    let _lock = if cli.command.mutates() {
        match ProjectLock::try_acquire(&layout) {
            Ok(Some(lock)) => Some(lock),
            Ok(None) => {
                let holder = ProjectLock::holder(&layout)
                    .map(|pid| format!("pid {pid}, "))
                    .unwrap_or_default();
                return Err(format!(
                    "another genoring process is working on {} ({holder}lock: {})",
                    cli.project.display(),
                    layout.lock_file().display()
                ));
            }
            Err(e) => return Err(format!("project lock: {e}")),
        }
    } else {
        None
    };

    let extension = Duration::from_secs(config.readiness_timeout_secs);
    let engine = Engine::open(&cli.project, runtime)
        .map_err(|e| core_error(&e))?
        .with_prompt(Box::new(prompt::TerminalPrompt::new(extension, cli.yes)));

    match cli.command {
        Commands::Start { mode } => commands::start::run(&engine, mode, json),
        Commands::Stop => commands::stop::run(&engine, json),
        Commands::Status { module } => commands::status::run(&engine, module.as_ref(), json),
        Commands::Modules => commands::modules::run(&engine, json),
        Commands::Install { modules } => commands::install::run(&engine, &modules, json),
        Commands::Enable { module } => commands::enable::run(&engine, &module, json),
        Commands::Disable { module } => commands::disable::run(&engine, &module, json),
        Commands::Uninstall { module } => {
            commands::uninstall::run(&engine, &module, cli.yes, json)
        }
        Commands::Enalt {
            module,
            alternative,
        } => commands::alternative::run_enable(
            &engine,
            &module,
            &AlternativeName::new(alternative),
            json,
        ),
        Commands::Disalt {
            module,
            alternative,
        } => commands::alternative::run_disable(
            &engine,
            &module,
            &AlternativeName::new(alternative),
            json,
        ),
        Commands::Backup { list: true, .. } => commands::backup::list(&engine, json),
        Commands::Backup { name, module, .. } => {
            commands::backup::run(&engine, name.as_deref(), module.as_ref(), json)
        }
        Commands::Restore { name, module } => {
            commands::restore::run(&engine, &name, module.as_ref(), json)
        }
        Commands::Update { module } => commands::update::run(&engine, module.as_ref(), json),
        Commands::Upgrade => commands::update::run_upgrade(&engine, json),
        Commands::Compile { module, service } => {
            commands::compile::run(&engine, &module, &ServiceName::new(service), json)
        }
        Commands::Sethost { service, ip } => {
            commands::sethost::run(&engine, &ServiceName::new(service), ip.as_deref(), json)
        }
        Commands::Regenerate => commands::regenerate::run(&engine, json),
        Commands::Completions { .. } | Commands::Doctor => {
            unreachable!("handled before the engine is opened")
        }
    }
}
