mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use commands::{
    EXIT_FAILURE, EXIT_INSTALL_ERROR, EXIT_LOCK_ERROR, EXIT_MANIFEST_ERROR, EXIT_SOLVE_ERROR,
};
use condaspace_core::{install_signal_handler, InstallOptions, Settings};
use condaspace_schema::ManifestFormat;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "condaspace",
    version,
    about = "Project-scoped multi-environment conda workspaces"
)]
struct Cli {
    /// Path to the workspace manifest (default: search upward from the current directory).
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InitFormat {
    Conda,
    Pixi,
    Pyproject,
}

impl From<InitFormat> for ManifestFormat {
    fn from(f: InitFormat) -> Self {
        match f {
            InitFormat::Conda => ManifestFormat::CondaToml,
            InitFormat::Pixi => ManifestFormat::PixiToml,
            InitFormat::Pyproject => ManifestFormat::Pyproject,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a workspace manifest in the current directory.
    Init {
        /// Manifest flavor to write.
        #[arg(long, value_enum, default_value = "conda")]
        format: InitFormat,
        /// Workspace name (default: directory name).
        #[arg(long)]
        name: Option<String>,
        /// Channel to list in the workspace (repeatable).
        #[arg(short, long = "channel")]
        channels: Vec<String>,
        /// Platform to support (repeatable).
        #[arg(short, long = "platform")]
        platforms: Vec<String>,
    },
    /// Solve and install environments into the workspace.
    Install {
        /// Only install this environment.
        #[arg(short, long)]
        environment: Option<String>,
        /// Install exactly what the lockfile pins, without solving.
        #[arg(long, default_value_t = false)]
        locked: bool,
        /// Remove existing prefixes before installing.
        #[arg(long, default_value_t = false)]
        force_reinstall: bool,
        /// Report what would be installed without touching any prefix.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Solve environments and write the lockfile.
    Lock {
        /// Only lock these environments (repeatable).
        #[arg(short, long = "environment")]
        environments: Vec<String>,
    },
    /// List the environments the workspace defines.
    List {
        /// Only show installed environments.
        #[arg(long, default_value_t = false)]
        installed: bool,
    },
    /// Show the resolved definition of an environment.
    Info {
        #[arg(default_value = "default")]
        environment: String,
    },
    /// Add dependencies to the manifest.
    Add {
        /// Dependency specs, e.g. `numpy>=1.26` or `conda-forge::python 3.12.*`.
        #[arg(required = true)]
        specs: Vec<String>,
        /// Edit the last feature of this environment.
        #[arg(short, long)]
        environment: Option<String>,
        /// Edit this feature (overrides --environment).
        #[arg(short, long)]
        feature: Option<String>,
        /// Edit PyPI dependencies instead of conda dependencies.
        #[arg(long, default_value_t = false)]
        pypi: bool,
    },
    /// Remove dependencies from the manifest.
    Remove {
        #[arg(required = true)]
        names: Vec<String>,
        #[arg(short, long)]
        environment: Option<String>,
        #[arg(short, long)]
        feature: Option<String>,
        #[arg(long, default_value_t = false)]
        pypi: bool,
    },
    /// Run a command inside an installed environment.
    Run {
        #[arg(short, long, default_value = "default")]
        environment: String,
        /// Command and arguments to run (after --).
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },
    /// Start an interactive shell inside an installed environment.
    Shell {
        #[arg(default_value = "default")]
        environment: String,
    },
    /// Print shell exports that activate an installed environment.
    Activate {
        #[arg(default_value = "default")]
        environment: String,
    },
    /// Remove installed environment prefixes.
    Clean {
        /// Only remove this environment.
        #[arg(short, long)]
        environment: Option<String>,
        /// Skip the confirmation prompt.
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },
    /// Export installed environments.
    Export {
        #[arg(short, long = "environment")]
        environments: Vec<String>,
        #[arg(long, default_value = "conda-workspaces-lock")]
        format: String,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Create a standalone environment from a manifest or lockfile.
    EnvCreate {
        /// Manifest or `conda.lock` to read.
        #[arg(long)]
        file: PathBuf,
        /// Target prefix directory.
        #[arg(long)]
        prefix: PathBuf,
        #[arg(short, long, default_value = "default")]
        environment: String,
    },
    /// Run diagnostic checks on backends and the workspace.
    Doctor,
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
            tracing_subscriber::EnvFilter::try_from_env("CONDASPACE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let json_output = cli.json;
    let manifest = cli.manifest.as_deref();

    let needs_backends = matches!(
        cli.command,
        Commands::Install { dry_run: false, .. } | Commands::Lock { .. } | Commands::EnvCreate { .. }
    );
    if needs_backends && std::env::var("CONDASPACE_SKIP_PREREQS").as_deref() != Ok("1") {
        match Settings::load_default() {
            Ok(settings) => {
                let solver_exe = settings
                    .solver_exe
                    .clone()
                    .unwrap_or_else(|| condaspace_runtime::solver::DEFAULT_SOLVER_EXE.to_owned());
                let missing = condaspace_runtime::check_prereqs(
                    &settings.solver,
                    &solver_exe,
                    &settings.installer,
                    &settings.conda_exe,
                );
                if !missing.is_empty() {
                    eprintln!("error: {}", condaspace_runtime::format_missing(&missing));
                    return ExitCode::from(EXIT_FAILURE);
                }
            }
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::from(EXIT_FAILURE);
            }
        }
    }

    let result = match cli.command {
        Commands::Init {
            format,
            name,
            channels,
            platforms,
        } => commands::init::run(format.into(), name, channels, platforms, json_output),
        Commands::Install {
            environment,
            locked,
            force_reinstall,
            dry_run,
        } => commands::install::run(
            manifest,
            &InstallOptions {
                environment,
                locked,
                force_reinstall,
                dry_run,
            },
            json_output,
        ),
        Commands::Lock { environments } => commands::lock::run(manifest, &environments, json_output),
        Commands::List { installed } => commands::list::run(manifest, installed, json_output),
        Commands::Info { environment } => commands::info::run(manifest, &environment, json_output),
        Commands::Add {
            specs,
            environment,
            feature,
            pypi,
        } => commands::add::run(
            manifest,
            &specs,
            environment.as_deref(),
            feature,
            pypi,
            json_output,
        ),
        Commands::Remove {
            names,
            environment,
            feature,
            pypi,
        } => commands::remove::run(
            manifest,
            &names,
            environment.as_deref(),
            feature,
            pypi,
            json_output,
        ),
        Commands::Run {
            environment,
            command,
        } => commands::run::run(manifest, &environment, &command),
        Commands::Shell { environment } => commands::shell::run(manifest, &environment),
        Commands::Activate { environment } => commands::activate::run(manifest, &environment),
        Commands::Clean { environment, yes } => {
            commands::clean::run(manifest, environment.as_deref(), yes, json_output)
        }
        Commands::Export {
            environments,
            format,
            output,
        } => commands::export::run(manifest, &environments, &format, output.as_deref()),
        Commands::EnvCreate {
            file,
            prefix,
            environment,
        } => commands::env_create::run(&file, &prefix, &environment, json_output),
        Commands::Doctor => commands::doctor::run(manifest, json_output),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("manifest error:") {
        EXIT_MANIFEST_ERROR
    } else if msg.starts_with("solve error:") {
        EXIT_SOLVE_ERROR
    } else if msg.starts_with("install error:") {
        EXIT_INSTALL_ERROR
    } else if msg.starts_with("lock error:") {
        EXIT_LOCK_ERROR
    } else {
        EXIT_FAILURE
    }
}
