mod commands;

use clap::{Parser, Subcommand};
use commands::{EnvArgs, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "moorage",
    version,
    about = "Desired-state preparation of containerized execution environments"
)]
struct Cli {
    /// Engine configuration file (defaults to ./moorage.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Fingerprint state file (overrides the configured one).
    #[arg(long, global = true)]
    state: Option<PathBuf>,

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

#[derive(Debug, Subcommand)]
enum Commands {
    /// Inspect the environment and run whatever preparation it needs.
    Prepare {
        #[command(flatten)]
        env: EnvArgs,
        /// JSON file holding the workflow steps.
        #[arg(long)]
        steps: Option<PathBuf>,
        /// Execution driver.
        #[arg(long, default_value = "docker")]
        driver: String,
        /// Skip preparation when the fingerprint is unchanged.
        #[arg(long, default_value_t = false)]
        if_changed: bool,
    },
    /// Show what would be rebuilt or recreated.
    Status {
        #[command(flatten)]
        env: EnvArgs,
    },
    /// Remove one fingerprint (`<language>_<envType>`) or all of them.
    Clear {
        key: Option<String>,
    },
    /// Check that the docker client and daemon are usable.
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
            tracing_subscriber::EnvFilter::try_from_env("MOORAGE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json_output = cli.json;
    let result = commands::Settings::load(cli.config.as_deref(), cli.state.as_deref()).and_then(
        |settings| match cli.command {
            Commands::Prepare {
                env,
                steps,
                driver,
                if_changed,
            } => commands::prepare::run(
                &settings,
                &env,
                steps.as_deref(),
                &driver,
                if_changed,
                json_output,
            ),
            Commands::Status { env } => commands::status::run(&settings, &env, json_output),
            Commands::Clear { key } => commands::clear::run(&settings, key.as_deref(), json_output),
            Commands::Doctor => commands::doctor::run(&settings, json_output),
        },
    );

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("store lock:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
