mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE};
use sitectl_core::install_signal_handler;
use sitectl_schema::ControllerConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "sitectl",
    version,
    about = "Deployment lifecycle controller for site-hosted applications"
)]
struct Cli {
    /// Path to the controller config TOML file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

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
    /// Print the sanitized account name, or the unit name when a port is given.
    Sanitize {
        name: String,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Autowire the configuration of an application directory in place.
    Autowire {
        /// Application deployment directory.
        app_dir: PathBuf,
        /// Execution identity granted access to the log directories.
        #[arg(long)]
        user: String,
        /// Application setting as NAME=VALUE (repeatable).
        #[arg(long = "var")]
        vars: Vec<String>,
        /// JSON file holding an array of service bindings.
        #[arg(long)]
        services: Option<PathBuf>,
        #[arg(long)]
        log_file: Option<PathBuf>,
        #[arg(long)]
        error_log_file: Option<PathBuf>,
    },
    /// Run a full lifecycle against an in-memory hosting backend.
    Simulate {
        #[arg(long, default_value = "App1")]
        name: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long, default_value = "AppPool")]
        user: String,
        /// Backend reads before a transition completes.
        #[arg(long, default_value_t = 2)]
        latency: u32,
        /// Use millisecond timeouts instead of the configured ones.
        #[arg(long, default_value_t = false)]
        fast: bool,
        /// Application directory; a sample one is generated when omitted.
        #[arg(long)]
        app_dir: Option<PathBuf>,
    },
    /// Show the local address and a free ephemeral port.
    Net {
        /// Address whose route selects the local interface.
        #[arg(long)]
        route: Option<String>,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<ControllerConfig, String> {
    match path {
        Some(path) => ControllerConfig::load(path).map_err(|e| format!("config error: {e}")),
        None => Ok(ControllerConfig::default()),
    }
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
            tracing_subscriber::EnvFilter::try_from_env("SITECTL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let json_output = cli.json;
    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let result = match cli.command {
        Commands::Sanitize { name, port } => commands::sanitize::run(&name, port, json_output),
        Commands::Autowire {
            app_dir,
            user,
            vars,
            services,
            log_file,
            error_log_file,
        } => commands::autowire::run(
            &config,
            &commands::autowire::AutowireArgs {
                app_dir: &app_dir,
                user: &user,
                vars: &vars,
                services: services.as_deref(),
                log_file: log_file.as_deref(),
                error_log_file: error_log_file.as_deref(),
            },
            json_output,
        ),
        Commands::Simulate {
            name,
            port,
            user,
            latency,
            fast,
            app_dir,
        } => commands::simulate::run(
            &config,
            &commands::simulate::SimulateArgs {
                name: &name,
                port,
                user: &user,
                latency,
                fast,
                app_dir: app_dir.as_deref(),
            },
            json_output,
        ),
        Commands::Net { route } => commands::net::run(route.as_deref(), json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
