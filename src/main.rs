use std::{error::Error, process, time::SystemTime};

use clap::{command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, LevelFilter};

use portal::{
    config::Config,
    error::ErrorKind,
    events::Event,
    portal::Portal,
    protocol::auth::Credentials,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Built-in defaults for a local development backend are used when the
    /// file does not exist.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("portal.toml"))]
    config: String,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, Subcommand)]
enum Command {
    /// Log in and persist the session
    Login {
        /// Member ID
        #[arg(short, long)]
        id: String,

        /// Password
        ///
        /// Prefer the environment variable over the command line, which may
        /// be visible to other users of the system.
        #[arg(short, long, env = "PORTAL_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Clear the persisted session
    Logout,

    /// Show the logged-in member
    Whoami,

    /// Send an authenticated GET request and print the response body
    Get {
        /// Path relative to the backend URL
        path: String,

        /// Backend to send the request to
        #[arg(short, long, default_value_t = String::from(Config::API_BACKEND))]
        backend: String,
    },

    /// Check whether a member ID is still available
    CheckId {
        /// Member ID
        id: String,
    },
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(args: &Args) {
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if args.quiet || args.verbose > 0 {
        let level = match args.verbose {
            // Quiet and verbose are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("portal", level);
    }

    logger.init();
}

/// Loads the configuration file, or the defaults if there is none.
fn load_config(path: &str) -> Result<Config, Box<dyn Error>> {
    let mut config = match Config::from_file(path) {
        Ok(config) => config,
        Err(e) if e.kind == ErrorKind::NotFound => {
            info!("{path} not found, using defaults");
            Config::default()
        }
        Err(e) => return Err(e.into()),
    };

    config.apply_env()?;
    Ok(config)
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args.config)?;
    let portal = Portal::from_config(config)?;

    // Render what a UI would show.
    let mut events = portal.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::Notice(notice) => println!("{notice}"),
                Event::Redirect(route) => info!("redirect to {route}"),
                event => debug!("{event:?}"),
            }
        }
    });

    match args.command {
        Command::Login { id, password } => {
            let user = portal.auth().login(&Credentials::new(id, password)).await?;
            println!("logged in as {}", user.id);
        }

        Command::Logout => {
            portal.auth().logout();
            println!("logged out");
        }

        Command::Whoami => match portal.session().user() {
            Some(user) => {
                println!("{}", serde_json::to_string_pretty(&user)?);
                if let Some(expires_at) = portal.session().expires_at() {
                    match expires_at.duration_since(SystemTime::now()) {
                        Ok(remaining) => println!("access token expires in {}s", remaining.as_secs()),
                        Err(_) => println!("access token has expired"),
                    }
                }
            }
            None => println!("not logged in"),
        },

        Command::Get { path, backend } => {
            let response = portal.client(&backend)?.get(&path, &[]).await?;
            println!("{}", String::from_utf8_lossy(response.body()));
        }

        Command::CheckId { id } => {
            let verdict = if portal.auth().is_id_available(&id).await? {
                "available"
            } else {
                "taken"
            };
            println!("{id} is {verdict}");
        }
    }

    // Let the event printer drain.
    tokio::task::yield_now().await;
    Ok(())
}

/// Main entry point of the application.
#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more, but never the
    // password.
    if let Command::Login { ref id, .. } = args.command {
        debug!("Command login {{ id: {id:?} }}");
    } else {
        debug!("Command {:#?}", args.command);
    }

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    debug!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
