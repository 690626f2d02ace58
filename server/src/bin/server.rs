//! Cuckoo cache server binary.

use clap::Parser;
use server::config::{Config, DEFAULT_CONFIG_TEMPLATE};
use server::{logging, signal};
use std::path::PathBuf;

// Exit codes in the sysexits tradition.
const EX_DATAERR: i32 = 65;
const EX_CONFIG: i32 = 78;

#[derive(Parser)]
#[command(name = "cuckoo-server", version, disable_version_flag = true)]
#[command(about = "Cuckoo-hash key/value cache speaking the memcached ASCII protocol")]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    config: Option<PathBuf>,

    /// Print version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print!("{DEFAULT_CONFIG_TEMPLATE}");
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config {}: {}", path.display(), e);
                std::process::exit(EX_DATAERR);
            }
        },
        None => {
            eprintln!("no config file specified, launching with default values");
            Config::default()
        }
    };

    let log = logging::init(&config.log);
    signal::install_process_handlers();

    if let Err(e) = server::run(config, &log) {
        tracing::error!("server setup failed: {e}");
        std::process::exit(EX_CONFIG);
    }
}
