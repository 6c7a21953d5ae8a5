use clap::Parser;
use link_backup::backup::job::{run_job, Mode};
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info};

/// Timestamped, hard link deduplicated directory backups
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// `init` for the first full backup, `run` for incremental ones
    #[arg(value_enum)]
    mode: Mode,
    /// Location of the backup set config file
    config: PathBuf,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match run_job(args.mode, &args.config) {
        Ok(snapshot) => info!("Backup finished: {:?}", snapshot.path),
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}
