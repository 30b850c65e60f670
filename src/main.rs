use crate::AppError::ConfigError;
use clap::Parser;
use config::Config;
use gpsetlist::SetlistError as LibSetlistError;
use std::path::PathBuf;

mod config;

fn main() {
    let result = main_result();
    std::process::exit(match result {
        Ok(()) => 0,
        Err(err) => {
            // use Display instead of Debug for user friendly error messages
            log::error!("{err}");
            1
        }
    });
}

pub fn main_result() -> Result<(), AppError> {
    // setup logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("gpsetlist=info"))
        .init();

    // args
    let args = CliArgs::parse();

    // read local config
    let mut local_config = Config::read_config()?;
    if args.remember {
        local_config.update(args.folder.clone(), args.output.clone())?;
        log::info!("Saved defaults {local_config:?}");
    }

    let output = args
        .output
        .unwrap_or_else(|| local_config.output_file().to_path_buf());

    // explicit files take precedence over the folder
    let inputs = if args.inputs.is_empty() {
        let folder = args
            .folder
            .unwrap_or_else(|| local_config.songs_folder().to_path_buf());
        if !folder.is_dir() {
            let err = ConfigError(format!("Songs folder not found {folder:?}"));
            return Err(err);
        }
        log::info!("Looking for songs in {folder:?}");
        gpsetlist::discover_songs(&folder)?
    } else {
        args.inputs
    };

    // go!
    let (output, report) = gpsetlist::run(&inputs, &output)?;
    log::info!(
        "Setlist '{}' with {} songs written to {}",
        report.song.title(),
        report.merged.len(),
        output.display()
    );
    Ok(())
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Songs to merge, in order. Defaults to the songs of the folder sorted by name.
    inputs: Vec<PathBuf>,
    /// Folder to scan for .gp5 files.
    #[arg(long)]
    folder: Option<PathBuf>,
    /// Path of the merged file.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Store the given folder and output as new defaults.
    #[arg(long, default_value_t = false)]
    remember: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("no input files found")]
    NoInput,
    #[error("{0}")]
    SetlistError(LibSetlistError),
    #[error("other error: {0}")]
    OtherError(String),
}

impl From<LibSetlistError> for AppError {
    fn from(error: LibSetlistError) -> Self {
        match error {
            LibSetlistError::ConfigError(s) => Self::ConfigError(s),
            LibSetlistError::IoError(s) => Self::OtherError(s),
            LibSetlistError::EmptyInputError => Self::NoInput,
            other => Self::SetlistError(other),
        }
    }
}
