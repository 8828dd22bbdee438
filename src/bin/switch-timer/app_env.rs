use std::path::PathBuf;

use color_eyre::eyre::Result;
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use switch_timer::settings::ENV_PREFIX;
use tracing_error::ErrorLayer;
use tracing_subscriber::{self, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, Layer};

pub static DATA_FOLDER: Lazy<Option<PathBuf>> =
    Lazy::new(|| std::env::var(format!("{}_DATA", *ENV_PREFIX)).ok().map(PathBuf::from));

pub static LOG_ENV: Lazy<String> = Lazy::new(|| format!("{}_LOGLEVEL", *ENV_PREFIX));

pub static LOG_FILE: Lazy<String> = Lazy::new(|| format!("{}.log", env!("CARGO_PKG_NAME")));

pub static LOG_TO_FILE: Lazy<bool> = Lazy::new(|| bool_env("LOG_TO_FILE", false));

pub static ENV_COLOR_LOG: Lazy<bool> = Lazy::new(|| bool_env("ENV_COLOR_LOG", true));

pub static LOG_SOURCE_FILES: Lazy<bool> = Lazy::new(|| bool_env("LOG_SOURCE_FILES", false));

fn bool_env(name: &str, default: bool) -> bool {
    std::env::var(format!("{}_{}", *ENV_PREFIX, name))
        .map(|v| v.parse::<bool>().unwrap_or(default))
        .unwrap_or(default)
}

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "switch-timer", env!("CARGO_PKG_NAME"))
}

pub fn initialize_panic_handler() -> Result<()> {
    std::panic::set_hook(Box::new(move |panic_info| {
        #[cfg(not(debug_assertions))]
        {
            use human_panic::{handle_dump, print_msg, Metadata};
            let meta = Metadata::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

            let file_path = handle_dump(&meta, panic_info);
            if let Err(err) = print_msg(file_path, &meta) {
                eprintln!("human-panic: failed to print error message to console: {}", err);
            }
        }

        log::error!("Panic occurred: {}", panic_info);

        #[cfg(debug_assertions)]
        {
            better_panic::Settings::auto()
                .most_recent_first(false)
                .lineno_suffix(true)
                .verbosity(better_panic::Verbosity::Full)
                .create_panic_handler()(panic_info);
        }

        std::process::exit(1);
    }));

    Ok(())
}

pub fn get_data_dir() -> PathBuf {
    if let Some(s) = DATA_FOLDER.clone() {
        s
    } else if let Some(proj_dirs) = project_directory() {
        proj_dirs.data_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".data")
    }
}

pub fn initialize_logging() -> Result<()> {
    // binary and library share the `switch_timer` target prefix
    std::env::set_var(
        "RUST_LOG",
        std::env::var("RUST_LOG")
            .or_else(|_| {
                std::env::var(LOG_ENV.clone())
                    .map(|log_level| format!("{}={}", env!("CARGO_CRATE_NAME").replace('-', "_"), log_level))
            })
            .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME"))),
    );

    let env_subscriber = tracing_subscriber::fmt::layer()
        .with_file(*LOG_SOURCE_FILES)
        .with_line_number(*LOG_SOURCE_FILES)
        .with_target(false)
        .with_ansi(*ENV_COLOR_LOG)
        .with_filter(tracing_subscriber::filter::EnvFilter::from_default_env());
    let registry = tracing_subscriber::registry()
        .with(env_subscriber)
        .with(ErrorLayer::default());
    if *LOG_TO_FILE {
        let directory = get_data_dir();
        std::fs::create_dir_all(directory.clone())?;
        let log_path = directory.join(LOG_FILE.clone());
        let log_file = std::fs::File::create(log_path)?;
        let file_subscriber = tracing_subscriber::fmt::layer()
            .with_file(*LOG_SOURCE_FILES)
            .with_line_number(*LOG_SOURCE_FILES)
            .with_writer(log_file)
            .with_target(false)
            .with_ansi(false)
            .with_filter(tracing_subscriber::filter::EnvFilter::from_default_env());
        registry.with(file_subscriber).init();
    } else {
        registry.init();
    }
    Ok(())
}
