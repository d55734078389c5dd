use std::{error::Error, fs::OpenOptions, path::PathBuf, sync::Mutex};

use tracing_subscriber::EnvFilter;

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
    /// The admin console owns the terminal, so it logs nowhere unless given a file.
    Off,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(target: LogTarget) -> Result<(), Box<dyn Error>> {
    match target {
        LogTarget::Off => {}
        LogTarget::Stderr => tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| err as Box<dyn Error>)?,
        LogTarget::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|err| err as Box<dyn Error>)?
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_installs_nothing() {
        init(LogTarget::Off).unwrap();
    }

    #[test]
    fn file_target_appends_log_lines() {
        let path = std::env::temp_dir().join(format!("todoinfo-log-{}.log", std::process::id()));
        init(LogTarget::File(path.clone())).unwrap();
        tracing::error!("written to the log file");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("written to the log file"));
        std::fs::remove_file(path).ok();
    }
}
