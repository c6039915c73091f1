use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};
use simple_logger::SimpleLogger;

use crate::config::Config;

/// Mirrors every record also written to stdout by [`SimpleLogger`] into an
/// append-only file, when `config.log.file` names one. `simple_logger`
/// itself only ever writes to stdout/stderr, so a file sink has to be
/// layered on as a second `Log` implementation rather than configured
/// through it.
struct TeeLogger {
    stdout: SimpleLogger,
    file: Option<Mutex<std::fs::File>>,
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.stdout.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.stdout.log(record);
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
            let _ = writeln!(
                file,
                "{} {:<5} [{}] {}",
                unix_timestamp(),
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().unwrap_or_else(|e| e.into_inner()).flush();
        }
    }
}

/// Seconds since the epoch; avoids pulling in a dedicated time-formatting
/// dependency just for this secondary sink.
fn unix_timestamp() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", now.as_secs())
}

/// Initialise the global logger at `config.log.level`, additionally
/// appending to `config.log.file` when one is set.
pub fn init(config: &Config) -> anyhow::Result<()> {
    let level = config.log.level.as_level();
    let stdout = SimpleLogger::new().with_level(level.to_level_filter());

    let file = match &config.log.file {
        Some(path) => {
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("failed to open log file '{}': {}", path, e))?;
            Some(Mutex::new(handle))
        }
        None => None,
    };

    let logger = TeeLogger { stdout, file };
    log::set_max_level(LevelFilter::from(level));
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| anyhow::anyhow!("failed to install logger: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tee_logger_writes_to_file_when_configured() {
        let path = std::env::temp_dir().join(format!("dataplicity-log-test-{}", std::process::id()));

        let stdout = SimpleLogger::new().with_level(Level::Info.to_level_filter());
        let handle = OpenOptions::new().create(true).append(true).open(&path).unwrap();
        let logger = TeeLogger { stdout, file: Some(Mutex::new(handle)) };

        logger.log(
            &Record::builder()
                .args(format_args!("hello"))
                .level(Level::Info)
                .target("test")
                .build(),
        );
        logger.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hello"));
        let _ = std::fs::remove_file(&path);
    }
}
