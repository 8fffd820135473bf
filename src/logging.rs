//! File-based logging, rotated daily under `~/.max-gateway/logs/`.

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    file: File,
}

impl Logger {
    fn new() -> Option<Self> {
        let log_dir = log_dir()?;
        fs::create_dir_all(&log_dir).ok()?;

        let date = Local::now().format("%Y-%m-%d");
        let path = log_dir.join(format!("gateway-{}.log", date));

        let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;

        Some(Self { file })
    }

    fn write(&mut self, level: &str, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!("[{}] [{}] {}\n", timestamp, level, message);
        let _ = self.file.write_all(line.as_bytes());
        let _ = self.file.flush();
    }
}

fn log_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("GATEWAY_HOME") {
        return Some(PathBuf::from(path).join("logs"));
    }
    Some(dirs::home_dir()?.join(".max-gateway").join("logs"))
}

/// Initialize the logger (call once at startup).
pub fn init() {
    let mut guard = LOGGER.lock().unwrap();
    if guard.is_none() {
        *guard = Logger::new();
    }
}

pub fn info(message: &str) {
    if let Ok(mut guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_mut() {
            logger.write("INFO", message);
        }
    }
}

pub fn warn(message: &str) {
    if let Ok(mut guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_mut() {
            logger.write("WARN", message);
        }
    }
}

pub fn error(message: &str) {
    if let Ok(mut guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_mut() {
            logger.write("ERROR", message);
        }
    }
}

/// Only emitted when `GATEWAY_TRACE` is set, to keep routine operation quiet.
pub fn debug(message: &str) {
    if std::env::var("GATEWAY_TRACE").is_ok() {
        if let Ok(mut guard) = LOGGER.lock() {
            if let Some(logger) = guard.as_mut() {
                logger.write("DEBUG", message);
            }
        }
    }
}

pub fn crash(error: &str, context: &str) {
    let msg = format!("CRASH: {} | Context: {}", error, context);
    if let Ok(mut guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_mut() {
            logger.write("CRASH", &msg);
        }
    }
}

pub fn log_path() -> Option<PathBuf> {
    let date = Local::now().format("%Y-%m-%d");
    Some(log_dir()?.join(format!("gateway-{}.log", date)))
}

/// Keep the last 7 days of logs.
pub fn cleanup_old_logs() {
    if let Some(dir) = log_dir() {
        if let Ok(entries) = fs::read_dir(&dir) {
            let cutoff = Local::now() - chrono::Duration::days(7);
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    if let Ok(modified) = metadata.modified() {
                        let modified: chrono::DateTime<Local> = modified.into();
                        if modified < cutoff {
                            let _ = fs::remove_file(entry.path());
                        }
                    }
                }
            }
        }
    }
}
