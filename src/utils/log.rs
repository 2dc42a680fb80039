use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing_subscriber::EnvFilter;

use crate::error::Result;

/// Installs the console subscriber. `RUST_LOG` takes precedence over
/// `verbose`. Safe to call more than once.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Logs a message to a file with timestamp
///
/// # Arguments
///
/// * `log_dir` - Directory holding the log file, created if missing
/// * `filename` - The name of the log file
/// * `message` - The message to log
pub fn log_to_file<P: AsRef<Path>>(log_dir: P, filename: &str, message: &str) -> io::Result<()> {
    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir)?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(filename))?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

    writeln!(file, "\n--- Log entry at {} ---", timestamp)?;
    writeln!(file, "{}", message)?;
    writeln!(file, "--- End of entry ---\n")?;

    file.flush()?;

    Ok(())
}

/// Logs a message to a file with a detailed formatted header
pub fn log_with_header<P: AsRef<Path>>(
    log_dir: P,
    filename: &str,
    header: &str,
    message: &str,
) -> io::Result<()> {
    let formatted_message = format!(
        "===== {} =====\n{}\n====================",
        header, message
    );
    log_to_file(log_dir, filename, &formatted_message)
}

/// Appends a row to a CSV file, writing the headers only when the file is new
pub fn log_csv<P: AsRef<Path>>(path: P, headers: &[&str], row: &[String]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_exists = path.exists();

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::Writer::from_writer(file);

    if !file_exists && !headers.is_empty() {
        writer.write_record(headers)?;
    }
    writer.write_record(row)?;
    writer.flush()?;

    Ok(())
}

/// Writes columns side by side, padding short columns with
/// empty cells. Overwrites `path`.
pub fn write_columns<P: AsRef<Path>>(path: P, headers: &[&str], columns: &[&[f64]]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    if !headers.is_empty() {
        writer.write_record(headers)?;
    }

    let rows = columns.iter().map(|c| c.len()).max().unwrap_or(0);
    for i in 0..rows {
        let record: Vec<String> = columns
            .iter()
            .map(|column| column.get(i).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;

    Ok(())
}
