use anyhow::Context;
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use common::{marker, retention, Config, MarkerValue, MARKER_NAME};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file. Defaults to ~/dashcam.json
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List marked recordings, oldest first
    List,
    /// Show the marker on a file
    Show {
        file: PathBuf,
    },
    /// Mark a file as a recording
    Mark {
        file: PathBuf,
        /// standard or emergency
        #[arg(long, default_value = "standard")]
        value: MarkerValue,
    },
    /// Remove the marker from a file
    Unmark {
        file: PathBuf,
    },
    /// Delete the oldest marked recordings beyond the limit
    Cleanup {
        /// Override max_files from the config
        #[arg(long)]
        max_files: Option<usize>,
    },
    /// Print the effective configuration
    Config {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(common::config::default_config_path);
    let config = Config::load_or_default(&config_path);

    match cli.command {
        Commands::List => list(&config.recordings_dir)?,
        Commands::Show { file } => match marker::get_marker(&file, MARKER_NAME)? {
            Some(value) if !value.is_empty() => println!("{}: {}", file.display(), value),
            _ => println!("{}: not marked", file.display()),
        },
        Commands::Mark { file, value } => {
            marker::set_marker(&file, MARKER_NAME, value.as_str())?;
            println!("Marked {} as {}", file.display(), value);
        }
        Commands::Unmark { file } => {
            marker::remove_marker(&file, MARKER_NAME)?;
            println!("Unmarked {}", file.display());
        }
        Commands::Cleanup { max_files } => {
            let limit = max_files.unwrap_or(config.max_files);
            let report = retention::enforce_max_files(&config.recordings_dir, MARKER_NAME, limit)?;
            println!(
                "{} marked recordings, limit {}: removed {}, failed {}",
                report.marked,
                limit,
                report.removed.len(),
                report.failed.len()
            );
            for path in &report.removed {
                println!("  removed {}", path.display());
            }
            for (path, err) in &report.failed {
                eprintln!("  failed  {}: {}", path.display(), err);
            }
        }
        Commands::Config { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Config file:          {}", config_path.display());
                println!("Recordings directory: {}", config.recordings_dir.display());
                println!("Max files:            {}", config.max_files);
                println!("Recording length:     {}s", config.recording_length_seconds);
                println!("Extension:            {}", config.extension);
                println!("Codec:                {}", config.codec);
                println!("Record audio:         {}", config.record_audio);
                println!(
                    "Capture program:      {} {:?}",
                    config.capture_program, config.capture_args
                );
            }
        }
    }

    Ok(())
}

struct Row {
    path: PathBuf,
    value: String,
    size: u64,
    modified: Option<DateTime<Local>>,
}

fn collect_rows(dir: &Path) -> anyhow::Result<Vec<Row>> {
    let mut rows = Vec::new();
    for path in marker::list_marked_files(dir, MARKER_NAME)? {
        let meta = fs::metadata(&path).with_context(|| format!("Failed to stat {:?}", path))?;
        let value = marker::get_marker(&path, MARKER_NAME)?.unwrap_or_default();
        rows.push(Row {
            path,
            value,
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Local>::from),
        });
    }
    rows.sort_by_key(|row| (row.modified.is_none(), row.modified));
    Ok(rows)
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn list(dir: &Path) -> anyhow::Result<()> {
    let rows = collect_rows(dir)?;
    if rows.is_empty() {
        println!("No marked recordings in {}", dir.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["File", "Marker", "Size", "Modified"]);
    for row in &rows {
        let name = row
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let modified = row
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        table.add_row(vec![name, row.value.clone(), human_size(row.size), modified]);
    }
    println!("{table}");
    println!("{} marked recordings", rows.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KiB");
        assert_eq!(human_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MiB");
    }

    #[test]
    fn test_rows_sorted_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        if let Err(e) = marker::probe_support(dir.path()) {
            eprintln!("skipping: {}", e);
            return;
        }

        for (name, age) in [("new.mkv", 10u64), ("old.mkv", 500), ("mid.mkv", 100)] {
            let path = dir.path().join(name);
            fs::write(&path, b"x").unwrap();
            File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(SystemTime::now() - Duration::from_secs(age))
                .unwrap();
            marker::set_marker(&path, MARKER_NAME, MarkerValue::Standard.as_str()).unwrap();
        }
        fs::write(dir.path().join("foreign.mkv"), b"x").unwrap();

        let names: Vec<String> = collect_rows(dir.path())
            .unwrap()
            .iter()
            .map(|row| row.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["old.mkv", "mid.mkv", "new.mkv"]);
    }

    #[test]
    fn test_cli_parses_mark_value() {
        let cli =
            Cli::try_parse_from(["dashcam", "mark", "a.mkv", "--value", "emergency"]).unwrap();
        match cli.command {
            Commands::Mark { value, .. } => assert_eq!(value, MarkerValue::Emergency),
            _ => panic!("expected mark command"),
        }
        assert!(Cli::try_parse_from(["dashcam", "mark", "a.mkv", "--value", "bogus"]).is_err());
    }
}
