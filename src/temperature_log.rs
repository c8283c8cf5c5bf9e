// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use canonical_error::{CanonicalError, failed_precondition_error};
use log::info;

use crate::temperature::TemperatureSample;

pub const HEADER: [&str; 3] =
    ["Timestamp", "Cold Junction Temp (C)", "Channel 1 Temp (C)"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Append-only CSV file of temperature readings. Existing rows are never
/// rewritten; the header is written only when the file starts out empty.
pub struct TemperatureLog {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows_written: u64,
}

impl TemperatureLog {
    pub fn open(path: &Path) -> Result<Self, CanonicalError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| failed_precondition_error(
                    format!("Cannot create {}: {}", parent.display(), e).as_str()))?;
            }
        }
        let mut file = OpenOptions::new().read(true).create(true).append(true).open(path)
            .map_err(|e| failed_precondition_error(
                format!("Cannot open {}: {}", path.display(), e).as_str()))?;
        let len = file.metadata()
            .map_err(|e| failed_precondition_error(&e.to_string()))?.len();
        let is_new = len == 0;
        if !is_new {
            terminate_last_row(&mut file).map_err(|e| failed_precondition_error(
                format!("Cannot append to {}: {}", path.display(), e).as_str()))?;
        }

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer.write_record(HEADER)
                .map_err(|e| failed_precondition_error(&e.to_string()))?;
            writer.flush().map_err(|e| failed_precondition_error(&e.to_string()))?;
            info!("Started temperature log {}", path.display());
        } else {
            info!("Appending to temperature log {}", path.display());
        }
        Ok(TemperatureLog{path: path.to_path_buf(), writer, rows_written: 0})
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one row per sample and flushes them to disk.
    pub fn append(&mut self, samples: &[TemperatureSample]) -> Result<(), CanonicalError> {
        for sample in samples {
            self.writer.write_record(&[
                sample.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                format!("{:.2}", sample.cold_junction_c),
                format!("{:.2}", sample.channel_1_c),
            ]).map_err(|e| failed_precondition_error(
                format!("Writing {}: {}", self.path.display(), e).as_str()))?;
        }
        self.writer.flush().map_err(|e| failed_precondition_error(
            format!("Flushing {}: {}", self.path.display(), e).as_str()))?;
        self.rows_written += samples.len() as u64;
        Ok(())
    }

    /// Rows appended through this handle.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

// A row cut short (or saved without a final newline) must not swallow the
// first appended row.
fn terminate_last_row(file: &mut File) -> std::io::Result<()> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};

    use super::*;

    fn sample(second: u32, cold_junction_c: f64, channel_1_c: f64) -> TemperatureSample {
        TemperatureSample{
            timestamp: Local.with_ymd_and_hms(2024, 9, 4, 10, 15, second).unwrap(),
            cold_junction_c,
            channel_1_c,
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path).unwrap().lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_header_written_once_and_rows_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temps.csv");
        {
            let mut log = TemperatureLog::open(&path).unwrap();
            log.append(&[sample(1, 24.5, 310.25), sample(2, 24.51, 311.0)]).unwrap();
            assert_eq!(log.rows_written(), 2);
        }
        {
            let mut log = TemperatureLog::open(&path).unwrap();
            log.append(&[sample(3, 24.6, 312.126)]).unwrap();
        }
        let lines = read_lines(&path);
        assert_eq!(lines, vec![
            "Timestamp,Cold Junction Temp (C),Channel 1 Temp (C)".to_string(),
            "2024-09-04 10:15:01.000000,24.50,310.25".to_string(),
            "2024-09-04 10:15:02.000000,24.51,311.00".to_string(),
            "2024-09-04 10:15:03.000000,24.60,312.13".to_string(),
        ]);
    }

    #[test]
    fn test_existing_content_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temps.csv");
        fs::write(&path, "earlier,row,here\n").unwrap();
        let mut log = TemperatureLog::open(&path).unwrap();
        log.append(&[sample(0, 20.0, 21.0)]).unwrap();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "earlier,row,here");
        assert!(lines.iter().all(|l| !l.starts_with("Timestamp")));
    }

    #[test]
    fn test_unterminated_last_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temps.csv");
        fs::write(&path, concat!("Timestamp,Cold Junction Temp (C),Channel 1 Temp (C)\n",
                                 "2024-09-04 10:15:01.000000,24.50,310.25")).unwrap();
        let mut log = TemperatureLog::open(&path).unwrap();
        log.append(&[sample(2, 1.0, 2.0)]).unwrap();
        let lines = read_lines(&path);
        assert_eq!(lines, vec![
            "Timestamp,Cold Junction Temp (C),Channel 1 Temp (C)".to_string(),
            "2024-09-04 10:15:01.000000,24.50,310.25".to_string(),
            "2024-09-04 10:15:02.000000,1.00,2.00".to_string(),
        ]);
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("temps.csv");
        let log = TemperatureLog::open(&path).unwrap();
        assert_eq!(log.path(), path.as_path());
        assert_eq!(read_lines(&path).len(), 1);
    }
}
