use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::row::{RowWriter, complete_prefix_len};
use crate::run::RunRecord;

/// Append-only destination for finalized runs.
pub trait Sink: Send + Sync {
    /// Appends one row. Either the whole row lands or nothing does.
    fn append(&self, record: &RunRecord) -> Result<()>;

    /// Raw persisted bytes, empty if nothing was ever written.
    fn read_raw(&self) -> Result<Vec<u8>>;
}

#[derive(Default)]
struct WriterState {
    // Cleared whenever the end of the file may hold a partial row.
    tail_verified: bool,
}

/// Delimited text file with a header row written on first append.
pub struct CsvFileSink {
    name: String,
    path: PathBuf,
    // Single writer: keeps the tail check, header-once check and append together.
    state: Mutex<WriterState>,
}

impl CsvFileSink {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sink_error(&self, source: io::Error) -> Error {
        Error::Sink {
            sink: self.name.clone(),
            source,
        }
    }

    /// Cuts off a row left incomplete by an earlier crash so the next row
    /// starts on its own line.
    fn repair_tail(&self, file: &mut File) -> io::Result<()> {
        let mut content = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut content)?;

        let complete = complete_prefix_len(&content);
        if complete < content.len() {
            warn!(
                "Dropping incomplete row at the end of {}: {:?}",
                self.path.display(),
                String::from_utf8_lossy(&content[complete..])
            );
            file.set_len(complete as u64)?;
        }
        Ok(())
    }

    fn write_row(&self, state: &mut WriterState, record: &RunRecord) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| self.sink_error(err))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| self.sink_error(err))?;
        if !state.tail_verified {
            self.repair_tail(&mut file).map_err(|err| self.sink_error(err))?;
            state.tail_verified = true;
        }
        let previous_len = file.metadata().map_err(|err| self.sink_error(err))?.len();

        let mut writer = RowWriter::new();
        if previous_len == 0 {
            info!("Creating new CSV file {}", self.path.display());
            writer.header()?;
        }
        writer.record(record)?;
        let payload = writer.into_bytes()?;

        if let Err(err) = file.write_all(&payload).and_then(|_| file.sync_data()) {
            // Drop whatever part of the row made it to disk.
            if let Err(truncate_err) = file.set_len(previous_len) {
                state.tail_verified = false;
                warn!(
                    "Failed to roll back partial row in {}: {}",
                    self.path.display(),
                    truncate_err
                );
            }
            return Err(self.sink_error(err));
        }
        Ok(())
    }
}

impl Sink for CsvFileSink {
    fn append(&self, record: &RunRecord) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        self.write_row(&mut state, record)
    }

    fn read_raw(&self) -> Result<Vec<u8>> {
        let _guard = self.state.lock().unwrap_or_else(|err| err.into_inner());
        match fs::read(&self.path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(self.sink_error(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{cell, header_row, read_rows};
    use crate::run::{BeginRun, Environment, Protocol, RunId, TimeSlot};
    use chrono::Utc;

    fn record() -> RunRecord {
        let begin = BeginRun {
            protocol: Protocol::WebTransport,
            environment: Environment::Local,
            time_slot: TimeSlot::Afternoon,
            client_id: 1,
            parallel_clients: 1,
        };
        RunRecord::new(RunId::new_random(), &begin, Utc::now())
    }

    fn ids(sink: &CsvFileSink) -> Vec<String> {
        read_rows(&sink.read_raw().unwrap(), |line, reason| {
            panic!("line {line} skipped: {reason}")
        })
        .iter()
        .map(|row| cell(row, "id").unwrap().to_string())
        .collect()
    }

    #[test]
    fn writes_header_once_then_rows() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvFileSink::new("primary", dir.path().join("results.csv"));

        sink.append(&record()).unwrap();
        sink.append(&record()).unwrap();

        let content = String::from_utf8(sink.read_raw().unwrap()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(format!("{}\n", lines[0]).as_bytes(), header_row().unwrap());
        assert_eq!(content.matches("id;protocol").count(), 1);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvFileSink::new("primary", dir.path().join("nested/out/results.csv"));
        sink.append(&record()).unwrap();
        assert!(sink.path().exists());
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvFileSink::new("emergency", dir.path().join("emergency.csv"));
        assert!(sink.read_raw().unwrap().is_empty());
    }

    #[test]
    fn unwritable_path_reports_sink_name() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let sink = CsvFileSink::new("primary", dir.path());
        let err = sink.append(&record()).unwrap_err();
        assert!(matches!(err, Error::Sink { ref sink, .. } if sink == "primary"));
    }

    #[test]
    fn unterminated_row_from_a_crash_is_cut_before_appending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let mut torn = header_row().unwrap();
        torn.extend(b"deadbeef;http3;lo");
        fs::write(&path, &torn).unwrap();

        let sink = CsvFileSink::new("primary", &path);
        let run = record();
        sink.append(&run).unwrap();

        assert_eq!(ids(&sink), vec![run.id.to_string()]);
        let content = String::from_utf8(fs::read(&path).unwrap()).unwrap();
        assert!(!content.contains("deadbeef"));
    }

    #[test]
    fn unclosed_quote_from_a_crash_does_not_swallow_later_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let mut torn = header_row().unwrap();
        torn.extend(b"deadbeef;http3;local;morning;;;0;1;0;0;0;0;0;0;0;0;0;0;0;0;0;0;0;0;0;0;0;0;0;0;0;\"dial failed\n");
        fs::write(&path, &torn).unwrap();

        let sink = CsvFileSink::new("primary", &path);
        let first = record();
        let second = record();
        sink.append(&first).unwrap();
        sink.append(&second).unwrap();

        assert_eq!(ids(&sink), vec![first.id.to_string(), second.id.to_string()]);
    }

    #[test]
    fn torn_header_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        fs::write(&path, b"id;protocol;envir").unwrap();

        let sink = CsvFileSink::new("primary", &path);
        let run = record();
        sink.append(&run).unwrap();

        let content = fs::read(&path).unwrap();
        assert!(content.starts_with(&header_row().unwrap()));
        assert_eq!(ids(&sink), vec![run.id.to_string()]);
    }
}
