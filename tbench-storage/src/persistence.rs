use std::fmt;
use std::io;
use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::row::{RowWriter, read_rows};
use crate::run::RunRecord;
use crate::sink::{CsvFileSink, Sink};

/// Which sink an export reads from, or a finalized run landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Primary,
    Emergency,
}

impl SinkKind {
    /// File name offered to clients downloading an export.
    pub fn attachment_name(self) -> &'static str {
        match self {
            SinkKind::Primary => "results.csv",
            SinkKind::Emergency => "emergency.csv",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Primary => write!(f, "primary"),
            SinkKind::Emergency => write!(f, "emergency"),
        }
    }
}

/// Primary sink with an emergency fallback sharing the same row schema.
pub struct Persistence {
    primary: Box<dyn Sink>,
    emergency: Box<dyn Sink>,
}

impl Persistence {
    pub fn new(primary: impl Sink + 'static, emergency: impl Sink + 'static) -> Self {
        Self {
            primary: Box::new(primary),
            emergency: Box::new(emergency),
        }
    }

    pub fn csv_files(dir: &Path, results_file: &str, emergency_file: &str) -> Self {
        Self::new(
            CsvFileSink::new(SinkKind::Primary.to_string(), dir.join(results_file)),
            CsvFileSink::new(SinkKind::Emergency.to_string(), dir.join(emergency_file)),
        )
    }

    fn sink(&self, kind: SinkKind) -> &dyn Sink {
        match kind {
            SinkKind::Primary => self.primary.as_ref(),
            SinkKind::Emergency => self.emergency.as_ref(),
        }
    }

    /// Writes the record to exactly one sink and reports which.
    pub fn persist(&self, record: &RunRecord) -> Result<SinkKind> {
        let primary_err = match self.primary.append(record) {
            Ok(()) => return Ok(SinkKind::Primary),
            Err(err) => err,
        };
        warn!(
            "Run {}: {}; falling back to emergency sink",
            record.id, primary_err
        );

        match self.emergency.append(record) {
            Ok(()) => Ok(SinkKind::Emergency),
            Err(emergency_err) => Err(Error::Persistence {
                id: record.id,
                primary: Box::new(primary_err),
                emergency: Box::new(emergency_err),
            }),
        }
    }

    /// Header plus every well-formed row of one sink, oldest first.
    pub fn export(&self, kind: SinkKind) -> Result<String> {
        let raw = self.sink(kind).read_raw()?;
        build_table(kind, &raw)
    }
}

fn build_table(kind: SinkKind, raw: &[u8]) -> Result<String> {
    let rows = read_rows(raw, |line, reason| {
        warn!("Skipping malformed row at line {} in {} sink: {}", line, kind, reason);
    });

    let mut writer = RowWriter::new();
    writer.header()?;
    for row in &rows {
        writer.raw(row)?;
    }
    String::from_utf8(writer.into_bytes()?)
        .map_err(|err| Error::Io(io::Error::new(io::ErrorKind::InvalidData, err)))
}
