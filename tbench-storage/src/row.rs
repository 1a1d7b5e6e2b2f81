use std::io;

use chrono::{DateTime, SecondsFormat, Utc};
use csv::StringRecord;

use crate::error::{Error, Result};
use crate::run::RunRecord;

pub const DELIMITER: u8 = b';';

/// Column order of both sinks. Append new columns at the end only.
pub const COLUMNS: [&str; 32] = [
    "id",
    "protocol",
    "environment",
    "time_slot",
    "test_begin",
    "test_end",
    "client_id",
    "parallel_clients",
    "transfer_start_unix",
    "transfer_end_unix",
    "latency_ms",
    "throughput_mbps",
    "bytes_sent_total",
    "bytes_payload",
    "bandwidth_efficiency",
    "cpu_client_before",
    "cpu_client_after",
    "cpu_client_while",
    "cpu_server_before",
    "cpu_server_after",
    "cpu_server_while",
    "ram_client_before",
    "ram_client_after",
    "ram_client_while",
    "ram_server_before",
    "ram_server_after",
    "ram_server_while",
    "lost_packets",
    "retransmissions",
    "connection_duration",
    "stream_duration",
    "error",
];

/// Buffers newline-terminated records in memory so a sink can write them
/// with a single call.
pub struct RowWriter {
    inner: csv::Writer<Vec<u8>>,
}

impl RowWriter {
    pub fn new() -> Self {
        Self {
            inner: csv::WriterBuilder::new()
                .delimiter(DELIMITER)
                .has_headers(false)
                .from_writer(Vec::new()),
        }
    }

    pub fn header(&mut self) -> Result<()> {
        Ok(self.inner.write_record(COLUMNS)?)
    }

    pub fn record(&mut self, record: &RunRecord) -> Result<()> {
        Ok(self.inner.write_record(encode_fields(record))?)
    }

    pub fn raw(&mut self, row: &StringRecord) -> Result<()> {
        Ok(self.inner.write_record(row)?)
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        self.inner
            .into_inner()
            .map_err(|err| Error::Io(io::Error::other(err.to_string())))
    }
}

impl Default for RowWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn encode_fields(record: &RunRecord) -> [String; 32] {
    let m = &record.metrics;
    [
        record.id.to_string(),
        record.protocol.to_string(),
        record.environment.to_string(),
        record.time_slot.to_string(),
        format_timestamp(&record.test_begin),
        record.test_end.as_ref().map(format_timestamp).unwrap_or_default(),
        record.client_id.to_string(),
        record.parallel_clients.to_string(),
        m.transfer_start_unix.to_string(),
        m.transfer_end_unix.to_string(),
        record.latency_ms().to_string(),
        m.throughput_mbps.to_string(),
        m.bytes_sent_total.to_string(),
        m.bytes_payload.to_string(),
        record.bandwidth_efficiency().to_string(),
        m.cpu_client_percent_before.to_string(),
        m.cpu_client_percent_after.to_string(),
        m.cpu_client_percent_while.to_string(),
        m.cpu_server_percent_before.to_string(),
        m.cpu_server_percent_after.to_string(),
        m.cpu_server_percent_while.to_string(),
        m.ram_client_bytes_before.to_string(),
        m.ram_client_bytes_after.to_string(),
        m.ram_client_bytes_while.to_string(),
        m.ram_server_bytes_before.to_string(),
        m.ram_server_bytes_after.to_string(),
        m.ram_server_bytes_while.to_string(),
        m.lost_packets.to_string(),
        m.retransmissions.to_string(),
        m.connection_duration.to_string(),
        m.stream_duration.to_string(),
        m.error.clone(),
    ]
}

pub fn header_row() -> Result<Vec<u8>> {
    let mut writer = RowWriter::new();
    writer.header()?;
    writer.into_bytes()
}

/// Encodes a finalized run as one record. Free text is quoted, not altered.
pub fn encode_row(record: &RunRecord) -> Result<Vec<u8>> {
    let mut writer = RowWriter::new();
    writer.record(record)?;
    writer.into_bytes()
}

fn is_header(row: &StringRecord) -> bool {
    row.iter().eq(COLUMNS)
}

/// Data rows of a persisted table in file order.
///
/// Header rows are dropped. Rows with the wrong column count or bytes that do
/// not decode are handed to `on_skip` with their line number and left out.
pub fn read_rows(raw: &[u8], mut on_skip: impl FnMut(u64, String)) -> Vec<StringRecord> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_reader(raw);

    let mut rows = Vec::new();
    for result in reader.records() {
        match result {
            Ok(row) if is_header(&row) => {}
            Ok(row) if row.len() == COLUMNS.len() => rows.push(row),
            Ok(row) => on_skip(
                row.position().map(|p| p.line()).unwrap_or_default(),
                format!("{} columns, expected {}", row.len(), COLUMNS.len()),
            ),
            Err(err) => on_skip(
                err.position().map(|p| p.line()).unwrap_or_default(),
                err.to_string(),
            ),
        }
    }
    rows
}

/// Length of the longest prefix of `raw` that ends on a record boundary.
///
/// Quotes only ever wrap whole fields and embedded quotes are doubled, so a
/// newline outside quotes is a record terminator.
pub fn complete_prefix_len(raw: &[u8]) -> usize {
    let mut in_quotes = false;
    let mut complete = 0;
    for (index, byte) in raw.iter().enumerate() {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => complete = index + 1,
            _ => {}
        }
    }
    complete
}

/// Looks up a cell by column name.
pub fn cell<'a>(row: &'a StringRecord, column: &str) -> Option<&'a str> {
    COLUMNS
        .iter()
        .position(|c| *c == column)
        .and_then(|index| row.get(index))
}
