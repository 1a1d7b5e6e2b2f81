use serde::Serialize;
use serde_json::{Map, Value};
use tbench_storage::{FieldKind, MetricField};

use crate::error::{ClientError, Result};

/// Fields of one partial or final report, keyed by their wire names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricsReport {
    fields: Map<String, Value>,
}

macro_rules! typed_setters {
    ( $( $method:ident ( $ty:ty ) => $field:ident; )* ) => {
        impl MetricsReport {
            $(
                pub fn $method(self, value: $ty) -> Self {
                    self.with(MetricField::$field, value)
                }
            )*
        }
    };
}

impl MetricsReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: MetricField, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: MetricField, value: impl Into<Value>) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    /// Parses a `Name=value` pair as typed on a command line.
    ///
    /// The name may be the wire name or the column name. Numeric fields get a
    /// JSON number so the collector never sees a quoted number it would have to
    /// coerce.
    pub fn insert_pair(&mut self, pair: &str) -> Result<MetricField> {
        let (key, raw) = pair.split_once('=').ok_or_else(|| ClientError::InvalidField {
            field: pair.to_string(),
            reason: "expected Name=value".to_string(),
        })?;
        let key = key.trim();
        let field = MetricField::resolve(key).map_err(|reason| ClientError::InvalidField {
            field: key.to_string(),
            reason: reason.to_string(),
        })?;

        let value = match field.kind() {
            FieldKind::Int => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            FieldKind::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Value::from)
                .unwrap_or_else(|| Value::String(raw.to_string())),
            FieldKind::Text => Value::String(raw.to_string()),
        };
        // Same rules the collector applies, so typos fail before the request.
        field
            .coerce(&value)
            .map_err(|reason| ClientError::InvalidField {
                field: key.to_string(),
                reason: reason.to_string(),
            })?;

        self.insert(field, value);
        Ok(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }
}

typed_setters! {
    transfer_start_unix(i64) => TransferStartUnix;
    transfer_end_unix(i64) => TransferEndUnix;
    throughput_mbps(f64) => ThroughputMbps;
    bytes_sent_total(i64) => BytesSentTotal;
    bytes_payload(i64) => BytesPayload;
    cpu_client_before(f64) => CpuClientPercentBefore;
    cpu_client_after(f64) => CpuClientPercentAfter;
    cpu_client_while(f64) => CpuClientPercentWhile;
    cpu_server_before(f64) => CpuServerPercentBefore;
    cpu_server_after(f64) => CpuServerPercentAfter;
    cpu_server_while(f64) => CpuServerPercentWhile;
    ram_client_before(i64) => RamClientBytesBefore;
    ram_client_after(i64) => RamClientBytesAfter;
    ram_client_while(i64) => RamClientBytesWhile;
    ram_server_before(i64) => RamServerBytesBefore;
    ram_server_after(i64) => RamServerBytesAfter;
    ram_server_while(i64) => RamServerBytesWhile;
    lost_packets(i64) => LostPackets;
    retransmissions(i64) => Retransmissions;
    connection_duration(i64) => ConnectionDuration;
    stream_duration(i64) => StreamDuration;
}

impl MetricsReport {
    pub fn error(self, message: impl Into<String>) -> Self {
        self.with(MetricField::Error, message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_uses_wire_names() {
        let report = MetricsReport::new()
            .transfer_start_unix(100)
            .transfer_end_unix(160)
            .throughput_mbps(12.5)
            .cpu_client_while(41.0)
            .error("timeout");

        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "TransferStartUnix": 100,
                "TransferEndUnix": 160,
                "ThroughputMbps": 12.5,
                "CpuClientPercentWhile": 41.0,
                "Error": "timeout",
            })
        );
    }

    #[test]
    fn later_values_overwrite_earlier_ones() {
        let report = MetricsReport::new().lost_packets(1).lost_packets(7);
        assert_eq!(report.len(), 1);
        assert_eq!(report.as_map()["LostPackets"], json!(7));
    }

    #[test]
    fn pairs_accept_column_names_and_type_numbers() {
        let mut report = MetricsReport::new();
        assert_eq!(
            report.insert_pair("bytes_payload=1000").unwrap(),
            MetricField::BytesPayload
        );
        report.insert_pair("ThroughputMbps=93.75").unwrap();
        report.insert_pair("error=dial failed=refused").unwrap();

        let map = report.into_map();
        assert_eq!(map["BytesPayload"], json!(1000));
        assert_eq!(map["ThroughputMbps"], json!(93.75));
        assert_eq!(map["Error"], json!("dial failed=refused"));
    }

    #[test]
    fn pairs_reject_bad_input_before_sending() {
        let mut report = MetricsReport::new();
        assert!(matches!(
            report.insert_pair("LostPackets"),
            Err(ClientError::InvalidField { .. })
        ));
        assert!(matches!(
            report.insert_pair("Bogus=1"),
            Err(ClientError::InvalidField { ref field, .. }) if field == "Bogus"
        ));
        assert!(report.insert_pair("latency_ms=5").is_err());
        assert!(report.insert_pair("LostPackets=1.5").is_err());
        assert!(report.insert_pair("ThroughputMbps=fast").is_err());
        assert!(report.is_empty());
    }
}
