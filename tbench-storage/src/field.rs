use serde_json::{Map, Value};

use crate::run::RunMetrics;

/// Declared type of a reportable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    Text,
}

/// Why a single key of a partial update was not applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("unknown field")]
    UnknownField,
    #[error("derived field, computed when the run is finalized")]
    DerivedField,
    #[error("identity field, fixed when the run begins")]
    IdentityField,
    #[error("unsupported value type {0}")]
    UnsupportedType(&'static str),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    /// Key exactly as the agent sent it.
    pub field: String,
    pub reason: Rejection,
}

macro_rules! metric_fields {
    (@ty Int) => { i64 };
    (@ty Float) => { f64 };
    (@ty Text) => { String };
    (@coerce Int, $value:expr) => { coerce_int($value) };
    (@coerce Float, $value:expr) => { coerce_float($value) };
    (@coerce Text, $value:expr) => { coerce_text($value) };

    ( $( $variant:ident ( $kind:ident ) => $column:literal, $metric:ident; )* ) => {
        /// A field agents may report for an active run.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MetricField {
            $( $variant, )*
        }

        /// One coerced field update, ready to merge into [`RunMetrics`].
        #[derive(Debug, Clone, PartialEq)]
        pub enum FieldUpdate {
            $( $variant(metric_fields!(@ty $kind)), )*
        }

        impl MetricField {
            pub const ALL: &'static [MetricField] = &[ $( MetricField::$variant, )* ];

            /// Name agents use on the wire, e.g. `TransferStartUnix`.
            pub fn name(self) -> &'static str {
                match self {
                    $( MetricField::$variant => stringify!($variant), )*
                }
            }

            /// Column the value is persisted under.
            pub fn column(self) -> &'static str {
                match self {
                    $( MetricField::$variant => $column, )*
                }
            }

            pub fn kind(self) -> FieldKind {
                match self {
                    $( MetricField::$variant => FieldKind::$kind, )*
                }
            }

            pub fn coerce(self, value: &Value) -> Result<FieldUpdate, Rejection> {
                Ok(match self {
                    $( MetricField::$variant => FieldUpdate::$variant(metric_fields!(@coerce $kind, value)?), )*
                })
            }
        }

        impl FieldUpdate {
            pub fn field(&self) -> MetricField {
                match self {
                    $( FieldUpdate::$variant(_) => MetricField::$variant, )*
                }
            }

            pub fn apply(self, metrics: &mut RunMetrics) {
                match self {
                    $( FieldUpdate::$variant(value) => metrics.$metric = value, )*
                }
            }
        }
    };
}

metric_fields! {
    TransferStartUnix(Int) => "transfer_start_unix", transfer_start_unix;
    TransferEndUnix(Int) => "transfer_end_unix", transfer_end_unix;
    ThroughputMbps(Float) => "throughput_mbps", throughput_mbps;
    BytesSentTotal(Int) => "bytes_sent_total", bytes_sent_total;
    BytesPayload(Int) => "bytes_payload", bytes_payload;
    CpuClientPercentBefore(Float) => "cpu_client_before", cpu_client_percent_before;
    CpuClientPercentAfter(Float) => "cpu_client_after", cpu_client_percent_after;
    CpuClientPercentWhile(Float) => "cpu_client_while", cpu_client_percent_while;
    CpuServerPercentBefore(Float) => "cpu_server_before", cpu_server_percent_before;
    CpuServerPercentAfter(Float) => "cpu_server_after", cpu_server_percent_after;
    CpuServerPercentWhile(Float) => "cpu_server_while", cpu_server_percent_while;
    RamClientBytesBefore(Int) => "ram_client_before", ram_client_bytes_before;
    RamClientBytesAfter(Int) => "ram_client_after", ram_client_bytes_after;
    RamClientBytesWhile(Int) => "ram_client_while", ram_client_bytes_while;
    RamServerBytesBefore(Int) => "ram_server_before", ram_server_bytes_before;
    RamServerBytesAfter(Int) => "ram_server_after", ram_server_bytes_after;
    RamServerBytesWhile(Int) => "ram_server_while", ram_server_bytes_while;
    LostPackets(Int) => "lost_packets", lost_packets;
    Retransmissions(Int) => "retransmissions", retransmissions;
    ConnectionDuration(Int) => "connection_duration", connection_duration;
    StreamDuration(Int) => "stream_duration", stream_duration;
    Error(Text) => "error", error;
}

const DERIVED_COLUMNS: &[&str] = &["latency_ms", "bandwidth_efficiency"];

const IDENTITY_COLUMNS: &[&str] = &[
    "id",
    "protocol",
    "environment",
    "enviroment",
    "time_slot",
    "test_begin",
    "test_end",
    "client_id",
    "parallel_clients",
];

// `TransferStartUnix`, `transfer_start_unix` and `transferstartunix` compare equal.
fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl MetricField {
    pub fn resolve(key: &str) -> Result<MetricField, Rejection> {
        let wanted = normalize(key);
        if let Some(field) = Self::ALL
            .iter()
            .copied()
            .find(|f| normalize(f.name()) == wanted || normalize(f.column()) == wanted)
        {
            return Ok(field);
        }
        if DERIVED_COLUMNS.iter().any(|c| normalize(c) == wanted) {
            return Err(Rejection::DerivedField);
        }
        if IDENTITY_COLUMNS.iter().any(|c| normalize(c) == wanted) {
            return Err(Rejection::IdentityField);
        }
        Err(Rejection::UnknownField)
    }
}

/// Resolves and coerces every key independently. A bad key never prevents
/// its siblings from being applied; updates keep the order the keys arrived in.
pub fn parse_updates(fields: &Map<String, Value>) -> (Vec<FieldUpdate>, Vec<FieldError>) {
    let mut updates = Vec::with_capacity(fields.len());
    let mut rejected = Vec::new();
    for (key, value) in fields {
        match MetricField::resolve(key).and_then(|field| field.coerce(value)) {
            Ok(update) => updates.push(update),
            Err(reason) => rejected.push(FieldError {
                field: key.clone(),
                reason,
            }),
        }
    }
    (updates, rejected)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn integral(value: f64) -> Result<i64, Rejection> {
    // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound.
    if value.is_finite()
        && value.fract() == 0.0
        && value >= i64::MIN as f64
        && value < i64::MAX as f64
    {
        Ok(value as i64)
    } else {
        Err(Rejection::InvalidValue(format!("{} is not an integer", value)))
    }
}

fn coerce_int(value: &Value) -> Result<i64, Rejection> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                return Ok(v);
            }
            if n.is_u64() {
                return Err(Rejection::InvalidValue(format!("{} is out of range", n)));
            }
            match n.as_f64() {
                Some(f) => integral(f),
                None => Err(Rejection::InvalidValue(n.to_string())),
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<i64>() {
                return Ok(v);
            }
            match s.parse::<f64>() {
                Ok(f) => integral(f),
                Err(_) => Err(Rejection::InvalidValue(format!("'{}' is not an integer", s))),
            }
        }
        other => Err(Rejection::UnsupportedType(type_name(other))),
    }
}

fn coerce_float(value: &Value) -> Result<f64, Rejection> {
    let parsed = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Rejection::InvalidValue(n.to_string()))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| Rejection::InvalidValue(format!("'{}' is not a number", s.trim())))?,
        other => return Err(Rejection::UnsupportedType(type_name(other))),
    };
    if !parsed.is_finite() {
        return Err(Rejection::InvalidValue(format!("{} is not finite", parsed)));
    }
    Ok(parsed)
}

fn coerce_text(value: &Value) -> Result<String, Rejection> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(Rejection::UnsupportedType(type_name(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn resolves_wire_names_and_columns() {
        assert_eq!(
            MetricField::resolve("TransferStartUnix"),
            Ok(MetricField::TransferStartUnix)
        );
        assert_eq!(
            MetricField::resolve("transfer_start_unix"),
            Ok(MetricField::TransferStartUnix)
        );
        assert_eq!(MetricField::resolve("error"), Ok(MetricField::Error));
        assert_eq!(
            MetricField::resolve("cpu_client_before"),
            Ok(MetricField::CpuClientPercentBefore)
        );
        assert_eq!(
            MetricField::resolve("RamServerBytesWhile"),
            Ok(MetricField::RamServerBytesWhile)
        );
    }

    #[test]
    fn rejects_derived_identity_and_unknown_keys() {
        assert_eq!(MetricField::resolve("LatencyMs"), Err(Rejection::DerivedField));
        assert_eq!(
            MetricField::resolve("bandwidth_efficiency"),
            Err(Rejection::DerivedField)
        );
        assert_eq!(MetricField::resolve("ClientID"), Err(Rejection::IdentityField));
        assert_eq!(MetricField::resolve("Protocol"), Err(Rejection::IdentityField));
        assert_eq!(MetricField::resolve("Jitter"), Err(Rejection::UnknownField));
    }

    #[test]
    fn every_field_has_distinct_name_and_column() {
        let mut names: Vec<_> = MetricField::ALL.iter().map(|f| normalize(f.name())).collect();
        let mut columns: Vec<_> = MetricField::ALL.iter().map(|f| f.column()).collect();
        names.sort();
        names.dedup();
        columns.sort();
        columns.dedup();
        assert_eq!(names.len(), MetricField::ALL.len());
        assert_eq!(columns.len(), MetricField::ALL.len());
    }

    #[test]
    fn int_fields_accept_equivalent_representations() {
        let field = MetricField::BytesPayload;
        for value in [json!(1000), json!(1000.0), json!("1000"), json!(" 1000 "), json!("1000.0")] {
            assert_eq!(
                field.coerce(&value),
                Ok(FieldUpdate::BytesPayload(1000)),
                "value {value}"
            );
        }
        assert_eq!(field.coerce(&json!(-5)), Ok(FieldUpdate::BytesPayload(-5)));
    }

    #[test]
    fn float_fields_accept_equivalent_representations() {
        let field = MetricField::ThroughputMbps;
        for value in [json!(12), json!(12.0), json!("12"), json!("12.0")] {
            assert_eq!(field.coerce(&value), Ok(FieldUpdate::ThroughputMbps(12.0)));
        }
        assert_eq!(
            field.coerce(&json!("3.25")),
            Ok(FieldUpdate::ThroughputMbps(3.25))
        );
    }

    #[test]
    fn text_field_accepts_numbers() {
        assert_eq!(
            MetricField::Error.coerce(&json!(404)),
            Ok(FieldUpdate::Error("404".to_string()))
        );
        assert_eq!(
            MetricField::Error.coerce(&json!("boom")),
            Ok(FieldUpdate::Error("boom".to_string()))
        );
    }

    #[test]
    fn rejects_values_that_do_not_coerce() {
        assert!(matches!(
            MetricField::LostPackets.coerce(&json!(1.5)),
            Err(Rejection::InvalidValue(_))
        ));
        assert!(matches!(
            MetricField::LostPackets.coerce(&json!("many")),
            Err(Rejection::InvalidValue(_))
        ));
        assert!(matches!(
            MetricField::LostPackets.coerce(&json!(u64::MAX)),
            Err(Rejection::InvalidValue(_))
        ));
        assert!(matches!(
            MetricField::ThroughputMbps.coerce(&json!("NaN")),
            Err(Rejection::InvalidValue(_))
        ));
        assert_eq!(
            MetricField::ThroughputMbps.coerce(&json!(true)),
            Err(Rejection::UnsupportedType("boolean"))
        );
        assert_eq!(
            MetricField::Error.coerce(&json!(null)),
            Err(Rejection::UnsupportedType("null"))
        );
    }

    #[test]
    fn parse_updates_keeps_valid_siblings() {
        let fields = map(json!({
            "TransferStartUnix": "100",
            "Bogus": 1,
            "LostPackets": "lots",
            "error": "reset by peer",
        }));

        let (updates, rejected) = parse_updates(&fields);

        assert_eq!(
            updates,
            vec![
                FieldUpdate::TransferStartUnix(100),
                FieldUpdate::Error("reset by peer".to_string()),
            ]
        );
        let rejected_keys: Vec<_> = rejected.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(rejected_keys, vec!["Bogus", "LostPackets"]);
        assert_eq!(rejected[0].reason, Rejection::UnknownField);
    }

    #[test]
    fn apply_writes_the_matching_metric() {
        let mut metrics = RunMetrics::default();
        FieldUpdate::CpuServerPercentWhile(42.5).apply(&mut metrics);
        FieldUpdate::RamClientBytesAfter(1 << 20).apply(&mut metrics);
        assert_eq!(metrics.cpu_server_percent_while, 42.5);
        assert_eq!(metrics.ram_client_bytes_after, 1 << 20);
        assert_eq!(
            FieldUpdate::RamClientBytesAfter(0).field(),
            MetricField::RamClientBytesAfter
        );
    }
}
