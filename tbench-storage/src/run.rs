use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Error, Result};

// Declares a closed set of lowercase wire values. Parsing is case-insensitive
// and accepts the listed aliases so agents written against older clients keep working.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $( $variant:ident => $wire:literal $( | $alias:literal )* ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )*
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $wire, )*
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(value: &str) -> Result<Self> {
                let value = value.trim();
                $(
                    if value.eq_ignore_ascii_case($wire) $( || value.eq_ignore_ascii_case($alias) )* {
                        return Ok($name::$variant);
                    }
                )*
                Err(Error::UnknownVariant {
                    kind: $kind,
                    value: value.to_string(),
                })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

wire_enum! {
    /// Transport under test.
    Protocol ("protocol") {
        Http3 => "http3" | "http/3" | "h3",
        WebTransport => "webtransport" | "web-transport",
        WebSockets => "websockets" | "websocket" | "ws",
        WebRtc => "webrtc",
    }
}

wire_enum! {
    Environment ("environment") {
        Local => "local",
        Remote => "remote",
    }
}

wire_enum! {
    /// Time-of-day bucket the trial was started in.
    TimeSlot ("time slot") {
        Morning => "morning",
        Afternoon => "afternoon",
        Evening => "evening",
        Night => "night",
    }
}

/// Opaque handle shared by the client and server agents of one run.
///
/// Backed by a random v4 UUID so it cannot be guessed from a neighbouring run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new_random() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Uuid::parse_str(value.trim())
            .map(RunId)
            .map_err(|_| Error::InvalidRunId(value.to_string()))
    }
}

/// Identity of a run as supplied by the agent that begins it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginRun {
    pub protocol: Protocol,
    pub environment: Environment,
    pub time_slot: TimeSlot,
    pub client_id: u32,
    pub parallel_clients: u32,
}

/// Measurements reported by the agents. Every field starts at zero / empty so a
/// run can be finalized with any subset reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMetrics {
    pub transfer_start_unix: i64,
    pub transfer_end_unix: i64,
    pub throughput_mbps: f64,
    pub bytes_sent_total: i64,
    pub bytes_payload: i64,
    pub cpu_client_percent_before: f64,
    pub cpu_client_percent_after: f64,
    pub cpu_client_percent_while: f64,
    pub cpu_server_percent_before: f64,
    pub cpu_server_percent_after: f64,
    pub cpu_server_percent_while: f64,
    pub ram_client_bytes_before: i64,
    pub ram_client_bytes_after: i64,
    pub ram_client_bytes_while: i64,
    pub ram_server_bytes_before: i64,
    pub ram_server_bytes_after: i64,
    pub ram_server_bytes_while: i64,
    pub lost_packets: i64,
    pub retransmissions: i64,
    pub connection_duration: i64,
    pub stream_duration: i64,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: RunId,
    pub protocol: Protocol,
    pub environment: Environment,
    pub time_slot: TimeSlot,
    pub client_id: u32,
    pub parallel_clients: u32,
    pub test_begin: DateTime<Utc>,
    pub test_end: Option<DateTime<Utc>>,
    pub metrics: RunMetrics,
}

impl RunRecord {
    pub fn new(id: RunId, begin: &BeginRun, test_begin: DateTime<Utc>) -> Self {
        Self {
            id,
            protocol: begin.protocol,
            environment: begin.environment,
            time_slot: begin.time_slot,
            client_id: begin.client_id,
            parallel_clients: begin.parallel_clients,
            test_begin,
            test_end: None,
            metrics: RunMetrics::default(),
        }
    }

    /// `transfer_end_unix - transfer_start_unix`, in the unit the agents report.
    pub fn latency_ms(&self) -> i64 {
        self.metrics
            .transfer_end_unix
            .saturating_sub(self.metrics.transfer_start_unix)
    }

    /// Payload share of all bytes on the wire; 0 when nothing was sent.
    pub fn bandwidth_efficiency(&self) -> f64 {
        if self.metrics.bytes_sent_total == 0 {
            return 0.0;
        }
        self.metrics.bytes_payload as f64 / self.metrics.bytes_sent_total as f64
    }

    pub fn is_failed(&self) -> bool {
        !self.metrics.error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RunRecord {
        let begin = BeginRun {
            protocol: Protocol::Http3,
            environment: Environment::Local,
            time_slot: TimeSlot::Morning,
            client_id: 0,
            parallel_clients: 1,
        };
        RunRecord::new(RunId::new_random(), &begin, Utc::now())
    }

    #[test]
    fn parses_wire_values_case_insensitively() {
        assert_eq!("HTTP3".parse::<Protocol>().unwrap(), Protocol::Http3);
        assert_eq!("WebTransport".parse::<Protocol>().unwrap(), Protocol::WebTransport);
        assert_eq!(" websockets ".parse::<Protocol>().unwrap(), Protocol::WebSockets);
        assert_eq!("Remote".parse::<Environment>().unwrap(), Environment::Remote);
        assert_eq!("night".parse::<TimeSlot>().unwrap(), TimeSlot::Night);

        let err = "carrier-pigeon".parse::<Protocol>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown protocol 'carrier-pigeon'");
    }

    #[test]
    fn deserializes_from_json_strings() {
        let protocol: Protocol = serde_json::from_str("\"WebRTC\"").unwrap();
        assert_eq!(protocol, Protocol::WebRtc);
        assert!(serde_json::from_str::<TimeSlot>("\"noon\"").is_err());
        assert_eq!(serde_json::to_string(&Protocol::WebTransport).unwrap(), "\"webtransport\"");
    }

    #[test]
    fn run_id_round_trips_through_text() {
        let id = RunId::new_random();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(matches!("42".parse::<RunId>(), Err(Error::InvalidRunId(_))));
    }

    #[test]
    fn derived_values_follow_metrics() {
        let mut run = record();
        assert_eq!(run.latency_ms(), 0);
        assert_eq!(run.bandwidth_efficiency(), 0.0);

        run.metrics.transfer_start_unix = 100;
        run.metrics.transfer_end_unix = 102;
        run.metrics.bytes_payload = 1000;
        run.metrics.bytes_sent_total = 1250;
        assert_eq!(run.latency_ms(), 2);
        assert_eq!(run.bandwidth_efficiency(), 0.8);
    }

    #[test]
    fn error_text_marks_run_failed() {
        let mut run = record();
        assert!(!run.is_failed());
        run.metrics.error = "Failed to GET: timeout".to_string();
        assert!(run.is_failed());
    }
}
