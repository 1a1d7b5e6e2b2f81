use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tbench_client::{Environment, Protocol, RunId, TimeSlot};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Collector base URL
    #[arg(long, env = "TBENCH_URL", default_value = "http://localhost:2500")]
    pub url: String,

    /// Shared secret sent in the X-API-KEY header
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a run and print its id
    Begin {
        #[arg(short, long)]
        protocol: Protocol,

        #[arg(short, long, default_value = "local")]
        environment: Environment,

        #[arg(short, long)]
        time_slot: TimeSlot,

        #[arg(long, default_value_t = 0)]
        client_id: u32,

        #[arg(long, default_value_t = 1)]
        parallel_clients: u32,
    },
    /// Report some fields of an active run
    Update {
        id: RunId,

        /// Field to report, as Name=value (repeatable)
        #[arg(short = 'f', long = "field")]
        fields: Vec<String>,
    },
    /// Report the last fields and finalize the run
    End {
        id: RunId,

        /// Field to report, as Name=value (repeatable)
        #[arg(short = 'f', long = "field")]
        fields: Vec<String>,
    },
    /// Download finalized runs
    Export {
        /// Read the emergency table instead of the primary one
        #[arg(long, default_value_t = false)]
        emergency: bool,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show collector status
    Health,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_field_pairs_and_env_spellings() {
        let args = Args::try_parse_from([
            "tbench",
            "--api-key",
            "secret",
            "update",
            "3f2c1a9e-8d4b-4c1e-9a7f-2b6d5e4c3a21",
            "-f",
            "LostPackets=4",
            "--field",
            "error=boom",
        ])
        .unwrap();

        match args.command {
            Commands::Update { id, fields } => {
                assert_eq!(id.to_string(), "3f2c1a9e-8d4b-4c1e-9a7f-2b6d5e4c3a21");
                assert_eq!(fields, vec!["LostPackets=4", "error=boom"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn begin_accepts_protocol_aliases() {
        let args = Args::try_parse_from([
            "tbench", "--api-key", "k", "begin", "-p", "HTTP/3", "-t", "night",
        ])
        .unwrap();

        match args.command {
            Commands::Begin {
                protocol,
                environment,
                time_slot,
                parallel_clients,
                ..
            } => {
                assert_eq!(protocol, Protocol::Http3);
                assert_eq!(environment, Environment::Local);
                assert_eq!(time_slot, TimeSlot::Night);
                assert_eq!(parallel_clients, 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn malformed_run_id_is_a_usage_error() {
        assert!(Args::try_parse_from(["tbench", "--api-key", "k", "end", "42"]).is_err());
    }
}
