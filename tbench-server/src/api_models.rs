use serde::{Deserialize, Serialize};
use tbench_storage::{BeginRun, Environment, FieldError, Protocol, TimeSlot};

/// Body of `POST /begin`. Field names follow the agents: PascalCase from the
/// test suite, snake_case and camelCase from everything else.
#[derive(Debug, Deserialize)]
pub struct BeginRequest {
    #[serde(alias = "Protocol")]
    pub protocol: Protocol,
    #[serde(alias = "Environment", alias = "Enviroment", alias = "enviroment")]
    pub environment: Environment,
    #[serde(alias = "TimeSlot", alias = "timeSlot")]
    pub time_slot: TimeSlot,
    #[serde(
        default,
        alias = "ClientID",
        alias = "ClientId",
        alias = "clientId",
        alias = "clientID"
    )]
    pub client_id: u32,
    #[serde(
        default = "default_parallel_clients",
        alias = "ParallelClients",
        alias = "parallelClients"
    )]
    pub parallel_clients: u32,
}

fn default_parallel_clients() -> u32 {
    1
}

impl From<BeginRequest> for BeginRun {
    fn from(req: BeginRequest) -> Self {
        BeginRun {
            protocol: req.protocol,
            environment: req.environment,
            time_slot: req.time_slot,
            client_id: req.client_id,
            parallel_clients: req.parallel_clients,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    pub emergency: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RejectedField {
    pub field: String,
    pub reason: String,
}

impl From<&FieldError> for RejectedField {
    fn from(err: &FieldError) -> Self {
        RejectedField {
            field: err.field.clone(),
            reason: err.reason.to_string(),
        }
    }
}

/// 422 body: the listed fields were dropped, every other field was applied.
#[derive(Debug, Serialize, Deserialize)]
pub struct RejectedFieldsResponse {
    pub applied: usize,
    pub rejected: Vec<RejectedField>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthInfo {
    pub status: String,
    pub active_runs: usize,
    pub version: String,
}
