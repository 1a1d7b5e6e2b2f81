//! Lifecycle of benchmark runs.
//!
//! A run is `ACTIVE` from [`RunCoordinator::begin_run`] until the first
//! [`RunCoordinator::end_run`] for its id, which removes it from the active
//! table and hands the finished record to [`Persistence`]. Partial reports may
//! come from either agent of the run in any order; each call is merged as a
//! unit.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::field::{FieldError, FieldUpdate, parse_updates};
use crate::persistence::{Persistence, SinkKind};
use crate::row::encode_row;
use crate::run::{BeginRun, RunId, RunRecord};

struct ActiveRun {
    record: RunRecord,
    last_activity: Instant,
}

impl ActiveRun {
    fn merge(&mut self, updates: Vec<FieldUpdate>) -> usize {
        let applied = updates.len();
        for update in updates {
            update.apply(&mut self.record.metrics);
        }
        self.last_activity = Instant::now();
        applied
    }

    fn finalize(mut self, test_end: DateTime<Utc>) -> RunRecord {
        self.record.test_end = Some(test_end);
        self.record
    }
}

/// Outcome of merging one report into a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub applied: usize,
    pub rejected: Vec<FieldError>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Finalized {
    pub record: RunRecord,
    pub sink: SinkKind,
    pub merge: MergeReport,
}

pub struct RunCoordinator {
    runs: DashMap<RunId, ActiveRun>,
    persistence: Persistence,
}

impl RunCoordinator {
    pub fn new(persistence: Persistence) -> Self {
        Self {
            runs: DashMap::new(),
            persistence,
        }
    }

    pub fn begin_run(&self, begin: BeginRun) -> RunId {
        loop {
            let id = RunId::new_random();
            if let Entry::Vacant(slot) = self.runs.entry(id) {
                slot.insert(ActiveRun {
                    record: RunRecord::new(id, &begin, Utc::now()),
                    last_activity: Instant::now(),
                });
                info!(
                    "Run {} started: {} {} {} client {}/{}",
                    id,
                    begin.protocol,
                    begin.environment,
                    begin.time_slot,
                    begin.client_id,
                    begin.parallel_clients
                );
                return id;
            }
        }
    }

    /// Merges a sparse set of fields into an active run.
    pub fn report_partial(&self, id: RunId, fields: &Map<String, Value>) -> Result<MergeReport> {
        let (updates, rejected) = parse_updates(fields);

        let applied = {
            let mut run = self.runs.get_mut(&id).ok_or(Error::NotFound(id))?;
            run.merge(updates)
        };

        log_rejected(id, &rejected);
        debug!("Run {}: merged {} field(s)", id, applied);
        Ok(MergeReport { applied, rejected })
    }

    /// Merges the final report, removes the run from the active set and
    /// persists it. A second call for the same id yields `NotFound`.
    pub fn end_run(&self, id: RunId, fields: &Map<String, Value>) -> Result<Finalized> {
        let (updates, rejected) = parse_updates(fields);

        let (_, mut run) = self.runs.remove(&id).ok_or(Error::NotFound(id))?;
        let applied = run.merge(updates);
        let record = run.finalize(Utc::now());

        log_rejected(id, &rejected);
        let sink = self.persist(&record)?;
        Ok(Finalized {
            record,
            sink,
            merge: MergeReport { applied, rejected },
        })
    }

    fn persist(&self, record: &RunRecord) -> Result<SinkKind> {
        match self.persistence.persist(record) {
            Ok(sink) => {
                if record.is_failed() {
                    warn!(
                        "Run {} finished with error '{}', saved to {} sink",
                        record.id, record.metrics.error, sink
                    );
                } else {
                    info!("Run {} finished, saved to {} sink", record.id, sink);
                }
                Ok(sink)
            }
            Err(err) => {
                // Last copy of the data; keep it in the log for manual recovery.
                match encode_row(record) {
                    Ok(row) => error!("{}. Row: {}", err, String::from_utf8_lossy(&row).trim_end()),
                    Err(_) => error!("{}. Record: {:?}", err, record),
                }
                Err(err)
            }
        }
    }

    /// Finalizes runs with no activity for `max_idle`, recording them as failed.
    /// Returns each evicted run with the outcome of persisting it.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<(RunId, Result<SinkKind>)> {
        let stale: Vec<RunId> = self
            .runs
            .iter()
            .filter(|entry| entry.last_activity.elapsed() >= max_idle)
            .map(|entry| *entry.key())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for id in stale {
            // Re-check: a report may have arrived since the scan.
            let Some((_, run)) = self
                .runs
                .remove_if(&id, |_, run| run.last_activity.elapsed() >= max_idle)
            else {
                continue;
            };

            let mut record = run.finalize(Utc::now());
            if record.metrics.error.is_empty() {
                record.metrics.error =
                    format!("evicted after {}s without activity", max_idle.as_secs());
            }
            warn!("Run {} evicted after {:?} idle", id, max_idle);
            evicted.push((id, self.persist(&record)));
        }
        evicted
    }

    pub fn export(&self, kind: SinkKind) -> Result<String> {
        self.persistence.export(kind)
    }

    pub fn active_count(&self) -> usize {
        self.runs.len()
    }

    pub fn active_ids(&self) -> Vec<RunId> {
        self.runs.iter().map(|entry| *entry.key()).collect()
    }

    pub fn get_active(&self, id: RunId) -> Option<RunRecord> {
        self.runs.get(&id).map(|run| run.record.clone())
    }
}

fn log_rejected(id: RunId, rejected: &[FieldError]) {
    for field in rejected {
        warn!("Run {}: rejected field '{}': {}", id, field.field, field.reason);
    }
}
