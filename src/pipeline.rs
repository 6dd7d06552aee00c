use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use indexmap::IndexSet;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointFile, RetryList, SnapshotWriter};
use crate::config::HarvestConfig;
use crate::domain::{JournalRecord, TargetName};
use crate::error::HarvestError;
use crate::extract::RecordExtractor;
use crate::fetch::Fetcher;
use crate::resolver::LinkResolver;
use crate::store::{CatalogStore, ResultSet, merge};

/// How a single title ended up after one pass through the pipeline.
#[derive(Debug)]
pub enum Outcome {
    Recorded(JournalRecord),
    NotFound,
    Failed(HarvestError),
    /// The detail page lacked its main container. The title is not
    /// checkpointed and goes on the retry list for a later run.
    ExtractionFailed,
}

impl Outcome {
    pub fn advances_checkpoint(&self) -> bool {
        !matches!(self, Outcome::ExtractionFailed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub processed: usize,
    pub found: usize,
    pub not_found: usize,
    pub failed: usize,
    pub extraction_failed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub started_at: String,
    pub pending: usize,
    #[serde(flatten)]
    pub counters: Counters,
    pub checkpoint: Option<String>,
    pub checkpoint_failures: usize,
    /// Titles left on the retry list for the next run.
    pub retry: usize,
    pub output: String,
}

/// Work computed at startup: what is left to do and what is already stored.
#[derive(Debug, Clone)]
pub struct Plan {
    pub input_total: usize,
    pub pending: Vec<TargetName>,
    pub existing: ResultSet,
    pub checkpoint: Option<TargetName>,
    pub retry: IndexSet<TargetName>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub input: usize,
    pub cataloged: usize,
    pub pending: usize,
    pub checkpoint: Option<String>,
    pub retry: usize,
}

impl Plan {
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            input: self.input_total,
            cataloged: self.existing.len(),
            pending: self.pending.len(),
            checkpoint: self.checkpoint.as_ref().map(|name| name.to_string()),
            retry: self.retry.len(),
        }
    }
}

#[derive(Default)]
struct RunState {
    results: ResultSet,
    counters: Counters,
    checkpoint: Option<TargetName>,
    retry: IndexSet<TargetName>,
    checkpoint_failures: usize,
}

pub struct Pipeline {
    resolver: LinkResolver,
    extractor: RecordExtractor,
    store: CatalogStore,
    checkpoint: CheckpointFile,
    retry: RetryList,
    snapshots: SnapshotWriter,
    concurrency: usize,
    snapshot_every: usize,
}

impl Pipeline {
    pub fn from_config(config: &HarvestConfig) -> Result<Self, HarvestError> {
        config.validate()?;
        let base = config.base()?;
        Ok(Self {
            resolver: LinkResolver::new(base.clone(), config.max_pages),
            extractor: RecordExtractor::new(base),
            store: CatalogStore::new(config.input.clone(), config.output.clone()),
            checkpoint: CheckpointFile::new(config.checkpoint.clone()),
            retry: RetryList::new(config.retry_list.clone()),
            snapshots: SnapshotWriter::new(config.partial_prefix.clone()),
            concurrency: config.concurrency,
            snapshot_every: config.snapshot_every,
        })
    }

    pub fn checkpoint_file(&self) -> &CheckpointFile {
        &self.checkpoint
    }

    pub fn plan(&self) -> Result<Plan, HarvestError> {
        let input = self.store.load_input()?;
        let existing = self.store.load_output()?;
        let checkpoint = self.checkpoint.load()?;
        let retry = self.retry.load();
        let pending = pending_names(input.keys(), &existing, checkpoint.as_ref(), &retry);
        Ok(Plan {
            input_total: input.len(),
            pending,
            existing,
            checkpoint,
            retry,
        })
    }

    /// Processes every pending title with `concurrency` workers, each owning a
    /// fetcher built by `make_fetcher`, then merges the results into the
    /// output catalog.
    pub fn run<F, M>(&self, make_fetcher: M) -> Result<RunSummary, HarvestError>
    where
        F: Fetcher,
        M: Fn() -> Result<F, HarvestError>,
    {
        let started_at = chrono::Utc::now().to_rfc3339();
        let plan = self.plan()?;
        let total = plan.pending.len();
        info!(
            input = plan.input_total,
            cataloged = plan.existing.len(),
            pending = total,
            checkpoint = plan.checkpoint.as_ref().map(|name| name.as_str()),
            retry = plan.retry.len(),
            "plan ready"
        );

        if total == 0 {
            info!("no new titles to process");
            return Ok(RunSummary {
                started_at,
                pending: 0,
                counters: Counters::default(),
                checkpoint: plan.checkpoint.map(String::from),
                checkpoint_failures: 0,
                retry: plan.retry.len(),
                output: self.store.output_path().to_string(),
            });
        }

        let workers = self.concurrency.min(total);
        let fetchers = (0..workers)
            .map(|_| make_fetcher())
            .collect::<Result<Vec<_>, _>>()?;
        let cursor = AtomicUsize::new(0);
        let state = Mutex::new(RunState {
            checkpoint: plan.checkpoint.clone(),
            retry: plan.retry.clone(),
            ..RunState::default()
        });

        thread::scope(|scope| {
            for (worker, fetcher) in fetchers.into_iter().enumerate() {
                let cursor = &cursor;
                let state = &state;
                let pending = &plan.pending;
                scope.spawn(move || {
                    debug!(worker, "worker started");
                    while let Some(name) = pending.get(cursor.fetch_add(1, Ordering::Relaxed)) {
                        let outcome = self.process(&fetcher, name);
                        self.complete(state, total, name, outcome);
                    }
                    debug!(worker, "worker finished");
                });
            }
        });

        let state = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        let counters = state.counters;
        info!(
            processed = counters.processed,
            found = counters.found,
            not_found = counters.not_found,
            failed = counters.failed,
            extraction_failed = counters.extraction_failed,
            "run finished"
        );

        if !state.results.is_empty() {
            let mut catalog = plan.existing;
            merge(&mut catalog, &state.results);
            self.store.save_output(&catalog)?;
            info!(
                path = %self.store.output_path(),
                records = catalog.len(),
                added = state.results.len(),
                "output catalog saved"
            );
        }

        if state.checkpoint_failures > 0 {
            return Err(HarvestError::CheckpointWrite(format!(
                "{} of {} checkpoint writes failed during the run",
                state.checkpoint_failures, counters.processed
            )));
        }

        Ok(RunSummary {
            started_at,
            pending: total,
            counters,
            checkpoint: state.checkpoint.map(String::from),
            checkpoint_failures: state.checkpoint_failures,
            retry: state.retry.len(),
            output: self.store.output_path().to_string(),
        })
    }

    /// Resolve then extract one title. Never touches shared state.
    pub fn process<F: Fetcher + ?Sized>(&self, fetcher: &F, name: &TargetName) -> Outcome {
        debug!(title = %name, "resolving");
        let detail_url = match self.resolver.resolve(fetcher, name) {
            Ok(Some(url)) => url,
            Ok(None) => return Outcome::NotFound,
            Err(err) => return Outcome::Failed(err),
        };

        debug!(title = %name, url = %detail_url, "extracting");
        match self.extractor.extract(fetcher, &detail_url, name) {
            Ok(Some(record)) => Outcome::Recorded(record),
            Ok(None) => Outcome::ExtractionFailed,
            Err(err) => Outcome::Failed(err),
        }
    }

    // The only critical section of a run: results, counters, checkpoint,
    // retry list and snapshots change together under one lock.
    fn complete(&self, state: &Mutex<RunState>, total: usize, name: &TargetName, outcome: Outcome) {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.counters.processed += 1;
        let processed = state.counters.processed;
        let advances = outcome.advances_checkpoint();
        let retry_changed = if advances {
            state.retry.shift_remove(name)
        } else {
            state.retry.insert(name.clone())
        };

        match outcome {
            Outcome::Recorded(record) => {
                state.counters.found += 1;
                state.results.insert(name.clone(), record);
                info!(processed, total, title = %name, "recorded");
            }
            Outcome::NotFound => {
                state.counters.not_found += 1;
                warn!(processed, total, title = %name, "not found");
            }
            Outcome::Failed(err) => {
                state.counters.failed += 1;
                error!(processed, total, title = %name, error = %err, "lookup failed");
            }
            Outcome::ExtractionFailed => {
                state.counters.extraction_failed += 1;
                warn!(processed, total, title = %name, "extraction failed, left for a later run");
            }
        }

        if advances {
            match self.checkpoint.save(name) {
                Ok(()) => state.checkpoint = Some(name.clone()),
                Err(err) => {
                    state.checkpoint_failures += 1;
                    error!(title = %name, error = %err, "checkpoint write failed");
                }
            }
        }

        if retry_changed {
            if let Err(err) = self.retry.save(&state.retry) {
                state.checkpoint_failures += 1;
                error!(title = %name, error = %err, "retry list write failed");
            }
        }

        if processed % self.snapshot_every == 0 {
            if let Err(err) = self.snapshots.flush(&state.results, processed) {
                error!(processed, error = %err, "partial snapshot failed");
            }
        }
    }
}

/// Titles still to process, in input order: everything after the checkpoint,
/// plus any title on the retry list, that is not already in the output
/// catalog.
///
/// A checkpoint that names a title absent from the input is ignored.
pub fn pending_names<'a>(
    names: impl IntoIterator<Item = &'a TargetName>,
    existing: &ResultSet,
    checkpoint: Option<&TargetName>,
    retry: &IndexSet<TargetName>,
) -> Vec<TargetName> {
    let names = names.into_iter().collect::<Vec<_>>();
    let start = match checkpoint {
        Some(last) => match names.iter().position(|name| *name == last) {
            Some(index) => index + 1,
            None => {
                warn!(checkpoint = %last, "checkpoint title is not in the input catalog, ignoring it");
                0
            }
        },
        None => 0,
    };

    names
        .iter()
        .enumerate()
        .filter(|&(index, name)| index >= start || retry.contains(*name))
        .filter(|(_, name)| !existing.contains_key(**name))
        .map(|(_, name)| (*name).clone())
        .collect()
}
