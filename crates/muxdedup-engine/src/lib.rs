//! Mux deduplication engine: detect duplicate pairs, pick the canonical record,
//! merge fields, plan a safe action and carry it out.

pub mod config;
pub mod detector;
pub mod executor;
pub mod mapping;
pub mod merger;
pub mod planner;
pub mod report;
pub mod selector;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use muxdedup_core::Snapshot;
use muxdedup_storage::{HttpRepository, MemoryRepository, RecordRepository, RepositoryError};
use serde::Serialize;
use tokio::fs;
use tracing::{info, info_span, Instrument};

pub use config::{mux_class_from_lookup, ConfigError, DedupConfig, RunConfig};
pub use detector::{duplicate_pairs, is_duplicate, sort_muxes, FREQUENCY_TOLERANCE_KHZ};
pub use executor::ActionExecutor;
pub use mapping::MappingIndex;
pub use merger::{merge_fields, FieldDiff, MergeOutcome, NO_COPY_FIELDS};
pub use planner::{ActionPlanner, Decision, PlanInput};
pub use report::PairReport;
pub use selector::{select, Selection, Side, TieBreak};

pub const CRATE_NAME: &str = "muxdedup-engine";
pub const CHANNEL_CLASS: &str = "channel";
pub const SERVICE_CLASS: &str = "service";

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub muxes: usize,
    pub pairs_scanned: usize,
    pub duplicates: usize,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub skipped: usize,
    pub untouched: usize,
    pub pairs: Vec<PairRecord>,
}

/// Per-pair entry of the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct PairRecord {
    pub newer: String,
    pub older: String,
    pub decided_by: Option<TieBreak>,
    pub allow_merge: bool,
    pub decision: Decision,
    pub diffs: Vec<FieldDiff>,
}

/// Fetch channels, services and muxes once and decode them.
pub async fn fetch_snapshot<R>(repo: &R, mux_class: &str) -> Result<Snapshot>
where
    R: RecordRepository + ?Sized,
{
    let channels = repo
        .fetch(CHANNEL_CLASS)
        .await
        .context("fetching channels")?;
    let services = repo
        .fetch(SERVICE_CLASS)
        .await
        .context("fetching services")?;
    let muxes = repo
        .fetch(mux_class)
        .await
        .with_context(|| format!("fetching {mux_class} muxes"))?;

    let snapshot = Snapshot::from_raw(channels, services, muxes, mux_class)
        .map_err(RepositoryError::from)
        .context("decoding snapshot")?;
    info!(
        channels = snapshot.channels.len(),
        services = snapshot.services.len(),
        muxes = snapshot.muxes.len(),
        "snapshot loaded"
    );
    Ok(snapshot)
}

/// One full pass: every flagged pair is reported, decided and (unless dry-run)
/// applied. Any repository error aborts the run; mutations already made stay.
pub async fn run_dedup<R, W>(repo: &R, mux_class: &str, run: RunConfig, out: W) -> Result<RunSummary>
where
    R: RecordRepository + ?Sized,
    W: Write,
{
    let started_at = Utc::now();
    let snapshot = fetch_snapshot(repo, mux_class).await?;
    let index = MappingIndex::build(&snapshot.channels, &snapshot.services);

    let mut muxes = snapshot.muxes;
    sort_muxes(&mut muxes);

    let mut planner = ActionPlanner::new();
    let mut executor = ActionExecutor::new(repo, run.dry_run, out);
    let mut pairs = duplicate_pairs(&muxes);
    let (mut duplicates, mut skipped, mut untouched) = (0usize, 0usize, 0usize);
    let mut records = Vec::new();

    for (i, j) in pairs.by_ref() {
        duplicates += 1;
        let selection = select(&muxes[i], &muxes[j]);
        let (ni, oi) = selection.indices(i, j);

        let mut merged = muxes[oi].clone();
        let merge = merge_fields(&muxes[ni], &mut merged, selection.allow_merge);
        let newer = &muxes[ni];
        let older = &muxes[oi];

        let decision = planner.plan(&PlanInput {
            newer,
            older,
            allow_merge: selection.allow_merge,
            nupdates: merge.nupdates,
            newer_mappings: index.mapping_count(newer),
            older_mappings: index.mapping_count(older),
        });

        let text = PairReport {
            newer,
            older,
            selection: &selection,
            diffs: &merge.diffs,
            index: &index,
        }
        .render();
        executor.emit(&text)?;

        let span = info_span!("pair", newer = %newer.uuid, older = %older.uuid);
        executor
            .execute(decision, newer, &merged)
            .instrument(span)
            .await?;

        records.push(PairRecord {
            newer: newer.uuid.clone(),
            older: older.uuid.clone(),
            decided_by: selection.decided_by,
            allow_merge: selection.allow_merge,
            decision,
            diffs: merge.diffs,
        });

        match decision {
            Decision::UpdateOlder { .. } => muxes[oi] = merged,
            Decision::Skip => skipped += 1,
            Decision::NoAction => untouched += 1,
            Decision::DeleteOlder | Decision::DeleteNewer => {}
        }
    }

    let pairs_scanned = pairs.scanned();
    let dry_run = executor.dry_run();
    let (_out, updated, deleted) = executor.finish()?;
    let summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        dry_run,
        muxes: muxes.len(),
        pairs_scanned,
        duplicates,
        updated,
        deleted,
        skipped,
        untouched,
        pairs: records,
    };
    info!(
        duplicates,
        updated = summary.updated.len(),
        deleted = summary.deleted.len(),
        dry_run,
        "dedup run complete"
    );
    Ok(summary)
}

/// Load a `{ "<class>": [records...] }` export into an in-memory repository.
pub async fn load_snapshot_file(path: &Path) -> Result<MemoryRepository> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    MemoryRepository::from_json(value).with_context(|| format!("loading {}", path.display()))
}

pub async fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

/// Read configuration from the environment, then run against the live server
/// or, given `snapshot`, against an exported file. Reports go to stdout.
pub async fn run_once_from_env(run: RunConfig, snapshot: Option<&Path>) -> Result<RunSummary> {
    run_once(|key| std::env::var(key).ok(), run, snapshot, std::io::stdout()).await
}

/// A snapshot run reads only `TVH_MUX_CLASS` and never mutates; a live run
/// needs the full server configuration.
pub async fn run_once<W: Write>(
    lookup: impl Fn(&str) -> Option<String>,
    run: RunConfig,
    snapshot: Option<&Path>,
    out: W,
) -> Result<RunSummary> {
    match snapshot {
        Some(_) if !run.dry_run => Err(ConfigError::LiveSnapshot.into()),
        Some(path) => {
            let mux_class = mux_class_from_lookup(lookup);
            let repo = load_snapshot_file(path).await?;
            run_dedup(&repo, &mux_class, run, out).await
        }
        None => {
            let config = DedupConfig::from_lookup(lookup)?;
            let repo = HttpRepository::new(config.http_client_config(run)?)?;
            run_dedup(&repo, &config.mux_class, run, out).await
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use muxdedup_core::Mux;
    use std::collections::BTreeMap;

    pub fn mux(uuid: &str, orbital: &str, polarisation: &str, frequency: u32) -> Mux {
        Mux {
            uuid: uuid.to_string(),
            orbital: orbital.to_string(),
            polarisation: polarisation.to_string(),
            frequency,
            created: 0,
            scan_first: 0,
            scan_last: 0,
            scan_result: Default::default(),
            services: Vec::new(),
            cridauth: String::new(),
            pnetwork_name: String::new(),
            epg_module_id: String::new(),
            extra: BTreeMap::new(),
        }
    }
}
