//! Run orchestration
//!
//! One [`SyncEngine`] drives one copy, sync or move between two stores. The
//! pipeline lists both sides concurrently, marches the listings into pairs,
//! fans the pairs out to a pool of checkers, and executes the resulting
//! decisions on a pool of transfer workers, with deletions sequenced
//! according to the configured delete mode. Whole-run retries rerun the
//! pipeline while counted errors remain and nothing fatal happened.

use crate::compare::{modify_window, needs_transfer, CompareResult};
use crate::lister::{list_store, Listing};
use crate::march::{march, Pair, PairKind};
use crate::options::{DeleteMode, SyncOptions};
use crate::transfer::{self, TransferContext};
use nimbus_accounting::{BandwidthLimiter, SyncStats, TpsLimiter};
use nimbus_filter::Filter;
use nimbus_fs::{common_hash_kind, object_hash, path as opath, ObjectInfo, ObjectStore};
use nimbus_types::{Error, Result, RunId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PAIR_QUEUE: usize = 128;
const JOB_QUEUE: usize = 64;

/// The operation an engine run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Copy,
    Sync,
    Move,
}

/// One decision the checkers handed to the transfer pool
#[derive(Debug, Clone)]
struct TransferJob {
    src: ObjectInfo,
    dst: Option<ObjectInfo>,
}

/// Final accounting of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Identifier of the run
    pub run_id: RunId,
    /// Completed transfers
    pub transfers: u64,
    /// Server-side copies among the transfers
    pub server_copies: u64,
    /// Bytes moved
    pub bytes: u64,
    /// Pairs compared
    pub checks: u64,
    /// Objects deleted on the destination
    pub deletes: u64,
    /// Directories pruned on the destination
    pub deleted_dirs: u64,
    /// Directories created on the destination
    pub made_dirs: u64,
    /// Tracked renames
    pub renames: u64,
    /// Counted errors in the final attempt
    pub errors: u64,
    /// Low-level retries across all attempts
    pub retries: u64,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// Whether this was a dry run
    pub dry_run: bool,
}

/// The synchronization engine for one source/destination pair
#[derive(Debug)]
pub struct SyncEngine {
    src: Arc<dyn ObjectStore>,
    dst: Arc<dyn ObjectStore>,
    opts: SyncOptions,
    filter: Arc<Filter>,
    stats: Arc<SyncStats>,
    bandwidth: Option<Arc<BandwidthLimiter>>,
    tps: Option<Arc<TpsLimiter>>,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Create an engine over two store handles
    pub fn new(src: Arc<dyn ObjectStore>, dst: Arc<dyn ObjectStore>, opts: SyncOptions) -> Self {
        Self {
            src,
            dst,
            opts,
            filter: Arc::new(Filter::new()),
            stats: Arc::new(SyncStats::new()),
            bandwidth: None,
            tps: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Use this filter for both listings
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    /// Share an externally owned stats instance
    pub fn with_stats(mut self, stats: Arc<SyncStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Shape transfer bandwidth with this limiter
    pub fn with_bandwidth(mut self, limiter: Option<Arc<BandwidthLimiter>>) -> Self {
        self.bandwidth = limiter;
        self
    }

    /// Cap backend transactions per second
    pub fn with_tps(mut self, limiter: Option<Arc<TpsLimiter>>) -> Self {
        self.tps = limiter;
        self
    }

    /// Cancel the run through this token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The stats instance the run reports into
    pub fn stats(&self) -> Arc<SyncStats> {
        Arc::clone(&self.stats)
    }

    /// Add and update missing or changed objects on the destination
    pub async fn copy(&self) -> Result<SyncSummary> {
        self.run(Method::Copy).await
    }

    /// Make the destination identical to the source, including deletions
    pub async fn sync(&self) -> Result<SyncSummary> {
        self.run(Method::Sync).await
    }

    /// Copy everything to the destination, then remove it from the source
    pub async fn move_dir(&self) -> Result<SyncSummary> {
        self.run(Method::Move).await
    }

    async fn run(&self, method: Method) -> Result<SyncSummary> {
        let run_id = RunId::new_v4();
        let started = Instant::now();
        info!(
            %run_id,
            src = %self.src.name(),
            dst = %self.dst.name(),
            operation = ?method,
            dry_run = self.opts.dry_run,
            "starting run"
        );

        self.validate(method)?;

        if method == Method::Move && self.try_dir_move().await? {
            return Ok(self.summary(run_id, started));
        }

        let attempts = self.opts.retry.run_retries.max(1);
        let mut last_skipped_deletes = false;
        let mut last_error: Option<Error> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                info!(attempt, "rerunning after errors");
                self.stats.reset_errors();
            }
            match self.run_once(method).await {
                Ok(skipped_deletes) => {
                    last_skipped_deletes = skipped_deletes;
                    last_error = None;
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    self.stats.count_error(&err);
                    last_error = Some(err);
                }
            }
            if self.stats.is_fatal() {
                return Err(self
                    .stats
                    .fatal_error()
                    .unwrap_or_else(|| Error::other("fatal error")));
            }
            if self.stats.errors() == 0 || self.cancel.is_cancelled() {
                break;
            }
        }

        if self.stats.errors() > 0 {
            if last_skipped_deletes {
                return Err(Error::NotDeleting);
            }
            if let Some(err) = last_error {
                return Err(err);
            }
            return Err(Error::RunErrors {
                count: self.stats.errors(),
            });
        }

        let summary = self.summary(run_id, started);
        info!(
            transfers = summary.transfers,
            bytes = summary.bytes,
            deletes = summary.deletes,
            renames = summary.renames,
            elapsed = ?summary.duration,
            "run finished"
        );
        Ok(summary)
    }

    fn validate(&self, method: Method) -> Result<()> {
        if self.opts.no_traverse
            && method == Method::Sync
            && self.opts.delete_mode != DeleteMode::Off
        {
            return Err(Error::usage(
                "--no-traverse cannot be combined with deletions",
            ));
        }
        if self.opts.suffix.is_some() && self.opts.backup_dir.is_none() {
            return Err(Error::usage("--suffix requires --backup-dir"));
        }
        if self.opts.backup_dir.is_some() && !self.dst.features().server_side_move {
            return Err(Error::config(
                "--backup-dir requires a destination with server-side move",
            ));
        }
        if method == Method::Move && roots_overlap(self.src.as_ref(), self.dst.as_ref()) {
            return Err(Error::OverlappingRemotes {
                source_root: self.src.name(),
                destination: self.dst.name(),
            });
        }
        Ok(())
    }

    // Whole-tree server-side rename: possible when both handles share a
    // provider, nothing is filtered, and the destination is empty.
    async fn try_dir_move(&self) -> Result<bool> {
        if self.src.provider() != self.dst.provider() || !self.dst.features().dir_move {
            return Ok(false);
        }
        if !self.filter.is_empty() || self.opts.max_depth.is_some() || self.opts.dry_run {
            return Ok(false);
        }
        let dst_empty = match self.dst.list("").await {
            Ok(entries) => entries.is_empty(),
            Err(Error::DirNotFound { .. }) => true,
            Err(err) => return Err(err),
        };
        if !dst_empty {
            return Ok(false);
        }
        match self.dst.dir_move(self.src.as_ref(), "", "").await {
            Ok(()) => {
                info!("moved whole tree server-side");
                self.stats.inc_renames();
                Ok(true)
            }
            Err(Error::Unsupported { .. }) => Ok(false),
            Err(err) => {
                debug!(error = %err, "server-side directory move failed, using the pipeline");
                Ok(false)
            }
        }
    }

    async fn run_once(&self, method: Method) -> Result<bool> {
        let deleting = method == Method::Sync && self.opts.delete_mode != DeleteMode::Off;
        let delete_mode = if deleting {
            self.opts.delete_mode
        } else {
            DeleteMode::Off
        };

        // Destination-only objects the filter excludes are preserved, so the
        // destination listing is filtered too, unless delete-excluded turns
        // them into deletion candidates.
        let dst_filter = if self.opts.delete_excluded {
            Arc::new(Filter::new())
        } else {
            Arc::clone(&self.filter)
        };

        let src_fut = list_store(
            self.src.as_ref(),
            &self.filter,
            self.opts.fast_list,
            self.opts.max_depth,
        );
        let dst_fut = async {
            if self.opts.no_traverse {
                return Ok(Listing::default());
            }
            match list_store(
                self.dst.as_ref(),
                &dst_filter,
                self.opts.fast_list,
                self.opts.max_depth,
            )
            .await
            {
                // A destination that does not exist yet is just empty.
                Err(Error::DirNotFound { .. }) => Ok(Listing::default()),
                other => other,
            }
        };
        let (src_listing, dst_listing) = tokio::try_join!(src_fut, dst_fut)?;
        let Listing {
            objects: src_objects,
            dirs: src_dirs,
        } = src_listing;
        let Listing {
            objects: dst_objects,
            dirs: dst_dirs,
        } = dst_listing;

        let window = modify_window(self.src.as_ref(), self.dst.as_ref(), &self.opts.compare);
        let ctx = Arc::new(TransferContext {
            src: Arc::clone(&self.src),
            dst: Arc::clone(&self.dst),
            opts: self.opts.clone(),
            stats: Arc::clone(&self.stats),
            bandwidth: self.bandwidth.clone(),
            tps: self.tps.clone(),
            cancel: self.cancel.clone(),
        });

        if !self.opts.no_traverse {
            self.make_missing_dirs(&src_dirs, &dst_dirs).await;
        }

        let mut pairs = march(src_objects, dst_objects);
        if self.opts.track_renames && method == Method::Sync {
            pairs = self.apply_rename_tracking(pairs).await;
        }

        let skipped_deletes = Arc::new(AtomicBool::new(false));

        if delete_mode == DeleteMode::Before {
            let (dst_only, rest): (Vec<Pair>, Vec<Pair>) = pairs
                .into_iter()
                .partition(|pair| pair.kind() == PairKind::DstOnly);
            pairs = rest;
            if self.stats.errors() > 0 {
                skipped_deletes.store(true, Ordering::Relaxed);
            } else {
                for pair in dst_only {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if let Some(obj) = pair.dst {
                        delete_object(&ctx, &obj).await;
                    }
                }
            }
        }

        // Pipeline: producer -> checkers -> transferers (+ deleter).
        let (pair_tx, pair_rx) = mpsc::channel::<Pair>(PAIR_QUEUE);
        let (job_tx, job_rx) = mpsc::channel::<TransferJob>(JOB_QUEUE);
        let (del_tx, del_rx) = mpsc::channel::<ObjectInfo>(JOB_QUEUE);
        let pair_rx = Arc::new(TokioMutex::new(pair_rx));
        let job_rx = Arc::new(TokioMutex::new(job_rx));
        let deletes_after: Arc<StdMutex<Vec<ObjectInfo>>> = Arc::new(StdMutex::new(Vec::new()));

        let mut checker_handles = Vec::new();
        for _ in 0..self.opts.checkers.get() {
            let worker = CheckerWorker {
                ctx: Arc::clone(&ctx),
                method,
                window,
                probe_dst: self.opts.no_traverse,
                delete_mode,
                job_tx: job_tx.clone(),
                del_tx: del_tx.clone(),
                deletes_after: Arc::clone(&deletes_after),
            };
            let rx = Arc::clone(&pair_rx);
            checker_handles.push(tokio::spawn(worker.run(rx)));
        }
        drop(job_tx);
        drop(del_tx);

        let mut transfer_handles = Vec::new();
        for _ in 0..self.opts.transfers.get() {
            let ctx = Arc::clone(&ctx);
            let rx = Arc::clone(&job_rx);
            transfer_handles.push(tokio::spawn(run_transferer(ctx, method, rx)));
        }

        let deleter_handle = if delete_mode == DeleteMode::During {
            let ctx = Arc::clone(&ctx);
            let skipped = Arc::clone(&skipped_deletes);
            Some(tokio::spawn(run_deleter(ctx, del_rx, skipped)))
        } else {
            drop(del_rx);
            None
        };

        for pair in pairs {
            if self.cancel.is_cancelled() {
                break;
            }
            if pair_tx.send(pair).await.is_err() {
                break;
            }
        }
        drop(pair_tx);

        for handle in checker_handles {
            let _ = handle.await;
        }
        for handle in transfer_handles {
            let _ = handle.await;
        }
        if let Some(handle) = deleter_handle {
            let _ = handle.await;
        }

        if delete_mode == DeleteMode::After {
            let queued = std::mem::take(&mut *deletes_after.lock().unwrap());
            if !queued.is_empty() {
                if self.stats.errors() > 0 {
                    skipped_deletes.store(true, Ordering::Relaxed);
                } else {
                    for obj in queued {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        delete_object(&ctx, &obj).await;
                    }
                }
            }
        }

        let skipped = skipped_deletes.load(Ordering::Relaxed);
        if deleting && !skipped {
            self.prune_dirs(&ctx, &src_dirs, &dst_dirs).await;
        }

        if method == Method::Move && !self.opts.dry_run && self.stats.errors() == 0 {
            self.sweep_source_dirs(&src_dirs).await;
        }

        if self.cancel.is_cancelled() && self.stats.errors() == 0 {
            self.stats.count_error(&Error::Cancelled);
        }

        Ok(skipped)
    }

    // Replicate source directories so empty ones survive the sync.
    async fn make_missing_dirs(&self, src_dirs: &[String], dst_dirs: &[String]) {
        let existing: HashSet<&str> = dst_dirs.iter().map(String::as_str).collect();
        for dir in src_dirs {
            if existing.contains(dir.as_str()) {
                continue;
            }
            if self.opts.dry_run {
                debug!(dir = %dir, "not creating directory, dry run");
                self.stats.inc_made_dirs();
                continue;
            }
            match self.dst.mkdir(dir).await {
                Ok(()) => self.stats.inc_made_dirs(),
                Err(err) => {
                    warn!(dir = %dir, error = %err, "could not create directory");
                    self.stats.count_error(&err);
                }
            }
        }
    }

    // Replace copy-and-delete with a server-side move when a source-only
    // object's digest matches a destination-only object. Prerequisites
    // missing means the flag silently degrades.
    async fn apply_rename_tracking(&self, pairs: Vec<Pair>) -> Vec<Pair> {
        let Some(kind) = common_hash_kind(self.src.as_ref(), self.dst.as_ref()) else {
            debug!("rename tracking disabled: no common hash kind");
            return pairs;
        };
        if !self.dst.features().server_side_move {
            debug!("rename tracking disabled: destination cannot move server-side");
            return pairs;
        }

        let mut by_hash: HashMap<String, ObjectInfo> = HashMap::new();
        for pair in &pairs {
            if pair.kind() != PairKind::DstOnly {
                continue;
            }
            let Some(obj) = &pair.dst else { continue };
            match object_hash(self.dst.as_ref(), obj, kind).await {
                Ok(Some(digest)) => {
                    by_hash.entry(digest).or_insert_with(|| obj.clone());
                }
                Ok(None) => {}
                Err(err) => self.stats.count_error(&err),
            }
        }
        if by_hash.is_empty() {
            return pairs;
        }

        let mut renamed_from: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(pairs.len());
        for pair in pairs {
            if pair.kind() != PairKind::SrcOnly {
                out.push(pair);
                continue;
            }
            let src_obj = pair.src.as_ref().expect("source-only pair has a source");
            let digest = match object_hash(self.src.as_ref(), src_obj, kind).await {
                Ok(digest) => digest,
                Err(err) => {
                    self.stats.count_error(&err);
                    out.push(pair);
                    continue;
                }
            };
            let Some(old) = digest.and_then(|d| by_hash.remove(&d)) else {
                out.push(pair);
                continue;
            };

            if self.opts.dry_run {
                info!(from = %old.path, to = %pair.path, "not renaming, dry run");
                self.stats.inc_renames();
                renamed_from.insert(old.path);
                continue;
            }
            match self.dst.rename(&old.path, &pair.path).await {
                Ok(_) => {
                    debug!(from = %old.path, to = %pair.path, "renamed server-side");
                    self.stats.inc_renames();
                    renamed_from.insert(old.path);
                }
                Err(err) => {
                    warn!(from = %old.path, to = %pair.path, error = %err, "rename failed");
                    self.stats.count_error(&err);
                    out.push(pair);
                }
            }
        }

        // Renamed-away destination objects are no longer deletion candidates.
        out.retain(|pair| {
            !(pair.kind() == PairKind::DstOnly && renamed_from.contains(&pair.path))
        });
        out
    }

    // Remove destination directories that lost their purpose, deepest first.
    async fn prune_dirs(&self, ctx: &TransferContext, src_dirs: &[String], dst_dirs: &[String]) {
        let keep: HashSet<&str> = src_dirs.iter().map(String::as_str).collect();
        let mut candidates: Vec<&String> = dst_dirs
            .iter()
            .filter(|dir| !keep.contains(dir.as_str()))
            .collect();
        candidates.sort();
        candidates.reverse();

        for dir in candidates {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.opts.dry_run {
                debug!(dir = %dir, "not removing directory, dry run");
                self.stats.inc_deleted_dirs();
                continue;
            }
            ctx.tps_wait().await;
            match self.dst.rmdir(dir).await {
                Ok(()) => self.stats.inc_deleted_dirs(),
                Err(err) => debug!(dir = %dir, error = %err, "not removing directory"),
            }
        }
    }

    // After a move, clear out the emptied source tree.
    async fn sweep_source_dirs(&self, src_dirs: &[String]) {
        let mut dirs: Vec<&String> = src_dirs.iter().collect();
        dirs.sort();
        dirs.reverse();
        for dir in dirs {
            if let Err(err) = self.src.rmdir(dir).await {
                debug!(dir = %dir, error = %err, "not removing source directory");
            }
        }
    }

    fn summary(&self, run_id: RunId, started: Instant) -> SyncSummary {
        let snap = self.stats.snapshot();
        SyncSummary {
            run_id,
            transfers: snap.transfers,
            server_copies: snap.server_copies,
            bytes: snap.bytes,
            checks: snap.checks,
            deletes: snap.deletes,
            deleted_dirs: snap.deleted_dirs,
            made_dirs: snap.made_dirs,
            renames: snap.renames,
            errors: snap.errors,
            retries: snap.retries,
            duration: started.elapsed(),
            dry_run: self.opts.dry_run,
        }
    }
}

/// One comparison worker
struct CheckerWorker {
    ctx: Arc<TransferContext>,
    method: Method,
    window: Duration,
    probe_dst: bool,
    delete_mode: DeleteMode,
    job_tx: mpsc::Sender<TransferJob>,
    del_tx: mpsc::Sender<ObjectInfo>,
    deletes_after: Arc<StdMutex<Vec<ObjectInfo>>>,
}

impl CheckerWorker {
    async fn run(self, pair_rx: Arc<TokioMutex<mpsc::Receiver<Pair>>>) {
        loop {
            let pair = { pair_rx.lock().await.recv().await };
            let Some(pair) = pair else { break };
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            if self.check_pair(pair).await.is_err() {
                // The transfer channel closed underneath us: wind down.
                break;
            }
        }
    }

    async fn check_pair(&self, mut pair: Pair) -> std::result::Result<(), ()> {
        let ctx = &self.ctx;

        if self.probe_dst && pair.dst.is_none() {
            ctx.tps_wait().await;
            match ctx.dst.stat(&pair.path).await {
                Ok(obj) => pair.dst = Some(obj),
                Err(Error::NotFound { .. }) => {}
                Err(err) => {
                    ctx.stats.count_error(&err);
                    return Ok(());
                }
            }
        }

        match (pair.src, pair.dst) {
            (Some(src_obj), None) => {
                self.job_tx
                    .send(TransferJob {
                        src: src_obj,
                        dst: None,
                    })
                    .await
                    .map_err(|_| ())?;
            }
            (Some(src_obj), Some(dst_obj)) => {
                ctx.stats.inc_checks();
                let decision = needs_transfer(
                    ctx.src.as_ref(),
                    ctx.dst.as_ref(),
                    &src_obj,
                    &dst_obj,
                    &ctx.opts.compare,
                    self.window,
                )
                .await;
                match decision {
                    Ok(CompareResult::Transfer) => {
                        self.job_tx
                            .send(TransferJob {
                                src: src_obj,
                                dst: Some(dst_obj),
                            })
                            .await
                            .map_err(|_| ())?;
                    }
                    Ok(CompareResult::Skip) => {
                        debug!(path = %dst_obj.path, "unchanged, skipping");
                        ctx.stats.inc_skips();
                        // A move still consumes sources the destination
                        // already holds.
                        if self.method == Method::Move {
                            remove_moved_source(ctx, &src_obj.path).await;
                        }
                    }
                    Ok(CompareResult::UpdateModTime) => {
                        if ctx.opts.dry_run {
                            debug!(path = %dst_obj.path, "not updating modification time, dry run");
                        } else if let Err(err) =
                            transfer::update_mod_time(ctx, &dst_obj.path, src_obj.mod_time).await
                        {
                            ctx.stats.count_error(&err);
                        }
                        ctx.stats.inc_skips();
                        if self.method == Method::Move {
                            remove_moved_source(ctx, &src_obj.path).await;
                        }
                    }
                    Err(err) => {
                        ctx.stats.count_error(&err);
                        if err.is_fatal() {
                            ctx.cancel.cancel();
                        }
                    }
                }
            }
            (None, Some(dst_obj)) => match self.delete_mode {
                DeleteMode::Off | DeleteMode::Before => {}
                DeleteMode::During => {
                    self.del_tx.send(dst_obj).await.map_err(|_| ())?;
                }
                DeleteMode::After => {
                    self.deletes_after.lock().unwrap().push(dst_obj);
                }
            },
            (None, None) => {}
        }
        Ok(())
    }
}

async fn run_transferer(
    ctx: Arc<TransferContext>,
    method: Method,
    job_rx: Arc<TokioMutex<mpsc::Receiver<TransferJob>>>,
) {
    loop {
        let job = { job_rx.lock().await.recv().await };
        let Some(job) = job else { break };
        if ctx.cancel.is_cancelled() {
            break;
        }
        process_transfer(&ctx, method, job).await;
    }
}

async fn process_transfer(ctx: &TransferContext, method: Method, job: TransferJob) {
    let path = job.src.path.clone();

    if ctx.opts.dry_run {
        info!(path = %path, "not transferring, dry run");
        ctx.stats.inc_transfers();
        ctx.stats.add_bytes(job.src.size.unwrap_or(0));
        return;
    }

    // Preserve the object about to be overwritten.
    if job.dst.is_some() {
        if let Some(backup_dir) = ctx.opts.backup_dir.clone() {
            if let Err(err) = backup_object(ctx, &path, &backup_dir).await {
                warn!(path = %path, error = %err, "backup before overwrite failed");
                ctx.stats.count_error(&err);
                return;
            }
        }
    }

    let fut = transfer::transfer_object(ctx, &job.src);
    let result = match ctx.opts.timeouts.io_timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                seconds: limit.as_secs(),
            }),
        },
        None => fut.await,
    };

    match result {
        Ok(()) => {
            ctx.stats.inc_transfers();
            if method == Method::Move {
                remove_moved_source(ctx, &path).await;
            }
        }
        Err(err) => {
            warn!(path = %path, error = %err, "transfer failed");
            if err.is_fatal() {
                ctx.cancel.cancel();
            }
            ctx.stats.count_error(&err);
        }
    }
}

// A move owns its sources: once the destination holds the object, whether
// through a fresh transfer or because it was already identical, the source
// copy goes away.
async fn remove_moved_source(ctx: &TransferContext, path: &str) {
    if ctx.opts.dry_run {
        info!(path = %path, "not removing moved source, dry run");
        return;
    }
    ctx.tps_wait().await;
    if let Err(err) = ctx.src.remove(path).await {
        warn!(path = %path, error = %err, "could not remove moved source");
        ctx.stats.count_error(&err);
    }
}

async fn run_deleter(
    ctx: Arc<TransferContext>,
    mut del_rx: mpsc::Receiver<ObjectInfo>,
    skipped: Arc<AtomicBool>,
) {
    while let Some(obj) = del_rx.recv().await {
        if ctx.cancel.is_cancelled() {
            break;
        }
        if ctx.stats.errors() > 0 {
            skipped.store(true, Ordering::Relaxed);
            continue;
        }
        delete_object(&ctx, &obj).await;
    }
}

async fn delete_object(ctx: &TransferContext, obj: &ObjectInfo) {
    if ctx.opts.dry_run {
        info!(path = %obj.path, "not deleting, dry run");
        ctx.stats.inc_deletes();
        return;
    }
    let result = match ctx.opts.backup_dir.clone() {
        Some(backup_dir) => backup_object(ctx, &obj.path, &backup_dir).await,
        None => {
            ctx.tps_wait().await;
            ctx.dst.remove(&obj.path).await
        }
    };
    match result {
        Ok(()) => {
            debug!(path = %obj.path, "deleted");
            ctx.stats.inc_deletes();
        }
        Err(err) => {
            warn!(path = %obj.path, error = %err, "delete failed");
            ctx.stats.count_error(&err);
        }
    }
}

// Move a destination object into the backup directory, appending the
// configured suffix.
async fn backup_object(ctx: &TransferContext, path: &str, backup_dir: &str) -> Result<()> {
    let mut target = opath::join(backup_dir, path);
    if let Some(suffix) = &ctx.opts.suffix {
        target.push_str(suffix);
    }
    ctx.tps_wait().await;
    ctx.dst.rename(path, &target).await.map(|_| ())
}

// Two handles overlap when they share a provider and one root is a
// path-component prefix of the other.
fn roots_overlap(a: &dyn ObjectStore, b: &dyn ObjectStore) -> bool {
    if a.provider() != b.provider() {
        return false;
    }
    let a_parts: Vec<&str> = a.root().trim_end_matches('/').split('/').collect();
    let b_parts: Vec<&str> = b.root().trim_end_matches('/').split('/').collect();
    let prefix_len = a_parts.len().min(b_parts.len());
    a_parts[..prefix_len] == b_parts[..prefix_len]
}
