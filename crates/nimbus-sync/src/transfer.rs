//! The transfer primitive
//!
//! Moves one object from source to destination. Server-side copy is
//! preferred when both handles live on the same provider and the
//! destination supports it; otherwise the bytes are streamed through a
//! throttled, buffered reader. Every attempt is followed by size and hash
//! verification, and failed attempts are retried at low level with
//! backoff.

use crate::options::SyncOptions;
use nimbus_accounting::{BandwidthLimiter, SyncStats, ThrottledReader, TpsLimiter};
use nimbus_fs::{object_hash, ObjectInfo, ObjectStore, PutMeta};
use nimbus_types::{Error, Result};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::SystemTime;
use tokio::io::{AsyncRead, BufReader, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a transfer worker needs, shared across the run
#[derive(Debug)]
pub struct TransferContext {
    /// Source store
    pub src: Arc<dyn ObjectStore>,
    /// Destination store
    pub dst: Arc<dyn ObjectStore>,
    /// Per-run options
    pub opts: SyncOptions,
    /// Shared run counters
    pub stats: Arc<SyncStats>,
    /// Bandwidth limiter shared by all transfer workers
    pub bandwidth: Option<Arc<BandwidthLimiter>>,
    /// Transactions-per-second limiter
    pub tps: Option<Arc<TpsLimiter>>,
    /// Run-wide cancellation signal
    pub cancel: CancellationToken,
}

impl TransferContext {
    /// Block until the transactions-per-second limiter allows one more call
    pub async fn tps_wait(&self) {
        if let Some(tps) = &self.tps {
            tps.wait().await;
        }
    }
}

// Reader wrapper feeding per-file progress into the shared stats.
struct ProgressReader<R> {
    inner: R,
    stats: Arc<SyncStats>,
    path: String,
    read: u64,
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let n = (buf.filled().len() - before) as u64;
        if n > 0 {
            this.read += n;
            this.stats.update_transfer(&this.path, this.read);
        }
        Poll::Ready(Ok(()))
    }
}

/// Copy one object to the destination at the same path
///
/// Retries retryable failures up to the configured low-level retry count,
/// with backoff between attempts. Transferred bytes are accounted on the
/// shared stats; the caller counts the completed transfer itself.
pub async fn transfer_object(ctx: &TransferContext, src_obj: &ObjectInfo) -> Result<()> {
    ctx.stats.start_transfer(&src_obj.path, src_obj.size);
    let result = transfer_with_retries(ctx, src_obj).await;
    ctx.stats.end_transfer(&src_obj.path);
    result
}

async fn transfer_with_retries(ctx: &TransferContext, src_obj: &ObjectInfo) -> Result<()> {
    let attempts = ctx.opts.retry.low_level_retries.max(1);
    let mut attempt = 0;
    loop {
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
            outcome = attempt_transfer(ctx, src_obj) => outcome,
        };
        match outcome {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                warn!(
                    path = %src_obj.path,
                    attempt = attempt + 1,
                    error = %err,
                    "transfer attempt failed, retrying"
                );
                ctx.stats.inc_retries();
                tokio::time::sleep(ctx.opts.retry.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn attempt_transfer(ctx: &TransferContext, src_obj: &ObjectInfo) -> Result<()> {
    ctx.tps_wait().await;

    // Same provider and a capable destination: skip the byte stream.
    if ctx.src.provider() == ctx.dst.provider() && ctx.dst.features().server_side_copy {
        match ctx
            .dst
            .copy_from(ctx.src.as_ref(), src_obj, &src_obj.path)
            .await
        {
            Ok(Some(result)) => {
                verify_transfer(ctx, src_obj, &result).await?;
                ctx.stats.inc_server_copies();
                ctx.stats.add_bytes(result.size.or(src_obj.size).unwrap_or(0));
                debug!(path = %src_obj.path, "copied server-side");
                return Ok(());
            }
            Ok(None) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                debug!(path = %src_obj.path, error = %err, "server-side copy failed, streaming instead");
            }
        }
    }

    // A source that vanished between listing and transfer surfaces here as
    // NotFound, which is counted but never retried.
    let reader = ctx.src.open(&src_obj.path).await?;
    let throttled = ThrottledReader::new(reader, ctx.bandwidth.clone());
    let progress = ProgressReader {
        inner: throttled,
        stats: Arc::clone(&ctx.stats),
        path: src_obj.path.clone(),
        read: 0,
    };
    let mut buffered = BufReader::with_capacity(ctx.opts.buffer_size.get(), progress);

    let meta = PutMeta {
        size: src_obj.size,
        mod_time: src_obj.mod_time,
        hashes: src_obj.hashes.clone(),
    };
    let result = ctx.dst.put(&src_obj.path, &mut buffered, meta).await?;

    verify_transfer(ctx, src_obj, &result).await?;
    ctx.stats.add_bytes(result.size.unwrap_or(0));
    debug!(path = %src_obj.path, "transferred");
    Ok(())
}

// Post-transfer integrity check: sizes must agree unless sizes are ignored,
// and any digest kind common to both stores must match unless checksums are
// ignored. A failed check deletes the fresh destination object so a retry
// starts clean.
async fn verify_transfer(
    ctx: &TransferContext,
    src_obj: &ObjectInfo,
    dst_obj: &ObjectInfo,
) -> Result<()> {
    if !ctx.opts.compare.ignore_size {
        if let (Some(expected), Some(actual)) = (src_obj.size, dst_obj.size) {
            if expected != actual {
                remove_bad_copy(ctx, &dst_obj.path).await;
                return Err(Error::SizeMismatch {
                    path: src_obj.path.clone(),
                    expected,
                    actual,
                });
            }
        }
    }

    if ctx.opts.compare.ignore_checksum {
        return Ok(());
    }
    // Every hash kind both ends can produce must agree.
    for kind in ctx.src.hash_kinds().iter().copied() {
        if !ctx.dst.hash_kinds().contains(&kind) {
            continue;
        }
        let expected = object_hash(ctx.src.as_ref(), src_obj, kind).await?;
        let actual = object_hash(ctx.dst.as_ref(), dst_obj, kind).await?;
        if let (Some(expected), Some(actual)) = (expected, actual) {
            if expected != actual {
                remove_bad_copy(ctx, &dst_obj.path).await;
                return Err(Error::HashMismatch {
                    path: src_obj.path.clone(),
                    kind,
                    expected,
                    actual,
                });
            }
        }
    }
    Ok(())
}

async fn remove_bad_copy(ctx: &TransferContext, path: &str) {
    if let Err(err) = ctx.dst.remove(path).await {
        debug!(path, error = %err, "could not remove failed copy");
    }
}

/// Best-effort correction of a destination modification time
///
/// Used after an equality-by-hash skip. Stores without a modification time
/// setter are left alone.
pub async fn update_mod_time(
    ctx: &TransferContext,
    path: &str,
    mod_time: Option<SystemTime>,
) -> Result<()> {
    let Some(mod_time) = mod_time else {
        return Ok(());
    };
    if !ctx.dst.features().set_mod_time {
        debug!(path, "destination cannot set modification times, leaving as-is");
        return Ok(());
    }
    ctx.tps_wait().await;
    ctx.dst.set_mod_time(path, mod_time).await
}
