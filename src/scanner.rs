use std::sync::Arc;
use std::time::Duration;

use alloy::sol_types::SolEvent;
use alloy_primitives::Address;
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::accumulator::{BalanceAccumulator, BalanceMap};
use crate::chunker::{BlockRange, DEFAULT_CHUNK_SIZE, chunks};
use crate::error::{ScanError, ScanResult};
use crate::events::{Transfer, decode_transfer_event};
use crate::ledger::{LedgerClient, LogFilter};
use crate::registry::TokenRegistry;

const DEFAULT_WORKERS: usize = 4;
const RATE_LIMIT_DELAY_MS: u64 = 15; // keeps a 4 worker pool under typical hosted-node rate limits

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub chunk_size: u64,
    pub workers: usize,
    /// Pause after each chunk's log fetch. Zero disables it.
    pub request_delay: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            request_delay: Duration::from_millis(RATE_LIMIT_DELAY_MS),
        }
    }
}

/// One chunk of work, handed to exactly one worker.
#[derive(Debug, Clone, Copy)]
pub struct Job {
    pub range: BlockRange,
    pub address: Address,
}

type Completion = ScanResult<BlockRange>;

/// Scans `[0, to_block]` for Transfer logs of every tracked token with a fixed worker pool.
///
/// The first failing chunk aborts the scan: remaining workers finish the job in hand and stop,
/// and the coordinator waits for all of them before returning the error.
pub struct ScanCoordinator<C> {
    client: Arc<C>,
    registry: Arc<TokenRegistry>,
    config: ScanConfig,
}

impl<C: LedgerClient + 'static> ScanCoordinator<C> {
    pub fn new(client: Arc<C>, registry: Arc<TokenRegistry>, config: ScanConfig) -> Self {
        Self {
            client,
            registry,
            config,
        }
    }

    pub async fn scan(
        &self,
        cancel: &CancellationToken,
        address: Address,
        to_block: u64,
    ) -> ScanResult<BalanceMap> {
        let accumulator = Arc::new(BalanceAccumulator::new());
        self.scan_into(cancel, address, to_block, accumulator.clone())
            .await?;

        let balances = accumulator.snapshot();
        balances.warn_negative(address, to_block);
        Ok(balances)
    }

    /// Like [`Self::scan`], applying transfers to a caller-owned accumulator. On error the
    /// accumulator holds partial sums and must be discarded.
    pub async fn scan_into(
        &self,
        cancel: &CancellationToken,
        address: Address,
        to_block: u64,
        accumulator: Arc<BalanceAccumulator>,
    ) -> ScanResult<()> {
        if self.config.workers == 0 {
            return Err(ScanError::WorkerPool("worker pool size must be positive".into()));
        }

        let ranges = chunks(0, to_block, self.config.chunk_size)?;
        if self.registry.is_empty() {
            // an empty address list would match every contract on the chain
            info!("No tracked tokens, skipping log scan for {}", address);
            return Ok(());
        }
        let total = ranges.len();
        info!(
            "Scanning blocks 0 to {} for {} in {} chunks with {} workers",
            to_block, address, total, self.config.workers
        );

        let shutdown = cancel.child_token();
        let (job_tx, job_rx) = mpsc::channel::<Job>(self.config.workers);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(self.config.workers);
        let addresses: Arc<[Address]> = self.registry.addresses().into();

        let tracker = TaskTracker::new();

        // the pool is up before the first job is sent
        for id in 1..=self.config.workers {
            let worker = Worker {
                id,
                client: self.client.clone(),
                registry: self.registry.clone(),
                addresses: addresses.clone(),
                accumulator: accumulator.clone(),
                request_delay: self.config.request_delay,
                cancel: cancel.clone(),
                shutdown: shutdown.clone(),
            };
            tracker.spawn(worker.run(job_rx.clone(), done_tx.clone()));
        }
        drop(done_tx);
        drop(job_rx);

        tracker.spawn(dispatch(ranges, address, job_tx, shutdown.clone()));
        tracker.close();

        let outcome = collect(total, cancel, &mut done_rx).await;

        if let Err(e) = &outcome {
            error!("Scan aborted: {}", e);
            shutdown.cancel();
            info!("Waiting for in-flight workers to finish before returning");
        }
        // late completions are dropped instead of blocking a worker on a full channel
        done_rx.close();
        tracker.wait().await;

        if outcome.is_ok() {
            info!("Scan of {} chunks completed", total);
        }
        outcome
    }
}

async fn dispatch(
    ranges: Vec<BlockRange>,
    address: Address,
    jobs: mpsc::Sender<Job>,
    shutdown: CancellationToken,
) {
    for range in ranges {
        let job = Job { range, address };
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Dispatch stopped before block {}", range.start);
                return;
            }
            sent = jobs.send(job) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
    debug!("All jobs sent");
}

/// Consumes one signal per dispatched job, returning on the first error.
async fn collect(
    total: usize,
    cancel: &CancellationToken,
    done: &mut mpsc::Receiver<Completion>,
) -> ScanResult<()> {
    let mut completed = 0;

    while completed < total {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            signal = done.recv() => match signal {
                Some(Ok(range)) => {
                    completed += 1;
                    debug!("Chunk {} done ({}/{})", range, completed, total);
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(ScanError::WorkerPool(format!(
                        "workers exited after {completed} of {total} chunks"
                    )));
                }
            }
        }
    }

    Ok(())
}

struct Worker<C> {
    id: usize,
    client: Arc<C>,
    registry: Arc<TokenRegistry>,
    addresses: Arc<[Address]>,
    accumulator: Arc<BalanceAccumulator>,
    request_delay: Duration,
    /// Caller cancellation, also aborts the remote call in flight.
    cancel: CancellationToken,
    /// Set when another chunk failed.
    shutdown: CancellationToken,
}

impl<C: LedgerClient> Worker<C> {
    async fn run(self, jobs: Arc<Mutex<mpsc::Receiver<Job>>>, done: mpsc::Sender<Completion>) {
        debug!("Worker {} ready", self.id);

        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                job = async { jobs.lock().await.recv().await } => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            // the job in hand is finished even when a shutdown arrives meanwhile
            let shutting_down = self.shutdown.is_cancelled();

            match self.process(&job).await {
                Ok(()) => {
                    if done.send(Ok(job.range)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Worker {} failed on {}: {}", self.id, job.range, e);
                    let _ = done.send(Err(e)).await;
                    break;
                }
            }

            if shutting_down {
                info!("Gracefully shutting down worker {}", self.id);
                break;
            }
        }

        debug!("Worker {} exited", self.id);
    }

    async fn process(&self, job: &Job) -> ScanResult<()> {
        let filter = LogFilter::new(
            self.addresses.to_vec(),
            job.range,
            vec![Transfer::SIGNATURE_HASH],
        );

        let logs = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ScanError::Cancelled),
            logs = self.client.filter_logs(&filter) => logs.map_err(|source| ScanError::LedgerQuery {
                range: Some(job.range),
                source,
            })?,
        };
        debug!("Worker {} received {} logs for {}", self.id, logs.len(), job.range);

        for log in &logs {
            if let Some(block) = log.block_number.filter(|block| !job.range.contains(*block)) {
                // the chunk owning that block counts it
                warn!("Log from block {} returned for {}, skipping", block, job.range);
                continue;
            }

            let contract = log.address();
            let Some(symbol) = self.registry.symbol(&contract) else {
                warn!("No token mapped to contract {}, skipping log", contract);
                continue;
            };

            let event = decode_transfer_event(log)?;
            self.accumulator.apply_transfer(symbol, &event, job.address)?;
        }

        if !self.request_delay.is_zero() {
            sleep(self.request_delay).await;
        }

        Ok(())
    }
}
