use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use futures::future::join_all;
use log::{debug, info};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::models::{Outcome, PortRange, Protocol, ScanReport, TransportMode};
use crate::probe::Probe;
use crate::queue::TaskQueue;

/// Default number of concurrent workers, independent of range size.
pub const DEFAULT_WORKERS: usize = 50;

/// Scan coordinator: owns the task queue and the result collection for the
/// lifetime of one scan, launches the worker pool, and hands a finished
/// [`ScanReport`] to the reporting collaborators.
pub struct Scanner {
    /// Target as given by the user, kept for reporting.
    target: String,
    /// Resolved target address (resolution happens in the caller).
    target_ip: IpAddr,
    protocol: Protocol,
    ports: PortRange,
    transport: TransportMode,
    worker_count: usize,
    /// Bound for each individual probe; no worker blocks longer than this
    /// per port.
    probe_timeout: Duration,
}

impl Scanner {
    /// Validate the scan configuration. Setup problems are fatal and are
    /// surfaced here, before any worker is launched.
    pub fn new(
        target: impl Into<String>,
        target_ip: IpAddr,
        protocol: Protocol,
        ports: PortRange,
        transport: TransportMode,
        worker_count: usize,
        probe_timeout: Duration,
    ) -> Result<Self> {
        if worker_count == 0 {
            bail!("worker count must be at least 1");
        }
        if probe_timeout.is_zero() {
            bail!("probe timeout must be positive");
        }
        Ok(Self {
            target: target.into(),
            target_ip,
            protocol,
            ports,
            transport,
            worker_count,
            probe_timeout,
        })
    }

    /// Run one full pass over the port range.
    ///
    /// Every port is dequeued and probed exactly once; per-port failures are
    /// contained in their outcome and never abort the pass. The report is
    /// assembled only after both every worker has exited and the queue's
    /// drain signal has fired; a worker can still be mid-probe when the
    /// backlog empties, so both conditions are required.
    pub async fn run_scan(&self) -> Result<ScanReport> {
        info!(
            "Scanning {} ({}) ports {} over {} [{}], {} workers",
            self.target, self.target_ip, self.ports, self.protocol, self.transport, self.worker_count
        );

        let queue = Arc::new(TaskQueue::from_range(self.ports));
        let results = Arc::new(Mutex::new(HashMap::<u16, Outcome>::with_capacity(
            self.ports.len(),
        )));
        let probe = Probe::new(self.protocol, &self.transport, self.probe_timeout);

        let start_time = Utc::now();
        let started = Instant::now();

        let mut workers = Vec::with_capacity(self.worker_count);
        for worker_id in 0..self.worker_count {
            let queue = queue.clone();
            let results = results.clone();
            let probe = probe.clone();
            let target_ip = self.target_ip;

            workers.push(tokio::spawn(async move {
                while let Some(port) = queue.pop() {
                    let outcome = probe.check(SocketAddr::new(target_ip, port)).await;
                    results.lock().await.insert(port, outcome);
                    queue.mark_processed();
                }
                debug!("worker {} exiting, queue exhausted", worker_id);
            }));
        }

        // Pool-finished condition: all workers exited AND the queue drained.
        // A panicked worker never calls mark_processed, so its JoinError must
        // abort the scan here instead of letting wait_drained hang.
        join_workers(workers).await?;
        queue.wait_drained().await;

        let elapsed = started.elapsed();
        let end_time = Utc::now();
        info!(
            "Scan of {} ports finished in {:.2}s",
            self.ports.len(),
            elapsed.as_secs_f64()
        );

        // Workers are joined, so this lock is uncontended.
        let results = std::mem::take(&mut *results.lock().await);
        debug_assert_eq!(results.len(), self.ports.len());

        Ok(ScanReport::new(
            self.target.clone(),
            self.target_ip,
            self.protocol,
            results,
            start_time,
            end_time,
            elapsed,
        ))
    }
}

/// Join the whole pool, surfacing the first worker panic or cancellation as
/// a fatal scan error.
async fn join_workers(workers: Vec<JoinHandle<()>>) -> Result<()> {
    for joined in join_all(workers).await {
        joined.map_err(|e| anyhow!("scan worker failed: {e}"))?;
    }
    Ok(())
}
