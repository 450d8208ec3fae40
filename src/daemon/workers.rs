//! Background work owned by the daemon.
//!
//! Stats generation and user-file backups run on fixed periods; autosnatch
//! runs once when the daemon comes up. Every worker listens on the daemon's
//! shutdown broadcast. Collaborator calls block, so they go through
//! `spawn_blocking`; shutdown abandons a run in progress and leaves its
//! command to [`Collaborators::terminate_running`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::DaemonSettings;
use crate::collaborators::{CollaboratorError, Collaborators};

type Job = fn(&dyn Collaborators) -> Result<(), CollaboratorError>;

/// The running workers, by name.
pub struct WorkerSet {
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl WorkerSet {
    /// Spawns the workers enabled by `settings`.
    pub fn spawn(
        settings: &DaemonSettings,
        collaborators: Arc<dyn Collaborators>,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let mut workers = Vec::new();

        let schedules: [(&'static str, Duration, Job); 2] = [
            ("stats", settings.stats_interval, |c| c.generate_stats()),
            ("backup", settings.backup_interval, |c| c.archive_user_files()),
        ];
        for (name, period, job) in schedules {
            if period.is_zero() {
                debug!(worker = name, "worker disabled");
                continue;
            }
            let task = scheduled(
                name,
                period,
                job,
                Arc::clone(&collaborators),
                shutdown.subscribe(),
            );
            workers.push((name, tokio::spawn(task)));
        }

        if settings.autosnatch {
            let task = once(
                "autosnatch",
                |c| c.autosnatch(),
                Arc::clone(&collaborators),
                shutdown.subscribe(),
            );
            workers.push(("autosnatch", tokio::spawn(task)));
        }

        Self { workers }
    }

    pub fn names(&self) -> Vec<String> {
        self.workers
            .iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Waits for every worker to return.
    pub async fn join(self) {
        for (name, handle) in self.workers {
            if let Err(e) = handle.await {
                warn!(worker = name, error = %e, "worker ended abnormally");
            }
        }
    }
}

/// Runs `job` every `period`, skipping the immediate first tick.
async fn scheduled(
    name: &'static str,
    period: Duration,
    job: Job,
    collaborators: Arc<dyn Collaborators>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    info!(worker = name, period = %humantime::format_duration(period), "worker scheduled");
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => break,
        }
        tokio::select! {
            _ = run_job(name, job, &collaborators) => {}
            _ = shutdown.recv() => {
                debug!(worker = name, "run abandoned");
                break;
            }
        }
    }
    debug!(worker = name, "worker stopped");
}

/// Runs `job` once unless shutdown comes first.
async fn once(
    name: &'static str,
    job: Job,
    collaborators: Arc<dyn Collaborators>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::select! {
        _ = run_job(name, job, &collaborators) => {}
        _ = shutdown.recv() => debug!(worker = name, "worker cancelled"),
    }
}

async fn run_job(name: &'static str, job: Job, collaborators: &Arc<dyn Collaborators>) {
    let collaborators = Arc::clone(collaborators);
    match tokio::task::spawn_blocking(move || job(collaborators.as_ref())).await {
        Ok(Ok(())) => info!(worker = name, "run completed"),
        Ok(Err(e)) => error!(worker = name, error = %e, "run failed"),
        Err(e) => error!(worker = name, error = %e, "run panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::tests::Recording;
    use std::path::PathBuf;

    fn settings(stats: u64, backup: u64, autosnatch: bool) -> DaemonSettings {
        DaemonSettings {
            socket_path: PathBuf::from("/unused.sock"),
            pid_path: PathBuf::from("/unused.pid"),
            log_file: PathBuf::from("/unused.log"),
            log_level: "info".to_string(),
            stats_interval: Duration::from_millis(stats),
            backup_interval: Duration::from_millis(backup),
            autosnatch,
        }
    }

    #[tokio::test]
    async fn zero_intervals_disable_workers() {
        let (tx, _rx) = broadcast::channel(1);
        let workers = WorkerSet::spawn(
            &settings(0, 0, false),
            Arc::new(Recording::default()),
            &tx,
        );
        assert!(workers.names().is_empty());
        workers.join().await;
    }

    #[tokio::test]
    async fn names_follow_settings() {
        let (tx, _rx) = broadcast::channel(1);
        let workers = WorkerSet::spawn(
            &settings(60_000, 60_000, true),
            Arc::new(Recording::default()),
            &tx,
        );
        assert_eq!(workers.names(), vec!["stats", "backup", "autosnatch"]);
        tx.send(()).unwrap();
        workers.join().await;
    }

    #[tokio::test]
    async fn stats_runs_periodically_until_shutdown() {
        let recording = Arc::new(Recording::default());
        let (tx, _rx) = broadcast::channel(1);
        let workers = WorkerSet::spawn(&settings(20, 0, false), recording.clone(), &tx);

        tokio::time::sleep(Duration::from_millis(150)).await;
        tx.send(()).unwrap();
        workers.join().await;

        let runs = recording.count("generate_stats");
        assert!(runs >= 2, "expected repeated runs, got {runs}");
        let after = recording.count("generate_stats");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(recording.count("generate_stats"), after);
        assert_eq!(recording.count("archive_user_files"), 0);
    }

    #[tokio::test]
    async fn first_tick_is_skipped() {
        let recording = Arc::new(Recording::default());
        let (tx, _rx) = broadcast::channel(1);
        let workers = WorkerSet::spawn(&settings(0, 60_000, false), recording.clone(), &tx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        workers.join().await;
        assert_eq!(recording.count("archive_user_files"), 0);
    }

    #[tokio::test]
    async fn autosnatch_runs_once() {
        let recording = Arc::new(Recording::default());
        let (tx, _rx) = broadcast::channel(1);
        let workers = WorkerSet::spawn(&settings(0, 0, true), recording.clone(), &tx);
        workers.join().await;
        assert_eq!(recording.count("autosnatch"), 1);
        drop(tx);
    }

    #[tokio::test]
    async fn failing_job_keeps_the_worker_alive() {
        let recording = Arc::new(Recording::failing());
        let (tx, _rx) = broadcast::channel(1);
        let workers = WorkerSet::spawn(&settings(20, 0, false), recording.clone(), &tx);

        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.send(()).unwrap();
        workers.join().await;
        assert!(recording.count("generate_stats") >= 2);
    }

    #[tokio::test]
    async fn shutdown_does_not_wait_for_a_running_job() {
        let recording = Arc::new(Recording::slow(Duration::from_secs(2)));
        let (tx, _rx) = broadcast::channel(1);
        let workers = WorkerSet::spawn(&settings(20, 0, false), recording.clone(), &tx);

        while recording.count("generate_stats") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_millis(500), workers.join())
            .await
            .expect("workers waited for the job");
        assert_eq!(recording.count("generate_stats"), 1);
    }
}
