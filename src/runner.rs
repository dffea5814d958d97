//! Sequential run driver and its control surface.
//!
//! Exactly one background worker executes at a time; it owns the job list
//! and mapping table immutably and talks to the observer only through a
//! single-producer event channel. The observer polls the channel and never
//! blocks the worker; the worker never blocks on the observer.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;

use crate::error::{LipError, LipResult};
use crate::jobs::{build_jobs, find_audio_files};
use crate::keys::candidate_keys;
use crate::mapping::load_mappings;
use crate::model::{
    Job, MappingTable, ProgressEvent, RunConfig, RunReport, RunState, TextSource,
};
use crate::process::{check_generator_prereqs, supervise, GeneratorCommand, POLL_INTERVAL};

/// Size of the random sample reported by a mapping dry-run.
pub const DRY_RUN_SAMPLE_SIZE: usize = 10;

/// Longest transcript preview printed by the dry-run.
const PREVIEW_LIMIT: usize = 120;

/// Only one worker may run at a time; the generator does not tolerate
/// concurrent invocations against its shared data file.
static RUN_ACTIVE: AtomicBool = AtomicBool::new(false);

struct ActiveGuard;

impl ActiveGuard {
    fn acquire() -> LipResult<Self> {
        if RUN_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LipError::RunActive);
        }
        Ok(Self)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        RUN_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Control surface handed to the observer.
///
/// Pause and stop are level-triggered flags. Stop, once requested, is never
/// cleared for the remainder of the run and is safe to signal repeatedly.
pub struct RunHandle {
    stop: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    events: Receiver<ProgressEvent>,
    worker: Option<JoinHandle<RunReport>>,
}

impl RunHandle {
    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn request_resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Poll the event channel, waiting at most `timeout`.
    #[must_use]
    pub fn next_event(&self, timeout: Duration) -> Option<ProgressEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain whatever is queued without waiting.
    pub fn drain_events(&self) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .is_none_or(|worker| worker.is_finished())
    }

    /// Observable lifecycle state, derived from the control flags.
    #[must_use]
    pub fn state(&self) -> RunState {
        if self.is_finished() {
            RunState::Done
        } else if self.stop.load(Ordering::SeqCst) {
            RunState::StopRequested
        } else if self.pause.load(Ordering::SeqCst) {
            RunState::Paused
        } else {
            RunState::Running
        }
    }

    /// Wait for the worker and collect the final report.
    pub fn join(mut self) -> LipResult<RunReport> {
        let worker = self.worker.take().ok_or_else(|| {
            LipError::InvalidRequest("run handle already joined".to_owned())
        })?;
        worker
            .join()
            .map_err(|_| LipError::InvalidRequest("run worker panicked".to_owned()))
    }
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Validate, build the job list, and launch the run worker.
///
/// All input validation happens here, before any job runs: generator
/// prerequisites, folder existence, fixed-text/mapping usability, and every
/// sidecar lookup. The returned handle is the only way to observe or steer
/// the run.
pub fn start_run(config: RunConfig) -> LipResult<RunHandle> {
    let guard = ActiveGuard::acquire()?;
    let result = prepare_run(&config);
    let (jobs, _mapping) = match result {
        Ok(prepared) => prepared,
        Err(err) => {
            drop(guard);
            return Err(err);
        }
    };

    let command = GeneratorCommand::from_config(&config);
    let stop = Arc::new(AtomicBool::new(false));
    let pause = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();

    let worker_stop = Arc::clone(&stop);
    let worker_pause = Arc::clone(&pause);
    let worker = std::thread::spawn(move || {
        let _guard = guard;
        run_worker(&command, &jobs, &worker_stop, &worker_pause, &tx)
    });

    Ok(RunHandle {
        stop,
        pause,
        events: rx,
        worker: Some(worker),
    })
}

fn prepare_run(config: &RunConfig) -> LipResult<(Vec<Job>, Option<MappingTable>)> {
    check_generator_prereqs(config)?;
    let mapping = if config.text_source == TextSource::Mapping {
        Some(load_mappings(&config.mapping_files)?)
    } else {
        None
    };
    let jobs = build_jobs(config, mapping.as_ref())?;
    Ok((jobs, mapping))
}

fn run_worker(
    command: &GeneratorCommand,
    jobs: &[Job],
    stop: &AtomicBool,
    pause: &AtomicBool,
    tx: &mpsc::Sender<ProgressEvent>,
) -> RunReport {
    let started_at = Utc::now().to_rfc3339();
    let total = jobs.len();
    let mut ok = 0usize;
    let mut failed = 0usize;
    let mut canceled = false;

    for (idx, job) in jobs.iter().enumerate() {
        let n = idx + 1;

        if stop.load(Ordering::SeqCst) {
            send(tx, ProgressEvent::Log(format!("Stopped. Completed {idx}/{total}")));
            canceled = true;
            break;
        }

        // Pause gate between jobs; stop stays responsive while waiting.
        while pause.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
            std::thread::sleep(POLL_INTERVAL);
        }

        send(
            tx,
            ProgressEvent::Log(format!(
                "[{n}/{total}] {} → {}",
                job.source.path.display(),
                job.destination.display()
            )),
        );
        if !job.note.is_empty() {
            send(tx, ProgressEvent::Log(format!("  {}", job.note)));
        }

        let outcome = match supervise(command, job, stop, pause) {
            Ok(outcome) => outcome,
            Err(err) => {
                failed += 1;
                tracing::warn!(clip = %job.source.path.display(), error = %err, "launch failed");
                send(tx, ProgressEvent::Log(format!("  ERROR: {err}")));
                send(tx, ProgressEvent::Progress(n));
                continue;
            }
        };

        if outcome.canceled && stop.load(Ordering::SeqCst) {
            failed += 1;
            send(tx, ProgressEvent::Log("  Canceled (process terminated).".to_owned()));
            send(tx, ProgressEvent::Log(format!("Stopped. Completed {n}/{total}")));
            send(tx, ProgressEvent::Progress(n));
            canceled = true;
            break;
        }

        if outcome.succeeded && job.destination.exists() {
            ok += 1;
        } else {
            failed += 1;
        }

        let stdout = outcome.stdout.trim();
        if !stdout.is_empty() {
            send(tx, ProgressEvent::Log(format!("  {}", stdout.replace('\n', "\n  "))));
        }
        let stderr = outcome.stderr.trim();
        if !stderr.is_empty() {
            send(tx, ProgressEvent::Log(format!("  {}", stderr.replace('\n', "\n  "))));
        }
        send(tx, ProgressEvent::Progress(n));
    }

    send(
        tx,
        ProgressEvent::Done(format!("Finished. OK: {ok}, failed: {failed}")),
    );
    RunReport {
        total,
        succeeded: ok,
        failed,
        canceled,
        started_at_rfc3339: started_at,
        finished_at_rfc3339: Utc::now().to_rfc3339(),
    }
}

/// Launch a read-only mapping dry-run.
///
/// Reports, without starting any external process: mapping entry count,
/// matched/unmatched totals over every clip, and a bounded random sample
/// with per-clip detail. Matching semantics and candidate ordering are the
/// exact ones real runs use.
pub fn start_mapping_dry_run(
    input_dir: PathBuf,
    recursive: bool,
    mapping_files: Vec<PathBuf>,
) -> LipResult<RunHandle> {
    let guard = ActiveGuard::acquire()?;
    let table = match load_mappings(&mapping_files) {
        Ok(table) => table,
        Err(err) => {
            drop(guard);
            return Err(err);
        }
    };
    let records = match find_audio_files(&input_dir, recursive) {
        Ok(records) => records,
        Err(err) => {
            drop(guard);
            return Err(err);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let pause = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();

    let worker_stop = Arc::clone(&stop);
    let worker = std::thread::spawn(move || {
        let _guard = guard;
        dry_run_worker(&table, &records, &worker_stop, &tx)
    });

    Ok(RunHandle {
        stop,
        pause,
        events: rx,
        worker: Some(worker),
    })
}

fn dry_run_worker(
    table: &MappingTable,
    records: &[crate::model::AudioRecord],
    stop: &AtomicBool,
    tx: &mpsc::Sender<ProgressEvent>,
) -> RunReport {
    let started_at = Utc::now().to_rfc3339();
    let total = records.len();

    let lookup = |record: &crate::model::AudioRecord| -> Option<(String, String)> {
        for key in candidate_keys(&record.path) {
            if let Some(text) = table.lookup(&key) {
                let text = text.trim();
                if !text.is_empty() {
                    return Some((key, text.to_owned()));
                }
            }
        }
        None
    };

    let matched = records.iter().filter(|r| lookup(r).is_some()).count();
    let unmatched = total - matched;

    send(tx, ProgressEvent::Log(format!("Mapping entries: {}", table.len())));
    send(
        tx,
        ProgressEvent::Log(format!(
            "Clips found: {total} (matched: {matched}, unmatched: {unmatched})"
        )),
    );

    let sample_size = total.min(DRY_RUN_SAMPLE_SIZE);
    let sample: Vec<_> = records
        .choose_multiple(&mut rand::thread_rng(), sample_size)
        .cloned()
        .collect();
    send(
        tx,
        ProgressEvent::Log(format!("--- sample ({sample_size} random clips) ---")),
    );

    let mut canceled = false;
    for (idx, record) in sample.iter().enumerate() {
        let n = idx + 1;
        if stop.load(Ordering::SeqCst) {
            send(tx, ProgressEvent::Log("Canceled.".to_owned()));
            canceled = true;
            break;
        }

        let name = record
            .path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        match lookup(record) {
            Some((key, text)) => {
                send(
                    tx,
                    ProgressEvent::Log(format!("[{n}/{sample_size}] OK   {name}  (key: {key})")),
                );
                send(tx, ProgressEvent::Log(format!("        → {}", preview(&text))));
            }
            None => {
                let keys = candidate_keys(&record.path).join(", ");
                send(
                    tx,
                    ProgressEvent::Log(format!("[{n}/{sample_size}] MISS {name}  (keys: {keys})")),
                );
            }
        }
        send(tx, ProgressEvent::Progress(n));
    }

    send(tx, ProgressEvent::Done("Mapping test finished.".to_owned()));
    RunReport {
        total,
        succeeded: matched,
        failed: unmatched,
        canceled,
        started_at_rfc3339: started_at,
        finished_at_rfc3339: Utc::now().to_rfc3339(),
    }
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ").trim().to_owned();
    if flat.chars().count() > PREVIEW_LIMIT {
        let cut: String = flat.chars().take(PREVIEW_LIMIT - 3).collect();
        return format!("{cut}...");
    }
    flat
}

/// The worker never blocks on the observer; a departed observer just drops
/// events.
fn send(tx: &mpsc::Sender<ProgressEvent>, event: ProgressEvent) {
    let _ = tx.send(event);
}
