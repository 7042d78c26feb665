//! Inference job scheduling
//!
//! All inference, interactive or batch, is serialized through a single
//! dispatch worker that owns the [`InferenceGateway`]. Submission never
//! blocks the caller; completion is delivered on a per-job channel when
//! the job reaches a terminal state.

use crate::error::SegmentationError;
use crate::gateway::InferenceGateway;
use crate::mask::MaskCandidate;
use crate::prompt::Prompt;
use chrono::{DateTime, Utc};
use image::RgbImage;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where a job was submitted from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrigin {
    Interactive,
    Batch,
}

/// Job state machine: `Queued -> Running -> {Done, Cancelled, Failed}`.
/// Transitions are monotonic; terminal states never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

/// Terminal result of a job, delivered exactly once per submission.
///
/// Cancellation is a distinct terminal state, not an error: a cancelled
/// job's inference result (if any) has been discarded.
#[derive(Debug)]
pub enum JobOutcome {
    Done(Vec<MaskCandidate>),
    Cancelled,
    Failed(SegmentationError),
}

/// Status shared between a job handle and the dispatch worker
struct JobShared {
    status: RwLock<JobStatus>,
    cancel_requested: AtomicBool,
}

impl JobShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            status: RwLock::new(JobStatus::Queued),
            cancel_requested: AtomicBool::new(false),
        })
    }

    fn status(&self) -> JobStatus {
        *self.status.read()
    }

    /// Advance the state machine; refuses to leave a terminal state or
    /// to move backwards. Returns whether the transition was applied.
    fn advance(&self, next: JobStatus) -> bool {
        let mut status = self.status.write();
        let allowed = matches!(
            (*status, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Failed)
        );
        if allowed {
            *status = next;
        }
        allowed
    }

    /// Best-effort cooperative cancellation: a queued job is cancelled
    /// immediately, a running job finishes its gateway call and has its
    /// result discarded.
    fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.advance(JobStatus::Cancelled);
    }

    fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

/// One submitted inference request, owned by the scheduler until it
/// reaches a terminal state and its outcome has been delivered.
pub struct InferenceJob {
    pub id: Uuid,
    pub origin: JobOrigin,
    pub submitted_at: DateTime<Utc>,
    image: Arc<RgbImage>,
    prompt: Prompt,
    shared: Arc<JobShared>,
    outcome_tx: oneshot::Sender<JobOutcome>,
}

/// Caller-side view of a submitted job
pub struct JobHandle {
    id: Uuid,
    origin: JobOrigin,
    shared: Arc<JobShared>,
    outcome_rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn origin(&self) -> JobOrigin {
        self.origin
    }

    pub fn status(&self) -> JobStatus {
        self.shared.status()
    }

    /// Request cancellation. Queued jobs transition to `Cancelled`
    /// directly; a running job's in-flight gateway call is allowed to
    /// finish and its result is discarded.
    pub fn cancel(&self) {
        self.shared.request_cancel();
    }

    /// Await the terminal outcome. Consumes the handle: an outcome is
    /// delivered exactly once.
    pub async fn wait(self) -> JobOutcome {
        match self.outcome_rx.await {
            Ok(outcome) => outcome,
            Err(_) => JobOutcome::Failed(SegmentationError::Model(
                "Scheduler worker stopped before delivering a result".to_string(),
            )),
        }
    }
}

struct JobQueues {
    interactive: VecDeque<InferenceJob>,
    batch: VecDeque<InferenceJob>,
    closed: bool,
}

struct QueueState {
    queues: Mutex<JobQueues>,
    available: Condvar,
}

/// Serializes all access to the inference gateway.
///
/// Interactive submissions take priority over still-queued batch jobs;
/// among batch jobs order is strictly FIFO. A running job, batch or
/// interactive, is never preempted. The dispatch worker runs on a
/// dedicated blocking thread, so a long gateway call never stalls the
/// async runtime. A stuck gateway call blocks only that thread: no
/// watchdog is imposed (accepted single-resource limitation).
pub struct InferenceScheduler {
    state: Arc<QueueState>,
    current_interactive: Mutex<Option<Arc<JobShared>>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl InferenceScheduler {
    /// Create the scheduler and spawn its dispatch worker, which takes
    /// sole ownership of the gateway.
    pub fn new(gateway: InferenceGateway) -> Self {
        let state = Arc::new(QueueState {
            queues: Mutex::new(JobQueues {
                interactive: VecDeque::new(),
                batch: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        });

        let worker_state = state.clone();
        let worker = tokio::task::spawn_blocking(move || {
            dispatch_loop(gateway, worker_state);
        });

        Self {
            state,
            current_interactive: Mutex::new(None),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Submit an interactive job. Any previously tracked interactive
    /// job that is not yet terminal is cancelled first; the new job is
    /// queued ahead of all pending batch work. Returns immediately.
    pub fn submit_interactive(&self, image: Arc<RgbImage>, prompt: Prompt) -> JobHandle {
        {
            let mut current = self.current_interactive.lock();
            if let Some(previous) = current.as_ref() {
                if !previous.status().is_terminal() {
                    debug!("New interactive submission cancels the previous job");
                    previous.request_cancel();
                }
            }
            *current = None;
        }

        let (job, handle) = self.make_job(image, prompt, JobOrigin::Interactive);
        *self.current_interactive.lock() = Some(handle.shared.clone());

        self.enqueue(job);
        handle
    }

    /// Submit a batch job at the tail of the batch sequence. Batch jobs
    /// are never cancelled by interactive activity, only delayed.
    pub fn submit_batch(&self, image: Arc<RgbImage>, prompt: Prompt) -> JobHandle {
        let (job, handle) = self.make_job(image, prompt, JobOrigin::Batch);
        self.enqueue(job);
        handle
    }

    /// Cancel a job through the scheduler (equivalent to
    /// [`JobHandle::cancel`]).
    pub fn cancel(&self, handle: &JobHandle) {
        handle.cancel();
    }

    /// Close the queues and wait for the worker to drain and exit.
    pub async fn shutdown(&self) {
        {
            let mut queues = self.state.queues.lock();
            queues.closed = true;
        }
        self.state.available.notify_all();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Scheduler worker task ended abnormally: {}", e);
            }
        }
    }

    fn make_job(
        &self,
        image: Arc<RgbImage>,
        prompt: Prompt,
        origin: JobOrigin,
    ) -> (InferenceJob, JobHandle) {
        let id = Uuid::new_v4();
        let shared = JobShared::new();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let job = InferenceJob {
            id,
            origin,
            submitted_at: Utc::now(),
            image,
            prompt,
            shared: shared.clone(),
            outcome_tx,
        };
        let handle = JobHandle {
            id,
            origin,
            shared,
            outcome_rx,
        };
        (job, handle)
    }

    fn enqueue(&self, job: InferenceJob) {
        let mut queues = self.state.queues.lock();
        if queues.closed {
            drop(queues);
            warn!("Job {} submitted after shutdown, marking failed", job.id);
            let _ = job.outcome_tx.send(JobOutcome::Failed(SegmentationError::Model(
                "Scheduler is shut down".to_string(),
            )));
            return;
        }
        debug!("Queued {:?} job {}", job.origin, job.id);
        match job.origin {
            JobOrigin::Interactive => queues.interactive.push_back(job),
            JobOrigin::Batch => queues.batch.push_back(job),
        }
        drop(queues);
        self.state.available.notify_one();
    }
}

/// The only place in the system that invokes `InferenceGateway::run`.
/// Runs on its own blocking thread; the gateway call may take seconds.
fn dispatch_loop(mut gateway: InferenceGateway, state: Arc<QueueState>) {
    loop {
        let next = {
            let mut queues = state.queues.lock();
            loop {
                // Queued interactive jobs always dispatch first
                if let Some(job) = queues.interactive.pop_front() {
                    break Some(job);
                }
                if let Some(job) = queues.batch.pop_front() {
                    break Some(job);
                }
                if queues.closed {
                    break None;
                }
                state.available.wait(&mut queues);
            }
        };

        match next {
            Some(job) => run_job(&mut gateway, job),
            None => break,
        }
    }
    info!("Scheduler dispatch worker stopped");
}

fn run_job(gateway: &mut InferenceGateway, job: InferenceJob) {
    // Cancelled while still queued: deliver without touching the model
    if !job.shared.advance(JobStatus::Running) {
        debug!("Job {} cancelled before dispatch", job.id);
        let _ = job.outcome_tx.send(JobOutcome::Cancelled);
        return;
    }

    info!("Running {:?} job {}", job.origin, job.id);
    let result = gateway.run(&job.image, &job.prompt);

    // Cooperative cancellation: the call already ran, its result is
    // discarded rather than delivered
    if job.shared.cancel_requested() {
        job.shared.advance(JobStatus::Cancelled);
        debug!("Job {} cancelled mid-flight, result discarded", job.id);
        let _ = job.outcome_tx.send(JobOutcome::Cancelled);
        return;
    }

    match result {
        Ok(candidates) => {
            job.shared.advance(JobStatus::Done);
            debug!(
                "Job {} done with {} candidates",
                job.id,
                candidates.len()
            );
            let _ = job.outcome_tx.send(JobOutcome::Done(candidates));
        }
        Err(e) => {
            job.shared.advance(JobStatus::Failed);
            warn!("Job {} failed: {}", job.id, e);
            let _ = job.outcome_tx.send(JobOutcome::Failed(e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal_classification() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_transitions_monotonic() {
        let shared = JobShared::new();
        assert_eq!(shared.status(), JobStatus::Queued);

        assert!(shared.advance(JobStatus::Running));
        assert!(shared.advance(JobStatus::Done));

        // Terminal states never revert
        assert!(!shared.advance(JobStatus::Running));
        assert!(!shared.advance(JobStatus::Cancelled));
        assert!(!shared.advance(JobStatus::Failed));
        assert_eq!(shared.status(), JobStatus::Done);
    }

    #[test]
    fn test_cancel_of_queued_job_is_immediate() {
        let shared = JobShared::new();
        shared.request_cancel();
        assert_eq!(shared.status(), JobStatus::Cancelled);
        // A cancelled job can never start running
        assert!(!shared.advance(JobStatus::Running));
    }

    #[test]
    fn test_cancel_of_running_job_is_cooperative() {
        let shared = JobShared::new();
        assert!(shared.advance(JobStatus::Running));
        shared.request_cancel();
        // The flag stays visible for the worker to observe after its
        // in-flight gateway call returns
        assert!(shared.cancel_requested());
        assert_eq!(shared.status(), JobStatus::Cancelled);
        // Completion is exclusive with cancellation
        assert!(!shared.advance(JobStatus::Done));
    }
}
