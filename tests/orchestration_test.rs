//! End-to-end orchestration tests over a fake segmentation backend

use maskflow::{
    Annotation, BatchConfig, BatchItemStatus, BatchQueue, InferenceGateway, InferenceScheduler,
    JobOutcome, JobStatus, LayerTransform, MaskCandidate, MaskData, PointLabel, Prompt,
    ResultStore, SegmentationBackend, SegmentationError, Session, SessionOutcome,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Blocks backend calls until opened, so tests can hold a job in the
/// running state deterministically
#[derive(Clone)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn new() -> Self {
        Gate(Arc::new((Mutex::new(false), Condvar::new())))
    }

    fn open(&self) {
        let (lock, cv) = &*self.0;
        *lock.lock().unwrap() = true;
        cv.notify_all();
    }

    fn wait(&self) {
        let (lock, cv) = &*self.0;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cv.wait(open).unwrap();
        }
    }
}

/// Observable counters shared with a FakeBackend after it moves into
/// the scheduler
#[derive(Clone, Default)]
struct Probe {
    entered: Arc<AtomicUsize>,
    concurrent: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,
    /// x coordinate of the first prompt point of each completed call,
    /// in call order
    call_log: Arc<Mutex<Vec<f32>>>,
}

struct FakeBackend {
    probe: Probe,
    gate: Option<Gate>,
    scores: Vec<f32>,
    fail_message: Option<String>,
}

impl SegmentationBackend for FakeBackend {
    fn run(
        &mut self,
        image: &image::RgbImage,
        prompt: &Prompt,
    ) -> Result<Vec<MaskCandidate>, SegmentationError> {
        self.probe.entered.fetch_add(1, Ordering::SeqCst);
        let now = self.probe.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_concurrent.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.wait();
        }

        let marker = prompt
            .points
            .first()
            .map(|p| p.x)
            .or_else(|| prompt.bbox.map(|b| b.x0))
            .unwrap_or(-1.0);
        self.probe.call_log.lock().unwrap().push(marker);

        let result = if let Some(message) = &self.fail_message {
            Err(SegmentationError::Model(message.clone()))
        } else {
            Ok(self
                .scores
                .iter()
                .map(|&score| {
                    let mut mask = MaskData::empty(image.width(), image.height());
                    if let Some(point) = prompt.points.first() {
                        let x = (point.x as u32).min(image.width() - 1);
                        let y = (point.y as u32).min(image.height() - 1);
                        mask.pixels[(y * image.width() + x) as usize] = 1;
                    }
                    MaskCandidate {
                        mask,
                        score,
                        rank: 0,
                    }
                })
                .collect())
        };

        self.probe.concurrent.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn scheduler_with(
    scores: Vec<f32>,
    gate: Option<Gate>,
    fail_message: Option<String>,
) -> (InferenceScheduler, Probe) {
    let probe = Probe::default();
    let backend = FakeBackend {
        probe: probe.clone(),
        gate,
        scores,
        fail_message,
    };
    let scheduler = InferenceScheduler::new(InferenceGateway::new(Box::new(backend), true));
    (scheduler, probe)
}

async fn until(probe_value: impl Fn() -> bool) {
    for _ in 0..500 {
        if probe_value() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("Condition not reached within timeout");
}

#[tokio::test]
async fn test_interactive_point_scenario_with_export() {
    // 512x512 image shown at 2x display scale; a foreground click at
    // canvas (100, 100) must reach the model as (50, 50)
    let (scheduler, probe) = scheduler_with(vec![0.6, 0.9, 0.3], None, None);

    let mut session = Session::new();
    session.set_image(
        "img1",
        image::RgbImage::new(512, 512),
        LayerTransform::uniform(2.0),
    );
    session.add_annotation(Annotation::point(100.0, 100.0));
    session.submit(&scheduler).unwrap();

    match session.wait_result().await {
        Some(SessionOutcome::Candidates(count)) => assert!(count >= 1),
        other => panic!("Expected candidates, got {:?}", other),
    }
    assert_eq!(probe.call_log.lock().unwrap().as_slice(), &[50.0]);

    // Candidates arrive sorted by descending score with stable ranks
    let scores: Vec<f32> = session.candidates().iter().map(|c| c.score).collect();
    assert_eq!(scores, vec![0.9, 0.6, 0.3]);

    session.select(0).unwrap();
    let mut store = ResultStore::new();
    session.record_to(&mut store).unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let paths = store.export("img1", dir.path(), "img1_mask").unwrap();
    assert!(paths.mask_path.exists());

    let sidecar = std::fs::read_to_string(&paths.sidecar_path).unwrap();
    assert!(sidecar.contains("100.0"));
    assert!(sidecar.contains("foreground"));
    assert!(sidecar.contains("2.0"));
    assert!(sidecar.contains("\"selected_rank\": 0"));

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_interactive_submission_cancels_first() {
    let gate = Gate::new();
    let (scheduler, probe) = scheduler_with(vec![0.9], Some(gate.clone()), None);

    let image = Arc::new(image::RgbImage::new(16, 16));
    let prompt = |x: f32| Prompt {
        points: vec![maskflow::PromptPoint {
            x,
            y: 1.0,
            label: PointLabel::Foreground,
        }],
        bbox: None,
    };

    let first = scheduler.submit_interactive(image.clone(), prompt(1.0));
    until(|| probe.entered.load(Ordering::SeqCst) >= 1).await;
    assert_eq!(first.status(), JobStatus::Running);

    let second = scheduler.submit_interactive(image.clone(), prompt(2.0));
    gate.open();

    // The first job is cancelled and never becomes done; its in-flight
    // result is discarded
    let first_outcome = first.wait().await;
    assert!(matches!(first_outcome, JobOutcome::Cancelled));

    let second_outcome = second.wait().await;
    match second_outcome {
        JobOutcome::Done(candidates) => assert_eq!(candidates.len(), 1),
        other => panic!("Expected done, got {:?}", other),
    }

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interactive_priority_over_queued_batch() {
    let gate = Gate::new();
    let (scheduler, probe) = scheduler_with(vec![0.9], Some(gate.clone()), None);

    let image = Arc::new(image::RgbImage::new(16, 16));
    let prompt = |x: f32| Prompt {
        points: vec![maskflow::PromptPoint {
            x,
            y: 1.0,
            label: PointLabel::Foreground,
        }],
        bbox: None,
    };

    // First batch job occupies the gateway; second waits in the queue
    let b1 = scheduler.submit_batch(image.clone(), prompt(10.0));
    until(|| probe.entered.load(Ordering::SeqCst) >= 1).await;
    let b2 = scheduler.submit_batch(image.clone(), prompt(20.0));
    // Interactive job arrives last but must run before the queued batch
    // job; the running batch job is never preempted
    let i1 = scheduler.submit_interactive(image.clone(), prompt(30.0));

    gate.open();
    assert!(matches!(b1.wait().await, JobOutcome::Done(_)));
    assert!(matches!(i1.wait().await, JobOutcome::Done(_)));
    assert!(matches!(b2.wait().await, JobOutcome::Done(_)));

    assert_eq!(
        probe.call_log.lock().unwrap().as_slice(),
        &[10.0, 30.0, 20.0]
    );
    // The exclusivity invariant: never more than one call in flight
    assert_eq!(probe.max_concurrent.load(Ordering::SeqCst), 1);

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_at_most_one_running_job_across_origins() {
    let (scheduler, probe) = scheduler_with(vec![0.9], None, None);
    let image = Arc::new(image::RgbImage::new(8, 8));

    let mut handles = Vec::new();
    for i in 0..5 {
        let prompt = Prompt {
            points: vec![maskflow::PromptPoint {
                x: i as f32,
                y: 1.0,
                label: PointLabel::Foreground,
            }],
            bbox: None,
        };
        handles.push(scheduler.submit_batch(image.clone(), prompt));
    }
    for handle in handles {
        assert!(matches!(handle.wait().await, JobOutcome::Done(_)));
    }

    assert_eq!(probe.max_concurrent.load(Ordering::SeqCst), 1);
    // Batch order is strictly FIFO
    assert_eq!(
        probe.call_log.lock().unwrap().as_slice(),
        &[0.0, 1.0, 2.0, 3.0, 4.0]
    );

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_failed_interactive_job_surfaces_model_error() {
    let (scheduler, _probe) =
        scheduler_with(vec![], None, Some("backend unavailable".to_string()));

    let mut session = Session::new();
    session.set_image("img", image::RgbImage::new(8, 8), LayerTransform::default());
    session.add_annotation(Annotation::point(2.0, 2.0));
    session.submit(&scheduler).unwrap();

    match session.wait_result().await {
        Some(SessionOutcome::Failed(SegmentationError::Model(message))) => {
            assert!(message.contains("backend unavailable"));
        }
        other => panic!("Expected model failure, got {:?}", other),
    }
    // The session stays usable after a failure
    assert!(session.current_candidate().is_none());
    session.add_annotation(Annotation::point(3.0, 3.0));

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_submission_errors_never_reach_scheduler() {
    let (scheduler, probe) = scheduler_with(vec![0.9], None, None);

    let mut session = Session::new();
    session.set_image("img", image::RgbImage::new(8, 8), LayerTransform::default());

    // Empty annotation set
    match session.submit(&scheduler) {
        Err(SegmentationError::Input(_)) => {}
        other => panic!("Expected Input error, got {:?}", other),
    }

    // Point outside the image after transform
    session.add_annotation(Annotation::point(100.0, 100.0));
    match session.submit(&scheduler) {
        Err(SegmentationError::Bounds(_)) => {}
        other => panic!("Expected Bounds error, got {:?}", other),
    }

    assert_eq!(probe.entered.load(Ordering::SeqCst), 0);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_batch_failure_does_not_halt_queue() {
    // Three items; the middle one references a missing image
    let input_dir = tempfile::TempDir::new().unwrap();
    let output_dir = tempfile::TempDir::new().unwrap();

    let good_a = input_dir.path().join("a.png");
    let good_c = input_dir.path().join("c.png");
    image::RgbImage::new(8, 8).save(&good_a).unwrap();
    image::RgbImage::new(8, 8).save(&good_c).unwrap();
    let missing = input_dir.path().join("missing.png");

    let (scheduler, _probe) = scheduler_with(vec![0.8], None, None);
    let mut store = ResultStore::new();
    let mut queue = BatchQueue::new(BatchConfig {
        output_dir: output_dir.path().to_path_buf(),
        ..BatchConfig::default()
    })
    .unwrap();

    for path in [&good_a, &missing, &good_c] {
        queue
            .enqueue(
                path.clone(),
                vec![Annotation::point(2.0, 2.0)],
                LayerTransform::default(),
            )
            .unwrap();
    }

    let succeeded = queue.run_all(&scheduler, &mut store).await.unwrap();
    assert_eq!(succeeded, 2);

    // All three items are present and terminal, in FIFO order
    let statuses: Vec<BatchItemStatus> = queue.items().iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![
            BatchItemStatus::Done,
            BatchItemStatus::Failed,
            BatchItemStatus::Done
        ]
    );
    // A load failure on a missing file is an IO failure, not a decode one
    let error = queue.items()[1].error.as_deref().unwrap();
    assert!(error.contains("IO error"), "got {:?}", error);

    // Outputs exist for the successful items, with injective names
    assert!(output_dir.path().join("a_mask_000.png").exists());
    assert!(output_dir.path().join("a_mask_000.json").exists());
    assert!(output_dir.path().join("c_mask_002.png").exists());
    assert_eq!(store.len(), 2);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_inference_does_not_stall_current_thread_runtime() {
    // Single-threaded runtime: timers and tasks must keep firing while
    // the gateway call is in flight on the dispatch thread
    let gate = Gate::new();
    let (scheduler, probe) = scheduler_with(vec![0.9], Some(gate.clone()), None);

    let prompt = Prompt {
        points: vec![maskflow::PromptPoint {
            x: 1.0,
            y: 1.0,
            label: PointLabel::Foreground,
        }],
        bbox: None,
    };
    let handle = scheduler.submit_interactive(Arc::new(image::RgbImage::new(8, 8)), prompt);

    // These awaits only complete if the runtime stays responsive while
    // the backend blocks
    until(|| probe.entered.load(Ordering::SeqCst) >= 1).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.status(), JobStatus::Running);

    gate.open();
    assert!(matches!(handle.wait().await, JobOutcome::Done(_)));
    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_jobs_survive_interactive_activity() {
    let gate = Gate::new();
    let (scheduler, probe) = scheduler_with(vec![0.9], Some(gate.clone()), None);
    let image = Arc::new(image::RgbImage::new(8, 8));
    let prompt = |x: f32| Prompt {
        points: vec![maskflow::PromptPoint {
            x,
            y: 1.0,
            label: PointLabel::Foreground,
        }],
        bbox: None,
    };

    let batch = scheduler.submit_batch(image.clone(), prompt(5.0));
    until(|| probe.entered.load(Ordering::SeqCst) >= 1).await;

    // Interactive churn cancels only interactive jobs
    let i1 = scheduler.submit_interactive(image.clone(), prompt(6.0));
    let i2 = scheduler.submit_interactive(image.clone(), prompt(7.0));
    gate.open();

    assert!(matches!(batch.wait().await, JobOutcome::Done(_)));
    assert!(matches!(i1.wait().await, JobOutcome::Cancelled));
    assert!(matches!(i2.wait().await, JobOutcome::Done(_)));

    scheduler.shutdown().await;
}
