use super::*;
use crate::db::NewJob;
use crate::options::{ExportMethod, ExportOptions, RenderMethod};
use crate::types::ProposalId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Renderer whose behavior is scripted per test
struct ScriptedRenderer {
    caps: RenderCapabilities,
    fail_with: Option<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRenderer {
    fn ok() -> Self {
        Self {
            caps: RenderCapabilities {
                browser: true,
                office: true,
            },
            fail_with: None,
            delay: Duration::from_millis(10),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(&self, request: &RenderRequest, progress: &ProgressReporter) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        progress.report(50).await;
        tokio::time::sleep(self.delay).await;
        progress.report(30).await;
        progress.report(100).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            tokio::fs::write(&request.output_path, b"partial").await?;
            return Err(Error::ExternalTool(message.clone()));
        }
        tokio::fs::write(&request.output_path, b"%PDF-1.7 scripted").await?;
        Ok(())
    }

    fn capabilities(&self) -> RenderCapabilities {
        self.caps
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct Harness {
    db: Arc<Database>,
    processor: JobProcessor,
    handle: JoinHandle<()>,
    events: broadcast::Receiver<Event>,
    cancel: CancellationToken,
    output: TempDir,
    _store: TempDir,
}

async fn harness(renderer: ScriptedRenderer, max_concurrent_jobs: usize) -> (Harness, Arc<ScriptedRenderer>) {
    let store = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::new(&store.path().join("jobs.db")).await.unwrap());
    let (event_tx, events) = broadcast::channel(256);
    let renderer = Arc::new(renderer);
    let cancel = CancellationToken::new();

    let (processor, handle) = JobProcessor::start(ProcessorContext {
        db: db.clone(),
        renderer: renderer.clone(),
        event_tx,
        output_dir: output.path().to_path_buf(),
        max_concurrent_jobs,
        cancel: cancel.clone(),
    });

    (
        Harness {
            db,
            processor,
            handle,
            events,
            cancel,
            output,
            _store: store,
        },
        renderer,
    )
}

async fn queue(h: &Harness, method: ExportMethod) -> JobId {
    let options = ExportOptions::builder().method(method).build().unwrap();
    let job = NewJob {
        job_id: JobId::new(),
        proposal_id: ProposalId::new("prop-1").unwrap(),
        estimated_time_secs: options.estimated_time_secs(),
        options,
    };
    h.db.insert_job(&job).await.unwrap();
    h.processor.enqueue(job.job_id.clone()).unwrap();
    job.job_id
}

async fn next_terminal(events: &mut broadcast::Receiver<Event>, job_id: &JobId) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.job_id() == Some(job_id) && event.is_terminal() {
                return event;
            }
        }
    })
    .await
    .expect("job did not finish in time")
}

#[tokio::test]
async fn completes_job_and_records_artifact() {
    let (mut h, _) = harness(ScriptedRenderer::ok(), 2).await;
    let job_id = queue(&h, ExportMethod::Auto).await;

    let event = next_terminal(&mut h.events, &job_id).await;
    assert!(matches!(event, Event::Completed { file_size, .. } if file_size == 17));

    let job = h.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, Status::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.method, Some(RenderMethod::Browser));
    let file_name = job.file_path.unwrap();
    assert_eq!(file_name, format!("{job_id}.pdf"));
    assert!(h.output.path().join(file_name).exists());
}

#[tokio::test]
async fn progress_events_are_monotone_and_below_100() {
    let (mut h, _) = harness(ScriptedRenderer::ok(), 1).await;
    let job_id = queue(&h, ExportMethod::Office).await;

    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match h.events.recv().await.unwrap() {
                Event::Processing { method, .. } => assert_eq!(method, RenderMethod::Office),
                Event::Progress { progress, .. } => seen.push(progress),
                Event::Completed { .. } => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
    })
    .await
    .unwrap();

    // 50, then 30 is ignored, then 100 is clamped to 99
    assert_eq!(seen, vec![50, 99]);
    let job = h.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.progress, 100);
}

#[tokio::test]
async fn renderer_error_fails_job_and_removes_partial_output() {
    let renderer = ScriptedRenderer {
        fail_with: Some("chromium exited with 1".to_string()),
        ..ScriptedRenderer::ok()
    };
    let (mut h, _) = harness(renderer, 1).await;
    let job_id = queue(&h, ExportMethod::Browser).await;

    match next_terminal(&mut h.events, &job_id).await {
        Event::Failed { error, .. } => assert!(error.contains("chromium exited with 1")),
        other => panic!("expected failure, got {other:?}"),
    }

    let job = h.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, Status::Failed);
    assert!(job.file_path.is_none());
    assert!(!h.output.path().join(format!("{job_id}.pdf")).exists());
}

#[tokio::test]
async fn unavailable_method_fails_without_rendering() {
    let renderer = ScriptedRenderer {
        caps: RenderCapabilities {
            browser: false,
            office: true,
        },
        ..ScriptedRenderer::ok()
    };
    let (mut h, renderer) = harness(renderer, 1).await;
    let job_id = queue(&h, ExportMethod::Browser).await;

    match next_terminal(&mut h.events, &job_id).await {
        Event::Failed { error, .. } => assert!(error.contains("browser"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(renderer.peak.load(Ordering::SeqCst), 0);
    let job = h.db.get_job(&job_id).await.unwrap().unwrap();
    assert!(job.started_at.is_none());
}

#[tokio::test]
async fn respects_concurrency_limit() {
    let renderer = ScriptedRenderer {
        delay: Duration::from_millis(50),
        ..ScriptedRenderer::ok()
    };
    let (mut h, renderer) = harness(renderer, 2).await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(queue(&h, ExportMethod::Auto).await);
    }
    let mut pending: std::collections::HashSet<JobId> = ids.into_iter().collect();
    tokio::time::timeout(Duration::from_secs(10), async {
        while !pending.is_empty() {
            if let Event::Completed { job_id, .. } = h.events.recv().await.unwrap() {
                pending.remove(&job_id);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(renderer.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn skips_jobs_that_are_not_queued() {
    let (mut h, renderer) = harness(ScriptedRenderer::ok(), 1).await;
    let options = ExportOptions::default();
    let job = NewJob {
        job_id: JobId::new(),
        proposal_id: ProposalId::new("prop-2").unwrap(),
        estimated_time_secs: options.estimated_time_secs(),
        options,
    };
    h.db.insert_job(&job).await.unwrap();
    h.db.mark_failed(&job.job_id, "cancelled upstream").await.unwrap();

    h.processor.enqueue(job.job_id.clone()).unwrap();
    h.processor.enqueue(JobId::new()).unwrap();

    // A fresh job still goes through after the skipped ones
    let live = queue(&h, ExportMethod::Auto).await;
    assert!(matches!(next_terminal(&mut h.events, &live).await, Event::Completed { .. }));
    assert_eq!(renderer.peak.load(Ordering::SeqCst), 1);

    let stored = h.db.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.error.as_deref(), Some("cancelled upstream"));
}

#[tokio::test]
async fn cancellation_interrupts_running_render() {
    let renderer = ScriptedRenderer {
        delay: Duration::from_secs(30),
        ..ScriptedRenderer::ok()
    };
    let (mut h, _) = harness(renderer, 1).await;
    let job_id = queue(&h, ExportMethod::Auto).await;

    // Wait until the render is underway
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Event::Progress { .. } = h.events.recv().await.unwrap() {
                break;
            }
        }
    })
    .await
    .unwrap();

    h.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), h.handle)
        .await
        .unwrap()
        .unwrap();

    let job = h.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, Status::Failed);
    assert_eq!(job.error.as_deref(), Some(INTERRUPTED_BY_SHUTDOWN));
    assert!(matches!(
        h.processor.enqueue(JobId::new()),
        Err(Error::ShuttingDown)
    ));
}
