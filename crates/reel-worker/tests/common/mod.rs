//! In-memory collaborators for pipeline scenarios.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use reel_media::{ComposeOutput, MediaComposer, MediaError, MediaResult};
use reel_models::{BackendId, GenerationSpec, JobHandle, ProjectId, SceneConfig, SubResourceKind};
use reel_providers::{
    AdapterRegistry, ByteStream, FetchRetryConfig, GenerationAdapter, PollStatus, ProviderError,
    ProviderResult,
};
use reel_queue::{MemoryEventSink, MemoryTaskQueue, TaskSink};
use reel_storage::MemoryObjectStore;
use reel_store::InMemoryStore;
use reel_worker::reasoning::DecompositionRequest;
use reel_worker::{
    CreditLedger, CreditReservation, MemoryLedger, NewScript, Pipeline, PipelineContext,
    ProposedScene, ReasoningClient, WorkerConfig, WorkerError, WorkerResult,
};

/// Prompts containing this marker fail at the provider.
pub const REJECT_MARKER: &str = "[reject]";

struct FakeJob {
    polls: u32,
    failure: Option<String>,
}

/// Adapter that completes every job after a fixed number of polls.
pub struct FakeAdapter {
    backend: BackendId,
    polls_before_done: u32,
    jobs: Mutex<HashMap<String, FakeJob>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
    transient_polls: AtomicUsize,
}

impl FakeAdapter {
    pub fn new(backend: BackendId, polls_before_done: u32) -> Self {
        Self {
            backend,
            polls_before_done,
            jobs: Mutex::new(HashMap::new()),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            transient_polls: AtomicUsize::new(0),
        }
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// The next `n` polls fail with a connection error.
    pub fn fail_next_polls(&self, n: usize) {
        self.transient_polls.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationAdapter for FakeAdapter {
    fn backend(&self) -> BackendId {
        self.backend
    }

    async fn submit(&self, spec: &GenerationSpec) -> ProviderResult<JobHandle> {
        self.capabilities().validate(spec)?;
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        let handle = format!("{}-{}-{}", self.backend, spec.kind, n);
        let failure = spec
            .prompt
            .contains(REJECT_MARKER)
            .then(|| "content policy violation".to_string());
        self.jobs
            .lock()
            .unwrap()
            .insert(handle.clone(), FakeJob { polls: 0, failure });
        Ok(JobHandle::new(handle))
    }

    async fn poll(&self, handle: &JobHandle) -> ProviderResult<PollStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .transient_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProviderError::transient("connection reset"));
        }
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(handle.as_str())
            .ok_or_else(|| ProviderError::rejected(404, "unknown job"))?;
        job.polls += 1;
        if job.polls <= self.polls_before_done {
            return Ok(PollStatus::Processing);
        }
        Ok(match &job.failure {
            Some(message) => PollStatus::Failed {
                message: message.clone(),
            },
            None => PollStatus::Completed {
                locator: handle.as_str().to_string(),
            },
        })
    }

    async fn fetch(&self, locator: &str) -> ProviderResult<ByteStream> {
        let body = format!("media:{}", locator).into_bytes();
        Ok(Box::pin(futures::stream::iter(vec![Ok(body)])))
    }
}

/// Reasoning service returning queued answers in order.
#[derive(Default)]
pub struct ScriptedReasoning {
    answers: Mutex<VecDeque<WorkerResult<Vec<ProposedScene>>>>,
    requests: Mutex<Vec<DecompositionRequest>>,
}

impl ScriptedReasoning {
    pub fn push(&self, answer: WorkerResult<Vec<ProposedScene>>) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn requests(&self) -> Vec<DecompositionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoning {
    async fn decompose(&self, request: &DecompositionRequest) -> WorkerResult<Vec<ProposedScene>> {
        self.requests.lock().unwrap().push(request.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(WorkerError::reasoning_failed("no scripted answer")))
    }
}

/// Composer that concatenates bytes instead of media streams.
#[derive(Default)]
pub struct ByteComposer {
    concats: AtomicUsize,
    muxes: AtomicUsize,
    fail_concat: AtomicBool,
    concat_delay: Mutex<Option<Duration>>,
}

impl ByteComposer {
    /// Every concat exits non-zero.
    pub fn fail_concats(&self) {
        self.fail_concat.store(true, Ordering::SeqCst);
    }

    /// Every concat sleeps this long before writing its output.
    pub fn stall_concats(&self, delay: Duration) {
        *self.concat_delay.lock().unwrap() = Some(delay);
    }

    pub fn concat_count(&self) -> usize {
        self.concats.load(Ordering::SeqCst)
    }

    pub fn mux_count(&self) -> usize {
        self.muxes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaComposer for ByteComposer {
    async fn concat(&self, inputs: &[PathBuf], output: &Path, _work_dir: &Path) -> MediaResult<ComposeOutput> {
        self.concats.fetch_add(1, Ordering::SeqCst);
        let delay = *self.concat_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_concat.load(Ordering::SeqCst) {
            tokio::fs::write(output, b"partial").await?;
            return Err(MediaError::FfmpegFailed {
                message: "concat exited with status 1".to_string(),
                stderr: Some("Invalid data found when processing input".to_string()),
                exit_code: Some(1),
            });
        }
        let mut out = Vec::new();
        for input in inputs {
            out.extend(tokio::fs::read(input).await?);
            out.push(b'|');
        }
        tokio::fs::write(output, out).await?;
        Ok(ComposeOutput {
            duration_secs: inputs.len() as f64 * 4.0,
            lossless: true,
        })
    }

    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()> {
        self.muxes.fetch_add(1, Ordering::SeqCst);
        let mut out = tokio::fs::read(video).await?;
        out.extend(b"+");
        out.extend(tokio::fs::read(audio).await?);
        tokio::fs::write(output, out).await?;
        Ok(())
    }
}

/// Ledger whose charges for one track kind fail while armed, delegating to
/// a [`MemoryLedger`].
pub struct FlakyLedger {
    inner: Arc<MemoryLedger>,
    failing: Mutex<Option<(SubResourceKind, usize)>>,
}

impl FlakyLedger {
    pub fn new(inner: Arc<MemoryLedger>) -> Self {
        Self {
            inner,
            failing: Mutex::new(None),
        }
    }

    /// The next `n` charges for `kind` fail.
    pub fn fail_next_charges(&self, kind: SubResourceKind, n: usize) {
        *self.failing.lock().unwrap() = Some((kind, n));
    }
}

#[async_trait]
impl CreditLedger for FlakyLedger {
    async fn reserve(&self, reservation: &CreditReservation) -> WorkerResult<()> {
        self.inner.reserve(reservation).await
    }

    async fn charge(&self, reservation: &CreditReservation) -> WorkerResult<()> {
        {
            let mut failing = self.failing.lock().unwrap();
            if let Some((kind, remaining)) = failing.as_mut() {
                if *kind == reservation.kind && *remaining > 0 {
                    *remaining -= 1;
                    return Err(WorkerError::Timeout(5));
                }
            }
        }
        self.inner.charge(reservation).await
    }

    async fn release(&self, reservation: &CreditReservation) -> WorkerResult<()> {
        self.inner.release(reservation).await
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub store: Arc<InMemoryStore>,
    pub storage: Arc<MemoryObjectStore>,
    pub tasks: Arc<MemoryTaskQueue>,
    pub events: Arc<MemoryEventSink>,
    pub ledger: Arc<MemoryLedger>,
    pub credits: Arc<FlakyLedger>,
    pub reasoning: Arc<ScriptedReasoning>,
    pub composer: Arc<ByteComposer>,
    pub adapters: HashMap<BackendId, Arc<FakeAdapter>>,
    work: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_polls(1)
    }

    /// Every fake job reports `processing` for `polls` polls before finishing.
    pub fn with_polls(polls: u32) -> Self {
        Self::with_config(polls, |_| {})
    }

    /// Harness whose worker config is adjusted by `configure`.
    pub fn with_config(polls: u32, configure: impl FnOnce(&mut WorkerConfig)) -> Self {
        let work = TempDir::new().unwrap();
        let mut config = WorkerConfig {
            work_dir: work.path().to_path_buf(),
            ..WorkerConfig::default()
        };
        configure(&mut config);

        let store = Arc::new(InMemoryStore::new());
        let storage = Arc::new(MemoryObjectStore::new());
        let tasks = Arc::new(MemoryTaskQueue::new());
        let events = Arc::new(MemoryEventSink::new());
        let ledger = Arc::new(MemoryLedger::new());
        let credits = Arc::new(FlakyLedger::new(ledger.clone()));
        let reasoning = Arc::new(ScriptedReasoning::default());
        let composer = Arc::new(ByteComposer::default());

        let mut adapters = HashMap::new();
        let mut registry = AdapterRegistry::default();
        for backend in BackendId::ALL {
            let adapter = Arc::new(FakeAdapter::new(backend, polls));
            registry = registry.with_adapter(adapter.clone());
            adapters.insert(backend, adapter);
        }

        let ctx = PipelineContext {
            config,
            fetch_retry: FetchRetryConfig::default(),
            store: store.clone(),
            storage: storage.clone(),
            adapters: registry,
            reasoning: reasoning.clone(),
            composer: composer.clone(),
            tasks: tasks.clone(),
            events: events.clone(),
            credits: credits.clone(),
        };

        Self {
            pipeline: Pipeline::new(ctx),
            store,
            storage,
            tasks,
            events,
            ledger,
            credits,
            reasoning,
            composer,
            adapters,
            work,
        }
    }

    pub fn adapter(&self, backend: BackendId) -> &FakeAdapter {
        &self.adapters[&backend]
    }

    pub fn work_dir(&self) -> &Path {
        self.work.path()
    }

    /// Like [`Harness::drain`], but a failing task is redelivered up to
    /// `max_retries` times and then dead-lettered, as the executor does.
    /// Returns the number of failed deliveries.
    pub async fn drain_with_retries(&self, max_retries: u32) -> usize {
        let mut retries: HashMap<String, u32> = HashMap::new();
        let mut failures = 0;
        for _ in 0..500 {
            while let Some(job) = self.tasks.pop() {
                let result = self.pipeline.process_job(&job).await;
                self.tasks.ack(&job);
                let Err(e) = result else { continue };
                failures += 1;
                let count = retries.entry(job.job_id().to_string()).or_default();
                *count += 1;
                if !e.is_retryable() || *count > max_retries {
                    self.pipeline
                        .handle_dead_letter(&job, &e.to_string())
                        .await
                        .unwrap_or_else(|e| panic!("dead letter for {} failed: {}", job.job_type(), e));
                } else {
                    self.tasks.enqueue(job).await.unwrap();
                }
            }
            if self.tasks.release_delayed() == 0 {
                return failures;
            }
        }
        panic!("queue did not drain");
    }

    /// Run queued tasks, releasing delayed ones, until nothing is left.
    pub async fn drain(&self) {
        for _ in 0..500 {
            while let Some(job) = self.tasks.pop() {
                self.pipeline
                    .process_job(&job)
                    .await
                    .unwrap_or_else(|e| panic!("task {} failed: {}", job.job_type(), e));
                self.tasks.ack(&job);
            }
            if self.tasks.release_delayed() == 0 {
                return;
            }
        }
        panic!("queue did not drain");
    }

    /// Create a script with the given scripted decomposition and run it.
    pub async fn decomposed_script(&self, scenes: Vec<ProposedScene>, requested: f64) -> reel_models::Script {
        self.reasoning.push(Ok(scenes));
        let script = self
            .pipeline
            .create_script(NewScript {
                project_id: ProjectId::from("project-1"),
                text: "A short film about a lighthouse keeper.".to_string(),
                requested_duration_secs: requested,
                preferred_backends: vec![],
            })
            .await
            .unwrap();
        self.drain().await;
        script
    }
}

pub fn proposed(narration: &str, directive: &str, duration: f64, platform: &str) -> ProposedScene {
    ProposedScene {
        id: None,
        narration: narration.to_string(),
        visual_directive: directive.to_string(),
        duration,
        platform: platform.to_string(),
        config: SceneConfig::default(),
    }
}
