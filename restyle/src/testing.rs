//! Helpers for testing code built on top of the engine.
//!
//! [`ScriptedGateway`] and [`RecordingAssembler`] stand in for the external collaborators, and
//! [`assert_job!`] makes assertions about the persisted state of a job.
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::watch, time::Instant};

use crate::{
    assembly::{Assembler, AssemblyError, Dimensions, Slide},
    gateway::{FailureKind, GenerationFailure, GenerationGateway, GenerationRequest},
    job::Image,
};

/// A macro for making assertions about the counters and status of a job.
///
/// Evaluates to the loaded [`Job`](crate::job::Job) so further assertions can be made on it.
///
/// # Example
///
/// ```
/// # use restyle::prelude::*;
/// # use restyle::testing::assert_job;
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// let store = InMemoryStore::new();
/// let job = JobBuilder::batch("enhance")
///     .add_image("cat.png", Image::new(vec![0u8; 4], "image/png"))
///     .build()
///     .unwrap();
/// let id = store.create_job(job).await.unwrap();
///
/// assert_job!(store, id, status: JobStatus::Pending, total: 1, completed: 0, failed: 0);
/// # });
/// ```
#[macro_export]
macro_rules! assert_job {
    (@field $job:ident, status, $value:expr) => {
        assert_eq!($job.status, $value, "Unexpected status of {}", $job.id)
    };
    (@field $job:ident, total, $value:expr) => {
        assert_eq!($job.total_count, $value, "Unexpected total_count of {}", $job.id)
    };
    (@field $job:ident, completed, $value:expr) => {
        assert_eq!($job.completed_count, $value, "Unexpected completed_count of {}", $job.id)
    };
    (@field $job:ident, failed, $value:expr) => {
        assert_eq!($job.failed_count, $value, "Unexpected failed_count of {}", $job.id)
    };
    ($store:expr, $id:expr, $($field:ident: $value:expr),+ $(,)?) => {{
        use $crate::store::WorkStore as _;
        let job = $store
            .get_job($id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("{} not found", $id));
        $($crate::assert_job!(@field job, $field, $value);)+
        job
    }};
}

pub use assert_job;

/// One scripted response of a [`ScriptedGateway`].
#[derive(Debug, Clone)]
pub enum Script {
    Succeed(Image),
    Fail(FailureKind, String),
    Panic(String),
}

impl Script {
    pub fn succeed() -> Self {
        Self::Succeed(Self::generated())
    }

    pub fn fail(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Fail(kind, message.into())
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self::Panic(message.into())
    }

    /// The image returned by [`Script::succeed`], and once the script runs out.
    pub fn generated() -> Image {
        Image::new(b"generated".to_vec(), "image/png")
    }
}

/// A generation call observed by a [`ScriptedGateway`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: GenerationRequest,
    pub started_at: Instant,
}

struct Calls {
    script: Mutex<VecDeque<Script>>,
    recorded: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: watch::Sender<usize>,
}

/// A [`GenerationGateway`] replaying a script of responses in call order.
///
/// Once the script is exhausted every call succeeds with [`Script::generated`]. Cloning is cheap
/// and every clone shares the same script and recordings.
#[derive(Clone)]
pub struct ScriptedGateway {
    calls: Arc<Calls>,
    latency: Duration,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new([])
    }
}

impl ScriptedGateway {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Self {
        let (seen, _) = watch::channel(0);
        Self {
            calls: Arc::new(Calls {
                script: Mutex::new(script.into_iter().collect()),
                recorded: Mutex::default(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                seen,
            }),
            latency: Duration::ZERO,
        }
    }

    /// Make every call take `latency` before responding.
    pub fn with_latency(self, latency: Duration) -> Self {
        Self { latency, ..self }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls.recorded).clone()
    }

    pub fn call_count(&self) -> usize {
        *self.calls.seen.borrow()
    }

    /// The highest number of calls that were ever in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.calls.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` calls have started.
    pub async fn wait_for_calls(&self, count: usize) {
        let mut seen = self.calls.seen.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = seen.wait_for(|seen| *seen >= count).await;
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    async fn generate(&self, request: GenerationRequest) -> Result<Image, GenerationFailure> {
        let in_flight = self.calls.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.calls.in_flight);
        self.calls.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        lock(&self.calls.recorded).push(RecordedCall {
            request,
            started_at: Instant::now(),
        });
        let step = lock(&self.calls.script).pop_front();
        self.calls.seen.send_modify(|seen| *seen += 1);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match step.unwrap_or_else(Script::succeed) {
            Script::Succeed(image) => Ok(image),
            Script::Fail(kind, message) => Err(GenerationFailure::new(kind, message)),
            Script::Panic(message) => panic!("{message}"),
        }
    }
}

/// An [`Assembler`] recording the slides it was given.
#[derive(Clone, Default)]
pub struct RecordingAssembler {
    calls: Arc<Mutex<Vec<(Vec<Slide>, Dimensions)>>>,
    failure: Option<String>,
}

impl RecordingAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every assembly fail with `message`.
    pub fn failing(self, message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..self
        }
    }

    pub fn calls(&self) -> Vec<(Vec<Slide>, Dimensions)> {
        lock(&self.calls).clone()
    }

    /// The deliverable produced by a successful assembly.
    pub fn assembled() -> Image {
        Image::new(b"assembled".to_vec(), "application/pdf")
    }
}

#[async_trait]
impl Assembler for RecordingAssembler {
    async fn assemble(
        &self,
        slides: Vec<Slide>,
        dimensions: Dimensions,
    ) -> Result<Image, AssemblyError> {
        lock(&self.calls).push((slides, dimensions));
        match &self.failure {
            Some(message) => Err(AssemblyError::Failed(message.clone())),
            None => Ok(Self::assembled()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
