use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{GenerationRequest, ModelLike, ModelVariant, OutputFormat, ServiceError};

pub type LoadFuture = Pin<Box<dyn Future<Output = anyhow::Result<Arc<dyn ModelLike>>> + Send>>;

/// Builds a fresh pipeline. Called on first use and again after reclamation.
pub type PipelineLoader = Arc<dyn Fn() -> LoadFuture + Send + Sync>;

const WARMUP_PROMPT: &str = "blank";
const MIN_REAPER_PERIOD: Duration = Duration::from_millis(10);

/// Where the service is in its load/serve/reclaim cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Uninitialized,
    Building,
    Warm,
    Reclaimed,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub variant: ModelVariant,
    /// Drop the pipeline after this long without requests.
    pub idle_timeout: Duration,
    /// Generations allowed to run at once on this instance.
    pub max_concurrent_requests: usize,
    /// Run a throwaway one-step generation right after loading.
    pub warmup: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            variant: ModelVariant::default(),
            idle_timeout: Duration::from_secs(240),
            max_concurrent_requests: 10,
            warmup: true,
        }
    }
}

/// Owns the warm pipeline and answers inference requests against it.
pub struct ModelService {
    config: ServiceConfig,
    loader: PipelineLoader,
    pipeline: Mutex<Option<Arc<dyn ModelLike>>>,
    state: watch::Sender<LifecycleState>,
    permits: Semaphore,
    in_flight: AtomicUsize,
    last_used: std::sync::Mutex<Instant>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ModelService {
    pub fn new(config: ServiceConfig, loader: PipelineLoader) -> Self {
        let (state, _) = watch::channel(LifecycleState::Uninitialized);
        Self {
            permits: Semaphore::new(config.max_concurrent_requests.max(1)),
            config,
            loader,
            pipeline: Mutex::new(None),
            state,
            in_flight: AtomicUsize::new(0),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }

    pub fn variant(&self) -> ModelVariant {
        self.config.variant
    }

    pub fn output_format(&self) -> OutputFormat {
        self.config.variant.output_format()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Time since the last request finished (or since the last load).
    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    fn touch(&self) {
        if let Ok(mut at) = self.last_used.lock() {
            *at = Instant::now();
        }
    }

    /// Stops admitting requests. Requests still queued for a permit fail with
    /// [`ServiceError::Closed`]; running ones finish.
    pub fn close(&self) {
        self.permits.close();
        info!("Model service closed to new requests");
    }

    /// Loads the pipeline if it is not already warm.
    pub async fn warm(&self) -> Result<(), ServiceError> {
        self.pipeline().await.map(|_| ())
    }

    async fn pipeline(&self) -> Result<Arc<dyn ModelLike>, ServiceError> {
        let mut slot = self.pipeline.lock().await;
        if let Some(pipeline) = slot.as_ref() {
            return Ok(Arc::clone(pipeline));
        }

        let previous = self.state.send_replace(LifecycleState::Building);
        info!(variant = %self.config.variant, ?previous, "Building pipeline");
        let start = Instant::now();

        let pipeline = match self.build().await {
            Ok(pipeline) => pipeline,
            Err(err) => {
                self.state.send_replace(previous);
                return Err(err);
            }
        };

        *slot = Some(Arc::clone(&pipeline));
        self.touch();
        self.state.send_replace(LifecycleState::Warm);
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pipeline warm"
        );
        Ok(pipeline)
    }

    async fn build(&self) -> Result<Arc<dyn ModelLike>, ServiceError> {
        let pipeline = (self.loader)().await.map_err(ServiceError::Load)?;
        if self.config.warmup {
            info!("Warming up the model");
            let primed = Arc::clone(&pipeline);
            tokio::task::spawn_blocking(move || {
                let request = GenerationRequest::new(WARMUP_PROMPT)
                    .with_steps(1)
                    .with_guidance(0.0);
                primed.run(request).map(|_| ())
            })
            .await?
            .map_err(ServiceError::Load)?;
        }
        Ok(pipeline)
    }

    /// Generates one image and returns it encoded in the variant's format.
    ///
    /// The step count is clamped to [`crate::MAX_STEPS`] and unset fields take
    /// the variant's defaults before the pipeline sees the request.
    pub async fn inference(&self, request: GenerationRequest) -> Result<Vec<u8>, ServiceError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ServiceError::Closed)?;
        let _in_flight = InFlight::enter(&self.in_flight);

        let request = request.resolve(self.config.variant);
        let pipeline = self.pipeline().await?;
        let format = self.output_format();
        debug!(
            prompt = %request.prompt,
            steps = ?request.steps,
            seed = ?request.seed,
            "Running inference"
        );

        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ServiceError> {
            let image = pipeline.run(request).map_err(ServiceError::Generation)?;
            Ok(format.encode(&image)?)
        })
        .await;
        self.touch();

        let bytes = result??;
        info!(
            bytes = bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Generated image"
        );
        Ok(bytes)
    }

    /// Drops the pipeline if it has been idle for longer than the timeout.
    ///
    /// Returns whether the pipeline was reclaimed.
    pub async fn reclaim_if_idle(&self) -> bool {
        if self.in_flight() > 0 || self.idle_for() < self.config.idle_timeout {
            return false;
        }
        // A held lock means a load is in progress.
        let Ok(mut slot) = self.pipeline.try_lock() else {
            return false;
        };
        if slot.is_none() || self.in_flight() > 0 {
            return false;
        }
        *slot = None;
        self.state.send_replace(LifecycleState::Reclaimed);
        info!(
            idle_secs = self.idle_for().as_secs(),
            "Pipeline reclaimed after idle timeout"
        );
        true
    }

    /// Periodically reclaims the pipeline once idle. Stops when the service is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let period = (self.config.idle_timeout / 4).max(MIN_REAPER_PERIOD);
        let service: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.reclaim_if_idle().await;
            }
            warn!("Idle reaper stopped");
        })
    }
}
