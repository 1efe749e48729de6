//! Image store orchestrator.
//!
//! Resolves loads against memory -> persisted sized variant -> original,
//! parks loads for images that are not saved yet, and runs every blocking
//! step on the tokio blocking pool. Results come back over a channel and are
//! applied on the thread that owns the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::domain::entities::{CacheKey, ImageId, ImageSource, LoadToken, LoadedImage, Variant};
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::ports::{BlobStorePort, ImageCodecPort};
use crate::infrastructure::config::StoreConfig;
use crate::infrastructure::image::{CacheStats, MemoryImageCache};

use super::pending_registry::PendingRequestRegistry;
use super::rendition_pipeline::{JobOutcome, JobSource, RenditionPipeline};
use super::thumbnail_preloader::ThumbnailPreloader;

/// Receives loaded images. May run zero, one or two times per request:
/// an interim thumbnail first, then the requested size.
pub type ImageCallback = Box<dyn FnMut(LoadedImage)>;
/// Runs once a save has written the original and attempted its follow-up work.
pub type SaveCallback = Box<dyn FnOnce()>;
/// Runs if a save could not write the original.
pub type SaveErrorCallback = Box<dyn FnOnce(StoreError)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct JobId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SaveId(u64);

/// Messages from the worker pool back to the owning thread.
enum Completion {
    OriginalWritten {
        save: SaveId,
        result: StoreResult<()>,
    },
    RenditionsDerived {
        save: SaveId,
        errors: Vec<StoreError>,
    },
    Loaded {
        job: JobId,
        outcome: JobOutcome,
        write_error: Option<StoreError>,
    },
}

/// A scheduled load shared by every request for the same rendition.
struct LoadJob {
    key: CacheKey,
    tokens: Vec<LoadToken>,
    cancelled: Arc<AtomicBool>,
    writes_through: bool,
    saves: Vec<SaveId>,
}

struct Delivery {
    job: JobId,
    callback: ImageCallback,
}

struct SaveState {
    id: ImageId,
    bytes: Bytes,
    on_save: Option<SaveCallback>,
    on_error: Option<SaveErrorCallback>,
    written: bool,
    remaining: usize,
}

/// Multi-tier image cache with an asynchronous resize pipeline.
///
/// Every method taking `&mut self` must be called from the owning thread, and
/// callbacks only ever run there, inside `process_completions` or
/// `run_until_idle` (or synchronously inside `load_image` for memory hits).
/// Callbacks must not call back into the store.
pub struct ImageStore {
    pipeline: RenditionPipeline,
    runtime: Handle,
    registry: PendingRequestRegistry<ImageCallback>,
    deliveries: HashMap<LoadToken, Delivery>,
    jobs: HashMap<JobId, LoadJob>,
    jobs_by_key: HashMap<CacheKey, JobId>,
    saves: HashMap<SaveId, SaveState>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    outstanding: usize,
    next_job: u64,
    next_save: u64,
    traffic_started: bool,
}

impl std::fmt::Debug for ImageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStore")
            .field("config", &self.pipeline.config)
            .field("pending", &self.registry.len())
            .field("in_flight", &self.deliveries.len())
            .field("outstanding", &self.outstanding)
            .finish_non_exhaustive()
    }
}

impl ImageStore {
    /// Creates a store on the current tokio runtime.
    ///
    /// # Errors
    /// Returns `StoreError::Runtime` if called outside a tokio runtime.
    pub fn new(
        config: StoreConfig,
        blobs: Arc<dyn BlobStorePort>,
        codec: Arc<dyn ImageCodecPort>,
    ) -> StoreResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| StoreError::Runtime(format!("No tokio runtime: {e}")))?;
        Ok(Self::with_runtime(config, blobs, codec, runtime))
    }

    /// Creates a store dispatching work onto the given runtime.
    #[must_use]
    pub fn with_runtime(
        config: StoreConfig,
        blobs: Arc<dyn BlobStorePort>,
        codec: Arc<dyn ImageCodecPort>,
        runtime: Handle,
    ) -> Self {
        let cache = Arc::new(MemoryImageCache::new(config.memory_cache_capacity()));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            pipeline: RenditionPipeline {
                blobs,
                codec,
                cache,
                config: Arc::new(config),
            },
            runtime,
            registry: PendingRequestRegistry::new(),
            deliveries: HashMap::new(),
            jobs: HashMap::new(),
            jobs_by_key: HashMap::new(),
            saves: HashMap::new(),
            completion_tx,
            completion_rx,
            outstanding: 0,
            next_job: 0,
            next_save: 0,
            traffic_started: false,
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.pipeline.config
    }

    /// Memory cache shared with the worker pool.
    #[must_use]
    pub fn memory_cache(&self) -> &Arc<MemoryImageCache> {
        &self.pipeline.cache
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.pipeline.cache.stats()
    }

    /// Number of loads parked until their image is saved.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of loads attached to scheduled work.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.deliveries.len()
    }

    /// Adds a size whose renditions are persisted in the cache tier.
    ///
    /// Returns whether the size was new.
    ///
    /// # Errors
    /// Returns `StoreError::ConfigurationLocked` after the first load or save.
    pub fn add_cached_size(&mut self, size: u32) -> StoreResult<bool> {
        if self.traffic_started {
            return Err(StoreError::ConfigurationLocked);
        }
        let added = Arc::make_mut(&mut self.pipeline.config).insert_cached_size(size);
        if added {
            debug!(size = size, "Added cached file size");
        }
        Ok(added)
    }

    /// Requests `id` fitted within `size × size`.
    ///
    /// A cached rendition is delivered before this returns. Otherwise a cached
    /// thumbnail may be delivered immediately as an interim result, and the
    /// requested size follows once the pool has produced it, or once the image
    /// is saved if it does not exist yet. The returned token cancels whatever
    /// delivery is still outstanding.
    pub fn load_image(
        &mut self,
        id: impl Into<ImageId>,
        size: u32,
        callback: impl FnMut(LoadedImage) + 'static,
    ) -> LoadToken {
        self.traffic_started = true;
        let id = id.into();
        let mut callback: ImageCallback = Box::new(callback);
        let cache = &self.pipeline.cache;
        let config = &self.pipeline.config;

        if let Some(image) = cache.get(&id, size) {
            callback(LoadedImage {
                id,
                requested_size: size,
                image,
                source: ImageSource::MemoryCache,
            });
            return LoadToken::new();
        }

        if let Some(thumbnail_size) = config.thumbnail_size()
            && thumbnail_size != size
            && let Some(image) = cache.get(&id, thumbnail_size)
        {
            trace!(id = %id, size = size, "Delivering interim thumbnail");
            callback(LoadedImage {
                id: id.clone(),
                requested_size: size,
                image,
                source: ImageSource::InterimThumbnail,
            });
        }

        let blobs = &self.pipeline.blobs;
        let source = if let Some(bytes) = self.saved_bytes(&id) {
            // Renditions of an in-progress save are written by its derive stage.
            JobSource::SavedBytes(bytes)
        } else if config.is_cached_size(size) && blobs.exists(&id, Variant::Sized(size)) {
            JobSource::SizedVariant
        } else if blobs.exists(&id, Variant::Original) {
            JobSource::Original
        } else {
            debug!(id = %id, size = size, "Image not saved yet, waiting");
            return self.registry.register(id, size, callback);
        };

        let token = LoadToken::new();
        self.attach(token, CacheKey::new(id, size), source, callback);
        token
    }

    /// Saves the original bytes of `id`.
    ///
    /// The write and all follow-up work run on the pool. `on_error` runs if the
    /// original cannot be written. Otherwise the thumbnail and cached sizes are
    /// rendered, loads waiting for `id` are satisfied, and `on_save` runs once
    /// all of that has been attempted. Follow-up failures go to the store-wide
    /// I/O error handler.
    pub fn save_image(
        &mut self,
        id: impl Into<ImageId>,
        bytes: impl Into<Bytes>,
        on_save: impl FnOnce() + 'static,
        on_error: impl FnOnce(StoreError) + 'static,
    ) {
        self.traffic_started = true;
        let id = id.into();
        let bytes = bytes.into();
        let save = SaveId(self.next_save);
        self.next_save += 1;

        debug!(id = %id, size = bytes.len(), "Saving image");
        self.saves.insert(
            save,
            SaveState {
                id: id.clone(),
                bytes: bytes.clone(),
                on_save: Some(Box::new(on_save)),
                on_error: Some(Box::new(on_error)),
                written: false,
                remaining: 0,
            },
        );

        let blobs = Arc::clone(&self.pipeline.blobs);
        self.dispatch(
            move || Completion::OriginalWritten {
                save,
                result: blobs.write(&id, Variant::Original, &bytes),
            },
            Completion::OriginalWritten {
                save,
                result: Err(StoreError::Runtime("Save worker panicked".to_string())),
            },
        );
    }

    /// Cancels one load. Its callback will not run again.
    ///
    /// Returns false if the token already completed or was cancelled.
    pub fn cancel(&mut self, token: LoadToken) -> bool {
        if self.registry.cancel(token) {
            return true;
        }
        let Some(delivery) = self.deliveries.remove(&token) else {
            return false;
        };
        if let Some(job) = self.jobs.get_mut(&delivery.job) {
            job.tokens.retain(|t| *t != token);
            if job.tokens.is_empty() {
                job.cancelled.store(true, Ordering::Release);
                if self.jobs_by_key.get(&job.key) == Some(&delivery.job) {
                    self.jobs_by_key.remove(&job.key);
                }
                debug!(key = %job.key, "Abandoning load with no remaining requesters");
            }
        }
        true
    }

    /// Cancels every outstanding load for `id`. Returns how many were cancelled.
    pub fn cancel_all(&mut self, id: &ImageId) -> usize {
        let mut cancelled = self.registry.cancel_all(id);
        let tokens: Vec<LoadToken> = self
            .deliveries
            .iter()
            .filter(|(_, delivery)| {
                self.jobs
                    .get(&delivery.job)
                    .is_some_and(|job| &job.key.id == id)
            })
            .map(|(token, _)| *token)
            .collect();
        for token in tokens {
            if self.cancel(token) {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Warms the memory cache with thumbnails. Blocks the calling thread.
    pub fn preload_thumbnails(&self, ids: &[ImageId]) -> usize {
        self.thumbnail_preloader().preload(ids)
    }

    /// Returns a preloader that can run on another thread.
    #[must_use]
    pub fn thumbnail_preloader(&self) -> ThumbnailPreloader {
        ThumbnailPreloader::new(self.pipeline.clone())
    }

    /// Applies every completion that has already arrived. Never blocks.
    ///
    /// Returns how many completions were applied.
    pub fn process_completions(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.apply(completion);
            processed += 1;
        }
        processed
    }

    /// Applies completions until no scheduled work remains.
    pub async fn run_until_idle(&mut self) {
        while self.outstanding > 0 {
            match self.completion_rx.recv().await {
                Some(completion) => self.apply(completion),
                None => break,
            }
        }
    }

    /// Returns true while scheduled work has not reported back.
    #[must_use]
    pub fn has_outstanding_work(&self) -> bool {
        self.outstanding > 0
    }

    fn attach(
        &mut self,
        token: LoadToken,
        key: CacheKey,
        source: JobSource,
        callback: ImageCallback,
    ) -> (JobId, bool) {
        let (job_id, spawned) = match self.jobs_by_key.get(&key) {
            Some(&job_id) => {
                trace!(key = %key, "Joining scheduled load");
                (job_id, false)
            }
            None => (self.spawn_load(key, source), true),
        };
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.tokens.push(token);
        }
        self.deliveries.insert(
            token,
            Delivery {
                job: job_id,
                callback,
            },
        );
        (job_id, spawned)
    }

    fn spawn_load(&mut self, key: CacheKey, source: JobSource) -> JobId {
        let job_id = JobId(self.next_job);
        self.next_job += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        let writes_through = !matches!(source, JobSource::SavedBytes(_))
            && self.pipeline.config.is_cached_size(key.size);
        debug!(key = %key, source = source.kind(), "Scheduling load");

        self.jobs.insert(
            job_id,
            LoadJob {
                key: key.clone(),
                tokens: Vec::new(),
                cancelled: Arc::clone(&cancelled),
                writes_through,
                saves: Vec::new(),
            },
        );
        self.jobs_by_key.insert(key.clone(), job_id);

        let pipeline = self.pipeline.clone();
        self.dispatch(
            move || {
                let (outcome, write_error) = pipeline.run_load(&key, source, &cancelled);
                Completion::Loaded {
                    job: job_id,
                    outcome,
                    write_error,
                }
            },
            Completion::Loaded {
                job: job_id,
                outcome: JobOutcome::Failed(StoreError::Runtime(
                    "Load worker panicked".to_string(),
                )),
                write_error: None,
            },
        );
        job_id
    }

    /// Runs `work` on the blocking pool and reports its completion,
    /// or `on_panic` if the worker panicked.
    fn dispatch<F>(&mut self, work: F, on_panic: Completion)
    where
        F: FnOnce() -> Completion + Send + 'static,
    {
        self.outstanding += 1;
        let tx = self.completion_tx.clone();
        let task = self.runtime.spawn_blocking(work);
        self.runtime.spawn(async move {
            let completion = match task.await {
                Ok(completion) => completion,
                Err(e) => {
                    error!(error = %e, "Image worker panicked");
                    on_panic
                }
            };
            let _ = tx.send(completion);
        });
    }

    fn apply(&mut self, completion: Completion) {
        self.outstanding = self.outstanding.saturating_sub(1);
        match completion {
            Completion::OriginalWritten { save, result } => self.on_original_written(save, result),
            Completion::RenditionsDerived { save, errors } => {
                for e in &errors {
                    self.pipeline.config.report_io_error(e);
                }
                self.finish_save_stage(save);
            }
            Completion::Loaded {
                job,
                outcome,
                write_error,
            } => {
                if let Some(e) = write_error {
                    self.pipeline.config.report_io_error(&e);
                }
                self.on_load_finished(job, outcome);
            }
        }
    }

    fn on_original_written(&mut self, save: SaveId, result: StoreResult<()>) {
        if let Err(e) = result {
            warn!(error = %e, "Failed to save image");
            if let Some(state) = self.saves.remove(&save)
                && let Some(on_error) = state.on_error
            {
                on_error(e);
            }
            return;
        }
        let Some(state) = self.saves.get_mut(&save) else {
            return;
        };
        state.written = true;
        let id = state.id.clone();
        let bytes = state.bytes.clone();
        let mut stages = 0;

        // Waiters join or spawn jobs first, so the derive stage can leave
        // sizes already being written through by a scheduled load alone.
        for waiter in self.registry.drain(&id) {
            let key = CacheKey::new(id.clone(), waiter.size);
            let source = JobSource::SavedBytes(bytes.clone());
            let (job_id, _) = self.attach(waiter.token, key, source, waiter.callback);
            if let Some(job) = self.jobs.get_mut(&job_id)
                && !job.saves.contains(&save)
            {
                job.saves.push(save);
                stages += 1;
            }
        }

        let config = &self.pipeline.config;
        if config.thumbnail_size().is_some() || !config.cached_sizes().is_empty() {
            let skip: Vec<u32> = config
                .cached_sizes()
                .iter()
                .copied()
                .filter(|&size| {
                    self.jobs_by_key
                        .get(&CacheKey::new(id.clone(), size))
                        .and_then(|job_id| self.jobs.get(job_id))
                        .is_some_and(|job| job.writes_through)
                })
                .collect();
            let pipeline = self.pipeline.clone();
            let derive_id = id.clone();
            self.dispatch(
                move || Completion::RenditionsDerived {
                    save,
                    errors: pipeline.derive_renditions(&derive_id, &bytes, &skip),
                },
                Completion::RenditionsDerived {
                    save,
                    errors: vec![StoreError::Runtime(
                        "Rendition worker panicked".to_string(),
                    )],
                },
            );
            stages += 1;
        }

        debug!(id = %id, stages = stages, "Original written");
        if let Some(state) = self.saves.get_mut(&save) {
            state.remaining = stages;
        }
        if stages == 0 {
            self.complete_save(save);
        }
    }

    fn on_load_finished(&mut self, job_id: JobId, outcome: JobOutcome) {
        let Some(job) = self.jobs.remove(&job_id) else {
            return;
        };
        if self.jobs_by_key.get(&job.key) == Some(&job_id) {
            self.jobs_by_key.remove(&job.key);
        }

        match outcome {
            JobOutcome::Ready { image, source } => {
                for token in &job.tokens {
                    if let Some(mut delivery) = self.deliveries.remove(token) {
                        (delivery.callback)(LoadedImage {
                            id: job.key.id.clone(),
                            requested_size: job.key.size,
                            image: Arc::clone(&image),
                            source,
                        });
                    }
                }
                trace!(key = %job.key, delivered = job.tokens.len(), "Load finished");
            }
            JobOutcome::Failed(e) => {
                warn!(key = %job.key, error = %e, "Load failed");
                for token in &job.tokens {
                    self.deliveries.remove(token);
                }
                self.pipeline.config.report_io_error(&e);
            }
            JobOutcome::Abandoned => {
                trace!(key = %job.key, "Cancelled load stopped early");
            }
        }

        for save in job.saves {
            self.finish_save_stage(save);
        }
    }

    /// Bytes of a save whose original is written but whose follow-up work is still running.
    fn saved_bytes(&self, id: &ImageId) -> Option<Bytes> {
        self.saves
            .values()
            .find(|state| state.written && &state.id == id)
            .map(|state| state.bytes.clone())
    }

    fn finish_save_stage(&mut self, save: SaveId) {
        let Some(state) = self.saves.get_mut(&save) else {
            return;
        };
        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining == 0 {
            self.complete_save(save);
        }
    }

    fn complete_save(&mut self, save: SaveId) {
        if let Some(state) = self.saves.remove(&save) {
            debug!(id = %state.id, "Save complete");
            if let Some(on_save) = state.on_save {
                on_save();
            }
        }
    }
}

impl Drop for ImageStore {
    fn drop(&mut self) {
        let pending = self.registry.clear();
        for job in self.jobs.values() {
            job.cancelled.store(true, Ordering::Release);
        }
        let in_flight = self.deliveries.len();
        self.deliveries.clear();
        if pending > 0 || in_flight > 0 {
            info!(
                pending = pending,
                in_flight = in_flight,
                "Image store dropped, cancelled outstanding loads"
            );
        }
    }
}
