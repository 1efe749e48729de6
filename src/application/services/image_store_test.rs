#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use image::imageops::FilterType;
    use image::{DynamicImage, GenericImageView};
    use parking_lot::Mutex;
    use tokio_test::{assert_err, assert_ok};

    use crate::application::services::image_store::ImageStore;
    use crate::domain::entities::{ImageId, ImageSource, LoadedImage, Variant};
    use crate::domain::errors::{StoreError, StoreResult};
    use crate::domain::ports::mocks::MockBlobStorePort;
    use crate::domain::ports::{BlobStorePort, ImageCodecPort};
    use crate::infrastructure::config::StoreConfig;
    use crate::infrastructure::image::ImageCrateCodec;
    use crate::infrastructure::storage::MemoryBlobStore;

    /// Codec that counts calls so tests can tell which tier answered.
    struct CountingCodec {
        inner: ImageCrateCodec,
        decodes: AtomicUsize,
        resizes: AtomicUsize,
    }

    impl CountingCodec {
        fn new() -> Self {
            Self {
                inner: ImageCrateCodec::new().with_filter(FilterType::Triangle),
                decodes: AtomicUsize::new(0),
                resizes: AtomicUsize::new(0),
            }
        }

        fn decodes(&self) -> usize {
            self.decodes.load(Ordering::SeqCst)
        }

        fn resizes(&self) -> usize {
            self.resizes.load(Ordering::SeqCst)
        }
    }

    impl ImageCodecPort for CountingCodec {
        fn decode(&self, bytes: &[u8]) -> StoreResult<DynamicImage> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            self.inner.decode(bytes)
        }

        fn resize(&self, image: &DynamicImage, max_dimension: u32) -> DynamicImage {
            self.resizes.fetch_add(1, Ordering::SeqCst);
            self.inner.resize(image, max_dimension)
        }

        fn encode(&self, image: &DynamicImage, quality: u8) -> StoreResult<Vec<u8>> {
            self.inner.encode(image, quality)
        }
    }

    /// Blob store that records every write.
    #[derive(Default)]
    struct RecordingBlobStore {
        inner: MemoryBlobStore,
        writes: Mutex<Vec<Variant>>,
    }

    impl RecordingBlobStore {
        fn writes_of(&self, variant: Variant) -> usize {
            self.writes.lock().iter().filter(|&&v| v == variant).count()
        }
    }

    impl BlobStorePort for RecordingBlobStore {
        fn exists(&self, id: &ImageId, variant: Variant) -> bool {
            self.inner.exists(id, variant)
        }

        fn read(&self, id: &ImageId, variant: Variant) -> StoreResult<Bytes> {
            self.inner.read(id, variant)
        }

        fn write(&self, id: &ImageId, variant: Variant, bytes: &[u8]) -> StoreResult<()> {
            self.writes.lock().push(variant);
            self.inner.write(id, variant, bytes)
        }
    }

    struct Harness {
        store: ImageStore,
        blobs: Arc<MemoryBlobStore>,
        codec: Arc<CountingCodec>,
    }

    fn harness(config: StoreConfig) -> Harness {
        harness_with_blobs(config, Arc::new(MemoryBlobStore::new()))
    }

    fn harness_with_blobs(config: StoreConfig, blobs: Arc<MemoryBlobStore>) -> Harness {
        let codec = Arc::new(CountingCodec::new());
        let store = ImageStore::new(config, blobs.clone(), codec.clone()).unwrap();
        Harness {
            store,
            blobs,
            codec,
        }
    }

    type Deliveries = Rc<RefCell<Vec<LoadedImage>>>;

    fn deliveries() -> Deliveries {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn sink(deliveries: &Deliveries) -> impl FnMut(LoadedImage) + 'static {
        let deliveries = Rc::clone(deliveries);
        move |image| deliveries.borrow_mut().push(image)
    }

    fn jpeg(width: u32, height: u32) -> Bytes {
        let encoded = ImageCrateCodec::new()
            .encode(&DynamicImage::new_rgb8(width, height), 90)
            .unwrap();
        Bytes::from(encoded)
    }

    fn error_log() -> (Arc<Mutex<Vec<StoreError>>>, StoreConfig) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let config = StoreConfig::new().with_io_error_handler(move |e| sink.lock().push(e.clone()));
        (log, config)
    }

    #[tokio::test]
    async fn test_cancelled_pending_load_never_fires_after_save() {
        let mut h = harness(StoreConfig::new());
        let delivered = deliveries();

        let token = h.store.load_image("photo1", 100, sink(&delivered));
        assert_eq!(h.store.pending_count(), 1);
        assert!(h.store.cancel(token));
        assert!(!h.store.cancel(token));

        h.store.save_image("photo1", jpeg(200, 100), || {}, |_| {});
        h.store.run_until_idle().await;

        assert!(delivered.borrow().is_empty());
        assert_eq!(h.codec.decodes(), 0);
    }

    #[tokio::test]
    async fn test_save_then_load_matches_codec_resize() {
        let mut h = harness(StoreConfig::new());
        let bytes = jpeg(300, 200);
        let delivered = deliveries();

        h.store.save_image("photo1", bytes.clone(), || {}, |_| {});
        h.store.run_until_idle().await;
        assert!(h.blobs.exists(&ImageId::new("photo1"), Variant::Original));

        h.store.load_image("photo1", 120, sink(&delivered));
        assert_eq!(h.store.in_flight_count(), 1);
        h.store.run_until_idle().await;

        let reference = ImageCrateCodec::new();
        let expected = reference
            .resize(&reference.decode(&bytes).unwrap(), 120)
            .dimensions();
        let delivered = delivered.borrow();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].image.dimensions(), expected);
        assert_eq!(delivered[0].source, ImageSource::Original);
        assert_eq!(delivered[0].requested_size, 120);
    }

    #[tokio::test]
    async fn test_load_before_save_fires_once_before_on_save() {
        let mut h = harness(StoreConfig::new());
        let events = Rc::new(RefCell::new(Vec::new()));

        let load_events = Rc::clone(&events);
        h.store.load_image("photo1", 100, move |image: LoadedImage| {
            load_events
                .borrow_mut()
                .push(format!("load {:?}", image.image.dimensions()));
        });
        assert_eq!(h.store.pending_count(), 1);

        let save_events = Rc::clone(&events);
        h.store.save_image(
            "photo1",
            jpeg(200, 100),
            move || save_events.borrow_mut().push("saved".to_string()),
            |_| panic!("save should succeed"),
        );
        h.store.run_until_idle().await;

        assert_eq!(*events.borrow(), vec!["load (100, 50)", "saved"]);
        assert_eq!(h.store.pending_count(), 0);
        assert_eq!(h.store.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelling_one_of_two_waiters_keeps_the_other() {
        let mut h = harness(StoreConfig::new());
        let first = deliveries();
        let second = deliveries();

        let first_token = h.store.load_image("photo1", 100, sink(&first));
        let second_token = h.store.load_image("photo1", 100, sink(&second));
        assert_ne!(first_token, second_token);

        assert!(h.store.cancel(first_token));
        h.store.save_image("photo1", jpeg(200, 100), || {}, |_| {});
        h.store.run_until_idle().await;

        assert!(first.borrow().is_empty());
        assert_eq!(second.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_deduplicates_identical_sizes() {
        let mut h = harness(StoreConfig::new());
        let delivered = deliveries();

        h.store.load_image("photo1", 100, sink(&delivered));
        h.store.load_image("photo1", 100, sink(&delivered));
        h.store.load_image("photo1", 50, sink(&delivered));

        h.store.save_image("photo1", jpeg(200, 100), || {}, |_| {});
        h.store.run_until_idle().await;

        let mut sizes: Vec<u32> = delivered
            .borrow()
            .iter()
            .map(LoadedImage::max_dimension)
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![50, 100, 100]);
        assert_eq!(h.codec.decodes(), 2);
    }

    #[tokio::test]
    async fn test_save_writes_each_cached_size_once() {
        let blobs = Arc::new(RecordingBlobStore::default());
        let mut store = ImageStore::new(
            StoreConfig::new().with_cached_size(100),
            blobs.clone(),
            Arc::new(CountingCodec::new()),
        )
        .unwrap();
        let delivered = deliveries();

        store.load_image("p", 100, sink(&delivered));
        store.save_image("p", jpeg(400, 200), || {}, |_| {});
        store.run_until_idle().await;

        assert_eq!(delivered.borrow().len(), 1);
        assert_eq!(blobs.writes_of(Variant::Original), 1);
        assert_eq!(blobs.writes_of(Variant::Sized(100)), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_load_arriving_while_save_completes() {
        let blobs = Arc::new(RecordingBlobStore::default());
        let mut store = ImageStore::new(
            StoreConfig::new().with_cached_size(100),
            blobs.clone(),
            Arc::new(CountingCodec::new()),
        )
        .unwrap();
        let id = ImageId::new("p");
        let events = Rc::new(RefCell::new(Vec::new()));

        let waiter_events = Rc::clone(&events);
        store.load_image("p", 100, move |_| waiter_events.borrow_mut().push("waiter"));
        let save_events = Rc::clone(&events);
        store.save_image(
            "p",
            jpeg(400, 200),
            move || save_events.borrow_mut().push("saved"),
            |e| panic!("unexpected save error: {e}"),
        );

        // The original is on disk but its completion has not been applied yet,
        // so this load schedules its own job from the original.
        while !blobs.exists(&id, Variant::Original) {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        let late_events = Rc::clone(&events);
        store.load_image("p", 100, move |_| late_events.borrow_mut().push("late"));
        assert_eq!(store.in_flight_count(), 1);

        store.run_until_idle().await;

        let events = events.borrow();
        assert_eq!(events.len(), 3);
        assert!(events.contains(&"waiter"));
        assert!(events.contains(&"late"));
        assert_eq!(events.last(), Some(&"saved"));
        assert!(!store.has_outstanding_work());
    }

    #[tokio::test]
    async fn test_load_during_derive_stage_uses_saved_bytes() {
        let blobs = Arc::new(RecordingBlobStore::default());
        let mut store = ImageStore::new(
            StoreConfig::new().with_cached_size(100),
            blobs.clone(),
            Arc::new(CountingCodec::new()),
        )
        .unwrap();
        let delivered = deliveries();

        store.save_image("p", jpeg(400, 200), || {}, |_| {});
        // Apply the original write only, leaving the derive stage outstanding.
        while store.process_completions() == 0 {
            tokio::task::yield_now().await;
        }
        store.load_image("p", 100, sink(&delivered));
        store.run_until_idle().await;

        assert_eq!(delivered.borrow().len(), 1);
        assert_eq!(blobs.writes_of(Variant::Sized(100)), 1);
    }

    #[tokio::test]
    async fn test_interim_thumbnail_precedes_requested_size() {
        let mut h = harness(StoreConfig::new().with_thumbnail_size(30));
        let delivered = deliveries();

        h.store.save_image("photo1", jpeg(300, 200), || {}, |_| {});
        h.store.run_until_idle().await;
        assert!(h.store.memory_cache().contains(&ImageId::new("photo1"), 30));

        h.store.load_image("photo1", 120, sink(&delivered));
        {
            let delivered = delivered.borrow();
            assert_eq!(delivered.len(), 1);
            assert!(delivered[0].is_interim());
            assert_eq!(delivered[0].max_dimension(), 30);
        }

        h.store.run_until_idle().await;
        let delivered = delivered.borrow();
        assert_eq!(delivered.len(), 2);
        assert!(!delivered[1].is_interim());
        assert_eq!(delivered[1].max_dimension(), 120);
    }

    #[tokio::test]
    async fn test_memory_hit_is_delivered_synchronously() {
        let mut h = harness(StoreConfig::new());
        h.blobs
            .write(&ImageId::new("photo1"), Variant::Original, &jpeg(200, 100))
            .unwrap();

        h.store.load_image("photo1", 100, |_| {});
        h.store.run_until_idle().await;
        let decodes = h.codec.decodes();

        let delivered = deliveries();
        let token = h.store.load_image("photo1", 100, sink(&delivered));

        assert_eq!(delivered.borrow().len(), 1);
        assert_eq!(delivered.borrow()[0].source, ImageSource::MemoryCache);
        assert!(!h.store.cancel(token));
        assert!(!h.store.has_outstanding_work());
        assert_eq!(h.codec.decodes(), decodes);
    }

    #[tokio::test]
    async fn test_cached_size_is_written_through_and_reused() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let id = ImageId::new("photo1");
        blobs.write(&id, Variant::Original, &jpeg(400, 200)).unwrap();

        let mut h = harness_with_blobs(StoreConfig::new(), Arc::clone(&blobs));
        assert_ok!(h.store.add_cached_size(100));
        h.store.load_image("photo1", 100, |_| {});
        h.store.run_until_idle().await;

        assert!(blobs.exists(&id, Variant::Sized(100)));
        let persisted = blobs.read(&id, Variant::Sized(100)).unwrap();
        let decoded = ImageCrateCodec::new().decode(&persisted).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));

        // A fresh store with an empty memory cache answers from the sized tier.
        let mut fresh = harness_with_blobs(StoreConfig::new().with_cached_size(100), blobs);
        let delivered = deliveries();
        fresh.store.load_image("photo1", 100, sink(&delivered));
        fresh.store.run_until_idle().await;

        assert_eq!(delivered.borrow()[0].source, ImageSource::SizedVariant);
        assert_eq!(fresh.codec.resizes(), 0);
    }

    #[tokio::test]
    async fn test_photo_scenario_with_thumbnail_and_cached_size() {
        let mut h = harness(StoreConfig::new().with_thumbnail_size(120).with_cached_size(480));
        let id = ImageId::new("photo1");
        let bytes = jpeg(2000, 1500);
        let saved = Rc::new(Cell::new(false));

        let saved_flag = Rc::clone(&saved);
        h.store
            .save_image("photo1", bytes.clone(), move || saved_flag.set(true), |_| {});
        h.store.run_until_idle().await;

        assert!(saved.get());
        assert_eq!(h.blobs.read(&id, Variant::Original).unwrap(), bytes);
        let thumbnail = ImageCrateCodec::new()
            .decode(&h.blobs.read(&id, Variant::Thumbnail).unwrap())
            .unwrap();
        assert_eq!(thumbnail.dimensions(), (120, 90));

        let delivered = deliveries();
        h.store.load_image("photo1", 480, sink(&delivered));
        h.store.run_until_idle().await;

        let delivered = delivered.borrow();
        let last = delivered.last().unwrap();
        assert!(!last.is_interim());
        assert_eq!(last.image.dimensions(), (480, 360));
        assert!(h.blobs.exists(&id, Variant::Sized(480)));
    }

    #[tokio::test]
    async fn test_failed_save_reports_on_error_and_keeps_waiters() {
        let mut blobs = MockBlobStorePort::new();
        blobs.expect_exists().return_const(false);
        blobs
            .expect_write()
            .returning(|_, _, _| Err(StoreError::io("disk full")));
        let mut store = ImageStore::new(
            StoreConfig::new().with_thumbnail_size(30),
            Arc::new(blobs),
            Arc::new(ImageCrateCodec::new()),
        )
        .unwrap();
        let delivered = deliveries();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let saved = Rc::new(Cell::new(false));

        store.load_image("photo1", 10, sink(&delivered));
        let error_sink = Rc::clone(&errors);
        let saved_flag = Rc::clone(&saved);
        store.save_image(
            "photo1",
            jpeg(20, 20),
            move || saved_flag.set(true),
            move |e| error_sink.borrow_mut().push(e),
        );
        store.run_until_idle().await;

        assert_eq!(*errors.borrow(), vec![StoreError::io("disk full")]);
        assert!(!saved.get());
        assert!(delivered.borrow().is_empty());
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_thumbnail_failure_goes_to_store_handler() {
        let mut blobs = MockBlobStorePort::new();
        blobs.expect_write().returning(|_, variant, _| match variant {
            Variant::Original => Ok(()),
            _ => Err(StoreError::io("read-only thumbnails")),
        });
        let (log, config) = error_log();
        let mut store = ImageStore::new(
            config.with_thumbnail_size(30),
            Arc::new(blobs),
            Arc::new(ImageCrateCodec::new()),
        )
        .unwrap();
        let saved = Rc::new(Cell::new(false));

        let saved_flag = Rc::clone(&saved);
        store.save_image(
            "photo1",
            jpeg(60, 60),
            move || saved_flag.set(true),
            |e| panic!("unexpected save error: {e}"),
        );
        store.run_until_idle().await;

        assert!(saved.get());
        assert_eq!(*log.lock(), vec![StoreError::io("read-only thumbnails")]);
        // The thumbnail still reaches the memory cache.
        assert!(store.memory_cache().contains(&ImageId::new("photo1"), 30));
    }

    #[tokio::test]
    async fn test_undecodable_original_reports_and_never_calls_back() {
        let (log, config) = error_log();
        let mut h = harness(config);
        h.blobs
            .write(&ImageId::new("broken"), Variant::Original, b"not an image")
            .unwrap();
        let delivered = deliveries();

        h.store.load_image("broken", 10, sink(&delivered));
        h.store.run_until_idle().await;

        assert!(delivered.borrow().is_empty());
        assert_eq!(h.store.in_flight_count(), 0);
        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert!(matches!(log[0], StoreError::Decode(_)));
    }

    #[tokio::test]
    async fn test_cancel_scheduled_load() {
        let mut h = harness(StoreConfig::new());
        h.blobs
            .write(&ImageId::new("photo1"), Variant::Original, &jpeg(200, 100))
            .unwrap();
        let delivered = deliveries();

        let token = h.store.load_image("photo1", 100, sink(&delivered));
        assert_eq!(h.store.in_flight_count(), 1);
        assert!(h.store.cancel(token));
        h.store.run_until_idle().await;

        assert!(delivered.borrow().is_empty());
        assert_eq!(h.store.in_flight_count(), 0);
        assert!(!h.store.cancel(token));
    }

    #[tokio::test]
    async fn test_cancel_all_for_one_image() {
        let mut h = harness(StoreConfig::new());
        h.blobs
            .write(&ImageId::new("a"), Variant::Original, &jpeg(40, 40))
            .unwrap();
        let delivered = deliveries();

        h.store.load_image("a", 10, sink(&delivered));
        h.store.load_image("a", 10, sink(&delivered));
        h.store.load_image("a", 20, sink(&delivered));
        h.store.load_image("b", 10, sink(&delivered));

        assert_eq!(h.store.cancel_all(&ImageId::new("a")), 3);
        assert_eq!(h.store.pending_count(), 1);
        h.store.run_until_idle().await;

        assert!(delivered.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_job() {
        let mut h = harness(StoreConfig::new());
        h.blobs
            .write(&ImageId::new("a"), Variant::Original, &jpeg(80, 40))
            .unwrap();
        let first = deliveries();
        let second = deliveries();

        let cancelled = h.store.load_image("a", 20, sink(&first));
        h.store.load_image("a", 20, sink(&second));
        assert!(h.store.cancel(cancelled));
        h.store.run_until_idle().await;

        assert!(first.borrow().is_empty());
        assert_eq!(second.borrow().len(), 1);
        assert_eq!(h.codec.decodes(), 1);
    }

    #[tokio::test]
    async fn test_configuration_locks_after_traffic() {
        let mut h = harness(StoreConfig::new());
        assert!(assert_ok!(h.store.add_cached_size(480)));
        assert!(!assert_ok!(h.store.add_cached_size(480)));

        h.store.load_image("a", 480, |_| {});

        let err = assert_err!(h.store.add_cached_size(960));
        assert_eq!(err, StoreError::ConfigurationLocked);
        assert!(!h.store.config().is_cached_size(960));
    }

    #[tokio::test]
    async fn test_preload_thumbnails_through_store() {
        let h = harness(StoreConfig::new().with_thumbnail_size(30));
        let id = ImageId::new("album/photo1");
        h.blobs.write(&id, Variant::Original, &jpeg(90, 60)).unwrap();

        assert_eq!(h.store.preload_thumbnails(&[id.clone()]), 1);
        assert!(h.store.memory_cache().contains(&id, 30));
        assert!(h.blobs.exists(&id, Variant::Thumbnail));
    }

    #[tokio::test]
    async fn test_dropping_store_releases_waiters() {
        let h = harness(StoreConfig::new());
        let mut store = h.store;
        let delivered = deliveries();

        store.load_image("never-saved", 10, sink(&delivered));
        assert_eq!(Rc::strong_count(&delivered), 2);

        drop(store);

        assert_eq!(Rc::strong_count(&delivered), 1);
        assert!(delivered.borrow().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_process_completions_polling() {
        let mut h = harness(StoreConfig::new());
        let delivered = deliveries();

        h.store.save_image("photo1", jpeg(100, 100), || {}, |_| {});
        h.store.load_image("photo1", 50, sink(&delivered));

        while h.store.has_outstanding_work() {
            h.store.process_completions();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(delivered.borrow().len(), 1);
        assert_eq!(h.store.cache_stats().size, 1);
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let result = ImageStore::new(
            StoreConfig::new(),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(ImageCrateCodec::new()),
        );
        assert!(matches!(result, Err(StoreError::Runtime(_))));
    }
}
