//! Detection session controller.
//!
//! ```text
//! [AudioFrameSource] → [Preprocessor] → [ClassifierEngine] → [ScoreAggregator] → [EventBridge]
//!  \_____________________ deepvoice-inference thread _____________________/
//! ```
//!
//! One worker thread owns the source and the engine for the whole session.
//! It checks the running flag between frames and releases both before it
//! exits, so `stop` only has to clear the flag and join.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::aggregate::ScoreAggregator;
use crate::bridge::EventBridge;
use crate::classifier::{ClassifierEngine, ModelLoader};
use crate::error::{DetectorError, ErrorKind};
use crate::preprocess::Preprocessor;
use crate::source::{AudioFrameSource, RecordPermission, SourceFactory, SourcePoll, StaticPermission};
use crate::{ClassifierOptions, LengthPolicy};

/// Per-session pipeline parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub classifier: ClassifierOptions,
    pub target_label: String,
    pub length_policy: LengthPolicy,
    /// Longest the worker blocks on the source before re-checking the flag.
    pub poll_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            classifier: ClassifierOptions::default(),
            target_label: "fake".to_string(),
            length_policy: LengthPolicy::default(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session was already running; nothing was created.
    AlreadyRunning,
}

struct Pipeline {
    source: Box<dyn AudioFrameSource>,
    engine: ClassifierEngine,
    preprocessor: Preprocessor,
    aggregator: ScoreAggregator,
}

/// Clears the running flag when the worker exits, including by panic.
struct ClearOnExit(Arc<AtomicBool>);

impl Drop for ClearOnExit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Pipeline {
    fn run(mut self, running: Arc<AtomicBool>, bridge: EventBridge, poll: Duration) {
        let _guard = ClearOnExit(running.clone());
        let mut frames = 0u64;

        while running.load(Ordering::SeqCst) {
            let frame = match self.source.next_frame(poll) {
                Ok(SourcePoll::Frame(frame)) => frame,
                Ok(SourcePoll::Pending) => continue,
                Ok(SourcePoll::Finished) => {
                    log::info!("audio source finished after {} frames", frames);
                    break;
                }
                Err(e) => {
                    let err = DetectorError::from(e);
                    log::error!("audio source failed: {}", err);
                    bridge.post_error(&err);
                    break;
                }
            };

            let input = match self.preprocessor.process(&frame) {
                Ok(input) => input,
                Err(e) => {
                    let err = DetectorError::from(e);
                    log::error!("preprocessing failed on frame {}: {}", frame.seq, err);
                    bridge.post_error(&err);
                    break;
                }
            };
            let categories = match self.engine.classify(&input) {
                Ok(categories) => categories,
                Err(e) => {
                    let err = DetectorError::from(e);
                    log::error!("classification failed on frame {}: {}", frame.seq, err);
                    bridge.post_error(&err);
                    break;
                }
            };

            let score = self.aggregator.select(&categories);
            log::debug!("frame {} scored {:.3}", frame.seq, score);
            bridge.post_score(score);
            frames += 1;
        }

        self.source.stop();
        self.engine.release();
    }
}

#[derive(Default)]
struct Inner {
    worker: Option<thread::JoinHandle<()>>,
}

/// Owns start/stop state and the inference worker.
///
/// `start` and `stop` may be called from any thread; both go through one
/// lock, and both are idempotent.
pub struct DetectionSession {
    settings: PipelineSettings,
    loader: Arc<dyn ModelLoader>,
    sources: Arc<dyn SourceFactory>,
    permission: Arc<dyn RecordPermission>,
    bridge: EventBridge,
    running: Arc<AtomicBool>,
    inner: Mutex<Inner>,
}

impl DetectionSession {
    pub fn new(
        settings: PipelineSettings,
        loader: Arc<dyn ModelLoader>,
        sources: Arc<dyn SourceFactory>,
        bridge: EventBridge,
    ) -> Self {
        Self {
            settings,
            loader,
            sources,
            permission: Arc::new(StaticPermission(true)),
            bridge,
            running: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Gate `start` on a recording permission, for sources that need one.
    pub fn with_permission(mut self, permission: Arc<dyn RecordPermission>) -> Self {
        self.permission = permission;
        self
    }

    pub fn bridge(&self) -> &EventBridge {
        &self.bridge
    }

    pub fn state(&self) -> SessionState {
        if self.running.load(Ordering::SeqCst) {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    /// Begin detection.
    ///
    /// Permission failures are returned without touching any audio resource.
    /// Model or device failures are also posted once on the event stream.
    /// Either way the session stays idle.
    pub fn start(&self) -> Result<StartOutcome, DetectorError> {
        let mut inner = self.inner.lock();
        if self.running.load(Ordering::SeqCst) {
            log::debug!("start ignored, detection already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        // A worker that ended on its own has released everything; collect it.
        Self::reap(&mut inner);

        if self.sources.requires_record_permission() && !self.permission.is_granted() {
            log::warn!("start rejected, recording permission not granted");
            return Err(DetectorError::PermissionDenied);
        }

        let pipeline = match self.open_pipeline() {
            Ok(pipeline) => pipeline,
            Err(e) => return Err(self.fail_start(e)),
        };

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let bridge = self.bridge.clone();
        let poll = self.settings.poll_interval;
        let spawned = thread::Builder::new()
            .name("deepvoice-inference".into())
            .spawn(move || pipeline.run(running, bridge, poll));

        match spawned {
            Ok(handle) => {
                inner.worker = Some(handle);
                log::info!("detection started");
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(self.fail_start(DetectorError::Worker(e.to_string())))
            }
        }
    }

    /// End detection. Always succeeds; a no-op when idle.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if Self::reap(&mut inner) {
            log::info!("detection stopped");
        } else if !was_running {
            log::debug!("stop ignored, detection not running");
        }
    }

    fn open_pipeline(&self) -> Result<Pipeline, DetectorError> {
        let mut engine = ClassifierEngine::new(self.settings.classifier);
        engine.load(self.loader.as_ref())?;
        let input_len = engine
            .input_len()
            .filter(|len| *len > 0)
            .ok_or_else(|| DetectorError::ModelLoad("model reports an empty input".into()))?;

        // The engine is released on drop if the source cannot be opened.
        let source = self.sources.open()?;

        Ok(Pipeline {
            source,
            engine,
            preprocessor: Preprocessor::new(input_len, self.settings.length_policy),
            aggregator: ScoreAggregator::new(self.settings.target_label.clone()),
        })
    }

    fn fail_start(&self, e: DetectorError) -> DetectorError {
        log::error!("detection failed to start: {}", e);
        if e.kind() != ErrorKind::PermissionDenied {
            self.bridge.post_error(&e);
        }
        e
    }

    fn reap(inner: &mut Inner) -> bool {
        match inner.worker.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    log::error!("inference worker panicked");
                }
                true
            }
            None => false,
        }
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        self.stop();
    }
}
