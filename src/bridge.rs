//! Delivery of detection events to the application layer.
//!
//! The inference worker never calls the subscriber directly. Each event is
//! posted as a task onto a main-context executor, and the task looks up the
//! current subscriber when it runs.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::{DetectorError, ErrorKind};

/// An event on the detection stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionEvent {
    /// Fake-voice probability for one processed frame.
    Score(f32),
    Error { kind: ErrorKind, message: String },
}

impl DetectionEvent {
    pub fn from_error(e: &DetectorError) -> Self {
        DetectionEvent::Error {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Subscriber to the detection stream.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &DetectionEvent);
}

impl<F> EventSink for F
where
    F: Fn(&DetectionEvent) + Send + Sync,
{
    fn on_event(&self, event: &DetectionEvent) {
        self(event)
    }
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The UI-affine execution context events are delivered on.
pub trait MainExecutor: Send + Sync {
    fn post(&self, task: Task);
}

/// A FIFO task queue drained by the thread that owns it.
pub struct MainQueue {
    send: Sender<Task>,
    recv: Receiver<Task>,
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MainQueue {
    pub fn new() -> Self {
        let (send, recv) = unbounded();
        Self { send, recv }
    }

    pub fn handle(&self) -> MainQueueHandle {
        MainQueueHandle {
            send: self.send.clone(),
        }
    }

    /// Run every task queued so far. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.recv.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Run tasks as they arrive until `done` returns true or `deadline` passes.
    pub fn run_until<F: FnMut() -> bool>(&self, deadline: Instant, mut done: F) -> usize {
        let mut ran = 0;
        while !done() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.recv.recv_timeout(deadline - now) {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        ran
    }
}

/// Cloneable posting side of a [`MainQueue`].
#[derive(Clone)]
pub struct MainQueueHandle {
    send: Sender<Task>,
}

impl MainExecutor for MainQueueHandle {
    fn post(&self, task: Task) {
        if self.send.send(task).is_err() {
            log::debug!("main queue gone, dropping task");
        }
    }
}

type Slot = Arc<Mutex<Option<Arc<dyn EventSink>>>>;

/// Publishes events to at most one subscriber, on the main context.
#[derive(Clone)]
pub struct EventBridge {
    executor: Arc<dyn MainExecutor>,
    subscriber: Slot,
}

impl EventBridge {
    pub fn new(executor: Arc<dyn MainExecutor>) -> Self {
        Self {
            executor,
            subscriber: Arc::new(Mutex::new(None)),
        }
    }

    /// Attach `sink`, detaching any previous subscriber.
    pub fn listen(&self, sink: Arc<dyn EventSink>) {
        if self.subscriber.lock().replace(sink).is_some() {
            log::debug!("event subscriber replaced");
        }
    }

    pub fn cancel(&self) {
        self.subscriber.lock().take();
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber.lock().is_some()
    }

    pub fn post(&self, event: DetectionEvent) {
        let subscriber = self.subscriber.clone();
        self.executor.post(Box::new(move || {
            let sink = subscriber.lock().clone();
            match sink {
                Some(sink) => sink.on_event(&event),
                None => log::trace!("no subscriber, dropping {:?}", event),
            }
        }));
    }

    pub fn post_score(&self, score: f32) {
        self.post(DetectionEvent::Score(score));
    }

    pub fn post_error(&self, error: &DetectorError) {
        self.post(DetectionEvent::from_error(error));
    }
}
