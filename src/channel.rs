//! Named-method control surface used by the application layer.

use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::bridge::EventSink;
use crate::error::{DetectorError, ErrorKind};
use crate::session::{DetectionSession, StartOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartDetection,
    StopDetection,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("method {0} is not implemented")]
pub struct UnsupportedOperation(pub String);

impl FromStr for Command {
    type Err = UnsupportedOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startDetection" | "registerObserver" => Ok(Command::StartDetection),
            "stopDetection" | "unregisterObserver" => Ok(Command::StopDetection),
            other => Err(UnsupportedOperation(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success,
    Error { code: &'static str, message: String },
    NotImplemented { method: String },
}

pub struct DetectorChannel {
    session: Arc<DetectionSession>,
}

impl DetectorChannel {
    pub fn new(session: Arc<DetectionSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<DetectionSession> {
        &self.session
    }

    pub fn handle(&self, command: Command) -> Reply {
        match command {
            Command::StartDetection => match self.session.start() {
                Ok(StartOutcome::Started) | Ok(StartOutcome::AlreadyRunning) => Reply::Success,
                Err(e) => Self::start_failure(e),
            },
            Command::StopDetection => {
                self.session.stop();
                Reply::Success
            }
        }
    }

    pub fn handle_method(&self, method: &str) -> Reply {
        match method.parse::<Command>() {
            Ok(command) => self.handle(command),
            Err(UnsupportedOperation(method)) => {
                log::warn!("unsupported method {}", method);
                Reply::NotImplemented { method }
            }
        }
    }

    /// Attach the event stream subscriber, replacing any previous one.
    pub fn listen(&self, sink: Arc<dyn EventSink>) {
        self.session.bridge().listen(sink);
    }

    pub fn cancel(&self) {
        self.session.bridge().cancel();
    }

    fn start_failure(e: DetectorError) -> Reply {
        match e.kind() {
            ErrorKind::PermissionDenied => Reply::Error {
                code: ErrorKind::PermissionDenied.code(),
                message: e.to_string(),
            },
            // Already posted on the event stream by the session.
            ErrorKind::InitError | ErrorKind::InferenceError => Reply::Success,
        }
    }
}
