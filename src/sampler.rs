use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::SourceError;
use crate::source::{AudioFrameSource, SourceFactory, SourcePoll};
use crate::{source_frame_len, CaptureConfig, PcmFrame};

/// Sampler owns a dedicated recording session: a recorder process writing raw
/// S16_LE PCM to stdout, and a reader thread slicing it into fixed-size frames.
pub struct Sampler {
    child: Option<Child>,
    recv: Receiver<Result<PcmFrame, SourceError>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Sampler {
    /// Start recording. `frame_len` is the number of samples per channel in
    /// each delivered frame.
    pub fn start(config: &CaptureConfig, frame_len: usize) -> Result<Self, SourceError> {
        let mut cmd = Command::new(&config.recorder);
        cmd.arg("-q")
            .arg("-t")
            .arg("raw")
            .arg("-f")
            .arg("S16_LE")
            .arg("-r")
            .arg(config.sample_rate.to_string())
            .arg("-c")
            .arg(config.channels.to_string());
        if let Some(device) = &config.device {
            cmd.arg("-D").arg(device);
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    SourceError::PermissionDenied(format!("{}: {}", config.recorder, e))
                }
                _ => SourceError::DeviceUnavailable(format!(
                    "failed to start {}: {}",
                    config.recorder, e
                )),
            })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                child.kill().ok();
                child.wait().ok();
                return Err(SourceError::DeviceUnavailable(
                    "recorder stdout unavailable".into(),
                ));
            }
        };

        let (send, recv) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let shutdown2 = shutdown.clone();
        let channels = config.channels.max(1);
        let sample_rate = config.sample_rate;
        let frame_samples = frame_len.max(1) * channels as usize;
        let thread = thread::Builder::new()
            .name("deepvoice-capture".into())
            .spawn(move || {
                Sampler::mainloop(send, shutdown2, stdout, frame_samples, channels, sample_rate);
            });
        let thread = match thread {
            Ok(t) => t,
            Err(e) => {
                child.kill().ok();
                child.wait().ok();
                return Err(SourceError::Io(e));
            }
        };

        log::info!(
            "recording started: {} {}ch/{}Hz, {} samples per frame",
            config.recorder,
            channels,
            sample_rate,
            frame_len
        );

        Ok(Self {
            child: Some(child),
            recv,
            shutdown,
            thread: Some(thread),
        })
    }

    fn mainloop(
        tx: Sender<Result<PcmFrame, SourceError>>,
        shutdown: Arc<AtomicBool>,
        mut stdout: ChildStdout,
        frame_samples: usize,
        channels: u16,
        sample_rate: u32,
    ) {
        let mut bytes = vec![0u8; frame_samples * std::mem::size_of::<i16>()];
        let mut seq = 0u64;

        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = stdout.read_exact(&mut bytes) {
                if !shutdown.load(Ordering::SeqCst) {
                    tx.send(Err(SourceError::DeviceUnavailable(format!(
                        "recorder stream ended: {}",
                        e
                    ))))
                    .ok();
                }
                return;
            }
            if shutdown.load(Ordering::SeqCst) {
                return;
            }

            let samples = bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();
            let frame = PcmFrame {
                seq,
                samples,
                channels,
                sample_rate,
            };
            seq += 1;

            if tx.send(Ok(frame)).is_err() {
                log::debug!("sample receiver gone, capture thread shutting down");
                return;
            }
        }
    }
}

impl AudioFrameSource for Sampler {
    fn next_frame(&mut self, timeout: Duration) -> Result<SourcePoll, SourceError> {
        if self.child.is_none() {
            return Ok(SourcePoll::Finished);
        }
        match self.recv.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(SourcePoll::Frame(frame)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(SourcePoll::Pending),
            Err(RecvTimeoutError::Disconnected) => Ok(SourcePoll::Finished),
        }
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Killing the recorder closes the pipe, which unblocks a pending read.
        if let Some(mut child) = self.child.take() {
            child.kill().ok();
            child.wait().ok();
            log::info!("recording stopped");
        }
        if let Some(hnd) = self.thread.take() {
            hnd.join().ok();
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens a new [`Sampler`] per session. Requires the recording permission.
pub struct SamplerFactory {
    config: CaptureConfig,
    frame_len: usize,
}

impl SamplerFactory {
    pub fn new(config: CaptureConfig, model_input_len: usize) -> Self {
        let frame_len = config
            .frame_len
            .unwrap_or_else(|| source_frame_len(model_input_len, config.sample_rate));
        Self { config, frame_len }
    }
}

impl SourceFactory for SamplerFactory {
    fn requires_record_permission(&self) -> bool {
        true
    }

    fn open(&self) -> Result<Box<dyn AudioFrameSource>, SourceError> {
        Ok(Box::new(Sampler::start(&self.config, self.frame_len)?))
    }
}
