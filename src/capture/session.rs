use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::abort::AbortSignal;
use crate::capture::artifacts::SessionLog;
use crate::capture::state::{FailureReason, SessionState, Transition};
use crate::capture::tools::{
    CaptureRequest, DecodeRequest, ResampleRequest, ToolError, Toolchain, TransferRequest,
};
use crate::config::Config;
use crate::planner::{ScheduledSession, SessionPaths};
use crate::scheduler::wait::{wait_for, wait_until};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture produced no data: {0}")]
    EmptyCapture(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("transfer failed after {attempts} attempts: {last}")]
    TransferFailed { attempts: u32, last: String },
    #[error("cancelled while waiting: {0}")]
    CancelledWhileWaiting(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("cannot prepare output directories: {0}")]
    Storage(#[from] std::io::Error),
}

impl CaptureError {
    pub fn reason(&self) -> FailureReason {
        match self {
            CaptureError::DeviceUnavailable(_) => FailureReason::DeviceUnavailable,
            CaptureError::EmptyCapture(_) => FailureReason::EmptyCapture,
            CaptureError::DecodeFailed(_) => FailureReason::DecodeFailed,
            CaptureError::TransferFailed { .. } => FailureReason::TransferFailed,
            CaptureError::CancelledWhileWaiting(_) => FailureReason::CancelledWhileWaiting,
            CaptureError::Cancelled(_) => FailureReason::Cancelled,
            CaptureError::Storage(_) => FailureReason::Storage,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub target: String,
    pub attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub gain: f64,
    pub sample_rate: u32,
    pub frequency_offset_hz: i64,
    pub resample_rate: u32,
    pub enhancements: Vec<String>,
    pub save_raw_audio: bool,
    pub transfer: Option<TransferSettings>,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            gain: config.reception.gain,
            sample_rate: config.reception.sample_rate,
            frequency_offset_hz: config.reception.frequency_offset_hz,
            resample_rate: config.processing.resample_rate,
            enhancements: config.processing.enhancements.clone(),
            save_raw_audio: config.processing.save_raw_audio,
            transfer: config.transfer.as_ref().map(|t| TransferSettings {
                target: t.target.clone(),
                attempts: t.attempts,
                backoff: t.backoff,
                timeout: t.timeout,
            }),
        }
    }
}

/// Drives one scheduled pass through
/// `Idle -> Armed -> Recording -> Decoding -> Transferring -> Done`,
/// dropping into `Failed` from whichever stage goes wrong. Consumed by `run`.
pub struct CaptureSession {
    scheduled: ScheduledSession,
    settings: CaptureSettings,
    log: SessionLog,
}

impl CaptureSession {
    pub fn new(scheduled: ScheduledSession, settings: CaptureSettings) -> Self {
        let log = SessionLog::new(&scheduled);
        Self {
            scheduled,
            settings,
            log,
        }
    }

    /// Run to a terminal state. Stage failures end the session, never the
    /// caller.
    pub async fn run<T: Toolchain + ?Sized>(
        mut self,
        tools: &T,
        signal: &mut AbortSignal,
    ) -> SessionLog {
        match self.execute(tools, signal).await {
            Ok(()) => self.transition(SessionState::Done),
            Err(e) => self.fail(e),
        }
        self.log.completed_at = Some(Utc::now());
        self.persist();
        self.log
    }

    async fn execute<T: Toolchain + ?Sized>(
        &mut self,
        tools: &T,
        signal: &mut AbortSignal,
    ) -> Result<(), CaptureError> {
        self.prepare_directories()?;

        wait_until(self.scheduled.arm_at(), signal)
            .await
            .map_err(|c| CaptureError::CancelledWhileWaiting(c.0))?;
        self.transition(SessionState::Armed);

        wait_until(self.scheduled.pass.aos, signal)
            .await
            .map_err(|c| CaptureError::CancelledWhileWaiting(c.0))?;
        self.transition(SessionState::Recording);
        self.record(tools, signal).await?;

        self.transition(SessionState::Decoding);
        self.decode(tools, signal).await?;

        self.transition(SessionState::Transferring);
        self.deliver(tools, signal).await
    }

    fn prepare_directories(&self) -> Result<(), CaptureError> {
        let paths = &self.scheduled.paths;
        for file in [&paths.raw_audio, &paths.image] {
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::create_dir_all(&paths.artifacts_dir)?;
        Ok(())
    }

    async fn record<T: Toolchain + ?Sized>(
        &mut self,
        tools: &T,
        signal: &mut AbortSignal,
    ) -> Result<(), CaptureError> {
        let pass = &self.scheduled.pass;
        let start = Utc::now().max(pass.aos);
        let duration = (pass.los - start).to_std().map_err(|_| {
            CaptureError::DeviceUnavailable(format!("window closed at {}", pass.los))
        })?;

        let frequency_hz = pass.frequency_hz.saturating_add_signed(self.settings.frequency_offset_hz);
        let request = CaptureRequest {
            frequency_hz,
            gain: self.settings.gain,
            sample_rate: self.settings.sample_rate,
            duration,
            output: self.scheduled.paths.raw_audio.clone(),
            log_dir: self.scheduled.paths.artifacts_dir.clone(),
        };

        log::info!(
            "{}: recording {} Hz for {}s",
            self.scheduled.output_id,
            frequency_hz,
            duration.as_secs()
        );

        match tools.capture(&request, signal).await {
            Ok(()) => {}
            Err(ToolError::Cancelled { reason, .. }) => return Err(CaptureError::Cancelled(reason)),
            Err(e) => return Err(CaptureError::DeviceUnavailable(e.to_string())),
        }

        if file_size(&request.output) == 0 {
            return Err(CaptureError::EmptyCapture(
                request.output.display().to_string(),
            ));
        }
        Ok(())
    }

    async fn decode<T: Toolchain + ?Sized>(
        &mut self,
        tools: &T,
        signal: &mut AbortSignal,
    ) -> Result<(), CaptureError> {
        let result = self.decode_products(tools, signal).await;

        remove_quietly(&self.scheduled.paths.resampled_audio);
        if result.is_ok() && !self.settings.save_raw_audio {
            log::info!(
                "Removing raw audio file: {}",
                self.scheduled.paths.raw_audio.display()
            );
            remove_quietly(&self.scheduled.paths.raw_audio);
        }
        result
    }

    async fn decode_products<T: Toolchain + ?Sized>(
        &mut self,
        tools: &T,
        signal: &mut AbortSignal,
    ) -> Result<(), CaptureError> {
        let paths = self.scheduled.paths.clone();
        let log_dir = paths.artifacts_dir.clone();

        let resample = ResampleRequest {
            input: paths.raw_audio.clone(),
            output: paths.resampled_audio.clone(),
            input_rate: self.settings.sample_rate,
            target_rate: self.settings.resample_rate,
            log_dir: log_dir.clone(),
        };
        tools
            .resample(&resample, signal)
            .await
            .map_err(decode_error)?;
        if file_size(&resample.output) == 0 {
            return Err(CaptureError::DecodeFailed(
                "resampler produced no audio".into(),
            ));
        }

        produce_image(tools, signal, &paths.resampled_audio, &paths.image, None, &log_dir)
            .await
            .map_err(decode_error)?;
        log::info!("{}: decoded {}", self.scheduled.output_id, paths.image.display());
        self.log.image = Some(paths.image.clone());

        for enhancement in &self.settings.enhancements {
            let output = paths.enhanced_image(enhancement);
            match produce_image(
                tools,
                signal,
                &paths.resampled_audio,
                &output,
                Some(enhancement.as_str()),
                &log_dir,
            )
            .await
            {
                Ok(()) => {
                    log::info!("{}: generated {} image", self.scheduled.output_id, enhancement);
                    self.log.extra_images.push(output);
                }
                Err(ToolError::Cancelled { reason, .. }) => {
                    return Err(CaptureError::Cancelled(reason))
                }
                Err(e) => log::warn!(
                    "{}: {} image skipped: {}",
                    self.scheduled.output_id,
                    enhancement,
                    e
                ),
            }
        }

        Ok(())
    }

    async fn deliver<T: Toolchain + ?Sized>(
        &mut self,
        tools: &T,
        signal: &mut AbortSignal,
    ) -> Result<(), CaptureError> {
        let Some(transfer) = self.settings.transfer.clone() else {
            log::info!(
                "{}: no transfer target configured, image kept locally",
                self.scheduled.output_id
            );
            return Ok(());
        };

        let mut last_error = String::new();
        for attempt in 1..=transfer.attempts {
            self.log.transfer_attempts = attempt;
            let request = TransferRequest {
                input: self.scheduled.paths.image.clone(),
                target: transfer.target.clone(),
                timeout: transfer.timeout,
                attempt,
                log_dir: self.scheduled.paths.artifacts_dir.clone(),
            };

            match tools.transfer(&request, signal).await {
                Ok(()) => {
                    self.log.delivered = true;
                    log::info!(
                        "{}: image delivered to {} (attempt {})",
                        self.scheduled.output_id,
                        transfer.target,
                        attempt
                    );
                    return Ok(());
                }
                Err(ToolError::Cancelled { reason, .. }) => {
                    return Err(CaptureError::Cancelled(reason))
                }
                Err(e) => {
                    log::warn!(
                        "{}: transfer attempt {}/{} failed: {}",
                        self.scheduled.output_id,
                        attempt,
                        transfer.attempts,
                        e
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < transfer.attempts {
                let backoff = transfer
                    .backoff
                    .checked_mul(1 << (attempt - 1).min(16))
                    .unwrap_or(transfer.backoff);
                wait_for(backoff, signal)
                    .await
                    .map_err(|c| CaptureError::Cancelled(c.0))?;
            }
        }

        Err(CaptureError::TransferFailed {
            attempts: transfer.attempts,
            last: last_error,
        })
    }

    fn transition(&mut self, next: SessionState) {
        let from = self.log.state;
        debug_assert!(from.can_transition_to(next), "{} -> {}", from, next);

        self.log.state = next;
        self.log.transitions.push(Transition {
            from,
            to: next,
            at: Utc::now(),
        });
        log::info!("{}: {} -> {}", self.scheduled.output_id, from, next);
        self.persist();
    }

    fn fail(&mut self, error: CaptureError) {
        let stage = self.log.state;
        let reason = error.reason();
        match reason {
            FailureReason::Cancelled | FailureReason::CancelledWhileWaiting => log::warn!(
                "{}: session cancelled in {}: {}",
                self.scheduled.output_id,
                stage,
                error
            ),
            _ => log::error!(
                "{}: session failed in {} ({}): {}",
                self.scheduled.output_id,
                stage,
                reason,
                error
            ),
        }
        if reason == FailureReason::TransferFailed {
            if let Some(image) = &self.log.image {
                log::warn!("{}: image kept locally at {}", self.scheduled.output_id, image.display());
            }
        }

        self.log.error = Some(error.to_string());
        self.transition(SessionState::Failed(reason));
    }

    fn persist(&self) {
        let dir = &self.scheduled.paths.artifacts_dir;
        if !dir.is_dir() {
            return;
        }
        if let Err(e) = self.log.save(dir) {
            log::warn!("Failed to write session log in {}: {}", dir.display(), e);
        }
    }
}

/// Decode into a `.partial` file and rename it into place only once the
/// decoder succeeded and wrote something.
async fn produce_image<T: Toolchain + ?Sized>(
    tools: &T,
    signal: &mut AbortSignal,
    input: &Path,
    output: &Path,
    enhancement: Option<&str>,
    log_dir: &Path,
) -> Result<(), ToolError> {
    let partial = SessionPaths::partial(output);
    let request = DecodeRequest {
        input: input.to_path_buf(),
        output: partial.clone(),
        enhancement: enhancement.map(str::to_string),
        log_dir: log_dir.to_path_buf(),
    };

    let result = tools.decode(&request, signal).await.and_then(|()| {
        if file_size(&partial) == 0 {
            return Err(ToolError::Io(std::io::Error::other(format!(
                "decoder wrote no image to {}",
                partial.display()
            ))));
        }
        fs::rename(&partial, output).map_err(ToolError::from)
    });

    if result.is_err() {
        remove_quietly(&partial);
    }
    result
}

fn decode_error(e: ToolError) -> CaptureError {
    match e {
        ToolError::Cancelled { reason, .. } => CaptureError::Cancelled(reason),
        other => CaptureError::DecodeFailed(other.to_string()),
    }
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }
}
