use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::abort::AbortSignal;
use crate::capture::process::{self, ProcessOutcome};
use crate::config::ToolsConfig;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    #[error("{tool} exited with code {code:?}")]
    Exit { tool: String, code: Option<i32> },
    #[error("{tool} did not finish within {after:?}")]
    Timeout { tool: String, after: Duration },
    #[error("{tool} cancelled: {reason}")]
    Cancelled { tool: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub frequency_hz: u64,
    pub gain: f64,
    pub sample_rate: u32,
    pub duration: Duration,
    pub output: PathBuf,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResampleRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub input_rate: u32,
    pub target_rate: u32,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// `None` for the primary image.
    pub enhancement: Option<String>,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub input: PathBuf,
    pub target: String,
    pub timeout: Duration,
    pub attempt: u32,
    pub log_dir: PathBuf,
}

/// The external collaborators of a capture session. Each call returns once
/// the tool has finished (or was stopped); output files are checked by the
/// caller.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Record for `request.duration`. Being stopped at the end of the window
    /// is success.
    async fn capture(
        &self,
        request: &CaptureRequest,
        signal: &mut AbortSignal,
    ) -> Result<(), ToolError>;

    async fn resample(
        &self,
        request: &ResampleRequest,
        signal: &mut AbortSignal,
    ) -> Result<(), ToolError>;

    async fn decode(
        &self,
        request: &DecodeRequest,
        signal: &mut AbortSignal,
    ) -> Result<(), ToolError>;

    async fn transfer(
        &self,
        request: &TransferRequest,
        signal: &mut AbortSignal,
    ) -> Result<(), ToolError>;
}

/// Runs the configured command templates as child processes.
pub struct ProcessToolchain {
    tools: ToolsConfig,
}

impl ProcessToolchain {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    async fn run(
        &self,
        label: &str,
        argv: Vec<String>,
        log_dir: &std::path::Path,
        deadline: Option<Duration>,
        signal: &mut AbortSignal,
    ) -> Result<ProcessOutcome, ToolError> {
        let mut child = process::spawn_logged(label, &argv, log_dir)?;
        process::wait(&mut child, label, deadline, self.tools.stop_grace, signal).await
    }
}

fn require_success(label: &str, outcome: ProcessOutcome) -> Result<(), ToolError> {
    match outcome {
        ProcessOutcome::Exited(status) if status.success() => Ok(()),
        ProcessOutcome::Exited(status) => Err(ToolError::Exit {
            tool: label.to_string(),
            code: status.code(),
        }),
        ProcessOutcome::DeadlineReached => Err(ToolError::Exit {
            tool: label.to_string(),
            code: None,
        }),
    }
}

#[async_trait]
impl Toolchain for ProcessToolchain {
    async fn capture(
        &self,
        request: &CaptureRequest,
        signal: &mut AbortSignal,
    ) -> Result<(), ToolError> {
        let argv = render(
            &self.tools.capture,
            &[
                ("frequency", request.frequency_hz.to_string()),
                ("gain", request.gain.to_string()),
                ("sample_rate", request.sample_rate.to_string()),
                ("duration", request.duration.as_secs().to_string()),
                ("output", request.output.display().to_string()),
            ],
        );
        let outcome = self
            .run("capture", argv, &request.log_dir, Some(request.duration), signal)
            .await?;

        match outcome {
            ProcessOutcome::DeadlineReached => Ok(()),
            other => require_success("capture", other),
        }
    }

    async fn resample(
        &self,
        request: &ResampleRequest,
        signal: &mut AbortSignal,
    ) -> Result<(), ToolError> {
        let argv = render(
            &self.tools.resample,
            &[
                ("input", request.input.display().to_string()),
                ("output", request.output.display().to_string()),
                ("sample_rate", request.input_rate.to_string()),
                ("target_rate", request.target_rate.to_string()),
            ],
        );
        let outcome = self.run("resample", argv, &request.log_dir, None, signal).await?;
        require_success("resample", outcome)
    }

    async fn decode(
        &self,
        request: &DecodeRequest,
        signal: &mut AbortSignal,
    ) -> Result<(), ToolError> {
        let (template, label) = match &request.enhancement {
            Some(enhancement) => (&self.tools.enhance, format!("decode_{}", enhancement)),
            None => (&self.tools.decode, "decode".to_string()),
        };
        let argv = render(
            template,
            &[
                ("input", request.input.display().to_string()),
                ("output", request.output.display().to_string()),
                (
                    "enhancement",
                    request.enhancement.clone().unwrap_or_default(),
                ),
            ],
        );
        let outcome = self.run(&label, argv, &request.log_dir, None, signal).await?;
        require_success(&label, outcome)
    }

    async fn transfer(
        &self,
        request: &TransferRequest,
        signal: &mut AbortSignal,
    ) -> Result<(), ToolError> {
        let label = format!("transfer_{}", request.attempt);
        let argv = render(
            &self.tools.transfer,
            &[
                ("input", request.input.display().to_string()),
                ("target", request.target.clone()),
            ],
        );
        let outcome = self
            .run(&label, argv, &request.log_dir, Some(request.timeout), signal)
            .await?;

        match outcome {
            ProcessOutcome::DeadlineReached => Err(ToolError::Timeout {
                tool: label,
                after: request.timeout,
            }),
            other => require_success(&label, other),
        }
    }
}

/// Substitute `{name}` placeholders in every argument.
pub fn render(template: &[String], vars: &[(&str, String)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort;
    use crate::capture::tests::temp_dir;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    fn toolchain() -> ProcessToolchain {
        ProcessToolchain::new(ToolsConfig {
            capture: sh("printf 'IQIQIQ' > {output}; sleep 30"),
            resample: sh("cp {input} {output}"),
            decode: sh("printf 'PNG' > {output}"),
            enhance: sh("test {enhancement} = msa && printf 'PNG' > {output}"),
            transfer: sh("test -s {input} && mkdir -p {target} && cp {input} {target}/"),
            stop_grace: Duration::from_secs(2),
        })
    }

    #[test]
    fn renders_placeholders() {
        let argv = render(
            &[
                "rtl_fm".to_string(),
                "-f".to_string(),
                "{frequency}".to_string(),
                "{output}".to_string(),
                "--tag={frequency}-{gain}".to_string(),
            ],
            &[
                ("frequency", "137100000".to_string()),
                ("gain", "49.6".to_string()),
                ("output", "/tmp/a.wav".to_string()),
            ],
        );
        assert_eq!(
            argv,
            vec!["rtl_fm", "-f", "137100000", "/tmp/a.wav", "--tag=137100000-49.6"]
        );
    }

    #[tokio::test]
    async fn capture_stopped_at_end_of_window_succeeds() {
        let dir = temp_dir();
        let (_handle, mut signal) = abort::channel();
        let output = dir.join("pass.wav");

        toolchain()
            .capture(
                &CaptureRequest {
                    frequency_hz: 137_100_000,
                    gain: 49.6,
                    sample_rate: 60_000,
                    duration: Duration::from_millis(200),
                    output: output.clone(),
                    log_dir: dir.clone(),
                },
                &mut signal,
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"IQIQIQ");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn unknown_enhancement_fails() {
        let dir = temp_dir();
        let (_handle, mut signal) = abort::channel();

        let result = toolchain()
            .decode(
                &DecodeRequest {
                    input: dir.join("in.wav"),
                    output: dir.join("out.png"),
                    enhancement: Some("therm".into()),
                    log_dir: dir.clone(),
                },
                &mut signal,
            )
            .await;

        assert!(matches!(result, Err(ToolError::Exit { code: Some(1), .. })));
        assert!(dir.join("decode_therm_stderr.log").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn transfer_copies_to_target() {
        let dir = temp_dir();
        let (_handle, mut signal) = abort::channel();
        let image = dir.join("image.png");
        std::fs::write(&image, b"PNG").unwrap();
        let target = dir.join("remote");

        toolchain()
            .transfer(
                &TransferRequest {
                    input: image,
                    target: target.display().to_string(),
                    timeout: Duration::from_secs(5),
                    attempt: 1,
                    log_dir: dir.clone(),
                },
                &mut signal,
            )
            .await
            .unwrap();

        assert!(target.join("image.png").exists());
        assert!(dir.join("transfer_1_stdout.log").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
