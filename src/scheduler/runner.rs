use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::abort::AbortSignal;
use crate::capture::{CaptureSession, CaptureSettings, ProcessToolchain, SessionState, Toolchain};
use crate::config::{Config, ConfigError, PlanningConfig};
use crate::planner::{PassPlanner, PlannerSettings, ScheduledSession, SessionPlanner};
use crate::predict::TleLoader;
use crate::scheduler::wait::wait_for;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Sleep when nothing is planned within the lookahead.
    pub poll_interval: Duration,
    /// Sleep after a failed planning cycle.
    pub error_retry: Duration,
    /// Longest uninterrupted wait before an armed-to-be session is re-planned.
    pub replan_interval: Duration,
}

impl RunnerSettings {
    pub fn from_config(planning: &PlanningConfig) -> Self {
        Self {
            poll_interval: planning.poll_interval,
            error_retry: planning.error_retry,
            replan_interval: planning.replan_interval,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: u32,
    pub failed: u32,
    pub planning_errors: u32,
}

/// The control loop. Owns the single receiver: sessions run one after another,
/// never concurrently.
pub struct Runner<P, T> {
    planner: P,
    tools: T,
    settings: RunnerSettings,
    capture: CaptureSettings,
}

impl Runner<PassPlanner<TleLoader>, ProcessToolchain> {
    pub fn from_config(config: &Config) -> Result<Self, RunnerError> {
        let planner = PassPlanner::new(
            PlannerSettings::from_config(config)?,
            TleLoader::new(config.directories.tle.clone()),
        );
        Ok(Self::new(
            planner,
            ProcessToolchain::new(config.tools.clone()),
            RunnerSettings::from_config(&config.planning),
            CaptureSettings::from_config(config),
        ))
    }
}

enum Waited {
    Ready(ScheduledSession),
    Vanished,
    Cancelled(String),
}

impl<P: SessionPlanner, T: Toolchain> Runner<P, T> {
    pub fn new(planner: P, tools: T, settings: RunnerSettings, capture: CaptureSettings) -> Self {
        Self {
            planner,
            tools,
            settings,
            capture,
        }
    }

    /// Plan, wait, capture, repeat until `signal` is raised.
    pub async fn run(&self, signal: &mut AbortSignal) -> RunSummary {
        let mut summary = RunSummary::default();

        while !signal.is_aborted() {
            let pause = match self.planner.next_session(Utc::now()) {
                Ok(Some(session)) => {
                    match self.wait_for_arm_time(session, signal).await {
                        Waited::Ready(session) => self.execute(session, signal, &mut summary).await,
                        Waited::Vanished => {}
                        Waited::Cancelled(reason) => {
                            log::info!("Cancelled while waiting for the next pass: {}", reason);
                            break;
                        }
                    }
                    continue;
                }
                Ok(None) => {
                    log::info!(
                        "No pass planned, checking again in {}",
                        humantime::format_duration(self.settings.poll_interval)
                    );
                    self.settings.poll_interval
                }
                Err(e) => {
                    summary.planning_errors += 1;
                    if e.is_invalid_elements() {
                        log::error!("Planning failed, waiting for fresh elements: {}", e);
                    } else {
                        log::error!("Planning failed: {}", e);
                    }
                    self.settings.error_retry
                }
            };

            if let Err(cancelled) = wait_for(pause, signal).await {
                log::info!("Scheduler stopping: {}", cancelled.0);
                break;
            }
        }

        log::info!(
            "Scheduler stopped: {} completed, {} failed, {} planning errors",
            summary.completed,
            summary.failed,
            summary.planning_errors
        );
        summary
    }

    /// Sleep towards the arm time in slices of `replan_interval`, re-planning
    /// after each slice so fresher elements or a better pass can take over.
    async fn wait_for_arm_time(
        &self,
        mut session: ScheduledSession,
        signal: &mut AbortSignal,
    ) -> Waited {
        log::info!(
            "Next pass: {} AOS {} ({} min) peak {:.1}°, arming at {}",
            session.pass.satellite,
            session.pass.aos.format("%Y-%m-%d %H:%M:%S"),
            session.capture_duration().num_minutes(),
            session.pass.max_elevation_deg,
            session.arm_at().format("%H:%M:%S"),
        );

        loop {
            let Ok(remaining) = (session.arm_at() - Utc::now()).to_std() else {
                return Waited::Ready(session);
            };
            if remaining.is_zero() {
                return Waited::Ready(session);
            }

            let slice = remaining.min(self.settings.replan_interval);
            if let Err(cancelled) = wait_for(slice, signal).await {
                return Waited::Cancelled(cancelled.0);
            }
            if slice == remaining {
                return Waited::Ready(session);
            }

            match self.planner.next_session(Utc::now()) {
                Ok(Some(fresh)) if !fresh.is_same_pass(&session) => {
                    log::info!(
                        "Plan changed: {} at {} replaces {} at {}",
                        fresh.pass.satellite,
                        fresh.pass.aos.format("%H:%M:%S"),
                        session.pass.satellite,
                        session.pass.aos.format("%H:%M:%S"),
                    );
                    session = fresh;
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    log::warn!(
                        "{} at {} is no longer planned",
                        session.pass.satellite,
                        session.pass.aos.format("%H:%M:%S")
                    );
                    return Waited::Vanished;
                }
                Err(e) => log::warn!("Re-planning failed, keeping {}: {}", session.output_id, e),
            }
        }
    }

    async fn execute(
        &self,
        session: ScheduledSession,
        signal: &mut AbortSignal,
        summary: &mut RunSummary,
    ) {
        let log = CaptureSession::new(session, self.capture.clone())
            .run(&self.tools, signal)
            .await;

        match log.state {
            SessionState::Done => summary.completed += 1,
            _ => summary.failed += 1,
        }
        log::info!("{} finished: {}", log.output_id, log.state);
    }
}
