//! Command dispatching and execution

use std::path::PathBuf;
use std::sync::Arc;

use tokio::{sync::Notify, time::Duration};
use tracing::{info, warn};

use bulksend_core::{
    ContactId, DispatchError, DispatchSettings, DispatchStats, JobStatus,
    SessionState, StreamEvent, StreamObserver, Transport,
};
use bulksend_runtime::{Coordinator, CoordinatorBuilder};

use crate::{
    cli::{Cli, Commands},
    config::{AppConfig, DryRunConfig},
    contacts::{check_contacts, load_contacts, JsonContactSource},
    dry_run::DryRunTransport,
    error::{CliError, Result},
};

/// Upper bound on how long a wait goes without re-reading job state
const MAX_WAIT_TICK: Duration = Duration::from_millis(250);

// ----------------------------------------------------------------------------
// Command Dispatcher
// ----------------------------------------------------------------------------

/// Command dispatcher that routes CLI commands to appropriate handlers
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute the given command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Send {
                contacts,
                batch_size,
                pdf_interval,
                batch_interval,
                failure_rate,
                latency_ms,
                retry_failed,
            } => {
                let settings =
                    config.settings_with_overrides(batch_size, pdf_interval, batch_interval);
                let dry_run = DryRunConfig {
                    failure_rate: failure_rate.unwrap_or(config.dry_run.failure_rate),
                    latency_ms: latency_ms.unwrap_or(config.dry_run.latency_ms),
                };
                dry_run.validate()?;

                let request = DispatchRequest {
                    contacts,
                    settings,
                    retry_failed,
                };
                let transport = Arc::new(DryRunTransport::new(dry_run));
                let summary = run_dispatch(&config, request, transport).await?;
                summary.log();
                summary.ensure_finished()
            }
            Commands::Validate { contacts } => Self::handle_validate(contacts),
            Commands::Config => {
                println!("{}", config.to_toml()?);
                Ok(())
            }
        }
    }

    fn handle_validate(path: PathBuf) -> Result<()> {
        let contacts = load_contacts(&path)?;
        let report = check_contacts(&contacts);

        for id in &report.duplicate_ids {
            warn!("Duplicate contact id: {}", id);
        }
        for id in &report.missing_phone {
            warn!("Contact {} has no phone number", id);
        }
        for id in &report.missing_document {
            warn!("Contact {} has no document", id);
        }

        if report.total == 0 {
            return Err(CliError::Contacts(format!("{} is empty", path.display())));
        }
        if !report.is_clean() {
            return Err(CliError::Contacts(format!(
                "{} problem(s) in {} contacts",
                report.problem_count(),
                report.total
            )));
        }

        info!("{} contacts OK", report.total);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Dispatch Run
// ----------------------------------------------------------------------------

/// What `send` was asked to do
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub contacts: PathBuf,
    pub settings: DispatchSettings,
    pub retry_failed: bool,
}

/// Outcome of a dispatch run
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSummary {
    pub stats: DispatchStats,
    /// Failed contacts with their last error
    pub failures: Vec<(ContactId, String)>,
    /// Contacts put back into the queue by the retry round
    pub retried: usize,
    pub interrupted: bool,
}

impl DispatchSummary {
    pub fn log(&self) {
        info!(
            "Dispatch finished: {} sent, {} failed, {} remaining of {}",
            self.stats.sent, self.stats.failed, self.stats.remaining, self.stats.total
        );
        if self.retried > 0 {
            info!("Retried {} failed contacts", self.retried);
        }
        for (id, reason) in &self.failures {
            warn!("  {}: {}", id, reason);
        }
        if self.interrupted {
            warn!("Dispatch was interrupted; the job was paused before finishing");
        }
    }

    /// Fail when the run was interrupted before the job completed
    pub fn ensure_finished(&self) -> Result<()> {
        if self.interrupted {
            return Err(CliError::Interrupted);
        }
        Ok(())
    }
}

enum WaitOutcome {
    Completed,
    Interrupted,
}

/// Connect, send the whole list, optionally retry failures, then disconnect
pub async fn run_dispatch(
    config: &AppConfig,
    request: DispatchRequest,
    transport: Arc<dyn Transport>,
) -> Result<DispatchSummary> {
    let wake = Arc::new(Notify::new());
    let coordinator = CoordinatorBuilder::new()
        .with_config(config.engine.clone())
        .with_transport(transport)
        .with_status_observer(Arc::new(log_status))
        .with_progress_observer(Arc::new(ProgressLogger { wake: wake.clone() }))
        .build()?;

    let result = drive(&coordinator, &request, &wake).await;

    coordinator.shutdown().await;
    result
}

async fn drive(
    coordinator: &Coordinator,
    request: &DispatchRequest,
    wake: &Notify,
) -> Result<DispatchSummary> {
    let tick = coordinator.config().polling.interval().min(MAX_WAIT_TICK);

    info!("Connecting via {} transport", coordinator.transport_name());
    coordinator.connect().await?;
    wait_for_session(coordinator, tick).await?;

    let source = JsonContactSource::new(&request.contacts);
    let job_id = coordinator
        .start_from_source(&source, request.settings)
        .await?;
    info!(
        "Started job {} (batch size {}, {}s between documents, {}s between batches)",
        job_id,
        request.settings.batch_size,
        request.settings.pdf_interval_secs,
        request.settings.batch_interval_secs
    );

    let mut outcome = wait_for_job(coordinator, wake, tick).await?;
    let mut retried = 0;
    if request.retry_failed && matches!(outcome, WaitOutcome::Completed) {
        let failed = coordinator.failed_contacts().await.len();
        if failed > 0 {
            retried = coordinator.retry_failed().await?;
            info!("Retrying {} failed contacts", retried);
            outcome = wait_for_job(coordinator, wake, tick).await?;
        }
    }

    let stats = coordinator
        .job_snapshot()
        .await
        .map(|snapshot| snapshot.stats)
        .unwrap_or_default();
    let failures = coordinator
        .failed_contacts()
        .await
        .into_iter()
        .map(|contact| {
            let reason = contact.error_message.unwrap_or_default();
            (contact.id, reason)
        })
        .collect();

    Ok(DispatchSummary {
        stats,
        failures,
        retried,
        interrupted: matches!(outcome, WaitOutcome::Interrupted),
    })
}

/// Wait until the session is connected, showing the pairing challenge if one appears
async fn wait_for_session(coordinator: &Coordinator, tick: Duration) -> Result<()> {
    let mut shown_challenge: Option<String> = None;
    loop {
        let status = coordinator.status_snapshot().await;
        match status.session_state {
            SessionState::Connected => return Ok(()),
            SessionState::Disconnected => {
                let reason = status
                    .last_error
                    .unwrap_or_else(|| "session closed".to_string());
                return Err(DispatchError::transport_fatal(reason).into());
            }
            SessionState::Connecting => {
                if status.pairing_challenge.is_some() && status.pairing_challenge != shown_challenge
                {
                    if let Some(challenge) = &status.pairing_challenge {
                        info!("Pair your device with: {}", challenge);
                    }
                    shown_challenge = status.pairing_challenge;
                }
            }
        }
        tokio::time::sleep(tick).await;
    }
}

/// Wait for the job to complete; Ctrl-C pauses it instead
async fn wait_for_job(
    coordinator: &Coordinator,
    wake: &Notify,
    tick: Duration,
) -> Result<WaitOutcome> {
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        match coordinator.job_status().await {
            JobStatus::Completed => return Ok(WaitOutcome::Completed),
            JobStatus::Paused => {
                let status = coordinator.status_snapshot().await;
                if status.session_state != SessionState::Connected {
                    let reason = status
                        .last_error
                        .unwrap_or_else(|| "session lost".to_string());
                    return Err(DispatchError::transport_fatal(reason).into());
                }
            }
            JobStatus::Idle => return Err(DispatchError::NoActiveJob.into()),
            JobStatus::Processing => {}
        }

        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep(tick) => {}
            signal = &mut interrupt => {
                signal?;
                warn!("Interrupted; pausing the job");
                coordinator.pause().await?;
                return Ok(WaitOutcome::Interrupted);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Observers
// ----------------------------------------------------------------------------

fn log_status(event: StreamEvent) {
    match event {
        StreamEvent::Status(status) => match &status.last_error {
            Some(error) => warn!(
                "Session {}, job {}: {}",
                status.session_state.name(),
                status.job_status.name(),
                error
            ),
            None => info!(
                "Session {}, job {}",
                status.session_state.name(),
                status.job_status.name()
            ),
        },
        StreamEvent::Dropped { kind, reason } => warn!("{} stream dropped: {}", kind, reason),
        StreamEvent::Progress(_) => {}
    }
}

/// Logs progress and wakes the waiting command
struct ProgressLogger {
    wake: Arc<Notify>,
}

impl StreamObserver for ProgressLogger {
    fn on_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::Progress(progress) => {
                info!(
                    "Progress {:.0}% (batch {}/{} at {:.0}%): {} sent, {} failed",
                    progress.overall_progress,
                    progress.current_batch,
                    progress.total_batches,
                    progress.batch_progress,
                    progress.stats.sent,
                    progress.stats.failed
                );
            }
            StreamEvent::Dropped { kind, reason } => warn!("{} stream dropped: {}", kind, reason),
            StreamEvent::Status(_) => {}
        }
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(interrupted: bool) -> DispatchSummary {
        DispatchSummary {
            stats: DispatchStats {
                total: 3,
                sent: 1,
                failed: 0,
                remaining: 2,
            },
            failures: Vec::new(),
            retried: 0,
            interrupted,
        }
    }

    #[test]
    fn test_interrupted_run_is_an_error() {
        assert!(matches!(
            summary(true).ensure_finished(),
            Err(CliError::Interrupted)
        ));
        assert!(summary(false).ensure_finished().is_ok());
    }
}
