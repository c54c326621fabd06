use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, Instant};

use crate::abort::AbortSignal;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("wait cancelled: {0}")]
pub struct Cancelled(pub String);

/// Sleep until a wall-clock instant. Returns immediately if it already passed.
pub async fn wait_until(deadline: DateTime<Utc>, signal: &mut AbortSignal) -> Result<(), Cancelled> {
    let remaining = (deadline - Utc::now())
        .to_std()
        .unwrap_or_else(|_| Duration::from_secs(0));
    wait_for(remaining, signal).await
}

pub async fn wait_for(duration: Duration, signal: &mut AbortSignal) -> Result<(), Cancelled> {
    if let Some(reason) = signal.reason() {
        return Err(Cancelled(reason));
    }

    tokio::select! {
        biased;
        reason = signal.aborted() => Err(Cancelled(reason)),
        _ = sleep_until(Instant::now() + duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort;

    #[tokio::test]
    async fn past_deadline_returns_immediately() {
        let (_handle, mut signal) = abort::channel();
        let started = std::time::Instant::now();
        wait_until(Utc::now() - chrono::Duration::minutes(5), &mut signal)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn abort_interrupts_a_long_wait() {
        let (handle, mut signal) = abort::channel();
        let waiter = tokio::spawn(async move {
            wait_until(Utc::now() + chrono::Duration::hours(6), &mut signal).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort("ctrl-c");

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(Cancelled("ctrl-c".into())));
    }

    #[tokio::test]
    async fn already_aborted_never_sleeps() {
        let (handle, mut signal) = abort::channel();
        handle.abort("stop");
        assert!(wait_for(Duration::from_secs(3600), &mut signal).await.is_err());
    }
}
