use tokio::sync::watch;

/// Abort signal observed by every suspension point (waits for an arm time,
/// waits on an external process, transfer backoff). Once raised it stays raised.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<String>>,
}

/// Raises the abort. Held by whoever owns shutdown (signal handler, tests).
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: watch::Sender<Option<String>>,
}

pub fn channel() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(None);
    (AbortHandle { tx }, AbortSignal { rx })
}

impl AbortHandle {
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            log::info!("Abort requested: {}", reason);
            *current = Some(reason);
            true
        });
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Resolves once an abort is raised. Never resolves if every handle is
    /// dropped without aborting.
    pub async fn aborted(&mut self) -> String {
        loop {
            if let Some(reason) = self.rx.borrow_and_update().clone() {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
