use tokio_util::sync::CancellationToken;

/// Stop signal observed by every worker pool of an engine.
///
/// Cloning is cheap; all clones observe the same signal.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: CancellationToken,
}

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the engine is stopping, immediately if it already is
    pub async fn wait(&mut self) {
        self.inner.cancelled().await
    }
}

/// Owner side of the stop signal, held by the engine handle
#[derive(Debug)]
pub struct ShutdownSender {
    inner: CancellationToken,
}

impl ShutdownSender {
    pub fn shutdown(&self) {
        self.inner.cancel();
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            inner: self.inner.clone(),
        }
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let sender = ShutdownSender {
        inner: CancellationToken::new(),
    };
    let token = sender.token();
    (sender, token)
}
