use std::future::Future;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct BackgroundSpawner {
    err_sender: UnboundedSender<crate::Error>,
    token: CancellationToken,
}

impl BackgroundSpawner {
    /// Runs `task` until it finishes or the monitor cancels it. A failure is
    /// reported to the monitor as `name` failing.
    pub fn spawn(
        &self,
        name: impl Into<String>,
        task: impl Future<Output = crate::Result<()>> + Send + 'static,
    ) {
        let name = name.into();
        let err_sender = self.err_sender.clone();
        let token = self.token.clone();
        let mut task = tokio::spawn(task);
        tokio::spawn(async move {
            let result = tokio::select! {
                result = &mut task => result,
                () = token.cancelled() => {
                    task.abort();
                    task.await
                }
            };
            let err = match result {
                Err(err) if !err.is_cancelled() => crate::Error::from(err),
                Ok(Err(err)) => err,
                Ok(Ok(())) => {
                    tracing::trace!("{name} done");
                    return;
                }
                Err(_) => return,
            };
            tracing::debug!("{name} failed: {err}");
            // the monitor may be gone already if the run was over
            let _ = err_sender.send(err.context(name));
        });
    }
}

/// Owner side of the replica and listener tasks of one run: yields the first
/// error any of them fails with and cancels the others.
#[derive(Debug)]
pub struct BackgroundMonitor {
    err_sender: UnboundedSender<crate::Error>,
    err_receiver: UnboundedReceiver<crate::Error>,
    token: CancellationToken,
}

impl Default for BackgroundMonitor {
    fn default() -> Self {
        let (err_sender, err_receiver) = unbounded_channel();
        Self {
            err_sender,
            err_receiver,
            token: CancellationToken::new(),
        }
    }
}

impl BackgroundMonitor {
    pub fn spawner(&self) -> BackgroundSpawner {
        BackgroundSpawner {
            err_sender: self.err_sender.clone(),
            token: self.token.clone(),
        }
    }

    /// Resolves on the first task error. Never resolves while every task is
    /// healthy, since the monitor keeps a sender of its own.
    pub async fn wait(&mut self) -> crate::Result<()> {
        match self.err_receiver.recv().await {
            Some(err) => {
                self.token.cancel();
                Err(err)
            }
            None => Ok(()),
        }
    }
}

impl Drop for BackgroundMonitor {
    fn drop(&mut self) {
        self.token.cancel()
    }
}
