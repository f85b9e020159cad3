use derive_more::From;

#[derive(Debug, From)]
pub struct EventSource<M>(tokio::sync::mpsc::UnboundedReceiver<M>);

impl<M> EventSource<M> {
    pub async fn next(&mut self) -> crate::Result<M> {
        self.0
            .recv()
            .await
            .ok_or(crate::err!("unexpected source closing"))
    }
}

#[derive(Debug, From)]
pub struct EventSender<M>(tokio::sync::mpsc::UnboundedSender<M>);

impl<M> Clone for EventSender<M> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<M> EventSender<M> {
    pub fn send(&self, message: M) -> crate::Result<()> {
        self.0
            .send(message)
            .map_err(|_| crate::err!("unexpected event channel closing"))
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// A thin wrapper around Tokio's unbounded MPSC channel.
///
/// Wrapped to integrate with `crate::Result`.
pub fn event_channel<M>() -> (EventSender<M>, EventSource<M>) {
    let channel = tokio::sync::mpsc::unbounded_channel();
    (EventSender(channel.0), EventSource(channel.1))
}
