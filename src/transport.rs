use std::collections::VecDeque;

use crate::{
    message::{Kind, Message, ProcessId},
    model::EventSource,
};

/// Which sender a receive accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Process(ProcessId),
    Any,
}

impl Source {
    pub fn admits(&self, remote: ProcessId) -> bool {
        match self {
            Self::Process(id) => *id == remote,
            Self::Any => true,
        }
    }
}

/// Reliable point-to-point delivery between numbered processes.
///
/// `receive` reports the sender as observed by the transport, which is what
/// provenance checks compare a message's declared sender against.
#[async_trait::async_trait]
pub trait Transport
where
    Self: Send + Sync + 'static,
{
    fn id(&self) -> ProcessId;

    async fn send(&self, destination: ProcessId, message: Message) -> crate::Result<()>;

    async fn receive(&mut self, kind: Kind, source: Source) -> crate::Result<(Message, ProcessId)>;

    async fn send_to_all(
        &self,
        destinations: impl Iterator<Item = ProcessId> + Send,
        message: Message,
    ) -> crate::Result<()> {
        for destination in destinations {
            if destination == self.id() {
                crate::bail!("unexpected loopback message")
            }
            self.send(destination, message.clone()).await?
        }
        Ok(())
    }
}

/// Inbound side shared by transport implementations.
///
/// Messages that arrive ahead of the receive asking for them are stashed in
/// arrival order, so waiting on one sender never loses another sender's
/// message.
#[derive(Debug)]
pub struct Mailbox {
    inbox: EventSource<(ProcessId, Message)>,
    stash: VecDeque<(ProcessId, Message)>,
}

impl Mailbox {
    pub fn new(inbox: EventSource<(ProcessId, Message)>) -> Self {
        Self {
            inbox,
            stash: Default::default(),
        }
    }

    // cancel safe: a message taken off the inbox is stashed before the next
    // await point
    pub async fn receive(
        &mut self,
        kind: Kind,
        source: Source,
    ) -> crate::Result<(Message, ProcessId)> {
        let accept =
            |remote: ProcessId, message: &Message| message.kind() == kind && source.admits(remote);
        if let Some(index) = self
            .stash
            .iter()
            .position(|(remote, message)| accept(*remote, message))
        {
            if let Some((remote, message)) = self.stash.remove(index) {
                return Ok((message, remote));
            }
        }
        loop {
            let (remote, message) = self.inbox.next().await?;
            if accept(remote, &message) {
                return Ok((message, remote));
            }
            self.stash.push_back((remote, message))
        }
    }

    pub fn stashed(&self) -> usize {
        self.stash.len()
    }
}
