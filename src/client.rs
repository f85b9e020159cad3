use std::time::{SystemTime, UNIX_EPOCH};

use derive_more::Display;

use crate::{
    config::Group,
    message::{Kind, Message, Operation, ProcessId, Reply, Request, ViewNum, INITIAL_VIEW},
    reconcile::reconcile,
    transport::{Source, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Phase {
    Idle,
    AwaitingReplies,
    Reconciling,
    Done,
}

#[derive(Debug)]
pub struct Client<T> {
    group: Group,
    view_num: ViewNum,
    transport: T,
    phase: Phase,
}

impl<T> Client<T>
where
    T: Transport,
{
    pub fn new(group: Group, transport: T) -> crate::Result<Self> {
        if transport.id() != group.client() {
            crate::bail!("process {} is not the client", transport.id())
        }
        Ok(Self {
            group,
            view_num: INITIAL_VIEW,
            transport,
            phase: Phase::Idle,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!("client: {} -> {phase}", self.phase);
        self.phase = phase
    }

    /// Submits `op` to the primary and waits for one validated reply per
    /// replica. Returns the agreed result, or `None` if no result reaches
    /// `f + 1` matching replies.
    ///
    /// Invalid replies do not count, yet every replica replies exactly once,
    /// so a single invalid reply leaves this waiting forever.
    pub async fn invoke(&mut self, op: Operation) -> crate::Result<Option<i64>> {
        let request = Request {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
            op,
        };
        self.transport
            .send(self.group.primary(), request.into())
            .await?;
        tracing::info!("client: Request sent, op = {op}");

        self.enter(Phase::AwaitingReplies);
        let mut results = Vec::with_capacity(self.group.num_replica());
        while results.len() < self.group.num_replica() {
            let (message, remote) = self.transport.receive(Kind::Reply, Source::Any).await?;
            let Message::Reply(reply) = message else {
                crate::bail!("unexpected {:?} for a Reply", message.kind())
            };
            if !self.is_valid(&request, &reply, remote) {
                tracing::warn!("client: discard suspicious Reply from {remote}: {reply:?}");
                continue;
            }
            results.push(reply.result)
        }

        self.enter(Phase::Reconciling);
        let consensus = reconcile(&results, self.group.num_faulty());
        match consensus {
            Some(result) => tracing::info!("client: consensus reached, result = {result}"),
            None => tracing::warn!("client: no consensus among {results:?}"),
        }
        self.enter(Phase::Done);
        Ok(consensus)
    }

    fn is_valid(&self, request: &Request, reply: &Reply, remote: ProcessId) -> bool {
        reply.view_num == self.view_num
            && reply.timestamp == request.timestamp
            && reply.replica_id == remote
            && reply.result != Reply::RESERVED_RESULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::local_network;

    #[test]
    fn reply_validation() {
        let group = Group::new(5).unwrap();
        let client = Client::new(group, local_network(5).remove(0)).unwrap();
        let request = Request {
            timestamp: 100.5,
            op: Operation::Add,
        };
        let reply = Reply {
            view_num: INITIAL_VIEW,
            replica_id: 3,
            timestamp: 100.5,
            result: 1,
        };
        assert!(client.is_valid(&request, &reply, 3));
        // spoofed replica id
        assert!(!client.is_valid(&request, &reply, 4));
        assert!(!client.is_valid(
            &request,
            &Reply {
                view_num: 1,
                ..reply
            },
            3
        ));
        assert!(!client.is_valid(
            &request,
            &Reply {
                timestamp: 99.5,
                ..reply
            },
            3
        ));
        assert!(!client.is_valid(
            &request,
            &Reply {
                result: Reply::RESERVED_RESULT,
                ..reply
            },
            3
        ));
    }

    #[test]
    fn only_process_zero() {
        let group = Group::new(5).unwrap();
        assert!(Client::new(group, local_network(5).remove(1)).is_err());
        let client = Client::new(group, local_network(5).remove(0)).unwrap();
        assert_eq!(client.phase(), Phase::Idle);
    }
}
