use derive_more::Display;

use crate::{
    app::App,
    config::{Group, Policy},
    fault::Fault,
    message::{Message, ProcessId, Proposal, Reply, Request, ViewNum, INITIAL_VIEW, PRIMARY},
    quorum::{committed_local, prepared, Certificate},
    transport::Transport,
};

/// Replica progress. Each role walks a prefix of its own and then the shared
/// `Preparing -> Committing -> Executing -> Replied` tail, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Phase {
    AwaitingRequest,
    AwaitingPrePrepare,
    PrePreparing,
    Preparing,
    Committing,
    Executing,
    Replied,
}

/// What one replica observed and did during the exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    pub id: ProcessId,
    pub pre_prepare_valid: bool,
    pub request_matches: bool,
    pub prepared: bool,
    pub committed: bool,
    pub state: i64,
    pub reply: Reply,
}

#[derive(Debug)]
pub struct Replica<T, A> {
    pub(crate) id: ProcessId,
    pub(crate) group: Group,
    pub(crate) policy: Policy,
    pub(crate) view_num: ViewNum,
    pub(crate) app: A,
    pub(crate) transport: T,
    pub(crate) fault: Option<Fault>,
    phase: Phase,
}

impl<T, A> Replica<T, A>
where
    T: Transport,
    A: App,
{
    pub fn new(group: Group, policy: Policy, app: A, transport: T) -> crate::Result<Self> {
        let id = transport.id();
        if !group.is_replica(id) {
            crate::bail!("process {id} is not a replica of {group:?}")
        }
        Ok(Self {
            id,
            group,
            policy,
            view_num: INITIAL_VIEW,
            app,
            transport,
            fault: None,
            phase: if id == PRIMARY {
                Phase::AwaitingRequest
            } else {
                Phase::AwaitingPrePrepare
            },
        })
    }

    pub fn with_fault(mut self, fault: impl Into<Option<Fault>>) -> Self {
        self.fault = fault.into();
        self
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn enter(&mut self, phase: Phase) {
        tracing::debug!("replica {}: {} -> {phase}", self.id, self.phase);
        self.phase = phase
    }

    /// Sender id this replica puts in its protocol messages.
    pub(crate) fn declared_sender(&self) -> ProcessId {
        self.fault
            .map(|fault| fault.declared_sender(self.id))
            .unwrap_or(self.id)
    }

    pub(crate) async fn broadcast(&self, message: impl Into<Message>) -> crate::Result<()> {
        self.transport
            .send_to_all(self.group.peers_of(self.id), message.into())
            .await
    }

    /// Logs the certificate and applies the quorum failure policy.
    fn conclude(&self, certificate: &Certificate) -> crate::Result<bool> {
        if certificate.is_reached() {
            tracing::info!(
                "replica {}: {} quorum reached ({} of {})",
                self.id,
                certificate.phase(),
                certificate.count(),
                certificate.threshold()
            );
            return Ok(true);
        }
        if self.policy.halt_on_quorum_failure {
            return Err(certificate.failure().into());
        }
        // a view change belongs here
        tracing::warn!("replica {}: {}, continuing", self.id, certificate.failure());
        Ok(false)
    }

    /// Prepare, commit, execute and reply for `request` under `proposal`.
    pub(crate) async fn agree(
        &mut self,
        request: Request,
        proposal: Proposal,
        pre_prepare_valid: bool,
        request_matches: bool,
    ) -> crate::Result<Outcome> {
        self.enter(Phase::Preparing);
        let sender = self.declared_sender();
        let vote = Proposal {
            op: self.fault.map_or(proposal.op, |fault| fault.vote_op(proposal.op)),
            ..proposal
        };
        if self.fault.map_or(true, |fault| fault.sends_prepare()) {
            self.broadcast(vote.prepare(sender)).await?;
            tracing::debug!("replica {}: Prepare sent", self.id)
        }
        let certificate =
            prepared(&mut self.transport, &self.group, proposal, self.policy.peer_timeout).await?;
        let prepared = self.conclude(&certificate)?;

        self.enter(Phase::Committing);
        self.broadcast(vote.commit(sender)).await?;
        tracing::debug!("replica {}: Commit sent", self.id);
        let certificate =
            committed_local(&mut self.transport, &self.group, proposal, self.policy.peer_timeout)
                .await?;
        let committed = self.conclude(&certificate)?;

        self.enter(Phase::Executing);
        self.app.execute(request.op);
        let state = self.app.state();
        let reply = Reply {
            view_num: self.view_num,
            replica_id: self.id,
            timestamp: self
                .fault
                .map_or(request.timestamp, |fault| fault.reply_timestamp(request.timestamp)),
            result: self.fault.map_or(state, |fault| fault.reply_result(state)),
        };
        self.transport
            .send(self.group.client(), reply.into())
            .await?;
        self.enter(Phase::Replied);
        tracing::info!("replica {}: Reply sent, state = {state}", self.id);
        Ok(Outcome {
            id: self.id,
            pre_prepare_valid,
            request_matches,
            prepared,
            committed,
            state,
            reply,
        })
    }
}

/// Runs the role `replica`'s id assigns to it through one exchange.
pub async fn replica_loop<T, A>(mut replica: Replica<T, A>) -> crate::Result<Outcome>
where
    T: Transport,
    A: App,
{
    if let Some(fault) = replica.fault {
        tracing::warn!("replica {} is faulty: {fault}", replica.id)
    }
    if replica.id == PRIMARY {
        replica.run_primary().await
    } else {
        replica.run_backup().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{app::Counter, net::local_network};

    #[test]
    fn role_entry_phase() {
        let group = Group::new(5).unwrap();
        let mut transports = local_network(5).into_iter();
        let client = transports.next().unwrap();
        assert!(Replica::new(group, Policy::default(), Counter::default(), client).is_err());
        let primary =
            Replica::new(group, Policy::default(), Counter::default(), transports.next().unwrap())
                .unwrap();
        assert_eq!(primary.phase(), Phase::AwaitingRequest);
        let backup =
            Replica::new(group, Policy::default(), Counter::default(), transports.next().unwrap())
                .unwrap()
                .with_fault(Fault::ForgeSender { claimed: 4 });
        assert_eq!(backup.phase(), Phase::AwaitingPrePrepare);
        assert_eq!(backup.declared_sender(), 4);
        assert_eq!(backup.id(), 2);
    }
}
