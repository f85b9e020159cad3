use crate::{
    app::App,
    message::{Kind, Message, OpNum, Proposal},
    replica::{Outcome, Phase, Replica},
    transport::{Source, Transport},
};

/// Only one request is ever ordered, under this sequence number.
pub const FIRST_OP_NUM: OpNum = 1;

impl<T, A> Replica<T, A>
where
    T: Transport,
    A: App,
{
    /// `AwaitingRequest -> PrePreparing`, then the shared tail.
    pub async fn run_primary(&mut self) -> crate::Result<Outcome> {
        let client = self.group.client();
        let (message, _) = self
            .transport
            .receive(Kind::Request, Source::Process(client))
            .await?;
        let Message::Request(request) = message else {
            crate::bail!("unexpected {:?} for a Request", message.kind())
        };
        tracing::info!(
            "primary {}: Request received, timestamp = {}, op = {}",
            self.id,
            request.timestamp,
            request.op
        );

        self.enter(Phase::PrePreparing);
        let proposal = Proposal {
            view_num: self.view_num,
            op_num: FIRST_OP_NUM,
            op: request.op,
        };
        let pre_prepare = Proposal {
            op: self.fault.map_or(proposal.op, |fault| fault.pre_prepare_op(proposal.op)),
            ..proposal
        }
        .pre_prepare(self.declared_sender());
        for backup in self.group.backups() {
            self.transport.send(backup, pre_prepare.into()).await?;
            self.transport.send(backup, request.into()).await?;
        }
        tracing::info!("primary {}: PrePrepare sent", self.id);

        self.agree(request, proposal, true, true).await
    }
}
