use crate::{
    app::App,
    message::{Kind, Message, Proposal},
    replica::{Outcome, Phase, Replica},
    transport::{Source, Transport},
};

impl<T, A> Replica<T, A>
where
    T: Transport,
    A: App,
{
    /// `AwaitingPrePrepare -> AwaitingRequest`, then the shared tail.
    ///
    /// A PrePrepare of the wrong view or declared sender, and a Request that
    /// disagrees with its PrePrepare, are reported and then accepted anyway:
    /// there is no view change to fall back on.
    pub async fn run_backup(&mut self) -> crate::Result<Outcome> {
        let primary = self.group.primary();
        let (message, _) = self
            .transport
            .receive(Kind::PrePrepare, Source::Process(primary))
            .await?;
        let Message::PrePrepare(pre_prepare) = message else {
            crate::bail!("unexpected {:?} for a PrePrepare", message.kind())
        };
        let pre_prepare_valid =
            pre_prepare.view_num == self.view_num && pre_prepare.sender == primary;
        if pre_prepare_valid {
            tracing::info!("backup {}: PrePrepare accepted", self.id)
        } else {
            tracing::warn!("backup {}: invalid PrePrepare {pre_prepare:?}", self.id)
        }

        self.enter(Phase::AwaitingRequest);
        let (message, _) = self
            .transport
            .receive(Kind::Request, Source::Process(primary))
            .await?;
        let Message::Request(request) = message else {
            crate::bail!("unexpected {:?} for a Request", message.kind())
        };
        let request_matches = request.op == pre_prepare.op;
        if !request_matches {
            tracing::warn!(
                "backup {}: Request op {} does not match PrePrepare op {}",
                self.id,
                request.op,
                pre_prepare.op
            )
        }

        // votes follow the local view and the request, as the execution does
        let proposal = Proposal {
            view_num: self.view_num,
            op_num: pre_prepare.op_num,
            op: request.op,
        };
        self.agree(request, proposal, pre_prepare_valid, request_matches)
            .await
    }
}
