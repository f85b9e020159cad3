//! Quorum certificates for the Prepare and Commit phases.
//!
//! A certificate tallies, per peer, whether that peer's message matched the
//! proposal under evaluation. A message matches only if its declared sender
//! is the sender the transport observed and its `(view, sequence number,
//! operation)` equals the proposal. Anything else is dropped without retry.
//!
//! Thresholds follow the usual `3f + 1` argument: two sets of `2f + 1`
//! replicas always share an honest one, so two different proposals cannot
//! both gather a commit quorum.

use std::{collections::BTreeMap, time::Duration};

use derive_more::Display;

use crate::{
    config::Group,
    message::{Kind, Message, ProcessId, Proposal},
    transport::{Source, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum VotePhase {
    Prepare,
    Commit,
}

impl VotePhase {
    pub fn kind(self) -> Kind {
        match self {
            Self::Prepare => Kind::Prepare,
            Self::Commit => Kind::Commit,
        }
    }
}

/// Raised instead of the default warning when the replica's policy is to halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(
    fmt = "{} quorum not reached: {} matching of {} required",
    phase,
    matched,
    threshold
)]
pub struct QuorumFailure {
    pub phase: VotePhase,
    pub matched: usize,
    pub threshold: usize,
}

impl std::error::Error for QuorumFailure {}

#[derive(Debug, Clone)]
pub struct Certificate {
    phase: VotePhase,
    proposal: Proposal,
    threshold: usize,
    // replica id -> matched
    votes: BTreeMap<ProcessId, bool>,
}

impl Certificate {
    pub fn new(phase: VotePhase, proposal: Proposal, threshold: usize) -> Self {
        Self {
            phase,
            proposal,
            threshold,
            votes: Default::default(),
        }
    }

    /// Counts the caller's own vote as already matched.
    pub fn insert_self(&mut self, id: ProcessId) {
        self.votes.insert(id, true);
    }

    /// Tallies one message received from `remote`. Returns whether it matched.
    pub fn record(&mut self, remote: ProcessId, message: &Message) -> bool {
        let matched = message.kind() == self.phase.kind()
            && message.vote() == Some((remote, self.proposal));
        // a peer counts once, and a later mismatch does not erase a match
        *self.votes.entry(remote).or_default() |= matched;
        matched
    }

    /// Marks `remote` as heard from without a matching message.
    pub fn record_absent(&mut self, remote: ProcessId) {
        self.votes.entry(remote).or_default();
    }

    pub fn phase(&self) -> VotePhase {
        self.phase
    }

    pub fn proposal(&self) -> Proposal {
        self.proposal
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn count(&self) -> usize {
        self.votes.values().filter(|&&matched| matched).count()
    }

    pub fn is_reached(&self) -> bool {
        self.count() >= self.threshold
    }

    pub fn matched(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.votes
            .iter()
            .filter(|(_, &matched)| matched)
            .map(|(&id, _)| id)
    }

    pub fn failure(&self) -> QuorumFailure {
        QuorumFailure {
            phase: self.phase,
            matched: self.count(),
            threshold: self.threshold,
        }
    }
}

/// Waits for exactly one `phase` message from every peer of the caller, in
/// ascending id order, and tallies them against `proposal`.
///
/// Without a `peer_timeout` a single silent peer blocks this forever. With
/// one, a peer that misses its deadline counts as not matching.
pub async fn collect_quorum(
    transport: &mut impl Transport,
    group: &Group,
    proposal: Proposal,
    phase: VotePhase,
    threshold: usize,
    include_self: bool,
    peer_timeout: Option<Duration>,
) -> crate::Result<Certificate> {
    let id = transport.id();
    let mut certificate = Certificate::new(phase, proposal, threshold);
    if include_self {
        certificate.insert_self(id)
    }
    for peer in group.peers_of(id) {
        let receive = transport.receive(phase.kind(), Source::Process(peer));
        let received = match peer_timeout {
            None => Some(receive.await?),
            Some(duration) => match tokio::time::timeout(duration, receive).await {
                Ok(received) => Some(received?),
                Err(_) => None,
            },
        };
        let Some((message, remote)) = received else {
            tracing::warn!("replica {id}: no {phase} from replica {peer} in time");
            certificate.record_absent(peer);
            continue;
        };
        if !certificate.record(remote, &message) {
            tracing::debug!("replica {id}: discard {phase} from {remote}: {message:?}")
        }
    }
    Ok(certificate)
}

/// At least `2f` peers other than the caller sent a matching Prepare.
pub async fn prepared(
    transport: &mut impl Transport,
    group: &Group,
    proposal: Proposal,
    peer_timeout: Option<Duration>,
) -> crate::Result<Certificate> {
    collect_quorum(
        transport,
        group,
        proposal,
        VotePhase::Prepare,
        group.prepare_threshold(),
        false,
        peer_timeout,
    )
    .await
}

/// At least `2f + 1` matching Commits, the caller's own included.
pub async fn committed_local(
    transport: &mut impl Transport,
    group: &Group,
    proposal: Proposal,
    peer_timeout: Option<Duration>,
) -> crate::Result<Certificate> {
    collect_quorum(
        transport,
        group,
        proposal,
        VotePhase::Commit,
        group.commit_threshold(),
        true,
        peer_timeout,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::{Operation, INITIAL_VIEW, PRIMARY},
        net::{local_network, LocalTransport},
    };

    fn proposal() -> Proposal {
        Proposal {
            view_num: INITIAL_VIEW,
            op_num: 1,
            op: Operation::Add,
        }
    }

    fn mismatched() -> Proposal {
        Proposal {
            op_num: 2,
            ..proposal()
        }
    }

    // every backup of a 5-process group sends the Prepare chosen for it to the
    // primary
    async fn primary_prepared(prepares: [(ProcessId, Proposal); 3]) -> Certificate {
        let group = Group::new(5).unwrap();
        let mut transports = local_network(5);
        for (backup, (declared, proposal)) in group.backups().zip(prepares) {
            transports[backup as usize]
                .send(PRIMARY, proposal.prepare(declared).into())
                .await
                .unwrap();
        }
        prepared(&mut transports[PRIMARY as usize], &group, proposal(), None)
            .await
            .unwrap()
    }

    #[test]
    fn certificate_provenance() {
        let mut certificate = Certificate::new(VotePhase::Prepare, proposal(), 2);
        assert!(certificate.record(2, &proposal().prepare(2).into()));
        // forged sender
        assert!(!certificate.record(3, &proposal().prepare(4).into()));
        // wrong phase
        assert!(!certificate.record(4, &proposal().commit(4).into()));
        // wrong content
        assert!(!certificate.record(4, &mismatched().prepare(4).into()));
        assert_eq!(certificate.count(), 1);
        assert!(!certificate.is_reached());
        // duplicate does not count twice
        certificate.record(2, &proposal().prepare(2).into());
        assert_eq!(certificate.count(), 1);
        assert_eq!(Vec::from_iter(certificate.matched()), [2]);
        assert_eq!(
            certificate.failure(),
            QuorumFailure {
                phase: VotePhase::Prepare,
                matched: 1,
                threshold: 2
            }
        );
    }

    #[tokio::test]
    async fn prepared_below_threshold() {
        // 2f - 1 = 1 matching
        let certificate =
            primary_prepared([(2, proposal()), (3, mismatched()), (4, mismatched())]).await;
        assert_eq!(certificate.count(), 1);
        assert!(!certificate.is_reached());
    }

    #[tokio::test]
    async fn prepared_at_threshold() {
        // 2f = 2 matching
        let certificate =
            primary_prepared([(2, proposal()), (3, mismatched()), (4, proposal())]).await;
        assert_eq!(certificate.count(), 2);
        assert!(certificate.is_reached());
        assert_eq!(Vec::from_iter(certificate.matched()), [2, 4]);
    }

    #[tokio::test]
    async fn forged_sender_never_counts() {
        // replica 3 claims to be replica 2, replica 4 claims to be the primary
        let certificate =
            primary_prepared([(2, proposal()), (2, proposal()), (PRIMARY, proposal())]).await;
        assert_eq!(Vec::from_iter(certificate.matched()), [2]);
        assert!(!certificate.is_reached());
    }

    async fn backup_committed(matching_peers: &[ProcessId]) -> Certificate {
        let group = Group::new(5).unwrap();
        let mut transports = local_network(5);
        let id = 2;
        for peer in group.peers_of(id) {
            let proposal = if matching_peers.contains(&peer) {
                proposal()
            } else {
                mismatched()
            };
            transports[peer as usize]
                .send(id, proposal.commit(peer).into())
                .await
                .unwrap();
        }
        committed_local(&mut transports[id as usize], &group, proposal(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn committed_local_counts_self() {
        // 2f peers plus self
        let certificate = backup_committed(&[1, 4]).await;
        assert_eq!(certificate.count(), 3);
        assert!(certificate.is_reached());
        assert_eq!(Vec::from_iter(certificate.matched()), [1, 2, 4]);

        let certificate = backup_committed(&[3]).await;
        assert_eq!(certificate.count(), 2);
        assert!(!certificate.is_reached());
    }

    #[tokio::test]
    async fn forged_commit_never_counts() {
        let group = Group::new(5).unwrap();
        let mut transports = local_network(5);
        let id = 2;
        transports[1]
            .send(id, proposal().commit(1).into())
            .await
            .unwrap();
        // replica 3 claims to be replica 4
        transports[3]
            .send(id, proposal().commit(4).into())
            .await
            .unwrap();
        transports[4]
            .send(id, mismatched().commit(4).into())
            .await
            .unwrap();
        let certificate =
            committed_local(&mut transports[id as usize], &group, proposal(), None)
                .await
                .unwrap();
        assert_eq!(certificate.count(), 2);
        assert!(!certificate.is_reached());
        assert_eq!(Vec::from_iter(certificate.matched()), [1, 2]);
    }

    #[tokio::test]
    async fn out_of_order_arrival() {
        let group = Group::new(5).unwrap();
        let mut transports: Vec<LocalTransport> = local_network(5);
        // commits before prepares, highest id first
        for peer in [4, 3, 1] {
            transports[peer as usize]
                .send(2, proposal().commit(peer).into())
                .await
                .unwrap();
        }
        for peer in [4, 3, 1] {
            transports[peer as usize]
                .send(2, proposal().prepare(peer).into())
                .await
                .unwrap();
        }
        let transport = &mut transports[2];
        assert!(prepared(transport, &group, proposal(), None)
            .await
            .unwrap()
            .is_reached());
        assert_eq!(
            committed_local(transport, &group, proposal(), None)
                .await
                .unwrap()
                .count(),
            4
        );
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let group = Group::new(5).unwrap();
        let mut transports = local_network(5);
        for peer in [1, 3] {
            transports[peer as usize]
                .send(2, proposal().prepare(peer).into())
                .await
                .unwrap();
        }
        // replica 4 never sends
        let certificate = prepared(
            &mut transports[2],
            &group,
            proposal(),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap();
        assert_eq!(certificate.count(), 2);
        assert!(certificate.is_reached());
    }
}
