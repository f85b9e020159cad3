use std::time::Duration;

use derive_more::Display;

use crate::message::{ProcessId, CLIENT, PRIMARY};

/// One client plus the minimal `3f + 1` group with `f = 1`.
pub const MIN_PROCESS_COUNT: usize = 5;
/// Process ids are `ProcessId`, so the group cannot outgrow its range.
pub const MAX_PROCESS_COUNT: usize = ProcessId::MAX as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConfigError {
    #[display(
        fmt = "at least {} processes (1 client + 4 replicas) are required, got {}",
        MIN_PROCESS_COUNT,
        _0
    )]
    TooFewProcesses(usize),
    #[display(fmt = "at most {} processes are supported, got {}", MAX_PROCESS_COUNT, _0)]
    TooManyProcesses(usize),
}

impl std::error::Error for ConfigError {}

/// Static membership: process 0 is the client, process 1 the primary and
/// processes `2..p` the backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group {
    num_process: usize,
    num_faulty: usize,
}

impl Group {
    pub fn new(num_process: usize) -> Result<Self, ConfigError> {
        if num_process < MIN_PROCESS_COUNT {
            return Err(ConfigError::TooFewProcesses(num_process));
        }
        if num_process > MAX_PROCESS_COUNT {
            return Err(ConfigError::TooManyProcesses(num_process));
        }
        let group = Self {
            num_process,
            num_faulty: (num_process - 2) / 3,
        };
        if !group.is_optimal() {
            tracing::warn!(
                "{} replicas tolerate only f = {}, {} of them are surplus to 3f + 1",
                group.num_replica(),
                group.num_faulty,
                group.num_replica() - (3 * group.num_faulty + 1)
            )
        }
        Ok(group)
    }

    pub fn num_process(&self) -> usize {
        self.num_process
    }

    pub fn num_replica(&self) -> usize {
        self.num_process - 1
    }

    pub fn num_faulty(&self) -> usize {
        self.num_faulty
    }

    /// `N = 3f + 1`, the designed operating point.
    pub fn is_optimal(&self) -> bool {
        self.num_replica() == 3 * self.num_faulty + 1
    }

    pub fn client(&self) -> ProcessId {
        CLIENT
    }

    pub fn primary(&self) -> ProcessId {
        PRIMARY
    }

    /// All replica ids, ascending.
    pub fn replicas(&self) -> impl Iterator<Item = ProcessId> {
        (PRIMARY as usize..self.num_process).map(|id| id as ProcessId)
    }

    pub fn backups(&self) -> impl Iterator<Item = ProcessId> {
        self.replicas().filter(|&id| id != PRIMARY)
    }

    /// Every replica other than `id`, ascending.
    pub fn peers_of(&self, id: ProcessId) -> impl Iterator<Item = ProcessId> {
        self.replicas().filter(move |&other| other != id)
    }

    pub fn is_replica(&self, id: ProcessId) -> bool {
        id != CLIENT && (id as usize) < self.num_process
    }

    /// Matching Prepares from peers, self excluded.
    pub fn prepare_threshold(&self) -> usize {
        2 * self.num_faulty
    }

    /// Matching Commits, self included.
    pub fn commit_threshold(&self) -> usize {
        2 * self.num_faulty + 1
    }

    /// Matching replies the client needs.
    pub fn reply_threshold(&self) -> usize {
        self.num_faulty + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy {
    /// Abort the replica with `QuorumFailure` instead of logging and going on.
    pub halt_on_quorum_failure: bool,
    /// Bound on each per-peer wait while collecting a quorum. `None` blocks
    /// until the peer answers.
    pub peer_timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_fault_tolerance() {
        for (num_process, num_faulty, optimal) in [
            (5, 1, true),
            (6, 1, false),
            (7, 1, false),
            (8, 2, true),
            (11, 3, true),
            (14, 4, true),
        ] {
            let group = Group::new(num_process).unwrap();
            assert_eq!(group.num_replica(), num_process - 1);
            assert_eq!(group.num_faulty(), num_faulty);
            assert_eq!(group.is_optimal(), optimal);
        }
    }

    #[test]
    fn process_count_bounds() {
        assert_eq!(Group::new(4), Err(ConfigError::TooFewProcesses(4)));
        assert_eq!(Group::new(0), Err(ConfigError::TooFewProcesses(0)));
        assert!(Group::new(MAX_PROCESS_COUNT).is_ok());
        assert_eq!(
            Group::new(MAX_PROCESS_COUNT + 1),
            Err(ConfigError::TooManyProcesses(MAX_PROCESS_COUNT + 1))
        );
    }

    #[test]
    fn thresholds() {
        let group = Group::new(8).unwrap();
        assert_eq!(group.prepare_threshold(), 4);
        assert_eq!(group.commit_threshold(), 5);
        assert_eq!(group.reply_threshold(), 3);
    }

    #[test]
    fn membership() {
        let group = Group::new(5).unwrap();
        assert_eq!(Vec::from_iter(group.replicas()), [1, 2, 3, 4]);
        assert_eq!(Vec::from_iter(group.backups()), [2, 3, 4]);
        assert_eq!(Vec::from_iter(group.peers_of(3)), [1, 2, 4]);
        assert!(!group.is_replica(CLIENT));
        assert!(group.is_replica(4));
        assert!(!group.is_replica(5));

        let group = Group::new(MAX_PROCESS_COUNT).unwrap();
        assert_eq!(group.replicas().last(), Some(ProcessId::MAX));
    }
}
