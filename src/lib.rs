pub mod app;
pub mod backup;
pub mod client;
pub mod cluster;
pub mod config;
pub mod fault;
pub mod message;
pub mod model;
pub mod net;
pub mod primary;
pub mod quorum;
pub mod reconcile;
pub mod replica;
pub mod task;
pub mod transport;

pub use anyhow::{anyhow as err, bail, Error, Result};

pub use crate::app::{App, Counter};
pub use crate::client::Client;
pub use crate::cluster::{ClusterConfig, Report};
pub use crate::config::{ConfigError, Group, Policy};
pub use crate::fault::Fault;
pub use crate::message::{Message, Operation, ProcessId};
pub use crate::quorum::QuorumFailure;
pub use crate::replica::{Outcome, Replica};
pub use crate::transport::{Source, Transport};
