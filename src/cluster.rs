use std::collections::BTreeMap;

use crate::{
    app::Counter,
    client::Client,
    config::{Group, Policy},
    fault::Fault,
    message::{Operation, ProcessId},
    model::event_channel,
    net::local_network,
    replica::{replica_loop, Outcome, Replica},
    task::BackgroundMonitor,
    transport::Transport,
};

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub group: Group,
    pub policy: Policy,
    pub op: Operation,
    pub faults: BTreeMap<ProcessId, Fault>,
}

impl ClusterConfig {
    pub fn new(num_process: usize) -> crate::Result<Self> {
        Ok(Self {
            group: Group::new(num_process)?,
            policy: Default::default(),
            op: Operation::Add,
            faults: Default::default(),
        })
    }

    pub fn with_fault(mut self, id: ProcessId, fault: Fault) -> Self {
        self.faults.insert(id, fault);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub consensus: Option<i64>,
    /// Sorted by replica id.
    pub replicas: Vec<Outcome>,
}

impl Report {
    pub fn replica(&self, id: ProcessId) -> Option<&Outcome> {
        self.replicas.iter().find(|outcome| outcome.id == id)
    }
}

/// Runs one client request through the whole group. `transports[i]` is the
/// transport of process `i`.
///
/// Replicas run as background tasks; the first of them to fail aborts the
/// run with its error.
pub async fn run<T>(config: &ClusterConfig, transports: Vec<T>) -> crate::Result<Report>
where
    T: Transport,
{
    let group = config.group;
    if transports.len() != group.num_process() {
        crate::bail!(
            "{} transports for {} processes",
            transports.len(),
            group.num_process()
        )
    }
    if let Some(id) = config.faults.keys().find(|&&id| !group.is_replica(id)) {
        crate::bail!("fault assigned to non-replica process {id}")
    }
    if config.faults.len() > group.num_faulty() {
        tracing::warn!(
            "{} faulty replicas exceed the tolerated f = {}",
            config.faults.len(),
            group.num_faulty()
        )
    }

    let mut monitor = BackgroundMonitor::default();
    let spawner = monitor.spawner();
    let (outcome_sender, mut outcome_source) = event_channel();
    let mut transports = transports.into_iter();
    let client_transport = transports
        .next()
        .ok_or(crate::err!("missing client transport"))?;
    for transport in transports {
        let id = transport.id();
        let fault = config.faults.get(&id).copied();
        let replica =
            Replica::new(group, config.policy, Counter::default(), transport)?.with_fault(fault);
        let outcome_sender = outcome_sender.clone();
        spawner.spawn(format!("replica {id}"), async move {
            outcome_sender.send(replica_loop(replica).await?)
        })
    }

    let mut client = Client::new(group, client_transport)?;
    let consensus = tokio::select! {
        consensus = client.invoke(config.op) => consensus?,
        result = monitor.wait() => {
            result?;
            crate::bail!("replica tasks stopped unexpectedly")
        }
    };
    let mut replicas = Vec::with_capacity(group.num_replica());
    while replicas.len() < group.num_replica() {
        tokio::select! {
            outcome = outcome_source.next() => replicas.push(outcome?),
            result = monitor.wait() => {
                result?;
                crate::bail!("replica tasks stopped unexpectedly")
            }
        }
    }
    replicas.sort_by_key(|outcome: &Outcome| outcome.id);
    Ok(Report {
        consensus,
        replicas,
    })
}

/// `run` over an in-process network.
pub async fn run_local(config: &ClusterConfig) -> crate::Result<Report> {
    run(config, local_network(config.group.num_process())).await
}
