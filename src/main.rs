use std::time::Duration;

use clap::Parser;
use pbft_quorum::{
    cluster::{self, ClusterConfig, Report},
    net::udp_loopback_network,
    task::BackgroundMonitor,
    Fault, Operation, ProcessId,
};
use rand::{rngs::StdRng, seq::IteratorRandom, Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
struct Cli {
    /// Total process count: 1 client and the replicas.
    #[clap(long, default_value_t = 5)]
    processes: usize,
    #[clap(long, default_value = "add")]
    op: Operation,

    /// `ID=KIND[:ARG]`, e.g. `3=corrupt-reply:7` or `4=silent-prepare`.
    #[clap(long = "fault", value_parser = parse_fault)]
    faults: Vec<(ProcessId, Fault)>,
    /// Corrupt the replies of this many randomly chosen backups.
    #[clap(long)]
    random_faults: Option<usize>,
    #[clap(long, default_value_t = 0)]
    seed: u64,

    #[clap(long)]
    halt_on_quorum_failure: bool,
    #[clap(long)]
    peer_timeout_ms: Option<u64>,

    /// Exchange messages over loopback UDP sockets instead of channels.
    #[clap(long)]
    udp: bool,
}

fn parse_fault(s: &str) -> pbft_quorum::Result<(ProcessId, Fault)> {
    let Some((id, fault)) = s.split_once('=') else {
        pbft_quorum::bail!("expect ID=KIND[:ARG], got {s:?}")
    };
    Ok((id.parse()?, fault.parse()?))
}

/// Corrupts the replies of `count` random backups, leaving explicitly faulty
/// ones alone.
fn add_random_faults(config: &mut ClusterConfig, count: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let candidates = config
        .group
        .backups()
        .filter(|id| !config.faults.contains_key(id))
        .choose_multiple(&mut rng, count);
    for id in candidates {
        let fault = Fault::CorruptReply {
            result: rng.gen_range(-100..100),
        };
        config.faults.insert(id, fault);
    }
}

#[tokio::main]
async fn main() -> pbft_quorum::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    let mut config = ClusterConfig::new(cli.processes)?;
    config.op = cli.op;
    config.policy.halt_on_quorum_failure = cli.halt_on_quorum_failure;
    config.policy.peer_timeout = cli.peer_timeout_ms.map(Duration::from_millis);
    config.faults.extend(cli.faults);
    if let Some(count) = cli.random_faults {
        add_random_faults(&mut config, count, cli.seed)
    }
    if config.policy.peer_timeout.is_none()
        && config.faults.values().any(|fault| !fault.sends_prepare())
    {
        pbft_quorum::bail!("silent replicas stall every peer unless --peer-timeout-ms is given")
    }
    tracing::info!(
        "p = {}, f = {}, replicas = {}",
        config.group.num_process(),
        config.group.num_faulty(),
        config.group.num_replica()
    );

    let report = if cli.udp {
        let mut monitor = BackgroundMonitor::default();
        let transports =
            udp_loopback_network(config.group.num_process(), &monitor.spawner()).await?;
        tokio::select! {
            report = cluster::run(&config, transports) => report?,
            result = monitor.wait() => {
                result?;
                pbft_quorum::bail!("transport stopped unexpectedly")
            }
        }
    } else {
        cluster::run_local(&config).await?
    };
    print_report(&report);
    Ok(())
}

fn print_report(report: &Report) {
    for outcome in &report.replicas {
        println!(
            "replica {}: prepared = {}, committed = {}, state = {}, replied = {}",
            outcome.id, outcome.prepared, outcome.committed, outcome.state, outcome.reply.result
        )
    }
    match report.consensus {
        Some(result) => println!("consensus: result = {result}"),
        None => println!("no consensus"),
    }
}
