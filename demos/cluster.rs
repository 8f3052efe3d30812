use std::sync::Arc;
use std::time::Duration;
use vsr_view_change::{Candidate, ChannelNetwork, Config, LogReconciler, Replica, ReplicaState};

fn main() {
    env_logger::init();
    let nr_replicas = std::env::args()
        .nth(1)
        .map(|arg| arg.parse::<usize>().unwrap())
        .unwrap_or(3);
    let config = Config::new(nr_replicas);
    let networks = ChannelNetwork::cluster(nr_replicas, Duration::from_millis(20));
    let replicas: Vec<_> = networks
        .into_iter()
        .enumerate()
        .map(|(id, network)| {
            let log: Vec<String> = (0..=id).map(|n| format!("op-{}", n)).collect();
            Arc::new(Replica::with_state(
                config.clone(),
                ReplicaState::with_log(id, log),
                network,
                LongestLog,
            ))
        })
        .collect();
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::unbounded();
    let handles: Vec<_> = replicas
        .iter()
        .map(|replica| {
            let replica = replica.clone();
            let shutdown_rx = shutdown_rx.clone();
            std::thread::spawn(move || replica.run(&shutdown_rx))
        })
        .collect();
    for view in 0..3 {
        println!("Suspecting primary {} of view {}", config.primary_id(view), view);
        for replica in &replicas {
            replica.suspect_primary();
        }
        while replicas.iter().any(|replica| replica.view() <= view) {
            std::thread::sleep(Duration::from_millis(10));
        }
        for replica in &replicas {
            println!(
                "Replica {} in view {}: {:?}",
                replica.id(),
                replica.view(),
                replica.current_log()
            );
        }
    }
    for _ in &handles {
        shutdown_tx.send(()).unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

struct LongestLog;

impl LogReconciler<String> for LongestLog {
    fn reconcile(&self, candidates: &[Candidate<'_, String>]) -> Vec<String> {
        candidates
            .iter()
            .max_by_key(|candidate| candidate.log.len())
            .map(|candidate| candidate.log.to_vec())
            .unwrap_or_default()
    }
}
