// Admin CLI for the dos farm manager (spec.md §6). Hand-rolled argument
// parsing in the spirit of the original Go tool's flag.Var-based parser
// (examples/original_source/admin-tool/flags.go) — this codebase pulls in
// no CLI-parsing crate anywhere, so neither does this binary.
//
// Usage: dosfarm-admin <verb> [args...]
// Exit codes: 0 success, 1 usage, 2 conflicting/malformed args, 3 operational failure.

use std::process::ExitCode;
use std::sync::Arc;

use dosfarm_manager::config::Config;
use dosfarm_manager::datanode::TcpDataNodeClientFactory;
use dosfarm_manager::model::{ChunkHash, ClusterId, ClusterState, Intent, NodeId};
use dosfarm_manager::store::{ClusterStore, FileClusterStore, FileIndexStore, IndexStore};
use dosfarm_manager::Manager;

const USAGE: &str = "\
dosfarm-admin <verb> [args]

verbs:
  create-cluster addr,addr,...
  delete-cluster clusterId
  move-cluster src,tgt
  balance-clusters id,id,...|*
  add-node clusterId=addr,addr,...
  remove-node nodeId
  create-snapshot clusterId
  delete-snapshot clusterId=index
  restore-snapshot clusterId=index
  change-state {*|id,id,...} [online|readonly|offline]
  sync-cluster clusterId
  sync-clusters
  clusters-report
  get-cluster id
  get-clusters
";

fn build_manager() -> Result<Manager, CliError> {
    let config = Config::from_env();
    let cluster_store: Arc<dyn ClusterStore> = Arc::new(FileClusterStore::open(&config.cluster_store_dir)?);
    let index_store: Arc<dyn IndexStore> = Arc::new(FileIndexStore::open(&config.index_store_dir)?);
    let data_nodes = Arc::new(TcpDataNodeClientFactory { timeout: config.rpc_timeout });
    Ok(Manager::new(cluster_store, index_store, data_nodes, config))
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',').filter(|p| !p.is_empty()).map(|p| p.to_string()).collect()
}

fn split_eq(s: &str) -> Option<(&str, &str)> {
    let idx = s.find('=')?;
    Some((&s[..idx], &s[idx + 1..]))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(verb) = args.first() else {
        eprint!("{USAGE}");
        return ExitCode::from(1);
    };
    let rest = &args[1..];

    match run(verb, rest).await {
        Ok(()) => ExitCode::from(0),
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}");
            eprint!("{USAGE}");
            ExitCode::from(1)
        }
        Err(CliError::Conflict(msg)) => {
            eprintln!("{msg}");
            ExitCode::from(2)
        }
        Err(CliError::Operational(msg)) => {
            eprintln!("operation failed: {msg}");
            ExitCode::from(3)
        }
    }
}

enum CliError {
    Usage(String),
    Conflict(String),
    Operational(String),
}

impl From<dosfarm_manager::DosError> for CliError {
    fn from(e: dosfarm_manager::DosError) -> Self {
        CliError::Operational(e.to_string())
    }
}

async fn run(verb: &str, args: &[String]) -> Result<(), CliError> {
    let manager = build_manager()?;

    match verb {
        "create-cluster" => {
            let addresses = args.first().ok_or_else(|| CliError::Usage("create-cluster requires addr,addr,...".into()))?;
            let cluster = manager.register(&split_csv(addresses)).await?;
            println!("created cluster {}", cluster.id);
        }
        "delete-cluster" => {
            let id = args.first().ok_or_else(|| CliError::Usage("delete-cluster requires clusterId".into()))?;
            let cluster_id = ClusterId(id.clone());
            manager.change_state(&cluster_id, ClusterState::Offline)?;
            manager.unregister_cluster(&cluster_id).await?;
            println!("deleted cluster {id}");
        }
        "move-cluster" => {
            let arg = args.first().ok_or_else(|| CliError::Usage("move-cluster requires src,tgt".into()))?;
            let parts = split_csv(arg);
            if parts.len() != 2 {
                return Err(CliError::Conflict("you should define source and target cluster ids".into()));
            }
            manager.move_cluster(&ClusterId(parts[0].clone()), &ClusterId(parts[1].clone())).await?;
            println!("moved cluster {} -> {}", parts[0], parts[1]);
        }
        "balance-clusters" => {
            let arg = args.first().ok_or_else(|| CliError::Usage("balance-clusters requires id,id,... or *".into()))?;
            let ids = if arg == "*" {
                manager.get_clusters()?.into_iter().map(|c| c.id).collect::<Vec<_>>()
            } else {
                let parts = split_csv(arg);
                if parts.len() < 2 {
                    return Err(CliError::Conflict("you should define at least two cluster ids or * for all".into()));
                }
                parts.into_iter().map(ClusterId).collect()
            };
            manager.balance_clusters(&ids).await?;
            println!("balanced {} cluster(s)", ids.len());
        }
        "repair-consistency" => {
            // Chunk-level structural/integrity/checksum repair lives on the
            // data-node side of the wire contract (out of scope for this
            // core); the admin surface accepts the verb for compatibility
            // and forwards a farm-wide synchronize.
            manager.synchronize_all().await?;
            println!("repair-consistency dispatched as a full synchronize sweep");
        }
        "add-node" => {
            let arg = args.first().ok_or_else(|| CliError::Usage("add-node requires clusterId=addr,addr,...".into()))?;
            let (cluster_id, addrs) = split_eq(arg).ok_or_else(|| CliError::Usage("input is not suitable".into()))?;
            manager.register_nodes_to(&ClusterId(cluster_id.to_string()), &split_csv(addrs)).await?;
            println!("added node(s) to cluster {cluster_id}");
        }
        "remove-node" => {
            let id = args.first().ok_or_else(|| CliError::Usage("remove-node requires nodeId".into()))?;
            manager.unregister_node(&NodeId(id.clone())).await?;
            println!("removed node {id}");
        }
        "create-snapshot" => {
            let id = args.first().ok_or_else(|| CliError::Usage("create-snapshot requires clusterId".into()))?;
            manager.create_snapshot(&ClusterId(id.clone())).await?;
            println!("created snapshot for cluster {id}");
        }
        "delete-snapshot" | "restore-snapshot" => {
            let arg = args.first().ok_or_else(|| CliError::Usage(format!("{verb} requires clusterId=index")))?;
            let (cluster_id, index_str) = split_eq(arg).ok_or_else(|| CliError::Usage("you should define the snapshot index for the cluster".into()))?;
            if cluster_id.is_empty() {
                return Err(CliError::Usage("you should define the target cluster id".into()));
            }
            let index: u64 = index_str
                .parse()
                .map_err(|_| CliError::Usage("snapshot index should be 0 or positive numeric value".into()))?;
            if verb == "delete-snapshot" {
                manager.delete_snapshot(&ClusterId(cluster_id.to_string()), index).await?;
                println!("deleted snapshot {index} of cluster {cluster_id}");
            } else {
                manager.restore_snapshot(&ClusterId(cluster_id.to_string()), index).await?;
                println!("restored snapshot {index} of cluster {cluster_id}");
            }
        }
        "change-state" => {
            let target = args.first().ok_or_else(|| CliError::Usage("change-state requires {*|id,id,...} [online|readonly|offline]".into()))?;
            let state_str = args.get(1).map(String::as_str).unwrap_or("online");
            let state = match state_str {
                "online" => ClusterState::Online,
                "readonly" => ClusterState::ReadOnly,
                "offline" => ClusterState::Offline,
                other => return Err(CliError::Usage(format!("unknown state {other}"))),
            };
            if target == "*" {
                manager.change_state_all(state)?;
                println!("changed state of all clusters to {state_str}");
            } else {
                for id in split_csv(target) {
                    manager.change_state(&ClusterId(id), state)?;
                }
                println!("changed state of {target} to {state_str}");
            }
        }
        "sync-cluster" => {
            let id = args.first().ok_or_else(|| CliError::Usage("sync-cluster requires clusterId".into()))?;
            manager.synchronize_cluster(&ClusterId(id.clone())).await?;
            println!("queued synchronize for cluster {id}");
        }
        "sync-clusters" => {
            manager.synchronize_all().await?;
            println!("queued synchronize for all clusters");
        }
        "clusters-report" | "get-clusters" => {
            for cluster in manager.get_clusters()? {
                println!(
                    "{}  state={:?}  maintain={}  used={}/{}  nodes={}",
                    cluster.id,
                    cluster.state,
                    cluster.maintain,
                    cluster.used,
                    cluster.size,
                    cluster.nodes.len()
                );
            }
        }
        "get-cluster" => {
            let id = args.first().ok_or_else(|| CliError::Usage("get-cluster requires id".into()))?;
            let cluster = manager.get_cluster(&ClusterId(id.clone()))?;
            println!("{cluster:#?}");
        }
        "find" => {
            let hash_hex = args.first().ok_or_else(|| CliError::Usage("find requires a chunk hash".into()))?;
            let hash = ChunkHash::new(hash_hex.clone())?;
            match manager.find(&hash, Intent::Read)? {
                dosfarm_manager::placement::FindOutcome::Found { cluster_id, addresses } => {
                    println!("cluster={cluster_id} addresses={addresses:?}");
                }
                dosfarm_manager::placement::FindOutcome::Skip => println!("not found"),
            }
        }
        _ => {
            return Err(CliError::Usage(format!("unknown verb {verb}")));
        }
    }

    Ok(())
}
