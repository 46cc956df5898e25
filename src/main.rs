// Manager-node entry point: boots the cluster-administration core, starts
// the Synchronize queue's maintenance watchdog, and waits for shutdown.

use std::sync::Arc;

use dosfarm_manager::config::Config;
use dosfarm_manager::datanode::TcpDataNodeClientFactory;
use dosfarm_manager::store::{ClusterStore, FileClusterStore, FileIndexStore, IndexStore};
use dosfarm_manager::{Manager, Result};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).with_level(true).init();

    print_banner();

    let config = Config::from_env();
    print_startup_info(&config);

    let cluster_store: Arc<dyn ClusterStore> = Arc::new(FileClusterStore::open(&config.cluster_store_dir)?);
    let index_store: Arc<dyn IndexStore> = Arc::new(FileIndexStore::open(&config.index_store_dir)?);
    let data_nodes = Arc::new(TcpDataNodeClientFactory { timeout: config.rpc_timeout });

    info!("loaded {} cluster(s) from {}", cluster_store.get_all()?.len(), config.cluster_store_dir);

    let manager = Manager::new(cluster_store, index_store, data_nodes, config.clone());
    manager.spawn_watchdog();

    println!();
    println!("+-----------------------------------------------------------+");
    println!("|  dos farm manager is ready                                 |");
    println!("|  listen address: {:<42}|", config.listen_addr);
    println!("+-----------------------------------------------------------+");
    println!();

    info!("manager core initialized, awaiting shutdown signal");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("failed to listen for shutdown signal: {e}"),
    }

    info!("manager shutting down");
    Ok(())
}

fn print_banner() {
    println!("================================================================");
    println!("   dos farm - manager-node cluster administration core");
    println!("================================================================");
    println!();
}

fn print_startup_info(config: &Config) {
    println!("----------------------------------------------------------------");
    println!(" STARTUP CONFIGURATION");
    println!("----------------------------------------------------------------");
    println!("  listen address:        {}", config.listen_addr);
    println!("  cluster store dir:     {}", config.cluster_store_dir);
    println!("  index store dir:       {}", config.index_store_dir);
    println!("  reservation ttl:       {}s", config.reservation_ttl.as_secs());
    println!("  lead duration:         {}s", config.lead_duration.as_secs());
    println!("  rpc timeout:           {}s", config.rpc_timeout.as_secs());
    println!("  batch timeout:         {}s", config.batch_timeout.as_secs());
    println!("  retry count:           {}", config.retry_count);
    println!("  stale maintain after:  {}s", config.stale_maintain_after.as_secs());
    println!("  balance epsilon:       {}", config.balance_epsilon);
    println!("  batch size:            {}", config.batch_size);
    println!("----------------------------------------------------------------");
    println!();
}
