//! Status command - report whether the daemon is up.

use parley_core::{CatalogError, ConnectivityMonitor, ConnectivityState, ModelCatalog, RelayConfig};

pub(crate) async fn run(relay: &RelayConfig) -> miette::Result<()> {
    println!("Daemon: {}", relay.base_url);

    let monitor = ConnectivityMonitor::from_config(relay);
    if monitor.check().await != ConnectivityState::Reachable {
        println!("Status: not reachable");
        println!();
        super::print_troubleshooting(&relay.base_url);
        return Err(miette::miette!("Daemon not reachable at {}", relay.base_url));
    }
    println!("Status: running");

    let catalog = ModelCatalog::from_config(relay);
    match catalog.refresh().await {
        Ok(models) => println!("Models: {} installed", models.len()),
        Err(CatalogError::EmptyCatalog) => {
            println!("Models: none installed");
            println!();
            super::print_pull_hint();
        }
        Err(e) => println!("Models: {}", e),
    }

    Ok(())
}
