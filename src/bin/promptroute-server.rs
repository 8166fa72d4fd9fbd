//! Standalone router service: environment-configured, in-memory shared
//! store, stock model catalog.

use std::net::SocketAddr;
use std::sync::Arc;

use promptroute::config::RouterConfig;
use promptroute::pipeline::RouterHandle;
use promptroute::server;
use promptroute::store::MemoryStore;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    promptroute::init_logger();

    let config = RouterConfig::from_env();
    let store = Arc::new(MemoryStore::new());
    let handle = Arc::new(RouterHandle::new(config, store));

    // Keep the descriptor table fresh and availability probed.
    let _refresh = handle.catalog.clone().spawn_refresh();
    let _probe = handle
        .catalog
        .clone()
        .spawn_availability_probe(handle.registry.clone());

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000u16);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    server::serve(handle, addr).await
}
