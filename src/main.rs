use std::net::SocketAddr;
use std::path::Path;

use tracing::{error, info};

use rrdns::cache::RrCache;
use rrdns::config::DnsConfig;
use rrdns::logging::QueryLogger;
use rrdns::server::{self, ServerOptions};
use rrdns::zone;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rrdns=debug".parse().unwrap()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "rrdns.json".to_string());
    let config = DnsConfig::load(Path::new(&config_path))?;
    let now = server::unix_now();

    let mut cache = RrCache::new(config.max_cache_bytes, config.max_cache_records);
    cache.set_round_robin(config.round_robin);

    // Loader failures are fatal for the file, not for the server.
    for zone_file in &config.zone_files {
        match zone::load_zone(&mut cache, Path::new(&zone_file.path), &zone_file.origin, now) {
            Ok(count) => info!("loaded {} records from {}", count, zone_file.path),
            Err(e) => error!("skipping zone file: {}", e),
        }
    }
    if config.load_hosts {
        match zone::load_hosts(&mut cache, Path::new(&config.hosts_file), true, now) {
            Ok(()) => info!("loaded hosts entries from {}", config.hosts_file),
            Err(e) => error!("skipping hosts file: {}", e),
        }
    }
    info!(
        "cache primed: {} records, {} bytes",
        cache.len(),
        cache.bytes_used()
    );

    let logger = if config.query_log_path.is_empty() {
        None
    } else {
        Some(QueryLogger::new(&config.query_log_path))
    };

    let addr: SocketAddr = format!("{}:{}", config.listen_address, config.port).parse()?;
    let options = ServerOptions {
        recursion_available: config.recursion_available,
    };
    server::run_udp_server(addr, &mut cache, options, logger.as_ref()).await
}
