use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dnsgate::dns::BlockPolicy;
use dnsgate::proxy::{self, ProxyConfig};
use dnsgate::upstream::Strategy;

#[derive(Parser)]
#[command(name = "dnsgate")]
#[command(about = "Filtering, caching DNS forwarder", long_about = None)]
struct Args {
    /// Local port to listen on
    #[arg(short, long, env = "DNSGATE_PORT", default_value = "53")]
    port: u16,

    /// Bind address
    #[arg(short, long, env = "DNSGATE_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Upstream transport
    #[arg(short, long, env = "DNSGATE_STRATEGY", value_enum, default_value_t = Strategy::Https)]
    strategy: Strategy,

    /// Upstream servers: ip:port for udp, URLs for https (defaults per strategy)
    #[arg(short, long = "upstream", env = "DNSGATE_UPSTREAMS", value_delimiter = ',')]
    upstreams: Vec<String>,

    /// Upstream timeout in milliseconds
    #[arg(long, env = "DNSGATE_TIMEOUT_MS", default_value = "2000")]
    timeout_ms: u64,

    /// Maximum cached answers (0 = unbounded)
    #[arg(long, env = "DNSGATE_CACHE_MAX_ENTRIES", default_value = "100000")]
    cache_max_entries: usize,

    /// Maximum queries handled concurrently (0 = unbounded)
    #[arg(long, env = "DNSGATE_MAX_IN_FLIGHT", default_value = "0")]
    max_in_flight: usize,

    /// Answer for blocked domains
    #[arg(long, env = "DNSGATE_BLOCK_POLICY", value_enum, default_value_t = BlockPolicy::Sinkhole)]
    block_policy: BlockPolicy,

    /// Blocklist file (plain domains or hosts format)
    #[arg(long, env = "DNSGATE_BLOCKLIST")]
    blocklist: Option<PathBuf>,

    /// Blocklist reload interval in seconds
    #[arg(long, env = "DNSGATE_BLOCKLIST_REFRESH_SECS", default_value = "3600")]
    blocklist_refresh_secs: u64,

    /// Log every query (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let bind_addr = SocketAddr::new(args.bind, args.port);
    let upstreams = if args.upstreams.is_empty() {
        args.strategy.default_upstreams()
    } else {
        args.upstreams
    };

    let config = ProxyConfig {
        bind_addr,
        strategy: args.strategy,
        upstreams,
        timeout: Duration::from_millis(args.timeout_ms),
        cache_max_entries: args.cache_max_entries,
        max_in_flight: args.max_in_flight,
        block_policy: args.block_policy,
        blocklist: args.blocklist,
        blocklist_refresh: Duration::from_secs(args.blocklist_refresh_secs.max(1)),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(proxy::run(config))
}
