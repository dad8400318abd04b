use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wsbench::{
    BenchConfig, Config, ConnectionPool, Driver, EchoServer, Metrics, Pattern, PayloadKind,
    PoolConfig, TcpConnector,
};

/// WebSocket load generator and echo target
#[derive(Debug, Parser)]
#[command(name = "wsbench", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Drive load against a WebSocket endpoint
    Run(RunArgs),
    /// Serve as an echo target
    Serve(ServeArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PatternArg {
    /// Wait for each echo before sending the next message
    Echo,
    /// Send without waiting for echoes
    Fire,
    /// Echo request/response at a fixed rate per connection
    Rate,
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Target URL (ws://host:port/path)
    #[arg(long)]
    url: String,

    /// Concurrent connections
    #[arg(short = 'c', long, default_value_t = 1)]
    connections: usize,

    /// Message payload size in bytes
    #[arg(short = 's', long, default_value_t = 128)]
    size: usize,

    /// Messages per connection
    #[arg(short = 'm', long)]
    messages: Option<u64>,

    /// Stop after this many seconds
    #[arg(short = 'd', long, value_name = "SECS")]
    duration: Option<u64>,

    #[arg(long, value_enum, default_value_t = PatternArg::Echo)]
    pattern: PatternArg,

    /// Messages per second per connection for `--pattern rate`
    #[arg(long, default_value_t = 10.0)]
    rate: f64,

    /// Per-message receive timeout in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    timeout: u64,

    /// Send binary instead of text messages
    #[arg(long)]
    binary: bool,

    /// Seconds to wait after connecting before measuring
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    warmup: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, clap::Args)]
struct ServeArgs {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:9001")]
    bind: String,

    /// Refuse connections beyond this count
    #[arg(long)]
    max_connections: Option<usize>,
}

impl RunArgs {
    fn bench_config(&self) -> BenchConfig {
        let pattern = match self.pattern {
            PatternArg::Echo => Pattern::EchoRequestResponse,
            PatternArg::Fire => Pattern::FireAndForget,
            PatternArg::Rate => Pattern::FixedRate {
                per_second: self.rate,
            },
        };
        let mut config = BenchConfig::new()
            .with_connections(self.connections)
            .with_message_size(self.size)
            .with_pattern(pattern)
            .with_receive_timeout(Duration::from_millis(self.timeout))
            .with_warmup(Duration::from_secs(self.warmup))
            .with_payload(if self.binary {
                PayloadKind::Binary
            } else {
                PayloadKind::Text
            });
        config.duration = self.duration.map(Duration::from_secs);
        // With only a duration given, run for the whole duration.
        config.message_count = match (self.messages, self.duration) {
            (Some(count), _) => Some(count),
            (None, Some(_)) => None,
            (None, None) => config.message_count,
        };
        config
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wsbench=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let transport = TcpConnector::from_url(&args.url)?;
    let config = args.bench_config();
    let connection_config = Config::client();
    config.check(&connection_config.limits)?;

    let mut pool_config = PoolConfig::new();
    pool_config.capacity = Some(config.connection_count);
    let pool = Arc::new(ConnectionPool::new(pool_config, connection_config));
    let driver = Driver::new(Arc::clone(&pool), Arc::new(Metrics::new()));

    let mut running = tokio::spawn(async move { driver.run(&transport, &config).await });
    let report = tokio::select! {
        report = &mut running => report?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            pool.shutdown().await;
            running.await?
        }
    };
    pool.shutdown().await;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{report}");
    }
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<(), Box<dyn Error>> {
    let mut pool_config = PoolConfig::new();
    pool_config.capacity = args.max_connections;
    let server = Arc::new(EchoServer::bind(&args.bind, pool_config, Config::server()).await?);
    println!("Listening on ws://{} (Ctrl+C to stop)", server.local_addr()?);

    let running = Arc::clone(&server);
    let accept_loop = tokio::spawn(async move { running.run().await });

    tokio::signal::ctrl_c().await?;
    info!("interrupted, shutting down");
    server.pool().shutdown().await;
    accept_loop.await?;

    println!("{}", serde_json::to_string(&server.stats())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    match Cli::parse().command {
        Command::Run(args) => run(args).await,
        Command::Serve(args) => serve(args).await,
    }
}
