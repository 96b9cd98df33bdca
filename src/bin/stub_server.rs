use clap::Parser;
use tracing_subscriber::EnvFilter;

use memento_stress::server::{CallListService, Server};

/// Digest-protected call-list endpoint to point memento-stress at.
#[derive(Parser, Debug)]
#[command(name = "stub-server", version)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Home domain of the subscribers served
    #[arg(long)]
    domain: String,

    #[arg(long, default_value = memento_stress::DEFAULT_PASSWORD)]
    password: String,

    #[arg(long, default_value_t = 1024)]
    max_connections: usize,

    /// Log filter, used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let server = Server::bind(args.listen.as_str())
        .await?
        .max_connections(args.max_connections)
        .service(CallListService::new(args.domain, args.password));

    server.run().await;
    Ok(())
}
