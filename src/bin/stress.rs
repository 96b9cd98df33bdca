use std::io;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use tokio::signal;
use tracing_subscriber::EnvFilter;

use memento_stress::client::{self, Config, FetcherKind, RateGovernor, Target};

/// Loop retrieving the call lists of a range of DNs.
#[derive(Parser, Debug)]
#[command(name = "memento-stress", version)]
struct Args {
    /// Start of the DN range
    start_dn: u64,

    /// End of the DN range
    end_dn: u64,

    /// Memento hostname
    host: String,

    /// The subscribers' home domain
    domain: String,

    /// Target request rate (requests / s)
    #[arg(value_parser = parse_rate)]
    target_rate: Option<f64>,

    /// How often to print the achieved rate, in seconds
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    stats_interval: u64,

    /// Per-request timeout, in seconds
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Password shared by all subscribers
    #[arg(long, default_value = memento_stress::DEFAULT_PASSWORD)]
    password: String,

    /// How requests are issued
    #[arg(long, value_enum, default_value_t = Fetcher::Curl)]
    fetcher: Fetcher,

    #[arg(long, value_enum, default_value_t = Scheme::Https)]
    scheme: Scheme,

    /// Stop after this many requests instead of running until interrupted
    #[arg(long)]
    count: Option<u64>,

    /// Log filter, used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Fetcher {
    /// Run curl once per request
    Curl,
    /// Built-in HTTP client
    Native,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scheme {
    Https,
    Http,
}

fn parse_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{}", e))?;
    match RateGovernor::tick_for(rate) {
        Some(_) => Ok(rate),
        None if rate.is_finite() && rate > 0.0 => Err("is too low to schedule".to_owned()),
        None => Err("must be a positive number".to_owned()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.start_dn > args.end_dn {
        Args::command()
            .error(
                ErrorKind::ValueValidation,
                format!("start_dn ({}) must not be greater than end_dn ({})", args.start_dn, args.end_dn),
            )
            .exit();
    }

    init_tracing(&args.log_level);

    let config = Config {
        start_dn: args.start_dn,
        end_dn: args.end_dn,
        target: Target {
            scheme: match args.scheme {
                Scheme::Https => "https",
                Scheme::Http => "http",
            }
            .to_owned(),
            host: args.host,
            domain: args.domain,
            password: args.password,
            timeout: Duration::from_secs(args.timeout),
        },
        target_rate: args.target_rate,
        stats_interval: Duration::from_secs(args.stats_interval),
        fetcher: match args.fetcher {
            Fetcher::Curl => FetcherKind::Curl,
            Fetcher::Native => FetcherKind::Native,
        },
        count: args.count,
    };

    tokio::select! {
        biased;

        interrupt = signal::ctrl_c() => interrupted(interrupt)?,
        result = client::run(config) => result?,
    }

    Ok(())
}

/// An interrupt ends the run quietly; failing to listen for one is an error.
fn interrupted(listen: io::Result<()>) -> anyhow::Result<()> {
    listen.map_err(|e| {
        tracing::error!(error = %e, "cannot listen for ctrl-c");
        anyhow::Error::new(e).context("failed to listen for ctrl-c")
    })
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
