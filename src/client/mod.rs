use std::io::{self, Write};
use std::time::Duration;

use tokio::time::{self, Instant};

mod cycler;
mod fetch;
mod governor;
mod stats;

pub use cycler::cycle;
pub use fetch::{CurlFetcher, FetchError, Fetcher, NativeFetcher, Target};
pub use governor::RateGovernor;
pub use stats::{RateReport, StatsReporter, STATS_INTERVAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    Curl,
    Native,
}

pub struct Config {
    pub start_dn: u64,
    pub end_dn: u64,
    pub target: Target,
    pub target_rate: Option<f64>,
    pub stats_interval: Duration,
    pub fetcher: FetcherKind,
    pub count: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to set up TLS: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Issues one request at a time, reporting failures and the achieved rate
/// to `out` and pacing itself with a [`RateGovernor`].
pub struct Runner<F, W> {
    fetcher: F,
    out: W,
    governor: RateGovernor,
    stats: StatsReporter,
}

impl<F, W> Runner<F, W>
where
    F: Fetcher,
    W: Write,
{
    pub fn new(fetcher: F, out: W, target_rate: Option<f64>, stats_interval: Duration) -> Self {
        let start = Instant::now();

        Self {
            fetcher,
            out,
            governor: RateGovernor::new(target_rate, start),
            stats: StatsReporter::new(stats_interval, start),
        }
    }

    /// Fetches every DN `dns` yields, returning how many were requested.
    pub async fn run<I>(&mut self, dns: I) -> Result<u64, Error>
    where
        I: IntoIterator<Item = u64>,
    {
        let mut issued = 0;
        for dn in dns {
            self.step(dn).await?;
            issued += 1;
        }
        Ok(issued)
    }

    pub async fn step(&mut self, dn: u64) -> Result<(), Error> {
        match self.fetcher.fetch(dn).await {
            Ok(()) => tracing::trace!(dn, "call list fetched"),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::debug!(dn, error = ?e, "call list request failed");
                writeln!(self.out, "{}: {}", dn, e)?;
            }
        }

        let now = Instant::now();

        if let Some(report) = self.stats.record(now) {
            tracing::debug!(count = report.count, elapsed = ?report.elapsed, "rate window closed");
            writeln!(self.out, "{}", report)?;
        }

        if let Some(pause) = self.governor.pace(now) {
            time::sleep(pause).await;
        }

        Ok(())
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }
}

/// Yields at most `count` DNs from `dns`, or all of them without a count.
pub fn limit<I>(dns: I, count: Option<u64>) -> impl Iterator<Item = u64>
where
    I: IntoIterator<Item = u64>,
{
    dns.into_iter()
        .zip(0u64..)
        .take_while(move |(_, issued)| count.map_or(true, |count| *issued < count))
        .map(|(dn, _)| dn)
}

/// Runs the stress loop described by `config`, printing to stdout.
///
/// Without a request count this only returns on a fatal error.
pub async fn run(config: Config) -> Result<(), Error> {
    let fetcher: Box<dyn Fetcher> = match config.fetcher {
        FetcherKind::Curl => Box::new(CurlFetcher::new(config.target.clone())),
        FetcherKind::Native => Box::new(NativeFetcher::new(config.target.clone())?),
    };

    tracing::info!(
        start_dn = config.start_dn,
        end_dn = config.end_dn,
        host = %config.target.host,
        domain = %config.target.domain,
        target_rate = ?config.target_rate,
        fetcher = ?config.fetcher,
        "starting stress run"
    );

    let mut runner = Runner::new(fetcher, io::stdout(), config.target_rate, config.stats_interval);
    let dns = limit(cycle(config.start_dn, config.end_dn), config.count);
    let issued = runner.run(dns).await?;

    tracing::info!(issued, "stress run finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_stops_after_count() {
        let dns: Vec<u64> = limit(cycle(1000, 1002), Some(5)).collect();
        assert_eq!(dns, [1000, 1001, 1002, 1000, 1001]);

        assert_eq!(limit(cycle(1000, 1002), Some(0)).count(), 0);
    }

    #[test]
    fn limit_without_count_keeps_cycling() {
        assert_eq!(limit(cycle(1, 2), None).take(10_000).count(), 10_000);
    }

    #[test]
    fn limit_counts_past_u32() {
        let count = u64::from(u32::MAX) + 2;
        assert_eq!(limit(1..=3, Some(count)).count(), 3);
    }
}
