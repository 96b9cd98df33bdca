use std::error::Error;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::{signal, time};
use tokio::sync::broadcast::{self, Receiver};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use futures::future;
use futures::stream::{FuturesUnordered, StreamExt};

use hyper::service::Service;
use hyper::server::conn::Http;
use hyper::{Body, Request, Response};

mod call_list;
mod statistics;

pub use call_list::CallListService;
pub use statistics::{Counters, StatisticsService};

pub struct Server<S> {
    listener: TcpListener,
    max_connections: usize,
    http: Http,
    service: S,
}

pub struct Builder {
    listener: TcpListener,
    max_connections: usize,
    http: Http,
}

impl Builder {
    pub fn max_connections(mut self, num: usize) -> Self {
        self.max_connections = num;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn service<S>(self, service: S) -> Server<S> {
        Server {
            listener: self.listener,
            max_connections: self.max_connections,
            http: self.http,
            service,
        }
    }
}

impl Server<()> {
    const DEFAULT_MAX_CONNECTIONS: usize = 1024;

    pub async fn bind<A: ToSocketAddrs>(addrs: A) -> io::Result<Builder> {
        Ok(Builder {
            listener: TcpListener::bind(addrs).await?,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            http: Http::new(),
        })
    }
}

impl<S> Server<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    S::Error: Error + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    const DEFAULT_SHUTDOWN_DELAY: Duration = Duration::from_secs(5);

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    async fn process_stream(
        stream: TcpStream,
        http: Http,
        service: StatisticsService<S>,
        mut shutdown: Receiver<()>,
    ) {
        let connection = http.serve_connection(stream, service);

        let shutdown_signal = shutdown.recv();

        tokio::pin!(connection);

        let result = tokio::select! {
            r = connection.as_mut() => r,
            _ = shutdown_signal => {
                connection.as_mut().graceful_shutdown();
                connection.await
            }
        };

        if let Err(e) = result {
            tracing::debug!(error = %e, "connection closed with error");
        }
    }

    /// Serves until ctrl-c.
    pub async fn run(self) -> Counters {
        self.run_until(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Serves until `shutdown` resolves, then gives open connections a few
    /// seconds to finish. Returns what was served.
    pub async fn run_until<F>(self, shutdown: F) -> Counters
    where
        F: Future<Output = ()>,
    {
        let Server { listener, max_connections, http, service } = self;
        let service = StatisticsService::new(service);
        let mut jhs = FuturesUnordered::new();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        drop(shutdown_rx);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, max_connections, "stub server listening");
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Ok((stream, peer)) = listener.accept(), if jhs.len() < max_connections => {
                    tracing::trace!(%peer, "connection accepted");
                    jhs.push(tokio::spawn(Self::process_stream(stream, http.clone(), service.clone(), shutdown_tx.subscribe())));
                },
                _ = jhs.next(), if !jhs.is_empty() => {},
                _ = &mut shutdown => break,
            }
        }

        if shutdown_tx.send(()).is_ok() {
            let _ = time::timeout(Self::DEFAULT_SHUTDOWN_DELAY, future::join_all(jhs)).await;
        }

        let counters = service.counters();
        tracing::info!(
            ok = counters.ok,
            challenged = counters.challenged,
            rejected = counters.rejected,
            slowest = ?counters.slowest,
            "stub server stopped"
        );
        counters
    }
}
