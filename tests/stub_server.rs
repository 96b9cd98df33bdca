use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use memento_stress::client::{FetchError, Fetcher, NativeFetcher, Runner, Target, STATS_INTERVAL};
use memento_stress::server::{CallListService, Counters, Server};
use memento_stress::DEFAULT_PASSWORD;

const DOMAIN: &str = "test.net";

struct Stub {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Counters>,
}

impl Stub {
    async fn start() -> Self {
        let builder = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = builder.local_addr().unwrap();
        let server = builder.max_connections(4).service(CallListService::new(DOMAIN, DEFAULT_PASSWORD));

        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));

        Self { addr, stop, handle }
    }

    async fn stop(self) -> Counters {
        let _ = self.stop.send(());
        self.handle.await.unwrap()
    }

    fn target(&self, domain: &str, password: &str) -> Target {
        Target {
            scheme: "http".to_owned(),
            host: self.addr.to_string(),
            domain: domain.to_owned(),
            password: password.to_owned(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[tokio::test]
async fn native_fetcher_passes_digest_challenge() {
    let stub = Stub::start().await;
    let fetcher = NativeFetcher::new(stub.target(DOMAIN, DEFAULT_PASSWORD)).unwrap();

    fetcher.fetch(1000).await.unwrap();
    fetcher.fetch(1001).await.unwrap();

    let counters = stub.stop().await;
    assert_eq!(counters.ok, 2);
    assert_eq!(counters.challenged, 2);
    assert_eq!(counters.rejected, 0);
}

#[tokio::test]
async fn wrong_password_is_forbidden() {
    let stub = Stub::start().await;
    let fetcher = NativeFetcher::new(stub.target(DOMAIN, "guess")).unwrap();

    let err = fetcher.fetch(1000).await.unwrap_err();
    assert!(matches!(err, FetchError::Status(403)), "{:?}", err);

    let counters = stub.stop().await;
    assert_eq!((counters.challenged, counters.rejected), (1, 1));
}

#[tokio::test]
async fn unknown_domain_is_not_found() {
    let stub = Stub::start().await;
    let fetcher = NativeFetcher::new(stub.target("other.net", DEFAULT_PASSWORD)).unwrap();

    let err = fetcher.fetch(1000).await.unwrap_err();
    assert!(matches!(err, FetchError::Status(404)), "{:?}", err);

    stub.stop().await;
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    // Grab a free port, then close it again.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let target = Target {
        scheme: "http".to_owned(),
        host: addr.to_string(),
        domain: DOMAIN.to_owned(),
        password: DEFAULT_PASSWORD.to_owned(),
        timeout: Duration::from_secs(5),
    };

    let err = NativeFetcher::new(target).unwrap().fetch(1000).await.unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)), "{:?}", err);
}

#[tokio::test]
async fn stress_loop_against_stub() {
    let stub = Stub::start().await;
    let fetcher = NativeFetcher::new(stub.target(DOMAIN, DEFAULT_PASSWORD)).unwrap();

    let mut runner = Runner::new(fetcher, Vec::new(), Some(200.0), STATS_INTERVAL);
    let issued = runner.run(memento_stress::client::cycle(1000, 1004).take(10)).await.unwrap();
    assert_eq!(issued, 10);
    assert!(runner.output().is_empty());

    let counters = stub.stop().await;
    assert_eq!(counters.ok, 10);
}
