use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::service::Service;
use hyper::{Response, StatusCode};

use parking_lot::Mutex;

/// Responses served, by how the request fared.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub ok: u64,
    pub challenged: u64,
    pub rejected: u64,
    pub slowest: Duration,
}

impl Counters {
    fn record(&mut self, status: StatusCode, duration: Duration) {
        if status.is_success() {
            self.ok += 1;
        } else if status == StatusCode::UNAUTHORIZED {
            self.challenged += 1;
        } else {
            self.rejected += 1;
        }
        self.slowest = self.slowest.max(duration);
    }

    pub fn total(&self) -> u64 {
        self.ok + self.challenged + self.rejected
    }
}

/// Counts responses of the wrapped service. Clones share one set of counters.
#[derive(Clone)]
pub struct StatisticsService<T> {
    inner: T,
    counters: Arc<Mutex<Counters>>,
}

impl<T> StatisticsService<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            counters: Arc::new(Mutex::new(Counters::default())),
        }
    }

    pub fn counters(&self) -> Counters {
        *self.counters.lock()
    }
}

impl<T, Request, B> Service<Request> for StatisticsService<T>
where
    T: Service<Request, Response = Response<B>>,
    T::Future: Send + 'static,
{
    type Response = T::Response;
    type Error = T::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let ifuture = self.inner.call(req);
        let counters = Arc::clone(&self.counters);

        let f = async move {
            let started = tokio::time::Instant::now();
            let result = ifuture.await;

            if let Ok(response) = &result {
                counters.lock().record(response.status(), started.elapsed());
            }

            result
        };

        Box::pin(f)
    }
}
