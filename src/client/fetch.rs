use std::ffi::OsString;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;

use hyper::client::connect::HttpConnector;
use hyper::client::Client;
use hyper::header::{ACCEPT_ENCODING, AUTHORIZATION, WWW_AUTHENTICATE};
use hyper::{Body, Method, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;

use tokio::process::Command;
use tokio::time;

use crate::digest::{Authorization, Challenge, DigestError};

/// Where and as whom call lists are fetched.
#[derive(Debug, Clone)]
pub struct Target {
    pub scheme: String,
    pub host: String,
    pub domain: String,
    pub password: String,
    pub timeout: Duration,
}

impl Target {
    pub fn url(&self, dn: u64) -> String {
        format!("{}://{}{}", self.scheme, self.host, crate::call_list_path(dn, &self.domain))
    }

    pub fn username(&self, dn: u64) -> String {
        crate::username(dn, &self.domain)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("curl failed with rc={0}")]
    Exit(i32),
    #[error("curl was terminated by a signal")]
    Killed,
    #[error("failed to run curl: {0}")]
    Spawn(#[source] io::Error),
    #[error("request failed with status {0}")]
    Status(u16),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Transport(#[from] hyper::Error),
    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("invalid url: {0}")]
    Uri(#[from] hyper::http::uri::InvalidUri),
    #[error("digest authentication failed: {0}")]
    Digest(#[from] DigestError),
}

impl FetchError {
    /// Errors that say nothing about the target but mean no request can be
    /// issued at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Spawn(_))
    }
}

/// Retrieves one subscriber's call list, reporting only success or failure.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, dn: u64) -> BoxFuture<'_, Result<(), FetchError>>;
}

impl<F: Fetcher + ?Sized> Fetcher for Box<F> {
    fn fetch(&self, dn: u64) -> BoxFuture<'_, Result<(), FetchError>> {
        (**self).fetch(dn)
    }
}

/// Delegates each request to a `curl` child process.
pub struct CurlFetcher {
    target: Target,
    program: OsString,
}

impl CurlFetcher {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            program: "curl".into(),
        }
    }

    /// Runs `program` instead of `curl`. It gets the same arguments.
    pub fn program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    pub fn args(&self, dn: u64) -> Vec<String> {
        vec![
            self.target.url(dn),
            "--digest".to_owned(),
            "--user".to_owned(),
            format!("{}:{}", self.target.username(dn), self.target.password),
            // Test deployments use self-signed certificates.
            "--insecure".to_owned(),
            "--compressed".to_owned(),
            // Non-2xx responses and connection failures set the exit code.
            "-f".to_owned(),
            "-s".to_owned(),
            "-o".to_owned(),
            "/dev/null".to_owned(),
            "--max-time".to_owned(),
            format!("{}", self.target.timeout.as_secs_f64()),
        ]
    }

    async fn run(&self, dn: u64) -> Result<(), FetchError> {
        let mut command = Command::new(&self.program);
        command.args(self.args(dn)).stdin(Stdio::null()).kill_on_drop(true);

        // Keep curl out of our process group: a terminal ctrl-c must only
        // reach this process, which then drops (and kills) the child.
        #[cfg(unix)]
        command.process_group(0);

        let status = command.status().await.map_err(FetchError::Spawn)?;

        match status.code() {
            Some(0) => Ok(()),
            Some(rc) => Err(FetchError::Exit(rc)),
            None => Err(FetchError::Killed),
        }
    }
}

impl Fetcher for CurlFetcher {
    fn fetch(&self, dn: u64) -> BoxFuture<'_, Result<(), FetchError>> {
        Box::pin(self.run(dn))
    }
}

/// In-process client speaking digest auth itself.
pub struct NativeFetcher {
    target: Target,
    client: Client<HttpsConnector<HttpConnector>>,
}

impl NativeFetcher {
    pub fn new(target: Target) -> Result<Self, native_tls::Error> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let https = HttpsConnector::from((http, tokio_native_tls::TlsConnector::from(tls)));

        Ok(Self {
            target,
            client: Client::builder().build(https),
        })
    }

    async fn get(&self, uri: &Uri, authorization: Option<&Authorization>) -> Result<Response<Body>, FetchError> {
        let mut request = Request::get(uri.clone()).header(ACCEPT_ENCODING, "gzip, deflate");
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization.to_string());
        }

        Ok(self.client.request(request.body(Body::empty())?).await?)
    }

    async fn run(&self, dn: u64) -> Result<(), FetchError> {
        let uri: Uri = self.target.url(dn).parse()?;
        let mut response = self.get(&uri, None).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok())
                .map(Challenge::parse)
                .transpose()?;

            if let Some(challenge) = challenge {
                // Drain the challenge so the connection can carry the answer.
                hyper::body::to_bytes(response.into_body()).await?;

                let path = uri.path_and_query().map_or("/", |p| p.as_str());
                let authorization = Authorization::answer(
                    &challenge,
                    &self.target.username(dn),
                    &self.target.password,
                    Method::GET.as_str(),
                    path,
                )?;

                response = self.get(&uri, Some(&authorization)).await?;
            }
        }

        let status = response.status();
        hyper::body::to_bytes(response.into_body()).await?;

        if status.is_success() {
            Ok(())
        } else {
            Err(FetchError::Status(status.as_u16()))
        }
    }
}

impl Fetcher for NativeFetcher {
    fn fetch(&self, dn: u64) -> BoxFuture<'_, Result<(), FetchError>> {
        let timeout = self.target.timeout;
        Box::pin(async move {
            time::timeout(timeout, self.run(dn))
                .await
                .map_err(|_| FetchError::Timeout(timeout))?
        })
    }
}
