use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{self, Ready};

use hyper::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::service::Service;
use hyper::{Body, Method, Request, Response, StatusCode};

use parking_lot::Mutex;

use crate::digest::{Authorization, Challenge};

const CALL_LIST_PREFIX: &str = "/org.projectclearwater.call-list/users/";
const CALL_LIST_SUFFIX: &str = "/call-list.xml";
const CALL_LIST_CONTENT_TYPE: &str = "application/vnd.projectclearwater.call-list+xml";
const EMPTY_CALL_LIST: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<call-list><calls></calls></call-list>\n";

/// Serves empty call lists to subscribers of one home domain, guarded by
/// digest authentication with a shared password.
#[derive(Clone)]
pub struct CallListService {
    inner: Arc<Inner>,
}

struct Inner {
    domain: String,
    password: String,
    // Every nonce handed out so far. Nonces never expire.
    nonces: Mutex<HashSet<String>>,
}

impl CallListService {
    pub fn new(domain: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                domain: domain.into(),
                password: password.into(),
                nonces: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn handle<B>(&self, req: &Request<B>) -> Response<Body> {
        let path = req.uri().path();
        let Some(dn) = self.dn_for(path) else {
            tracing::debug!(path, "no such call list");
            return status(StatusCode::NOT_FOUND);
        };

        if req.method() != Method::GET {
            return status(StatusCode::METHOD_NOT_ALLOWED);
        }

        let Some(header) = req.headers().get(AUTHORIZATION) else {
            return self.challenge();
        };

        let authorization = match header.to_str().ok().map(Authorization::parse) {
            Some(Ok(authorization)) => authorization,
            Some(Err(e)) => {
                tracing::debug!(dn, error = %e, "malformed authorization");
                return status(StatusCode::BAD_REQUEST);
            }
            None => return status(StatusCode::BAD_REQUEST),
        };

        if !self.inner.nonces.lock().contains(&authorization.nonce) {
            tracing::debug!(dn, nonce = %authorization.nonce, "unknown nonce");
            return self.challenge();
        }

        let request_uri = req.uri().path_and_query().map_or(path, |p| p.as_str());
        if authorization.realm != self.inner.domain
            || authorization.qop.as_deref() != Some("auth")
            || authorization.username != crate::username(dn, &self.inner.domain)
            || authorization.uri != request_uri
        {
            tracing::debug!(dn, username = %authorization.username, "authorization does not match request");
            return status(StatusCode::BAD_REQUEST);
        }

        if !authorization.verify(&self.inner.password, req.method().as_str()) {
            tracing::debug!(dn, "wrong digest response");
            return status(StatusCode::FORBIDDEN);
        }

        tracing::trace!(dn, "serving call list");
        Response::builder()
            .header(CONTENT_TYPE, CALL_LIST_CONTENT_TYPE)
            .body(Body::from(EMPTY_CALL_LIST))
            .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR))
    }

    /// DN named by a call list path within this service's home domain.
    fn dn_for(&self, path: &str) -> Option<u64> {
        let impu = path.strip_prefix(CALL_LIST_PREFIX)?.strip_suffix(CALL_LIST_SUFFIX)?;
        let (dn, domain) = impu.strip_prefix("sip%3A")?.split_once("%40")?;

        if domain != self.inner.domain {
            return None;
        }
        dn.parse().ok()
    }

    fn challenge(&self) -> Response<Body> {
        let challenge = Challenge::new(self.inner.domain.as_str());
        self.inner.nonces.lock().insert(challenge.nonce.clone());

        let mut response = status(StatusCode::UNAUTHORIZED);
        if let Ok(value) = challenge.to_string().parse() {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        response
    }
}

impl<B> Service<Request<B>> for CallListService {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        future::ready(Ok(self.handle(&req)))
    }
}

fn status(code: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "test.net";
    const PASSWORD: &str = "secret";

    fn service() -> CallListService {
        CallListService::new(DOMAIN, PASSWORD)
    }

    fn get(dn: u64, authorization: Option<&Authorization>) -> Request<()> {
        let mut req = Request::get(crate::call_list_path(dn, DOMAIN));
        if let Some(authorization) = authorization {
            req = req.header(AUTHORIZATION, authorization.to_string());
        }
        req.body(()).unwrap()
    }

    fn challenge_of(response: &Response<Body>) -> Challenge {
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let header = response.headers()[WWW_AUTHENTICATE].to_str().unwrap();
        Challenge::parse(header).unwrap()
    }

    fn answer(service: &CallListService, dn: u64, password: &str) -> Authorization {
        let challenge = challenge_of(&service.handle(&get(dn, None)));
        Authorization::answer(
            &challenge,
            &crate::username(dn, DOMAIN),
            password,
            "GET",
            &crate::call_list_path(dn, DOMAIN),
        )
        .unwrap()
    }

    #[test]
    fn challenges_unauthenticated_requests() {
        let challenge = challenge_of(&service().handle(&get(1000, None)));
        assert_eq!(challenge.realm, DOMAIN);
        assert_eq!(challenge.qop.as_deref(), Some("auth"));
        assert!(challenge.opaque.is_some());
    }

    #[test]
    fn serves_call_list_to_valid_digest() {
        let service = service();
        let authorization = answer(&service, 1000, PASSWORD);

        let response = service.handle(&get(1000, Some(&authorization)));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], CALL_LIST_CONTENT_TYPE);
    }

    #[test]
    fn forbids_wrong_password() {
        let service = service();
        let authorization = answer(&service, 1000, "guess");

        assert_eq!(service.handle(&get(1000, Some(&authorization))).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn rejects_digest_for_another_subscriber() {
        let service = service();
        let authorization = answer(&service, 1000, PASSWORD);

        assert_eq!(service.handle(&get(1001, Some(&authorization))).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rechallenges_unknown_nonce() {
        let service = service();
        let authorization = answer(&CallListService::new(DOMAIN, PASSWORD), 1000, PASSWORD);

        challenge_of(&service.handle(&get(1000, Some(&authorization))));
    }

    #[test]
    fn rejects_garbage_authorization() {
        let req = Request::get(crate::call_list_path(1000, DOMAIN))
            .header(AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(())
            .unwrap();

        assert_eq!(service().handle(&req).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_paths_and_methods() {
        let service = service();

        let other_domain = Request::get(crate::call_list_path(1000, "other.net")).body(()).unwrap();
        assert_eq!(service.handle(&other_domain).status(), StatusCode::NOT_FOUND);

        let elsewhere = Request::get("/").body(()).unwrap();
        assert_eq!(service.handle(&elsewhere).status(), StatusCode::NOT_FOUND);

        let delete = Request::delete(crate::call_list_path(1000, DOMAIN)).body(()).unwrap();
        assert_eq!(service.handle(&delete).status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
