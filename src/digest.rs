//! HTTP digest authentication (RFC 2617, MD5 with `qop=auth`).
//!
//! Both halves of the exchange live here: the stress client answers a
//! [`Challenge`] with an [`Authorization`], the stub server issues challenges
//! and checks the answers it gets back.

use std::collections::HashMap;
use std::fmt;

use md5::{Digest, Md5};
use rand::Rng;

const QOP_AUTH: &str = "auth";
const ALGORITHM_MD5: &str = "MD5";
const FIRST_NONCE_COUNT: &str = "00000001";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error("not a digest header")]
    NotDigest,
    #[error("missing `{0}` parameter")]
    Missing(&'static str),
    #[error("unsupported {0} `{1}`")]
    Unsupported(&'static str, String),
}

/// A `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl Challenge {
    /// Fresh challenge for `realm` with random nonce and opaque values.
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            nonce: random_hex(16),
            qop: Some(QOP_AUTH.to_owned()),
            opaque: Some(random_hex(16)),
            algorithm: Some(ALGORITHM_MD5.to_owned()),
        }
    }

    pub fn parse(header: &str) -> Result<Self, DigestError> {
        let mut params = digest_params(header)?;

        Ok(Self {
            realm: params.remove("realm").ok_or(DigestError::Missing("realm"))?,
            nonce: params.remove("nonce").ok_or(DigestError::Missing("nonce"))?,
            qop: params.remove("qop"),
            opaque: params.remove("opaque"),
            algorithm: params.remove("algorithm"),
        })
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest realm={},nonce={}", quote(&self.realm), quote(&self.nonce))?;
        if let Some(qop) = &self.qop {
            write!(f, ",qop={}", quote(qop))?;
        }
        if let Some(opaque) = &self.opaque {
            write!(f, ",opaque={}", quote(opaque))?;
        }
        if let Some(algorithm) = &self.algorithm {
            write!(f, ",algorithm={}", algorithm)?;
        }
        Ok(())
    }
}

/// An `Authorization: Digest ...` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub qop: Option<String>,
    pub nc: Option<String>,
    pub cnonce: Option<String>,
    pub response: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl Authorization {
    /// Answers `challenge` for a request of `method` on `uri`.
    pub fn answer(
        challenge: &Challenge,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
    ) -> Result<Self, DigestError> {
        Self::answer_with_cnonce(challenge, username, password, method, uri, random_hex(8))
    }

    pub fn answer_with_cnonce(
        challenge: &Challenge,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: String,
    ) -> Result<Self, DigestError> {
        if let Some(algorithm) = &challenge.algorithm {
            if !algorithm.eq_ignore_ascii_case(ALGORITHM_MD5) {
                return Err(DigestError::Unsupported("algorithm", algorithm.clone()));
            }
        }

        // A challenge may offer several protection levels; only `auth` is spoken here.
        let qop = match &challenge.qop {
            Some(offered) if offered.split(',').any(|q| q.trim() == QOP_AUTH) => Some(QOP_AUTH.to_owned()),
            Some(offered) => return Err(DigestError::Unsupported("qop", offered.clone())),
            None => None,
        };
        let (nc, cnonce) = match qop {
            Some(_) => (Some(FIRST_NONCE_COUNT.to_owned()), Some(cnonce)),
            None => (None, None),
        };

        let mut authorization = Self {
            username: username.to_owned(),
            realm: challenge.realm.clone(),
            nonce: challenge.nonce.clone(),
            uri: uri.to_owned(),
            qop,
            nc,
            cnonce,
            response: String::new(),
            opaque: challenge.opaque.clone(),
            algorithm: challenge.algorithm.clone(),
        };
        authorization.response = authorization.expected_response(password, method);

        Ok(authorization)
    }

    pub fn parse(header: &str) -> Result<Self, DigestError> {
        let mut params = digest_params(header)?;
        let mut take = |name: &'static str| params.remove(name).ok_or(DigestError::Missing(name));

        let username = take("username")?;
        let realm = take("realm")?;
        let nonce = take("nonce")?;
        let uri = take("uri")?;
        let response = take("response")?;

        let authorization = Self {
            username,
            realm,
            nonce,
            uri,
            response,
            qop: params.remove("qop"),
            nc: params.remove("nc"),
            cnonce: params.remove("cnonce"),
            opaque: params.remove("opaque"),
            algorithm: params.remove("algorithm"),
        };

        if authorization.qop.is_some() {
            if authorization.nc.is_none() {
                return Err(DigestError::Missing("nc"));
            }
            if authorization.cnonce.is_none() {
                return Err(DigestError::Missing("cnonce"));
            }
        }

        Ok(authorization)
    }

    /// The response hash a party knowing `password` would compute.
    pub fn expected_response(&self, password: &str, method: &str) -> String {
        let ha1 = md5_hex(&[&self.username, &self.realm, password]);
        let ha2 = md5_hex(&[method, &self.uri]);

        match (&self.qop, &self.nc, &self.cnonce) {
            (Some(qop), Some(nc), Some(cnonce)) => md5_hex(&[&ha1, &self.nonce, nc, cnonce, qop, &ha2]),
            _ => md5_hex(&[&ha1, &self.nonce, &ha2]),
        }
    }

    pub fn verify(&self, password: &str, method: &str) -> bool {
        self.response == self.expected_response(password, method)
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest username={},realm={},nonce={},uri={},response={}",
            quote(&self.username),
            quote(&self.realm),
            quote(&self.nonce),
            quote(&self.uri),
            quote(&self.response),
        )?;
        if let Some(algorithm) = &self.algorithm {
            write!(f, ",algorithm={}", algorithm)?;
        }
        if let Some(opaque) = &self.opaque {
            write!(f, ",opaque={}", quote(opaque))?;
        }
        if let (Some(qop), Some(nc), Some(cnonce)) = (&self.qop, &self.nc, &self.cnonce) {
            write!(f, ",qop={},nc={},cnonce={}", qop, nc, quote(cnonce))?;
        }
        Ok(())
    }
}

fn digest_params(header: &str) -> Result<HashMap<String, String>, DigestError> {
    let header = header.trim_start();
    let (scheme, rest) = header
        .split_once(char::is_whitespace)
        .ok_or(DigestError::NotDigest)?;

    if !scheme.eq_ignore_ascii_case("digest") {
        return Err(DigestError::NotDigest);
    }

    Ok(parse_params(rest))
}

/// Splits `key=value, key="quoted, value"` lists. Keys are lowercased.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| *c == ',' || c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ',') {
            key.push(c);
        }

        let mut value = String::new();
        if chars.next_if_eq(&'=').is_some() {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}

            if chars.next_if_eq(&'"').is_some() {
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => value.extend(chars.next()),
                        '"' => break,
                        c => value.push(c),
                    }
                }
            } else {
                while let Some(c) = chars.next_if(|c| *c != ',') {
                    value.push(c);
                }
                value.truncate(value.trim_end().len());
            }
        }

        let key = key.trim().to_ascii_lowercase();
        if !key.is_empty() {
            params.insert(key, value);
        }
    }

    params
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn md5_hex(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}
