//! HTTP digest authentication (RFC 2617, MD5 with `qop=auth`)
//!
//! The Atlas Admin API answers unauthenticated requests with a `401` and a
//! `WWW-Authenticate: Digest ...` challenge. The client answers the
//! challenge and retries once.

use crate::error::AtlasError;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// API key pair used as digest user and password
#[derive(Clone)]
pub struct DigestCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DigestCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parsed `WWW-Authenticate: Digest` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    pub qop: Option<String>,
}

impl DigestChallenge {
    /// Parse the value of a `WWW-Authenticate` header
    pub fn parse(header: &str) -> Result<Self, AtlasError> {
        // Scheme names are case-insensitive (RFC 7235)
        let (scheme, params) = header
            .trim()
            .split_once(char::is_whitespace)
            .unwrap_or((header.trim(), ""));
        if !scheme.eq_ignore_ascii_case("Digest") {
            return Err(AtlasError::Auth(format!("unsupported challenge: {header}")));
        }

        let mut fields = parse_params(params);
        let nonce = fields
            .remove("nonce")
            .ok_or_else(|| AtlasError::Auth("challenge without nonce".to_string()))?;

        if let Some(algorithm) = fields.get("algorithm") {
            if !algorithm.eq_ignore_ascii_case("MD5") {
                return Err(AtlasError::Auth(format!("unsupported algorithm {algorithm}")));
            }
        }

        Ok(Self {
            realm: fields.remove("realm").unwrap_or_default(),
            nonce,
            opaque: fields.remove("opaque"),
            algorithm: fields.remove("algorithm"),
            qop: fields.remove("qop"),
        })
    }

    /// True if the server offers `qop=auth`
    fn supports_auth_qop(&self) -> bool {
        self.qop
            .as_deref()
            .map(|q| q.split(',').any(|v| v.trim() == "auth"))
            .unwrap_or(false)
    }

    /// Build the `Authorization` header value for one request
    pub fn respond(&self, credentials: &DigestCredentials, method: &str, uri: &str) -> String {
        self.respond_with_cnonce(credentials, method, uri, &new_cnonce(), 1)
    }

    fn respond_with_cnonce(
        &self,
        credentials: &DigestCredentials,
        method: &str,
        uri: &str,
        cnonce: &str,
        nonce_count: u32,
    ) -> String {
        let ha1 = md5_hex(&format!(
            "{}:{}:{}",
            credentials.username, self.realm, credentials.password
        ));
        let ha2 = md5_hex(&format!("{method}:{uri}"));

        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}""#,
            credentials.username, self.realm, self.nonce, uri
        );

        if self.supports_auth_qop() {
            let nc = format!("{nonce_count:08x}");
            let response = md5_hex(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce));
            header.push_str(&format!(
                r#", qop=auth, nc={nc}, cnonce="{cnonce}", response="{response}""#
            ));
        } else {
            let response = md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce));
            header.push_str(&format!(r#", response="{response}""#));
        }

        if let Some(algorithm) = &self.algorithm {
            header.push_str(&format!(", algorithm={algorithm}"));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{opaque}""#));
        }

        header
    }
}

/// Split `key=value, key="quoted, value"` pairs
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            break;
        }

        let value = if chars.peek() == Some(&'"') {
            chars.next();
            let mut value = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    c => value.push(c),
                }
            }
            value
        } else {
            chars
                .by_ref()
                .take_while(|c| *c != ',')
                .collect::<String>()
                .trim()
                .to_string()
        };

        fields.insert(key, value);
    }

    fields
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

fn new_cnonce() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    md5_hex(&format!("{nanos}:{count}"))[..16].to_string()
}
