//! Registry token auth.
//!
//! Registries answer an anonymous request with `401` and a
//! `WWW-Authenticate` challenge. For `Bearer` challenges a token is fetched
//! from the realm (with basic credentials when configured) and replayed;
//! `Basic` challenges take the credentials directly.

use std::collections::BTreeMap;

use reqwest::Client;
use serde::Deserialize;

use crate::error::{RegistryError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

impl Challenge {
    /// Parse a `WWW-Authenticate` header value.
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, rest) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Self::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let params = parse_params(rest);
        Some(Self::Bearer {
            realm: params.get("realm")?.clone(),
            service: params.get("service").cloned(),
            scope: params.get("scope").cloned(),
        })
    }
}

/// `key="value",key2="a,b"` pairs. Quoted values may contain commas.
fn parse_params(s: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut chars = s.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }
        let value = if chars.peek() == Some(&'"') {
            chars.next();
            chars.by_ref().take_while(|c| *c != '"').collect::<String>()
        } else {
            chars.by_ref().take_while(|c| *c != ',').collect::<String>()
        };
        out.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    out
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Exchange a bearer challenge for a token.
pub async fn fetch_token(
    http: &Client,
    realm: &str,
    service: Option<&str>,
    scope: Option<&str>,
    credentials: Option<&(String, String)>,
) -> Result<String> {
    let mut query = Vec::new();
    if let Some(service) = service {
        query.push(("service", service));
    }
    if let Some(scope) = scope {
        query.push(("scope", scope));
    }

    let mut req = http.get(realm).query(&query);
    if let Some((user, pass)) = credentials {
        req = req.basic_auth(user, Some(pass));
    }

    tracing::debug!(realm, ?service, ?scope, "fetching registry token");
    let resp = req.send().await.map_err(RegistryError::Http)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(RegistryError::Unauthorized(format!("token endpoint {realm} returned {status}")).into());
    }

    let body: TokenResponse = resp.json().await.map_err(RegistryError::Http)?;
    body.token
        .or(body.access_token)
        .ok_or_else(|| RegistryError::Unauthorized(format!("no token in response from {realm}")).into())
}
