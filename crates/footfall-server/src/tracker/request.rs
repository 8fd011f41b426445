//! What the tracker reads from an inbound page-view request.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Request, Uri};
use url::Url;

/// Client address headers, most trusted first.
const CLIENT_IP_HEADERS: [&str; 4] = [
    "cf-connecting-ip",
    "true-client-ip",
    "x-forwarded-for",
    "x-real-ip",
];

/// Query parameters that may carry a referrer when the header is missing.
const REFERRER_PARAMS: [&str; 4] = ["ref", "referer", "referrer", "source"];

/// Socket address of the connection, when the server was started with
/// `into_make_service_with_connect_info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaybeConnectInfo(pub Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeConnectInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

/// Headers, URI and peer address of one request.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub headers: HeaderMap,
    pub uri: Uri,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestInfo {
    pub fn new(headers: HeaderMap, uri: Uri, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            headers,
            uri,
            remote_addr,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn user_agent(&self) -> &str {
        self.header(header::USER_AGENT.as_str()).unwrap_or("")
    }

    /// Client address from proxy headers, falling back to the socket address.
    pub fn client_ip(&self) -> Option<IpAddr> {
        for name in CLIENT_IP_HEADERS {
            let Some(value) = self.header(name) else {
                continue;
            };
            // X-Forwarded-For lists the client first.
            let first = value.split(',').next().unwrap_or(value).trim();
            if let Ok(ip) = first.parse::<IpAddr>() {
                return Some(ip);
            }
            if let Ok(addr) = first.parse::<SocketAddr>() {
                return Some(addr.ip());
            }
        }
        self.remote_addr.map(|addr| addr.ip())
    }

    /// Primary subtag of the first `Accept-Language` entry, lower-cased.
    pub fn language(&self) -> String {
        self.header(header::ACCEPT_LANGUAGE.as_str())
            .and_then(|value| value.split(',').next())
            .and_then(|tag| tag.split(';').next())
            .and_then(|tag| tag.trim().split(['-', '_']).next())
            .filter(|lang| *lang != "*")
            .map(str::to_lowercase)
            .unwrap_or_default()
    }

    pub fn referer_header(&self) -> Option<&str> {
        self.header(header::REFERER.as_str())
    }

    /// Referrer passed as a query parameter of the request URI.
    pub fn referrer_param(&self) -> Option<String> {
        let query = self.uri.query()?;
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        REFERRER_PARAMS.iter().find_map(|name| {
            pairs
                .iter()
                .find(|(key, value)| key == name && !value.trim().is_empty())
                .map(|(_, value)| value.trim().to_string())
        })
    }
}

impl<B> From<&Request<B>> for RequestInfo {
    fn from(request: &Request<B>) -> Self {
        Self {
            headers: request.headers().clone(),
            uri: request.uri().clone(),
            remote_addr: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        }
    }
}

impl From<&Parts> for RequestInfo {
    fn from(parts: &Parts) -> Self {
        Self {
            headers: parts.headers.clone(),
            uri: parts.uri.clone(),
            remote_addr: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        }
    }
}

/// Parse a page URL, resolving a relative one against a placeholder origin.
pub fn page_url(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Url::parse(raw)
        .or_else(|_| Url::parse("http://localhost/").and_then(|base| base.join(raw)))
        .ok()
}

/// The five UTM parameters of a page URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Utm {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub content: Option<String>,
    pub term: Option<String>,
}

impl Utm {
    pub fn from_url(url: &Url) -> Self {
        let mut utm = Self::default();
        for (key, value) in url.query_pairs() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "utm_source" => &mut utm.source,
                "utm_medium" => &mut utm.medium,
                "utm_campaign" => &mut utm.campaign,
                "utm_content" => &mut utm.content,
                "utm_term" => &mut utm.term,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        utm
    }
}

/// Operating system, browser and platform parsed from a user agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgent {
    pub os: String,
    pub os_version: String,
    pub browser: String,
    pub browser_version: String,
    pub desktop: bool,
    pub mobile: bool,
}

/// Parse a user agent with `woothee`. Unknown fields stay empty.
pub fn parse_user_agent(user_agent: &str) -> UserAgent {
    if user_agent.is_empty() {
        return UserAgent::default();
    }
    let Some(result) = woothee::parser::Parser::new().parse(user_agent) else {
        return UserAgent::default();
    };

    let known = |value: &str| {
        if value == "UNKNOWN" {
            String::new()
        } else {
            value.to_string()
        }
    };

    UserAgent {
        os: known(result.os),
        os_version: known(&*result.os_version),
        browser: known(result.name),
        browser_version: known(result.version),
        desktop: result.category == "pc",
        mobile: matches!(result.category, "smartphone" | "mobilephone" | "tablet"),
    }
}
