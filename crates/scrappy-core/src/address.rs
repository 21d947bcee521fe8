//! Observations and IP address extraction
//!
//! An [`Observation`] is the transient value built from one inbound request.
//! The effective address is the explicit `ip_address` parameter when present,
//! otherwise the request's source address. Both are normalized so that the
//! store compares canonical forms only.

use std::net::IpAddr;

use crate::error::{Error, Result};

/// One claimed public address for a token, as received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// The token from the request path
    pub token: String,
    /// Explicit address parameter, unparsed
    pub claimed_ip: Option<String>,
    /// Address the request came from (after proxy resolution)
    pub source_ip: IpAddr,
    /// Why the query string could not be read, if it could not
    pub query_error: Option<String>,
}

impl Observation {
    /// Create a new observation
    pub fn new(token: impl Into<String>, claimed_ip: Option<String>, source_ip: IpAddr) -> Self {
        Self {
            token: token.into(),
            claimed_ip,
            source_ip,
            query_error: None,
        }
    }

    /// Mark the query string as unreadable
    ///
    /// The token is still checked first; only a known token turns this into
    /// a `BadRequest`.
    pub fn with_query_error(mut self, reason: impl Into<String>) -> Self {
        self.query_error = Some(reason.into());
        self
    }

    /// Resolve the address this observation reports
    ///
    /// A malformed explicit parameter is a `BadRequest` even when the source
    /// address is usable; it never silently falls back.
    pub fn effective_ip(&self) -> Result<IpAddr> {
        if let Some(reason) = &self.query_error {
            return Err(Error::bad_request(format!("Malformed query: {}", reason)));
        }
        match &self.claimed_ip {
            Some(claimed) => parse_claimed(claimed),
            None => Ok(normalize(self.source_ip)),
        }
    }
}

/// Parse an explicit `ip_address` parameter
///
/// Accepts IPv4 and IPv6 literals exactly as `std::net::IpAddr` does. No
/// trimming, no brackets, no zone identifiers.
pub fn parse_claimed(raw: &str) -> Result<IpAddr> {
    raw.parse::<IpAddr>()
        .map(normalize)
        .map_err(|_| Error::bad_request(format!("Malformed ip_address parameter: {:?}", raw)))
}

/// Canonical form used for comparison and persistence
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) collapse to plain IPv4 so a
/// dual-stack listener reports the same value as an IPv4 one.
pub fn normalize(ip: IpAddr) -> IpAddr {
    ip.to_canonical()
}

/// Determine the client's address behind `proxy_count` reverse proxies
///
/// With `proxy_count == 0` the peer address is used. Otherwise the entry
/// `proxy_count` positions from the right of `X-Forwarded-For` is taken.
/// A missing, short or unparsable header is a deployment mistake: it is
/// logged and the peer address is used instead.
pub fn client_ip(peer: IpAddr, forwarded_for: Option<&str>, proxy_count: usize) -> IpAddr {
    if proxy_count == 0 {
        return normalize(peer);
    }

    let hops: Vec<&str> = forwarded_for
        .unwrap_or_default()
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|hop| !hop.is_empty())
        .rev()
        .collect();

    if hops.is_empty() {
        tracing::warn!(
            "X-Forwarded-For header contains no data but the expected number of proxies is {}. \
            This is a misconfiguration.",
            proxy_count
        );
        return normalize(peer);
    }

    if hops.len() < proxy_count {
        tracing::warn!(
            "X-Forwarded-For header has {} node(s) but the expected number of proxies is {}. \
            This is a misconfiguration.",
            hops.len(),
            proxy_count
        );
        return normalize(peer);
    }

    let hop = hops[proxy_count - 1];
    match hop.parse::<IpAddr>() {
        Ok(ip) => normalize(ip),
        Err(_) => {
            tracing::warn!(
                "X-Forwarded-For entry {:?} is not an IP address. Using peer address.",
                hop
            );
            normalize(peer)
        }
    }
}
