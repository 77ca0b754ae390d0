use std::net::IpAddr;
use thiserror::Error;
use url::{Host, Url};

/// Reasons a feed URL is refused before any request is made.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    /// Loopback, RFC 1918, link-local, unique-local or unspecified address.
    #[error("Private address not allowed: {0}")]
    PrivateHost(String),
}

/// Which hosts a feed URL may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostPolicy {
    /// Refuse localhost and private address ranges.
    #[default]
    PublicOnly,
    /// Accept any host. Used for self-hosted feeds and tests against local mocks.
    AllowPrivate,
}

/// Parses `raw` and checks it is fetchable as a feed under `policy`.
///
/// Only `http` and `https` are accepted. Hostnames are not resolved, so a
/// public name pointing at a private address still passes.
pub fn validate_feed_url(raw: &str, policy: HostPolicy) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host().ok_or(UrlValidationError::MissingHost)?;

    if policy == HostPolicy::AllowPrivate {
        return Ok(url);
    }

    let private = match &host {
        Host::Domain(domain) => domain.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(ip) => is_private_ip(&IpAddr::V4(*ip)),
        Host::Ipv6(ip) => is_private_ip(&IpAddr::V6(*ip)),
    };

    if private {
        return Err(UrlValidationError::PrivateHost(host.to_string()));
    }

    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            let first = v6.segments()[0];
            // fc00::/7 and fe80::/10
            (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}
