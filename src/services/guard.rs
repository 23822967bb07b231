//! Target-safety guard for submitted video references.
//!
//! Runs before a job reaches the queue: only http(s) schemes are accepted,
//! the hostname is resolved, and loopback/private/link-local addresses are
//! rejected. When resolution itself fails the reference is still allowed for
//! the one named video platform, since its endpoints legitimately vary by
//! region and a local resolver failure must not reject them.

use std::net::IpAddr;

use tokio::net::lookup_host;
use tracing::warn;
use url::Url;

/// Hosts allowed through when DNS resolution fails.
fn is_allowed_on_resolution_failure(host: &str) -> bool {
    host == "youtu.be" || host == "youtube.com" || host.ends_with(".youtube.com")
}

/// Address ranges a submitted reference must never point into.
pub fn ip_is_blocked(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique-local
                || (segments[0] & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Returns `true` when the reference must be rejected.
pub async fn is_dangerous_url(input: &str) -> bool {
    let Ok(parsed) = Url::parse(input.trim()) else {
        return true;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return true;
    }
    let Some(host) = parsed.host_str() else {
        return true;
    };
    let host = host.to_lowercase();

    if matches!(host.as_str(), "localhost" | "127.0.0.1" | "::1" | "0.0.0.0") {
        return true;
    }

    // Literal IP in the URL: no resolution needed.
    if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return ip_is_blocked(ip);
    }

    let dangerous = match lookup_host((host.as_str(), 443)).await {
        Ok(addrs) => {
            let mut any = false;
            for addr in addrs {
                any = true;
                if ip_is_blocked(addr.ip()) {
                    warn!(host, ip = %addr.ip(), "blocked reference resolving to restricted range");
                    return true;
                }
            }
            !any
        }
        Err(e) => {
            if is_allowed_on_resolution_failure(&host) {
                false
            } else {
                warn!(host, error = %e, "blocked reference with failed resolution");
                true
            }
        }
    };
    dangerous
}
