//! SSRF guard shared by every network-facing fetcher.
//!
//! Generalized from `contextbuilder_crawler::engine`'s `is_ssrf_target`/
//! `is_private_ip` (previously gated behind a test-only `allow_localhost`
//! flag on the crawler) into a standalone, always-available check that every
//! fetcher consults before issuing a request.

use std::net::IpAddr;

use url::Url;

/// Returns true if `url` targets a private, loopback, link-local, or
/// otherwise non-public resource and should not be fetched.
pub fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost"
            || host == "127.0.0.1"
            || host == "[::1]"
            || host.ends_with(".local")
            || host.ends_with(".internal")
        {
            return true;
        }
    }

    false
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_file_scheme() {
        assert!(is_ssrf_target(&Url::parse("file:///etc/passwd").unwrap()));
    }

    #[test]
    fn blocks_private_ips() {
        assert!(is_ssrf_target(&Url::parse("http://192.168.1.1/admin").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://10.0.0.1/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://127.0.0.1:8080/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://100.64.0.1/").unwrap()));
    }

    #[test]
    fn blocks_localhost_names() {
        assert!(is_ssrf_target(&Url::parse("http://localhost:3000/api").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://svc.internal/x").unwrap()));
    }

    #[test]
    fn allows_public_hosts() {
        assert!(!is_ssrf_target(&Url::parse("https://docs.example.com/page").unwrap()));
    }
}
