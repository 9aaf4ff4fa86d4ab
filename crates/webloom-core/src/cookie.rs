//! Domain-scoped cookie model.
//!
//! Cookies are grouped under a *primary domain*: the last two DNS labels of
//! the host (`a.b.example.com` -> `example.com`), or the host itself for
//! `localhost` and IP literals. Hosts are IDNA-normalized, so a Unicode
//! domain and its punycode form share one entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::{Host, Url};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieData {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default, rename = "httpOnly")]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, rename = "sameSite")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

/// All cookies saved for one primary domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainCookies {
    pub domain: String,
    pub cookies: Vec<CookieData>,
    #[serde(rename = "savedAt")]
    pub saved_at: DateTime<Utc>,
    pub url: String,
}

/// Listing entry for stored domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSummary {
    pub domain: String,
    pub cookie_count: usize,
    pub last_updated: DateTime<Utc>,
}

/// Reduce a hostname to its primary domain.
pub fn primary_domain(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('.');
    match Host::parse(trimmed) {
        Ok(host) => primary_of(host),
        Err(_) => trimmed.to_ascii_lowercase(),
    }
}

/// Extract the primary domain from a URL or bare host. Falls back to the
/// input when no host can be found.
pub fn domain_from_url(url: &str) -> String {
    let url = url.trim().trim_start_matches('.');
    let parsed = if url.contains("://") {
        Url::parse(url)
    } else {
        Url::parse(&format!("http://{}", url))
    };
    match parsed.ok().and_then(|u| u.host().map(|h| h.to_owned())) {
        Some(host) => primary_of(host),
        None => url.to_string(),
    }
}

/// Whether a cookie's own `domain` attribute belongs to `primary`.
pub fn cookie_matches_domain(cookie_domain: &str, primary: &str) -> bool {
    let d = cookie_domain.trim_start_matches('.');
    let d = match Host::parse(d) {
        Ok(host) => host.to_string(),
        Err(_) => d.to_ascii_lowercase(),
    };
    d == primary || d.ends_with(&format!(".{}", primary))
}

fn primary_of(host: Host<String>) -> String {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.');
            let labels: Vec<&str> = domain.split('.').collect();
            if domain == "localhost" || labels.len() < 2 {
                return domain.to_string();
            }
            labels[labels.len() - 2..].join(".")
        }
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_domain_keeps_last_two_labels() {
        assert_eq!(primary_domain("www.example.com"), "example.com");
        assert_eq!(primary_domain("a.b.c.example.org"), "example.org");
        assert_eq!(primary_domain("example.com"), "example.com");
    }

    #[test]
    fn primary_domain_literal_hosts() {
        assert_eq!(primary_domain("localhost"), "localhost");
        assert_eq!(primary_domain("192.168.1.20"), "192.168.1.20");
        assert_eq!(primary_domain("intranet"), "intranet");
    }

    #[test]
    fn domain_from_url_strips_scheme_port_and_path() {
        assert_eq!(
            domain_from_url("https://shop.example.com:8443/cart?id=1"),
            "example.com"
        );
        assert_eq!(domain_from_url("http://localhost:3000/"), "localhost");
        assert_eq!(domain_from_url("http://user:pw@10.0.0.1/x"), "10.0.0.1");
    }

    #[test]
    fn unicode_hosts_are_punycoded() {
        assert_eq!(
            domain_from_url("https://www.BÜCHER.example/"),
            "xn--bcher-kva.example"
        );
        assert_eq!(primary_domain("shop.Bücher.example"), "xn--bcher-kva.example");
        assert!(cookie_matches_domain(
            ".xn--bcher-kva.example",
            &domain_from_url("https://bücher.example/login")
        ));
    }

    #[test]
    fn bare_hosts_and_ipv6() {
        assert_eq!(domain_from_url("WWW.Example.COM"), "example.com");
        assert_eq!(domain_from_url("http://[::1]:8080/"), "::1");
        assert_eq!(primary_domain("Example.com."), "example.com");
    }

    #[test]
    fn cookie_domain_matching() {
        assert!(cookie_matches_domain(".example.com", "example.com"));
        assert!(cookie_matches_domain("auth.example.com", "example.com"));
        assert!(!cookie_matches_domain("example.org", "example.com"));
        assert!(!cookie_matches_domain("badexample.com", "example.com"));
    }

    #[test]
    fn cookie_json_uses_browser_field_names() {
        let c: CookieData = serde_json::from_str(
            r#"{"name":"sid","value":"1","domain":".example.com","httpOnly":true,"sameSite":"Lax"}"#,
        )
        .unwrap();
        assert!(c.http_only);
        assert_eq!(c.path, "/");
        assert_eq!(c.same_site.as_deref(), Some("Lax"));
    }
}
