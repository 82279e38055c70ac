//! Static-token authentication for the WS upgrade and REST endpoints.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use alfred_core::config::GatewayConfig;
use alfred_core::types::{ClientInfo, DEFAULT_TENANT};

/// Validate `token` against the configured list using constant-time
/// comparison, yielding the client identity on a match.
///
/// The optional `tenant` (from the `tenant_id` query parameter) scopes the
/// connection; absent means the default tenant.
pub fn authenticate(
    config: &GatewayConfig,
    token: &str,
    tenant: Option<&str>,
) -> Option<ClientInfo> {
    let mut matched = None;
    // Every entry is compared so the timing doesn't reveal which one hit.
    for entry in &config.tokens {
        let same_len = entry.token.len() == token.len();
        if same_len && bool::from(entry.token.as_bytes().ct_eq(token.as_bytes())) {
            matched = Some(entry);
        }
    }

    matched.map(|entry| ClientInfo {
        name: entry.name.clone(),
        roles: entry.roles.clone(),
        tenant_id: tenant
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TENANT)
            .to_string(),
    })
}

/// Token from `Authorization: Bearer …` or the `token` query parameter.
pub fn extract_token<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or(query_token)
}

/// The gateway only talks to the local machine: loopback origins with any
/// port are allowed, as are non-browser clients that send no Origin.
pub fn is_local_origin(origin: Option<&str>) -> bool {
    let Some(origin) = origin else { return true };
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
        .or_else(|| origin.strip_prefix("ws://"))
        .or_else(|| origin.strip_prefix("wss://"))
    else {
        return false;
    };

    let host = if let Some(end) = rest.find("]") {
        // Bracketed IPv6 literal, e.g. [::1]:8080.
        &rest[..=end]
    } else {
        rest.split(':').next().unwrap_or(rest)
    };

    matches!(host, "127.0.0.1" | "localhost" | "[::1]" | "::1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_core::config::TokenEntry;

    fn config() -> GatewayConfig {
        GatewayConfig {
            port: 0,
            bind: "127.0.0.1".into(),
            tokens: vec![
                TokenEntry {
                    token: "admin-token".into(),
                    name: "ops".into(),
                    roles: vec![],
                },
                TokenEntry {
                    token: "viewer-token".into(),
                    name: "dash".into(),
                    roles: vec!["session_view".into(), "dashboard".into()],
                },
            ],
        }
    }

    #[test]
    fn matching_token_yields_client_info() {
        let client = authenticate(&config(), "viewer-token", Some("acme")).unwrap();
        assert_eq!(client.name, "dash");
        assert_eq!(client.tenant_id, "acme");
        assert!(!client.is_implicit_admin());
    }

    #[test]
    fn missing_tenant_defaults() {
        let client = authenticate(&config(), "admin-token", None).unwrap();
        assert_eq!(client.tenant_id, DEFAULT_TENANT);
        assert!(client.is_implicit_admin());
    }

    #[test]
    fn wrong_token_is_rejected() {
        assert!(authenticate(&config(), "nope", None).is_none());
        assert!(authenticate(&config(), "", None).is_none());
    }

    #[test]
    fn bearer_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(extract_token(&headers, Some("xyz")), Some("abc"));
        assert_eq!(extract_token(&HeaderMap::new(), Some("xyz")), Some("xyz"));
        assert_eq!(extract_token(&HeaderMap::new(), None), None);
    }

    #[test]
    fn loopback_origins_allowed_any_port() {
        assert!(is_local_origin(None));
        assert!(is_local_origin(Some("http://127.0.0.1:3000")));
        assert!(is_local_origin(Some("http://localhost")));
        assert!(is_local_origin(Some("http://[::1]:9999")));
        assert!(!is_local_origin(Some("https://evil.example")));
        assert!(!is_local_origin(Some("http://192.168.1.5:3000")));
    }
}
