use webloom_core::config::GatewayConfig;

/// Check a request's credentials against the configured token.
///
/// A bearer header takes precedence over `?token=`. With no token
/// configured every request is accepted.
pub fn validate_auth(config: &GatewayConfig, bearer: Option<&str>, query_token: Option<&str>) -> bool {
    let Some(expected) = config.token.as_deref().filter(|t| !t.is_empty()) else {
        return true;
    };
    match bearer {
        Some(presented) => presented == expected,
        None => query_token == Some(expected),
    }
}

/// Extract token from the query string (?token=...).
pub fn extract_token_from_query(query: &str) -> Option<&str> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
}
