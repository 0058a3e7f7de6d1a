/// Get environment variable with PLANGATE_ prefix, falling back to unprefixed version
///
/// Checks `PLANGATE_{key}` first, then `{key}`, so deployments can share
/// conventional names such as `PORT` or `STRIPE_SECRET_KEY`.
///
/// # Examples
///
/// ```rust,ignore
/// use plangate::utils::get_env_with_prefix;
///
/// // Checks PLANGATE_STRIPE_WEBHOOK_SECRET first, then STRIPE_WEBHOOK_SECRET
/// let secret = get_env_with_prefix("STRIPE_WEBHOOK_SECRET");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("PLANGATE_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Parse a prefixed environment variable, ignoring values that fail to parse.
pub fn parse_env_with_prefix<T: std::str::FromStr>(key: &str) -> Option<T> {
    get_env_with_prefix(key).and_then(|v| v.trim().parse().ok())
}
