//! Rate limit identifier resolution

/// Derive the rate limit key for a caller.
///
/// Authenticated callers are keyed by user id. Anonymous callers are keyed by
/// the first address in `X-Forwarded-For`, or `anonymous` without one.
pub fn resolve_identifier(user_id: Option<&str>, forwarded_for: Option<&str>) -> String {
    if let Some(id) = user_id {
        return format!("user:{}", id);
    }

    let ip = forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("anonymous");

    format!("ip:{}", ip)
}
