use reqwest::header::HeaderMap;

/// Fallback identifier when no forwarding header is present
pub const UNKNOWN_CLIENT: &str = "unknown";

const FORWARDING_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// Pick a client identifier for rate limiting from standard forwarding headers.
///
/// `X-Forwarded-For` may hold a chain of proxies; the first entry is the
/// originating client.
pub fn client_identifier(headers: &HeaderMap) -> String {
    for name in FORWARDING_HEADERS {
        let candidate = headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').map(str::trim).find(|entry| !entry.is_empty()));

        if let Some(client) = candidate {
            return client.to_string();
        }
    }

    UNKNOWN_CLIENT.to_string()
}
