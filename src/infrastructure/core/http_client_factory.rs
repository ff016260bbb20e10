use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

/// Builds the HTTP client shared by providers and the hot-tier cache client.
///
/// Transient upstream errors (timeouts, 5xx, connection resets) are retried
/// with exponential backoff before the gateway's own fallback logic sees
/// them. `timeout` is the per-request deadline the caller owns.
pub fn build_http_client(timeout: Duration) -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);

    let client = Client::builder()
        .pool_max_idle_per_host(5)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|_| Client::new());

    ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

/// Builds a URL with query parameters. reqwest-middleware does not expose
/// `.query()`, so the query string is assembled manually.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if params.is_empty() {
        return base_url.to_string();
    }

    let query_string: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k.as_ref()), percent_encode(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&");

    if base_url.contains('?') {
        format!("{}&{}", base_url, query_string)
    } else {
        format!("{}?{}", base_url, query_string)
    }
}

fn percent_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            _ => {
                for byte in c.to_string().as_bytes() {
                    encoded.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_building() {
        let url = build_url_with_query(
            "https://example.com/chart",
            &[("symbol", "INFY.NS"), ("interval", "5m")],
        );
        assert_eq!(url, "https://example.com/chart?symbol=INFY.NS&interval=5m");
    }

    #[test]
    fn test_query_appends_to_existing() {
        let url = build_url_with_query("https://example.com/x?a=1", &[("b", "2")]);
        assert_eq!(url, "https://example.com/x?a=1&b=2");
    }

    #[test]
    fn test_encoding_reserved_characters() {
        let url = build_url_with_query("https://example.com", &[("q", "a b&c")]);
        assert_eq!(url, "https://example.com?q=a%20b%26c");
    }
}
