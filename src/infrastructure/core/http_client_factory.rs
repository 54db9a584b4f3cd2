use anyhow::{Context, Result};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;
use url::Url;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// HTTP client retrying transient failures with exponential backoff (3 retries).
    pub fn create_client(timeout: Duration) -> Result<ClientWithMiddleware> {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("spectator/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build())
    }
}

/// Append percent-encoded query parameters to `base_url`.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> Result<Url>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut url = Url::parse(base_url).with_context(|| format!("Invalid URL: {}", base_url))?;
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in params {
            pairs.append_pair(k.as_ref(), v.as_ref());
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_is_appended_and_encoded() {
        let url = build_url_with_query(
            "https://api.binance.com/api/v3/klines",
            &[("symbol", "BTCUSDT"), ("interval", "1h"), ("note", "a b&c")],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.binance.com/api/v3/klines?symbol=BTCUSDT&interval=1h&note=a+b%26c"
        );
    }

    #[test]
    fn test_existing_query_is_preserved() {
        let url = build_url_with_query("http://localhost/x?a=1", &[("b", "2")]).unwrap();
        assert_eq!(url.query(), Some("a=1&b=2"));
    }

    #[test]
    fn test_invalid_base_is_an_error() {
        assert!(build_url_with_query::<&str, &str>("not a url", &[]).is_err());
    }
}
