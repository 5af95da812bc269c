use crate::error::FetchError;
use chrono::Utc;
use reqwest::header::{ACCEPT, ORIGIN, REFERER, RETRY_AFTER, USER_AGENT};
use std::future::Future;
use std::time::Duration;

/// Raw outcome of one HTTP exchange, before any interpretation.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub status: u16,
    pub retry_after_secs: Option<u64>,
    pub body: String,
}

#[cfg(test)]
impl Exchange {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after_secs: None,
            body: body.into(),
        }
    }
}

/// One page request against the statements endpoint.
pub trait Transport: Send + Sync {
    fn post_page(
        &self,
        query: &str,
        offset: usize,
    ) -> impl Future<Output = Result<Exchange, FetchError>> + Send;
}

/// Talks to the real endpoint. Every call builds its own client with pooling
/// disabled, so no connection outlives the exchange it was opened for.
pub struct HttpTransport {
    api_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_url: api_url.into(),
            timeout,
        }
    }

    fn origin(&self) -> String {
        reqwest::Url::parse(&self.api_url)
            .map(|url| url.origin().ascii_serialization())
            .unwrap_or_default()
    }
}

impl Transport for HttpTransport {
    async fn post_page(&self, query: &str, offset: usize) -> Result<Exchange, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .build()?;

        let origin = self.origin();
        let offset = offset.to_string();
        let nocache = Utc::now().timestamp_millis().to_string();

        let response = client
            .post(&self.api_url)
            .header(USER_AGENT, "Mozilla/5.0")
            .header(ACCEPT, "application/json, text/javascript, */*; q=0.01")
            .header("X-Requested-With", "XMLHttpRequest")
            .header(ORIGIN, origin.as_str())
            .header(REFERER, format!("{}/", origin))
            .query(&[("nocache", nocache.as_str())])
            .form(&[("search", query), ("offset", offset.as_str())])
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let body = response.text().await?;

        Ok(Exchange {
            status,
            retry_after_secs,
            body,
        })
    }
}
