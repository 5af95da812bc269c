use crate::client::{Exchange, Transport};
use crate::error::FetchError;
use crate::extractor::extract_applications;
use crate::models::FetchSettings;
use crate::transcript::{Entry, Transcript};
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Substrings the upstream puts in a non-JSON body when it throttles us.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "too many requests",
    "забагато запитів",
    "перевищено ліміт запитів",
];

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    html: Option<String>,
    count: Option<u64>,
    message: Option<String>,
    error: Option<String>,
}

/// One accepted page: its HTML and the total the server reports for the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub html: String,
    pub total: usize,
}

fn rate_limit_message_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"(?i)забагато\s+запитів|перевищено\s+ліміт|ліміт\s+запитів|зачекайте|спробуйте\s+(?:ще\s+раз\s+)?(?:через|пізніше)",
        )
        .expect("rate limit pattern is valid")
    })
}

fn cooldown_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s*(?:сек|хв|с\b|s\b|sec)").expect("cooldown pattern is valid")
    })
}

/// Seconds to wait, when the text names them. Minutes (`хв`) are converted.
pub fn parse_cooldown(text: &str) -> Option<u64> {
    let caps = cooldown_regex().captures(text)?;
    let value = caps[1].parse::<u64>().ok()?;
    if caps[0].to_lowercase().contains("хв") {
        Some(value.saturating_mul(60))
    } else {
        Some(value)
    }
}

fn has_rate_limit_marker(body: &str) -> bool {
    let body = body.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Turn a raw exchange into a page or a classified failure.
pub fn interpret(exchange: &Exchange) -> Result<Page, FetchError> {
    if exchange.status == 429 {
        return Err(FetchError::RateLimited {
            cooldown_secs: exchange.retry_after_secs.or_else(|| parse_cooldown(&exchange.body)),
        });
    }
    if !(200..300).contains(&exchange.status) {
        return Err(FetchError::Network(format!("HTTP status {}", exchange.status)));
    }

    let body = exchange.body.trim();
    if body.is_empty() {
        return Err(FetchError::InvalidResponse("empty body".to_string()));
    }
    if has_rate_limit_marker(body) {
        return Err(FetchError::RateLimited {
            cooldown_secs: parse_cooldown(body),
        });
    }

    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| FetchError::InvalidResponse(format!("undecodable body: {}", e)))?;

    if !envelope.success {
        let message = envelope.message.or(envelope.error).unwrap_or_default();
        if rate_limit_message_regex().is_match(&message) {
            return Err(FetchError::RateLimited {
                cooldown_secs: parse_cooldown(&message),
            });
        }
        return Err(FetchError::InvalidResponse(format!(
            "upstream reported failure: {}",
            if message.is_empty() { "no message" } else { message.as_str() }
        )));
    }

    let total = envelope.count.unwrap_or(0) as usize;
    let html = envelope.html.unwrap_or_default();
    if total > 0 && html.trim().is_empty() {
        return Err(FetchError::InvalidResponse(format!(
            "count is {} but html is empty",
            total
        )));
    }

    Ok(Page { html, total })
}

/// Fetches every page of statements for one search query.
///
/// The shared `gate` is held only while a single exchange is in flight; sleeps
/// and parsing happen outside it.
pub struct StatementFetcher<T> {
    transport: T,
    gate: Arc<Semaphore>,
    settings: FetchSettings,
    transcript: Arc<Transcript>,
}

impl<T: Transport> StatementFetcher<T> {
    pub fn new(
        transport: T,
        gate: Arc<Semaphore>,
        settings: FetchSettings,
        transcript: Arc<Transcript>,
    ) -> Self {
        Self {
            transport,
            gate,
            settings,
            transcript,
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Concatenated HTML of all pages; empty when the query has no statements.
    pub async fn fetch_all(&self, query: &str) -> Result<String, FetchError> {
        let mut buffer = String::new();
        let mut offset = 0;
        let mut previous_count = None;

        loop {
            let page = self.fetch_page(query, offset).await?;
            buffer.push_str(&page.html);

            // Cursor comes from parsed rows, the endpoint has no next-page token
            let current_count = extract_applications(&buffer).len();
            debug!(
                "'{}': {} of {} statements after offset {}",
                query, current_count, page.total, offset
            );

            if current_count >= page.total {
                break;
            }
            if previous_count == Some(current_count) {
                warn!(
                    "'{}': pagination stuck at {} of {} statements, keeping what we have",
                    query, current_count, page.total
                );
                break;
            }

            previous_count = Some(current_count);
            offset = current_count;
            tokio::time::sleep(self.settings.page_pause()).await;
        }

        Ok(buffer)
    }

    /// One page with retries. Rate-limit waits do not use up attempts.
    pub async fn fetch_page(&self, query: &str, offset: usize) -> Result<Page, FetchError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(query, offset, attempt).await {
                Ok(page) => return Ok(page),
                Err(FetchError::RateLimited { cooldown_secs }) => {
                    let wait = self.rate_limit_wait(cooldown_secs);
                    info!("'{}': rate limited, waiting {:?}", query, wait);
                    tokio::time::sleep(wait).await;
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "'{}': attempt {}/{} failed: {}",
                        query, attempt, max_attempts, err
                    );
                    attempt += 1;
                    tokio::time::sleep(self.settings.retry_delay()).await;
                }
                Err(err) if err.is_retryable() => {
                    return Err(FetchError::ExhaustedRetries {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Cooldown plus a second of slack, or the fallback when none was given.
    fn rate_limit_wait(&self, cooldown_secs: Option<u64>) -> Duration {
        cooldown_secs
            .map(|secs| Duration::from_secs(secs.saturating_add(1)))
            .unwrap_or_else(|| self.settings.rate_limit_fallback())
    }

    async fn attempt(&self, query: &str, offset: usize, attempt: u32) -> Result<Page, FetchError> {
        let exchange = {
            let _permit = self.gate.acquire().await.map_err(|_| FetchError::GateClosed)?;
            self.transcript.record(
                Entry::Request,
                query,
                offset,
                attempt,
                &format!("search={} offset={}", query, offset),
            );
            self.transport.post_page(query, offset).await
        };

        let result = exchange.and_then(|exchange| {
            self.transcript.record(
                Entry::Response,
                query,
                offset,
                attempt,
                &format!("status {}\n{}", exchange.status, exchange.body),
            );
            interpret(&exchange)
        });

        if let Err(err) = &result {
            self.transcript.record(Entry::Failure, query, offset, attempt, &err.to_string());
        }
        result
    }
}
