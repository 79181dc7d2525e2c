//! eBay Trading API `EndItems` client
//!
//! Ends up to 10 listings of one account per call and reports a per-item
//! outcome. Request pacing at the HTTP layer uses a `governor` quota; the
//! engine's adaptive limiter sits on top of it.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use regex::Regex;
use reqwest::{
    Client, StatusCode,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT},
};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::errors::RemoteCallError;
use crate::domain::listing::RemoteItemResult;
use crate::domain::services::RemoteBatchClient;
use crate::infrastructure::config::TradingApiConfig;

/// eBay answers 1047 for a listing that has already ended
pub const ALREADY_ENDED_CODE: &str = "1047";

const MALFORMED_EXCERPT_LEN: usize = 200;

/// Supplies the OAuth user token of an account.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self, account: &str) -> Option<String>;
}

/// Tokens taken verbatim from the configuration
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, String>,
}

impl StaticTokenProvider {
    /// Account names are matched case-insensitively; the config layer lowercases map keys.
    pub fn new(tokens: HashMap<String, String>) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|(account, token)| (account.to_lowercase(), token))
            .collect();
        Self { tokens }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self, account: &str) -> Option<String> {
        self.tokens
            .get(&account.to_lowercase())
            .filter(|token| !token.is_empty())
            .cloned()
    }
}

/// Compiled patterns for the `EndItems` response
#[derive(Debug, Clone)]
pub struct ResponsePatterns {
    container: Regex,
    message_id: Regex,
    correlation_id: Regex,
    item_id: Regex,
    errors: Regex,
    end_time: Regex,
    error_code: Regex,
    short_message: Regex,
}

impl ResponsePatterns {
    pub fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            container: Regex::new(r"(?s)<EndItemResponseContainer>(.*?)</EndItemResponseContainer>")?,
            message_id: Regex::new(r"(?s)<MessageID>(.*?)</MessageID>")?,
            correlation_id: Regex::new(r"(?s)<CorrelationID>(.*?)</CorrelationID>")?,
            item_id: Regex::new(r"<ItemID>(\d+)</ItemID>")?,
            errors: Regex::new(r"<Errors>")?,
            end_time: Regex::new(r"<EndTime>")?,
            error_code: Regex::new(r"<ErrorCode>(\d+)</ErrorCode>")?,
            short_message: Regex::new(r"(?s)<ShortMessage>(.*?)</ShortMessage>")?,
        })
    }

    fn first<'t>(pattern: &Regex, text: &'t str) -> Option<&'t str> {
        pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
    }
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// `EndItemsRequest` body with one container per id.
///
/// MessageID echoes the id so the response can be matched back.
pub fn build_end_items_request(item_ids: &[String], ending_reason: &str) -> String {
    let reason = xml_escape(ending_reason);
    let containers: Vec<String> = item_ids
        .iter()
        .map(|item_id| {
            let id = xml_escape(item_id);
            format!(
                "  <EndItemRequestContainer>\n    <MessageID>{id}</MessageID>\n    <ItemID>{id}</ItemID>\n    <EndingReason>{reason}</EndingReason>\n  </EndItemRequestContainer>"
            )
        })
        .collect();

    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<EndItemsRequest xmlns=\"urn:ebay:apis:eBLBaseComponents\">\n{}\n</EndItemsRequest>",
        containers.join("\n")
    )
}

/// Parses an `EndItems` response into per-item results.
///
/// A container counts as ended when it has no `<Errors>`, when the error is
/// 1047 (already ended), or when it carries an `<EndTime>`. A response
/// without containers is a whole-call failure.
pub fn parse_end_items_response<F>(
    patterns: &ResponsePatterns,
    text: &str,
    is_rate_limit_code: F,
) -> Result<Vec<RemoteItemResult>, RemoteCallError>
where
    F: Fn(&str) -> bool,
{
    let mut results = Vec::new();
    let mut containers = 0usize;

    for caps in patterns.container.captures_iter(text) {
        containers += 1;
        let block = caps.get(1).map_or("", |m| m.as_str());

        let item_id = ResponsePatterns::first(&patterns.message_id, block)
            .or_else(|| ResponsePatterns::first(&patterns.correlation_id, block))
            .or_else(|| ResponsePatterns::first(&patterns.item_id, block));
        let Some(item_id) = item_id else {
            warn!("⚠️ EndItems container without an id, skipped");
            continue;
        };

        let has_errors = patterns.errors.is_match(block);
        let has_end_time = patterns.end_time.is_match(block);
        let error_code = ResponsePatterns::first(&patterns.error_code, block).map(str::to_string);
        let success = !has_errors || error_code.as_deref() == Some(ALREADY_ENDED_CODE) || has_end_time;

        results.push(RemoteItemResult {
            item_id: xml_unescape(item_id),
            success,
            error_code,
        });
    }

    if containers > 0 {
        return Ok(results);
    }

    match ResponsePatterns::first(&patterns.error_code, text) {
        Some(code) if is_rate_limit_code(code) => Err(RemoteCallError::RateLimited { code: code.to_string() }),
        Some(code) => Err(RemoteCallError::Rejected {
            code: code.to_string(),
            message: ResponsePatterns::first(&patterns.short_message, text)
                .unwrap_or_default()
                .to_string(),
        }),
        None => {
            let excerpt: String = text.chars().take(MALFORMED_EXCERPT_LEN).collect();
            Err(RemoteCallError::Malformed(format!("no EndItemResponseContainer: {excerpt}")))
        }
    }
}

pub struct TradingApiClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    patterns: ResponsePatterns,
    tokens: Arc<dyn TokenProvider>,
    rate_limit_codes: Vec<String>,
    config: TradingApiConfig,
}

impl TradingApiClient {
    pub fn new(config: TradingApiConfig, tokens: Arc<dyn TokenProvider>, rate_limit_codes: Vec<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml"));
        headers.insert("x-ebay-api-call-name", HeaderValue::from_static("EndItems"));
        headers.insert(
            "x-ebay-api-siteid",
            HeaderValue::from_str(&config.site_id).context("Invalid site id")?,
        );
        headers.insert(
            "x-ebay-api-compatibility-level",
            HeaderValue::from_str(&config.compatibility_level).context("Invalid compatibility level")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second).context("Rate limit must be greater than 0")?,
        );

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            patterns: ResponsePatterns::compile().context("Failed to compile response patterns")?,
            tokens,
            rate_limit_codes,
            config,
        })
    }

    pub fn is_rate_limit_code(&self, code: &str) -> bool {
        self.rate_limit_codes.iter().any(|known| known == code)
    }

    pub const fn config(&self) -> &TradingApiConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteBatchClient for TradingApiClient {
    async fn terminate_batch(
        &self,
        partition_key: &str,
        item_ids: &[String],
    ) -> Result<Vec<RemoteItemResult>, RemoteCallError> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        if item_ids.len() > self.config.max_items_per_call {
            return Err(RemoteCallError::BatchTooLarge {
                size: item_ids.len(),
                max: self.config.max_items_per_call,
            });
        }

        let token = self
            .tokens
            .access_token(partition_key)
            .await
            .ok_or_else(|| RemoteCallError::MissingCredentials {
                account: partition_key.to_string(),
            })?;
        let token = HeaderValue::from_str(&token).map_err(|e| RemoteCallError::Rejected {
            code: "invalid_token".to_string(),
            message: format!("access token for {partition_key} is malformed: {e}"),
        })?;

        self.rate_limiter.until_ready().await;

        let body = build_end_items_request(item_ids, &self.config.ending_reason);
        debug!("📤 EndItems {}: {} listing(s)", partition_key, item_ids.len());

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-ebay-api-iaf-token", token)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteCallError::Timeout
                } else {
                    RemoteCallError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RemoteCallError::RateLimited { code: "429".to_string() });
        }

        let text = response
            .text()
            .await
            .map_err(|e| RemoteCallError::Transport(format!("failed to read body: {e}")))?;
        if !status.is_success() {
            warn!("⚠️ EndItems {}: HTTP {}", partition_key, status);
        }

        parse_end_items_response(&self.patterns, &text, |code| self.is_rate_limit_code(code))
    }
}
