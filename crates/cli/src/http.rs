//! HTTP implementations of the summarization gateway and error reporter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use context_gauge_core::{ErrorReporter, GatewayError, SummarizationGateway, SummaryRequest};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 4000,
        }
    }
}

/// Body of a 403 from the proxy when the free tier is used up.
#[derive(Debug, Deserialize)]
struct LimitExceeded {
    error: String,
    limit: u64,
    current: u64,
}

fn request_body(request: &SummaryRequest) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: [Content {
            parts: [Part {
                text: &request.prompt,
            }],
        }],
        generation_config: GenerationConfig::default(),
        user_id: &request.installation_id,
    }
}

/// Map a proxy response to the summary text or a gateway error.
fn parse_response(status: u16, body: &str) -> Result<String, GatewayError> {
    if (200..300).contains(&status) {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| GatewayError::InvalidResponse(format!("malformed JSON: {e}")))?;
        return value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::InvalidResponse("missing candidates[0].content.parts[0].text".to_string())
            });
    }

    if status == 403 {
        if let Ok(limit) = serde_json::from_str::<LimitExceeded>(body) {
            if limit.error == "limit_exceeded" {
                return Err(GatewayError::LimitExceeded {
                    limit: limit.limit,
                    current: limit.current,
                });
            }
        }
    }

    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    Err(GatewayError::Status { status, message })
}

/// Summarization proxy reached over HTTP.
pub struct HttpGateway {
    client: Client,
    url: String,
}

impl HttpGateway {
    pub fn new(url: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SummarizationGateway for HttpGateway {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, GatewayError> {
        debug!(url = %self.url, "posting summary request");
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&request.credential)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        parse_response(status, &body)
    }
}

#[derive(Debug, Serialize)]
struct Report {
    context: String,
    message: String,
    stack: Option<String>,
}

/// Posts error reports to a collector. Delivery is best effort.
pub struct HttpReporter {
    client: Client,
    url: String,
}

impl HttpReporter {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?,
            url: url.into(),
        })
    }
}

impl ErrorReporter for HttpReporter {
    fn report(&self, context: &str, message: &str, stack: Option<&str>) {
        error!(context, stack = stack.unwrap_or(""), "{}", message);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime available, error report not sent");
            return;
        };
        let request = self.client.post(&self.url).json(&Report {
            context: context.to_string(),
            message: message.to_string(),
            stack: stack.map(str::to_string),
        });
        handle.spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "error report rejected");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to send error report"),
            }
        });
    }
}
