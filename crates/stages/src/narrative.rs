//! Narrative interpreter: turns a rubric report into a readable assessment
//! through a remote language-model service.
//!
//! Two backends are provided:
//! - [`OpenAiBackend`]: chat-completions API with a JSON response format.
//! - [`SynapseAgentBackend`]: a hosted agent addressed through the Synapse
//!   agent session REST API.
//!
//! Whatever the backend returns is validated against the narrative schema
//! before it becomes a [`NarrativeSummary`]; anything else is a `Parse`
//! failure carrying the raw response.

use async_trait::async_trait;
use handlebars::Handlebars;
use repolens_common::{Error, Result};
use repolens_schema::{
    validate_narrative, FailureKind, MetricsDocument, NarrativeSummary, RubricReport, StageFailure, StageResult,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default wall-clock bound for one interpretation.
pub const DEFAULT_NARRATIVE_TIMEOUT: Duration = Duration::from_secs(300);

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const SYNAPSE_BASE_URL: &str = "https://repo-prod.prod.sagebase.org/repo/v1";

const AGENT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const SYSTEM_PROMPT: &str = "You review research software repositories. \
You receive a JSON document with the repository URL, code-health metrics and a scored rubric. \
Reply with a single JSON object with the keys: \
\"summary\" (string), \"strengths\" (array of strings), \"weaknesses\" (array of strings), \
\"recommendations\" (array of strings, most important first) and \
\"readiness\" (one of \"Ready\", \"Needs Work\", \"Not Ready\"). \
Do not add any other text.";

/// A remote service that answers one interpretation request with raw text.
#[async_trait]
pub trait NarrativeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, input: &Value) -> Result<String>;
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Http(format!("{}: {}", status, body.trim())))
}

fn http_error(e: reqwest::Error) -> Error {
    Error::Http(e.to_string())
}

/// Chat-completions backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl NarrativeBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, input: &Value) -> Result<String> {
        let body = json!({
            "model": self.model,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": input.to_string()},
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        let reply: Value = error_for_status(response).await?.json().await.map_err(http_error)?;

        reply["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Parse(format!("completion without message content: {}", reply)))
    }
}

/// Hosted agent backend using the Synapse agent session API.
pub struct SynapseAgentBackend {
    client: reqwest::Client,
    auth_token: String,
    agent_id: String,
    base_url: String,
}

impl SynapseAgentBackend {
    pub fn new(auth_token: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth_token: auth_token.into(),
            agent_id: agent_id.into(),
            base_url: SYNAPSE_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send_json(&self, request: reqwest::RequestBuilder, body: &Value) -> Result<Value> {
        let response = request
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await
            .map_err(http_error)?;
        error_for_status(response).await?.json().await.map_err(http_error)
    }

    fn field(value: &Value, key: &str) -> Result<String> {
        value[key]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Parse(format!("agent response missing '{}'", key)))
    }
}

#[async_trait]
impl NarrativeBackend for SynapseAgentBackend {
    fn name(&self) -> &'static str {
        "synapse-agent"
    }

    async fn complete(&self, input: &Value) -> Result<String> {
        let registration = self
            .send_json(
                self.client.put(format!("{}/agent/registration", self.base_url)),
                &json!({"awsAgentId": self.agent_id}),
            )
            .await?;
        let registration_id = Self::field(&registration, "agentRegistrationId")?;

        let session = self
            .send_json(
                self.client.post(format!("{}/agent/session", self.base_url)),
                &json!({
                    "agentRegistrationId": registration_id,
                    "agentAccessLevel": "PUBLICLY_ACCESSIBLE",
                }),
            )
            .await?;
        let session_id = Self::field(&session, "sessionId")?;
        debug!("Agent session {} opened", session_id);

        let job = self
            .send_json(
                self.client.post(format!("{}/agent/chat/async/start", self.base_url)),
                &json!({
                    "concreteType": "org.sagebionetworks.repo.model.agent.AgentChatRequest",
                    "sessionId": session_id,
                    "chatText": format!("{}\n\n{}", SYSTEM_PROMPT, input),
                    "enableTrace": true,
                }),
            )
            .await?;
        let token = Self::field(&job, "token")?;

        // The caller bounds the whole exchange, so polling runs until an answer arrives.
        loop {
            let response = self
                .client
                .get(format!("{}/agent/chat/async/get/{}", self.base_url, token))
                .bearer_auth(&self.auth_token)
                .send()
                .await
                .map_err(http_error)?;

            if response.status() == reqwest::StatusCode::ACCEPTED {
                tokio::time::sleep(AGENT_POLL_INTERVAL).await;
                continue;
            }

            let body: Value = error_for_status(response).await?.json().await.map_err(http_error)?;
            return Self::field(&body, "responseText");
        }
    }
}

/// Input document sent to the backend.
#[derive(Debug, Serialize)]
pub struct NarrativeInput<'a> {
    pub repository_url: &'a str,
    pub metrics_results: Option<&'a MetricsDocument>,
    pub rubric_report: &'a RubricReport,
}

/// Runs one backend under a hard timeout and validates its answer.
#[derive(Clone)]
pub struct NarrativeInterpreter {
    backend: Arc<dyn NarrativeBackend>,
    timeout: Duration,
}

impl NarrativeInterpreter {
    pub fn new(backend: Arc<dyn NarrativeBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub async fn interpret(
        &self,
        repository_url: &str,
        metrics: Option<&MetricsDocument>,
        rubric: &RubricReport,
    ) -> StageResult<NarrativeSummary> {
        let input = NarrativeInput {
            repository_url,
            metrics_results: metrics,
            rubric_report: rubric,
        };
        let input = match serde_json::to_value(&input) {
            Ok(v) => v,
            Err(e) => return StageResult::failure(FailureKind::Validation, e.to_string()),
        };

        info!("Requesting narrative from {} for {}", self.backend.name(), repository_url);
        match tokio::time::timeout(self.timeout, self.backend.complete(&input)).await {
            Err(_) => {
                warn!("Narrative request for {} timed out", repository_url);
                StageResult::failure(
                    FailureKind::Timeout,
                    format!("{} did not answer within {}s", self.backend.name(), self.timeout.as_secs()),
                )
            }
            Ok(Err(e)) => StageResult::from(Err::<NarrativeSummary, _>(e)),
            Ok(Ok(raw)) => parse_narrative(&raw),
        }
    }
}

/// Strip a surrounding markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Validate and convert a raw backend response.
pub fn parse_narrative(raw: &str) -> StageResult<NarrativeSummary> {
    let value: Value = match serde_json::from_str(strip_code_fence(raw)) {
        Ok(v) => v,
        Err(e) => {
            return StageResult::failure_with_raw(FailureKind::Parse, format!("response is not JSON: {}", e), raw)
        }
    };

    match validate_narrative(&value) {
        Ok(result) if result.valid => {}
        Ok(result) => return StageResult::failure_with_raw(FailureKind::Parse, result.error_summary(), raw),
        Err(e) => return StageResult::failure_with_raw(FailureKind::Parse, e.to_string(), raw),
    }

    match serde_json::from_value(value) {
        Ok(summary) => StageResult::success(summary),
        Err(e) => StageResult::failure_with_raw(FailureKind::Parse, e.to_string(), raw),
    }
}

const NARRATIVE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{repo_name}}: repository assessment</title></head>
<body>
<h1>{{repo_name}}</h1>
<p><strong>Readiness:</strong> {{readiness}}</p>
<h2>Summary</h2>
<p>{{summary.summary}}</p>
<h2>Strengths</h2>
<ul>{{#each summary.strengths}}<li>{{this}}</li>{{/each}}</ul>
<h2>Weaknesses</h2>
<ul>{{#each summary.weaknesses}}<li>{{this}}</li>{{/each}}</ul>
<h2>Recommendations</h2>
<ol>{{#each summary.recommendations}}<li>{{this}}</li>{{/each}}</ol>
</body>
</html>
"#;

const ERROR_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{repo_name}}: assessment unavailable</title></head>
<body>
<h1>Error in AI Analysis</h1>
<p>{{kind}}: {{message}}</p>
{{#if raw}}<pre>{{raw}}</pre>{{/if}}
</body>
</html>
"#;

fn renderer() -> Result<Handlebars<'static>> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars
        .register_template_string("narrative", NARRATIVE_TEMPLATE)
        .map_err(|e| Error::Other(e.to_string()))?;
    handlebars
        .register_template_string("error", ERROR_TEMPLATE)
        .map_err(|e| Error::Other(e.to_string()))?;
    Ok(handlebars)
}

/// Render a successful narrative as a standalone HTML page.
pub fn render_html(repo_name: &str, summary: &NarrativeSummary) -> Result<String> {
    let readiness = serde_json::to_value(summary.readiness)?;
    renderer()?
        .render(
            "narrative",
            &json!({"repo_name": repo_name, "readiness": readiness, "summary": summary}),
        )
        .map_err(|e| Error::Other(e.to_string()))
}

/// Render the diagnostic page written when interpretation failed.
pub fn render_error_html(repo_name: &str, failure: &StageFailure) -> Result<String> {
    let kind = serde_json::to_value(failure.kind)?;
    renderer()?
        .render(
            "error",
            &json!({
                "repo_name": repo_name,
                "kind": kind,
                "message": failure.message,
                "raw": failure.raw.clone().unwrap_or_default(),
            }),
        )
        .map_err(|e| Error::Other(e.to_string()))
}
