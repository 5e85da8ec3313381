//! Optional language-model assist.
//!
//! The core only sees the narrow [`Completion`] trait: one prompt in, one
//! reply out, blocking, no retries. [`OpenAiClient`] implements it over an
//! OpenAI-compatible `/v1/chat/completions` endpoint (LM Studio, llama.cpp,
//! vLLM, ...).

use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};

use crate::config::InferenceConfig;
use crate::error::{FillError, Result};
use crate::example::Example;
use crate::interface::{Operation, Schema};

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system:      String,
    pub prompt:      String,
    pub temperature: f32,
    pub max_tokens:  u32,
}

pub trait Completion {
    /// Single blocking round trip. Expiry of the caller's timeout must
    /// surface as [`FillError::InferenceTimeout`].
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

pub struct OpenAiClient {
    url:          String,
    model:        Option<String>,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(cfg: &InferenceConfig) -> Self {
        Self {
            url:          cfg.url.clone(),
            model:        cfg.model.clone(),
            timeout_secs: cfg.timeout_secs,
        }
    }

    fn transport_error(&self, err: ureq::Error) -> FillError {
        match err {
            ureq::Error::Status(code, resp) => {
                let body = resp.into_string().unwrap_or_default();
                FillError::Inference(format!("{} answered HTTP {}: {}", self.url, code, body.trim()))
            }
            ureq::Error::Transport(t) => {
                if is_timeout(&t) {
                    FillError::InferenceTimeout { secs: self.timeout_secs }
                } else {
                    FillError::Inference(format!("{}: {}", self.url, t))
                }
            }
        }
    }
}

fn is_timeout(t: &ureq::Transport) -> bool {
    use std::error::Error as _;
    let io_timeout = t
        .source()
        .and_then(|s| s.downcast_ref::<std::io::Error>())
        .is_some_and(|e| matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock));
    io_timeout || (t.kind() == ureq::ErrorKind::Io && t.to_string().contains("timed out"))
}

impl Completion for OpenAiClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut payload = json!({
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt }
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens
        });
        if let Some(model) = &self.model {
            payload["model"] = Value::String(model.clone());
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build();

        tracing::debug!(url = %self.url, timeout_secs = self.timeout_secs, "sending completion request");
        let resp = agent
            .post(&self.url)
            .send_json(payload)
            .map_err(|e| self.transport_error(e))?;

        let json_resp: Value = resp.into_json().map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                FillError::InferenceTimeout { secs: self.timeout_secs }
            }
            _ => FillError::Inference(format!("unreadable reply: {}", e)),
        })?;
        let content = json_resp["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| FillError::Inference("reply has no choices[0].message.content".to_string()))?;
        Ok(sanitize_reply(content))
    }
}

/// Strip markdown fences from a reply.
fn sanitize_reply(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

const DISAMBIGUATION_SYSTEM: &str = "You map captured HTTP request/response examples to API operations. \
Answer with exactly one operation name from the list you are given and nothing else.";

fn field_list(schema: &Schema) -> String {
    if schema.is_empty() {
        return "-".to_string();
    }
    schema
        .fields()
        .iter()
        .map(|f| {
            let marker = if f.optional { "?" } else { "" };
            match f.ty.object_schema() {
                Some(inner) => format!("{}{} {{{}}}", f.name, marker, field_list(inner)),
                None => format!("{}{}", f.name, marker),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn disambiguation_request(example: &Example, tied: &[&Operation], cfg: &InferenceConfig) -> CompletionRequest {
    let mut prompt = String::from("Operations:\n");
    for op in tied {
        prompt.push_str(&format!(
            "- {}: {} {}\n    request fields: {}\n    response fields: {}\n",
            op.name,
            op.verb,
            op.route,
            field_list(&op.request),
            field_list(&op.response)
        ));
    }
    prompt.push_str("\nExample:\n");
    let mut shown = serde_json::Map::new();
    if let Some(m) = example.method {
        shown.insert("method".into(), Value::String(m.to_string()));
    }
    if let Some(p) = &example.path {
        shown.insert("path".into(), Value::String(p.clone()));
    }
    if let Some(p) = &example.params {
        shown.insert("parameters".into(), p.clone());
    }
    if let Some(r) = &example.request {
        shown.insert("request".into(), r.clone());
    }
    if let Some(r) = &example.response {
        shown.insert("response".into(), r.clone());
    }
    prompt.push_str(&format!("{:#}", Value::Object(shown)));
    prompt.push_str("\n\nWhich operation produced this example? Reply with its name only.");

    CompletionRequest {
        system:      DISAMBIGUATION_SYSTEM.to_string(),
        prompt,
        temperature: cfg.temperature,
        max_tokens:  cfg.max_tokens,
    }
}

/// The tied operation a reply names, if it names exactly one.
pub fn pick_from_reply<'a>(reply: &str, tied: &[&'a Operation]) -> Option<&'a Operation> {
    let cleaned = reply.trim().trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '.' | '*'));
    if let Some(op) = tied.iter().find(|op| op.name == cleaned) {
        return Some(*op);
    }
    let named: Vec<&'a Operation> = tied
        .iter()
        .copied()
        .filter(|op| {
            Regex::new(&format!(r"(?:^|[^\w.]){}(?:$|[^\w.])", regex::escape(&op.name)))
                .map(|re| re.is_match(reply))
                .unwrap_or(false)
        })
        .collect();
    match named.as_slice() {
        [one] => Some(*one),
        _ => None,
    }
}

/// Ask the model to break a tie. `Ok(None)` when the reply does not name
/// exactly one of the tied operations.
pub fn resolve_ambiguity<'a>(
    completion: &dyn Completion,
    example: &Example,
    tied: &[&'a Operation],
    cfg: &InferenceConfig,
) -> Result<Option<&'a Operation>> {
    let request = disambiguation_request(example, tied, cfg);
    let reply = completion.complete(&request)?;
    let picked = pick_from_reply(&reply, tied);
    match picked {
        Some(op) => tracing::info!(operation = %op.name, "inference assist broke the tie"),
        None => tracing::warn!(reply = %reply, "inference reply names none or several of the tied operations"),
    }
    Ok(picked)
}
