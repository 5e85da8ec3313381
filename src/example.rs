//! Example ingestion: one captured request/response pair, no operation label.
//!
//! Recognised shapes, first match wins:
//! 1. `{ "request": ..., "response": ... }` (either side optional)
//! 2. Azure REST API example files: `{ "parameters": {...}, "responses": { "200": { "body": ... } } }`
//! 3. any other object, taken as a request body

use serde_json::{Map, Value};

use crate::error::{FillError, Result};
use crate::interface::Verb;

#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    /// Request body.
    pub request:  Option<Value>,
    pub response: Option<Value>,
    /// Path and query parameters. Scored with the request, never written
    /// into a script.
    pub params:   Option<Value>,
    pub method:   Option<Verb>,
    pub path:     Option<String>,
    pub status:   Option<u16>,
}

/// Request parameters that never carry operation data.
const IGNORED_PARAMS: &[&str] = &["api-version", "apiversion", "endpoint", "$host", "host"];

const PARAM_KEYS: &[&str] = &["params", "pathParameters", "path_params", "query", "queryParameters"];

impl Example {
    /// Parse example text (JSON, falling back to YAML).
    pub fn parse(text: &str) -> Result<Example> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(json_err) => serde_yaml::from_str(text).map_err(|_| {
                FillError::MalformedExample(format!("not valid JSON or YAML: {}", json_err))
            })?,
        };
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Example> {
        let Value::Object(root) = value else {
            return Err(FillError::MalformedExample(format!(
                "top level must be an object, found {}",
                kind_of(&value)
            )));
        };

        let example = if root.contains_key("request") || root.contains_key("response") {
            from_pair(&root)
        } else if root.contains_key("parameters") && root.contains_key("responses") {
            from_spec_example(&root)
        } else {
            Example {
                request:  Some(Value::Object(root)),
                response: None,
                params:   None,
                method:   None,
                path:     None,
                status:   None,
            }
        };

        if !example.has_data() {
            return Err(FillError::MalformedExample(
                "example carries neither request nor response data".to_string(),
            ));
        }
        tracing::debug!(
            request = example.request.is_some(),
            response = example.response.is_some(),
            params = example.params.is_some(),
            method = ?example.method,
            path = ?example.path,
            "example ingested"
        );
        Ok(example)
    }

    fn has_data(&self) -> bool {
        self.request.as_ref().is_some_and(carries_data) || self.response.as_ref().is_some_and(carries_data)
    }
}

pub(crate) fn carries_data(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Object(m) => !m.is_empty(),
        Value::Array(a) => !a.is_empty(),
        _ => true,
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null      => "null",
        Value::Bool(_)   => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_)  => "an array",
        Value::Object(_) => "an object",
    }
}

fn str_field<'a>(m: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| m.get(*k).and_then(Value::as_str))
}

fn status_value(v: &Value) -> Option<u16> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn status_field(m: &Map<String, Value>) -> Option<u16> {
    ["status", "statusCode", "status_code"].iter().find_map(|k| m.get(*k).and_then(status_value))
}

fn looks_like_path(p: &str) -> bool {
    p.starts_with('/') || p.contains("://")
}

/// Envelope keys of a captured request, recognised only with a plausible value.
fn request_envelope_key(key: &str, v: &Value) -> bool {
    match key {
        "method" | "verb" => v.as_str().and_then(Verb::parse).is_some(),
        "path" | "url" => v.as_str().is_some_and(looks_like_path),
        "headers" => v.is_object(),
        k => PARAM_KEYS.contains(&k) && v.is_object(),
    }
}

fn response_envelope_key(key: &str, v: &Value) -> bool {
    match key {
        "status" | "statusCode" | "status_code" => status_value(v).is_some(),
        "headers" => v.is_object(),
        _ => false,
    }
}

/// `body` wrapped in envelope keys only. A lone `body` is an envelope when
/// it holds an object; otherwise `body` is an ordinary payload field.
fn is_envelope(m: &Map<String, Value>, envelope_key: fn(&str, &Value) -> bool) -> bool {
    let Some(body) = m.get("body") else {
        return false;
    };
    let mut others = m.iter().filter(|(k, _)| k.as_str() != "body").peekable();
    if others.peek().is_none() {
        return body.is_object();
    }
    others.all(|(k, v)| envelope_key(k, v))
}

fn has_method_and_path(req: &Map<String, Value>) -> bool {
    let method = str_field(req, &["method", "verb"]).and_then(Verb::parse).is_some();
    let path = str_field(req, &["path", "url"]).is_some_and(looks_like_path);
    method && path
}

fn non_null(v: Option<&Value>) -> Option<Value> {
    v.filter(|v| !v.is_null()).cloned()
}

fn from_pair(root: &Map<String, Value>) -> Example {
    let mut method = str_field(root, &["method", "verb"]).and_then(Verb::parse);
    let mut path = str_field(root, &["path", "url", "route"]).map(str::to_string);
    let mut status = status_field(root);
    let mut params = None;

    let request = match root.get("request") {
        Some(Value::Object(req)) if has_method_and_path(req) || is_envelope(req, request_envelope_key) => {
            method = method.or_else(|| str_field(req, &["method", "verb"]).and_then(Verb::parse));
            path = path.or_else(|| str_field(req, &["path", "url"]).map(str::to_string));
            params = envelope_params(req);
            non_null(req.get("body"))
        }
        other => non_null(other),
    };

    let response = match root.get("response") {
        Some(Value::Object(resp)) if is_envelope(resp, response_envelope_key) => {
            status = status.or_else(|| status_field(resp));
            non_null(resp.get("body"))
        }
        other => non_null(other),
    };

    Example { request, response, params, method, path, status }
}

fn ignored_param(name: &str) -> bool {
    IGNORED_PARAMS.contains(&name.to_ascii_lowercase().as_str()) || is_header_like(name)
}

/// Path and query parameters of a request envelope, merged.
fn envelope_params(req: &Map<String, Value>) -> Option<Value> {
    let mut merged = Map::new();
    for key in PARAM_KEYS {
        if let Some(Value::Object(p)) = req.get(*key) {
            for (k, v) in p.iter().filter(|(k, _)| !ignored_param(k)) {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    (!merged.is_empty()).then_some(Value::Object(merged))
}

fn is_header_like(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("x-")
        || lower.starts_with("content-")
        || lower.starts_with("accept")
        || matches!(lower.as_str(), "authorization" | "if-match" | "if-none-match" | "ocp-apim-subscription-key")
}

fn from_spec_example(root: &Map<String, Value>) -> Example {
    let mut body = Map::new();
    let mut params = Map::new();
    if let Some(Value::Object(parameters)) = root.get("parameters") {
        for (k, v) in parameters.iter().filter(|(k, _)| !ignored_param(k)) {
            match v {
                // body parameter: its fields are the request payload
                Value::Object(fields) => {
                    for (bk, bv) in fields {
                        body.insert(bk.clone(), bv.clone());
                    }
                }
                other => {
                    params.insert(k.clone(), other.clone());
                }
            }
        }
    }

    let mut response = None;
    let mut status = None;
    if let Some(Value::Object(responses)) = root.get("responses") {
        let mut codes: Vec<(u16, &Value)> = responses
            .iter()
            .filter_map(|(code, v)| code.parse::<u16>().ok().map(|c| (c, v)))
            .filter(|(c, _)| (200..300).contains(c))
            .collect();
        codes.sort_by_key(|(c, _)| *c);
        if let Some((code, v)) = codes.first() {
            status = Some(*code);
            response = match v {
                Value::Object(r) => r.get("body").cloned(),
                _ => None,
            };
        }
    }

    Example {
        request: (!body.is_empty()).then_some(Value::Object(body)),
        response,
        params: (!params.is_empty()).then_some(Value::Object(params)),
        method: None,
        path: None,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_response_pair() {
        let ex = Example::parse(
            r#"{"request": {"id": "w1"}, "response": {"id": "w1", "name": "Gadget", "color": "red"}}"#,
        )
        .unwrap();
        assert_eq!(ex.request, Some(json!({"id": "w1"})));
        assert_eq!(ex.response, Some(json!({"id": "w1", "name": "Gadget", "color": "red"})));
        assert_eq!(ex.method, None);
    }

    #[test]
    fn envelope_with_method_path_and_status() {
        let ex = Example::parse(
            r#"{
              "request": {"method": "post", "path": "/widgets", "body": {"name": "Gadget"}, "query": {"dryRun": true}},
              "response": {"status": 201, "body": {"id": "w1"}}
            }"#,
        )
        .unwrap();
        assert_eq!(ex.method, Some(Verb::Post));
        assert_eq!(ex.path.as_deref(), Some("/widgets"));
        assert_eq!(ex.status, Some(201));
        assert_eq!(ex.request, Some(json!({"name": "Gadget"})));
        assert_eq!(ex.params, Some(json!({"dryRun": true})));
        assert_eq!(ex.response, Some(json!({"id": "w1"})));
    }

    #[test]
    fn body_field_in_a_payload_is_data() {
        let ex = Example::parse(
            r#"{"request": {"title": "Bug", "body": "It crashes"}, "response": {"id": 7, "title": "Bug", "body": "It crashes"}}"#,
        )
        .unwrap();
        assert_eq!(ex.request, Some(json!({"title": "Bug", "body": "It crashes"})));
        assert_eq!(ex.response, Some(json!({"id": 7, "title": "Bug", "body": "It crashes"})));

        // a lone text `body` is still a field, and `status: "open"` is not a status code
        let ex = Example::parse(r#"{"request": {"body": "hi"}, "response": {"status": "open", "body": "hi"}}"#).unwrap();
        assert_eq!(ex.request, Some(json!({"body": "hi"})));
        assert_eq!(ex.response, Some(json!({"status": "open", "body": "hi"})));
        assert_eq!(ex.status, None);

        // a lone object `body` is an envelope
        let ex = Example::parse(r#"{"request": {"body": {"title": "Bug"}}}"#).unwrap();
        assert_eq!(ex.request, Some(json!({"title": "Bug"})));
    }

    #[test]
    fn envelope_parameters_stay_out_of_the_body() {
        let ex = Example::parse(
            r#"{"request": {"method": "PUT", "path": "/widgets/w1", "params": {"id": "w1"},
                            "query": {"api-version": "2024"}, "body": {"name": "G"}}}"#,
        )
        .unwrap();
        assert_eq!(ex.request, Some(json!({"name": "G"})));
        assert_eq!(ex.params, Some(json!({"id": "w1"})));

        let ex = Example::parse(r#"{"request": {"method": "GET", "path": "/widgets/w1", "params": {"id": "w1"}}, "response": {"id": "w1"}}"#)
            .unwrap();
        assert_eq!(ex.request, None);
        assert_eq!(ex.params, Some(json!({"id": "w1"})));
    }

    #[test]
    fn plain_method_and_path_fields_are_data_when_not_an_envelope() {
        // a resource that happens to have a `method` field is still payload
        let ex = Example::parse(r#"{"request": {"method": "card", "amount": 5}}"#).unwrap();
        assert_eq!(ex.request, Some(json!({"method": "card", "amount": 5})));
        assert_eq!(ex.method, None);
    }

    #[test]
    fn response_only_example() {
        let ex = Example::parse(r#"{"response": {"items": [{"id": 1}]}}"#).unwrap();
        assert!(ex.request.is_none());
        assert!(ex.response.is_some());
    }

    #[test]
    fn azure_example_file_shape() {
        let ex = Example::parse(
            r#"{
              "title": "Get model",
              "operationId": "DocumentModels_GetModel",
              "parameters": {
                "endpoint": "https://myendpoint.cognitiveservices.azure.com",
                "api-version": "2024-11-30",
                "modelId": "myCustomModel",
                "x-ms-client-request-id": "abc",
                "body": {"urlSource": "https://host/doc.pdf"}
              },
              "responses": {
                "202": {"headers": {}},
                "200": {"body": {"modelId": "myCustomModel", "createdDateTime": "2021-09-24T12:54:35Z"}},
                "default": {"body": {"error": {}}}
              }
            }"#,
        )
        .unwrap();
        assert_eq!(ex.request, Some(json!({"urlSource": "https://host/doc.pdf"})));
        assert_eq!(ex.params, Some(json!({"modelId": "myCustomModel"})));
        assert_eq!(ex.status, Some(200));
        assert_eq!(
            ex.response,
            Some(json!({"modelId": "myCustomModel", "createdDateTime": "2021-09-24T12:54:35Z"}))
        );
    }

    #[test]
    fn bare_object_is_request_body() {
        let ex = Example::parse("name: Gadget\ncolor: red\n").unwrap();
        assert_eq!(ex.request, Some(json!({"name": "Gadget", "color": "red"})));
        assert!(ex.response.is_none());
    }

    #[test]
    fn malformed_inputs() {
        for bad in ["{not json", "[1, 2]", "42", "{}", r#"{"request": null, "response": {}}"#] {
            let err = Example::parse(bad).unwrap_err();
            assert!(matches!(err, FillError::MalformedExample(_)), "{bad}: {err}");
        }
    }
}
