//! YAML/JSON catalog document loader.
//!
//! ```yaml
//! models:
//!   Widget: { id: string, name: string, color: string }
//! operations:
//!   - name: getWidget
//!     verb: GET
//!     route: /widgets/{id}
//!     request: { id: string }
//!     response: Widget
//!     depends_on: [createWidget]
//! ```

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::{FillError, Result};
use crate::interface::{Field, FieldType, OperationDecl, RouteTemplate, ScalarKind, Schema, Verb};

#[derive(Debug, Deserialize)]
struct CatalogDoc {
    #[serde(default)]
    models:     Mapping,
    operations: Vec<RawOperation>,
}

#[derive(Debug, Deserialize)]
struct RawOperation {
    name: String,
    #[serde(alias = "method")]
    verb: String,
    #[serde(alias = "path")]
    route: String,
    #[serde(default)]
    request: Value,
    #[serde(default)]
    response: Value,
    #[serde(default, alias = "dependsOn", alias = "depends-on", alias = "requires")]
    depends_on: Vec<String>,
}

pub fn parse(text: &str) -> Result<Vec<OperationDecl>> {
    let doc: CatalogDoc = serde_yaml::from_str(text)
        .map_err(|e| FillError::MalformedInterface(format!("catalog document: {}", e)))?;

    let resolver = Resolver { models: &doc.models };
    let mut out = Vec::with_capacity(doc.operations.len());
    for raw in &doc.operations {
        let verb = Verb::parse(&raw.verb).ok_or_else(|| {
            FillError::MalformedInterface(format!("operation {}: unknown verb '{}'", raw.name, raw.verb))
        })?;
        let request = resolver
            .schema(&raw.request, &mut Vec::new())
            .map_err(|e| in_operation(&raw.name, "request", e))?;
        let response = resolver
            .schema(&raw.response, &mut Vec::new())
            .map_err(|e| in_operation(&raw.name, "response", e))?;
        out.push(OperationDecl {
            name: raw.name.clone(),
            verb,
            route: RouteTemplate::parse(&raw.route),
            request,
            response,
            depends_on: raw.depends_on.clone(),
        });
    }
    Ok(out)
}

fn in_operation(op: &str, side: &str, e: FillError) -> FillError {
    match e {
        FillError::MalformedInterface(msg) => {
            FillError::MalformedInterface(format!("operation {} {}: {}", op, side, msg))
        }
        other => other,
    }
}

struct Resolver<'a> {
    models: &'a Mapping,
}

impl Resolver<'_> {
    fn model(&self, name: &str) -> Option<&Value> {
        self.models.get(Value::String(name.to_string()))
    }

    /// A whole request/response: a mapping, a model name, or nothing.
    fn schema(&self, v: &Value, visiting: &mut Vec<String>) -> Result<Schema> {
        match v {
            Value::Null => Ok(Schema::new()),
            Value::Mapping(map) => self.fields(map, visiting),
            Value::String(name) if visiting.contains(name) => Err(FillError::MalformedInterface(format!(
                "recursive model alias {} -> {}",
                visiting.join(" -> "),
                name
            ))),
            Value::String(name) => match self.model(name) {
                Some(model) => self.model_schema(name, model, visiting),
                None => Err(FillError::MalformedInterface(format!("unknown model '{}'", name))),
            },
            Value::Sequence(items) if items.len() == 1 => self.schema(&items[0], visiting),
            other => Err(FillError::MalformedInterface(format!(
                "expected a field mapping or model name, found {:?}",
                other
            ))),
        }
    }

    fn model_schema(&self, name: &str, model: &Value, visiting: &mut Vec<String>) -> Result<Schema> {
        visiting.push(name.to_string());
        let s = self.schema(model, visiting);
        visiting.pop();
        s
    }

    fn fields(&self, map: &Mapping, visiting: &mut Vec<String>) -> Result<Schema> {
        let mut schema = Schema::new();
        for (k, v) in map {
            let key = k.as_str().ok_or_else(|| {
                FillError::MalformedInterface(format!("field names must be strings, found {:?}", k))
            })?;
            let (name, optional) = match key.strip_suffix('?') {
                Some(n) => (n.trim(), true),
                None    => (key.trim(), false),
            };
            let ty = self
                .field_type(v, visiting)
                .map_err(|e| match e {
                    FillError::MalformedInterface(msg) => {
                        FillError::MalformedInterface(format!("field {}: {}", name, msg))
                    }
                    other => other,
                })?;
            schema.insert(Field { name: name.to_string(), ty, optional });
        }
        Ok(schema)
    }

    fn field_type(&self, v: &Value, visiting: &mut Vec<String>) -> Result<FieldType> {
        match v {
            Value::Null => Ok(FieldType::Any),
            Value::String(s) => self.named_type(s.trim(), visiting),
            Value::Mapping(map) => Ok(FieldType::Object(self.fields(map, visiting)?)),
            Value::Sequence(items) => match items.as_slice() {
                []     => Ok(FieldType::Array(Box::new(FieldType::Any))),
                [item] => Ok(FieldType::Array(Box::new(self.field_type(item, visiting)?))),
                _ => Err(FillError::MalformedInterface(
                    "array types take exactly one element type".to_string(),
                )),
            },
            other => Err(FillError::MalformedInterface(format!(
                "field type must be a type name, mapping or one-element list, found {:?}",
                other
            ))),
        }
    }

    fn named_type(&self, name: &str, visiting: &mut Vec<String>) -> Result<FieldType> {
        if let Some(inner) = name.strip_suffix("[]") {
            return Ok(FieldType::Array(Box::new(self.named_type(inner.trim(), visiting)?)));
        }
        let name = name.trim_end_matches('?');
        if let Some(model) = self.model(name) {
            if visiting.iter().any(|v| v == name) {
                // recursive model: stop descending
                return Ok(FieldType::Any);
            }
            return Ok(FieldType::Object(self.model_schema(name, model, visiting)?));
        }
        if matches!(name, "any" | "object" | "unknown") {
            return Ok(FieldType::Any);
        }
        let kind = ScalarKind::from_name(name);
        if !kind.is_known() && name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return Err(FillError::MalformedInterface(format!("unknown model '{}'", name)));
        }
        Ok(FieldType::Scalar(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{load_catalog, InterfaceFormat};

    const WIDGETS: &str = r#"
models:
  Widget:
    id: string
    name: string
    color: string
    tags?: [string]
operations:
  - name: createWidget
    verb: POST
    route: /widgets
    request: { name: string, color: string }
    response: Widget
  - name: getWidget
    method: get
    path: /widgets/{id}
    request: { id: string }
    response: Widget
    depends_on: [createWidget]
"#;

    fn string() -> FieldType {
        FieldType::Scalar(ScalarKind::String)
    }

    #[test]
    fn loads_operations_with_model_references() {
        let cat = load_catalog(WIDGETS, InterfaceFormat::Catalog).unwrap();
        let get = cat.get("getWidget").unwrap();
        assert_eq!(get.verb, Verb::Get);
        assert_eq!(get.route.as_str(), "/widgets/{id}");
        let expected: Schema = vec![
            Field::new("id", string()),
            Field::new("name", string()),
            Field::new("color", string()),
            Field { name: "tags".into(), ty: FieldType::Array(Box::new(string())), optional: true },
        ]
        .into_iter()
        .collect();
        assert_eq!(get.response, expected);
        assert_eq!(get.request, vec![Field::new("id", string())].into_iter().collect());
        assert!(get.depends_on.contains("createWidget"));
    }

    #[test]
    fn json_documents_load_too() {
        let json = r#"{"operations": [{"name": "ping", "verb": "GET", "route": "/ping",
                       "response": {"ok": "boolean", "meta": {"ts": "utcDateTime"}}}]}"#;
        let cat = load_catalog(json, InterfaceFormat::Auto).unwrap();
        let ping = cat.get("ping").unwrap();
        assert!(ping.request.is_empty());
        let meta = ping.response.get("meta").unwrap().ty.object_schema().unwrap();
        assert_eq!(meta.get("ts").unwrap().ty, FieldType::Scalar(ScalarKind::DateTime));
        assert_eq!(ping.schema_size(), 3);
    }

    #[test]
    fn unknown_verb_is_malformed() {
        let doc = "operations:\n  - { name: a, verb: FETCH, route: /a }\n";
        let err = load_catalog(doc, InterfaceFormat::Catalog).unwrap_err();
        assert!(matches!(err, FillError::MalformedInterface(ref m) if m.contains("FETCH")), "{err}");
    }

    #[test]
    fn unknown_model_is_malformed() {
        let doc = "operations:\n  - { name: a, verb: GET, route: /a, response: Gizmo }\n";
        let err = load_catalog(doc, InterfaceFormat::Catalog).unwrap_err();
        assert!(err.to_string().contains("Gizmo"), "{err}");
    }

    #[test]
    fn garbage_is_malformed() {
        let err = load_catalog("operations: [[[", InterfaceFormat::Catalog).unwrap_err();
        assert!(matches!(err, FillError::MalformedInterface(_)));
    }

    #[test]
    fn recursive_models_terminate() {
        let doc = r#"
models:
  Node: { id: string, children: [Node] }
operations:
  - { name: tree, verb: GET, route: /tree, response: Node }
"#;
        let cat = load_catalog(doc, InterfaceFormat::Catalog).unwrap();
        let children = &cat.get("tree").unwrap().response.get("children").unwrap().ty;
        assert_eq!(*children, FieldType::Array(Box::new(FieldType::Any)));
    }

    #[test]
    fn alias_loops_are_malformed() {
        let doc = "models:\n  A: B\n  B: A\noperations:\n  - { name: a, verb: GET, route: /a, response: A }\n";
        match load_catalog(doc, InterfaceFormat::Catalog).unwrap_err() {
            FillError::MalformedInterface(msg) => {
                assert!(msg.contains("recursive model alias A -> B -> A"), "{msg}");
                assert!(msg.contains("operation a response"), "{msg}");
            }
            other => panic!("expected MalformedInterface, got {other:?}"),
        }

        // reached through a field as well
        let doc = "models:\n  W: { part: A }\n  A: B\n  B: A\noperations:\n  - { name: w, verb: GET, route: /w, response: W }\n";
        let err = load_catalog(doc, InterfaceFormat::Catalog).unwrap_err();
        assert_eq!(err.kind(), "MalformedInterfaceError");
    }

    #[test]
    fn cyclic_document_fails_to_load() {
        let doc = r#"
operations:
  - { name: a, verb: GET, route: /a, depends_on: [b] }
  - { name: b, verb: GET, route: /b, depends_on: [a] }
"#;
        let err = load_catalog(doc, InterfaceFormat::Catalog).unwrap_err();
        assert!(matches!(err, FillError::CyclicDependency { .. }));
    }
}
