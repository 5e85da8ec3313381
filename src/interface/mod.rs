//! # Interface Model
//!
//! Parses a service interface description into an [`InterfaceCatalog`]: the
//! declared operations with their verb, route template, request/response
//! schema and a validated dependency graph.
//!
//! Two source syntaxes are understood:
//! - a YAML/JSON catalog document (`operations:` list), see [`catalog_doc`]
//! - the TypeSpec subset used by `routes.tsp` service definitions, see [`typespec`]
//!
//! Both loaders produce [`OperationDecl`]s; [`InterfaceCatalog::build`] then
//! checks names, resolves dependencies (explicit or inferred from routes) and
//! rejects cycles.

pub mod catalog_doc;
pub mod graph;
pub mod typespec;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FillError, Result};
pub use graph::DependencyGraph;

// ─── Verb ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Verb {
    pub fn parse(s: &str) -> Option<Verb> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET"     => Some(Verb::Get),
            "POST"    => Some(Verb::Post),
            "PUT"     => Some(Verb::Put),
            "PATCH"   => Some(Verb::Patch),
            "DELETE"  => Some(Verb::Delete),
            "HEAD"    => Some(Verb::Head),
            "OPTIONS" => Some(Verb::Options),
            _         => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get     => "GET",
            Verb::Post    => "POST",
            Verb::Put     => "PUT",
            Verb::Patch   => "PATCH",
            Verb::Delete  => "DELETE",
            Verb::Head    => "HEAD",
            Verb::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Route template ──────────────────────────────────────────────────────────

/// Route such as `/widgets/{id}`. Parameters may also sit inside a segment
/// (`/models/{modelId}:analyze`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    raw: String,
}

impl RouteTemplate {
    pub fn parse(raw: &str) -> Self {
        let mut path = raw.trim().to_string();
        while path.contains("//") {
            path = path.replace("//", "/");
        }
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        if path.len() > 1 && path.ends_with('/') {
            path.pop();
        }
        Self { raw: path }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn segments(&self) -> Vec<&str> {
        self.raw.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Names of the `{param}` placeholders, in order.
    pub fn params(&self) -> Vec<String> {
        param_regex()
            .captures_iter(&self.raw)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim_start_matches(['+', '*']).to_string())
            .collect()
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params().iter().any(|p| p == name)
    }

    /// Append a `/{name}` segment (TypeSpec adds path params missing from the route).
    pub fn with_param(&self, name: &str) -> Self {
        RouteTemplate::parse(&format!("{}/{{{}}}", self.raw, name))
    }

    /// True when the last segment is exactly one `{param}`.
    pub fn ends_with_param(&self) -> bool {
        self.segments()
            .last()
            .map(|s| is_whole_param(s))
            .unwrap_or(false)
    }

    /// The route with its trailing `{param}` segment removed, if it has one.
    pub fn collection(&self) -> Option<RouteTemplate> {
        if !self.ends_with_param() {
            return None;
        }
        let segs = self.segments();
        Some(RouteTemplate::parse(&segs[..segs.len() - 1].join("/")))
    }

    /// Shape with parameter names erased, so `/w/{id}` and `/w/{widgetId}` compare equal.
    pub fn shape(&self) -> String {
        param_regex()
            .replace_all(&self.raw.to_ascii_lowercase(), "{}")
            .into_owned()
    }

    /// Does a concrete request path fit this template? Scheme, host, base path
    /// and query string of `path` are tolerated.
    pub fn matches_path(&self, path: &str) -> bool {
        let path = strip_origin(path);
        let path = path.split(['?', '#']).next().unwrap_or("");
        let concrete: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let template = self.segments();
        if template.is_empty() {
            return concrete.is_empty();
        }
        if concrete.len() < template.len() {
            return false;
        }
        let tail = &concrete[concrete.len() - template.len()..];
        template
            .iter()
            .zip(tail)
            .all(|(t, c)| segment_regex(t).map(|re| re.is_match(c)).unwrap_or(false))
    }
}

impl fmt::Display for RouteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

static PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("static regex"));

fn param_regex() -> &'static Regex {
    &PARAM_RE
}

fn is_whole_param(segment: &str) -> bool {
    segment.starts_with('{') && segment.ends_with('}') && segment.matches('{').count() == 1
}

fn segment_regex(segment: &str) -> Option<Regex> {
    let mut pattern = String::from("(?i)^");
    let mut last = 0;
    for m in param_regex().find_iter(segment) {
        pattern.push_str(&regex::escape(&segment[last..m.start()]));
        pattern.push_str("[^/]+");
        last = m.end();
    }
    pattern.push_str(&regex::escape(&segment[last..]));
    pattern.push('$');
    Regex::new(&pattern).ok()
}

fn strip_origin(path: &str) -> &str {
    match path.find("://") {
        Some(i) => {
            let rest = &path[i + 3..];
            rest.find('/').map(|j| &rest[j..]).unwrap_or("/")
        }
        None => path,
    }
}

// ─── Schema ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Integer,
    Number,
    Boolean,
    DateTime,
    Unknown(String),
}

impl ScalarKind {
    pub fn from_name(name: &str) -> ScalarKind {
        match name.to_ascii_lowercase().as_str() {
            "string" | "str" | "url" | "uuid" | "bytes" | "text" | "email" => ScalarKind::String,
            "int" | "integer" | "int8" | "int16" | "int32" | "int64" | "uint8" | "uint16"
            | "uint32" | "uint64" | "safeint" | "long" => ScalarKind::Integer,
            "number" | "float" | "float32" | "float64" | "double" | "decimal" | "decimal128"
            | "numeric" => ScalarKind::Number,
            "bool" | "boolean" => ScalarKind::Boolean,
            "utcdatetime" | "offsetdatetime" | "plaindate" | "plaintime" | "datetime" | "date"
            | "time" | "duration" | "timestamp" => ScalarKind::DateTime,
            _ => ScalarKind::Unknown(name.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ScalarKind::Unknown(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Scalar(ScalarKind),
    Object(Schema),
    Array(Box<FieldType>),
    Any,
}

impl FieldType {
    /// Object schema of this field, looking through arrays.
    pub fn object_schema(&self) -> Option<&Schema> {
        match self {
            FieldType::Object(s)    => Some(s),
            FieldType::Array(inner) => inner.object_schema(),
            _                       => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name:     String,
    pub ty:       FieldType,
    pub optional: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self { name: name.into(), ty, optional: false }
    }
}

/// Ordered field list; field names are unique within one schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing an earlier one with the same name in place.
    pub fn insert(&mut self, field: Field) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None           => self.fields.push(field),
        }
    }

    pub fn extend(&mut self, other: Schema) {
        for f in other.fields {
            self.insert(f);
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields at every depth.
    pub fn field_count(&self) -> usize {
        self.fields
            .iter()
            .map(|f| 1 + f.ty.object_schema().map(|s| s.field_count()).unwrap_or(0))
            .sum()
    }
}

impl FromIterator<Field> for Schema {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        let mut s = Schema::new();
        for f in iter {
            s.insert(f);
        }
        s
    }
}

// ─── Operations & catalog ────────────────────────────────────────────────────

/// An operation as declared by a loader, before dependency resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDecl {
    pub name:       String,
    pub verb:       Verb,
    pub route:      RouteTemplate,
    pub request:    Schema,
    pub response:   Schema,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name:       String,
    pub verb:       Verb,
    pub route:      RouteTemplate,
    pub request:    Schema,
    pub response:   Schema,
    pub depends_on: BTreeSet<String>,
    /// False when `depends_on` came from route inference.
    pub explicit_dependencies: bool,
}

impl Operation {
    /// Total request + response field count, the "specificity" tie-breaker.
    pub fn schema_size(&self) -> usize {
        self.request.field_count() + self.response.field_count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum InterfaceFormat {
    #[default]
    Auto,
    /// YAML/JSON `operations:` document
    Catalog,
    /// TypeSpec service definition
    Typespec,
}

#[derive(Debug, Clone)]
pub struct InterfaceCatalog {
    operations: Vec<Operation>,
    index:      BTreeMap<String, usize>,
    graph:      DependencyGraph,
}

impl InterfaceCatalog {
    /// Validate declarations and build the catalog:
    /// - at least one operation, unique names
    /// - dependencies reference declared operations (short names resolve to a
    ///   unique qualified `Interface.name`)
    /// - undeclared dependencies inferred from routes
    /// - acyclic
    pub fn build(decls: Vec<OperationDecl>) -> Result<Self> {
        if decls.is_empty() {
            return Err(FillError::MalformedInterface(
                "interface declares no operations".to_string(),
            ));
        }

        let mut index = BTreeMap::new();
        for (i, d) in decls.iter().enumerate() {
            if d.name.trim().is_empty() {
                return Err(FillError::MalformedInterface(format!(
                    "operation #{} has an empty name",
                    i + 1
                )));
            }
            if index.insert(d.name.clone(), i).is_some() {
                return Err(FillError::MalformedInterface(format!(
                    "duplicate operation name: {}",
                    d.name
                )));
            }
        }

        let mut operations = Vec::with_capacity(decls.len());
        for d in &decls {
            let mut deps = BTreeSet::new();
            for dep in &d.depends_on {
                deps.insert(resolve_name(&index, dep).ok_or_else(|| {
                    FillError::MalformedInterface(format!(
                        "operation {} depends on unknown operation {}",
                        d.name, dep
                    ))
                })?);
            }
            operations.push(Operation {
                name:       d.name.clone(),
                verb:       d.verb,
                route:      d.route.clone(),
                request:    d.request.clone(),
                response:   d.response.clone(),
                explicit_dependencies: !deps.is_empty(),
                depends_on: deps,
            });
        }

        graph::infer_dependencies(&mut operations);
        let graph = DependencyGraph::build(&operations)?;

        tracing::debug!(
            operations = operations.len(),
            edges = graph.edge_count(),
            "interface catalog built"
        );
        Ok(Self { operations, index, graph })
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.index.get(name).map(|&i| &self.operations[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Resolve a name as written in a script: exact, case-insensitive, or the
    /// short name of a unique qualified operation.
    pub fn resolve(&self, name: &str) -> Option<&Operation> {
        if let Some(op) = self.get(name) {
            return Some(op);
        }
        let ci: Vec<&Operation> = self
            .operations
            .iter()
            .filter(|o| o.name.eq_ignore_ascii_case(name))
            .collect();
        if ci.len() == 1 {
            return Some(ci[0]);
        }
        resolve_name(&self.index, name).and_then(|n| self.get(&n))
    }

    pub fn dependencies_of(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.get(name).map(|o| &o.depends_on)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Operation names with dependencies before dependents, ties in declaration order.
    pub fn topological_order(&self) -> Vec<&str> {
        self.graph.topological_order()
    }
}

fn resolve_name(index: &BTreeMap<String, usize>, name: &str) -> Option<String> {
    if index.contains_key(name) {
        return Some(name.to_string());
    }
    let suffix = format!(".{}", name);
    let hits: Vec<&String> = index.keys().filter(|k| k.ends_with(&suffix)).collect();
    match hits.as_slice() {
        [one] => Some((*one).clone()),
        _     => None,
    }
}

/// Parse an interface description in the given (or detected) syntax.
pub fn load_catalog(text: &str, format: InterfaceFormat) -> Result<InterfaceCatalog> {
    let format = match format {
        InterfaceFormat::Auto => detect_format(text),
        f => f,
    };
    tracing::debug!(?format, "loading interface description");
    let decls = match format {
        InterfaceFormat::Typespec => typespec::parse(text)?,
        _ => catalog_doc::parse(text)?,
    };
    InterfaceCatalog::build(decls)
}

static CATALOG_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^operations\s*:").expect("static regex"));
static TYPESPEC_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:@route\b|model\s+\w|op\s+\w|namespace\s+\w|interface\s+\w|import\s+")"#)
        .expect("static regex")
});

fn detect_format(text: &str) -> InterfaceFormat {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') {
        return InterfaceFormat::Catalog;
    }
    if CATALOG_HINT.is_match(text) {
        InterfaceFormat::Catalog
    } else if TYPESPEC_HINT.is_match(text) {
        InterfaceFormat::Typespec
    } else {
        InterfaceFormat::Catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, verb: Verb, route: &str, deps: &[&str]) -> OperationDecl {
        OperationDecl {
            name:       name.to_string(),
            verb,
            route:      RouteTemplate::parse(route),
            request:    Schema::new(),
            response:   Schema::new(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn route_matching_tolerates_base_url_and_query() {
        let r = RouteTemplate::parse("/widgets/{id}");
        assert!(r.matches_path("/widgets/w1"));
        assert!(r.matches_path("https://api.example.com/v2/widgets/w1?x=1"));
        assert!(r.matches_path("/widgets/w1/"));
        assert!(!r.matches_path("/widgets"));
        assert!(!r.matches_path("/gadgets/w1"));
    }

    #[test]
    fn route_matching_handles_params_inside_segment() {
        let r = RouteTemplate::parse("/documentModels/{modelId}:analyze");
        assert!(r.matches_path("/documentModels/prebuilt-invoice:analyze"));
        assert!(!r.matches_path("/documentModels/prebuilt-invoice"));
    }

    #[test]
    fn route_collection_and_shape() {
        let r = RouteTemplate::parse("widgets/{widgetId}/");
        assert_eq!(r.as_str(), "/widgets/{widgetId}");
        assert_eq!(r.params(), vec!["widgetId".to_string()]);
        assert_eq!(r.collection().unwrap().as_str(), "/widgets");
        assert_eq!(r.shape(), RouteTemplate::parse("/Widgets/{id}").shape());
        assert!(RouteTemplate::parse("/widgets").collection().is_none());
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = InterfaceCatalog::build(vec![
            decl("a", Verb::Get, "/a", &[]),
            decl("a", Verb::Post, "/a", &[]),
        ])
        .unwrap_err();
        assert!(matches!(err, FillError::MalformedInterface(_)));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let err = InterfaceCatalog::build(vec![decl("a", Verb::Get, "/a", &["ghost"])]).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn short_dependency_name_resolves_to_qualified() {
        let cat = InterfaceCatalog::build(vec![
            decl("Widgets.create", Verb::Post, "/widgets", &[]),
            decl("Widgets.list", Verb::Get, "/widgets", &["create"]),
        ])
        .unwrap();
        let deps = cat.dependencies_of("Widgets.list").unwrap();
        assert!(deps.contains("Widgets.create"));
        assert_eq!(cat.resolve("create").unwrap().name, "Widgets.create");
    }

    #[test]
    fn empty_catalog_rejected() {
        assert!(matches!(
            InterfaceCatalog::build(vec![]),
            Err(FillError::MalformedInterface(_))
        ));
    }

    #[test]
    fn schema_insert_replaces_in_place() {
        let mut s: Schema = vec![
            Field::new("a", FieldType::Scalar(ScalarKind::String)),
            Field::new("b", FieldType::Scalar(ScalarKind::String)),
        ]
        .into_iter()
        .collect();
        s.insert(Field::new("a", FieldType::Scalar(ScalarKind::Integer)));
        assert_eq!(s.fields()[0].ty, FieldType::Scalar(ScalarKind::Integer));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn format_detection() {
        assert_eq!(detect_format("operations:\n  - name: a"), InterfaceFormat::Catalog);
        assert_eq!(detect_format("{\"operations\": []}"), InterfaceFormat::Catalog);
        assert_eq!(
            detect_format("import \"@typespec/http\";\n@route(\"/w\")\nnamespace W;"),
            InterfaceFormat::Typespec
        );
    }
}
