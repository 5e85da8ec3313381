//! Script patching: write one example into one invocation's data slots.
//!
//! Only slot bodies are replaced, bottom-up so earlier byte offsets stay
//! valid. Every byte outside them is copied through unchanged.

use std::ops::Range;
use std::path::Path;

use serde_json::Value;

use crate::error::{FillError, Result};
use crate::example::{carries_data, Example};
use crate::interface::InterfaceCatalog;
use crate::script::literal;
use crate::script::{DraftScript, ScriptInvocation, SlotKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptSyntax {
    /// Validated with the bash grammar whenever the draft itself parses cleanly.
    #[default]
    Shell,
    /// Not validated.
    Other,
}

impl ScriptSyntax {
    pub fn detect(file_name: Option<&str>, text: &str) -> Self {
        let ext = file_name
            .and_then(|n| Path::new(n).extension())
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("sh" | "bash" | "zsh" | "ksh") => return ScriptSyntax::Shell,
            Some("py" | "js" | "mjs" | "cjs" | "ts" | "rb" | "ps1" | "http" | "rest") => {
                return ScriptSyntax::Other
            }
            _ => {}
        }
        match text.lines().next() {
            Some(first) if first.starts_with("#!") && !first.contains("sh") => ScriptSyntax::Other,
            _ => ScriptSyntax::Shell,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatchOptions {
    pub syntax: ScriptSyntax,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchReport {
    /// Canonical operation name.
    pub operation:       String,
    /// Marker line of the patched invocation.
    pub invocation_line: usize,
    pub written:         Vec<SlotKind>,
    /// Example sides the invocation has no slot for.
    pub skipped:         Vec<SlotKind>,
    /// False when the script already held exactly this data.
    pub changed:         bool,
}

#[derive(Debug, Clone)]
pub struct Patched {
    pub text:   String,
    pub report: PatchReport,
}

fn example_sides(example: &Example) -> Vec<(SlotKind, &Value)> {
    let mut sides = Vec::with_capacity(2);
    if let Some(v) = example.request.as_ref().filter(|v| carries_data(v)) {
        sides.push((SlotKind::Request, v));
    }
    if let Some(v) = example.response.as_ref().filter(|v| carries_data(v)) {
        sides.push((SlotKind::Response, v));
    }
    sides
}

/// Canonical catalog name of every invocation, in script order.
pub fn bind<'c>(draft: &DraftScript<'_>, catalog: &'c InterfaceCatalog) -> Result<Vec<&'c str>> {
    draft
        .invocations()
        .iter()
        .map(|inv| {
            for guard in &inv.requires {
                if catalog.resolve(guard).is_none() {
                    tracing::warn!(operation = %inv.operation, guard = %guard, line = inv.line,
                        "dependency guard names an undeclared operation");
                }
            }
            catalog
                .resolve(&inv.operation)
                .map(|op| op.name.as_str())
                .ok_or_else(|| FillError::UnknownOperation {
                    operation: inv.operation.clone(),
                    line:      inv.line,
                })
        })
        .collect()
}

/// `(line, operation, dependency)` for every catalog dependency that has no
/// earlier invocation in the script.
pub fn missing_predecessors<'c>(
    draft: &DraftScript<'_>,
    catalog: &'c InterfaceCatalog,
    bound: &[&'c str],
) -> Vec<(usize, &'c str, &'c str)> {
    let mut out = Vec::new();
    for (i, name) in bound.iter().enumerate() {
        for dep in catalog.graph().depends_on(name) {
            if !bound[..i].contains(&dep) {
                out.push((draft.invocations()[i].line, *name, dep));
            }
        }
    }
    out
}

fn holds_example(inv: &ScriptInvocation, sides: &[(SlotKind, &Value)]) -> bool {
    let mut compared = 0;
    for (kind, value) in sides {
        if let Some(slot) = inv.slot(*kind) {
            if slot.json().as_ref() != Some(*value) {
                return false;
            }
            compared += 1;
        }
    }
    compared > 0
}

/// Pick the invocation to patch among those bound to `operation`.
fn select_invocation(
    draft: &DraftScript<'_>,
    bound: &[&str],
    operation: &str,
    sides: &[(SlotKind, &Value)],
) -> Result<usize> {
    let invs = draft.invocations();
    let matching: Vec<usize> = (0..invs.len()).filter(|&i| bound[i] == operation).collect();

    match matching.as_slice() {
        [] => Err(FillError::OperationNotInScript {
            operation: operation.to_string(),
            invoked:   draft.invoked_operations(),
        }),
        [one] => Ok(*one),
        _ => {
            // re-running with the same example finds its own earlier output
            if let Some(&i) = matching.iter().find(|&&i| holds_example(&invs[i], sides)) {
                return Ok(i);
            }
            let kinds: Vec<SlotKind> = sides.iter().map(|(k, _)| *k).collect();
            let placeholders: Vec<usize> = matching
                .iter()
                .copied()
                .filter(|&i| invs[i].awaits(&kinds))
                .collect();
            match placeholders.as_slice() {
                [one] => Ok(*one),
                [] => Err(FillError::NoPlaceholder {
                    operation: operation.to_string(),
                    count:     matching.len(),
                }),
                many => Err(FillError::MultiplePlaceholders {
                    operation: operation.to_string(),
                    count:     many.len(),
                    lines:     many.iter().map(|&i| invs[i].line).collect(),
                }),
            }
        }
    }
}

/// Patch the invocation of `operation` with the example's data.
pub fn patch(
    draft: &DraftScript<'_>,
    catalog: &InterfaceCatalog,
    operation: &str,
    example: &Example,
    opts: &PatchOptions,
) -> Result<Patched> {
    let text = draft.text();
    let bound = bind(draft, catalog)?;
    for (line, op, dep) in missing_predecessors(draft, catalog, &bound) {
        tracing::warn!(operation = op, dependency = dep, line, "dependency has no earlier invocation in the script");
    }

    let sides = example_sides(example);
    let target = select_invocation(draft, &bound, operation, &sides)?;
    let inv = &draft.invocations()[target];

    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    let mut written = Vec::new();
    let mut skipped = Vec::new();
    for (kind, value) in &sides {
        match inv.slot(*kind) {
            Some(slot) => {
                let lit = &slot.literal;
                let rendered = literal::render(value, &lit.quoting, lit.is_multiline(text), &lit.indent(text));
                edits.push((lit.body.clone(), rendered));
                written.push(*kind);
            }
            None => {
                tracing::warn!(operation, line = inv.line, side = kind.as_str(),
                    "invocation has no slot for this side of the example");
                skipped.push(*kind);
            }
        }
    }
    if edits.is_empty() {
        return Err(FillError::NoDataSlot { operation: operation.to_string(), line: inv.line });
    }

    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut patched = text.to_string();
    for (range, replacement) in edits {
        patched.replace_range(range, &replacement);
    }

    if opts.syntax == ScriptSyntax::Shell {
        validate_shell(operation, inv.line, text, &patched)?;
    }

    let changed = patched != text;
    tracing::info!(operation, line = inv.line, changed, "invocation patched");
    Ok(Patched {
        report: PatchReport {
            operation: operation.to_string(),
            invocation_line: inv.line,
            written,
            skipped,
            changed,
        },
        text: patched,
    })
}

/// Reject a patch that breaks a draft which parsed cleanly before.
fn validate_shell(operation: &str, block_line: usize, before: &str, after: &str) -> Result<()> {
    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&tree_sitter_bash::LANGUAGE.into()).is_err() {
        tracing::warn!("bash grammar unavailable; skipping syntax check");
        return Ok(());
    }
    match parser.parse(before, None) {
        Some(tree) if !tree.root_node().has_error() => {}
        _ => {
            tracing::debug!("draft does not parse as bash; skipping syntax check");
            return Ok(());
        }
    }
    if let Some(tree) = parser.parse(after, None) {
        if tree.root_node().has_error() {
            return Err(FillError::PatchSyntax {
                operation: operation.to_string(),
                errors:    syntax_errors(tree.root_node(), after, operation, block_line),
            });
        }
    }
    Ok(())
}

/// One line per ERROR or MISSING node, outermost only.
fn syntax_errors(root: tree_sitter::Node, source: &str, operation: &str, block_line: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_missing() || node.is_error() {
            let at = node.start_position();
            let what = if node.is_missing() {
                format!("missing `{}`", node.kind())
            } else {
                let text = source.get(node.byte_range()).unwrap_or_default();
                let first: String = text.lines().next().unwrap_or_default().trim().chars().take(40).collect();
                format!("unexpected `{}`", first)
            };
            out.push(format!(
                "{} (block at line {}): {} at {}:{}",
                operation,
                block_line,
                what,
                at.row + 1,
                at.column + 1
            ));
        }
        if !node.is_error() && cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return out;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{load_catalog, InterfaceFormat};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const CATALOG: &str = r#"
models:
  Widget: { id: string, name: string, color: string }
operations:
  - { name: createWidget, verb: POST, route: /widgets, request: { name: string, color: string }, response: Widget }
  - { name: getWidget, verb: GET, route: "/widgets/{id}", request: { id: string }, response: Widget }
  - { name: updateWidget, verb: PUT, route: "/widgets/{id}", request: { id: string, name: string, color: string }, response: Widget }
"#;

    const DRAFT: &str = r#"#!/usr/bin/env bash
set -euo pipefail

# operation: createWidget
CREATE_REQUEST='{"name": "<name>", "color": "<color>"}'
WIDGET_ID=$(curl -s -X POST "$BASE/widgets" -d "$CREATE_REQUEST" | jq -r .id)

# operation: getWidget
# requires: createWidget
EXPECTED_RESPONSE='TODO'
curl -s "$BASE/widgets/$WIDGET_ID" | jq -e --argjson want "$EXPECTED_RESPONSE" '. == $want'

# operation: updateWidget
# requires: getWidget
UPDATE_BODY='{}'
curl -s -X PUT "$BASE/widgets/$WIDGET_ID" -d "$UPDATE_BODY"
"#;

    fn catalog() -> InterfaceCatalog {
        load_catalog(CATALOG, InterfaceFormat::Catalog).unwrap()
    }

    fn example(v: Value) -> Example {
        Example::from_value(v).unwrap()
    }

    fn run(text: &str, operation: &str, ex: &Example) -> Result<Patched> {
        let draft = DraftScript::parse(text);
        patch(&draft, &catalog(), operation, ex, &PatchOptions::default())
    }

    fn get_widget_example() -> Example {
        example(json!({
            "request": {"id": "w1"},
            "response": {"id": "w1", "name": "Gadget", "color": "red"}
        }))
    }

    #[test]
    fn patches_only_the_matched_invocation() {
        let out = run(DRAFT, "getWidget", &get_widget_example()).unwrap();
        let expected = DRAFT.replace(
            "EXPECTED_RESPONSE='TODO'",
            r#"EXPECTED_RESPONSE='{"id":"w1","name":"Gadget","color":"red"}'"#,
        );
        assert_eq!(out.text, expected);
        assert_eq!(out.report.written, vec![SlotKind::Response]);
        assert_eq!(out.report.skipped, vec![SlotKind::Request]);
        assert_eq!(out.report.invocation_line, 8);
        assert!(out.report.changed);
    }

    #[test]
    fn patching_twice_is_byte_identical() {
        let ex = get_widget_example();
        let once = run(DRAFT, "getWidget", &ex).unwrap();
        let twice = run(&once.text, "getWidget", &ex).unwrap();
        assert_eq!(twice.text, once.text);
        assert!(!twice.report.changed);
    }

    #[test]
    fn two_placeholder_invocations_are_rejected() {
        let text = "# operation: createWidget\nREQUEST='{}'\n\n# operation: createWidget\nREQUEST='TODO'\n";
        let err = run(text, "createWidget", &example(json!({"name": "Gadget", "color": "red"}))).unwrap_err();
        match err {
            FillError::MultiplePlaceholders { count, lines, .. } => {
                assert_eq!(count, 2);
                assert_eq!(lines, vec![1, 4]);
            }
            other => panic!("expected MultiplePlaceholders, got {other:?}"),
        }
    }

    #[test]
    fn the_single_placeholder_among_repeats_is_chosen_and_stays_chosen() {
        let text = "# operation: createWidget\nREQUEST='{\"name\":\"first\",\"color\":\"blue\"}'\n\n# operation: createWidget\nREQUEST='TODO'\n";
        let ex = example(json!({"name": "Gadget", "color": "red"}));
        let once = run(text, "createWidget", &ex).unwrap();
        assert_eq!(
            once.text,
            "# operation: createWidget\nREQUEST='{\"name\":\"first\",\"color\":\"blue\"}'\n\n# operation: createWidget\nREQUEST='{\"name\":\"Gadget\",\"color\":\"red\"}'\n"
        );
        assert_eq!(once.report.invocation_line, 4);
        let twice = run(&once.text, "createWidget", &ex).unwrap();
        assert_eq!(twice.text, once.text);
    }

    #[test]
    fn repeat_sending_a_variable_is_not_a_placeholder() {
        let text = "# operation: createWidget\nREQUEST='TODO'\n\n# operation: createWidget\ncurl -X POST \"$BASE/widgets\" -d \"$OTHER\"\n";
        let out = run(text, "createWidget", &example(json!({"name": "Gadget"}))).unwrap();
        assert_eq!(out.report.invocation_line, 1);
        assert_eq!(
            out.text,
            "# operation: createWidget\nREQUEST='{\"name\":\"Gadget\"}'\n\n# operation: createWidget\ncurl -X POST \"$BASE/widgets\" -d \"$OTHER\"\n"
        );
    }

    #[test]
    fn placeholder_only_on_the_side_the_example_lacks_does_not_count() {
        // second block waits for a response, but the example only has a request
        let text = "# operation: createWidget\nREQUEST='TODO'\n\n# operation: createWidget\nREQUEST='{\"name\":\"a\"}'\nEXPECTED='TODO'\n";
        let out = run(text, "createWidget", &example(json!({"name": "Gadget"}))).unwrap();
        assert_eq!(out.report.invocation_line, 1);
    }

    #[test]
    fn repeats_without_placeholder_are_rejected() {
        let text = "# operation: createWidget\nREQUEST='{\"name\":\"a\"}'\n# operation: createWidget\nREQUEST='{\"name\":\"b\"}'\n";
        let err = run(text, "createWidget", &example(json!({"name": "c"}))).unwrap_err();
        assert!(matches!(err, FillError::NoPlaceholder { count: 2, .. }), "{err}");
    }

    #[test]
    fn operation_missing_from_script() {
        let err = run("# operation: createWidget\nREQUEST='{}'\n", "getWidget", &get_widget_example()).unwrap_err();
        match err {
            FillError::OperationNotInScript { operation, invoked } => {
                assert_eq!(operation, "getWidget");
                assert_eq!(invoked, vec!["createWidget".to_string()]);
            }
            other => panic!("expected OperationNotInScript, got {other:?}"),
        }
    }

    #[test]
    fn unknown_operation_in_script() {
        let text = "# operation: createWidget\nREQUEST='{}'\n# operation: frobnicate\n";
        let err = run(text, "createWidget", &example(json!({"name": "x"}))).unwrap_err();
        assert!(matches!(err, FillError::UnknownOperation { ref operation, line: 3 } if operation == "frobnicate"));
    }

    #[test]
    fn invocation_without_slots() {
        let text = "# operation: getWidget\ncurl -s \"$BASE/widgets/w1\"\n";
        let err = run(text, "getWidget", &get_widget_example()).unwrap_err();
        assert!(matches!(err, FillError::NoDataSlot { line: 1, .. }), "{err}");
    }

    #[test]
    fn curl_data_argument_is_patched_in_place() {
        let text = "# operation: createWidget\ncurl -s -X POST \"$BASE/widgets\" \\\n  -H 'Content-Type: application/json' \\\n  -d '{\"name\": \"TODO\"}'\n";
        let out = run(text, "createWidget", &example(json!({"name": "Gadget", "color": "red"}))).unwrap();
        assert_eq!(
            out.text,
            "# operation: createWidget\ncurl -s -X POST \"$BASE/widgets\" \\\n  -H 'Content-Type: application/json' \\\n  -d '{\"name\":\"Gadget\",\"color\":\"red\"}'\n"
        );
    }

    #[test]
    fn heredoc_is_pretty_printed_with_its_indent() {
        let text = "# operation: createWidget\nREQUEST_BODY=$(cat <<EOF\n  TODO\nEOF\n)\n";
        let ex = example(json!({"name": "Gadget", "price": "$5"}));
        let out = run(text, "createWidget", &ex).unwrap();
        assert_eq!(
            out.text,
            "# operation: createWidget\nREQUEST_BODY=$(cat <<EOF\n  {\n    \"name\": \"Gadget\",\n    \"price\": \"\\$5\"\n  }\nEOF\n)\n"
        );
        assert_eq!(run(&out.text, "createWidget", &ex).unwrap().text, out.text);
    }

    #[test]
    fn qualified_and_case_variant_names_bind() {
        let draft = DraftScript::parse("# operation: CreateWidget\nREQUEST='{}'\n");
        let cat = catalog();
        assert_eq!(bind(&draft, &cat).unwrap(), vec!["createWidget"]);
    }

    #[test]
    fn reports_dependencies_without_earlier_invocation() {
        let text = "# operation: getWidget\nEXPECTED='{}'\n# operation: createWidget\nREQUEST='{}'\n";
        let draft = DraftScript::parse(text);
        let cat = catalog();
        let bound = bind(&draft, &cat).unwrap();
        assert_eq!(missing_predecessors(&draft, &cat, &bound), vec![(1, "getWidget", "createWidget")]);
    }

    #[test]
    fn broken_patch_is_reported_with_tree_sitter_errors() {
        assert!(validate_shell("x", 1, "echo ok\n", "echo ok\n").is_ok());
        let err = validate_shell("createWidget", 4, "echo ok\n", "if [ -n \"$X\" ]; then\n  echo x\n").unwrap_err();
        match err {
            FillError::PatchSyntax { operation, errors } => {
                assert_eq!(operation, "createWidget");
                assert!(!errors.is_empty());
                assert!(errors.iter().all(|e| e.starts_with("createWidget (block at line 4): ")), "{errors:?}");
            }
            other => panic!("expected PatchSyntax, got {other:?}"),
        }
        // a draft that never parsed is not held against the patch
        assert!(validate_shell("x", 1, "if then fi fi (\n", "if then fi fi (\n").is_ok());
    }

    #[test]
    fn syntax_detection() {
        assert_eq!(ScriptSyntax::detect(Some("smoke.sh"), ""), ScriptSyntax::Shell);
        assert_eq!(ScriptSyntax::detect(Some("smoke.test.js"), ""), ScriptSyntax::Other);
        assert_eq!(ScriptSyntax::detect(None, "#!/usr/bin/env python3\n"), ScriptSyntax::Other);
        assert_eq!(ScriptSyntax::detect(None, "#!/bin/bash\n"), ScriptSyntax::Shell);
        assert_eq!(ScriptSyntax::detect(None, "# operation: a\n"), ScriptSyntax::Shell);
    }
}
