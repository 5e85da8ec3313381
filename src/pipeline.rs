//! # Orchestrator
//!
//! load interface → ingest example → match → patch. Linear; the first
//! failure aborts the run and is returned unchanged, so a failed run
//! produces no script.

use crate::config::InferenceConfig;
use crate::error::{FillError, Result};
use crate::example::Example;
use crate::inference::{self, Completion};
use crate::interface::{load_catalog, InterfaceCatalog, InterfaceFormat, Operation};
use crate::matcher::{self, MatchOutcome, MatchWeights, Resolution, ScoreBreakdown};
use crate::script::{self, DraftScript, PatchOptions, PatchReport, ScriptSyntax};

/// Already-read input texts; file discovery happens outside the core.
#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a> {
    pub interface:        &'a str,
    pub interface_format: InterfaceFormat,
    pub example:          &'a str,
    pub script:           &'a str,
    /// File name of the draft, used to pick the syntax check.
    pub script_name:      Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub weights:   MatchWeights,
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub name:  String,
    pub score: ScoreBreakdown,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub patched:    String,
    pub operation:  String,
    pub resolution: Resolution,
    /// Every candidate, best first.
    pub scores:     Vec<CandidateScore>,
    pub report:     PatchReport,
}

pub fn scores_of(outcome: &MatchOutcome<'_>) -> Vec<CandidateScore> {
    outcome
        .ranked
        .iter()
        .map(|c| CandidateScore { name: c.name().to_string(), score: c.score })
        .collect()
}

/// Match, consulting the inference assist only to break a tie.
pub fn match_example<'a>(
    catalog: &'a InterfaceCatalog,
    example: &Example,
    opts: &RunOptions,
    completion: Option<&dyn Completion>,
) -> Result<MatchOutcome<'a>> {
    let ranked = matcher::rank(catalog, example, &opts.weights);
    match matcher::select(ranked.clone(), &opts.weights) {
        Err(FillError::AmbiguousMatch { tied, score }) => {
            let Some(completion) = completion.filter(|_| opts.inference.enabled) else {
                return Err(FillError::AmbiguousMatch { tied, score });
            };
            let tied_ops: Vec<&Operation> = tied.iter().filter_map(|n| catalog.get(n)).collect();
            let picked = inference::resolve_ambiguity(completion, example, &tied_ops, &opts.inference)?;
            picked
                .and_then(|op| matcher::choose(ranked, &op.name))
                .ok_or(FillError::AmbiguousMatch { tied, score })
        }
        other => other,
    }
}

pub fn run(inputs: &Inputs<'_>, opts: &RunOptions, completion: Option<&dyn Completion>) -> Result<RunOutcome> {
    let catalog = load_catalog(inputs.interface, inputs.interface_format)?;
    tracing::info!(operations = catalog.operations().len(), "interface loaded");

    let example = Example::parse(inputs.example)?;
    let matched = match_example(&catalog, &example, opts, completion)?;
    let operation = matched.selected.operation.name.clone();

    let draft = DraftScript::parse(inputs.script);
    let patch_opts = PatchOptions { syntax: ScriptSyntax::detect(inputs.script_name, inputs.script) };
    let patched = script::patch(&draft, &catalog, &operation, &example, &patch_opts)?;

    Ok(RunOutcome {
        patched:    patched.text,
        operation,
        resolution: matched.resolution,
        scores:     scores_of(&matched),
        report:     patched.report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::fake::ScriptedCompletion;
    use pretty_assertions::assert_eq;

    const CATALOG: &str = r#"
models:
  Widget: { id: string, name: string, color: string }
operations:
  - name: CreateWidget
    verb: POST
    route: /widgets
    request: { name: string, color: string }
    response: Widget
  - name: GetWidget
    verb: GET
    route: /widgets/{id}
    request: { id: string }
    response: Widget
  - name: UpdateWidget
    verb: PUT
    route: /widgets/{id}
    request: { id: string, name: string, color: string, size: int32 }
    response: Widget
"#;

    const TYPESPEC: &str = r#"
import "@typespec/http";
using TypeSpec.Http;

@route("/widgets")
namespace Widgets;

model Widget { id: string; name: string; color: string; }

@post op CreateWidget(@body body: { name: string; color: string }): Widget;
@get op GetWidget(@path id: string): Widget;
@put op UpdateWidget(@path id: string, @body body: { name: string; color: string; size: int32 }): Widget;
"#;

    const DRAFT: &str = r#"#!/usr/bin/env bash
set -euo pipefail

# operation: CreateWidget
CREATE_REQUEST='{"name": "<name>", "color": "<color>"}'
WIDGET_ID=$(curl -s -X POST "$BASE/widgets" -d "$CREATE_REQUEST" | jq -r .id)

# operation: GetWidget
# requires: CreateWidget
EXPECTED_RESPONSE='TODO'
curl -s "$BASE/widgets/$WIDGET_ID" | jq -e --argjson want "$EXPECTED_RESPONSE" '. == $want'

# operation: UpdateWidget
# requires: GetWidget
UPDATE_BODY='{}'
curl -s -X PUT "$BASE/widgets/$WIDGET_ID" -d "$UPDATE_BODY"
"#;

    const GET_EXAMPLE: &str = r#"{
  "request": {"id": "w1"},
  "response": {"id": "w1", "name": "Gadget", "color": "red"}
}"#;

    fn inputs<'a>(interface: &'a str, example: &'a str, script: &'a str) -> Inputs<'a> {
        Inputs {
            interface,
            interface_format: InterfaceFormat::Auto,
            example,
            script,
            script_name: Some("smoke.sh"),
        }
    }

    fn assisted() -> RunOptions {
        RunOptions {
            inference: InferenceConfig { enabled: true, ..InferenceConfig::default() },
            ..RunOptions::default()
        }
    }

    #[test]
    fn read_example_patches_only_the_read_invocation() {
        let out = run(&inputs(CATALOG, GET_EXAMPLE, DRAFT), &RunOptions::default(), None).unwrap();
        assert_eq!(out.operation, "GetWidget");
        assert_eq!(out.resolution, Resolution::Unique);
        assert_eq!(
            out.patched,
            DRAFT.replace(
                "EXPECTED_RESPONSE='TODO'",
                r#"EXPECTED_RESPONSE='{"id":"w1","name":"Gadget","color":"red"}'"#
            )
        );
        assert_eq!(out.scores[0].name, "GetWidget");
        assert_eq!(out.scores.len(), 3);
    }

    #[test]
    fn read_example_fills_both_literals_of_the_read_block() {
        let draft = DRAFT.replace(
            "# requires: CreateWidget\nEXPECTED_RESPONSE='TODO'",
            "# requires: CreateWidget\nGET_REQUEST='{\"id\": \"<id>\"}'\nEXPECTED_RESPONSE='TODO'",
        );
        let out = run(&inputs(CATALOG, GET_EXAMPLE, &draft), &RunOptions::default(), None).unwrap();
        assert_eq!(out.operation, "GetWidget");
        assert_eq!(out.report.written, vec![script::SlotKind::Request, script::SlotKind::Response]);
        assert!(out.report.skipped.is_empty());
        assert_eq!(
            out.patched,
            draft
                .replace(r#"GET_REQUEST='{"id": "<id>"}'"#, r#"GET_REQUEST='{"id":"w1"}'"#)
                .replace(
                    "EXPECTED_RESPONSE='TODO'",
                    r#"EXPECTED_RESPONSE='{"id":"w1","name":"Gadget","color":"red"}'"#
                )
        );
        // create and update blocks are byte-identical
        let tail = |s: &str| s[s.find("# operation: UpdateWidget").unwrap()..].to_string();
        assert_eq!(tail(&out.patched), tail(&draft));
        let head = |s: &str| s[..s.find("# operation: GetWidget").unwrap()].to_string();
        assert_eq!(head(&out.patched), head(&draft));
    }

    #[test]
    fn envelope_parameters_are_not_written_into_the_body() {
        let ex = r#"{
          "request": {
            "method": "PUT", "path": "/widgets/w1",
            "params": {"id": "w1"}, "query": {"api-version": "2024"},
            "body": {"name": "G", "color": "red", "size": 3}
          },
          "response": {"status": 200, "body": {"id": "w1", "name": "G", "color": "red"}}
        }"#;
        let out = run(&inputs(CATALOG, ex, DRAFT), &RunOptions::default(), None).unwrap();
        assert_eq!(out.operation, "UpdateWidget");
        assert_eq!(
            out.patched,
            DRAFT.replace("UPDATE_BODY='{}'", r#"UPDATE_BODY='{"name":"G","color":"red","size":3}'"#)
        );
    }

    #[test]
    fn payload_field_named_body_is_kept() {
        let catalog = r#"
models:
  Issue: { id: int32, title: string, body: string }
operations:
  - { name: createIssue, verb: POST, route: /issues, request: { title: string, body: string }, response: Issue }
  - { name: getIssue, verb: GET, route: "/issues/{id}", request: { id: int32 }, response: Issue }
"#;
        let draft = "# operation: createIssue\nISSUE_REQUEST='TODO'\n\n# operation: getIssue\nEXPECTED='TODO'\n";
        let ex = r#"{"request": {"title": "Bug", "body": "It crashes"}, "response": {"id": 7, "title": "Bug", "body": "It crashes"}}"#;
        let out = run(&inputs(catalog, ex, draft), &RunOptions::default(), None).unwrap();
        assert_eq!(out.operation, "createIssue");
        assert_eq!(
            out.patched,
            "# operation: createIssue\nISSUE_REQUEST='{\"title\":\"Bug\",\"body\":\"It crashes\"}'\n\n# operation: getIssue\nEXPECTED='TODO'\n"
        );
    }

    #[test]
    fn typespec_and_catalog_documents_agree() {
        let from_doc = run(&inputs(CATALOG, GET_EXAMPLE, DRAFT), &RunOptions::default(), None).unwrap();
        let from_tsp = run(&inputs(TYPESPEC, GET_EXAMPLE, DRAFT), &RunOptions::default(), None).unwrap();
        assert_eq!(from_tsp.operation, from_doc.operation);
        assert_eq!(from_tsp.patched, from_doc.patched);
    }

    #[test]
    fn rerun_on_patched_script_is_stable() {
        let opts = RunOptions::default();
        let once = run(&inputs(CATALOG, GET_EXAMPLE, DRAFT), &opts, None).unwrap();
        let twice = run(&inputs(CATALOG, GET_EXAMPLE, &once.patched), &opts, None).unwrap();
        assert_eq!(twice.patched, once.patched);
        assert!(!twice.report.changed);
    }

    #[test]
    fn create_example_fills_request_and_keeps_others() {
        let ex = r#"{"request": {"name": "Gadget", "color": "red"}, "response": {"id": "w9", "name": "Gadget", "color": "red"}}"#;
        let out = run(&inputs(CATALOG, ex, DRAFT), &RunOptions::default(), None).unwrap();
        assert_eq!(out.operation, "CreateWidget");
        assert_eq!(
            out.patched,
            DRAFT.replace(
                r#"CREATE_REQUEST='{"name": "<name>", "color": "<color>"}'"#,
                r#"CREATE_REQUEST='{"name":"Gadget","color":"red"}'"#
            )
        );
        assert_eq!(out.report.skipped, vec![script::SlotKind::Response]);
    }

    #[test]
    fn failures_abort_before_patching() {
        let err = run(&inputs(CATALOG, "[1, 2]", DRAFT), &RunOptions::default(), None).unwrap_err();
        assert_eq!(err.kind(), "MalformedExampleError");

        let err = run(&inputs("operations: [", GET_EXAMPLE, DRAFT), &RunOptions::default(), None).unwrap_err();
        assert_eq!(err.kind(), "MalformedInterfaceError");

        let lonely = "# operation: CreateWidget\nREQUEST='{}'\n";
        let err = run(&inputs(CATALOG, GET_EXAMPLE, lonely), &RunOptions::default(), None).unwrap_err();
        assert_eq!(err.kind(), "OperationNotInScriptError");
    }

    const TWINS: &str = r#"
operations:
  - { name: getWidget, verb: GET, route: "/widgets/{id}", response: { id: string, label: string } }
  - { name: getGadget, verb: GET, route: "/gadgets/{id}", response: { id: string, label: string } }
"#;
    const TWIN_EXAMPLE: &str = r#"{"response": {"id": "g1", "label": "x"}}"#;
    const TWIN_SCRIPT: &str = "# operation: getWidget\nEXPECTED='TODO'\n\n# operation: getGadget\nEXPECTED='TODO'\n";

    #[test]
    fn tie_without_assist_is_ambiguous() {
        let fake = ScriptedCompletion::replying("getGadget");
        let err = run(&inputs(TWINS, TWIN_EXAMPLE, TWIN_SCRIPT), &RunOptions::default(), Some(&fake)).unwrap_err();
        assert!(matches!(err, FillError::AmbiguousMatch { ref tied, .. } if tied.len() == 2));
        // assist disabled in options: no call made
        assert_eq!(fake.calls(), 0);
    }

    #[test]
    fn assist_breaks_a_tie() {
        let fake = ScriptedCompletion::replying("getGadget");
        let out = run(&inputs(TWINS, TWIN_EXAMPLE, TWIN_SCRIPT), &assisted(), Some(&fake)).unwrap();
        assert_eq!(out.operation, "getGadget");
        assert_eq!(out.resolution, Resolution::Assisted);
        assert_eq!(
            out.patched,
            "# operation: getWidget\nEXPECTED='TODO'\n\n# operation: getGadget\nEXPECTED='{\"id\":\"g1\",\"label\":\"x\"}'\n"
        );
        assert_eq!(fake.calls(), 1);
    }

    #[test]
    fn unhelpful_reply_keeps_the_ambiguity() {
        let fake = ScriptedCompletion::replying("no idea");
        let err = run(&inputs(TWINS, TWIN_EXAMPLE, TWIN_SCRIPT), &assisted(), Some(&fake)).unwrap_err();
        assert_eq!(err.kind(), "AmbiguousMatchError");
    }

    #[test]
    fn assist_timeout_surfaces_as_timeout() {
        let fake = ScriptedCompletion::timing_out();
        let err = run(&inputs(TWINS, TWIN_EXAMPLE, TWIN_SCRIPT), &assisted(), Some(&fake)).unwrap_err();
        assert_eq!(err.kind(), "InferenceTimeoutError");
    }

    #[test]
    fn no_match_is_never_overridden() {
        let fake = ScriptedCompletion::replying("getGadget");
        let ex = r#"{"response": {"temperature": 21}}"#;
        let err = run(&inputs(TWINS, ex, TWIN_SCRIPT), &assisted(), Some(&fake)).unwrap_err();
        assert_eq!(err.kind(), "NoMatchError");
        assert_eq!(fake.calls(), 0);
    }
}
