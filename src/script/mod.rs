//! # Draft Scripts
//!
//! A draft test script is a sequence of invocation blocks. Each block opens
//! with a marker comment naming the operation and runs to the next marker:
//!
//! ```bash
//! # operation: getWidget
//! # requires: createWidget
//! REQUEST_BODY='{"id": "<widget-id>"}'
//! EXPECTED_RESPONSE='TODO'
//! curl -s "$BASE/widgets/$WIDGET_ID" | diff - <(echo "$EXPECTED_RESPONSE")
//! ```
//!
//! Inside a block the patcher only ever touches the bodies of the request and
//! expected-response literals ("slots"); see [`patcher`].

pub mod literal;
pub mod patcher;

use std::sync::LazyLock;

use regex::Regex;

pub use literal::{Literal, Quoting};
pub use patcher::{patch, PatchOptions, PatchReport, Patched, ScriptSyntax};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SlotKind {
    Request,
    Response,
}

impl SlotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKind::Request  => "request",
            SlotKind::Response => "response",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSlot {
    pub kind:    SlotKind,
    /// Variable name, or `curl -d` for an inline curl payload.
    pub binding: String,
    pub literal: Literal,
    /// 1-based line of the literal's opening.
    pub line:    usize,
}

impl DataSlot {
    pub fn is_placeholder(&self) -> bool {
        is_placeholder(&self.literal.text)
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(self.literal.text.trim()).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptInvocation {
    /// Operation name as written in the marker.
    pub operation: String,
    /// Block bytes, marker line included.
    pub span:      std::ops::Range<usize>,
    /// 1-based line of the marker.
    pub line:      usize,
    /// Position among the script's invocations.
    pub ordinal:   usize,
    /// Dependency guard: operations that must run first.
    pub requires:  Vec<String>,
    pub request:   Option<DataSlot>,
    pub response:  Option<DataSlot>,
}

impl ScriptInvocation {
    pub fn slot(&self, kind: SlotKind) -> Option<&DataSlot> {
        match kind {
            SlotKind::Request  => self.request.as_ref(),
            SlotKind::Response => self.response.as_ref(),
        }
    }

    pub fn slots(&self) -> impl Iterator<Item = &DataSlot> {
        self.request.iter().chain(self.response.iter())
    }

    pub fn has_placeholder(&self) -> bool {
        self.slots().any(DataSlot::is_placeholder)
    }

    /// Has a slot of one of `kinds` still holding placeholder data.
    pub fn awaits(&self, kinds: &[SlotKind]) -> bool {
        kinds.iter().any(|k| self.slot(*k).is_some_and(DataSlot::is_placeholder))
    }
}

/// A parsed draft. Borrowing the text keeps the draft immutable.
#[derive(Debug, Clone)]
pub struct DraftScript<'s> {
    text:        &'s str,
    invocations: Vec<ScriptInvocation>,
}

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:#+|//+)\s*(?:-{2,}\s*)?(?:operation|op)\s*:\s*([A-Za-z_][\w.\-]*)\s*(?:-{2,})?\s*$")
        .expect("static regex")
});
static GUARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:#+|//+)\s*(?:requires|depends[-_ ]on)\s*:\s*(.*?)\s*$").expect("static regex")
});
static ASSIGN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:export|local|readonly|const|let|var)\s+|declare\s+(?:-\w+\s+)*)?([A-Za-z_][A-Za-z0-9_]*)\s*=[ \t]*",
    )
    .expect("static regex")
});
static READ_HEREDOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*read\b.*\s([A-Za-z_][A-Za-z0-9_]*)\s*<<").expect("static regex")
});
static HEREDOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<<(-?)[ \t]*(['"]?)([A-Za-z_][A-Za-z0-9_]*)(['"]?)"#).expect("static regex")
});
static CURL_DATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(?:-d|--data|--data-raw|--data-binary|--json)(?:[ \t]+|=)").expect("static regex")
});
static VAR_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\$\{?[A-Za-z_][A-Za-z0-9_]*\}?\s*$").expect("static regex"));
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<[A-Za-z_][\w\- ]*>|\{\{[^{}]*\}\}|\b(?:TODO|TBD|FIXME|PLACEHOLDER|CHANGEME|REPLACE_ME)\b|\.\.\.",
    )
    .expect("static regex")
});

const REQUEST_NAMES: &[&str] = &["REQUEST", "BODY", "PAYLOAD", "INPUT"];
const RESPONSE_NAMES: &[&str] = &["EXPECTED", "RESPONSE", "OUTPUT"];

/// Placeholder data: empty, `{}`/`[]`/`null`, not JSON, or a fill-me token.
pub fn is_placeholder(text: &str) -> bool {
    let t = text.trim();
    t.is_empty()
        || matches!(t, "{}" | "[]" | "null")
        || serde_json::from_str::<serde_json::Value>(t).is_err()
        || PLACEHOLDER_RE.is_match(t)
}

/// Which slot a variable name feeds, if any. Response words win so that
/// `EXPECTED_RESPONSE_BODY` is a response.
fn slot_kind_for(var: &str) -> Option<SlotKind> {
    let upper = var.to_ascii_uppercase();
    if RESPONSE_NAMES.iter().any(|n| upper.contains(n)) {
        Some(SlotKind::Response)
    } else if REQUEST_NAMES.iter().any(|n| upper.contains(n)) {
        Some(SlotKind::Request)
    } else {
        None
    }
}

fn is_comment(line: &str) -> bool {
    let t = line.trim_start();
    (t.starts_with('#') && !t.starts_with("#!")) || t.starts_with("//")
}

fn line_of(text: &str, pos: usize) -> usize {
    text[..pos].bytes().filter(|b| *b == b'\n').count() + 1
}

/// Heredoc opened somewhere on the line `[line_start, line_end)`.
fn heredoc_on_line(text: &str, line_start: usize, line_end: usize) -> Option<Literal> {
    let caps = HEREDOC_RE.captures(&text[line_start..line_end])?;
    let quoted = !caps[2].is_empty() || !caps[4].is_empty();
    let quoting = Quoting::Heredoc {
        delimiter:  caps[3].to_string(),
        expand:     !quoted,
        strip_tabs: &caps[1] == "-",
    };
    literal::scan_heredoc(text, line_end, quoting)
}

impl<'s> DraftScript<'s> {
    pub fn parse(text: &'s str) -> Self {
        let markers: Vec<(usize, String)> = line_starts(text)
            .filter_map(|(start, end)| {
                MARKER_RE
                    .captures(&text[start..end])
                    .map(|c| (start, c[1].to_string()))
            })
            .collect();

        let mut invocations = Vec::with_capacity(markers.len());
        for (ordinal, (start, name)) in markers.iter().enumerate() {
            let end = markers.get(ordinal + 1).map(|(s, _)| *s).unwrap_or(text.len());
            let mut inv = ScriptInvocation {
                operation: name.clone(),
                span:      *start..end,
                line:      line_of(text, *start),
                ordinal,
                requires:  Vec::new(),
                request:   None,
                response:  None,
            };
            scan_block(text, &mut inv);
            tracing::debug!(
                operation = %inv.operation,
                line = inv.line,
                request = inv.request.is_some(),
                response = inv.response.is_some(),
                "script invocation"
            );
            invocations.push(inv);
        }
        Self { text, invocations }
    }

    pub fn text(&self) -> &'s str {
        self.text
    }

    pub fn invocations(&self) -> &[ScriptInvocation] {
        &self.invocations
    }

    /// Distinct operation names in script order.
    pub fn invoked_operations(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for inv in &self.invocations {
            if !out.contains(&inv.operation) {
                out.push(inv.operation.clone());
            }
        }
        out
    }
}

/// `(start, end)` byte offsets of every line, `end` excluding the newline.
fn line_starts(text: &str) -> impl Iterator<Item = (usize, usize)> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        if pos >= text.len() {
            return None;
        }
        let start = pos;
        let end = text[start..].find('\n').map(|i| start + i).unwrap_or(text.len());
        pos = end + 1;
        Some((start, end))
    })
}

fn scan_block(text: &str, inv: &mut ScriptInvocation) {
    let block_end = inv.span.end;
    // skip the marker line
    let mut pos = text[inv.span.start..block_end]
        .find('\n')
        .map(|i| inv.span.start + i + 1)
        .unwrap_or(block_end);

    while pos < block_end {
        let line_end = text[pos..block_end].find('\n').map(|i| pos + i).unwrap_or(block_end);
        let line = &text[pos..line_end];
        let mut next = line_end + 1;

        if let Some(c) = GUARD_RE.captures(line) {
            inv.requires.extend(
                c[1].split(|ch: char| ch == ',' || ch.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        } else if !is_comment(line) {
            if let Some((slot, end)) = scan_line(text, pos, line_end) {
                let target = match slot.kind {
                    SlotKind::Request  => &mut inv.request,
                    SlotKind::Response => &mut inv.response,
                };
                if target.is_none() {
                    *target = Some(slot);
                }
                next = next.max(end);
            } else if let Some(end) = skip_literal(text, pos, line_end) {
                next = next.max(end);
            }
        }
        pos = next;
    }
}

/// A data slot opened on this line, with the offset where scanning resumes.
fn scan_line(text: &str, line_start: usize, line_end: usize) -> Option<(DataSlot, usize)> {
    let line = &text[line_start..line_end];

    if let Some(caps) = ASSIGN_RE.captures(line) {
        let value_at = line_start + caps[0].len();
        let kind = slot_kind_for(&caps[1]).filter(|_| !text[value_at..].starts_with('='));
        if let Some(kind) = kind {
            let lit = assigned_literal(text, value_at, line_start, line_end)?;
            let line = line_of(text, lit.body.start);
            let end = lit.end;
            return Some((DataSlot { kind, binding: caps[1].to_string(), literal: lit, line }, end));
        }
    }

    if let Some(caps) = READ_HEREDOC_RE.captures(line) {
        let kind = slot_kind_for(&caps[1])?;
        let lit = heredoc_on_line(text, line_start, line_end)?;
        let end = lit.end;
        let line = line_of(text, lit.body.start);
        return Some((DataSlot { kind, binding: caps[1].to_string(), literal: lit, line }, end));
    }
    if line.trim_start().starts_with("read ") {
        return None;
    }

    let m = CURL_DATA_RE.find(line)?;
    let arg_at = line_start + m.end();
    let lit = if text[arg_at..line_end].starts_with("@-") {
        heredoc_on_line(text, line_start, line_end)?
    } else {
        let lit = literal::scan(text, arg_at)?;
        if !matches!(lit.quoting, Quoting::Single | Quoting::Double) || VAR_REF_RE.is_match(&lit.text) {
            return None;
        }
        lit
    };
    let end = lit.end;
    let line = line_of(text, lit.body.start);
    Some((
        DataSlot { kind: SlotKind::Request, binding: "curl -d".to_string(), literal: lit, line },
        end,
    ))
}

/// Literal assigned at `value_at`: quoted, bare object, or a heredoc opened
/// on the same line (`X=$(cat <<'EOF'`).
fn assigned_literal(text: &str, value_at: usize, line_start: usize, line_end: usize) -> Option<Literal> {
    match text[value_at..].chars().next() {
        Some('\'' | '"' | '{' | '[') => literal::scan(text, value_at),
        _ => heredoc_on_line(text, line_start, line_end),
    }
}

/// Resume offset past a non-slot literal that spans lines, so its body is
/// never mistaken for script lines.
fn skip_literal(text: &str, line_start: usize, line_end: usize) -> Option<usize> {
    if let Some(lit) = heredoc_on_line(text, line_start, line_end) {
        return Some(lit.end);
    }
    let caps = ASSIGN_RE.captures(&text[line_start..line_end])?;
    let lit = literal::scan(text, line_start + caps[0].len())?;
    (lit.end > line_end).then_some(lit.end)
}
