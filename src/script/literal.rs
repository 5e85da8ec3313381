//! Data literals inside a script: scanning, decoding and re-encoding.
//!
//! Supported forms:
//! - `'...'` single quotes (with the `'\''` idiom for embedded quotes)
//! - `"..."` double quotes (`\" \\ \$ \`` escapes)
//! - heredocs `<<EOF`, `<<'EOF'`, `<<"EOF"`, `<<-EOF`
//! - bare `{...}` / `[...]` object literals (JS, Python)

use std::ops::Range;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quoting {
    Single,
    Double,
    Heredoc {
        delimiter:  String,
        /// Unquoted delimiter: `$`, `` ` `` and `\` stay special in the body.
        expand:     bool,
        /// `<<-`: leading tabs are stripped from body lines.
        strip_tabs: bool,
    },
    Bare,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub quoting: Quoting,
    /// Bytes between the delimiters; the only part a patch rewrites.
    pub body:    Range<usize>,
    /// First byte after the literal (closing quote or terminator line).
    pub end:     usize,
    /// Body with quoting removed.
    pub text:    String,
}

impl Literal {
    pub fn raw<'s>(&self, src: &'s str) -> &'s str {
        &src[self.body.clone()]
    }

    pub fn is_multiline(&self, src: &str) -> bool {
        match self.quoting {
            // heredocs exist for multi-line data
            Quoting::Heredoc { .. } => true,
            _ => self.raw(src).contains('\n'),
        }
    }

    /// Indentation to reproduce when re-rendering over several lines.
    pub fn indent(&self, src: &str) -> String {
        let raw = self.raw(src);
        let line = match self.quoting {
            Quoting::Heredoc { .. } => raw.lines().find(|l| !l.trim().is_empty()),
            _ => raw.lines().last().filter(|_| raw.contains('\n')),
        };
        line.map(|l| l.chars().take_while(|c| *c == ' ' || *c == '\t').collect())
            .unwrap_or_default()
    }
}

/// Scan a quoted or bare literal whose opening character sits at `open`.
pub fn scan(src: &str, open: usize) -> Option<Literal> {
    match src[open..].chars().next()? {
        '\'' => scan_single(src, open),
        '"' => scan_double(src, open),
        '{' | '[' => scan_bare(src, open),
        _ => None,
    }
}

fn scan_single(src: &str, open: usize) -> Option<Literal> {
    let start = open + 1;
    let mut pos = start;
    loop {
        let close = pos + src[pos..].find('\'')?;
        if src[close..].starts_with("'\\''") {
            pos = close + 4;
            continue;
        }
        let raw = &src[start..close];
        return Some(Literal {
            quoting: Quoting::Single,
            body:    start..close,
            end:     close + 1,
            text:    raw.replace("'\\''", "'"),
        });
    }
}

fn scan_double(src: &str, open: usize) -> Option<Literal> {
    let start = open + 1;
    let mut chars = src[start..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '"' => {
                let close = start + i;
                return Some(Literal {
                    quoting: Quoting::Double,
                    body:    start..close,
                    end:     close + 1,
                    text:    unescape(&src[start..close], &['"', '\\', '$', '`']),
                });
            }
            _ => {}
        }
    }
    None
}

fn scan_bare(src: &str, open: usize) -> Option<Literal> {
    let mut depth = 0usize;
    let mut in_str: Option<char> = None;
    let mut chars = src[open..].char_indices();
    while let Some((i, c)) = chars.next() {
        if let Some(q) = in_str {
            match c {
                '\\' => {
                    chars.next();
                }
                c if c == q => in_str = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' => in_str = Some(c),
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    let end = open + i + 1;
                    return Some(Literal {
                        quoting: Quoting::Bare,
                        body:    open..end,
                        end,
                        text:    src[open..end].to_string(),
                    });
                }
            }
            _ => {}
        }
    }
    None
}

/// Scan a heredoc body. `header_end` is the offset of the newline that ends
/// the line carrying the `<<DELIM` operator.
pub fn scan_heredoc(src: &str, header_end: usize, quoting: Quoting) -> Option<Literal> {
    let Quoting::Heredoc { delimiter, expand, strip_tabs } = &quoting else {
        return None;
    };
    if !src[header_end..].starts_with('\n') {
        return None;
    }
    let start = header_end + 1;
    let mut line_start = start;
    while line_start <= src.len() {
        let line_end = src[line_start..].find('\n').map(|i| line_start + i).unwrap_or(src.len());
        let line = &src[line_start..line_end];
        let candidate = if *strip_tabs { line.trim_start_matches('\t') } else { line };
        if candidate.trim_end_matches('\r') == delimiter {
            let raw = &src[start..line_start];
            let mut text: String = if *strip_tabs {
                raw.split_inclusive('\n').map(|l| l.trim_start_matches('\t')).collect()
            } else {
                raw.to_string()
            };
            if *expand {
                text = unescape(&text, &['\\', '$', '`']);
            }
            return Some(Literal {
                quoting: quoting.clone(),
                body: start..line_start,
                end: (line_end + 1).min(src.len()),
                text,
            });
        }
        if line_end == src.len() {
            break;
        }
        line_start = line_end + 1;
    }
    None
}

fn unescape(raw: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&n) if specials.contains(&n) => {
                    out.push(n);
                    chars.next();
                    continue;
                }
                // line continuation
                Some('\n') => {
                    chars.next();
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

fn escape(text: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Encode plain text for a literal's quoting style.
pub fn encode(quoting: &Quoting, text: &str) -> String {
    match quoting {
        Quoting::Single => text.replace('\'', "'\\''"),
        Quoting::Double => escape(text, &['\\', '"', '$', '`']),
        Quoting::Heredoc { expand: true, .. } => escape(text, &['\\', '$', '`']),
        Quoting::Heredoc { expand: false, .. } | Quoting::Bare => text.to_string(),
    }
}

/// Render `value` as JSON in the layout of the literal it replaces, already
/// encoded for that literal's quoting.
pub fn render(value: &Value, quoting: &Quoting, multiline: bool, indent: &str) -> String {
    if !multiline {
        return encode(quoting, &value.to_string());
    }
    let pretty = format!("{:#}", value);
    let heredoc = matches!(quoting, Quoting::Heredoc { .. });
    let mut out = String::with_capacity(pretty.len() + 16);
    for (i, line) in pretty.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if i > 0 || heredoc {
            out.push_str(indent);
        }
        out.push_str(line);
    }
    if heredoc {
        out.push('\n');
    }
    encode(quoting, &out)
}
