//! TypeSpec subset loader.
//!
//! Understands what `routes.tsp` service definitions use to describe a REST
//! surface:
//! - `model` declarations (properties, `?`, `T[]`, `...Spread`, inline `{}`,
//!   `extends` / `is`, template parameters)
//! - `namespace` / `interface` blocks carrying `@route("...")`
//! - operations with `@get|@post|@put|@patch|@delete|@head` and `@path`,
//!   `@query`, `@header`, `@body` parameters
//! - `alias`, `enum`, `union` and `scalar` declarations
//!
//! Explicit dependencies: `@dependsOn("createWidget")` or a preceding
//! `// @depends-on(createWidget)` comment.
//!
//! Types the file does not declare (library types such as
//! `Azure.Core.Foundations.Error`) resolve to `Any` rather than failing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FillError, Result};
use crate::interface::{Field, FieldType, OperationDecl, RouteTemplate, ScalarKind, Schema, Verb};

// ─── Lexer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(String),
    Punct(char),
    Spread,
    /// `// @depends-on(a, b)` comment
    DependsOn(Vec<String>),
}

#[derive(Debug, Clone)]
struct Token {
    tok:  Tok,
    line: usize,
}

static DEPENDS_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)@depends-?on\s*\(([^)]*)\)").expect("static regex")
});

fn split_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().trim_matches(['"', '\'', '`']).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn lex(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut line = 1;

    let malformed = |line: usize, msg: &str| {
        FillError::MalformedInterface(format!("typespec line {}: {}", line, msg))
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // line comment
        if c == '/' && next == Some('/') {
            let start = i;
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            let comment: String = chars[start..i].iter().collect();
            if let Some(caps) = DEPENDS_COMMENT.captures(&comment) {
                out.push(Token { tok: Tok::DependsOn(split_names(&caps[1])), line });
            }
            continue;
        }

        // block comment
        if c == '/' && next == Some('*') {
            let open_line = line;
            i += 2;
            loop {
                if i + 1 >= chars.len() {
                    return Err(malformed(open_line, "unterminated block comment"));
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    i += 2;
                    break;
                }
                if chars[i] == '\n' {
                    line += 1;
                }
                i += 1;
            }
            continue;
        }

        // directives such as #suppress
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '"' {
            let open_line = line;
            let triple = next == Some('"') && chars.get(i + 2) == Some(&'"');
            i += if triple { 3 } else { 1 };
            let mut s = String::new();
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(malformed(open_line, "unterminated string literal"));
                };
                if triple {
                    if ch == '"' && chars.get(i + 1) == Some(&'"') && chars.get(i + 2) == Some(&'"') {
                        i += 3;
                        break;
                    }
                } else if ch == '"' {
                    i += 1;
                    break;
                } else if ch == '\n' {
                    return Err(malformed(open_line, "newline in string literal"));
                }
                if ch == '\\' {
                    if let Some(&esc) = chars.get(i + 1) {
                        s.push(match esc {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                        i += 2;
                        continue;
                    }
                }
                if ch == '\n' {
                    line += 1;
                }
                s.push(ch);
                i += 1;
            }
            out.push(Token { tok: Tok::Str(s), line: open_line });
            continue;
        }

        if c == '`' {
            let start = i + 1;
            i += 1;
            while i < chars.len() && chars[i] != '`' {
                i += 1;
            }
            if i >= chars.len() {
                return Err(malformed(line, "unterminated escaped identifier"));
            }
            out.push(Token { tok: Tok::Ident(chars[start..i].iter().collect()), line });
            i += 1;
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            out.push(Token { tok: Tok::Ident(chars[start..i].iter().collect()), line });
            continue;
        }

        if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            i += 1;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric()
                    || chars[i] == '_'
                    || (chars[i] == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())))
            {
                i += 1;
            }
            out.push(Token { tok: Tok::Num(chars[start..i].iter().collect()), line });
            continue;
        }

        if c == '.' && next == Some('.') && chars.get(i + 2) == Some(&'.') {
            out.push(Token { tok: Tok::Spread, line });
            i += 3;
            continue;
        }

        if "{}()[];:,?<>|&=@.".contains(c) {
            out.push(Token { tok: Tok::Punct(c), line });
            i += 1;
            continue;
        }

        return Err(malformed(line, &format!("unexpected character '{}'", c)));
    }
    Ok(out)
}

// ─── Syntax tree ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TypeExpr {
    Named { name: String, args: Vec<TypeExpr> },
    Inline(Vec<Prop>),
    Array(Box<TypeExpr>),
    Union(Vec<TypeExpr>),
    Intersection(Vec<TypeExpr>),
    StrLiteral,
    NumLiteral,
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Plain,
    Path,
    Query,
    Header,
    Cookie,
    Body,
    StatusCode,
}

#[derive(Debug, Clone, PartialEq)]
struct Prop {
    name:     String,
    optional: bool,
    ty:       TypeExpr,
    spread:   bool,
    location: Location,
}

#[derive(Debug, Clone)]
struct Decorator {
    name: String,
    args: Vec<String>,
}

#[derive(Debug, Clone)]
struct ModelDecl {
    params:   Vec<String>,
    base:     Option<TypeExpr>,
    props:    Vec<Prop>,
    is_error: bool,
}

#[derive(Debug, Clone)]
struct RawOp {
    interface: Option<String>,
    name:      String,
    route:     String,
    verb:      Option<Verb>,
    params:    Vec<Prop>,
    returns:   TypeExpr,
    depends:   Vec<String>,
    line:      usize,
}

#[derive(Default)]
struct Declarations {
    models:  BTreeMap<String, ModelDecl>,
    aliases: BTreeMap<String, TypeExpr>,
    enums:   BTreeSet<String>,
    ops:     Vec<RawOp>,
}

// ─── Parser ──────────────────────────────────────────────────────────────────

struct Parser {
    toks:  Vec<Token>,
    pos:   usize,
    decls: Declarations,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|t| &t.tok)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.toks.get(self.pos + offset).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.toks
            .get(self.pos)
            .or_else(|| self.toks.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).map(|t| t.tok.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: impl AsRef<str>) -> FillError {
        FillError::MalformedInterface(format!("typespec line {}: {}", self.line(), msg.as_ref()))
    }

    fn at_punct(&self, c: char) -> bool {
        self.peek() == Some(&Tok::Punct(c))
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.at_punct(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{}', found {}", c, self.describe())))
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(s)) if s == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn describe(&self) -> String {
        match self.peek() {
            None                   => "end of file".to_string(),
            Some(Tok::Ident(s))    => format!("'{}'", s),
            Some(Tok::Str(s))      => format!("\"{}\"", s),
            Some(Tok::Num(n))      => n.clone(),
            Some(Tok::Punct(c))    => format!("'{}'", c),
            Some(Tok::Spread)      => "'...'".to_string(),
            Some(Tok::DependsOn(_)) => "@depends-on comment".to_string(),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(Tok::Ident(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.err(format!("expected identifier, found {}", self.describe()))),
        }
    }

    fn dotted_ident(&mut self) -> Result<String> {
        let mut name = self.expect_ident()?;
        while self.at_punct('.') && matches!(self.peek_at(1), Some(Tok::Ident(_))) {
            self.pos += 1;
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(name)
    }

    /// Skip a bracketed group starting at the current opening token.
    fn skip_group(&mut self, open: char, close: char) -> Result<()> {
        self.expect_punct(open)?;
        let mut depth = 1;
        while depth > 0 {
            match self.bump() {
                Some(Tok::Punct(c)) if c == open  => depth += 1,
                Some(Tok::Punct(c)) if c == close => depth -= 1,
                Some(_) => {}
                None => return Err(self.err(format!("unclosed '{}'", open))),
            }
        }
        Ok(())
    }

    /// Skip to the end of the current statement (`;` at depth 0, or a
    /// balanced `{}` block).
    fn skip_statement(&mut self) -> Result<()> {
        let mut depth = 0i32;
        loop {
            match self.peek() {
                None => return Ok(()),
                Some(Tok::Punct(';')) if depth == 0 => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(Tok::Punct('{')) | Some(Tok::Punct('(')) | Some(Tok::Punct('[')) => depth += 1,
                Some(Tok::Punct('}')) | Some(Tok::Punct(')')) | Some(Tok::Punct(']')) => {
                    depth -= 1;
                    if depth < 0 {
                        return Ok(());
                    }
                    if depth == 0 && self.at_punct('}') {
                        self.pos += 1;
                        self.eat_punct(';');
                        return Ok(());
                    }
                }
                Some(_) => {}
            }
            self.pos += 1;
        }
    }

    fn decorators(&mut self) -> Result<Vec<Decorator>> {
        let mut out = Vec::new();
        loop {
            if let Some(Tok::DependsOn(names)) = self.peek() {
                out.push(Decorator { name: "dependsOn".to_string(), args: names.clone() });
                self.pos += 1;
                continue;
            }
            if !self.at_punct('@') {
                return Ok(out);
            }
            self.pos += 1;
            // `@@augment(...)` statements
            if self.eat_punct('@') {
                self.skip_statement()?;
                continue;
            }
            let full = self.dotted_ident()?;
            let name = full.rsplit('.').next().unwrap_or(&full).to_string();
            let mut args = Vec::new();
            if self.at_punct('(') {
                self.pos += 1;
                let mut depth = 1;
                while depth > 0 {
                    match self.bump() {
                        Some(Tok::Punct('(')) => depth += 1,
                        Some(Tok::Punct(')')) => depth -= 1,
                        Some(Tok::Str(s)) if depth == 1 => args.push(s),
                        Some(Tok::Ident(s)) if depth == 1 => args.push(s),
                        Some(_) => {}
                        None => return Err(self.err(format!("unclosed arguments of @{}", name))),
                    }
                }
            }
            out.push(Decorator { name, args });
        }
    }

    fn items(&mut self, prefix: &str, in_block: bool) -> Result<()> {
        loop {
            if in_block && self.eat_punct('}') {
                return Ok(());
            }
            if self.peek().is_none() {
                if in_block {
                    return Err(self.err("unclosed namespace block"));
                }
                return Ok(());
            }
            if self.eat_punct(';') {
                continue;
            }

            let decos = self.decorators()?;
            let route = join_route(prefix, route_of(&decos));
            let keyword = match self.peek() {
                Some(Tok::Ident(k)) => k.clone(),
                None => continue,
                _ => return Err(self.err(format!("unexpected {}", self.describe()))),
            };
            match keyword.as_str() {
                "import" | "using" | "dec" | "fn" | "extern" => self.skip_statement()?,
                "namespace" => {
                    self.pos += 1;
                    self.dotted_ident()?;
                    if self.eat_punct(';') {
                        // file-scoped namespace: the rest of the file belongs to it
                        return self.items(&route, in_block);
                    }
                    self.expect_punct('{')?;
                    self.items(&route, true)?;
                }
                "interface" => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    while !self.at_punct('{') {
                        if self.bump().is_none() {
                            return Err(self.err("interface without body"));
                        }
                    }
                    self.interface_body(&name, &route)?;
                }
                "op" => {
                    self.pos += 1;
                    self.operation(decos, None, &route)?;
                }
                "model" => {
                    self.pos += 1;
                    self.model(&decos)?;
                }
                "enum" => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    self.skip_group('{', '}')?;
                    self.decls.enums.insert(name);
                }
                "union" => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    if self.at_punct('<') {
                        self.skip_group('<', '>')?;
                    }
                    let variants = self.union_body()?;
                    self.decls.aliases.insert(name, TypeExpr::Union(variants));
                }
                "alias" => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    if self.at_punct('<') {
                        self.skip_group('<', '>')?;
                    }
                    self.expect_punct('=')?;
                    let ty = self.type_expr()?;
                    self.eat_punct(';');
                    self.decls.aliases.insert(name, ty);
                }
                "scalar" => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    let base = if self.eat_keyword("extends") {
                        self.type_expr()?
                    } else {
                        TypeExpr::Opaque
                    };
                    if self.at_punct('{') {
                        self.skip_group('{', '}')?;
                    }
                    self.eat_punct(';');
                    self.decls.aliases.insert(name, base);
                }
                other => return Err(self.err(format!("unexpected '{}'", other))),
            }
        }
    }

    fn union_body(&mut self) -> Result<Vec<TypeExpr>> {
        self.expect_punct('{')?;
        let mut variants = Vec::new();
        while !self.eat_punct('}') {
            if self.peek().is_none() {
                return Err(self.err("unclosed union"));
            }
            self.decorators()?;
            // named variant `name: Type` or bare `Type`
            if matches!(self.peek(), Some(Tok::Ident(_)) | Some(Tok::Str(_)))
                && self.peek_at(1) == Some(&Tok::Punct(':'))
            {
                self.pos += 2;
            }
            variants.push(self.type_expr()?);
            if !self.eat_punct(',') {
                self.eat_punct(';');
            }
        }
        Ok(variants)
    }

    fn interface_body(&mut self, interface: &str, route: &str) -> Result<()> {
        self.expect_punct('{')?;
        loop {
            if self.eat_punct('}') {
                return Ok(());
            }
            if self.peek().is_none() {
                return Err(self.err(format!("unclosed interface {}", interface)));
            }
            if self.eat_punct(';') {
                continue;
            }
            let decos = self.decorators()?;
            self.eat_keyword("op");
            let op_route = join_route(route, route_of(&decos));
            self.operation(decos, Some(interface), &op_route)?;
        }
    }

    fn operation(&mut self, decos: Vec<Decorator>, interface: Option<&str>, route: &str) -> Result<()> {
        let line = self.line();
        let name = self.expect_ident()?;
        if self.at_punct('<') {
            self.skip_group('<', '>')?;
        }
        let (params, returns) = if self.eat_keyword("is") {
            self.type_expr()?;
            (Vec::new(), TypeExpr::Opaque)
        } else {
            self.expect_punct('(')?;
            let params = self.props(')')?;
            self.expect_punct(':')?;
            (params, self.type_expr()?)
        };
        self.eat_punct(';');

        let verb = decos.iter().find_map(|d| match d.name.as_str() {
            "get" | "post" | "put" | "patch" | "delete" | "head" => Verb::parse(&d.name),
            _ => None,
        });
        let depends = decos
            .iter()
            .filter(|d| d.name == "dependsOn" || d.name == "depends")
            .flat_map(|d| d.args.iter().flat_map(|a| split_names(a)))
            .collect();

        self.decls.ops.push(RawOp {
            interface: interface.map(str::to_string),
            name,
            route: route.to_string(),
            verb,
            params,
            returns,
            depends,
            line,
        });
        Ok(())
    }

    fn model(&mut self, decos: &[Decorator]) -> Result<()> {
        let name = self.expect_ident()?;
        let mut params = Vec::new();
        if self.eat_punct('<') {
            while !self.eat_punct('>') {
                match self.bump() {
                    Some(Tok::Ident(p)) => {
                        params.push(p);
                        // defaults / constraints: `T extends X = Y`
                        while !self.at_punct(',') && !self.at_punct('>') {
                            if self.bump().is_none() {
                                return Err(self.err("unclosed template parameters"));
                            }
                        }
                        self.eat_punct(',');
                    }
                    Some(_) => {}
                    None => return Err(self.err("unclosed template parameters")),
                }
            }
        }
        let base = if self.eat_keyword("extends") || self.eat_keyword("is") {
            Some(self.type_expr()?)
        } else {
            None
        };
        let props = if self.at_punct('{') {
            self.pos += 1;
            self.props('}')?
        } else {
            Vec::new()
        };
        self.eat_punct(';');
        let is_error = decos.iter().any(|d| d.name == "error");
        self.decls.models.insert(name, ModelDecl { params, base, props, is_error });
        Ok(())
    }

    /// Property / parameter list up to (and including) `close`.
    fn props(&mut self, close: char) -> Result<Vec<Prop>> {
        let mut out = Vec::new();
        loop {
            if self.eat_punct(close) {
                return Ok(out);
            }
            if self.peek().is_none() {
                return Err(self.err(format!("expected '{}'", close)));
            }
            let decos = self.decorators()?;
            let location = location_of(&decos);
            if self.peek() == Some(&Tok::Spread) {
                self.pos += 1;
                let ty = self.type_expr()?;
                out.push(Prop { name: String::new(), optional: false, ty, spread: true, location });
            } else {
                let name = match self.bump() {
                    Some(Tok::Ident(s)) | Some(Tok::Str(s)) => s,
                    _ => return Err(self.err("expected property name")),
                };
                let optional = self.eat_punct('?');
                self.expect_punct(':')?;
                let ty = self.type_expr()?;
                if self.eat_punct('=') {
                    self.skip_default(close)?;
                }
                out.push(Prop { name, optional, ty, spread: false, location });
            }
            if !self.eat_punct(',') {
                self.eat_punct(';');
            }
        }
    }

    fn skip_default(&mut self, close: char) -> Result<()> {
        let mut depth = 0i32;
        loop {
            match self.peek() {
                None => return Err(self.err("unterminated default value")),
                Some(Tok::Punct(c)) if depth == 0 && (*c == ',' || *c == ';' || *c == close) => {
                    return Ok(())
                }
                Some(Tok::Punct('{')) | Some(Tok::Punct('(')) | Some(Tok::Punct('[')) => depth += 1,
                Some(Tok::Punct('}')) | Some(Tok::Punct(')')) | Some(Tok::Punct(']')) => depth -= 1,
                Some(_) => {}
            }
            self.pos += 1;
        }
    }

    fn type_expr(&mut self) -> Result<TypeExpr> {
        self.eat_punct('|');
        let first = self.type_postfix()?;
        if self.at_punct('|') {
            let mut variants = vec![first];
            while self.eat_punct('|') {
                variants.push(self.type_postfix()?);
            }
            return Ok(TypeExpr::Union(variants));
        }
        if self.at_punct('&') {
            let mut parts = vec![first];
            while self.eat_punct('&') {
                parts.push(self.type_postfix()?);
            }
            return Ok(TypeExpr::Intersection(parts));
        }
        Ok(first)
    }

    fn type_postfix(&mut self) -> Result<TypeExpr> {
        let mut ty = self.type_primary()?;
        while self.at_punct('[') && self.peek_at(1) == Some(&Tok::Punct(']')) {
            self.pos += 2;
            ty = TypeExpr::Array(Box::new(ty));
        }
        Ok(ty)
    }

    fn type_primary(&mut self) -> Result<TypeExpr> {
        match self.peek() {
            Some(Tok::Punct('{')) => {
                self.pos += 1;
                Ok(TypeExpr::Inline(self.props('}')?))
            }
            Some(Tok::Punct('(')) => {
                self.pos += 1;
                let t = self.type_expr()?;
                self.expect_punct(')')?;
                Ok(t)
            }
            Some(Tok::Punct('[')) => {
                self.skip_group('[', ']')?;
                Ok(TypeExpr::Opaque)
            }
            Some(Tok::Str(_)) => {
                self.pos += 1;
                Ok(TypeExpr::StrLiteral)
            }
            Some(Tok::Num(_)) => {
                self.pos += 1;
                Ok(TypeExpr::NumLiteral)
            }
            Some(Tok::Ident(_)) => {
                let name = self.dotted_ident()?;
                let mut args = Vec::new();
                if self.eat_punct('<') {
                    while !self.eat_punct('>') {
                        if self.peek().is_none() {
                            return Err(self.err("unclosed template arguments"));
                        }
                        // named template arguments `T = X`
                        if matches!(self.peek(), Some(Tok::Ident(_)))
                            && self.peek_at(1) == Some(&Tok::Punct('='))
                        {
                            self.pos += 2;
                        }
                        args.push(self.type_expr()?);
                        self.eat_punct(',');
                    }
                }
                Ok(TypeExpr::Named { name, args })
            }
            _ => Err(self.err(format!("expected a type, found {}", self.describe()))),
        }
    }
}

fn route_of(decos: &[Decorator]) -> &str {
    decos
        .iter()
        .find(|d| d.name == "route")
        .and_then(|d| d.args.first())
        .map(String::as_str)
        .unwrap_or("")
}

fn join_route(prefix: &str, route: &str) -> String {
    if route.is_empty() {
        return prefix.to_string();
    }
    format!("{}/{}", prefix.trim_end_matches('/'), route.trim_start_matches('/'))
}

fn location_of(decos: &[Decorator]) -> Location {
    for d in decos {
        match d.name.as_str() {
            "path"       => return Location::Path,
            "query"      => return Location::Query,
            "header"     => return Location::Header,
            "cookie"     => return Location::Cookie,
            "body" | "bodyRoot" | "multipartBody" => return Location::Body,
            "statusCode" => return Location::StatusCode,
            _ => {}
        }
    }
    Location::Plain
}

// ─── Resolution ──────────────────────────────────────────────────────────────

struct Resolver<'a> {
    decls: &'a Declarations,
}

type Subst = BTreeMap<String, TypeExpr>;

impl Resolver<'_> {
    fn substitute(ty: &TypeExpr, subst: &Subst) -> TypeExpr {
        if subst.is_empty() {
            return ty.clone();
        }
        match ty {
            TypeExpr::Named { name, args } if args.is_empty() => {
                subst.get(name).cloned().unwrap_or_else(|| ty.clone())
            }
            TypeExpr::Named { name, args } => TypeExpr::Named {
                name: name.clone(),
                args: args.iter().map(|a| Self::substitute(a, subst)).collect(),
            },
            TypeExpr::Inline(props) => TypeExpr::Inline(
                props
                    .iter()
                    .map(|p| Prop { ty: Self::substitute(&p.ty, subst), ..p.clone() })
                    .collect(),
            ),
            TypeExpr::Array(inner) => TypeExpr::Array(Box::new(Self::substitute(inner, subst))),
            TypeExpr::Union(v) => TypeExpr::Union(v.iter().map(|t| Self::substitute(t, subst)).collect()),
            TypeExpr::Intersection(v) => {
                TypeExpr::Intersection(v.iter().map(|t| Self::substitute(t, subst)).collect())
            }
            other => other.clone(),
        }
    }

    fn lookup_model(&self, name: &str) -> Option<(&str, &ModelDecl)> {
        if let Some((k, m)) = self.decls.models.get_key_value(name) {
            return Some((k.as_str(), m));
        }
        let short = name.rsplit('.').next()?;
        self.decls.models.get_key_value(short).map(|(k, m)| (k.as_str(), m))
    }

    fn lookup_alias(&self, name: &str) -> Option<&TypeExpr> {
        self.decls.aliases.get(name).or_else(|| {
            let short = name.rsplit('.').next()?;
            self.decls.aliases.get(short)
        })
    }

    fn is_enum(&self, name: &str) -> bool {
        self.decls.enums.contains(name)
            || name.rsplit('.').next().is_some_and(|s| self.decls.enums.contains(s))
    }

    /// Flattened property list of an object-like type, or None for scalars.
    fn object_props(&self, ty: &TypeExpr, visiting: &mut Vec<String>) -> Option<Vec<Prop>> {
        match ty {
            TypeExpr::Inline(props) => Some(self.expand(props, visiting)),
            TypeExpr::Intersection(parts) => {
                let mut out = Vec::new();
                for p in parts {
                    out.extend(self.object_props(p, visiting)?);
                }
                Some(out)
            }
            TypeExpr::Union(variants) => variants
                .iter()
                .find(|v| !self.is_error_type(v))
                .and_then(|v| self.object_props(v, visiting)),
            TypeExpr::Named { name, args } => {
                if let Some((key, model)) = self.lookup_model(name) {
                    if visiting.iter().any(|v| v == key) {
                        return None;
                    }
                    let subst: Subst = model.params.iter().cloned().zip(args.iter().cloned()).collect();
                    visiting.push(key.to_string());
                    let mut out = Vec::new();
                    if let Some(base) = &model.base {
                        if let Some(base_props) = self.object_props(&Self::substitute(base, &subst), visiting) {
                            out.extend(base_props);
                        }
                    }
                    let own: Vec<Prop> = model
                        .props
                        .iter()
                        .map(|p| Prop { ty: Self::substitute(&p.ty, &subst), ..p.clone() })
                        .collect();
                    out.extend(self.expand(&own, visiting));
                    visiting.pop();
                    return Some(out);
                }
                if let Some(target) = self.lookup_alias(name) {
                    if visiting.iter().any(|v| v == name) {
                        return None;
                    }
                    visiting.push(name.clone());
                    let props = self.object_props(&target.clone(), visiting);
                    visiting.pop();
                    return props;
                }
                // unknown template wrapper such as `OkResponse<Widget>`
                args.first().and_then(|a| self.object_props(a, visiting))
            }
            _ => None,
        }
    }

    fn expand(&self, props: &[Prop], visiting: &mut Vec<String>) -> Vec<Prop> {
        let mut out = Vec::new();
        for p in props {
            if p.spread {
                if let Some(inner) = self.object_props(&p.ty, visiting) {
                    out.extend(inner);
                }
            } else {
                out.push(p.clone());
            }
        }
        out
    }

    fn is_error_type(&self, ty: &TypeExpr) -> bool {
        match ty {
            TypeExpr::Named { name, .. } => {
                self.lookup_model(name).map(|(_, m)| m.is_error).unwrap_or(false)
                    || name.rsplit('.').next().is_some_and(|s| s.contains("Error"))
            }
            _ => false,
        }
    }

    /// Request or response message: headers and status codes are dropped,
    /// `@body` contents are flattened to the top level. Once an explicit body
    /// exists, unannotated properties are not part of the payload.
    fn message(&self, props: &[Prop], visiting: &mut Vec<String>) -> Schema {
        let props = self.expand(props, visiting);
        let has_body = props.iter().any(|p| p.location == Location::Body);
        let mut schema = Schema::new();
        for p in &props {
            match p.location {
                Location::Header | Location::Cookie | Location::StatusCode => {}
                Location::Plain if has_body => {}
                Location::Body => {
                    let target = match &p.ty {
                        TypeExpr::Array(inner) => inner.as_ref(),
                        other => other,
                    };
                    match self.object_schema(target, visiting) {
                        Some(inner) => schema.extend(inner),
                        None => schema.insert(Field {
                            name:     p.name.clone(),
                            ty:       self.field_type(&p.ty, visiting),
                            optional: p.optional,
                        }),
                    }
                }
                Location::Plain | Location::Path | Location::Query => schema.insert(Field {
                    name:     p.name.clone(),
                    ty:       self.field_type(&p.ty, visiting),
                    optional: p.optional,
                }),
            }
        }
        schema
    }

    /// Message schema of an object-like type; a named model stays on the
    /// visiting stack while its fields resolve so self-references stop.
    fn object_schema(&self, ty: &TypeExpr, visiting: &mut Vec<String>) -> Option<Schema> {
        let key = match ty {
            TypeExpr::Named { name, .. } => self.lookup_model(name).map(|(k, _)| k.to_string()),
            _ => None,
        };
        if let Some(k) = &key {
            if visiting.contains(k) {
                return None;
            }
        }
        let props = self.object_props(ty, visiting)?;
        if let Some(k) = &key {
            visiting.push(k.clone());
        }
        let schema = self.message(&props, visiting);
        if key.is_some() {
            visiting.pop();
        }
        Some(schema)
    }

    fn field_type(&self, ty: &TypeExpr, visiting: &mut Vec<String>) -> FieldType {
        match ty {
            TypeExpr::StrLiteral => FieldType::Scalar(ScalarKind::String),
            TypeExpr::NumLiteral => FieldType::Scalar(ScalarKind::Number),
            TypeExpr::Opaque => FieldType::Any,
            TypeExpr::Array(inner) => FieldType::Array(Box::new(self.field_type(inner, visiting))),
            TypeExpr::Union(variants) => variants
                .iter()
                .find(|v| !matches!(v, TypeExpr::Named { name, .. } if name == "null"))
                .map(|v| self.field_type(v, visiting))
                .unwrap_or(FieldType::Any),
            TypeExpr::Inline(_) | TypeExpr::Intersection(_) => self
                .object_schema(ty, visiting)
                .map(FieldType::Object)
                .unwrap_or(FieldType::Any),
            TypeExpr::Named { name, args } => {
                let short = name.rsplit('.').next().unwrap_or(name);
                if short == "Array" {
                    let inner = args.first().map(|a| self.field_type(a, visiting)).unwrap_or(FieldType::Any);
                    return FieldType::Array(Box::new(inner));
                }
                if matches!(short, "Record" | "unknown" | "void" | "null" | "never" | "object") {
                    return FieldType::Any;
                }
                if self.lookup_model(name).is_some() {
                    return self
                        .object_schema(ty, visiting)
                        .map(FieldType::Object)
                        .unwrap_or(FieldType::Any);
                }
                if self.is_enum(name) {
                    return FieldType::Scalar(ScalarKind::String);
                }
                if let Some(target) = self.lookup_alias(name) {
                    if visiting.iter().any(|v| v == name) {
                        return FieldType::Any;
                    }
                    visiting.push(name.clone());
                    let t = self.field_type(&target.clone(), visiting);
                    visiting.pop();
                    return t;
                }
                let kind = ScalarKind::from_name(short);
                if kind.is_known() {
                    return FieldType::Scalar(kind);
                }
                match args.first() {
                    Some(a) => self.field_type(a, visiting),
                    None => {
                        tracing::debug!(type_name = %name, "undeclared typespec type treated as any");
                        FieldType::Any
                    }
                }
            }
        }
    }

    fn response(&self, ty: &TypeExpr, visiting: &mut Vec<String>) -> Schema {
        match ty {
            TypeExpr::Union(variants) => variants
                .iter()
                .find(|v| !self.is_error_type(v))
                .map(|v| self.response(v, visiting))
                .unwrap_or_default(),
            TypeExpr::Array(inner) => self.response(inner, visiting),
            TypeExpr::Named { name, args } if name.rsplit('.').next() == Some("Array") => args
                .first()
                .map(|a| self.response(a, visiting))
                .unwrap_or_default(),
            other => self.object_schema(other, visiting).unwrap_or_default(),
        }
    }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

pub fn parse(text: &str) -> Result<Vec<OperationDecl>> {
    let toks = lex(text)?;
    let mut parser = Parser { toks, pos: 0, decls: Declarations::default() };
    parser.items("", false)?;
    let decls = parser.decls;

    let resolver = Resolver { decls: &decls };

    let mut short_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for op in &decls.ops {
        *short_counts.entry(op.name.as_str()).or_default() += 1;
    }

    let mut out = Vec::with_capacity(decls.ops.len());
    for op in &decls.ops {
        let name = match &op.interface {
            Some(iface) if short_counts.get(op.name.as_str()).copied().unwrap_or(0) > 1 => {
                format!("{}.{}", iface, op.name)
            }
            _ => op.name.clone(),
        };

        let mut visiting = Vec::new();
        let params = resolver.expand(&op.params, &mut visiting);
        let request = resolver.message(&params, &mut visiting);
        let response = resolver.response(&op.returns, &mut visiting);

        let mut route = RouteTemplate::parse(&op.route);
        for p in params.iter().filter(|p| p.location == Location::Path) {
            if !route.has_param(&p.name) {
                route = route.with_param(&p.name);
            }
        }

        let has_body = params
            .iter()
            .any(|p| matches!(p.location, Location::Body | Location::Plain));
        let verb = op.verb.unwrap_or(if has_body { Verb::Post } else { Verb::Get });

        tracing::trace!(operation = %name, line = op.line, %verb, route = %route, "typespec operation");
        out.push(OperationDecl {
            name,
            verb,
            route,
            request,
            response,
            depends_on: op.depends.clone(),
        });
    }
    Ok(out)
}
