//! A Go-template-compatible renderer for tags, labels, build args and
//! Dockerfiles.
//!
//! Supported syntax:
//!
//! ```text
//! {{ .alpine }}                           variable lookup
//! {{ .variant.slim }}                     nested lookup into a map value
//! {{ .name | lower }}                     pipelines; the value is passed as the last argument
//! {{ .suffix | default "latest" }}        function calls with arguments
//! {{ (splitList "." .alpine) | first }}   parenthesized sub-pipelines
//! {{ if eq .variant "slim" }}..{{ else if .debug }}..{{ else }}..{{ end }}
//! {{ range .packages }}{{ . }} {{ else }}none{{ end }}
//! {{ with .variant.slim }}{{ . }}{{ end }}
//! {{ $.tag }}                             the top-level context from inside a block
//! {{- .x -}}                              trim surrounding whitespace
//! {{/* comment */}}
//! ```
//!
//! Functions: `lower`, `upper`, `trim`, `default`, `splitList`, `first`,
//! `last`, `join`, `replace`, `contains`, `eq`, `ne`, `not`, `and`, `or`.
//!
//! An unknown top-level key is an error. A missing key inside an existing
//! map renders as an empty string, which lets map-valued axes be probed
//! per branch.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Mapping, Number, Value};

/// Values visible to a template, keyed by top-level name.
pub type Context = BTreeMap<String, Value>;

static ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{(-)?(.*?)(-)?\}\}").expect("valid action regex"));

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed action in template {template:?}")]
    Unclosed { template: String },

    #[error("empty action in template {template:?}")]
    EmptyAction { template: String },

    #[error("invalid expression '{expr}' in template {template:?}")]
    InvalidExpression { expr: String, template: String },

    #[error("undefined variable '{key}' in template {template:?}")]
    MissingKey { key: String, template: String },

    #[error("can't read field '{field}' of non-map value in template {template:?}")]
    NotAMap { field: String, template: String },

    #[error("unknown function '{name}' in template {template:?}")]
    UnknownFunction { name: String, template: String },

    #[error("wrong arguments to '{name}': {reason} in template {template:?}")]
    BadArguments {
        name: String,
        reason: String,
        template: String,
    },

    #[error("missing {{{{ end }}}} for '{keyword}' in template {template:?}")]
    UnclosedBlock { keyword: String, template: String },

    #[error("unexpected '{action}' in template {template:?}")]
    UnexpectedAction { action: String, template: String },

    #[error("can't range over {kind} in template {template:?}")]
    NotIterable { kind: String, template: String },
}

/// Render a single template string against `ctx`.
pub fn render(template: &str, ctx: &Context) -> Result<String, TemplateError> {
    let items = scan(template)?;
    let nodes = Parser {
        items,
        pos: 0,
        template,
    }
    .parse()?;

    let mut out = String::with_capacity(template.len());
    Renderer { ctx, template }.nodes(&nodes, &Dot::Root, &mut out)?;
    Ok(out)
}

/// Render every entry, trimming whitespace. Entries that render empty are dropped.
pub fn render_list(templates: &[String], ctx: &Context) -> Result<Vec<String>, TemplateError> {
    let mut rendered = Vec::with_capacity(templates.len());
    for template in templates {
        let value = render(template, ctx)?;
        let value = value.trim();
        if !value.is_empty() {
            rendered.push(value.to_owned());
        }
    }
    if !rendered.is_empty() {
        tracing::trace!(source = ?templates, rendered = ?rendered, "templated list");
    }
    Ok(rendered)
}

/// Render both keys and values of a map, trimming whitespace.
pub fn render_map(
    templates: &BTreeMap<String, String>,
    ctx: &Context,
) -> Result<BTreeMap<String, String>, TemplateError> {
    let mut rendered = BTreeMap::new();
    for (key, value) in templates {
        let key = render(key, ctx)?.trim().to_owned();
        let value = render(value, ctx)?.trim().to_owned();
        rendered.insert(key, value);
    }
    Ok(rendered)
}

/// Textual form of a value, as it appears in rendered output.
///
/// Lists are comma-joined, maps become sorted `key=value` pairs.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(items) => items.iter().map(value_text).collect::<Vec<_>>().join(","),
        Value::Mapping(entries) => {
            let mut pairs: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}={}", value_text(k), value_text(v)))
                .collect();
            pairs.sort();
            pairs.join(",")
        }
        Value::Tagged(tagged) => value_text(&tagged.value),
    }
}

/// Go truthiness: false, zero, null and empty collections are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Sequence(items) => !items.is_empty(),
        Value::Mapping(entries) => !entries.is_empty(),
        Value::Tagged(tagged) => is_truthy(&tagged.value),
    }
}

// ── Scanning ──

enum Item<'t> {
    Text(&'t str),
    Action(&'t str),
}

/// Split a template into text and actions, applying `{{-`/`-}}` trimming.
fn scan(template: &str) -> Result<Vec<Item<'_>>, TemplateError> {
    let mut items = Vec::new();
    let mut last = 0;
    let mut trim_next = false;

    for caps in ACTION.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let mut literal = &template[last..whole.start()];
        if trim_next {
            literal = literal.trim_start();
        }
        if caps.get(1).is_some() {
            literal = literal.trim_end();
        }
        if !literal.is_empty() {
            items.push(Item::Text(literal));
        }

        let expr = caps.get(2).map_or("", |m| m.as_str()).trim();
        if expr.is_empty() {
            return Err(TemplateError::EmptyAction {
                template: template.to_owned(),
            });
        }
        if !(expr.starts_with("/*") && expr.ends_with("*/")) {
            items.push(Item::Action(expr));
        }

        trim_next = caps.get(3).is_some();
        last = whole.end();
    }

    let mut tail = &template[last..];
    if trim_next {
        tail = tail.trim_start();
    }
    if tail.contains("{{") {
        return Err(TemplateError::Unclosed {
            template: template.to_owned(),
        });
    }
    if !tail.is_empty() {
        items.push(Item::Text(tail));
    }

    Ok(items)
}

// ── Parsing ──

#[derive(Debug)]
enum Node {
    Text(String),
    Output(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        pipeline: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    With {
        pipeline: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

type Pipeline = Vec<Command>;
type Command = Vec<Operand>;

#[derive(Debug)]
enum Operand {
    /// `.a.b` relative to the current dot; empty for `.` itself
    Field(Vec<String>),
    /// `$.a.b` relative to the top-level context
    Root(Vec<String>),
    Literal(Value),
    Function(String),
    Sub(Pipeline),
}

/// How a block body ended.
enum Stop {
    End,
    Else,
    ElseIf(Pipeline),
}

struct Parser<'t> {
    items: Vec<Item<'t>>,
    pos: usize,
    template: &'t str,
}

impl Parser<'_> {
    fn parse(mut self) -> Result<Vec<Node>, TemplateError> {
        let (nodes, stop) = self.block()?;
        match stop {
            None => Ok(nodes),
            Some(Stop::End) => Err(self.unexpected("end")),
            Some(Stop::Else | Stop::ElseIf(_)) => Err(self.unexpected("else")),
        }
    }

    fn block(&mut self) -> Result<(Vec<Node>, Option<Stop>), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(item) = self.items.get(self.pos) {
            self.pos += 1;
            let expr = match *item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text.to_owned()));
                    continue;
                }
                Item::Action(expr) => expr,
            };

            let (keyword, rest) = expr
                .split_once(char::is_whitespace)
                .map_or((expr, ""), |(keyword, rest)| (keyword, rest.trim()));
            match keyword {
                "end" if rest.is_empty() => return Ok((nodes, Some(Stop::End))),
                "else" if rest.is_empty() => return Ok((nodes, Some(Stop::Else))),
                "else" => {
                    let Some(condition) = rest
                        .strip_prefix("if")
                        .filter(|condition| condition.starts_with(char::is_whitespace))
                    else {
                        return Err(self.invalid(expr));
                    };
                    let condition = self.condition(expr, condition)?;
                    return Ok((nodes, Some(Stop::ElseIf(condition))));
                }
                "if" => {
                    let first = self.condition(expr, rest)?;
                    nodes.push(self.conditional(first)?);
                }
                "range" | "with" => {
                    let pipeline = self.condition(expr, rest)?;
                    let (body, otherwise) = self.single_branch(keyword)?;
                    nodes.push(if keyword == "range" {
                        Node::Range {
                            pipeline,
                            body,
                            otherwise,
                        }
                    } else {
                        Node::With {
                            pipeline,
                            body,
                            otherwise,
                        }
                    });
                }
                "end" | "define" | "template" | "block" => return Err(self.invalid(expr)),
                _ => nodes.push(Node::Output(parse_pipeline(expr, self.template)?)),
            }
        }
        Ok((nodes, None))
    }

    fn condition(&self, expr: &str, source: &str) -> Result<Pipeline, TemplateError> {
        if source.trim().is_empty() {
            return Err(self.invalid(expr));
        }
        parse_pipeline(source, self.template)
    }

    fn conditional(&mut self, first: Pipeline) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut condition = first;
        loop {
            let (body, stop) = self.block()?;
            branches.push((condition, body));
            match stop {
                Some(Stop::End) => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
                Some(Stop::ElseIf(next)) => condition = next,
                Some(Stop::Else) => {
                    let otherwise = self.else_tail("if")?;
                    return Ok(Node::If {
                        branches,
                        otherwise,
                    });
                }
                None => return Err(self.unclosed("if")),
            }
        }
    }

    fn single_branch(&mut self, keyword: &str) -> Result<(Vec<Node>, Vec<Node>), TemplateError> {
        let (body, stop) = self.block()?;
        match stop {
            Some(Stop::End) => Ok((body, Vec::new())),
            Some(Stop::Else) => Ok((body, self.else_tail(keyword)?)),
            Some(Stop::ElseIf(_)) => Err(self.unexpected("else if")),
            None => Err(self.unclosed(keyword)),
        }
    }

    fn else_tail(&mut self, keyword: &str) -> Result<Vec<Node>, TemplateError> {
        let (body, stop) = self.block()?;
        match stop {
            Some(Stop::End) => Ok(body),
            Some(Stop::Else | Stop::ElseIf(_)) => Err(self.unexpected("else")),
            None => Err(self.unclosed(keyword)),
        }
    }

    fn invalid(&self, expr: &str) -> TemplateError {
        TemplateError::InvalidExpression {
            expr: expr.to_owned(),
            template: self.template.to_owned(),
        }
    }

    fn unexpected(&self, action: &str) -> TemplateError {
        TemplateError::UnexpectedAction {
            action: action.to_owned(),
            template: self.template.to_owned(),
        }
    }

    fn unclosed(&self, keyword: &str) -> TemplateError {
        TemplateError::UnclosedBlock {
            keyword: keyword.to_owned(),
            template: self.template.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Vec<String>),
    Root(Vec<String>),
    Literal(Value),
    Ident(String),
    Pipe,
    Open,
    Close,
}

fn parse_pipeline(expr: &str, template: &str) -> Result<Pipeline, TemplateError> {
    let invalid = || TemplateError::InvalidExpression {
        expr: expr.to_owned(),
        template: template.to_owned(),
    };

    let tokens = lex(expr).ok_or_else(invalid)?;
    let mut pos = 0;
    let pipeline = pipeline_tokens(&tokens, &mut pos).ok_or_else(invalid)?;
    if pos != tokens.len() {
        return Err(invalid());
    }
    Ok(pipeline)
}

fn pipeline_tokens(tokens: &[Token], pos: &mut usize) -> Option<Pipeline> {
    let mut pipeline = Vec::new();
    loop {
        let mut command = Vec::new();
        while let Some(token) = tokens.get(*pos) {
            let operand = match token {
                Token::Pipe | Token::Close => break,
                Token::Field(path) => Operand::Field(path.clone()),
                Token::Root(path) => Operand::Root(path.clone()),
                Token::Literal(value) => Operand::Literal(value.clone()),
                Token::Ident(name) => Operand::Function(name.clone()),
                Token::Open => {
                    *pos += 1;
                    let sub = pipeline_tokens(tokens, pos)?;
                    if tokens.get(*pos) != Some(&Token::Close) {
                        return None;
                    }
                    Operand::Sub(sub)
                }
            };
            *pos += 1;
            command.push(operand);
        }
        if command.is_empty() {
            return None;
        }
        pipeline.push(command);

        if tokens.get(*pos) == Some(&Token::Pipe) {
            *pos += 1;
        } else {
            return Some(pipeline);
        }
    }
}

/// Tokenize an action. `None` on malformed input.
fn lex(expr: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let path = |chars: &[char], i: &mut usize| -> Option<Vec<String>> {
        let start = *i;
        while *i < chars.len() && (is_word(chars[*i]) || chars[*i] == '.') {
            *i += 1;
        }
        let text: String = chars[start..*i].iter().collect();
        if text.is_empty() {
            return Some(Vec::new());
        }
        let segments: Vec<String> = text.split('.').map(str::to_owned).collect();
        (!segments.iter().any(String::is_empty)).then_some(segments)
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '.' => {
                i += 1;
                tokens.push(Token::Field(path(&chars, &mut i)?));
            }
            '$' => {
                i += 1;
                let segments = if chars.get(i) == Some(&'.') {
                    i += 1;
                    path(&chars, &mut i)?
                } else {
                    Vec::new()
                };
                tokens.push(Token::Root(segments));
            }
            '"' => {
                i += 1;
                let mut text = String::new();
                loop {
                    let c = *chars.get(i)?;
                    i += 1;
                    match c {
                        '"' => break,
                        '\\' => {
                            let escaped = *chars.get(i)?;
                            i += 1;
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                        }
                        other => text.push(other),
                    }
                }
                tokens.push(Token::Literal(Value::String(text)));
            }
            '`' => {
                i += 1;
                let start = i;
                while *chars.get(i)? != '`' {
                    i += 1;
                }
                tokens.push(Token::Literal(Value::String(chars[start..i].iter().collect())));
                i += 1;
            }
            _ if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = match text.parse::<i64>() {
                    Ok(n) => Number::from(n),
                    Err(_) => Number::from(text.parse::<f64>().ok()?),
                };
                tokens.push(Token::Literal(Value::Number(number)));
            }
            _ if is_word(c) => {
                let start = i;
                while i < chars.len() && is_word(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "nil" => Token::Literal(Value::Null),
                    _ => Token::Ident(word),
                });
            }
            _ => return None,
        }
    }

    Some(tokens)
}

// ── Evaluation ──

/// The value `.` refers to.
enum Dot<'v> {
    Root,
    Value(&'v Value),
}

struct Renderer<'a> {
    ctx: &'a Context,
    template: &'a str,
}

impl Renderer<'_> {
    fn nodes(&self, nodes: &[Node], dot: &Dot<'_>, out: &mut String) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output(pipeline) => out.push_str(&value_text(&self.pipeline(pipeline, dot)?)),
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = false;
                    for (condition, body) in branches {
                        if is_truthy(&self.pipeline(condition, dot)?) {
                            self.nodes(body, dot, out)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        self.nodes(otherwise, dot, out)?;
                    }
                }
                Node::With {
                    pipeline,
                    body,
                    otherwise,
                } => {
                    let value = self.pipeline(pipeline, dot)?;
                    if is_truthy(&value) {
                        self.nodes(body, &Dot::Value(&value), out)?;
                    } else {
                        self.nodes(otherwise, dot, out)?;
                    }
                }
                Node::Range {
                    pipeline,
                    body,
                    otherwise,
                } => {
                    let items = self.iterate(self.pipeline(pipeline, dot)?)?;
                    if items.is_empty() {
                        self.nodes(otherwise, dot, out)?;
                    }
                    for item in &items {
                        self.nodes(body, &Dot::Value(item), out)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Elements of a list, or values of a map in key order.
    fn iterate(&self, value: Value) -> Result<Vec<Value>, TemplateError> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Sequence(items) => Ok(items),
            Value::Mapping(entries) => {
                let mut pairs: Vec<(String, Value)> = entries
                    .into_iter()
                    .map(|(k, v)| (value_text(&k), v))
                    .collect();
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(pairs.into_iter().map(|(_, v)| v).collect())
            }
            Value::Tagged(tagged) => self.iterate(tagged.value),
            other => Err(TemplateError::NotIterable {
                kind: kind(&other).to_owned(),
                template: self.template.to_owned(),
            }),
        }
    }

    fn pipeline(&self, pipeline: &[Command], dot: &Dot<'_>) -> Result<Value, TemplateError> {
        let mut carried = None;
        for command in pipeline {
            carried = Some(self.command(command, dot, carried.take())?);
        }
        Ok(carried.unwrap_or(Value::Null))
    }

    fn command(
        &self,
        command: &[Operand],
        dot: &Dot<'_>,
        piped: Option<Value>,
    ) -> Result<Value, TemplateError> {
        match command {
            [Operand::Function(name), rest @ ..] => {
                let mut args = rest
                    .iter()
                    .map(|operand| self.operand(operand, dot))
                    .collect::<Result<Vec<_>, _>>()?;
                args.extend(piped);
                self.call(name, args)
            }
            [operand] if piped.is_none() => self.operand(operand, dot),
            _ => Err(TemplateError::InvalidExpression {
                expr: format!("{command:?}"),
                template: self.template.to_owned(),
            }),
        }
    }

    fn operand(&self, operand: &Operand, dot: &Dot<'_>) -> Result<Value, TemplateError> {
        match operand {
            Operand::Field(path) => self.lookup(dot, path),
            Operand::Root(path) => self.lookup(&Dot::Root, path),
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Function(name) => self.call(name, Vec::new()),
            Operand::Sub(pipeline) => self.pipeline(pipeline, dot),
        }
    }

    fn lookup(&self, dot: &Dot<'_>, path: &[String]) -> Result<Value, TemplateError> {
        let null = Value::Null;
        let (mut current, rest) = match dot {
            Dot::Root => {
                let Some((root, rest)) = path.split_first() else {
                    return Ok(Value::Mapping(
                        self.ctx
                            .iter()
                            .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
                            .collect::<Mapping>(),
                    ));
                };
                let value = self.ctx.get(root).ok_or_else(|| TemplateError::MissingKey {
                    key: root.clone(),
                    template: self.template.to_owned(),
                })?;
                (value, rest)
            }
            Dot::Value(value) => (*value, path),
        };

        for field in rest {
            current = match current {
                Value::Mapping(entries) => entries.get(field.as_str()).unwrap_or(&null),
                Value::Null => &null,
                _ => {
                    return Err(TemplateError::NotAMap {
                        field: field.clone(),
                        template: self.template.to_owned(),
                    });
                }
            };
        }
        Ok(current.clone())
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
        let text = |value: &Value| value_text(value);
        let value = match name {
            "lower" => {
                let [s] = self.arity::<1>(name, args)?;
                Value::String(text(&s).to_lowercase())
            }
            "upper" => {
                let [s] = self.arity::<1>(name, args)?;
                Value::String(text(&s).to_uppercase())
            }
            "trim" => {
                let [s] = self.arity::<1>(name, args)?;
                Value::String(text(&s).trim().to_owned())
            }
            "default" => {
                let [fallback, given] = self.arity::<2>(name, args)?;
                if is_truthy(&given) { given } else { fallback }
            }
            "splitList" => {
                let [separator, s] = self.arity::<2>(name, args)?;
                let separator = text(&separator);
                Value::Sequence(
                    text(&s)
                        .split(separator.as_str())
                        .map(Value::from)
                        .collect(),
                )
            }
            "first" | "last" => {
                let [list] = self.arity::<1>(name, args)?;
                let items = match list {
                    Value::Sequence(items) => items,
                    other => {
                        return Err(self.bad_arguments(name, format!("expected a list, got {}", kind(&other))));
                    }
                };
                let item = if name == "first" { items.first() } else { items.last() };
                item.cloned().unwrap_or(Value::Null)
            }
            "join" => {
                let [separator, list] = self.arity::<2>(name, args)?;
                match list {
                    Value::Sequence(items) => Value::String(
                        items
                            .iter()
                            .map(value_text)
                            .collect::<Vec<_>>()
                            .join(text(&separator).as_str()),
                    ),
                    other => Value::String(text(&other)),
                }
            }
            "replace" => {
                let [old, new, s] = self.arity::<3>(name, args)?;
                Value::String(text(&s).replace(&text(&old), &text(&new)))
            }
            "contains" => {
                let [needle, s] = self.arity::<2>(name, args)?;
                Value::Bool(text(&s).contains(&text(&needle)))
            }
            "eq" => {
                let Some((first, rest)) = args.split_first().filter(|(_, rest)| !rest.is_empty()) else {
                    return Err(self.bad_arguments(name, format!("expected at least 2, got {}", args.len())));
                };
                let first = text(first);
                Value::Bool(rest.iter().any(|other| text(other) == first))
            }
            "ne" => {
                let [a, b] = self.arity::<2>(name, args)?;
                Value::Bool(text(&a) != text(&b))
            }
            "not" => {
                let [x] = self.arity::<1>(name, args)?;
                Value::Bool(!is_truthy(&x))
            }
            "and" | "or" => {
                if args.is_empty() {
                    return Err(self.bad_arguments(name, "expected at least 1, got 0".to_owned()));
                }
                let stop_on = name == "or";
                let mut last = Value::Null;
                for arg in args {
                    if is_truthy(&arg) == stop_on {
                        return Ok(arg);
                    }
                    last = arg;
                }
                last
            }
            _ => {
                return Err(TemplateError::UnknownFunction {
                    name: name.to_owned(),
                    template: self.template.to_owned(),
                });
            }
        };
        Ok(value)
    }

    fn arity<const N: usize>(&self, name: &str, args: Vec<Value>) -> Result<[Value; N], TemplateError> {
        let got = args.len();
        <[Value; N]>::try_from(args)
            .map_err(|_| self.bad_arguments(name, format!("expected {N}, got {got}")))
    }

    fn bad_arguments(&self, name: &str, reason: String) -> TemplateError {
        TemplateError::BadArguments {
            name: name.to_owned(),
            reason,
            template: self.template.to_owned(),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "map",
        Value::Tagged(_) => "tagged value",
    }
}
