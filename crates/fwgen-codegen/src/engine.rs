//! The template substitution engine.
//!
//! Deliberately not Turing-complete: variable expansion with an optional
//! format spec, boolean conditionals, and iteration over fixed-length lists.
//! Everything else in a template passes through byte-for-byte, which keeps
//! the post-render cross-check tractable — every constant in a generated
//! file comes from one bounded substitution over one immutable context.
//!
//! Syntax:
//!
//! ```text
//! {{key}}             expand, default formatting
//! {{key:04x}}         zero-padded hex (also 04X, d, b)
//! {{#if key}}...{{else}}...{{/if}}
//! {{#if !key}}...{{/if}}
//! {{#each bars}}...{{/each}}
//! ```
//!
//! Inside an `#each` body, keys resolve against the current item first, then
//! the enclosing context.

use std::collections::BTreeMap;

use crate::context::{RenderContext, Value};
use crate::error::CodegenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Radix {
    Hex,
    HexUpper,
    Dec,
    Bin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FormatSpec {
    width: usize,
    radix: Radix,
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Var {
        key: String,
        spec: Option<FormatSpec>,
    },
    If {
        key: String,
        negated: bool,
        then_nodes: Vec<Node>,
        else_nodes: Vec<Node>,
    },
    Each {
        key: String,
        body: Vec<Node>,
    },
}

/// A parsed template, ready to render any number of times.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parses template text. Line endings are normalized to LF here so the
    /// rendered output is identical across platforms.
    pub fn parse(name: &str, text: &str) -> Result<Self, CodegenError> {
        let text = text.replace("\r\n", "\n");
        let tokens = tokenize(name, &text)?;
        let mut iter = tokens.into_iter().peekable();
        let nodes = parse_nodes(name, &mut iter, None)?;
        Ok(Self {
            name: name.to_string(),
            nodes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders against `ctx`. Referencing an undeclared key is a hard error.
    pub fn render(&self, ctx: &RenderContext) -> Result<String, CodegenError> {
        let mut out = String::new();
        render_nodes(&self.name, &self.nodes, ctx, None, &mut out)?;
        Ok(out)
    }

    /// Keys the template would touch but the context does not declare.
    /// Both branches of every conditional are checked: key presence is a
    /// static property of the context, not of this build's flag values.
    pub fn missing_keys(&self, ctx: &RenderContext) -> Vec<String> {
        let mut missing = Vec::new();
        collect_missing(&self.nodes, ctx, None, &mut missing);
        missing.sort();
        missing.dedup();
        missing
    }
}

enum Token {
    Text(String),
    Tag(String),
}

fn tokenize(name: &str, text: &str) -> Result<Vec<Token>, CodegenError> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            CodegenError::render(name, format!("unterminated `{{{{` near byte {start}"))
        })?;
        tokens.push(Token::Tag(after[..end].trim().to_string()));
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

fn parse_nodes(
    name: &str,
    tokens: &mut std::iter::Peekable<std::vec::IntoIter<Token>>,
    terminator: Option<&str>,
) -> Result<Vec<Node>, CodegenError> {
    let mut nodes = Vec::new();
    while let Some(token) = tokens.peek() {
        match token {
            Token::Text(_) => {
                if let Some(Token::Text(text)) = tokens.next() {
                    nodes.push(Node::Text(text));
                }
            }
            Token::Tag(tag) => {
                let tag = tag.clone();
                if Some(tag.as_str()) == terminator || (tag == "else" && terminator == Some("/if"))
                {
                    return Ok(nodes);
                }
                tokens.next();
                if let Some(rest) = tag.strip_prefix("#if ") {
                    let (key, negated) = match rest.trim().strip_prefix('!') {
                        Some(key) => (key.trim().to_string(), true),
                        None => (rest.trim().to_string(), false),
                    };
                    let then_nodes = parse_nodes(name, tokens, Some("/if"))?;
                    let else_nodes = match tokens.peek() {
                        Some(Token::Tag(t)) if t == "else" => {
                            tokens.next();
                            parse_nodes(name, tokens, Some("/if"))?
                        }
                        _ => Vec::new(),
                    };
                    expect_tag(name, tokens, "/if")?;
                    nodes.push(Node::If {
                        key,
                        negated,
                        then_nodes,
                        else_nodes,
                    });
                } else if let Some(rest) = tag.strip_prefix("#each ") {
                    let body = parse_nodes(name, tokens, Some("/each"))?;
                    expect_tag(name, tokens, "/each")?;
                    nodes.push(Node::Each {
                        key: rest.trim().to_string(),
                        body,
                    });
                } else if tag == "else" || tag == "/if" || tag == "/each" {
                    return Err(CodegenError::render(
                        name,
                        format!("unexpected `{{{{{tag}}}}}`"),
                    ));
                } else {
                    nodes.push(parse_var(name, &tag)?);
                }
            }
        }
    }
    if terminator.is_some() {
        return Err(CodegenError::render(name, "unclosed block"));
    }
    Ok(nodes)
}

fn expect_tag(
    name: &str,
    tokens: &mut std::iter::Peekable<std::vec::IntoIter<Token>>,
    expected: &str,
) -> Result<(), CodegenError> {
    match tokens.next() {
        Some(Token::Tag(tag)) if tag == expected => Ok(()),
        _ => Err(CodegenError::render(
            name,
            format!("expected `{{{{{expected}}}}}`"),
        )),
    }
}

fn parse_var(name: &str, tag: &str) -> Result<Node, CodegenError> {
    let (key, spec) = match tag.split_once(':') {
        Some((key, spec)) => (key.trim(), Some(parse_spec(name, tag, spec.trim())?)),
        None => (tag, None),
    };
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
    {
        return Err(CodegenError::render(name, format!("bad key `{tag}`")));
    }
    Ok(Node::Var {
        key: key.to_string(),
        spec,
    })
}

fn parse_spec(name: &str, tag: &str, spec: &str) -> Result<FormatSpec, CodegenError> {
    let radix_at = spec.len().saturating_sub(1);
    let radix = match spec.get(radix_at..) {
        Some("x") => Radix::Hex,
        Some("X") => Radix::HexUpper,
        Some("d") => Radix::Dec,
        Some("b") => Radix::Bin,
        _ => {
            return Err(CodegenError::render(
                name,
                format!("bad format spec in `{tag}`"),
            ))
        }
    };
    let width_digits = &spec[..radix_at];
    let width = if width_digits.is_empty() {
        0
    } else {
        width_digits.parse().map_err(|_| {
            CodegenError::render(name, format!("bad format width in `{tag}`"))
        })?
    };
    Ok(FormatSpec { width, radix })
}

type Scope<'a> = Option<&'a BTreeMap<String, Value>>;

fn lookup<'a>(ctx: &'a RenderContext, scope: Scope<'a>, key: &str) -> Option<&'a Value> {
    scope.and_then(|s| s.get(key)).or_else(|| ctx.get(key))
}

fn render_nodes(
    name: &str,
    nodes: &[Node],
    ctx: &RenderContext,
    scope: Scope<'_>,
    out: &mut String,
) -> Result<(), CodegenError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var { key, spec } => {
                let value = lookup(ctx, scope, key)
                    .ok_or_else(|| CodegenError::render(name, format!("undeclared key `{key}`")))?;
                out.push_str(&format_value(name, key, value, *spec)?);
            }
            Node::If {
                key,
                negated,
                then_nodes,
                else_nodes,
            } => {
                let value = lookup(ctx, scope, key)
                    .ok_or_else(|| CodegenError::render(name, format!("undeclared key `{key}`")))?;
                let truthy = value.is_truthy() ^ negated;
                let branch = if truthy { then_nodes } else { else_nodes };
                render_nodes(name, branch, ctx, scope, out)?;
            }
            Node::Each { key, body } => {
                let value = lookup(ctx, scope, key)
                    .ok_or_else(|| CodegenError::render(name, format!("undeclared key `{key}`")))?;
                let Value::List(items) = value else {
                    return Err(CodegenError::render(
                        name,
                        format!("`{key}` is not iterable"),
                    ));
                };
                for item in items {
                    render_nodes(name, body, ctx, Some(item), out)?;
                }
            }
        }
    }
    Ok(())
}

fn format_value(
    name: &str,
    key: &str,
    value: &Value,
    spec: Option<FormatSpec>,
) -> Result<String, CodegenError> {
    let int = match value {
        Value::Str(text) => {
            return match spec {
                None => Ok(text.clone()),
                Some(_) => Err(CodegenError::render(
                    name,
                    format!("format spec applied to string key `{key}`"),
                )),
            };
        }
        Value::Int(v) => *v,
        Value::Bool(v) => u64::from(*v),
        Value::List(_) => {
            return Err(CodegenError::render(
                name,
                format!("`{key}` is a list and cannot be expanded"),
            ));
        }
    };

    let Some(FormatSpec { width, radix }) = spec else {
        return Ok(int.to_string());
    };
    Ok(match radix {
        Radix::Hex => format!("{int:0width$x}"),
        Radix::HexUpper => format!("{int:0width$X}"),
        Radix::Dec => format!("{int:0width$}"),
        Radix::Bin => format!("{int:0width$b}"),
    })
}

fn collect_missing(nodes: &[Node], ctx: &RenderContext, scope: Scope<'_>, out: &mut Vec<String>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Var { key, .. } => {
                if lookup(ctx, scope, key).is_none() {
                    out.push(key.clone());
                }
            }
            Node::If {
                key,
                then_nodes,
                else_nodes,
                ..
            } => {
                if lookup(ctx, scope, key).is_none() {
                    out.push(key.clone());
                }
                collect_missing(then_nodes, ctx, scope, out);
                collect_missing(else_nodes, ctx, scope, out);
            }
            Node::Each { key, body } => match lookup(ctx, scope, key) {
                Some(Value::List(items)) => {
                    // Checking the first item suffices: list entries built by
                    // the context builder are uniform.
                    collect_missing(body, ctx, items.first(), out);
                }
                _ => out.push(key.clone()),
            },
        }
    }
}
