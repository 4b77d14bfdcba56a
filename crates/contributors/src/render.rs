//! Query serialisation.
//!
//! Renders a [`QueryNode`] tree to GraphQL text as `name(args){child\nchild}`.
//! Rendering is pure and deterministic: arguments are kept in a sorted map, so
//! two structurally equal trees always produce byte-identical text. Cache keys
//! rely on this.

use std::fmt::Write;

use serde_json::{json, Value};

use crate::query::{ArgValue, Args, QueryKind, QueryNode, TYPENAME_FIELD};

/// Renders `node` as GraphQL selection text.
pub fn to_query_string(node: &QueryNode) -> String {
    let mut out = String::new();
    write_node(&mut out, node);
    out
}

/// Wraps `node` in a `query{...}` operation that also asks for the
/// provider's quota state. With `dry_run` the provider only estimates the
/// cost and does not execute the selection.
pub fn cost_wrapped(node: &QueryNode, dry_run: bool) -> String {
    wrap_with_cost(&to_query_string(node), dry_run)
}

/// [`cost_wrapped`] for selection text that is already rendered.
pub fn wrap_with_cost(selection: &str, dry_run: bool) -> String {
    format!("query{{rateLimit(dryRun: {dry_run}){{cost, remaining, resetAt}}\n{selection}}}")
}

/// The HTTP request body for an already rendered operation.
pub fn request_body(operation: &str) -> Value {
    json!({ "query": operation })
}

fn write_node(out: &mut String, node: &QueryNode) {
    out.push_str(node.name());
    write_args(out, node.args());
    match node.kind() {
        QueryKind::Leaf => {}
        QueryKind::Node(children) | QueryKind::Noid(children) => {
            write_block(out, children.iter().map(|c| c.as_ref()));
        }
        QueryKind::Edge { page_info, nodes } => {
            write_block(out, [page_info.as_ref(), nodes.as_ref()]);
        }
        QueryKind::Typed(fragments) => {
            out.push('{');
            out.push_str(TYPENAME_FIELD);
            for fragment in fragments {
                out.push_str("\n... on ");
                out.push_str(fragment.type_name().as_str());
                write_block(out, fragment.children().iter().map(|c| c.as_ref()));
            }
            out.push('}');
        }
    }
}

fn write_block<'a>(out: &mut String, children: impl IntoIterator<Item = &'a QueryNode>) {
    let mut children = children.into_iter().peekable();
    if children.peek().is_none() {
        return;
    }
    out.push('{');
    let mut first = true;
    for child in children {
        if !first {
            out.push('\n');
        }
        first = false;
        write_node(out, child);
    }
    out.push('}');
}

fn write_args(out: &mut String, args: &Args) {
    if args.is_empty() {
        return;
    }
    out.push('(');
    for (i, (name, value)) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(name);
        out.push_str(": ");
        match value {
            ArgValue::Str(s) => escape_into(out, s),
            ArgValue::Int(n) => {
                let _ = write!(out, "{n}");
            }
            ArgValue::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            ArgValue::Enum(literal) => out.push_str(literal),
        }
    }
    out.push(')');
}

/// Writes `s` as a quoted GraphQL string literal, escaping quotes,
/// backslashes and control characters so argument values cannot break out
/// of the literal.
fn escape_into(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
