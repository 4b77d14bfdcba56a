//! Immutable GraphQL query-tree builder.
//!
//! A query is a tree of [`QueryNode`]s. Each node has a closed [`QueryKind`]
//! which decides what the builder adds implicitly and how the depaginator
//! walks the matching response:
//!
//! | Kind | Implicit structure |
//! |------|--------------------|
//! | `Leaf` | none |
//! | `Node` | `id` and `__typename` leaves appended to the children |
//! | `Noid` | none (object types without a stable id) |
//! | `Edge` | `pageInfo { endCursor hasNextPage }` plus a `Node`-kind `nodes` child; `first` defaults to 1 |
//! | `Typed` | `__typename` plus one inline fragment per concrete type |
//!
//! Trees are persistent: children are shared behind [`Arc`] and every
//! "modifying" operation returns a new node, so one subtree can be reused in
//! many queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::{Cursor, GraphqlId, Login, QueryError, RepoName, Timestamp, TypeName};

/// Field carrying the object id on every `Node`-kind result.
pub const ID_FIELD: &str = "id";
/// Field carrying the concrete type name.
pub const TYPENAME_FIELD: &str = "__typename";
/// Pagination metadata field of an `Edge` result.
pub const PAGE_INFO_FIELD: &str = "pageInfo";
/// List field of an `Edge` result.
pub const NODES_FIELD: &str = "nodes";
/// Cursor field within `pageInfo`.
pub const END_CURSOR_FIELD: &str = "endCursor";
/// Continuation flag within `pageInfo`.
pub const HAS_NEXT_PAGE_FIELD: &str = "hasNextPage";

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// A scalar argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// Rendered quoted and escaped.
    Str(String),
    /// Rendered verbatim.
    Int(i64),
    /// Rendered verbatim.
    Bool(bool),
    /// An enum literal, rendered verbatim without quotes (e.g. `DESC`).
    Enum(String),
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Str(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Str(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<u32> for ArgValue {
    fn from(value: u32) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<&Login> for ArgValue {
    fn from(value: &Login) -> Self {
        ArgValue::Str(value.as_str().to_string())
    }
}

impl From<&RepoName> for ArgValue {
    fn from(value: &RepoName) -> Self {
        ArgValue::Str(value.as_str().to_string())
    }
}

impl From<&GraphqlId> for ArgValue {
    fn from(value: &GraphqlId) -> Self {
        ArgValue::Str(value.as_str().to_string())
    }
}

impl From<&Cursor> for ArgValue {
    fn from(value: &Cursor) -> Self {
        ArgValue::Str(value.as_str().to_string())
    }
}

impl From<Timestamp> for ArgValue {
    fn from(value: Timestamp) -> Self {
        ArgValue::Str(value.to_string())
    }
}

/// Node arguments. A [`BTreeMap`] so serialisation is deterministic.
pub type Args = BTreeMap<String, ArgValue>;

/// Builds an [`Args`] map from name/value pairs.
pub fn args<const N: usize>(pairs: [(&str, ArgValue); N]) -> Args {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// One inline fragment of a `Typed` node: `... on <type_name> { children }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    type_name: TypeName,
    children: Vec<Arc<QueryNode>>,
}

impl Fragment {
    /// The concrete type this fragment applies to.
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    /// Fields selected on that type.
    pub fn children(&self) -> &[Arc<QueryNode>] {
        &self.children
    }
}

/// The closed set of node kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    /// A scalar (or otherwise unwalked) field.
    Leaf,
    /// An object implementing the provider's `Node` interface.
    Node(Vec<Arc<QueryNode>>),
    /// An object without a stable id.
    Noid(Vec<Arc<QueryNode>>),
    /// A cursor-paginated connection.
    Edge {
        /// The `pageInfo` selection.
        page_info: Arc<QueryNode>,
        /// The `Node`-kind `nodes` selection.
        nodes: Arc<QueryNode>,
    },
    /// An interface or union field dispatched by concrete type.
    Typed(Vec<Fragment>),
}

/// A node of the query tree.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryNode {
    name: String,
    args: Args,
    kind: QueryKind,
}

fn shared(children: impl IntoIterator<Item = QueryNode>) -> Vec<Arc<QueryNode>> {
    children.into_iter().map(Arc::new).collect()
}

/// A scalar field.
pub fn leaf(name: &str) -> QueryNode {
    QueryNode {
        name: name.to_string(),
        args: Args::new(),
        kind: QueryKind::Leaf,
    }
}

/// An object field with a stable id; `id` and `__typename` are appended.
pub fn node(name: &str, args: Args, children: impl IntoIterator<Item = QueryNode>) -> QueryNode {
    let mut children = shared(children);
    children.push(Arc::new(leaf(ID_FIELD)));
    children.push(Arc::new(leaf(TYPENAME_FIELD)));
    QueryNode {
        name: name.to_string(),
        args,
        kind: QueryKind::Node(children),
    }
}

/// An object field for types lacking a stable id.
pub fn noid(name: &str, args: Args, children: impl IntoIterator<Item = QueryNode>) -> QueryNode {
    QueryNode {
        name: name.to_string(),
        args,
        kind: QueryKind::Noid(shared(children)),
    }
}

/// A paginated connection. `first` defaults to 1 unless `args` sets it.
pub fn edge(name: &str, mut args: Args, children: impl IntoIterator<Item = QueryNode>) -> QueryNode {
    args.entry("first".to_string()).or_insert(ArgValue::Int(1));
    QueryNode {
        name: name.to_string(),
        args,
        kind: QueryKind::Edge {
            page_info: Arc::new(page_info()),
            nodes: Arc::new(node(NODES_FIELD, Args::new(), children)),
        },
    }
}

/// An interface/union field with one inline fragment per concrete type.
pub fn typed<'a>(
    name: &str,
    args: Args,
    branches: impl IntoIterator<Item = (&'a str, Vec<QueryNode>)>,
) -> QueryNode {
    let fragments = branches
        .into_iter()
        .filter_map(|(type_name, children)| {
            TypeName::new(type_name).map(|type_name| Fragment {
                type_name,
                children: shared(children),
            })
        })
        .collect();
    QueryNode {
        name: name.to_string(),
        args,
        kind: QueryKind::Typed(fragments),
    }
}

fn page_info() -> QueryNode {
    noid(
        PAGE_INFO_FIELD,
        Args::new(),
        [leaf(END_CURSOR_FIELD), leaf(HAS_NEXT_PAGE_FIELD)],
    )
}

impl QueryNode {
    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field arguments.
    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Node kind.
    pub fn kind(&self) -> &QueryKind {
        &self.kind
    }

    /// Returns `true` for `Leaf` nodes.
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, QueryKind::Leaf)
    }

    /// The fragment selected for `type_name`, if this is a `Typed` node.
    pub fn fragment(&self, type_name: &str) -> Option<&Fragment> {
        match &self.kind {
            QueryKind::Typed(fragments) => fragments
                .iter()
                .find(|f| f.type_name.as_str() == type_name),
            _ => None,
        }
    }

    /// Returns a new node with `child` added.
    ///
    /// - `Node`/`Noid`: appended to the children.
    /// - `Edge`: appended to the `nodes` selection.
    /// - `Typed`: appended to every fragment.
    /// - `Leaf`: the leaf becomes a `Noid` holding `child`.
    ///
    /// Unaffected children are shared with `self`.
    #[must_use]
    pub fn add_child(&self, child: QueryNode) -> QueryNode {
        let child = Arc::new(child);
        let kind = match &self.kind {
            QueryKind::Leaf => QueryKind::Noid(vec![child]),
            QueryKind::Node(children) => QueryKind::Node(appended(children, child)),
            QueryKind::Noid(children) => QueryKind::Noid(appended(children, child)),
            QueryKind::Edge { page_info, nodes } => QueryKind::Edge {
                page_info: Arc::clone(page_info),
                nodes: Arc::new(nodes.add_child_shared(child)),
            },
            QueryKind::Typed(fragments) => QueryKind::Typed(
                fragments
                    .iter()
                    .map(|f| Fragment {
                        type_name: f.type_name.clone(),
                        children: appended(&f.children, Arc::clone(&child)),
                    })
                    .collect(),
            ),
        };
        QueryNode {
            name: self.name.clone(),
            args: self.args.clone(),
            kind,
        }
    }

    fn add_child_shared(&self, child: Arc<QueryNode>) -> QueryNode {
        match &self.kind {
            QueryKind::Node(children) => QueryNode {
                name: self.name.clone(),
                args: self.args.clone(),
                kind: QueryKind::Node(appended(children, child)),
            },
            _ => self.add_child(QueryNode::clone(&child)),
        }
    }

    /// Returns a new node whose arguments are `self.args` overridden by
    /// `overrides`. Children are shared.
    #[must_use]
    pub fn with_args(&self, overrides: Args) -> QueryNode {
        let mut args = self.args.clone();
        args.extend(overrides);
        QueryNode {
            name: self.name.clone(),
            args,
            kind: self.kind.clone(),
        }
    }

    /// Loads a query tree from a JSON description document.
    ///
    /// A description is either a bare string (a leaf) or an object
    /// `{"kind", "name", "args", "children"}`; `typed` nodes carry
    /// `"branches": {"TypeName": [children...]}` instead of `children`.
    /// Argument values may be strings, integers, booleans, or
    /// `{"enum": "LITERAL"}`.
    ///
    /// Every non-leaf description must carry an explicit `args` object, even
    /// if empty; omitting it fails with [`QueryError::MissingArguments`].
    pub fn from_json(value: &Value) -> Result<QueryNode, QueryError> {
        let object = match value {
            Value::String(name) => return Ok(leaf(name)),
            Value::Object(object) => object,
            other => return Err(invalid(format!("expected object or string, got {other}"))),
        };
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("node without a name".to_string()))?;
        let kind = object.get("kind").and_then(Value::as_str).unwrap_or("noid");
        if kind == "leaf" {
            return Ok(leaf(name));
        }

        let args = match object.get("args") {
            Some(Value::Object(map)) => parse_args(name, map)?,
            _ => {
                return Err(QueryError::MissingArguments {
                    node: name.to_string(),
                })
            }
        };

        if kind == "typed" {
            let branches = match object.get("branches") {
                Some(Value::Object(branches)) => branches,
                _ => return Err(invalid(format!("typed node {name} without branches"))),
            };
            let mut parsed = Vec::with_capacity(branches.len());
            for (type_name, children) in branches {
                parsed.push((type_name.as_str(), parse_children(children)?));
            }
            return Ok(typed(name, args, parsed));
        }

        let children = match object.get("children") {
            Some(children) => parse_children(children)?,
            None => Vec::new(),
        };
        match kind {
            "node" => Ok(node(name, args, children)),
            "noid" => Ok(noid(name, args, children)),
            "edge" => Ok(edge(name, args, children)),
            other => Err(invalid(format!("unknown kind {other} for {name}"))),
        }
    }
}

fn appended(children: &[Arc<QueryNode>], child: Arc<QueryNode>) -> Vec<Arc<QueryNode>> {
    let mut out = Vec::with_capacity(children.len() + 1);
    out.extend(children.iter().cloned());
    out.push(child);
    out
}

fn invalid(message: String) -> QueryError {
    QueryError::InvalidQuery { message }
}

fn parse_children(value: &Value) -> Result<Vec<QueryNode>, QueryError> {
    match value {
        Value::Array(items) => items.iter().map(QueryNode::from_json).collect(),
        other => Err(invalid(format!("children must be an array, got {other}"))),
    }
}

fn parse_args(node: &str, map: &serde_json::Map<String, Value>) -> Result<Args, QueryError> {
    map.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => ArgValue::Str(s.clone()),
                Value::Bool(b) => ArgValue::Bool(*b),
                Value::Number(n) => n
                    .as_i64()
                    .map(ArgValue::Int)
                    .ok_or_else(|| invalid(format!("{node}.{key}: only integers are supported")))?,
                Value::Object(o) => match o.get("enum").and_then(Value::as_str) {
                    Some(literal) => ArgValue::Enum(literal.to_string()),
                    None => return Err(invalid(format!("{node}.{key}: unsupported argument"))),
                },
                _ => return Err(invalid(format!("{node}.{key}: unsupported argument"))),
            };
            Ok((key.clone(), value))
        })
        .collect()
}
