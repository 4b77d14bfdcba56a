//! Depagination and pruning of query results.
//!
//! The provider returns at most `first` items per connection, at every depth
//! of the tree. [`Depaginator`] walks a response together with the query
//! tree that produced it and, for every `Edge` whose `pageInfo` reports more
//! pages, issues continuation queries until the connection is complete.
//!
//! A continuation re-selects the same edge through the `node(id:)` root
//! field of the object that owns it, with `after` set to the last cursor.
//! Edges selected at the root of a query are re-issued directly.
//!
//! Sibling fields and the items of an already complete list are walked
//! concurrently; pages of one edge are fetched one after another because each
//! needs the previous cursor. The scheduler is the only back-pressure.
//!
//! A server that keeps reporting `hasNextPage` with fresh cursors is followed
//! for as long as it does so.

use futures_util::future::{try_join_all, BoxFuture};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use contributors::query::{
    END_CURSOR_FIELD, HAS_NEXT_PAGE_FIELD, ID_FIELD, NODES_FIELD, PAGE_INFO_FIELD, TYPENAME_FIELD,
};
use contributors::{args, typed, Cursor, GraphqlId, QueryKind, QueryNode, TypeName};

use crate::client::GraphqlClient;
use crate::errors::ClientError;

/// Root field used to re-enter the graph at a known object.
const NODE_ROOT_FIELD: &str = "node";

/// The object that owns a connection, as needed to continue it.
#[derive(Debug, Clone)]
struct Owner {
    id: GraphqlId,
    type_name: TypeName,
}

impl Owner {
    fn of(object: &Map<String, Value>) -> Option<Self> {
        Some(Self {
            id: GraphqlId::new(object.get(ID_FIELD)?.as_str()?)?,
            type_name: TypeName::new(object.get(TYPENAME_FIELD)?.as_str()?)?,
        })
    }
}

/// Where a connection sits in the response.
#[derive(Debug, Clone, Copy)]
enum Anchor<'a> {
    /// Selected directly under the operation root.
    Root,
    /// A field of an object; `None` if that object has no usable id.
    Field(Option<&'a Owner>),
}

/// Completes every paginated connection of a response.
#[derive(Debug, Clone)]
pub struct Depaginator {
    client: GraphqlClient,
    page_size: u32,
}

impl Depaginator {
    /// `page_size` is the `first` argument of every continuation query.
    pub fn new(client: GraphqlClient, page_size: u32) -> Self {
        Self {
            client,
            page_size: page_size.max(1),
        }
    }

    /// The client continuation queries go through.
    pub fn client(&self) -> &GraphqlClient {
        &self.client
    }

    /// Executes `query` as a root field and returns its fully depaginated
    /// result (the `data.<name>` member).
    pub async fn fetch(&self, query: &QueryNode) -> Result<Value, ClientError> {
        let execution = self.client.execute(query, query.name()).await?;
        let value = execution
            .data()
            .get(query.name())
            .cloned()
            .unwrap_or(Value::Null);
        self.depaginate(query, value).await
    }

    /// Completes `value`, the result of the root field `query`.
    pub async fn depaginate(&self, query: &QueryNode, value: Value) -> Result<Value, ClientError> {
        self.walk(query, value, Anchor::Root).await
    }

    fn walk<'a>(
        &'a self,
        query: &'a QueryNode,
        value: Value,
        anchor: Anchor<'a>,
    ) -> BoxFuture<'a, Result<Value, ClientError>> {
        Box::pin(async move {
            if value.is_null() {
                return Ok(value);
            }
            match query.kind() {
                QueryKind::Leaf => Ok(value),
                QueryKind::Node(children) | QueryKind::Noid(children) => {
                    self.walk_fields(children, value).await
                }
                QueryKind::Typed(_) => {
                    let concrete = value.get(TYPENAME_FIELD).and_then(Value::as_str);
                    match concrete.and_then(|t| query.fragment(t)) {
                        Some(fragment) => self.walk_fields(fragment.children(), value).await,
                        None => Ok(value),
                    }
                }
                QueryKind::Edge { nodes, .. } => {
                    let connection = self.exhaust(query, value, anchor).await?;
                    self.walk_items(nodes, connection).await
                }
            }
        })
    }

    async fn walk_fields(
        &self,
        children: &[std::sync::Arc<QueryNode>],
        value: Value,
    ) -> Result<Value, ClientError> {
        let Value::Object(mut object) = value else {
            return Ok(value);
        };
        let owner = Owner::of(&object);
        let (queries, values): (Vec<&QueryNode>, Vec<Value>) = children
            .iter()
            .filter(|child| !child.is_leaf())
            .filter_map(|child| {
                let value = object.remove(child.name())?;
                Some((child.as_ref(), value))
            })
            .unzip();
        let walked = try_join_all(
            queries
                .iter()
                .zip(values)
                .map(|(child, value)| self.walk(child, value, Anchor::Field(owner.as_ref()))),
        )
        .await?;
        for (child, value) in queries.into_iter().zip(walked) {
            object.insert(child.name().to_string(), value);
        }
        Ok(Value::Object(object))
    }

    async fn walk_items(&self, nodes: &QueryNode, mut connection: Value) -> Result<Value, ClientError> {
        let items = match connection.get_mut(NODES_FIELD) {
            Some(Value::Array(items)) => std::mem::take(items),
            _ => return Ok(connection),
        };
        let walked = try_join_all(
            items
                .into_iter()
                .map(|item| self.walk(nodes, item, Anchor::Field(None))),
        )
        .await?;
        connection[NODES_FIELD] = Value::Array(walked);
        Ok(connection)
    }

    /// Fetches the remaining pages of one connection, in order.
    async fn exhaust(
        &self,
        edge: &QueryNode,
        mut connection: Value,
        anchor: Anchor<'_>,
    ) -> Result<Value, ClientError> {
        if !connection.is_object() {
            return Ok(connection);
        }
        loop {
            let page_info = &connection[PAGE_INFO_FIELD];
            if !page_info[HAS_NEXT_PAGE_FIELD].as_bool().unwrap_or(false) {
                return Ok(connection);
            }
            let Some(cursor) = page_info[END_CURSOR_FIELD].as_str().and_then(Cursor::new) else {
                warn!(field = edge.name(), "hasNextPage without an endCursor; keeping what we have");
                return Ok(connection);
            };

            let mut next = self.next_page(edge, &cursor, anchor).await?;
            let more = match next.get_mut(NODES_FIELD) {
                Some(Value::Array(items)) => std::mem::take(items),
                _ => Vec::new(),
            };
            if let Some(Value::Array(items)) = connection.get_mut(NODES_FIELD) {
                items.extend(more);
            } else {
                connection[NODES_FIELD] = Value::Array(more);
            }
            connection[PAGE_INFO_FIELD] = next
                .get_mut(PAGE_INFO_FIELD)
                .map(Value::take)
                .unwrap_or(Value::Null);
        }
    }

    async fn next_page(
        &self,
        edge: &QueryNode,
        cursor: &Cursor,
        anchor: Anchor<'_>,
    ) -> Result<Value, ClientError> {
        let page = edge.with_args(args([
            ("after", cursor.into()),
            ("first", self.page_size.into()),
        ]));
        match anchor {
            Anchor::Root => {
                debug!(field = edge.name(), cursor = cursor.as_str(), "fetching next root page");
                let execution = self.client.execute(&page, edge.name()).await?;
                Ok(execution.data().get(edge.name()).cloned().unwrap_or(Value::Null))
            }
            Anchor::Field(Some(owner)) => {
                debug!(
                    field = edge.name(),
                    owner = %owner.type_name,
                    cursor = cursor.as_str(),
                    "fetching next page"
                );
                let continuation = typed(
                    NODE_ROOT_FIELD,
                    args([("id", (&owner.id).into())]),
                    [(owner.type_name.as_str(), vec![page])],
                );
                let label = format!("{}.{}", owner.type_name, edge.name());
                let execution = self.client.execute(&continuation, &label).await?;
                Ok(execution.data()[NODE_ROOT_FIELD]
                    .get(edge.name())
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            Anchor::Field(None) => Err(ClientError::UnpageableEdge {
                field: edge.name().to_string(),
            }),
        }
    }
}

/// Strips pagination bookkeeping from a depaginated result.
///
/// Removes `id`, `__typename` and `pageInfo` everywhere and replaces each
/// connection object with the plain array of its `nodes`.
pub fn prune(query: &QueryNode, value: Value) -> Value {
    if value.is_null() {
        return value;
    }
    match query.kind() {
        QueryKind::Leaf => value,
        QueryKind::Node(children) | QueryKind::Noid(children) => prune_fields(children, value),
        QueryKind::Typed(_) => {
            let concrete = value.get(TYPENAME_FIELD).and_then(Value::as_str);
            match concrete.and_then(|t| query.fragment(t)) {
                Some(fragment) => prune_fields(fragment.children(), value),
                None => prune_fields(&[], value),
            }
        }
        QueryKind::Edge { nodes, .. } => {
            let items = match value {
                Value::Object(mut connection) => match connection.remove(NODES_FIELD) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                },
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            Value::Array(items.into_iter().map(|item| prune(nodes, item)).collect())
        }
    }
}

fn prune_fields(children: &[std::sync::Arc<QueryNode>], value: Value) -> Value {
    let Value::Object(object) = value else {
        return value;
    };
    let pruned = object
        .into_iter()
        .filter(|(key, _)| !matches!(key.as_str(), ID_FIELD | TYPENAME_FIELD | PAGE_INFO_FIELD))
        .map(|(key, value)| {
            let value = match children.iter().find(|child| child.name() == key) {
                Some(child) => prune(child, value),
                None => value,
            };
            (key, value)
        })
        .collect();
    Value::Object(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::request::{RequestEnvelope, RequestFlags, Token};
    use crate::scheduler::Scheduler;
    use crate::transport::{RateLimitHeaders, RawResponse, Transport};
    use async_trait::async_trait;
    use contributors::{edge, leaf, node, noid, Args};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Answers with canned `data` payloads in order and records each query.
    struct Pages {
        data: Mutex<VecDeque<Value>>,
        queries: Mutex<Vec<String>>,
    }

    impl Pages {
        fn new(data: impl IntoIterator<Item = Value>) -> Arc<Self> {
            Arc::new(Self {
                data: Mutex::new(data.into_iter().collect()),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Pages {
        async fn post(&self, envelope: &RequestEnvelope) -> Result<RawResponse, ClientError> {
            self.queries.lock().unwrap().push(envelope.query_text.clone());
            let data = self.data.lock().unwrap().pop_front().unwrap_or(Value::Null);
            Ok(RawResponse {
                status: 200,
                headers: RateLimitHeaders {
                    remaining: Some(100),
                    ..RateLimitHeaders::default()
                },
                body: serde_json::to_vec(&json!({ "data": data })).unwrap(),
            })
        }
    }

    fn depaginator(transport: Arc<Pages>) -> Depaginator {
        let scheduler = Scheduler::new(transport, SchedulerConfig::default());
        let client = GraphqlClient::new(scheduler, None, Token::new("t"), RequestFlags::default());
        Depaginator::new(client, 100)
    }

    fn issues_query() -> QueryNode {
        node(
            "repository",
            args([("owner", "o".into()), ("name", "r".into())]),
            [edge("issues", Args::new(), [leaf("title")])],
        )
    }

    fn issue(title: &str) -> Value {
        json!({"title": title, "id": format!("I_{title}"), "__typename": "Issue"})
    }

    fn page(items: Vec<Value>, cursor: Option<&str>, has_next: bool) -> Value {
        json!({"pageInfo": {"endCursor": cursor, "hasNextPage": has_next}, "nodes": items})
    }

    #[tokio::test]
    async fn three_pages_are_accumulated_in_order() {
        let transport = Pages::new([
            json!({"repository": {"id": "R1", "__typename": "Repository",
                                  "issues": page(vec![issue("a")], Some("c1"), true)}}),
            json!({"node": {"__typename": "Repository",
                            "issues": page(vec![issue("b")], Some("c2"), true)}}),
            json!({"node": {"__typename": "Repository",
                            "issues": page(vec![issue("c")], Some("c3"), false)}}),
        ]);
        let depaginator = depaginator(transport.clone());

        let result = depaginator.fetch(&issues_query()).await.unwrap();

        let titles: Vec<_> = result["issues"]["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, ["a", "b", "c"]);
        assert_eq!(result["issues"]["pageInfo"]["hasNextPage"], false);

        let queries = transport.queries();
        assert_eq!(queries.len(), 3);
        assert!(queries[1].starts_with("node(id: \"R1\"){__typename\n... on Repository{issues(after: \"c1\", first: 100)"));
        assert!(queries[2].contains("after: \"c2\""));
    }

    #[tokio::test]
    async fn nested_edges_continue_from_their_own_owner() {
        let query = node(
            "repository",
            args([("owner", "o".into()), ("name", "r".into())]),
            [edge(
                "issues",
                Args::new(),
                [edge("comments", Args::new(), [leaf("body")])],
            )],
        );
        let transport = Pages::new([
            json!({"repository": {"id": "R1", "__typename": "Repository", "issues": page(vec![
                json!({"id": "I1", "__typename": "Issue",
                       "comments": page(vec![json!({"body": "x", "id": "C1", "__typename": "IssueComment"})], Some("k1"), true)})
            ], None, false)}}),
            json!({"node": {"__typename": "Issue", "comments":
                page(vec![json!({"body": "y", "id": "C2", "__typename": "IssueComment"})], None, false)}}),
        ]);
        let depaginator = depaginator(transport.clone());

        let result = depaginator.fetch(&query).await.unwrap();

        let comments = &result["issues"]["nodes"][0]["comments"]["nodes"];
        assert_eq!(comments.as_array().unwrap().len(), 2);
        assert!(transport.queries()[1].starts_with("node(id: \"I1\"){__typename\n... on Issue{comments("));
    }

    #[tokio::test]
    async fn missing_cursor_stops_paging() {
        let transport = Pages::new([json!({"repository": {"id": "R1", "__typename": "Repository",
            "issues": page(vec![issue("a")], None, true)}})]);
        let depaginator = depaginator(transport.clone());

        let result = depaginator.fetch(&issues_query()).await.unwrap();

        assert_eq!(result["issues"]["nodes"].as_array().unwrap().len(), 1);
        assert_eq!(transport.queries().len(), 1);
    }

    #[tokio::test]
    async fn edge_under_object_without_id_cannot_be_continued() {
        let query = noid(
            "viewer",
            Args::new(),
            [noid("settings", Args::new(), [edge("things", Args::new(), [leaf("x")])])],
        );
        let transport = Pages::new([json!({"viewer": {"settings": {
            "things": page(vec![json!({"x": 1})], Some("c1"), true)}}})]);
        let depaginator = depaginator(transport);

        let err = depaginator.fetch(&query).await.unwrap_err();

        assert!(matches!(err, ClientError::UnpageableEdge { field } if field == "things"));
    }

    #[tokio::test]
    async fn root_edge_is_reissued_directly() {
        let query = edge("search", args([("query", "q".into())]), [leaf("name")]);
        let transport = Pages::new([
            json!({"search": page(vec![json!({"name": "a", "id": "1", "__typename": "Repository"})], Some("c1"), true)}),
            json!({"search": page(vec![json!({"name": "b", "id": "2", "__typename": "Repository"})], None, false)}),
        ]);
        let depaginator = depaginator(transport.clone());

        let result = depaginator.fetch(&query).await.unwrap();

        assert_eq!(result["nodes"].as_array().unwrap().len(), 2);
        assert!(transport.queries()[1].starts_with("search(after: \"c1\", first: 100, query: \"q\")"));
    }

    #[test]
    fn prune_flattens_connections_and_drops_bookkeeping() {
        let query = node(
            "repository",
            Args::new(),
            [
                leaf("name"),
                edge(
                    "issues",
                    Args::new(),
                    [typed("author", Args::new(), [("User", vec![leaf("login")])])],
                ),
            ],
        );
        let value = json!({
            "id": "R1", "__typename": "Repository", "name": "r",
            "issues": {
                "pageInfo": {"endCursor": null, "hasNextPage": false},
                "nodes": [{"id": "I1", "__typename": "Issue",
                           "author": {"__typename": "User", "login": "octocat"}}]
            }
        });

        assert_eq!(
            prune(&query, value),
            json!({"name": "r", "issues": [{"author": {"login": "octocat"}}]})
        );
    }
}
