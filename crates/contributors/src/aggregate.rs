//! Time filtering and contributor merging.
//!
//! Every function here is pure. Merges never mutate their inputs: merging
//! produces new accumulated records, so the same record list can take part
//! in several merges (for example per-repository and organization-wide)
//! without double counting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::query::{NODES_FIELD, TYPENAME_FIELD};
use crate::{Category, ContributionRecord, Login, Synopsis, TimeWindow, Timestamp};

/// Something with a creation time.
pub trait Dated {
    /// When the entity was created, if known.
    fn created_at(&self) -> Option<Timestamp>;
}

impl<T: Dated + ?Sized> Dated for &T {
    fn created_at(&self) -> Option<Timestamp> {
        (**self).created_at()
    }
}

/// Response objects are dated by `createdAt`, or by `committedDate` for
/// commits.
impl Dated for Value {
    fn created_at(&self) -> Option<Timestamp> {
        ["createdAt", "committedDate"]
            .iter()
            .find_map(|field| self.get(field).and_then(Value::as_str))
            .and_then(Timestamp::parse)
    }
}

/// Keeps the entities created within `window` (inclusive at both ends).
/// Entities without a creation time are dropped.
pub fn time_filter<T: Dated>(window: TimeWindow, entities: impl IntoIterator<Item = T>) -> Vec<T> {
    entities
        .into_iter()
        .filter(|e| e.created_at().is_some_and(|at| window.contains(at)))
        .collect()
}

/// Maps each entity to a single-contribution record for its author.
///
/// The author is read from `author`, falling back to `user` (reactions). Git
/// actors (`author { email user { ... } }`) resolve to their linked account.
/// Entities whose author is gone (deleted accounts, unlinked commit authors)
/// are dropped.
pub fn users<'a>(entities: impl IntoIterator<Item = &'a Value>) -> Vec<ContributionRecord> {
    entities.into_iter().filter_map(author_record).collect()
}

fn author_record(entity: &Value) -> Option<ContributionRecord> {
    let actor = ["author", "user"]
        .iter()
        .find_map(|field| entity.get(field).filter(|v| !v.is_null()))?;
    let (account, git_email) = match actor.get("user") {
        Some(linked) => (linked, actor.get("email")),
        None => (actor, None),
    };
    let login = account.get("login").and_then(Value::as_str).and_then(Login::new)?;
    Some(ContributionRecord {
        login,
        name: text(account.get("name")),
        url: text(account.get("url")),
        email: text(account.get("email")).or_else(|| text(git_email)),
        count: 1,
    })
}

fn text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Folds records into one record per login.
///
/// The first occurrence of a login fixes `name`, `url` and `email`; every
/// occurrence, the first included, adds its `count`. The result keeps
/// first-insertion order.
pub fn merge_contributions(
    records: impl IntoIterator<Item = ContributionRecord>,
) -> Vec<ContributionRecord> {
    let mut merged: Vec<ContributionRecord> = Vec::new();
    let mut index: HashMap<Login, usize> = HashMap::new();
    for record in records {
        match index.get(&record.login) {
            Some(&i) => merged[i].count += record.count,
            None => {
                index.insert(record.login.clone(), merged.len());
                merged.push(record);
            }
        }
    }
    merged
}

/// `merge_contributions(a ++ b)`.
pub fn merge_arrays(a: &[ContributionRecord], b: &[ContributionRecord]) -> Vec<ContributionRecord> {
    merge_contributions(a.iter().chain(b).cloned())
}

/// Merges same-shaped synopses category by category (organization and user
/// rollups). The result is sorted by descending count.
pub fn merge_repo_results(synopses: impl IntoIterator<Item = Synopsis>) -> Synopsis {
    synopses
        .into_iter()
        .fold(Synopsis::default(), |mut acc, next| {
            for category in Category::ALL {
                let merged = merge_arrays(acc.category(category), next.category(category));
                *acc.category_mut(category) = merged;
            }
            acc
        })
        .sorted()
}

// ---------------------------------------------------------------------------
// Labelled contributions
// ---------------------------------------------------------------------------

/// A contribution record carrying the labels of the merged entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelledContribution {
    /// The merged tally.
    #[serde(flatten)]
    pub record: ContributionRecord,
    /// Label names in first-seen order, without duplicates.
    pub labels: Vec<String>,
}

/// Merges labelled entities (issues, pull requests) by author login.
///
/// Counts sum as in [`merge_contributions`] (an entity's own `count` is used
/// when present, otherwise 1); labels are read from `labels.nodes[].name` or,
/// on pruned trees, `labels[].name`.
///
/// Library-only: the built-in census queries do not select `labels`. Callers
/// that need a labelled rollup select `labels { name }` themselves, for
/// example in a query-description document run in full-tree mode, and feed
/// the resulting entities here.
pub fn merge_labelled_contributions<'a>(
    entities: impl IntoIterator<Item = &'a Value>,
) -> Vec<LabelledContribution> {
    let mut merged: Vec<LabelledContribution> = Vec::new();
    let mut index: HashMap<Login, usize> = HashMap::new();
    for entity in entities {
        let Some(mut record) = author_record(entity) else {
            continue;
        };
        if let Some(count) = entity.get("count").and_then(Value::as_u64) {
            record.count = count;
        }
        let labels = label_names(entity);
        match index.get(&record.login) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.record.count += record.count;
                for label in labels {
                    if !existing.labels.contains(&label) {
                        existing.labels.push(label);
                    }
                }
            }
            None => {
                index.insert(record.login.clone(), merged.len());
                let mut unique = Vec::with_capacity(labels.len());
                for label in labels {
                    if !unique.contains(&label) {
                        unique.push(label);
                    }
                }
                merged.push(LabelledContribution {
                    record,
                    labels: unique,
                });
            }
        }
    }
    merged
}

fn label_names(entity: &Value) -> Vec<String> {
    let labels: &[Value] = match entity.get("labels") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(connection) => match connection.get(NODES_FIELD) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        None => &[],
    };
    labels
        .iter()
        .filter_map(|l| l.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Full-tree filtering
// ---------------------------------------------------------------------------

/// Filters a pruned response tree down to the activity inside `window`.
///
/// Array elements survive when their own creation time lies in the window or
/// when any array below them still has a surviving element. Undated objects
/// survive when something below them survives. Scalars and undated leaf
/// objects (an `author`, say) are kept as fields of surviving objects but
/// never keep anything alive on their own. A tree with no surviving activity
/// collapses to `null`.
pub fn time_filter_full_tree(tree: &Value, window: TimeWindow) -> Value {
    match filter_value(tree, window) {
        (value, true) => value,
        (_, false) => Value::Null,
    }
}

fn filter_value(value: &Value, window: TimeWindow) -> (Value, bool) {
    match value {
        Value::Array(items) => {
            let kept: Vec<Value> = items
                .iter()
                .filter_map(|item| match filter_value(item, window) {
                    (v, true) => Some(v),
                    (_, false) => None,
                })
                .collect();
            let alive = !kept.is_empty();
            (Value::Array(kept), alive)
        }
        Value::Object(fields) => {
            let mut alive = value.created_at().is_some_and(|at| window.contains(at));
            let mut out = Map::with_capacity(fields.len());
            for (key, child) in fields {
                if key == TYPENAME_FIELD {
                    out.insert(key.clone(), child.clone());
                    continue;
                }
                let (filtered, child_alive) = filter_value(child, window);
                alive |= child_alive;
                out.insert(key.clone(), filtered);
            }
            (Value::Object(out), alive)
        }
        scalar => (scalar.clone(), false),
    }
}
