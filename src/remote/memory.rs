//! In-process resource server
//!
//! Holds described tables, answers queries exactly like a real server would
//! (filter, sort with primary-key tiebreak, slice), and turns server-side
//! mutations into the `ServerData` notifications a real server would push.
//!
//! Also records every call so tests can assert how many remote round-trips
//! the cache issued, and can inject failures and latency.

use crate::model::{Filter, OuterPaging, Record, RecordKey, ResourceDescription, Row, Value};
use crate::remote::{LinkChanges, QueryPage, Remote, RemoteError, RemoteResult, ServerData};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

struct Table {
    description: ResourceDescription,
    rows: Vec<Row>,
    /// attribute → local → remotes
    links: BTreeMap<String, BTreeMap<Value, BTreeSet<Value>>>,
}

impl Table {
    fn key_of(&self, row: &Row) -> RecordKey {
        RecordKey::new(
            self.description
                .primary_key
                .iter()
                .map(|f| row.get(f).cloned().unwrap_or_default())
                .collect(),
        )
    }

    fn matching(&self, filter: &Filter) -> Vec<Record> {
        self.rows
            .iter()
            .map(|r| Record::from_row(r.clone()))
            .filter(|r| filter.matches(r))
            .collect()
    }
}

/// Recorded remote call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Describe(String),
    Query {
        resource: String,
        filter: Filter,
        paging: OuterPaging,
    },
    Fetch {
        resource: String,
        filter: Filter,
    },
    M2m {
        resource: String,
        attribute: String,
        keys: Vec<Value>,
    },
}

impl Call {
    pub fn resource(&self) -> &str {
        match self {
            Call::Describe(r) => r,
            Call::Query { resource, .. } | Call::Fetch { resource, .. } | Call::M2m { resource, .. } => {
                resource
            }
        }
    }
}

#[derive(Default)]
struct ServerState {
    tables: HashMap<String, Table>,
    calls: Vec<Call>,
    fail_next: Option<RemoteError>,
    latency: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<ServerState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a table
    pub async fn register(&self, description: ResourceDescription) -> ServerData {
        tracing::info!(resource = %description.name, "Registering remote table");
        let mut state = self.state.lock().await;
        state.tables.insert(
            description.name.clone(),
            Table {
                description: description.clone(),
                rows: Vec::new(),
                links: BTreeMap::new(),
            },
        );
        ServerData::new().with_description(description)
    }

    /// Insert rows; existing keys are replaced
    ///
    /// Returns the notification a server would push.
    pub async fn insert(&self, resource: &str, rows: Vec<Row>) -> RemoteResult<ServerData> {
        let mut state = self.state.lock().await;
        let table = state
            .tables
            .get_mut(resource)
            .ok_or_else(|| RemoteError::NotFound(resource.to_string()))?;
        let mut created = Vec::new();
        let mut changed = Vec::new();
        for row in rows {
            let key = table.key_of(&row);
            match table.rows.iter().position(|r| table.key_of(r) == key) {
                Some(pos) => {
                    table.rows[pos] = row.clone();
                    changed.push(row);
                }
                None => {
                    table.rows.push(row.clone());
                    created.push(row);
                }
            }
        }
        let mut data = ServerData::new();
        if !created.is_empty() {
            data = data.with_new(resource, created);
        }
        if !changed.is_empty() {
            data = data.with_update(resource, changed);
        }
        Ok(data)
    }

    /// Delete rows by key; only keys actually present are reported
    pub async fn delete(&self, resource: &str, keys: &[RecordKey]) -> RemoteResult<ServerData> {
        let mut state = self.state.lock().await;
        let table = state
            .tables
            .get_mut(resource)
            .ok_or_else(|| RemoteError::NotFound(resource.to_string()))?;
        let mut removed = Vec::new();
        let description = table.description.clone();
        table.rows.retain(|row| {
            let key = RecordKey::new(
                description
                    .primary_key
                    .iter()
                    .map(|f| row.get(f).cloned().unwrap_or_default())
                    .collect(),
            );
            if keys.contains(&key) {
                removed.push(key);
                false
            } else {
                true
            }
        });
        Ok(ServerData::new().with_delete(resource, removed))
    }

    /// Add or remove many-to-many links
    pub async fn link(
        &self,
        resource: &str,
        attribute: &str,
        changes: LinkChanges,
    ) -> RemoteResult<ServerData> {
        let mut state = self.state.lock().await;
        let table = state
            .tables
            .get_mut(resource)
            .ok_or_else(|| RemoteError::NotFound(resource.to_string()))?;
        let links = table.links.entry(attribute.to_string()).or_default();
        for (local, remote) in &changes.add {
            links.entry(local.clone()).or_default().insert(remote.clone());
        }
        for (local, remote) in &changes.del {
            if let Some(set) = links.get_mut(local) {
                set.remove(remote);
            }
        }
        Ok(ServerData::new().with_links(resource, attribute, changes))
    }

    /// Make the next call fail with `error`
    pub async fn fail_next(&self, error: RemoteError) {
        self.state.lock().await.fail_next = Some(error);
    }

    /// Delay every answer
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    /// Page queries issued for `resource`
    pub async fn queries(&self, resource: &str) -> Vec<OuterPaging> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Query { resource: r, paging, .. } if r == resource => Some(paging.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn query_count(&self, resource: &str) -> usize {
        self.queries(resource).await.len()
    }

    pub async fn call_count(&self, resource: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.resource() == resource)
            .count()
    }

    pub async fn row_count(&self, resource: &str) -> usize {
        self.state
            .lock()
            .await
            .tables
            .get(resource)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Log the call, apply latency and pending failure
    async fn begin(&self, call: Call) -> RemoteResult<()> {
        let (latency, failure) = {
            let mut state = self.state.lock().await;
            tracing::debug!(call = ?call, "Remote call");
            state.calls.push(call);
            (state.latency, state.fail_next.take())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    async fn describe(&self, resource: &str) -> RemoteResult<ResourceDescription> {
        self.begin(Call::Describe(resource.to_string())).await?;
        let state = self.state.lock().await;
        state
            .tables
            .get(resource)
            .map(|t| t.description.clone())
            .ok_or_else(|| RemoteError::NotFound(resource.to_string()))
    }

    async fn query(
        &self,
        resource: &str,
        filter: &Filter,
        paging: &OuterPaging,
    ) -> RemoteResult<QueryPage> {
        self.begin(Call::Query {
            resource: resource.to_string(),
            filter: filter.clone(),
            paging: paging.clone(),
        })
        .await?;

        let state = self.state.lock().await;
        let table = state
            .tables
            .get(resource)
            .ok_or_else(|| RemoteError::NotFound(resource.to_string()))?;
        if paging.rows_per_page == 0 || paging.page_number == 0 {
            return Err(RemoteError::Rejected(format!(
                "invalid paging {}x{}",
                paging.page_number, paging.rows_per_page
            )));
        }

        let pk = &table.description.primary_key;
        let comparator = paging.sort.comparator(pk);
        let mut records = table.matching(filter);
        records.sort_by(|a, b| comparator.compare(a, b));

        let (from, to) = paging.range();
        let pks = records
            .iter()
            .skip(from)
            .take(to - from)
            .map(|r| r.key(pk))
            .collect();
        Ok(QueryPage {
            pks,
            total_count: records.len(),
        })
    }

    async fn fetch(&self, resource: &str, filter: &Filter) -> RemoteResult<ServerData> {
        self.begin(Call::Fetch {
            resource: resource.to_string(),
            filter: filter.clone(),
        })
        .await?;

        let state = self.state.lock().await;
        let table = state
            .tables
            .get(resource)
            .ok_or_else(|| RemoteError::NotFound(resource.to_string()))?;
        let rows = table
            .matching(filter)
            .into_iter()
            .map(|r| r.fields().clone())
            .collect();
        Ok(ServerData::new().with_results(resource, rows))
    }

    async fn m2m(&self, resource: &str, attribute: &str, keys: &[Value]) -> RemoteResult<ServerData> {
        self.begin(Call::M2m {
            resource: resource.to_string(),
            attribute: attribute.to_string(),
            keys: keys.to_vec(),
        })
        .await?;

        let state = self.state.lock().await;
        let table = state
            .tables
            .get(resource)
            .ok_or_else(|| RemoteError::NotFound(resource.to_string()))?;
        let mut changes = LinkChanges::default();
        if let Some(links) = table.links.get(attribute) {
            for key in keys {
                for remote in links.get(key).into_iter().flatten() {
                    changes.add.push((key.clone(), remote.clone()));
                }
            }
        }
        Ok(ServerData::new().with_links(resource, attribute, changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{row, SortSpec};

    async fn items(n: i64) -> MemoryRemote {
        let remote = MemoryRemote::new();
        remote.register(ResourceDescription::new("item", 10, &["id"])).await;
        let rows = (1..=n)
            .map(|i| row([("id", Value::from(i)), ("group", Value::from(i % 3))]))
            .collect();
        remote.insert("item", rows).await.unwrap();
        remote
    }

    #[tokio::test]
    async fn test_query_pages_and_total() {
        let remote = items(25).await;
        let page = remote
            .query("item", &Filter::new(), &OuterPaging::for_outer(2, 10, SortSpec::default()))
            .await
            .unwrap();

        assert_eq!(page.total_count, 25);
        assert_eq!(page.pks.len(), 5);
        assert_eq!(page.pks[0], RecordKey::from(21));
        assert_eq!(remote.query_count("item").await, 1);
    }

    #[tokio::test]
    async fn test_query_filter_and_desc_sort() {
        let remote = items(10).await;
        let sort = SortSpec::parse(&["id desc"]).unwrap();
        let page = remote
            .query("item", &Filter::new().equals("group", 0), &OuterPaging::for_outer(0, 10, sort))
            .await
            .unwrap();

        assert_eq!(page.total_count, 3);
        assert_eq!(page.pks, vec![RecordKey::from(9), RecordKey::from(6), RecordKey::from(3)]);
    }

    #[tokio::test]
    async fn test_mutations_produce_notifications() {
        let remote = items(3).await;

        let data = remote
            .insert("item", vec![row([("id", 2)]), row([("id", 4)])])
            .await
            .unwrap();
        assert_eq!(data.new["item"].len(), 1);
        assert_eq!(data.update["item"].len(), 1);

        let data = remote
            .delete("item", &[RecordKey::from(1), RecordKey::from(99)])
            .await
            .unwrap();
        assert_eq!(data.delete["item"], vec![RecordKey::from(1)]);
        assert_eq!(remote.row_count("item").await, 3);
    }

    #[tokio::test]
    async fn test_fail_next_and_unknown_resource() {
        let remote = items(1).await;
        remote.fail_next(RemoteError::Unavailable("down".into())).await;

        let err = remote.describe("item").await.unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));
        assert!(remote.describe("item").await.is_ok());

        let err = remote.describe("ghost").await.unwrap_err();
        assert_eq!(err, RemoteError::NotFound("ghost".into()));
    }

    #[tokio::test]
    async fn test_links() {
        let remote = items(2).await;
        remote
            .link(
                "item",
                "tags",
                LinkChanges {
                    add: vec![(Value::from(1), Value::from(10)), (Value::from(1), Value::from(11))],
                    del: vec![],
                },
            )
            .await
            .unwrap();

        let data = remote.m2m("item", "tags", &[Value::from(1), Value::from(2)]).await.unwrap();
        assert_eq!(data.m2m["item"]["tags"].add.len(), 2);
    }
}
