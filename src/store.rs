use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

use crate::domain::{Directory, generate_id};
use crate::error::{StoreError, StoreResult};
use crate::schema::FieldDescriptors;

pub type Record = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub fields: Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Comparison,
    pub value: Value,
}

/// A conjunction of comparisons over record fields.
///
/// Missing and null fields compare as the empty string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub conditions: Vec<Condition>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Eq, value)
    }

    pub fn ge(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Ge, value)
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Lt, value)
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|condition| {
            let actual = record
                .get(&condition.field)
                .map(unwrap_envelope)
                .unwrap_or(&EMPTY);
            let ordering = compare_values(actual, &condition.value);
            match condition.op {
                Comparison::Eq => ordering == Some(Ordering::Equal),
                Comparison::Ne => ordering != Some(Ordering::Equal),
                Comparison::Lt => ordering == Some(Ordering::Less),
                Comparison::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                Comparison::Gt => ordering == Some(Ordering::Greater),
                Comparison::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            }
        })
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let clauses = self
            .conditions
            .iter()
            .map(|condition| format!("{} {} {}", condition.field, condition.op.symbol(), condition.value))
            .collect::<Vec<_>>();
        f.write_str(&clauses.join(" and "))
    }
}

static EMPTY: Value = Value::String(String::new());

fn unwrap_envelope(value: &Value) -> &Value {
    match value {
        Value::Object(envelope) if envelope.contains_key("value") => &envelope["value"],
        Value::Null => &EMPTY,
        other => other,
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    let left = if left.is_null() { &EMPTY } else { left };
    let right = if right.is_null() { &EMPTY } else { right };
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Created(String),
    Updated(String),
    Deleted(String),
    DirectoryChanged,
}

/// The record backing store a board is bound to.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self, query: &Query) -> StoreResult<Vec<StoredRecord>>;
    async fn create(&self, record: Record) -> StoreResult<String>;
    /// Applies the given fields; a null value clears the field.
    async fn update(&self, id: &str, record: Record) -> StoreResult<()>;
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Schema introspection.
    async fn describe_fields(&self) -> StoreResult<FieldDescriptors>;

    async fn load_directory(&self) -> StoreResult<Directory> {
        Ok(Directory::default())
    }

    async fn save_directory(&self, _directory: &Directory) -> StoreResult<()> {
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        None
    }
}

pub type SharedStore = Arc<dyn RecordStore>;

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<String, Record>,
    directory: Directory,
}

/// A store held entirely in memory.
///
/// With a unique key configured, creating a record whose key fields match an
/// existing record fails with [`StoreError::Conflict`], the way a compound
/// unique index would.
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    fields: Option<FieldDescriptors>,
    unique_key: Option<UniqueKey>,
    events: broadcast::Sender<StoreEvent>,
}

/// Fields forming a uniqueness constraint. `day_field` compares by its first ten characters.
#[derive(Debug, Clone)]
pub struct UniqueKey {
    pub fields: Vec<String>,
    pub day_field: Option<String>,
}

impl UniqueKey {
    fn key_of(&self, record: &Record) -> Vec<String> {
        let mut key = self
            .fields
            .iter()
            .map(|field| value_text(record.get(field)))
            .collect::<Vec<_>>();
        if let Some(day_field) = &self.day_field {
            key.push(value_text(record.get(day_field)).chars().take(10).collect());
        }
        key
    }
}

fn value_text(value: Option<&Value>) -> String {
    match value.map(unwrap_envelope) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(MemoryState::default()),
            fields: None,
            unique_key: None,
            events,
        }
    }

    /// Restricts writes to the given schema and reports it on introspection.
    pub fn with_fields(mut self, fields: FieldDescriptors) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_unique_key(mut self, unique_key: UniqueKey) -> Self {
        self.unique_key = Some(unique_key);
        self
    }

    pub fn with_contents(self, records: Vec<StoredRecord>, directory: Directory) -> Self {
        let state = MemoryState {
            records: records
                .into_iter()
                .map(|record| (record.id, record.fields))
                .collect(),
            directory,
        };
        Self {
            state: RwLock::new(state),
            ..self
        }
    }

    pub async fn snapshot(&self) -> (Vec<StoredRecord>, Directory) {
        let state = self.state.read().await;
        let records = state
            .records
            .iter()
            .map(|(id, fields)| StoredRecord {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();
        (records, state.directory.clone())
    }

    fn check_fields(&self, record: &Record) -> StoreResult<()> {
        let Some(fields) = &self.fields else {
            return Ok(());
        };
        match record.keys().find(|code| !fields.contains_key(*code)) {
            Some(code) => Err(StoreError::UnknownField(code.clone())),
            None => Ok(()),
        }
    }

    fn publish(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list(&self, query: &Query) -> StoreResult<Vec<StoredRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|(_, fields)| query.matches(fields))
            .map(|(id, fields)| StoredRecord {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn create(&self, record: Record) -> StoreResult<String> {
        self.check_fields(&record)?;
        let mut state = self.state.write().await;
        if let Some(unique_key) = &self.unique_key {
            let key = unique_key.key_of(&record);
            if state
                .records
                .values()
                .any(|existing| unique_key.key_of(existing) == key)
            {
                return Err(StoreError::Conflict(key.join(" / ")));
            }
        }

        let mut id = generate_id();
        while state.records.contains_key(&id) {
            id = generate_id();
        }
        let record = record
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .collect();
        state.records.insert(id.clone(), record);
        drop(state);

        self.publish(StoreEvent::Created(id.clone()));
        Ok(id)
    }

    async fn update(&self, id: &str, record: Record) -> StoreResult<()> {
        self.check_fields(&record)?;
        let mut state = self.state.write().await;
        let existing = state
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        for (code, value) in record {
            if value.is_null() {
                existing.remove(&code);
            } else {
                existing.insert(code, value);
            }
        }
        drop(state);

        self.publish(StoreEvent::Updated(id.to_string()));
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.records.remove(id).is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        drop(state);

        self.publish(StoreEvent::Deleted(id.to_string()));
        Ok(())
    }

    async fn describe_fields(&self) -> StoreResult<FieldDescriptors> {
        self.fields
            .clone()
            .ok_or_else(|| StoreError::Unavailable("this store does not expose a schema".to_string()))
    }

    async fn load_directory(&self) -> StoreResult<Directory> {
        Ok(self.state.read().await.directory.clone())
    }

    async fn save_directory(&self, directory: &Directory) -> StoreResult<()> {
        self.state.write().await.directory = directory.clone();
        self.publish(StoreEvent::DirectoryChanged);
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(code, value)| (code.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn queries_are_conjunctive_comparisons() {
        let row = record(&[
            ("task_name", json!("Standup")),
            ("start_date", json!("2024-03-10T09:00:00")),
        ]);
        let same_day = Query::all()
            .eq("task_name", "Standup")
            .ge("start_date", "2024-03-10")
            .lt("start_date", "2024-03-11");
        assert!(same_day.matches(&row));
        assert!(!same_day.clone().eq("task_name", "Retro").matches(&row));
        assert!(!Query::all().with("end_date", Comparison::Ne, "").matches(&row));
        assert_eq!(
            same_day.to_string(),
            "task_name = \"Standup\" and start_date >= \"2024-03-10\" and start_date < \"2024-03-11\""
        );
    }

    #[tokio::test]
    async fn update_applies_fields_and_clears_nulls() {
        let store = MemoryStore::new();
        let id = store
            .create(record(&[("title", json!("A")), ("assignee", json!("m1"))]))
            .await
            .expect("create");
        store
            .update(&id, record(&[("title", json!("B")), ("assignee", Value::Null)]))
            .await
            .expect("update");

        let rows = store.list(&Query::all()).await.expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields.get("title"), Some(&json!("B")));
        assert!(!rows[0].fields.contains_key("assignee"));
        assert!(matches!(
            store.update("missing", Record::new()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unique_key_rejects_same_day_duplicates() {
        let store = MemoryStore::new().with_unique_key(UniqueKey {
            fields: vec!["title".to_string()],
            day_field: Some("start".to_string()),
        });
        store
            .create(record(&[("title", json!("Standup")), ("start", json!("2024-03-11T09:00:00"))]))
            .await
            .expect("first");
        let second = store
            .create(record(&[("title", json!("Standup")), ("start", json!("2024-03-11T10:00:00"))]))
            .await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));
        store
            .create(record(&[("title", json!("Standup")), ("start", json!("2024-03-12"))]))
            .await
            .expect("next day is fine");
    }

    #[tokio::test]
    async fn subscribers_hear_about_writes() {
        let store = MemoryStore::new();
        let mut events = store.subscribe().expect("subscription");
        let id = store.create(record(&[("title", json!("A"))])).await.expect("create");
        store.delete(&id).await.expect("delete");
        assert_eq!(events.recv().await.expect("created"), StoreEvent::Created(id.clone()));
        assert_eq!(events.recv().await.expect("deleted"), StoreEvent::Deleted(id));
    }
}
