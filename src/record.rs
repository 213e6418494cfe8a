use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{CandidateDate, Task, TaskTime};
use crate::error::SchemaError;
use crate::schema::{FieldMapping, LogicalField};
use crate::store::{Record, StoredRecord};

/// Converts tasks to and from remote records using a resolved field mapping.
#[derive(Debug, Clone)]
pub struct TaskCodec {
    mapping: FieldMapping,
}

impl TaskCodec {
    pub fn new(mapping: FieldMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    pub fn code(&self, field: LogicalField) -> Result<&str, SchemaError> {
        self.mapping.require(field)
    }

    /// Field code that identifies a task's project, and the value stored there.
    pub fn project_key<'a>(&'a self, task: &'a Task) -> Result<(&'a str, &'a str), SchemaError> {
        match self.mapping.code(LogicalField::ProjectId) {
            Some(code) => Ok((code, task.project_id.as_str())),
            None => Ok((
                self.code(LogicalField::ProjectName)?,
                task.display_project_name(),
            )),
        }
    }

    /// Full record for creation. Absent values are omitted.
    pub fn encode(&self, task: &Task) -> Result<Record, SchemaError> {
        let mut record = Record::new();
        for (field, value) in self.values(task)? {
            if let Some(value) = value {
                let code = self.mapping.check_writable(field)?;
                record.insert(code.to_string(), value);
            }
        }
        Ok(record)
    }

    /// Only the fields that differ between `before` and `after`.
    ///
    /// A value that was present and is now absent is sent as null so the store clears it.
    pub fn encode_changes(&self, before: &Task, after: &Task) -> Result<Record, SchemaError> {
        let old = self.values(before)?;
        let new = self.values(after)?;
        let mut record = Record::new();
        for ((field, old_value), (_, new_value)) in old.into_iter().zip(new) {
            if old_value == new_value {
                continue;
            }
            let code = self.mapping.check_writable(field)?;
            record.insert(code.to_string(), new_value.unwrap_or(Value::Null));
        }
        Ok(record)
    }

    pub fn decode(&self, stored: &StoredRecord) -> Result<Task, SchemaError> {
        let title = self
            .text(stored, LogicalField::TaskName)
            .ok_or_else(|| SchemaError::BadValue {
                field: LogicalField::TaskName,
                message: "missing title".to_string(),
            })?;
        let project_name = self.text(stored, LogicalField::ProjectName);
        let project_id = self
            .text(stored, LogicalField::ProjectId)
            .or_else(|| project_name.clone())
            .unwrap_or_default();

        let mut task = Task::draft(title, project_id);
        task.id = stored.id.clone();
        task.project_name = project_name;
        task.project_color = self.text(stored, LogicalField::ProjectColor);
        task.description = self.text(stored, LogicalField::Description);
        task.assignee_id = self
            .field(stored, LogicalField::Assignee)
            .and_then(assignee_id);
        task.start = self.time(stored, LogicalField::StartDate)?;
        task.end = self.time(stored, LogicalField::EndDate)?;
        if let Some(kind) = self.parsed(stored, LogicalField::TaskType)? {
            task.task_type = kind;
        }
        if let Some(status) = self.parsed(stored, LogicalField::Status)? {
            task.status = status;
        }
        if let Some(priority) = self.parsed(stored, LogicalField::Priority)? {
            task.priority = priority;
        }
        if let Some(candidates) = self.parsed::<Vec<CandidateDate>>(stored, LogicalField::CandidateDates)? {
            task.candidate_dates = candidates;
        }
        Ok(task)
    }

    fn values(&self, task: &Task) -> Result<Vec<(LogicalField, Option<Value>)>, SchemaError> {
        let candidates = if task.candidate_dates.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&task.candidate_dates).map_err(|err| SchemaError::BadValue {
                field: LogicalField::CandidateDates,
                message: err.to_string(),
            })?)
        };

        let mut values = vec![
            (LogicalField::TaskName, Some(Value::from(task.title.clone()))),
            (
                LogicalField::ProjectName,
                Some(Value::from(task.display_project_name().to_string())),
            ),
            (LogicalField::StartDate, task.start.map(|time| Value::from(time.to_string()))),
            (LogicalField::EndDate, task.end.map(|time| Value::from(time.to_string()))),
            (LogicalField::TaskType, Some(Value::from(task.task_type.as_str()))),
            (LogicalField::Status, Some(Value::from(task.status.as_str()))),
            (LogicalField::Priority, Some(Value::from(task.priority.as_str()))),
            (LogicalField::Description, task.description.clone().map(Value::from)),
            (LogicalField::Assignee, task.assignee_id.clone().map(Value::from)),
            (LogicalField::ProjectColor, task.project_color.clone().map(Value::from)),
            (LogicalField::CandidateDates, candidates),
        ];
        if self.mapping.code(LogicalField::ProjectId).is_some() {
            values.push((LogicalField::ProjectId, Some(Value::from(task.project_id.clone()))));
        }

        // Unmapped optional fields have nowhere to go; unmapped required ones are an error.
        for (field, _) in &values {
            if field.is_required() {
                self.mapping.require(*field)?;
            }
        }
        values.retain(|(field, _)| self.mapping.code(*field).is_some());
        Ok(values)
    }

    fn field<'a>(&self, stored: &'a StoredRecord, field: LogicalField) -> Option<&'a Value> {
        let code = self.mapping.code(field)?;
        let value = stored.fields.get(code)?;
        let value = match value {
            Value::Object(envelope) if envelope.contains_key("value") => &envelope["value"],
            other => other,
        };
        if value.is_null() { None } else { Some(value) }
    }

    fn text(&self, stored: &StoredRecord, field: LogicalField) -> Option<String> {
        match self.field(stored, field)? {
            Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    fn time(&self, stored: &StoredRecord, field: LogicalField) -> Result<Option<TaskTime>, SchemaError> {
        let Some(raw) = self.text(stored, field) else {
            return Ok(None);
        };
        TaskTime::parse(&raw)
            .map(Some)
            .map_err(|err| SchemaError::BadValue {
                field,
                message: err.to_string(),
            })
    }

    fn parsed<T: DeserializeOwned>(
        &self,
        stored: &StoredRecord,
        field: LogicalField,
    ) -> Result<Option<T>, SchemaError> {
        let Some(value) = self.field(stored, field) else {
            return Ok(None);
        };
        if matches!(value, Value::String(text) if text.trim().is_empty()) {
            return Ok(None);
        }
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|err| SchemaError::BadValue {
                field,
                message: err.to_string(),
            })
    }
}

/// Assignees arrive as a plain id, a user object, or a list of user objects.
fn assignee_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Object(user) => ["code", "id", "name"]
            .iter()
            .find_map(|key| user.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        Value::Array(users) => users.first().and_then(assignee_id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::TaskCodec;
    use crate::domain::{CandidateDate, Priority, Task, TaskStatus, TaskTime, TaskType};
    use crate::error::SchemaError;
    use crate::schema::{FieldDescriptor, FieldMapping, FieldResolver, LogicalField};
    use crate::store::{Record, StoredRecord};

    fn sample_task() -> Task {
        let mut task = Task::draft("Standup", "p1");
        task.project_name = Some("Alpha".to_string());
        task.assignee_id = Some("m1".to_string());
        task.start = Some(TaskTime::parse("2024-03-11T09:00").unwrap());
        task.task_type = TaskType::Daily;
        task
    }

    #[test]
    fn encodes_present_values_only() {
        let codec = TaskCodec::new(FieldMapping::fallback());
        let record = codec.encode(&sample_task()).expect("encode");
        assert_eq!(record["task_name"], json!("Standup"));
        assert_eq!(record["project_name"], json!("Alpha"));
        assert_eq!(record["project_id"], json!("p1"));
        assert_eq!(record["start_date"], json!("2024-03-11T09:00:00"));
        assert_eq!(record["status"], json!("not_started"));
        assert!(!record.contains_key("end_date"));
        assert!(!record.contains_key("description"));
        assert!(!record.contains_key("candidate_dates"));
    }

    #[test]
    fn change_sets_carry_only_differences() {
        let codec = TaskCodec::new(FieldMapping::fallback());
        let before = sample_task();
        let mut after = before.clone();
        after.start = Some(TaskTime::parse("2024-03-12T09:00").unwrap());
        after.assignee_id = None;

        let record = codec.encode_changes(&before, &after).expect("diff");
        assert_eq!(record.len(), 2);
        assert_eq!(record["start_date"], json!("2024-03-12T09:00:00"));
        assert_eq!(record["assignee"], serde_json::Value::Null);
    }

    #[test]
    fn decodes_platform_shaped_records() {
        let codec = TaskCodec::new(FieldMapping::fallback());
        let mut fields = Record::new();
        fields.insert("task_name".to_string(), json!({ "type": "SINGLE_LINE_TEXT", "value": "Review" }));
        fields.insert("project_name".to_string(), json!({ "value": "Alpha" }));
        fields.insert("start_date".to_string(), json!({ "value": "2024-03-08T00:00:00Z" }));
        fields.insert("end_date".to_string(), json!({ "value": "" }));
        fields.insert("status".to_string(), json!({ "value": "進行中" }));
        fields.insert("priority".to_string(), json!({ "value": "高" }));
        fields.insert("assignee".to_string(), json!({ "value": [{ "code": "yamada", "name": "Yamada" }] }));

        let task = codec
            .decode(&StoredRecord { id: "42".to_string(), fields })
            .expect("decode");
        assert_eq!(task.id, "42");
        assert_eq!(task.title, "Review");
        assert_eq!(task.project_id, "Alpha");
        assert!(task.start.is_some());
        assert_eq!(task.end, None);
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.assignee_id.as_deref(), Some("yamada"));
    }

    #[test]
    fn candidate_dates_survive_a_round_trip() {
        let codec = TaskCodec::new(FieldMapping::fallback());
        let mut task = sample_task();
        task.task_type = TaskType::Irregular;
        task.candidate_dates = vec![
            CandidateDate { start: TaskTime::parse("2024-03-12").unwrap(), end: None },
            CandidateDate { start: TaskTime::parse("2024-03-14T10:00").unwrap(), end: None },
        ];
        let fields = codec.encode(&task).expect("encode");
        let decoded = codec
            .decode(&StoredRecord { id: "7".to_string(), fields })
            .expect("decode");
        assert_eq!(decoded.candidate_dates, task.candidate_dates);
    }

    #[test]
    fn writes_name_the_field_missing_from_the_remote_schema() {
        let fields = [
            ("task_name", "タスク名"),
            ("project_name", "案件名"),
            ("start_date", "開始日時"),
        ]
        .into_iter()
        .map(|(code, label)| (code.to_string(), FieldDescriptor::new("TEXT", label)))
        .collect();
        let resolution = FieldResolver::default().resolve_outcome(Ok(fields));
        let codec = TaskCodec::new(resolution.mapping);

        let err = codec.encode(&sample_task()).expect_err("status is unknown remotely");
        assert_eq!(
            err,
            SchemaError::UnknownFieldKey {
                field: LogicalField::Status,
                code: "status".to_string()
            }
        );
    }
}
