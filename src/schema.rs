//! Maps a remote, possibly renamed schema onto the logical task fields.
//!
//! Resolution tries an ordered list of matchers. Each matcher gets a pass over
//! every still-unresolved logical field, and a field code claimed by one
//! logical field is never handed to another.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    #[serde(rename = "type")]
    pub field_type: String,
    pub label: String,
}

impl FieldDescriptor {
    pub fn new(field_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            label: label.into(),
        }
    }
}

pub type FieldDescriptors = BTreeMap<String, FieldDescriptor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalField {
    TaskName,
    ProjectName,
    StartDate,
    EndDate,
    TaskType,
    Status,
    Description,
    Priority,
    Assignee,
    ProjectId,
    ProjectColor,
    CandidateDates,
}

impl LogicalField {
    pub const ALL: [LogicalField; 12] = [
        LogicalField::TaskName,
        LogicalField::ProjectName,
        LogicalField::StartDate,
        LogicalField::EndDate,
        LogicalField::TaskType,
        LogicalField::Status,
        LogicalField::Description,
        LogicalField::Priority,
        LogicalField::Assignee,
        LogicalField::ProjectId,
        LogicalField::ProjectColor,
        LogicalField::CandidateDates,
    ];

    pub const REQUIRED: [LogicalField; 4] = [
        LogicalField::TaskName,
        LogicalField::ProjectName,
        LogicalField::StartDate,
        LogicalField::Status,
    ];

    pub fn is_required(self) -> bool {
        Self::REQUIRED.contains(&self)
    }

    /// Field code assumed when the remote schema cannot be inspected.
    pub fn default_code(self) -> &'static str {
        match self {
            LogicalField::TaskName => "task_name",
            LogicalField::ProjectName => "project_name",
            LogicalField::StartDate => "start_date",
            LogicalField::EndDate => "end_date",
            LogicalField::TaskType => "task_type",
            LogicalField::Status => "status",
            LogicalField::Description => "description",
            LogicalField::Priority => "priority",
            LogicalField::Assignee => "assignee",
            LogicalField::ProjectId => "project_id",
            LogicalField::ProjectColor => "project_color",
            LogicalField::CandidateDates => "candidate_dates",
        }
    }

    fn known_labels(self) -> &'static [&'static str] {
        match self {
            LogicalField::TaskName => &["タスク名", "Task Name", "Title"],
            LogicalField::ProjectName => &["案件名", "Project", "Project Name"],
            LogicalField::StartDate => &["開始日時", "開始日", "Start", "Start Date"],
            LogicalField::EndDate => &["終了日時", "終了日", "End", "End Date"],
            LogicalField::TaskType => &["タスク種別", "タスクタイプ", "Task Type", "Type"],
            LogicalField::Status => &["ステータス", "Status"],
            LogicalField::Description => &["説明", "作業内容", "Description"],
            LogicalField::Priority => &["優先度", "Priority"],
            LogicalField::Assignee => &["担当者", "Assignee"],
            LogicalField::ProjectId => &["案件ID", "Project ID"],
            LogicalField::ProjectColor => &["案件カラー", "Project Color"],
            LogicalField::CandidateDates => &["候補日", "Candidate Dates"],
        }
    }

    fn label_keywords(self) -> &'static [&'static str] {
        match self {
            LogicalField::TaskName => &["タスク", "名前", "title"],
            LogicalField::ProjectName => &["案件", "プロジェクト", "project"],
            LogicalField::StartDate => &["開始", "日時", "start"],
            LogicalField::EndDate => &["終了", "end"],
            LogicalField::TaskType => &["種別", "タイプ", "type"],
            LogicalField::Status => &["ステータス", "状態", "status"],
            LogicalField::Description => &["説明", "内容", "description"],
            LogicalField::Priority => &["優先", "priority"],
            LogicalField::Assignee => &["担当", "assignee"],
            LogicalField::ProjectId => &[],
            LogicalField::ProjectColor => &["カラー", "color"],
            LogicalField::CandidateDates => &["候補", "candidate"],
        }
    }

    fn code_keywords(self) -> &'static [&'static str] {
        match self {
            LogicalField::TaskName => &["task", "name", "title"],
            LogicalField::ProjectName => &["project"],
            LogicalField::StartDate => &["start", "date"],
            LogicalField::EndDate => &["end"],
            LogicalField::TaskType => &["type"],
            LogicalField::Status => &["status"],
            LogicalField::Description => &["description", "desc"],
            LogicalField::Priority => &["priority"],
            LogicalField::Assignee => &["assignee", "member", "user"],
            LogicalField::ProjectId => &[],
            LogicalField::ProjectColor => &["color"],
            LogicalField::CandidateDates => &["candidate"],
        }
    }
}

impl Display for LogicalField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogicalField::TaskName => "TASK_NAME",
            LogicalField::ProjectName => "PROJECT_NAME",
            LogicalField::StartDate => "START_DATE",
            LogicalField::EndDate => "END_DATE",
            LogicalField::TaskType => "TASK_TYPE",
            LogicalField::Status => "STATUS",
            LogicalField::Description => "DESCRIPTION",
            LogicalField::Priority => "PRIORITY",
            LogicalField::Assignee => "ASSIGNEE",
            LogicalField::ProjectId => "PROJECT_ID",
            LogicalField::ProjectColor => "PROJECT_COLOR",
            LogicalField::CandidateDates => "CANDIDATE_DATES",
        };
        f.pad(name)
    }
}

pub trait FieldMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn matches(&self, field: LogicalField, code: &str, descriptor: &FieldDescriptor) -> bool;
}

/// The field code is exactly the assumed code.
pub struct ExactCodeMatcher;

/// The label is one of the known labels for the field.
pub struct ExactLabelMatcher;

/// The label or code contains one of the field's keyword fragments.
pub struct KeywordMatcher;

impl FieldMatcher for ExactCodeMatcher {
    fn name(&self) -> &'static str {
        "exact-code"
    }

    fn matches(&self, field: LogicalField, code: &str, _descriptor: &FieldDescriptor) -> bool {
        code == field.default_code()
    }
}

impl FieldMatcher for ExactLabelMatcher {
    fn name(&self) -> &'static str {
        "exact-label"
    }

    fn matches(&self, field: LogicalField, _code: &str, descriptor: &FieldDescriptor) -> bool {
        field.known_labels().contains(&descriptor.label.as_str())
    }
}

impl FieldMatcher for KeywordMatcher {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn matches(&self, field: LogicalField, code: &str, descriptor: &FieldDescriptor) -> bool {
        let label = descriptor.label.to_lowercase();
        let code = code.to_lowercase();
        field
            .label_keywords()
            .iter()
            .any(|keyword| label.contains(keyword))
            || field.code_keywords().iter().any(|keyword| code.contains(keyword))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    Detected,
    Fallback,
}

/// Resolved logical-field to field-code mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub codes: BTreeMap<LogicalField, String>,
    pub source: MappingSource,
    /// Field codes the remote schema is known to contain, when it was inspected.
    #[serde(default)]
    pub known_codes: Option<BTreeSet<String>>,
}

impl FieldMapping {
    pub fn fallback() -> Self {
        Self {
            codes: LogicalField::ALL
                .iter()
                .map(|field| (*field, field.default_code().to_string()))
                .collect(),
            source: MappingSource::Fallback,
            known_codes: None,
        }
    }

    pub fn code(&self, field: LogicalField) -> Option<&str> {
        self.codes.get(&field).map(String::as_str)
    }

    pub fn require(&self, field: LogicalField) -> Result<&str, SchemaError> {
        self.code(field)
            .ok_or_else(|| SchemaError::Unresolved(vec![field]))
    }

    pub fn missing_required(&self) -> Vec<LogicalField> {
        LogicalField::REQUIRED
            .iter()
            .copied()
            .filter(|field| !self.codes.contains_key(field))
            .collect()
    }

    /// Fails when `field` is mapped to a code the remote schema does not have.
    pub fn check_writable(&self, field: LogicalField) -> Result<&str, SchemaError> {
        let code = self.require(field)?;
        match &self.known_codes {
            Some(known) if !known.contains(code) => Err(SchemaError::UnknownFieldKey {
                field,
                code: code.to_string(),
            }),
            _ => Ok(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDiagnostic {
    /// Introspection failed; the static table is in use.
    IntrospectionFailed(String),
    /// Required fields were not found and fall back to assumed codes.
    Unresolved(Vec<LogicalField>),
}

impl Display for SchemaDiagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaDiagnostic::IntrospectionFailed(message) => {
                write!(f, "field introspection failed ({message}); using assumed field codes")
            }
            SchemaDiagnostic::Unresolved(fields) => {
                let names = fields.iter().map(|field| field.to_string()).collect::<Vec<_>>();
                write!(
                    f,
                    "required fields not found in the remote schema: {}; using assumed field codes",
                    names.join(", ")
                )
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaResolution {
    pub mapping: FieldMapping,
    pub diagnostics: Vec<SchemaDiagnostic>,
}

pub struct FieldResolver {
    matchers: Vec<Box<dyn FieldMatcher>>,
}

impl Default for FieldResolver {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ExactCodeMatcher),
            Box::new(ExactLabelMatcher),
            Box::new(KeywordMatcher),
        ])
    }
}

impl FieldResolver {
    pub fn new(matchers: Vec<Box<dyn FieldMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn resolve(&self, fields: &FieldDescriptors) -> FieldMapping {
        let mut codes: BTreeMap<LogicalField, String> = BTreeMap::new();
        let mut claimed: BTreeSet<&str> = BTreeSet::new();

        for matcher in &self.matchers {
            for field in LogicalField::ALL {
                if codes.contains_key(&field) {
                    continue;
                }
                let hit = fields.iter().find(|(code, descriptor)| {
                    !claimed.contains(code.as_str()) && matcher.matches(field, code, descriptor)
                });
                if let Some((code, descriptor)) = hit {
                    tracing::debug!(
                        "{} match: {field} = {code} ({})",
                        matcher.name(),
                        descriptor.label
                    );
                    claimed.insert(code.as_str());
                    codes.insert(field, code.clone());
                }
            }
        }

        FieldMapping {
            codes,
            source: MappingSource::Detected,
            known_codes: Some(fields.keys().cloned().collect()),
        }
    }

    /// Resolves the outcome of an introspection call.
    ///
    /// A failed call yields the static table. Required fields the remote schema
    /// does not expose are filled from the static table and reported, so writes
    /// against them fail loudly instead of using a guessed key.
    pub fn resolve_outcome(
        &self,
        outcome: Result<FieldDescriptors, StoreError>,
    ) -> SchemaResolution {
        let fields = match outcome {
            Ok(fields) => fields,
            Err(err) => {
                tracing::warn!("field introspection failed: {err}");
                return SchemaResolution {
                    mapping: FieldMapping::fallback(),
                    diagnostics: vec![SchemaDiagnostic::IntrospectionFailed(err.to_string())],
                };
            }
        };

        let mut mapping = self.resolve(&fields);
        let mut diagnostics = Vec::new();
        let missing = mapping.missing_required();
        if !missing.is_empty() {
            let diagnostic = SchemaDiagnostic::Unresolved(missing.clone());
            tracing::warn!("{diagnostic}");
            for field in missing {
                mapping.codes.insert(field, field.default_code().to_string());
            }
            diagnostics.push(diagnostic);
        }

        SchemaResolution {
            mapping,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptors(rows: &[(&str, &str, &str)]) -> FieldDescriptors {
        rows.iter()
            .map(|(code, kind, label)| (code.to_string(), FieldDescriptor::new(*kind, *label)))
            .collect()
    }

    #[test]
    fn matchers_are_independently_usable() {
        let descriptor = FieldDescriptor::new("DATETIME", "開始日時");
        assert!(ExactLabelMatcher.matches(LogicalField::StartDate, "field_3", &descriptor));
        assert!(!ExactCodeMatcher.matches(LogicalField::StartDate, "field_3", &descriptor));
        assert!(KeywordMatcher.matches(LogicalField::StartDate, "field_3", &descriptor));
        assert!(ExactCodeMatcher.matches(LogicalField::Status, "status", &descriptor));
    }

    #[test]
    fn resolves_in_priority_order() {
        let fields = descriptors(&[
            ("task_name", "SINGLE_LINE_TEXT", "Name"),
            ("f_project", "SINGLE_LINE_TEXT", "案件名"),
            ("f_begin", "DATETIME", "開始日時"),
            ("f_finish", "DATETIME", "Finish time"),
            ("f_state", "DROP_DOWN", "状態"),
            ("f_kind", "RADIO_BUTTON", "タスク種別"),
        ]);

        let mapping = FieldResolver::default().resolve(&fields);
        assert_eq!(mapping.code(LogicalField::TaskName), Some("task_name"));
        assert_eq!(mapping.code(LogicalField::ProjectName), Some("f_project"));
        assert_eq!(mapping.code(LogicalField::StartDate), Some("f_begin"));
        assert_eq!(mapping.code(LogicalField::TaskType), Some("f_kind"));
        assert_eq!(mapping.code(LogicalField::Status), Some("f_state"));
        assert_eq!(mapping.code(LogicalField::Priority), None);
        assert_eq!(mapping.source, MappingSource::Detected);
        assert!(mapping.missing_required().is_empty());
    }

    #[test]
    fn a_code_is_claimed_only_once() {
        let fields = descriptors(&[("start_date", "DATE", "Date")]);
        let mapping = FieldResolver::default().resolve(&fields);
        assert_eq!(mapping.code(LogicalField::StartDate), Some("start_date"));
        assert_eq!(mapping.code(LogicalField::EndDate), None);
    }

    #[test]
    fn failed_introspection_uses_static_table() {
        let resolution = FieldResolver::default()
            .resolve_outcome(Err(StoreError::Unavailable("timeout".to_string())));
        assert_eq!(resolution.mapping, FieldMapping::fallback());
        assert!(matches!(
            resolution.diagnostics.as_slice(),
            [SchemaDiagnostic::IntrospectionFailed(_)]
        ));
    }

    #[test]
    fn unresolved_required_fields_are_reported() {
        let fields = descriptors(&[
            ("task_name", "SINGLE_LINE_TEXT", "タスク名"),
            ("start_date", "DATETIME", "開始日時"),
        ]);
        let resolution = FieldResolver::default().resolve_outcome(Ok(fields));
        assert_eq!(
            resolution.diagnostics,
            vec![SchemaDiagnostic::Unresolved(vec![
                LogicalField::ProjectName,
                LogicalField::Status
            ])]
        );

        let err = resolution
            .mapping
            .check_writable(LogicalField::Status)
            .expect_err("status is not in the remote schema");
        assert_eq!(
            err,
            SchemaError::UnknownFieldKey {
                field: LogicalField::Status,
                code: "status".to_string()
            }
        );
        assert_eq!(resolution.mapping.check_writable(LogicalField::TaskName), Ok("task_name"));
    }
}
