use crate::schema::LogicalField;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record conflicts with an existing one: {0}")]
    Conflict(String),

    #[error("field `{0}` does not exist in the backing store")]
    UnknownField(String),

    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("failed to decode record: {0}")]
    Decode(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("required fields could not be resolved: {}", join_fields(.0))]
    Unresolved(Vec<LogicalField>),

    #[error("field {field} maps to `{code}`, which does not exist in the remote schema")]
    UnknownFieldKey { field: LogicalField, code: String },

    #[error("field {field} holds an unreadable value: {message}")]
    BadValue { field: LogicalField, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("a title is required")]
    MissingTitle,

    #[error("a project is required")]
    MissingProject,

    #[error("a start date is required")]
    MissingStart,

    #[error("end must be later than start")]
    EndBeforeStart,

    #[error("invalid color `{0}`: use #RRGGBB")]
    InvalidColor(String),

    #[error("a name is required")]
    MissingName,

    #[error("start date {start} is after end date {end}")]
    InvertedRange { start: String, end: String },

    #[error("weekday {0} is out of range: use 0 (Sunday) to 6 (Saturday)")]
    InvalidWeekday(u8),

    #[error("unreadable date/time `{0}`")]
    InvalidTime(String),

    #[error("date out of range: {0}")]
    DateOutOfRange(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("the {0} feature is disabled")]
    FeatureDisabled(&'static str),

    #[error("task not found: {0}")]
    UnknownTask(String),

    #[error("project not found: {0}")]
    UnknownProject(String),

    #[error("member not found: {0}")]
    UnknownMember(String),

    #[error("team not found: {0}")]
    UnknownTeam(String),

    #[error("a project named `{0}` already exists")]
    DuplicateProject(String),

    #[error("invalid recurring template: {0}")]
    InvalidTemplate(String),

    #[error("task {task_id} has no candidate date #{index}")]
    UnknownCandidate { task_id: String, index: usize },
}

pub type BoardResult<T> = std::result::Result<T, BoardError>;

fn join_fields(fields: &[LogicalField]) -> String {
    fields
        .iter()
        .map(|field| field.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
