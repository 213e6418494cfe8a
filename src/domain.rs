use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use clap::ValueEnum;
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};

use crate::error::{BoardError, ValidationError};

const ID_LEN: usize = 8;

pub const MEMBER_PALETTE: [&str; 8] = [
    "#ff6b6b", "#4ecdc4", "#45b7d1", "#96ceb4", "#feca57", "#ff9ff3", "#54a0ff", "#5f27cd",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[serde(alias = "単発")]
    #[value(name = "single")]
    Single,
    #[serde(alias = "デイリー")]
    #[value(name = "daily")]
    Daily,
    #[serde(alias = "不定期")]
    #[value(name = "irregular")]
    Irregular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[serde(alias = "未着手")]
    #[value(name = "not_started")]
    NotStarted,
    #[serde(alias = "進行中")]
    #[value(name = "in_progress")]
    InProgress,
    #[serde(alias = "完了")]
    #[value(name = "completed")]
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[serde(alias = "低")]
    #[value(name = "low")]
    Low,
    #[serde(alias = "中")]
    #[value(name = "medium")]
    Medium,
    #[serde(alias = "高")]
    #[value(name = "high")]
    High,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Single => "single",
            TaskType::Daily => "daily",
            TaskType::Irregular => "irregular",
        }
    }
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [
        TaskStatus::NotStarted,
        TaskStatus::InProgress,
        TaskStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    /// How far along the workflow a status is; used to pick survivors among duplicates.
    pub fn progress_rank(self) -> u8 {
        match self {
            TaskStatus::NotStarted => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Completed => 2,
        }
    }
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Single
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::NotStarted
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// A task timestamp: either a whole calendar day or a local wall-clock time.
///
/// Serialized forms are ISO strings (`2024-03-10`, `2024-03-10T09:00:00`) whose
/// lexicographic order matches their chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TaskTime {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

const DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

impl TaskTime {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let raw = input.trim();
        for format in DATE_TIME_FORMATS {
            if let Ok(value) = NaiveDateTime::parse_from_str(raw, format) {
                return Ok(TaskTime::DateTime(value));
            }
        }
        if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
            return Ok(TaskTime::DateTime(value.with_timezone(&Local).naive_local()));
        }
        if let Ok(value) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok(TaskTime::Date(value));
        }
        Err(ValidationError::InvalidTime(raw.to_string()))
    }

    pub fn on_day(day: NaiveDate, time: Option<NaiveTime>) -> Self {
        match time {
            Some(time) => TaskTime::DateTime(day.and_time(time)),
            None => TaskTime::Date(day),
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            TaskTime::Date(day) => *day,
            TaskTime::DateTime(value) => value.date(),
        }
    }

    pub fn instant(&self) -> NaiveDateTime {
        match self {
            TaskTime::Date(day) => day.and_time(NaiveTime::MIN),
            TaskTime::DateTime(value) => *value,
        }
    }

    pub fn is_date_only(&self) -> bool {
        matches!(self, TaskTime::Date(_))
    }

    pub fn shift_days(self, days: i64) -> Result<Self, ValidationError> {
        let out_of_range = || ValidationError::DateOutOfRange(format!("{self} shifted by {days} day(s)"));
        let delta = Duration::try_days(days).ok_or_else(out_of_range)?;
        let shifted = match self {
            TaskTime::Date(day) => day.checked_add_signed(delta).map(TaskTime::Date),
            TaskTime::DateTime(value) => value.checked_add_signed(delta).map(TaskTime::DateTime),
        };
        shifted.ok_or_else(out_of_range)
    }

    fn variant_rank(&self) -> u8 {
        match self {
            TaskTime::Date(_) => 0,
            TaskTime::DateTime(_) => 1,
        }
    }
}

impl Ord for TaskTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant()
            .cmp(&other.instant())
            .then_with(|| self.variant_rank().cmp(&other.variant_rank()))
    }
}

impl PartialOrd for TaskTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for TaskTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskTime::Date(day) => write!(f, "{}", day.format("%Y-%m-%d")),
            TaskTime::DateTime(value) => write!(f, "{}", value.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

impl TryFrom<String> for TaskTime {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TaskTime::parse(&value)
    }
}

impl From<TaskTime> for String {
    fn from(value: TaskTime) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDate {
    pub start: TaskTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<TaskTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub project_id: String,
    pub project_name: Option<String>,
    pub project_color: Option<String>,
    pub assignee_id: Option<String>,
    pub description: Option<String>,
    pub start: Option<TaskTime>,
    pub end: Option<TaskTime>,
    pub task_type: TaskType,
    #[serde(default)]
    pub candidate_dates: Vec<CandidateDate>,
    pub status: TaskStatus,
    pub priority: Priority,
}

impl Task {
    /// An unsaved task; the backing store assigns the id on creation.
    pub fn draft(title: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            project_id: project_id.into(),
            project_name: None,
            project_color: None,
            assignee_id: None,
            description: None,
            start: None,
            end: None,
            task_type: TaskType::default(),
            candidate_dates: Vec::new(),
            status: TaskStatus::default(),
            priority: Priority::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        if self.project_id.trim().is_empty() {
            return Err(ValidationError::MissingProject);
        }
        let start = self.start.ok_or(ValidationError::MissingStart)?;
        if let Some(end) = self.end {
            if end < start {
                return Err(ValidationError::EndBeforeStart);
            }
        }
        for candidate in &self.candidate_dates {
            if matches!(candidate.end, Some(end) if end < candidate.start) {
                return Err(ValidationError::EndBeforeStart);
            }
        }
        if let Some(color) = &self.project_color {
            validate_color(color)?;
        }
        Ok(())
    }

    /// Start/end pairs this task occupies on the calendar.
    ///
    /// Irregular tasks occupy each candidate date; everything else its own range.
    /// A task without a start occupies nothing.
    pub fn slots(&self) -> Vec<(Option<usize>, TaskTime, Option<TaskTime>)> {
        let Some(start) = self.start else {
            return Vec::new();
        };

        if self.task_type == TaskType::Irregular && !self.candidate_dates.is_empty() {
            return self
                .candidate_dates
                .iter()
                .enumerate()
                .map(|(index, candidate)| (Some(index), candidate.start, candidate.end))
                .collect();
        }

        vec![(None, start, self.end)]
    }

    pub fn display_project_name(&self) -> &str {
        self.project_name.as_deref().unwrap_or(&self.project_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub team_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
}

/// Projects, members and teams known to a board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub teams: Vec<Team>,
}

impl Directory {
    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == id)
    }

    pub fn project_by_name(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.name == name)
    }

    /// Looks a project up by id first, then by name.
    pub fn find_project(&self, key: &str) -> Option<&Project> {
        self.project(key).or_else(|| self.project_by_name(key))
    }

    pub fn member(&self, id: &str) -> Option<&Member> {
        self.members.iter().find(|member| member.id == id)
    }

    pub fn team(&self, id: &str) -> Option<&Team> {
        self.teams.iter().find(|team| team.id == id)
    }

    pub fn add_project(&mut self, name: String, color: Option<String>) -> Result<String, BoardError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::MissingName.into());
        }
        if self.project_by_name(&name).is_some() {
            return Err(BoardError::DuplicateProject(name));
        }
        if let Some(color) = &color {
            validate_color(color)?;
        }

        let id = generate_id();
        self.projects.push(Project {
            id: id.clone(),
            name,
            color,
        });
        Ok(id)
    }

    pub fn add_member(
        &mut self,
        name: String,
        role: Option<String>,
        color: Option<String>,
        team_ids: Vec<String>,
    ) -> Result<String, BoardError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::MissingName.into());
        }
        if let Some(color) = &color {
            validate_color(color)?;
        }
        if let Some(missing) = team_ids.iter().find(|id| self.team(id).is_none()) {
            return Err(BoardError::UnknownTeam(missing.clone()));
        }

        let color = color
            .unwrap_or_else(|| MEMBER_PALETTE[self.members.len() % MEMBER_PALETTE.len()].to_string());
        let id = generate_id();
        self.members.push(Member {
            id: id.clone(),
            name,
            color,
            role,
            team_ids,
        });
        Ok(id)
    }

    pub fn add_team(&mut self, name: String) -> Result<String, BoardError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::MissingName.into());
        }

        let id = generate_id();
        self.teams.push(Team {
            id: id.clone(),
            name,
        });
        Ok(id)
    }

    pub fn remove_project(&mut self, id: &str) -> Option<Project> {
        let index = self.projects.iter().position(|project| project.id == id)?;
        Some(self.projects.remove(index))
    }

    pub fn remove_member(&mut self, id: &str) -> Option<Member> {
        let index = self.members.iter().position(|member| member.id == id)?;
        Some(self.members.remove(index))
    }

    /// Removes a team and drops it from every member's team list.
    pub fn remove_team(&mut self, id: &str) -> Option<Team> {
        let index = self.teams.iter().position(|team| team.id == id)?;
        for member in &mut self.members {
            member.team_ids.retain(|team_id| team_id != id);
        }
        Some(self.teams.remove(index))
    }

    /// Adds projects referenced by tasks but missing here, keyed by their name.
    pub fn discover_projects(&mut self, tasks: &[Task]) -> usize {
        let mut added = 0;
        for task in tasks {
            if task.project_id.is_empty() || self.find_project(&task.project_id).is_some() {
                continue;
            }
            let name = task.display_project_name().to_string();
            self.projects.push(Project {
                id: task.project_id.clone(),
                name,
                color: None,
            });
            added += 1;
        }
        added
    }

    pub fn project_name_for<'a>(&'a self, task: &'a Task) -> &'a str {
        self.find_project(&task.project_id)
            .map(|project| project.name.as_str())
            .unwrap_or_else(|| task.display_project_name())
    }
}

pub fn validate_color(color: &str) -> Result<(), ValidationError> {
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|ch| ch.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidColor(color.to_string()))
    }
}

pub fn generate_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}
