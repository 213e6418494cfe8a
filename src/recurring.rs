use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveTime};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::domain::{Task, TaskStatus, TaskTime, TaskType};
use crate::error::{BoardError, BoardResult, StoreError, ValidationError};
use crate::record::TaskCodec;
use crate::schema::LogicalField;
use crate::store::{Query, SharedStore};

/// Days a daily template should be instantiated on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrencePlan {
    start: NaiveDate,
    end: NaiveDate,
    /// 0 = Sunday .. 6 = Saturday.
    excluded_weekdays: BTreeSet<u8>,
    time: Option<NaiveTime>,
}

impl RecurrencePlan {
    pub fn new(
        start: NaiveDate,
        end: NaiveDate,
        excluded_weekdays: BTreeSet<u8>,
        time: Option<NaiveTime>,
    ) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        if let Some(day) = excluded_weekdays.iter().find(|day| **day > 6) {
            return Err(ValidationError::InvalidWeekday(*day));
        }
        Ok(Self {
            start,
            end,
            excluded_weekdays,
            time,
        })
    }

    /// Every day in the range, inclusive, whose weekday is not excluded.
    pub fn days(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|day| *day <= self.end)
            .filter(|day| {
                let weekday = day.weekday().num_days_from_sunday() as u8;
                !self.excluded_weekdays.contains(&weekday)
            })
            .collect()
    }
}

/// Identity of a generated occurrence. At most one task may exist per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OccurrenceKey {
    pub title: String,
    pub project_id: String,
    pub date: NaiveDate,
}

impl OccurrenceKey {
    pub fn of(task: &Task) -> Option<Self> {
        let start = task.start?;
        Some(Self {
            title: task.title.clone(),
            project_id: task.project_id.clone(),
            date: start.date(),
        })
    }
}

/// A fresh occurrence of `template` on `day`.
pub fn instantiate(template: &Task, day: NaiveDate, time: Option<NaiveTime>) -> Task {
    let mut task = Task::draft(template.title.clone(), template.project_id.clone());
    task.project_name = template.project_name.clone();
    task.project_color = template.project_color.clone();
    task.assignee_id = template.assignee_id.clone();
    task.description = template.description.clone();
    task.priority = template.priority;
    task.task_type = TaskType::Daily;
    task.status = TaskStatus::NotStarted;
    task.start = Some(TaskTime::on_day(day, time));
    task
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationReport {
    pub created: Vec<Task>,
    pub skipped: Vec<NaiveDate>,
    pub failed: Vec<(NaiveDate, String)>,
}

/// Outcome of a duplicate sweep. Deletes that fail are reported, not retried.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
    pub removed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

enum Outcome {
    Created(Task),
    Skipped(NaiveDate),
    Failed(NaiveDate, String),
}

/// Daily tasks that share an occurrence key, grouped by that key.
pub fn find_conflicts(tasks: &[Task]) -> Vec<Vec<&Task>> {
    let mut groups: BTreeMap<OccurrenceKey, Vec<&Task>> = BTreeMap::new();
    for task in tasks.iter().filter(|task| task.task_type == TaskType::Daily) {
        if let Some(key) = OccurrenceKey::of(task) {
            groups.entry(key).or_default().push(task);
        }
    }
    groups.into_values().filter(|group| group.len() > 1).collect()
}

/// Creates daily occurrences against a store, at most one per [`OccurrenceKey`].
///
/// Runs sharing a generator never race each other: each key has a gate that is
/// held from the existence check until the write settles, and a second run
/// waits at the gate and then checks again. Separate processes can still both
/// create the same occurrence unless the store enforces a unique key, so
/// [`RecurringGenerator::reconcile`] is there to sweep up extras.
#[derive(Clone)]
pub struct RecurringGenerator {
    store: SharedStore,
    codec: TaskCodec,
    in_flight: Arc<Mutex<HashMap<OccurrenceKey, Arc<Mutex<()>>>>>,
}

impl RecurringGenerator {
    pub fn new(store: SharedStore, codec: TaskCodec) -> Self {
        Self {
            store,
            codec,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn generate(&self, template: &Task, plan: &RecurrencePlan) -> BoardResult<GenerationReport> {
        if template.task_type != TaskType::Daily {
            return Err(BoardError::InvalidTemplate(format!(
                "`{}` is a {} task, not a daily one",
                template.title,
                template.task_type.as_str()
            )));
        }
        if template.title.trim().is_empty() || template.project_id.trim().is_empty() {
            return Err(BoardError::InvalidTemplate(
                "a template needs a title and a project".to_string(),
            ));
        }

        let days = plan.days();
        tracing::info!(
            "generating `{}` over {} day(s) from {} to {}",
            template.title,
            days.len(),
            plan.start,
            plan.end
        );
        let outcomes = join_all(
            days.into_iter()
                .map(|day| self.create_or_skip(template, day, plan.time)),
        )
        .await;

        let mut report = GenerationReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Created(task) => report.created.push(task),
                Outcome::Skipped(day) => report.skipped.push(day),
                Outcome::Failed(day, message) => report.failed.push((day, message)),
            }
        }
        tracing::info!(
            "`{}`: {} created, {} skipped, {} failed",
            template.title,
            report.created.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn create_or_skip(&self, template: &Task, day: NaiveDate, time: Option<NaiveTime>) -> Outcome {
        let task = instantiate(template, day, time);
        let key = OccurrenceKey {
            title: task.title.clone(),
            project_id: task.project_id.clone(),
            date: day,
        };
        let gate = self.in_flight.lock().await.entry(key.clone()).or_default().clone();
        let held = match gate.try_lock() {
            Ok(held) => held,
            Err(_) => {
                tracing::debug!("{day}: waiting for another run generating `{}`", key.title);
                gate.lock().await
            }
        };

        let outcome = self.write_occurrence(task, day).await;
        drop(held);

        // The map and this call hold the only references once nobody else waits.
        let mut in_flight = self.in_flight.lock().await;
        if Arc::strong_count(&gate) == 2 {
            in_flight.remove(&key);
        }
        outcome
    }

    async fn write_occurrence(&self, mut task: Task, day: NaiveDate) -> Outcome {
        let query = match self.existence_query(&task, day) {
            Ok(query) => query,
            Err(err) => return Outcome::Failed(day, err.to_string()),
        };
        match self.store.list(&query).await {
            Ok(existing) if !existing.is_empty() => {
                tracing::debug!("{day}: `{}` already exists", task.title);
                return Outcome::Skipped(day);
            }
            Ok(_) => {}
            Err(err) => return Outcome::Failed(day, err.to_string()),
        }

        let record = match self.codec.encode(&task) {
            Ok(record) => record,
            Err(err) => return Outcome::Failed(day, err.to_string()),
        };
        match self.store.create(record).await {
            Ok(id) => {
                task.id = id;
                Outcome::Created(task)
            }
            Err(StoreError::Conflict(key)) => {
                tracing::debug!("{day}: store rejected duplicate {key}");
                Outcome::Skipped(day)
            }
            Err(err) => {
                tracing::warn!("{day}: failed to create `{}`: {err}", task.title);
                Outcome::Failed(day, err.to_string())
            }
        }
    }

    fn existence_query(&self, task: &Task, day: NaiveDate) -> BoardResult<Query> {
        let title_code = self.codec.code(LogicalField::TaskName)?;
        let start_code = self.codec.code(LogicalField::StartDate)?;
        let (project_code, project_value) = self.codec.project_key(task)?;
        let next_day = day
            .succ_opt()
            .ok_or_else(|| ValidationError::DateOutOfRange(day.to_string()))?;
        Ok(Query::all()
            .eq(title_code, task.title.clone())
            .eq(project_code, project_value)
            .ge(start_code, day.format("%Y-%m-%d").to_string())
            .lt(start_code, next_day.format("%Y-%m-%d").to_string()))
    }

    /// Deletes duplicate daily occurrences, keeping the most advanced one of
    /// each group (ties go to the smallest id).
    pub async fn reconcile(&self) -> BoardResult<Reconciliation> {
        let records = self.store.list(&Query::all()).await?;
        let mut tasks = Vec::with_capacity(records.len());
        for record in &records {
            match self.codec.decode(record) {
                Ok(task) => tasks.push(task),
                Err(err) => tracing::warn!("skipping unreadable record {}: {err}", record.id),
            }
        }

        let mut doomed = Vec::new();
        for mut group in find_conflicts(&tasks) {
            group.sort_by(|a, b| {
                b.status
                    .progress_rank()
                    .cmp(&a.status.progress_rank())
                    .then_with(|| a.id.cmp(&b.id))
            });
            doomed.extend(group.iter().skip(1).map(|task| task.id.clone()));
        }

        let mut outcome = Reconciliation::default();
        for id in doomed {
            match self.store.delete(&id).await {
                Ok(()) => outcome.removed.push(id),
                Err(err) => {
                    tracing::warn!("failed to delete duplicate {id}: {err}");
                    outcome.failed.push((id, err.to_string()));
                }
            }
        }
        if !outcome.removed.is_empty() {
            tracing::info!("removed {} duplicate daily occurrence(s)", outcome.removed.len());
        }
        Ok(outcome)
    }
}
