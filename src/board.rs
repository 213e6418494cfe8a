//! The board: one state container for the loaded tasks, the directory and the
//! active filters.
//!
//! Every operation is an explicit async method. After each state change the
//! board publishes a fresh [`BoardView`] on a watch channel, and user-facing
//! outcomes go out as [`Notice`]s on a broadcast channel. Failures never tear
//! the board down: reads degrade to an empty list, writes are reported and
//! optimistic moves are rolled back.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::config::{BoardConfig, Features};
use crate::domain::{Directory, Task, TaskStatus, TaskTime, TaskType};
use crate::error::{BoardError, BoardResult, ValidationError};
use crate::filters::{FilterChange, FilterDimension, FilterOptions, FilterState};
use crate::projection::{CalendarEvent, DisplayOptions, project};
use crate::record::TaskCodec;
use crate::recurring::{GenerationReport, Reconciliation, RecurrencePlan, RecurringGenerator};
use crate::schema::{FieldMapping, FieldResolver, SchemaDiagnostic};
use crate::store::{Query, SharedStore, StoreEvent};
use crate::summary::{Summary, summarize};

pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

const NOTICE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// What a rendering surface needs to draw the board.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoardView {
    pub events: Vec<CalendarEvent>,
    pub summary: Summary,
    /// Dated tasks passing the filters.
    pub visible: usize,
    /// All dated tasks.
    pub total: usize,
}

pub struct Board {
    store: SharedStore,
    codec: TaskCodec,
    generator: RecurringGenerator,
    diagnostics: Vec<SchemaDiagnostic>,
    directory: Directory,
    tasks: Vec<Task>,
    filters: FilterState,
    features: Features,
    display: DisplayOptions,
    clock: Clock,
    view: watch::Sender<BoardView>,
    notices: broadcast::Sender<Notice>,
}

impl Board {
    /// Binds a board to `store`: resolves the schema, loads the directory and the tasks.
    pub async fn open(store: SharedStore, config: &BoardConfig) -> Self {
        let resolution = FieldResolver::default().resolve_outcome(store.describe_fields().await);
        let codec = TaskCodec::new(resolution.mapping);
        let (view, _) = watch::channel(BoardView::default());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let mut board = Self {
            generator: RecurringGenerator::new(store.clone(), codec.clone()),
            store,
            codec,
            diagnostics: resolution.diagnostics,
            directory: Directory::default(),
            tasks: Vec::new(),
            filters: FilterState::default(),
            features: config.features,
            display: config.display_options(),
            clock: Arc::new(|| Local::now().naive_local()),
            view,
            notices,
        };
        board.reload_directory().await;
        board.refresh().await;
        board
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self.publish();
        self
    }

    pub fn subscribe_view(&self) -> watch::Receiver<BoardView> {
        self.view.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn subscribe_store(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        self.store.subscribe()
    }

    pub fn view(&self) -> BoardView {
        self.view.borrow().clone()
    }

    pub fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn mapping(&self) -> &FieldMapping {
        self.codec.mapping()
    }

    pub fn diagnostics(&self) -> &[SchemaDiagnostic] {
        &self.diagnostics
    }

    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions::from_tasks(&self.tasks)
    }

    /// Reloads every task. A failed read leaves the board empty and says so.
    pub async fn refresh(&mut self) {
        match self.store.list(&Query::all()).await {
            Ok(records) => {
                let mut tasks = Vec::with_capacity(records.len());
                for record in &records {
                    match self.codec.decode(record) {
                        Ok(task) => tasks.push(task),
                        Err(err) => tracing::warn!("skipping record {}: {err}", record.id),
                    }
                }
                tasks.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
                let discovered = self.directory.discover_projects(&tasks);
                if discovered > 0 {
                    tracing::debug!("discovered {discovered} project(s) from task records");
                }
                self.tasks = tasks;
            }
            Err(err) => {
                self.tasks.clear();
                self.notify(NoticeLevel::Error, format!("failed to load tasks: {err}"));
            }
        }
        self.publish();
    }

    async fn reload_directory(&mut self) {
        match self.store.load_directory().await {
            Ok(directory) => self.directory = directory,
            Err(err) => self.notify(NoticeLevel::Error, format!("failed to load directory: {err}")),
        }
    }

    pub async fn handle_store_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Deleted(id) => {
                self.tasks.retain(|task| task.id != id);
                self.publish();
            }
            StoreEvent::DirectoryChanged => {
                self.reload_directory().await;
                self.directory.discover_projects(&self.tasks);
                self.publish();
            }
            StoreEvent::Created(_) | StoreEvent::Updated(_) => self.refresh().await,
        }
    }

    pub fn update_filters(&mut self, change: FilterChange) -> BoardResult<()> {
        if !self.features.filters {
            return Err(BoardError::FeatureDisabled("filters"));
        }
        self.filters.apply_change(change);
        self.publish();
        Ok(())
    }

    pub fn reset_filters(&mut self) {
        self.filters.reset();
        self.publish();
    }

    pub async fn create_task(&mut self, mut task: Task) -> BoardResult<String> {
        if let Err(err) = self.prepare(&mut task) {
            return Err(self.fail(err));
        }
        let record = self.codec.encode(&task).map_err(|err| self.fail(err.into()))?;
        let id = self.store.create(record).await.map_err(|err| self.fail(err.into()))?;

        tracing::info!("created task {id} `{}`", task.title);
        task.id = id.clone();
        self.tasks.push(task);
        self.publish();
        self.notify(NoticeLevel::Success, "task created".to_string());
        Ok(id)
    }

    /// Writes every field of `task` that differs from the loaded copy.
    pub async fn update_task(&mut self, mut task: Task) -> BoardResult<()> {
        let before = self.loaded(&task.id)?;
        if let Err(err) = self.prepare(&mut task) {
            return Err(self.fail(err));
        }
        self.apply_update(before, task).await
    }

    pub async fn set_status(&mut self, task_id: &str, status: TaskStatus) -> BoardResult<()> {
        let before = self.loaded(task_id)?;
        let mut after = before.clone();
        after.status = status;
        self.apply_update(before, after).await
    }

    /// Moves a task to another member, or unassigns it.
    pub async fn reassign(&mut self, task_id: &str, member_id: Option<&str>) -> BoardResult<()> {
        let before = self.loaded(task_id)?;
        if let Some(member_id) = member_id {
            if self.directory.member(member_id).is_none() {
                return Err(self.fail(BoardError::UnknownMember(member_id.to_string())));
            }
        }
        let mut after = before.clone();
        after.assignee_id = member_id.map(str::to_string);
        self.apply_update(before, after).await
    }

    /// Picks one candidate date of an irregular task and turns it into a single task.
    pub async fn confirm_candidate(&mut self, task_id: &str, index: usize) -> BoardResult<()> {
        let before = self.loaded(task_id)?;
        let Some(candidate) = before.candidate_dates.get(index).copied() else {
            return Err(self.fail(BoardError::UnknownCandidate {
                task_id: task_id.to_string(),
                index,
            }));
        };
        let mut after = before.clone();
        after.start = Some(candidate.start);
        after.end = candidate.end;
        after.task_type = TaskType::Single;
        after.candidate_dates.clear();
        self.apply_update(before, after).await?;
        self.notify(NoticeLevel::Success, format!("confirmed {}", candidate.start));
        Ok(())
    }

    /// Shifts a task's start and end by whole days.
    pub async fn move_task(&mut self, task_id: &str, days: i64) -> BoardResult<()> {
        if !self.features.drag_drop {
            return Err(BoardError::FeatureDisabled("drag_drop"));
        }
        let task = self.loaded(task_id)?;
        let Some(start) = task.start else {
            return Err(self.fail(ValidationError::MissingStart.into()));
        };
        let shifted = start
            .shift_days(days)
            .and_then(|start| Ok((start, task.end.map(|end| end.shift_days(days)).transpose()?)));
        let (start, end) = shifted.map_err(|err| self.fail(err.into()))?;
        self.reschedule(task_id, start, end).await
    }

    /// Drop or resize of a calendar event.
    ///
    /// The new dates show up in the view immediately. If the store rejects the
    /// write, the old dates are restored and an error notice goes out.
    pub async fn reschedule(
        &mut self,
        task_id: &str,
        start: TaskTime,
        end: Option<TaskTime>,
    ) -> BoardResult<()> {
        if !self.features.drag_drop {
            return Err(BoardError::FeatureDisabled("drag_drop"));
        }
        let before = self.loaded(task_id)?;
        let mut after = before.clone();
        after.start = Some(start);
        after.end = end;
        if let Err(err) = after.validate() {
            return Err(self.fail(err.into()));
        }
        let changes = self
            .codec
            .encode_changes(&before, &after)
            .map_err(|err| self.fail(err.into()))?;

        self.replace(after);
        self.publish();

        if let Err(err) = self.store.update(task_id, changes).await {
            tracing::warn!("reverting move of {task_id}");
            self.replace(before);
            self.publish();
            return Err(self.fail(err.into()));
        }
        Ok(())
    }

    pub async fn delete_task(&mut self, task_id: &str) -> BoardResult<()> {
        self.loaded(task_id)?;
        self.store
            .delete(task_id)
            .await
            .map_err(|err| self.fail(err.into()))?;
        tracing::info!("deleted task {task_id}");
        self.tasks.retain(|task| task.id != task_id);
        self.publish();
        self.notify(NoticeLevel::Success, "task deleted".to_string());
        Ok(())
    }

    pub async fn add_project(&mut self, name: String, color: Option<String>) -> BoardResult<String> {
        let mut directory = self.directory.clone();
        let id = directory.add_project(name, color).map_err(|err| self.fail(err))?;
        self.commit_directory(directory).await?;
        Ok(id)
    }

    /// Tasks that deleting the project would remove with it.
    pub fn project_deletion_impact(&self, project_key: &str) -> BoardResult<Vec<&Task>> {
        let project = self
            .directory
            .find_project(project_key)
            .ok_or_else(|| BoardError::UnknownProject(project_key.to_string()))?;
        Ok(self
            .tasks
            .iter()
            .filter(|task| task.project_id == project.id || self.directory.project_name_for(task) == project.name)
            .collect())
    }

    /// Deletes a project and, with it, every one of its tasks.
    ///
    /// Stops at the first task that cannot be deleted; the project then stays.
    pub async fn delete_project(&mut self, project_key: &str) -> BoardResult<usize> {
        let doomed = match self.project_deletion_impact(project_key) {
            Ok(tasks) => tasks.iter().map(|task| task.id.clone()).collect::<Vec<_>>(),
            Err(err) => return Err(self.fail(err)),
        };
        for id in &doomed {
            self.store.delete(id).await.map_err(|err| self.fail(err.into()))?;
            self.tasks.retain(|task| &task.id != id);
        }

        let mut directory = self.directory.clone();
        let project_id = directory
            .find_project(project_key)
            .map(|project| project.id.clone())
            .unwrap_or_default();
        directory.remove_project(&project_id);
        self.commit_directory(directory).await?;
        tracing::info!("deleted project {project_id} and {} task(s)", doomed.len());
        Ok(doomed.len())
    }

    pub async fn add_member(
        &mut self,
        name: String,
        role: Option<String>,
        color: Option<String>,
        team_ids: Vec<String>,
    ) -> BoardResult<String> {
        let mut directory = self.directory.clone();
        let id = directory
            .add_member(name, role, color, team_ids)
            .map_err(|err| self.fail(err))?;
        self.commit_directory(directory).await?;
        Ok(id)
    }

    /// Removes a member. Their tasks stay, unassigned.
    pub async fn delete_member(&mut self, member_id: &str) -> BoardResult<usize> {
        if self.directory.member(member_id).is_none() {
            return Err(self.fail(BoardError::UnknownMember(member_id.to_string())));
        }
        let assigned = self
            .tasks
            .iter()
            .filter(|task| task.assignee_id.as_deref() == Some(member_id))
            .map(|task| task.id.clone())
            .collect::<Vec<_>>();
        for id in &assigned {
            self.reassign(id, None).await?;
        }

        let mut directory = self.directory.clone();
        directory.remove_member(member_id);
        self.commit_directory(directory).await?;
        Ok(assigned.len())
    }

    pub async fn add_team(&mut self, name: String) -> BoardResult<String> {
        let mut directory = self.directory.clone();
        let id = directory.add_team(name).map_err(|err| self.fail(err))?;
        self.commit_directory(directory).await?;
        Ok(id)
    }

    pub async fn delete_team(&mut self, team_id: &str) -> BoardResult<()> {
        let mut directory = self.directory.clone();
        if directory.remove_team(team_id).is_none() {
            return Err(self.fail(BoardError::UnknownTeam(team_id.to_string())));
        }
        self.commit_directory(directory).await
    }

    /// Instantiates the daily template `template_id` over `plan`.
    pub async fn generate_recurring(
        &mut self,
        template_id: &str,
        plan: &RecurrencePlan,
    ) -> BoardResult<GenerationReport> {
        if !self.features.recurring {
            return Err(BoardError::FeatureDisabled("recurring"));
        }
        let template = self.loaded(template_id)?;
        let report = self
            .generator
            .generate(&template, plan)
            .await
            .map_err(|err| self.fail(err))?;

        self.tasks.extend(report.created.iter().cloned());
        self.publish();
        let level = if report.failed.is_empty() {
            NoticeLevel::Success
        } else {
            NoticeLevel::Warning
        };
        self.notify(
            level,
            format!(
                "{} daily task(s) created, {} skipped, {} failed",
                report.created.len(),
                report.skipped.len(),
                report.failed.len()
            ),
        );
        Ok(report)
    }

    /// Removes duplicate daily occurrences left by concurrent sessions.
    pub async fn reconcile(&mut self) -> BoardResult<Reconciliation> {
        if !self.features.recurring {
            return Err(BoardError::FeatureDisabled("recurring"));
        }
        let outcome = self.generator.reconcile().await.map_err(|err| self.fail(err))?;
        self.tasks.retain(|task| !outcome.removed.contains(&task.id));
        self.publish();
        let (level, message) = match (outcome.removed.len(), outcome.failed.len()) {
            (0, 0) => (NoticeLevel::Info, "no duplicate daily tasks".to_string()),
            (removed, 0) => (NoticeLevel::Success, format!("removed {removed} duplicate(s)")),
            (removed, failed) => (
                NoticeLevel::Warning,
                format!("removed {removed} duplicate(s), {failed} could not be deleted"),
            ),
        };
        self.notify(level, message);
        Ok(outcome)
    }

    /// Validates a task and fills in what the directory knows about it.
    fn prepare(&self, task: &mut Task) -> BoardResult<()> {
        task.validate()?;
        let project = self
            .directory
            .find_project(&task.project_id)
            .ok_or_else(|| BoardError::UnknownProject(task.project_id.clone()))?;
        task.project_id = project.id.clone();
        task.project_name = Some(project.name.clone());
        if let Some(member_id) = &task.assignee_id {
            if self.directory.member(member_id).is_none() {
                return Err(BoardError::UnknownMember(member_id.clone()));
            }
        }
        Ok(())
    }

    fn loaded(&self, task_id: &str) -> BoardResult<Task> {
        self.task(task_id)
            .cloned()
            .ok_or_else(|| BoardError::UnknownTask(task_id.to_string()))
    }

    fn replace(&mut self, task: Task) {
        if let Some(slot) = self.tasks.iter_mut().find(|slot| slot.id == task.id) {
            *slot = task;
        }
    }

    async fn apply_update(&mut self, before: Task, after: Task) -> BoardResult<()> {
        let changes = self
            .codec
            .encode_changes(&before, &after)
            .map_err(|err| self.fail(err.into()))?;
        if !changes.is_empty() {
            self.store
                .update(&after.id, changes)
                .await
                .map_err(|err| self.fail(err.into()))?;
            tracing::info!("updated task {}", after.id);
        }
        self.replace(after);
        self.publish();
        Ok(())
    }

    async fn commit_directory(&mut self, directory: Directory) -> BoardResult<()> {
        self.store
            .save_directory(&directory)
            .await
            .map_err(|err| self.fail(err.into()))?;
        self.directory = directory;
        self.publish();
        Ok(())
    }

    fn publish(&self) {
        let filters = if self.features.filters {
            self.filters.clone()
        } else {
            FilterState::unrestricted()
        };
        // Summary buckets handle completion themselves.
        let mut scope = filters.clone();
        scope.clear(FilterDimension::Statuses);
        let in_scope = self
            .tasks
            .iter()
            .filter(|task| scope.matches(task))
            .cloned()
            .collect::<Vec<_>>();

        let dated = self.tasks.iter().filter(|task| task.start.is_some());
        let view = BoardView {
            events: project(&self.tasks, &filters, &self.directory, &self.display),
            summary: summarize(&in_scope, self.now(), &self.directory.members),
            visible: dated.clone().filter(|task| filters.matches(task)).count(),
            total: dated.count(),
        };
        self.view.send_replace(view);
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        match level {
            NoticeLevel::Error => tracing::warn!("{message}"),
            _ => tracing::debug!("{message}"),
        }
        let _ = self.notices.send(Notice { level, message });
    }

    fn fail(&self, err: BoardError) -> BoardError {
        self.notify(NoticeLevel::Error, err.to_string());
        err
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::domain::CandidateDate;
    use crate::error::StoreError;
    use crate::filters::FilterValue;
    use crate::schema::FieldDescriptors;
    use crate::storage::default_fields;
    use crate::store::{MemoryStore, Record, RecordStore, StoredRecord};

    /// A store whose reads or writes can be made to fail.
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new().with_fields(default_fields()),
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
            }
        }

        fn check(&self, flag: &AtomicBool) -> Result<(), StoreError> {
            if flag.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("connection reset".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn list(&self, query: &Query) -> Result<Vec<StoredRecord>, StoreError> {
            self.check(&self.fail_reads)?;
            self.inner.list(query).await
        }

        async fn create(&self, record: Record) -> Result<String, StoreError> {
            self.check(&self.fail_writes)?;
            self.inner.create(record).await
        }

        async fn update(&self, id: &str, record: Record) -> Result<(), StoreError> {
            self.check(&self.fail_writes)?;
            self.inner.update(id, record).await
        }

        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.check(&self.fail_writes)?;
            self.inner.delete(id).await
        }

        async fn describe_fields(&self) -> Result<FieldDescriptors, StoreError> {
            self.inner.describe_fields().await
        }

        async fn load_directory(&self) -> Result<Directory, StoreError> {
            self.inner.load_directory().await
        }

        async fn save_directory(&self, directory: &Directory) -> Result<(), StoreError> {
            self.check(&self.fail_writes)?;
            self.inner.save_directory(directory).await
        }

        fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
            self.inner.subscribe()
        }
    }

    fn at(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M").expect("timestamp")
    }

    fn day(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
    }

    async fn board_with(store: Arc<FlakyStore>, config: &BoardConfig) -> Board {
        let shared: SharedStore = store;
        Board::open(shared, config)
            .await
            .with_clock(Arc::new(|| at("2024-03-10T12:00")))
    }

    async fn seeded(store: Arc<FlakyStore>) -> (Board, String, String) {
        let mut board = board_with(store, &BoardConfig::default()).await;
        board
            .add_project("Alpha".to_string(), Some("#3366ff".to_string()))
            .await
            .expect("project");
        let member = board
            .add_member("Aiko".to_string(), None, None, Vec::new())
            .await
            .expect("member");

        let mut task = Task::draft("Review", "Alpha");
        task.start = Some(TaskTime::parse("2024-03-10T09:00").unwrap());
        task.assignee_id = Some(member.clone());
        let task_id = board.create_task(task).await.expect("task");
        (board, task_id, member)
    }

    #[tokio::test]
    async fn missing_schema_falls_back_with_a_diagnostic() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let board = Board::open(store, &BoardConfig::default()).await;
        assert!(matches!(
            board.diagnostics(),
            [SchemaDiagnostic::IntrospectionFailed(_)]
        ));
        assert_eq!(board.mapping().code(crate::schema::LogicalField::Status), Some("status"));
    }

    #[tokio::test]
    async fn failed_reads_leave_an_empty_board_and_a_notice() {
        let store = Arc::new(FlakyStore::new());
        let (mut board, _, _) = seeded(store.clone()).await;
        let mut notices = board.subscribe_notices();

        store.fail_reads.store(true, Ordering::SeqCst);
        board.refresh().await;
        assert!(board.tasks().is_empty());
        assert_eq!(board.view().total, 0);
        assert_eq!(notices.recv().await.expect("notice").level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn validation_blocks_writes() {
        let store = Arc::new(FlakyStore::new());
        let (mut board, _, _) = seeded(store.clone()).await;
        let result = board.create_task(Task::draft("No date", "Alpha")).await;
        assert!(matches!(
            result,
            Err(BoardError::Validation(ValidationError::MissingStart))
        ));
        let mut stray = Task::draft("Stray", "Nowhere");
        stray.start = Some(TaskTime::parse("2024-03-11").unwrap());
        assert!(matches!(
            board.create_task(stray).await,
            Err(BoardError::UnknownProject(_))
        ));
        assert_eq!(store.inner.list(&Query::all()).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn created_tasks_reach_the_view() {
        let store = Arc::new(FlakyStore::new());
        let (board, task_id, member) = seeded(store).await;
        let view = board.view();
        assert_eq!((view.visible, view.total), (1, 1));
        assert_eq!(view.events[0].extended_props.task_id, task_id);
        assert_eq!(view.events[0].background_color, "#3366ff");
        assert_eq!(view.summary.today.len(), 1);
        assert_eq!(view.summary.per_assignee[0].member_id, member);
    }

    #[tokio::test]
    async fn failed_moves_are_reverted() {
        let store = Arc::new(FlakyStore::new());
        let (mut board, task_id, _) = seeded(store.clone()).await;
        let original = board.task(&task_id).and_then(|task| task.start);

        board.move_task(&task_id, 1).await.expect("move");
        assert_eq!(
            board.task(&task_id).and_then(|task| task.start).map(|start| start.to_string()),
            Some("2024-03-11T09:00:00".to_string())
        );

        store.fail_writes.store(true, Ordering::SeqCst);
        let mut notices = board.subscribe_notices();
        assert!(board.move_task(&task_id, 3).await.is_err());
        assert_eq!(
            board.task(&task_id).and_then(|task| task.start).map(|start| start.to_string()),
            Some("2024-03-11T09:00:00".to_string())
        );
        assert_ne!(board.task(&task_id).and_then(|task| task.start), original);
        assert_eq!(
            board.view().events[0].start.to_string(),
            "2024-03-11T09:00:00"
        );
        assert_eq!(notices.recv().await.expect("notice").level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn moves_off_the_calendar_are_refused() {
        let store = Arc::new(FlakyStore::new());
        let (mut board, task_id, _) = seeded(store).await;
        let mut notices = board.subscribe_notices();

        for days in [100_000_000, i64::MAX, i64::MIN] {
            assert!(matches!(
                board.move_task(&task_id, days).await,
                Err(BoardError::Validation(ValidationError::DateOutOfRange(_)))
            ));
        }
        assert_eq!(
            board.task(&task_id).and_then(|task| task.start).map(|start| start.to_string()),
            Some("2024-03-10T09:00:00".to_string())
        );
        assert_eq!(notices.recv().await.expect("notice").level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn disabled_features_refuse_their_operations() {
        let store = Arc::new(FlakyStore::new());
        let mut config = BoardConfig::default();
        config.features.drag_drop = false;
        config.features.recurring = false;
        config.features.filters = false;
        let mut board = board_with(store, &config).await;

        assert!(matches!(
            board.move_task("x", 1).await,
            Err(BoardError::FeatureDisabled("drag_drop"))
        ));
        assert!(matches!(board.reconcile().await, Err(BoardError::FeatureDisabled("recurring"))));
        assert!(matches!(
            board.update_filters(FilterChange::ToggleCompleted),
            Err(BoardError::FeatureDisabled("filters"))
        ));
    }

    #[tokio::test]
    async fn filters_drive_the_counter() {
        let store = Arc::new(FlakyStore::new());
        let (mut board, task_id, _) = seeded(store).await;
        board.set_status(&task_id, TaskStatus::Completed).await.expect("status");
        assert_eq!((board.view().visible, board.view().total), (0, 1));

        board.update_filters(FilterChange::ToggleCompleted).expect("toggle");
        assert_eq!(board.view().visible, 1);
        board
            .update_filters(FilterChange::Toggle(FilterValue::Priority(crate::domain::Priority::High)))
            .expect("priority");
        assert_eq!(board.view().visible, 0);

        board.reset_filters();
        assert_eq!(board.filters(), &FilterState::default());
        // Completion still counts towards the member's rate while hidden.
        assert_eq!(board.view().summary.per_assignee[0].completion_rate, 100);
    }

    #[tokio::test]
    async fn confirming_a_candidate_makes_a_single_task() {
        let store = Arc::new(FlakyStore::new());
        let (mut board, _, _) = seeded(store).await;
        let mut offsite = Task::draft("Offsite", "Alpha");
        offsite.task_type = TaskType::Irregular;
        offsite.start = Some(TaskTime::parse("2024-03-12").unwrap());
        offsite.candidate_dates = ["2024-03-12", "2024-03-14", "2024-03-19"]
            .iter()
            .map(|raw| CandidateDate {
                start: TaskTime::parse(raw).unwrap(),
                end: None,
            })
            .collect();
        let id = board.create_task(offsite).await.expect("create");
        assert_eq!(board.view().events.len(), 4);

        assert!(matches!(
            board.confirm_candidate(&id, 9).await,
            Err(BoardError::UnknownCandidate { .. })
        ));
        board.confirm_candidate(&id, 1).await.expect("confirm");
        let task = board.task(&id).expect("task");
        assert_eq!(task.task_type, TaskType::Single);
        assert!(task.candidate_dates.is_empty());
        assert_eq!(task.start.map(|start| start.date()), Some(day("2024-03-14")));
        assert_eq!(board.view().events.len(), 2);
    }

    #[tokio::test]
    async fn deleting_a_project_cascades_and_a_member_unassigns() {
        let store = Arc::new(FlakyStore::new());
        let (mut board, task_id, member) = seeded(store.clone()).await;
        let other = board
            .add_project("Beta".to_string(), None)
            .await
            .expect("beta");
        let mut kept = Task::draft("Plan", other.clone());
        kept.start = Some(TaskTime::parse("2024-03-11").unwrap());
        kept.assignee_id = Some(member.clone());
        let kept_id = board.create_task(kept).await.expect("kept");

        assert_eq!(board.delete_member(&member).await.expect("member"), 2);
        assert!(board.tasks().iter().all(|task| task.assignee_id.is_none()));

        assert_eq!(board.project_deletion_impact("Alpha").expect("impact").len(), 1);
        assert_eq!(board.delete_project("Alpha").await.expect("delete"), 1);
        assert!(board.task(&task_id).is_none());
        assert!(board.task(&kept_id).is_some());
        assert!(board.directory().project_by_name("Alpha").is_none());

        let rows = store.inner.list(&Query::all()).await.expect("list");
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].fields.contains_key("assignee"));
    }

    #[tokio::test]
    async fn generation_adds_occurrences_to_the_board() {
        let store = Arc::new(FlakyStore::new());
        let (mut board, _, member) = seeded(store).await;
        let mut template = Task::draft("Standup", "Alpha");
        template.task_type = TaskType::Daily;
        template.start = Some(TaskTime::parse("2024-03-08").unwrap());
        template.assignee_id = Some(member);
        let template_id = board.create_task(template).await.expect("template");

        let plan = RecurrencePlan::new(day("2024-03-11"), day("2024-03-15"), BTreeSet::new(), None)
            .expect("plan");
        let report = board.generate_recurring(&template_id, &plan).await.expect("generate");
        assert_eq!(report.created.len(), 5);
        assert_eq!(board.tasks().len(), 7);
        assert_eq!(board.view().summary.upcoming.len(), 5);
        let mut notices = board.subscribe_notices();
        let outcome = board.reconcile().await.expect("reconcile");
        assert!(outcome.removed.is_empty() && outcome.failed.is_empty());
        assert_eq!(notices.try_recv().expect("notice").level, NoticeLevel::Info);
    }

    #[tokio::test]
    async fn outside_writes_show_up_after_the_store_event() {
        let store = Arc::new(FlakyStore::new());
        let (mut board, _, _) = seeded(store.clone()).await;
        let mut events = board.subscribe_store().expect("live updates");

        let codec = TaskCodec::new(board.mapping().clone());
        let mut task = Task::draft("From elsewhere", board.tasks()[0].project_id.clone());
        task.start = Some(TaskTime::parse("2024-03-10").unwrap());
        store.inner.create(codec.encode(&task).expect("encode")).await.expect("create");

        let event = events.recv().await.expect("event");
        board.handle_store_event(event).await;
        assert_eq!(board.tasks().len(), 2);
    }
}
