use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{Priority, Task, TaskStatus, TaskType};

/// Active filters, one set per dimension.
///
/// An empty set places no restriction on its dimension. A task is visible when
/// it passes every dimension, and it passes a non-empty dimension when the set
/// holds the task's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    pub projects: BTreeSet<String>,
    pub statuses: BTreeSet<TaskStatus>,
    pub priorities: BTreeSet<Priority>,
    pub assignees: BTreeSet<String>,
    pub types: BTreeSet<TaskType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Project(String),
    Status(TaskStatus),
    Priority(Priority),
    Assignee(String),
    Type(TaskType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDimension {
    Projects,
    Statuses,
    Priorities,
    Assignees,
    Types,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChange {
    Toggle(FilterValue),
    Clear(FilterDimension),
    ToggleCompleted,
    Reset,
}

impl Default for FilterState {
    /// Everything visible except completed tasks.
    fn default() -> Self {
        Self {
            projects: BTreeSet::new(),
            statuses: [TaskStatus::NotStarted, TaskStatus::InProgress].into_iter().collect(),
            priorities: BTreeSet::new(),
            assignees: BTreeSet::new(),
            types: BTreeSet::new(),
        }
    }
}

impl FilterState {
    /// No restriction on any dimension, completed tasks included.
    pub fn unrestricted() -> Self {
        Self {
            statuses: BTreeSet::new(),
            ..Self::default()
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn apply_change(&mut self, change: FilterChange) {
        match change {
            FilterChange::Toggle(value) => self.toggle(value),
            FilterChange::Clear(dimension) => self.clear(dimension),
            FilterChange::ToggleCompleted => self.toggle_completed(),
            FilterChange::Reset => self.reset(),
        }
    }

    pub fn toggle(&mut self, value: FilterValue) {
        match value {
            FilterValue::Project(project) => toggle_in(&mut self.projects, project),
            FilterValue::Status(status) => toggle_in(&mut self.statuses, status),
            FilterValue::Priority(priority) => toggle_in(&mut self.priorities, priority),
            FilterValue::Assignee(assignee) => toggle_in(&mut self.assignees, assignee),
            FilterValue::Type(kind) => toggle_in(&mut self.types, kind),
        }
    }

    pub fn clear(&mut self, dimension: FilterDimension) {
        match dimension {
            FilterDimension::Projects => self.projects.clear(),
            FilterDimension::Statuses => self.statuses.clear(),
            FilterDimension::Priorities => self.priorities.clear(),
            FilterDimension::Assignees => self.assignees.clear(),
            FilterDimension::Types => self.types.clear(),
        }
    }

    /// Shows or hides completed tasks without touching any other choice.
    ///
    /// An empty status dimension already shows everything, so hiding completed
    /// tasks from it selects the two open statuses instead.
    pub fn toggle_completed(&mut self) {
        if self.statuses.is_empty() {
            self.statuses = [TaskStatus::NotStarted, TaskStatus::InProgress].into_iter().collect();
        } else {
            toggle_in(&mut self.statuses, TaskStatus::Completed);
        }
    }

    pub fn shows_completed(&self) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&TaskStatus::Completed)
    }

    /// The project dimension matches either the project id or its display name.
    pub fn matches(&self, task: &Task) -> bool {
        let project_ok = self.projects.is_empty()
            || self.projects.contains(&task.project_id)
            || task
                .project_name
                .as_ref()
                .is_some_and(|name| self.projects.contains(name));
        let assignee_ok = self.assignees.is_empty()
            || task
                .assignee_id
                .as_ref()
                .is_some_and(|assignee| self.assignees.contains(assignee));

        project_ok
            && assignee_ok
            && passes(&self.statuses, &task.status)
            && passes(&self.priorities, &task.priority)
            && passes(&self.types, &task.task_type)
    }
}

/// Distinct values present in a task list, for building filter choices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub projects: BTreeSet<String>,
    pub assignees: BTreeSet<String>,
}

impl FilterOptions {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut options = Self::default();
        for task in tasks {
            if !task.project_id.is_empty() {
                options.projects.insert(task.project_id.clone());
            }
            if let Some(assignee) = &task.assignee_id {
                options.assignees.insert(assignee.clone());
            }
        }
        options
    }
}

fn passes<T: Ord>(set: &BTreeSet<T>, value: &T) -> bool {
    set.is_empty() || set.contains(value)
}

fn toggle_in<T: Ord>(set: &mut BTreeSet<T>, value: T) {
    if !set.remove(&value) {
        set.insert(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(project: &str, status: TaskStatus, priority: Priority) -> Task {
        let mut task = Task::draft("t", project);
        task.status = status;
        task.priority = priority;
        task
    }

    #[test]
    fn default_hides_completed_only() {
        let filters = FilterState::default();
        assert!(filters.matches(&task("a", TaskStatus::NotStarted, Priority::Low)));
        assert!(filters.matches(&task("b", TaskStatus::InProgress, Priority::High)));
        assert!(!filters.matches(&task("a", TaskStatus::Completed, Priority::Low)));
        assert!(!filters.shows_completed());
    }

    #[test]
    fn conjunctive_across_disjunctive_within() {
        let mut filters = FilterState::default();
        filters.toggle(FilterValue::Project("a".to_string()));
        filters.toggle(FilterValue::Project("b".to_string()));
        filters.toggle(FilterValue::Priority(Priority::High));

        assert!(filters.matches(&task("a", TaskStatus::NotStarted, Priority::High)));
        assert!(filters.matches(&task("b", TaskStatus::InProgress, Priority::High)));
        assert!(!filters.matches(&task("c", TaskStatus::InProgress, Priority::High)));
        assert!(!filters.matches(&task("a", TaskStatus::InProgress, Priority::Low)));
    }

    #[test]
    fn assignee_filter_excludes_unassigned_tasks() {
        let mut filters = FilterState::default();
        filters.toggle(FilterValue::Assignee("m1".to_string()));
        let mut assigned = task("a", TaskStatus::NotStarted, Priority::Low);
        assigned.assignee_id = Some("m1".to_string());
        assert!(filters.matches(&assigned));
        assert!(!filters.matches(&task("a", TaskStatus::NotStarted, Priority::Low)));
    }

    #[test]
    fn reset_restores_the_default_not_an_empty_state() {
        let mut filters = FilterState::default();
        filters.apply_change(FilterChange::ToggleCompleted);
        filters.apply_change(FilterChange::Toggle(FilterValue::Type(TaskType::Daily)));
        filters.apply_change(FilterChange::Toggle(FilterValue::Assignee("m1".to_string())));
        filters.apply_change(FilterChange::Clear(FilterDimension::Statuses));
        filters.apply_change(FilterChange::Reset);

        assert_eq!(filters, FilterState::default());
        assert!(!filters.statuses.contains(&TaskStatus::Completed));
        assert!(filters.projects.is_empty() && filters.priorities.is_empty());
        assert!(filters.assignees.is_empty() && filters.types.is_empty());
    }

    #[test]
    fn toggling_completed_leaves_other_statuses() {
        let mut filters = FilterState::default();
        filters.toggle_completed();
        assert_eq!(filters.statuses.len(), 3);
        filters.toggle_completed();
        assert_eq!(filters, FilterState::default());

        filters.clear(FilterDimension::Statuses);
        filters.toggle_completed();
        assert!(!filters.shows_completed());
    }
}
