//! Turns tasks into the declarative event list the calendar widget renders.

use serde::Serialize;

use crate::domain::{Directory, Priority, Task, TaskStatus, TaskTime, TaskType};
use crate::filters::FilterState;

/// Palette for projects without a stored color. The order is part of the
/// contract: a project name always maps to the same entry.
pub const PROJECT_PALETTE: [&str; 7] = [
    "#3498db", "#e74c3c", "#2ecc71", "#f39c12", "#9b59b6", "#1abc9c", "#e67e22",
];

pub const UNASSIGNED_BORDER: &str = "#333333";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayOptions {
    pub show_icons: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self { show_icons: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: TaskTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<TaskTime>,
    pub all_day: bool,
    pub background_color: String,
    pub border_color: String,
    pub text_color: &'static str,
    pub class_names: Vec<String>,
    pub extended_props: EventProps,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventProps {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_index: Option<usize>,
    pub project_id: String,
    pub project_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub task_type: TaskType,
}

/// Hashes a project name into [`PROJECT_PALETTE`] by summing its UTF-16 code units.
pub fn palette_color(project_name: &str) -> &'static str {
    let hash: u64 = project_name.encode_utf16().map(u64::from).sum();
    PROJECT_PALETTE[(hash % PROJECT_PALETTE.len() as u64) as usize]
}

/// Stored task color, then stored project color, then the palette.
pub fn project_color(task: &Task, directory: &Directory) -> String {
    if let Some(color) = &task.project_color {
        return color.clone();
    }
    let project = directory.find_project(&task.project_id);
    if let Some(color) = project.and_then(|project| project.color.clone()) {
        return color;
    }
    palette_color(directory.project_name_for(task)).to_string()
}

/// Black or white text, whichever reads better on `background`.
pub fn contrast_color(background: &str) -> &'static str {
    let channel = |range: std::ops::Range<usize>| {
        background
            .get(range)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .map(f64::from)
    };
    match (channel(1..3), channel(3..5), channel(5..7)) {
        (Some(r), Some(g), Some(b)) if (0.299 * r + 0.587 * g + 0.114 * b) / 255.0 > 0.5 => "#000000",
        _ => "#ffffff",
    }
}

pub fn icon_prefix(task: &Task) -> String {
    let mut icon = if task.task_type == TaskType::Daily {
        "🔄 ".to_string()
    } else {
        "📋 ".to_string()
    };
    if task.priority == Priority::High {
        icon.push('⚡');
    }
    icon
}

pub fn class_names(task: &Task, tentative: bool) -> Vec<String> {
    let mut classes = vec![
        format!("status-{}", task.status.as_str()),
        format!("priority-{}", task.priority.as_str()),
        format!("task-type-{}", task.task_type.as_str()),
    ];
    if tentative {
        classes.push("tentative".to_string());
    }
    classes
}

pub fn project(
    tasks: &[Task],
    filters: &FilterState,
    directory: &Directory,
    options: &DisplayOptions,
) -> Vec<CalendarEvent> {
    tasks
        .iter()
        .filter(|task| task.start.is_some() && filters.matches(task))
        .flat_map(|task| task_events(task, directory, options))
        .collect()
}

fn task_events(task: &Task, directory: &Directory, options: &DisplayOptions) -> Vec<CalendarEvent> {
    let background = project_color(task, directory);
    let text_color = contrast_color(&background);
    let assignee = task
        .assignee_id
        .as_deref()
        .and_then(|id| directory.member(id));
    let border = assignee
        .map(|member| member.color.clone())
        .unwrap_or_else(|| UNASSIGNED_BORDER.to_string());
    let title = if options.show_icons {
        format!("{}{}", icon_prefix(task), task.title)
    } else {
        task.title.clone()
    };

    task.slots()
        .into_iter()
        .map(|(candidate_index, start, end)| {
            let end = end.filter(|end| *end > start);
            let id = match candidate_index {
                Some(index) => format!("{}#candidate-{index}", task.id),
                None => task.id.clone(),
            };
            CalendarEvent {
                id,
                title: title.clone(),
                start,
                end,
                all_day: end.is_none() || start.is_date_only(),
                background_color: background.clone(),
                border_color: border.clone(),
                text_color,
                class_names: class_names(task, candidate_index.is_some()),
                extended_props: EventProps {
                    task_id: task.id.clone(),
                    candidate_index,
                    project_id: task.project_id.clone(),
                    project_name: directory.project_name_for(task).to_string(),
                    assignee_id: task.assignee_id.clone(),
                    assignee_name: assignee.map(|member| member.name.clone()),
                    description: task.description.clone(),
                    status: task.status,
                    priority: task.priority,
                    task_type: task.task_type,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CandidateDate;

    fn timed(title: &str, project: &str, start: Option<&str>) -> Task {
        let mut task = Task::draft(title, project);
        task.id = format!("id-{title}");
        task.start = start.map(|raw| TaskTime::parse(raw).expect("time"));
        task
    }

    #[test]
    fn palette_color_depends_only_on_the_name() {
        for name in ["Alpha", "案件A", ""] {
            assert_eq!(palette_color(name), palette_color(name));
        }
        // 'A' is 65, and 65 % 7 == 2
        assert_eq!(palette_color("A"), "#2ecc71");
        assert_eq!(palette_color(""), "#3498db");
    }

    #[test]
    fn stored_colors_win_over_the_palette() {
        let mut directory = Directory::default();
        let id = directory
            .add_project("Alpha".to_string(), Some("#010203".to_string()))
            .expect("project");
        let task = timed("a", &id, Some("2024-03-10"));
        assert_eq!(project_color(&task, &directory), "#010203");

        let mut colored = task.clone();
        colored.project_color = Some("#ffffff".to_string());
        assert_eq!(project_color(&colored, &directory), "#ffffff");

        let unknown = timed("b", "Beta", Some("2024-03-10"));
        assert_eq!(project_color(&unknown, &directory), palette_color("Beta"));
    }

    #[test]
    fn contrast_follows_luminance() {
        assert_eq!(contrast_color("#ffffff"), "#000000");
        assert_eq!(contrast_color("#e74c3c"), "#ffffff");
        assert_eq!(contrast_color("bogus"), "#ffffff");
    }

    #[test]
    fn tasks_without_start_are_never_projected() {
        let tasks = vec![
            timed("kept", "p", Some("2024-03-10T09:00")),
            timed("dropped", "p", None),
        ];
        let events = project(
            &tasks,
            &FilterState::default(),
            &Directory::default(),
            &DisplayOptions { show_icons: false },
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "kept");
        assert!(events[0].all_day);
    }

    #[test]
    fn ranged_tasks_carry_their_end() {
        let mut task = timed("meeting", "p", Some("2024-03-10T09:00"));
        task.end = Some(TaskTime::parse("2024-03-10T10:30").unwrap());
        let mut backwards = timed("odd", "p", Some("2024-03-10T09:00"));
        backwards.end = Some(TaskTime::parse("2024-03-10T09:00").unwrap());

        let events = project(
            &[task, backwards],
            &FilterState::default(),
            &Directory::default(),
            &DisplayOptions::default(),
        );
        assert!(!events[0].all_day);
        assert!(events[0].end.is_some());
        assert_eq!(events[1].end, None);
        assert!(events[1].all_day);
    }

    #[test]
    fn irregular_tasks_project_one_event_per_candidate() {
        let mut task = timed("offsite", "p", Some("2024-03-12"));
        task.task_type = TaskType::Irregular;
        task.candidate_dates = ["2024-03-12", "2024-03-14T10:00", "2024-03-19"]
            .iter()
            .map(|raw| CandidateDate {
                start: TaskTime::parse(raw).unwrap(),
                end: None,
            })
            .collect();

        let events = project(
            &[task],
            &FilterState::default(),
            &Directory::default(),
            &DisplayOptions::default(),
        );
        assert_eq!(events.len(), 3);
        for (index, event) in events.iter().enumerate() {
            assert_eq!(event.extended_props.task_id, "id-offsite");
            assert_eq!(event.extended_props.candidate_index, Some(index));
            assert!(event.class_names.contains(&"tentative".to_string()));
        }
        assert_ne!(events[0].id, events[1].id);
    }

    #[test]
    fn styling_classes_and_icons() {
        let mut task = timed("standup", "p", Some("2024-03-10"));
        task.task_type = TaskType::Daily;
        task.priority = Priority::High;
        let events = project(
            &[task],
            &FilterState::default(),
            &Directory::default(),
            &DisplayOptions::default(),
        );
        assert_eq!(events[0].title, "🔄 ⚡standup");
        assert_eq!(
            events[0].class_names,
            vec!["status-not_started", "priority-high", "task-type-daily"]
        );

        let json = serde_json::to_value(&events[0]).expect("json");
        assert_eq!(json["allDay"], serde_json::json!(true));
        assert_eq!(json["extendedProps"]["taskId"], serde_json::json!("id-standup"));
    }
}
