use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde::Serialize;

use crate::domain::{Member, Task, TaskStatus, TaskTime};
use crate::error::ValidationError;

const UPCOMING_DAYS: i64 = 7;

/// One dated appearance of a task: the task itself, or one candidate date of an irregular task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occurrence {
    pub task_id: String,
    pub candidate_index: Option<usize>,
    pub title: String,
    pub date: NaiveDate,
    pub start: TaskTime,
    pub status: TaskStatus,
    pub assignee_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub today: Vec<Occurrence>,
    pub overdue: Vec<Occurrence>,
    pub upcoming: Vec<Occurrence>,
    pub per_assignee: Vec<AssigneeSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssigneeSummary {
    pub member_id: String,
    pub member_name: String,
    pub today_total: usize,
    pub today_completed: usize,
    /// Percentage, rounded; 0 when the member has nothing today.
    pub completion_rate: u8,
}

pub fn occurrences(tasks: &[Task]) -> Vec<Occurrence> {
    tasks
        .iter()
        .flat_map(|task| {
            task.slots()
                .into_iter()
                .map(move |(candidate_index, start, _)| Occurrence {
                    task_id: task.id.clone(),
                    candidate_index,
                    title: task.title.clone(),
                    date: start.date(),
                    start,
                    status: task.status,
                    assignee_id: task.assignee_id.clone(),
                })
        })
        .collect()
}

pub fn summarize(tasks: &[Task], reference_now: NaiveDateTime, members: &[Member]) -> Summary {
    let today = reference_now.date();
    let horizon = today
        .checked_add_signed(Duration::days(UPCOMING_DAYS))
        .unwrap_or(NaiveDate::MAX);
    let mut summary = Summary::default();
    let mut todays_all = Vec::new();

    for occurrence in occurrences(tasks) {
        if occurrence.date == today {
            todays_all.push(occurrence.clone());
        }
        if occurrence.status == TaskStatus::Completed {
            continue;
        }
        if occurrence.date == today {
            summary.today.push(occurrence);
        } else if occurrence.date < today {
            summary.overdue.push(occurrence);
        } else if occurrence.date <= horizon {
            summary.upcoming.push(occurrence);
        }
    }

    summary.per_assignee = members
        .iter()
        .map(|member| {
            let mine = todays_all
                .iter()
                .filter(|occurrence| occurrence.assignee_id.as_deref() == Some(member.id.as_str()));
            let (total, completed) = mine.fold((0, 0), |(total, completed), occurrence| {
                let done = usize::from(occurrence.status == TaskStatus::Completed);
                (total + 1, completed + done)
            });
            AssigneeSummary {
                member_id: member.id.clone(),
                member_name: member.name.clone(),
                today_total: total,
                today_completed: completed,
                completion_rate: completion_rate(completed, total),
            }
        })
        .collect();

    summary
}

pub fn completion_rate(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).round() as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PeriodKind {
    Week,
    Month,
}

/// Inclusive date range of the week (Monday first) or month `offset` periods from `reference`.
pub fn period_range(
    kind: PeriodKind,
    reference: NaiveDate,
    offset: i32,
) -> Result<(NaiveDate, NaiveDate), ValidationError> {
    let out_of_range = || ValidationError::DateOutOfRange(format!("{kind:?} {offset:+} from {reference}"));
    let range = match kind {
        PeriodKind::Week => {
            let since_monday = Duration::days(reference.weekday().num_days_from_monday().into());
            Duration::try_weeks(offset.into())
                .and_then(|delta| reference.checked_sub_signed(since_monday)?.checked_add_signed(delta))
                .and_then(|start| Some((start, start.checked_add_signed(Duration::days(6))?)))
        }
        PeriodKind::Month => {
            let first = reference.with_day(1).unwrap_or(reference);
            let months = Months::new(offset.unsigned_abs());
            let start = if offset >= 0 {
                first.checked_add_months(months)
            } else {
                first.checked_sub_months(months)
            };
            start.and_then(|start| {
                let next = start.checked_add_months(Months::new(1))?;
                Some((start, next.pred_opt()?))
            })
        }
    };
    range.ok_or_else(out_of_range)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodMemberSummary {
    pub member_id: String,
    pub member_name: String,
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub not_started: usize,
    pub completion_rate: u8,
}

pub fn summarize_period(
    tasks: &[Task],
    members: &[Member],
    range: (NaiveDate, NaiveDate),
) -> Vec<PeriodMemberSummary> {
    let (start, end) = range;
    let in_period = occurrences(tasks)
        .into_iter()
        .filter(|occurrence| occurrence.date >= start && occurrence.date <= end)
        .collect::<Vec<_>>();

    members
        .iter()
        .map(|member| {
            let mine = in_period
                .iter()
                .filter(|occurrence| occurrence.assignee_id.as_deref() == Some(member.id.as_str()))
                .collect::<Vec<_>>();
            let count = |status: TaskStatus| mine.iter().filter(|occurrence| occurrence.status == status).count();
            let completed = count(TaskStatus::Completed);
            PeriodMemberSummary {
                member_id: member.id.clone(),
                member_name: member.name.clone(),
                total: mine.len(),
                completed,
                in_progress: count(TaskStatus::InProgress),
                not_started: count(TaskStatus::NotStarted),
                completion_rate: completion_rate(completed, mine.len()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::domain::{CandidateDate, TaskType};

    fn at(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M").expect("timestamp")
    }

    fn day(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
    }

    fn task(id: &str, start: Option<&str>, status: TaskStatus) -> Task {
        let mut task = Task::draft(id, "p");
        task.id = id.to_string();
        task.start = start.map(|raw| TaskTime::parse(raw).expect("time"));
        task.status = status;
        task
    }

    fn member(id: &str) -> Member {
        Member {
            id: id.to_string(),
            name: id.to_uppercase(),
            color: "#ff6b6b".to_string(),
            role: None,
            team_ids: Vec::new(),
        }
    }

    fn ids(occurrences: &[Occurrence]) -> Vec<&str> {
        occurrences.iter().map(|occurrence| occurrence.task_id.as_str()).collect()
    }

    #[test]
    fn same_day_task_is_due_today_not_overdue() {
        let tasks = [task("t", Some("2024-03-10T09:00"), TaskStatus::InProgress)];
        let summary = summarize(&tasks, at("2024-03-10T15:00"), &[]);
        assert_eq!(ids(&summary.today), vec!["t"]);
        assert!(summary.overdue.is_empty());
    }

    #[test]
    fn earlier_task_is_overdue_only() {
        let tasks = [task("t", Some("2024-03-08T09:00"), TaskStatus::NotStarted)];
        let summary = summarize(&tasks, at("2024-03-10T09:00"), &[]);
        assert_eq!(ids(&summary.overdue), vec!["t"]);
        assert!(summary.today.is_empty());
        assert!(summary.upcoming.is_empty());
    }

    #[test]
    fn upcoming_spans_seven_days_and_skips_completed() {
        let tasks = [
            task("tomorrow", Some("2024-03-11"), TaskStatus::NotStarted),
            task("edge", Some("2024-03-17T23:00"), TaskStatus::NotStarted),
            task("beyond", Some("2024-03-18"), TaskStatus::NotStarted),
            task("done", Some("2024-03-12"), TaskStatus::Completed),
            task("undated", None, TaskStatus::NotStarted),
        ];
        let summary = summarize(&tasks, at("2024-03-10T09:00"), &[]);
        assert_eq!(ids(&summary.upcoming), vec!["tomorrow", "edge"]);
    }

    #[test]
    fn undated_tasks_appear_in_no_bucket() {
        let mut irregular = task("irregular", None, TaskStatus::NotStarted);
        irregular.task_type = TaskType::Irregular;
        irregular.candidate_dates = vec![CandidateDate {
            start: TaskTime::parse("2024-03-10").unwrap(),
            end: None,
        }];
        let mut assigned = task("plain", None, TaskStatus::NotStarted);
        assigned.assignee_id = Some("m1".to_string());

        let summary = summarize(&[irregular, assigned], at("2024-03-10T09:00"), &[member("m1")]);
        assert!(summary.today.is_empty() && summary.overdue.is_empty() && summary.upcoming.is_empty());
        assert_eq!(summary.per_assignee[0].today_total, 0);
    }

    #[test]
    fn candidate_dates_count_individually() {
        let mut irregular = task("offsite", Some("2024-03-09"), TaskStatus::NotStarted);
        irregular.task_type = TaskType::Irregular;
        irregular.candidate_dates = ["2024-03-09", "2024-03-10", "2024-03-12"]
            .iter()
            .map(|raw| CandidateDate {
                start: TaskTime::parse(raw).unwrap(),
                end: None,
            })
            .collect();

        let summary = summarize(&[irregular], at("2024-03-10T09:00"), &[]);
        assert_eq!(summary.overdue.len(), 1);
        assert_eq!(summary.today.len(), 1);
        assert_eq!(summary.upcoming.len(), 1);
        assert_eq!(summary.today[0].candidate_index, Some(1));
    }

    #[test]
    fn completion_rate_per_assignee() {
        let mut tasks = vec![
            task("a", Some("2024-03-10T09:00"), TaskStatus::Completed),
            task("b", Some("2024-03-10T10:00"), TaskStatus::InProgress),
            task("c", Some("2024-03-10T11:00"), TaskStatus::NotStarted),
        ];
        for task in &mut tasks {
            task.assignee_id = Some("m1".to_string());
        }

        let summary = summarize(&tasks, at("2024-03-10T12:00"), &[member("m1"), member("m2")]);
        let first = &summary.per_assignee[0];
        assert_eq!((first.today_total, first.today_completed, first.completion_rate), (3, 1, 33));
        let idle = &summary.per_assignee[1];
        assert_eq!((idle.today_total, idle.completion_rate), (0, 0));
        assert_eq!(summary.today.len(), 2);
    }

    #[test]
    fn period_ranges() {
        // 2024-03-13 is a Wednesday
        assert_eq!(
            period_range(PeriodKind::Week, day("2024-03-13"), 0),
            Ok((day("2024-03-11"), day("2024-03-17")))
        );
        assert_eq!(
            period_range(PeriodKind::Week, day("2024-03-13"), -1),
            Ok((day("2024-03-04"), day("2024-03-10")))
        );
        assert_eq!(
            period_range(PeriodKind::Month, day("2024-03-13"), -1),
            Ok((day("2024-02-01"), day("2024-02-29")))
        );
        assert_eq!(
            period_range(PeriodKind::Month, day("2024-12-31"), 1),
            Ok((day("2025-01-01"), day("2025-01-31")))
        );
    }

    #[test]
    fn far_away_periods_are_errors() {
        for kind in [PeriodKind::Week, PeriodKind::Month] {
            for offset in [i32::MAX, i32::MIN, 50_000_000] {
                assert!(matches!(
                    period_range(kind, day("2024-03-13"), offset),
                    Err(ValidationError::DateOutOfRange(_))
                ));
            }
        }
    }

    #[test]
    fn period_summary_counts_statuses() {
        let mut tasks = vec![
            task("a", Some("2024-03-11"), TaskStatus::Completed),
            task("b", Some("2024-03-15"), TaskStatus::InProgress),
            task("c", Some("2024-03-20"), TaskStatus::NotStarted),
        ];
        for task in &mut tasks {
            task.assignee_id = Some("m1".to_string());
        }
        let range = period_range(PeriodKind::Week, day("2024-03-13"), 0).expect("range");
        let rows = summarize_period(&tasks, &[member("m1")], range);
        assert_eq!(rows[0].total, 2);
        assert_eq!((rows[0].completed, rows[0].in_progress, rows[0].not_started), (1, 1, 0));
        assert_eq!(rows[0].completion_rate, 50);
    }
}
