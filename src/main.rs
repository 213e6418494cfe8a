mod board;
mod config;
mod domain;
mod error;
mod filters;
mod preferences;
mod projection;
mod record;
mod recurring;
mod schema;
mod storage;
mod store;
mod summary;
mod ui;
mod workspaces;

use std::collections::BTreeSet;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use crate::board::Board;
use crate::config::{BoardConfig, parse_time_of_day};
use crate::domain::{CandidateDate, Priority, Task, TaskStatus, TaskTime, TaskType};
use crate::error::BoardError;
use crate::filters::{FilterChange, FilterDimension, FilterValue};
use crate::preferences::{BackgroundSide, Preferences};
use crate::recurring::RecurrencePlan;
use crate::schema::LogicalField;
use crate::storage::FileStore;
use crate::store::SharedStore;
use crate::summary::{PeriodKind, period_range, summarize_period};
use crate::ui::{Session, run_dashboard};
use crate::workspaces::{config_path, preferences_path, recent_workspaces, remember_workspace, resolve_workspace_path};

#[derive(Debug, Parser)]
#[command(name = "taskboard", about = "Team task calendar over a record store")]
struct Cli {
	#[arg(long)]
	workspace: Option<PathBuf>,
	/// Reference time for summaries, e.g. 2024-03-10T12:00. Defaults to now.
	#[arg(long)]
	now: Option<String>,
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	Init,
	Dashboard,
	/// Shows how logical fields map onto the store's field codes.
	Schema,
	ListTasks,
	AddProject {
		#[arg(long)]
		name: String,
		#[arg(long)]
		color: Option<String>,
	},
	AddMember {
		#[arg(long)]
		name: String,
		#[arg(long)]
		role: Option<String>,
		#[arg(long)]
		color: Option<String>,
		#[arg(long = "team")]
		teams: Vec<String>,
	},
	AddTeam {
		#[arg(long)]
		name: String,
	},
	DeleteTeam {
		#[arg(long)]
		team: String,
	},
	AddTask {
		#[arg(long)]
		title: String,
		/// Project id or name.
		#[arg(long)]
		project: String,
		#[arg(long)]
		start: Option<String>,
		#[arg(long)]
		end: Option<String>,
		#[arg(long = "type", value_enum, default_value_t = TaskType::Single)]
		task_type: TaskType,
		#[arg(long, value_enum, default_value_t = Priority::Medium)]
		priority: Priority,
		#[arg(long)]
		assignee: Option<String>,
		#[arg(long)]
		description: Option<String>,
		/// Candidate date of an irregular task; repeatable.
		#[arg(long = "candidate")]
		candidates: Vec<String>,
	},
	EditTask {
		#[arg(long)]
		task: String,
		#[arg(long)]
		title: Option<String>,
		#[arg(long)]
		start: Option<String>,
		#[arg(long)]
		end: Option<String>,
		#[arg(long, value_enum)]
		priority: Option<Priority>,
		#[arg(long)]
		description: Option<String>,
	},
	SetStatus {
		#[arg(long)]
		task: String,
		#[arg(long, value_enum)]
		status: TaskStatus,
	},
	/// Shifts a task by whole days, or sets new dates with --start/--end.
	MoveTask {
		#[arg(long)]
		task: String,
		#[arg(long, allow_hyphen_values = true, conflicts_with = "start")]
		days: Option<i64>,
		#[arg(long)]
		start: Option<String>,
		#[arg(long, requires = "start")]
		end: Option<String>,
	},
	/// Assigns a task to a member; without --member the task is unassigned.
	Assign {
		#[arg(long)]
		task: String,
		#[arg(long)]
		member: Option<String>,
	},
	ConfirmCandidate {
		#[arg(long)]
		task: String,
		/// Zero-based candidate position.
		#[arg(long)]
		index: usize,
	},
	DeleteTask {
		#[arg(long)]
		task: String,
	},
	/// Deletes a project and all of its tasks.
	DeleteProject {
		#[arg(long)]
		project: String,
		#[arg(long)]
		yes: bool,
	},
	DeleteMember {
		#[arg(long)]
		member: String,
	},
	/// Instantiates a daily task on every day of a range.
	Generate {
		#[arg(long)]
		template: String,
		#[arg(long)]
		from: String,
		#[arg(long)]
		to: String,
		/// Weekday to leave out, 0 = Sunday .. 6 = Saturday; repeatable.
		#[arg(long = "skip-weekday")]
		skip_weekdays: Vec<u8>,
		#[arg(long)]
		skip_weekends: bool,
		/// HH:MM for the generated tasks.
		#[arg(long)]
		time: Option<String>,
	},
	Reconcile,
	/// Prints calendar events as JSON.
	Events {
		#[arg(long = "project")]
		projects: Vec<String>,
		#[arg(long = "status", value_enum)]
		statuses: Vec<TaskStatus>,
		#[arg(long = "priority", value_enum)]
		priorities: Vec<Priority>,
		#[arg(long = "assignee")]
		assignees: Vec<String>,
		#[arg(long = "type", value_enum)]
		types: Vec<TaskType>,
		#[arg(long)]
		include_completed: bool,
		/// Print the available filter values instead of events.
		#[arg(long)]
		options: bool,
	},
	Summary {
		#[arg(long)]
		json: bool,
	},
	Period {
		#[arg(long, value_enum, default_value_t = PeriodKind::Week)]
		kind: PeriodKind,
		/// 0 is the current period, -1 the previous one.
		#[arg(long, default_value_t = 0, allow_hyphen_values = true)]
		offset: i32,
	},
	/// Shows or sets the memo for a day.
	Memo {
		#[arg(long)]
		day: Option<String>,
		#[arg(long)]
		text: Option<String>,
	},
	Background {
		#[arg(long, value_enum)]
		side: Option<BackgroundSide>,
		/// Image path or URL; omit to clear the side.
		#[arg(long, requires = "side")]
		image: Option<String>,
		#[arg(long)]
		opacity: Option<u8>,
	},
	Workspaces {
		#[arg(long, default_value_t = 20)]
		limit: usize,
	},
}

fn main() {
	if let Err(err) = run() {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}

fn run() -> Result<(), Box<dyn Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_env("TASKBOARD_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();

	if let Some(Command::Workspaces { limit }) = &cli.command {
		print_recent_workspaces(*limit)?;
		return Ok(());
	}

	let config = BoardConfig::load(&config_path())?;
	let workspace_path = resolve_workspace_path(cli.workspace)?;
	let runtime = Runtime::new()?;
	let store = FileStore::open(&workspace_path, config.unique_key())?;
	if let Err(err) = remember_workspace(&workspace_path) {
		tracing::warn!("failed to store recent workspace: {err}");
	}

	let command = cli.command.unwrap_or(Command::Dashboard);
	if let Command::Init = command {
		runtime.block_on(store.persist())?;
		println!("initialized workspace at {}", store.path().display());
		return Ok(());
	}

	let shared: SharedStore = Arc::new(store);
	let mut board = runtime.block_on(Board::open(shared, &config));
	if let Some(raw) = cli.now.as_deref() {
		let now = parse_instant(raw)?;
		board = board.with_clock(Arc::new(move || now));
	}
	for diagnostic in board.diagnostics() {
		tracing::warn!("{diagnostic}");
	}

	let prefs_path = preferences_path();
	let mut preferences = Preferences::load(&prefs_path)?;

	match command {
		Command::Init | Command::Workspaces { .. } => {}
		Command::Dashboard => {
			run_dashboard(Session {
				runtime: &runtime,
				board: &mut board,
				preferences: &mut preferences,
				preferences_path: &prefs_path,
				default_time: config.default_time()?,
			})?;
		}
		Command::Schema => print_schema(&board),
		Command::ListTasks => print_tasks(&board),
		Command::AddProject { name, color } => {
			let id = runtime.block_on(board.add_project(name, color))?;
			println!("created project {id}");
		}
		Command::AddMember {
			name,
			role,
			color,
			teams,
		} => {
			let id = runtime.block_on(board.add_member(name, role, color, teams))?;
			println!("created member {id}");
		}
		Command::AddTeam { name } => {
			let id = runtime.block_on(board.add_team(name))?;
			println!("created team {id}");
		}
		Command::DeleteTeam { team } => {
			runtime.block_on(board.delete_team(&team))?;
			println!("deleted team {team}");
		}
		Command::AddTask {
			title,
			project,
			start,
			end,
			task_type,
			priority,
			assignee,
			description,
			candidates,
		} => {
			let mut task = Task::draft(title, project);
			task.start = start.as_deref().map(TaskTime::parse).transpose()?;
			task.end = end.as_deref().map(TaskTime::parse).transpose()?;
			task.task_type = task_type;
			task.priority = priority;
			task.assignee_id = assignee;
			task.description = description;
			for raw in &candidates {
				task.candidate_dates.push(CandidateDate {
					start: TaskTime::parse(raw)?,
					end: None,
				});
			}
			let id = runtime.block_on(board.create_task(task))?;
			println!("created task {id}");
		}
		Command::EditTask {
			task,
			title,
			start,
			end,
			priority,
			description,
		} => {
			let mut edited = board
				.task(&task)
				.cloned()
				.ok_or_else(|| BoardError::UnknownTask(task.clone()))?;
			if let Some(title) = title {
				edited.title = title;
			}
			if let Some(start) = start {
				edited.start = Some(TaskTime::parse(&start)?);
			}
			if let Some(end) = end {
				edited.end = Some(TaskTime::parse(&end)?);
			}
			if let Some(priority) = priority {
				edited.priority = priority;
			}
			if description.is_some() {
				edited.description = description;
			}
			runtime.block_on(board.update_task(edited))?;
			println!("updated {task}");
		}
		Command::SetStatus { task, status } => {
			runtime.block_on(board.set_status(&task, status))?;
			println!("{task} is now {}", status.as_str());
		}
		Command::MoveTask {
			task,
			days,
			start,
			end,
		} => {
			match (days, start) {
				(Some(days), _) => runtime.block_on(board.move_task(&task, days))?,
				(None, Some(start)) => {
					let start = TaskTime::parse(&start)?;
					let end = end.as_deref().map(TaskTime::parse).transpose()?;
					runtime.block_on(board.reschedule(&task, start, end))?;
				}
				(None, None) => return Err("pass --days or --start".into()),
			}
			if let Some(start) = board.task(&task).and_then(|task| task.start) {
				println!("moved {task} to {start}");
			}
		}
		Command::Assign { task, member } => {
			runtime.block_on(board.reassign(&task, member.as_deref()))?;
			match member {
				Some(member) => println!("assigned {task} to {member}"),
				None => println!("unassigned {task}"),
			}
		}
		Command::ConfirmCandidate { task, index } => {
			runtime.block_on(board.confirm_candidate(&task, index))?;
			println!("confirmed candidate {index} of {task}");
		}
		Command::DeleteTask { task } => {
			runtime.block_on(board.delete_task(&task))?;
			println!("deleted task {task}");
		}
		Command::DeleteProject { project, yes } => {
			if !yes {
				let doomed = board.project_deletion_impact(&project)?;
				println!("deleting `{project}` would also delete {} task(s):", doomed.len());
				for task in doomed {
					println!("  {} | {}", task.id, task.title);
				}
				println!("re-run with --yes to confirm");
				return Ok(());
			}
			let removed = runtime.block_on(board.delete_project(&project))?;
			println!("deleted project {project} and {removed} task(s)");
		}
		Command::DeleteMember { member } => {
			let unassigned = runtime.block_on(board.delete_member(&member))?;
			println!("deleted member {member}; {unassigned} task(s) unassigned");
		}
		Command::Generate {
			template,
			from,
			to,
			mut skip_weekdays,
			skip_weekends,
			time,
		} => {
			if skip_weekends {
				skip_weekdays.extend([0, 6]);
			}
			let time = match time {
				Some(raw) => Some(parse_time_of_day(&raw)?),
				None => config.default_time()?,
			};
			let plan = RecurrencePlan::new(
				parse_day(&from)?,
				parse_day(&to)?,
				skip_weekdays.into_iter().collect::<BTreeSet<_>>(),
				time,
			)?;
			let report = runtime.block_on(board.generate_recurring(&template, &plan))?;
			for task in &report.created {
				println!("created {} on {}", task.id, task.start.map(|start| start.to_string()).unwrap_or_default());
			}
			for day in &report.skipped {
				println!("skipped {day}");
			}
			for (day, reason) in &report.failed {
				println!("failed {day}: {reason}");
			}
		}
		Command::Reconcile => {
			let outcome = runtime.block_on(board.reconcile())?;
			if outcome.removed.is_empty() && outcome.failed.is_empty() {
				println!("no duplicate daily tasks");
			}
			for id in &outcome.removed {
				println!("removed duplicate {id}");
			}
			for (id, reason) in &outcome.failed {
				println!("failed to remove {id}: {reason}");
			}
		}
		Command::Events {
			projects,
			statuses,
			priorities,
			assignees,
			types,
			include_completed,
			options,
		} => {
			if options {
				println!("{}", serde_json::to_string_pretty(&board.filter_options())?);
				return Ok(());
			}
			let mut changes = Vec::new();
			for project in projects {
				let id = board
					.directory()
					.find_project(&project)
					.map(|found| found.id.clone())
					.unwrap_or(project);
				changes.push(FilterChange::Toggle(FilterValue::Project(id)));
			}
			if !statuses.is_empty() {
				changes.push(FilterChange::Clear(FilterDimension::Statuses));
				changes.extend(statuses.into_iter().map(|status| FilterChange::Toggle(FilterValue::Status(status))));
			}
			changes.extend(priorities.into_iter().map(|priority| FilterChange::Toggle(FilterValue::Priority(priority))));
			changes.extend(assignees.into_iter().map(|member| FilterChange::Toggle(FilterValue::Assignee(member))));
			changes.extend(types.into_iter().map(|kind| FilterChange::Toggle(FilterValue::Type(kind))));
			if include_completed && !board.filters().shows_completed() {
				changes.push(FilterChange::ToggleCompleted);
			}
			for change in changes {
				board.update_filters(change)?;
			}
			println!("{}", serde_json::to_string_pretty(&board.view().events)?);
		}
		Command::Summary { json } => {
			let view = board.view();
			if json {
				println!("{}", serde_json::to_string_pretty(&view.summary)?);
			} else {
				print_summary(&board);
			}
		}
		Command::Period { kind, offset } => {
			let (start, end) = period_range(kind, board.now().date(), offset)?;
			println!("{start} .. {end}");
			let rows = summarize_period(board.tasks(), &board.directory().members, (start, end));
			if rows.is_empty() {
				println!("no members");
			}
			for row in rows {
				println!(
					"{} | total {} | completed {} | in progress {} | not started {} | {}%",
					row.member_name, row.total, row.completed, row.in_progress, row.not_started, row.completion_rate
				);
			}
		}
		Command::Memo { day, text } => {
			let day = match day {
				Some(raw) => parse_day(&raw)?,
				None => board.now().date(),
			};
			match text {
				Some(text) => {
					preferences.set_memo(day, &text);
					preferences.save(&prefs_path)?;
					println!("memo saved for {day}");
				}
				None => println!("{}", preferences.memo(day).unwrap_or("(no memo)")),
			}
		}
		Command::Background { side, image, opacity } => {
			if !board.features().background {
				return Err(BoardError::FeatureDisabled("background").into());
			}
			if let Some(side) = side {
				preferences.set_background_image(side, image);
			}
			if let Some(opacity) = opacity {
				preferences.set_opacity(opacity);
			}
			preferences.save(&prefs_path)?;
			let background = &preferences.background;
			println!(
				"left: {} | right: {} | opacity: {}%",
				background.left_image.as_deref().unwrap_or("-"),
				background.right_image.as_deref().unwrap_or("-"),
				background.opacity
			);
		}
	}

	Ok(())
}

fn print_recent_workspaces(limit: usize) -> Result<(), Box<dyn Error>> {
	let rows = recent_workspaces(limit)?;
	if rows.is_empty() {
		println!("no recent workspaces");
		return Ok(());
	}

	for (index, path) in rows.iter().enumerate() {
		println!("{:>2}. {}", index + 1, path.display());
	}

	Ok(())
}

fn parse_day(input: &str) -> Result<NaiveDate, Box<dyn Error>> {
	Ok(NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")?)
}

fn parse_instant(input: &str) -> Result<NaiveDateTime, Box<dyn Error>> {
	Ok(TaskTime::parse(input)?.instant())
}

fn print_schema(board: &Board) {
	let mapping = board.mapping();
	println!("source: {:?}", mapping.source);
	for field in LogicalField::ALL {
		let code = mapping.code(field).unwrap_or("(unmapped)");
		let marker = if field.is_required() { "*" } else { " " };
		println!("{marker} {field:<16} {code}");
	}
	for diagnostic in board.diagnostics() {
		println!("warning: {diagnostic}");
	}
}

fn print_tasks(board: &Board) {
	if board.tasks().is_empty() {
		println!("no tasks yet");
		return;
	}

	for task in board.tasks() {
		let start = task.start.map(|start| start.to_string()).unwrap_or_else(|| "-".to_string());
		let assignee = task
			.assignee_id
			.as_deref()
			.and_then(|id| board.directory().member(id))
			.map(|member| member.name.as_str())
			.unwrap_or("unassigned");
		println!(
			"{} | {} | {} | {} | {} | {} | {}",
			task.id,
			start,
			task.title,
			board.directory().project_name_for(task),
			task.task_type.as_str(),
			task.status.as_str(),
			assignee
		);
	}
}

fn print_summary(board: &Board) {
	let summary = board.view().summary;
	println!("summary for {}", board.now().format("%Y-%m-%d %H:%M"));

	for (label, rows) in [
		("today", &summary.today),
		("overdue", &summary.overdue),
		("upcoming", &summary.upcoming),
	] {
		println!("\n{label} ({}):", rows.len());
		for occurrence in rows {
			println!("  {} | {} | {}", occurrence.start, occurrence.title, occurrence.status.as_str());
		}
	}

	println!("\nby assignee (today):");
	for row in &summary.per_assignee {
		println!(
			"  {} | {}/{} | {}%",
			row.member_name, row.today_completed, row.today_total, row.completion_rate
		);
	}
}
