use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::io;
use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveTime};
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEventKind};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use crossterm::{ExecutableCommand, execute};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph};
use ratatui::{Frame, Terminal};
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::TryRecvError;

use crate::board::{Board, BoardView, Notice, NoticeLevel};
use crate::domain::{Priority, Task, TaskStatus, TaskTime, TaskType};
use crate::filters::{FilterChange, FilterValue};
use crate::preferences::Preferences;
use crate::projection::{CalendarEvent, PROJECT_PALETTE};
use crate::recurring::RecurrencePlan;

const FOCUSED_PANEL_BORDER_COLOR: Color = Color::Yellow;
const INACTIVE_PANEL_BORDER_COLOR: Color = Color::DarkGray;
const HIGHLIGHT_BACKGROUND_COLOR: Color = Color::Rgb(42, 45, 52);

/// Everything the dashboard reads and writes while it runs.
pub struct Session<'a> {
	pub runtime: &'a Runtime,
	pub board: &'a mut Board,
	pub preferences: &'a mut Preferences,
	pub preferences_path: &'a Path,
	pub default_time: Option<NaiveTime>,
}

pub fn run_dashboard(mut session: Session<'_>) -> Result<(), Box<dyn Error>> {
	enable_raw_mode()?;
	let mut stdout = io::stdout();
	stdout.execute(EnterAlternateScreen)?;
	let backend = CrosstermBackend::new(stdout);
	let mut terminal = Terminal::new(backend)?;

	let result = run_event_loop(&mut terminal, &mut session);

	disable_raw_mode()?;
	execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
	terminal.show_cursor()?;

	result
}

fn run_event_loop(
	terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
	session: &mut Session<'_>,
) -> Result<(), Box<dyn Error>> {
	let mut app = App::new(session.board.now().date());
	let board_view = session.board.subscribe_view();
	let mut notices = session.board.subscribe_notices();
	let mut store_events = session.board.subscribe_store();
	if let Some(diagnostic) = session.board.diagnostics().first() {
		app.notice = Some(Notice {
			level: NoticeLevel::Warning,
			message: diagnostic.to_string(),
		});
	}

	loop {
		while let Ok(notice) = notices.try_recv() {
			app.notice = Some(notice);
		}
		if let Some(events) = store_events.as_mut() {
			drain_store_events(session, events);
		}

		let snapshot = board_view.borrow().clone();
		let view = build_view(&app, snapshot, session.board, session.preferences);
		app.clamp_selection(&view);
		terminal.draw(|frame| draw_dashboard(frame, &app, &view))?;

		if event::poll(StdDuration::from_millis(250))? {
			if let CEvent::Key(key) = event::read()? {
				if key.kind != KeyEventKind::Press {
					continue;
				}

				let should_quit = match &app.mode {
					InputMode::Prompt(_) => handle_prompt_key(&mut app, key.code, session),
					InputMode::Select(_) => handle_select_key(&mut app, key.code, session),
					InputMode::Normal => handle_normal_key(&mut app, key.code, session, &view),
				};

				if should_quit {
					break;
				}
			}
		}
	}

	Ok(())
}

fn drain_store_events(
	session: &mut Session<'_>,
	events: &mut tokio::sync::broadcast::Receiver<crate::store::StoreEvent>,
) {
	let mut pending = Vec::new();
	let mut lagged = false;
	loop {
		match events.try_recv() {
			Ok(event) => pending.push(event),
			Err(TryRecvError::Lagged(_)) => lagged = true,
			Err(TryRecvError::Empty | TryRecvError::Closed) => break,
		}
	}

	let board = &mut *session.board;
	session.runtime.block_on(async {
		if lagged {
			board.refresh().await;
			return;
		}
		for event in pending {
			board.handle_store_event(event).await;
		}
	});
}

fn draw_dashboard(frame: &mut Frame, app: &App, view: &ViewModel) {
	let layout = Layout::default()
		.direction(Direction::Vertical)
		.constraints([Constraint::Min(12), Constraint::Length(5)])
		.split(frame.area());

	let body = Layout::default()
		.direction(Direction::Horizontal)
		.constraints([
			Constraint::Percentage(28),
			Constraint::Percentage(42),
			Constraint::Percentage(30),
		])
		.split(layout[0]);

	let left = Layout::default()
		.direction(Direction::Vertical)
		.constraints([Constraint::Length(10), Constraint::Min(8)])
		.split(body[0]);

	render_calendar_panel(frame, left[0], app, &view.event_days);
	render_filter_panel(frame, left[1], app, view);
	render_agenda_panel(frame, body[1], app, view);
	render_summary_panel(frame, body[2], view);
	render_footer(frame, layout[1], app);

	if let InputMode::Select(select) = &app.mode {
		render_select_popup(frame, select);
	}
}

fn render_calendar_panel(frame: &mut Frame, area: Rect, app: &App, event_days: &HashSet<NaiveDate>) {
	let month = app.calendar_month;
	let mut lines = Vec::new();
	lines.push(Line::from(format!("{} {}", month.format("%B"), month.year())));
	lines.push(Line::from("Mo Tu We Th Fr Sa Su"));

	let lead = month.weekday().num_days_from_monday() as usize;
	let mut spans = vec![Span::raw("   "); lead];
	for date in month.iter_days().take_while(|date| date.month() == month.month()) {
		let mut style = Style::default();
		if date == app.selected_day {
			style = style.fg(Color::Black).bg(Color::Yellow).add_modifier(Modifier::BOLD);
		} else if date == app.today {
			style = style.fg(Color::LightCyan).add_modifier(Modifier::UNDERLINED);
		} else if event_days.contains(&date) {
			style = style.fg(Color::LightYellow).add_modifier(Modifier::BOLD);
		}
		spans.push(Span::styled(format!("{:>2} ", date.day()), style));
		if spans.len() == 7 {
			lines.push(Line::from(std::mem::take(&mut spans)));
		}
	}
	if !spans.is_empty() {
		lines.push(Line::from(spans));
	}

	let block = Block::default()
		.borders(Borders::ALL)
		.title("Calendar")
		.border_style(border_style(app.focus == FocusPane::Calendar));
	frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_filter_panel(frame: &mut Frame, area: Rect, app: &App, view: &ViewModel) {
	let items = if view.filters_enabled {
		view.filter_rows
			.iter()
			.map(|row| match &row.value {
				None => ListItem::new(Line::from(Span::styled(
					row.label.clone(),
					Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD),
				))),
				Some(_) => ListItem::new(format!(" [{}] {}", if row.active { 'x' } else { ' ' }, row.label)),
			})
			.collect::<Vec<_>>()
	} else {
		vec![ListItem::new("(filters disabled)")]
	};

	let mut state = ListState::default();
	if view.filters_enabled && !view.filter_rows.is_empty() {
		state.select(Some(app.filter_index.min(view.filter_rows.len() - 1)));
	}

	let title = format!("Filters {}/{}", view.visible, view.total);
	let list = List::new(items)
		.block(
			Block::default()
				.borders(Borders::ALL)
				.title(title)
				.border_style(border_style(app.focus == FocusPane::Filters)),
		)
		.highlight_style(Style::default().bg(HIGHLIGHT_BACKGROUND_COLOR).add_modifier(Modifier::BOLD));
	frame.render_stateful_widget(list, area, &mut state);
}

fn render_agenda_panel(frame: &mut Frame, area: Rect, app: &App, view: &ViewModel) {
	let mut items = view
		.agenda
		.iter()
		.map(|row| ListItem::new(render_agenda_line(row)))
		.collect::<Vec<_>>();
	if items.is_empty() {
		items.push(ListItem::new("(nothing scheduled)"));
	}

	let mut state = ListState::default();
	if !view.agenda.is_empty() {
		state.select(Some(app.agenda_index.min(view.agenda.len() - 1)));
	}

	let mut lines = vec![];
	if let Some(memo) = &view.memo {
		lines.push(format!("memo: {memo}"));
	}
	let title = format!("{} | {} event(s)", app.selected_day.format("%A, %d %B %Y"), view.agenda.len());
	let sections = Layout::default()
		.direction(Direction::Vertical)
		.constraints([Constraint::Min(5), Constraint::Length(if lines.is_empty() { 0 } else { 3 })])
		.split(area);

	let list = List::new(items)
		.block(
			Block::default()
				.borders(Borders::ALL)
				.title(title)
				.border_style(border_style(app.focus == FocusPane::Agenda)),
		)
		.highlight_style(Style::default().bg(HIGHLIGHT_BACKGROUND_COLOR).add_modifier(Modifier::BOLD));
	frame.render_stateful_widget(list, sections[0], &mut state);

	if !lines.is_empty() {
		let memo = Paragraph::new(lines.into_iter().map(Line::from).collect::<Vec<_>>())
			.block(Block::default().borders(Borders::ALL).title("Memo"));
		frame.render_widget(memo, sections[1]);
	}
}

fn render_agenda_line(row: &AgendaRow) -> Line<'static> {
	let mut spans = vec![
		Span::styled(format!("{:>7} ", row.time), Style::default().fg(Color::DarkGray)),
		Span::styled(row.title.clone(), row.style.add_modifier(Modifier::BOLD)),
		Span::raw(" | "),
		Span::styled(row.project_name.clone(), row.style),
		Span::raw(format!(" | {}", row.status.as_str())),
	];
	if let Some(assignee) = &row.assignee_name {
		spans.push(Span::raw(format!(" | {assignee}")));
	}
	if let Some(index) = row.candidate_index {
		spans.push(Span::styled(
			format!(" (candidate {})", index + 1),
			Style::default().fg(Color::LightMagenta),
		));
	}
	Line::from(spans)
}

fn render_summary_panel(frame: &mut Frame, area: Rect, view: &ViewModel) {
	let summary = &view.summary;
	let mut lines = vec![
		Line::from(format!(
			"Today {} | Overdue {} | Upcoming {}",
			summary.today.len(),
			summary.overdue.len(),
			summary.upcoming.len()
		)),
		Line::from(""),
	];

	if !summary.overdue.is_empty() {
		lines.push(Line::from(Span::styled("Overdue", Style::default().fg(Color::LightRed))));
		for occurrence in summary.overdue.iter().take(5) {
			lines.push(Line::from(format!("  {} {}", occurrence.date.format("%m/%d"), occurrence.title)));
		}
	}

	lines.push(Line::from("Upcoming"));
	if summary.upcoming.is_empty() {
		lines.push(Line::from("  (none)"));
	}
	for occurrence in summary.upcoming.iter().take(6) {
		lines.push(Line::from(format!("  {} {}", occurrence.date.format("%a %m/%d"), occurrence.title)));
	}

	lines.push(Line::from(""));
	lines.push(Line::from("Assignees today"));
	if summary.per_assignee.is_empty() {
		lines.push(Line::from("  (no members)"));
	}
	for row in &summary.per_assignee {
		let width = (row.completion_rate as usize * 10 + 50) / 100;
		lines.push(Line::from(vec![
			Span::styled(format!("  {:<10}", row.member_name), Style::default().fg(Color::Cyan)),
			Span::raw(format!(
				" {}/{} {:>3}% {}",
				row.today_completed,
				row.today_total,
				row.completion_rate,
				"=".repeat(width)
			)),
		]));
	}

	if let Some(background) = &view.background {
		lines.push(Line::from(""));
		lines.push(Line::from(Span::styled(background.clone(), Style::default().fg(Color::DarkGray))));
	}

	let panel = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Summary"));
	frame.render_widget(panel, area);
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
	let notice_line = match &app.notice {
		Some(notice) => Line::from(Span::styled(notice.message.clone(), notice_style(notice.level))),
		None => Line::from(""),
	};
	let footer_lines = match &app.mode {
		InputMode::Normal => vec![
			Line::from("Tab pane | arrows/hjkl navigate | n/N month | t new task | p project | m memo | b background | q quit"),
			Line::from(
				"agenda: [ ] move day | s status | a assign | c confirm candidate | g generate daily | x delete | filters: space toggle, f completed, r reset",
			),
			Line::from(app.status.clone()),
			notice_line,
		],
		InputMode::Prompt(prompt) => vec![
			Line::from(prompt.title.clone()),
			Line::from(format!("> {}", prompt.input)),
			Line::from("Enter submit | Esc cancel"),
			notice_line,
		],
		InputMode::Select(select) => vec![
			Line::from(select.title.clone()),
			Line::from(format!(
				"Selected: {}",
				select
					.selected_option()
					.map(|option| option.label.as_str())
					.unwrap_or("(none)")
			)),
			Line::from("j/k or arrows move | Enter choose | Esc cancel"),
			notice_line,
		],
	};

	let footer = Paragraph::new(footer_lines).block(Block::default().borders(Borders::ALL).title("Shortcuts"));
	frame.render_widget(footer, area);
}

fn render_select_popup(frame: &mut Frame, select: &SelectState) {
	let area = centered_rect(62, 55, frame.area());
	frame.render_widget(Clear, area);

	let items = if select.options.is_empty() {
		vec![ListItem::new("(no choices)")]
	} else {
		select
			.options
			.iter()
			.map(|option| ListItem::new(option.label.clone()).style(option.style))
			.collect::<Vec<_>>()
	};

	let list = List::new(items)
		.block(Block::default().borders(Borders::ALL).title(select.title.clone()))
		.highlight_symbol(">> ")
		.highlight_style(Style::default().bg(HIGHLIGHT_BACKGROUND_COLOR));

	let mut state = ListState::default();
	if !select.options.is_empty() {
		state.select(Some(select.selected.min(select.options.len() - 1)));
	}
	frame.render_stateful_widget(list, area, &mut state);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
	let popup_layout = Layout::default()
		.direction(Direction::Vertical)
		.constraints([
			Constraint::Percentage((100 - percent_y) / 2),
			Constraint::Percentage(percent_y),
			Constraint::Percentage((100 - percent_y) / 2),
		])
		.split(area);
	Layout::default()
		.direction(Direction::Horizontal)
		.constraints([
			Constraint::Percentage((100 - percent_x) / 2),
			Constraint::Percentage(percent_x),
			Constraint::Percentage((100 - percent_x) / 2),
		])
		.split(popup_layout[1])[1]
}

fn handle_normal_key(app: &mut App, code: KeyCode, session: &mut Session<'_>, view: &ViewModel) -> bool {
	match code {
		KeyCode::Char('q') | KeyCode::Esc => true,
		KeyCode::Tab => {
			app.focus = app.focus.next();
			false
		}
		KeyCode::BackTab => {
			app.focus = app.focus.prev();
			false
		}
		KeyCode::Up | KeyCode::Char('k') => {
			match app.focus {
				FocusPane::Calendar => app.shift_selected_day(-7),
				FocusPane::Agenda => app.agenda_index = step(app.agenda_index, -1, view.agenda.len()),
				FocusPane::Filters => app.filter_index = step(app.filter_index, -1, view.filter_rows.len()),
			}
			false
		}
		KeyCode::Down | KeyCode::Char('j') => {
			match app.focus {
				FocusPane::Calendar => app.shift_selected_day(7),
				FocusPane::Agenda => app.agenda_index = step(app.agenda_index, 1, view.agenda.len()),
				FocusPane::Filters => app.filter_index = step(app.filter_index, 1, view.filter_rows.len()),
			}
			false
		}
		KeyCode::Left | KeyCode::Char('h') => {
			app.shift_selected_day(-1);
			false
		}
		KeyCode::Right | KeyCode::Char('l') => {
			app.shift_selected_day(1);
			false
		}
		KeyCode::Char('n') => {
			app.shift_selected_month(1);
			false
		}
		KeyCode::Char('N') => {
			app.shift_selected_month(-1);
			false
		}
		KeyCode::Char(' ') | KeyCode::Enter if app.focus == FocusPane::Filters => {
			if let Some(value) = view.filter_rows.get(app.filter_index).and_then(|row| row.value.clone()) {
				app.report(session.board.update_filters(FilterChange::Toggle(value)), "filters updated");
			}
			false
		}
		KeyCode::Char('f') => {
			app.report(session.board.update_filters(FilterChange::ToggleCompleted), "toggled completed tasks");
			false
		}
		KeyCode::Char('r') => {
			session.board.reset_filters();
			app.status = "filters reset".to_string();
			false
		}
		KeyCode::Char('[') | KeyCode::Char(']') => {
			let days = if code == KeyCode::Char('[') { -1 } else { 1 };
			match app.selected_row(view) {
				Some(row) if row.candidate_index.is_some() => {
					app.status = "candidate dates move by confirming one (c)".to_string();
				}
				Some(row) => {
					let result = session.runtime.block_on(session.board.move_task(&row.task_id, days));
					if result.is_ok() {
						app.shift_selected_day(days);
					}
					app.report(result, "moved");
				}
				None => app.status = "Select an event in the agenda first".to_string(),
			}
			false
		}
		KeyCode::Char('s') => {
			if let Some(row) = app.selected_row(view) {
				let next = next_status(row.status);
				let result = session.runtime.block_on(session.board.set_status(&row.task_id, next));
				app.report(result, &format!("status: {}", next.as_str()));
			}
			false
		}
		KeyCode::Char('c') => {
			match app.selected_row(view).and_then(|row| Some((row.task_id.clone(), row.candidate_index?))) {
				Some((task_id, index)) => {
					let result = session.runtime.block_on(session.board.confirm_candidate(&task_id, index));
					app.report(result, "candidate confirmed");
				}
				None => app.status = "Select a candidate date first".to_string(),
			}
			false
		}
		KeyCode::Char('a') => {
			if let Some(row) = app.selected_row(view) {
				app.mode = InputMode::Select(build_assignee_select(session.board, row.task_id.clone()));
			}
			false
		}
		KeyCode::Char('x') => {
			if let Some(row) = app.selected_row(view) {
				app.mode = InputMode::Select(build_delete_select(row));
			}
			false
		}
		KeyCode::Char('g') => {
			match app.selected_row(view) {
				Some(row) if row.task_type == TaskType::Daily => {
					app.mode = InputMode::Prompt(PromptState::new(
						format!("Generate `{}` from {} until (YYYY-MM-DD)", row.title, app.selected_day),
						PromptKind::GenerateUntil {
							template_id: row.task_id.clone(),
						},
					));
				}
				Some(_) => app.status = "Only daily tasks can be generated".to_string(),
				None => app.status = "Select a daily task first".to_string(),
			}
			false
		}
		KeyCode::Char('t') => {
			app.mode = InputMode::Prompt(PromptState::new(
				format!("New task on {}", app.selected_day),
				PromptKind::NewTaskTitle,
			));
			false
		}
		KeyCode::Char('p') => {
			app.mode = InputMode::Prompt(PromptState::new("Project name", PromptKind::NewProjectName));
			false
		}
		KeyCode::Char('m') => {
			let mut prompt = PromptState::new(
				format!("Memo for {} (empty clears)", app.selected_day),
				PromptKind::Memo { day: app.selected_day },
			);
			prompt.input = session.preferences.memo(app.selected_day).unwrap_or_default().to_string();
			app.mode = InputMode::Prompt(prompt);
			false
		}
		KeyCode::Char('b') => {
			if session.board.features().background {
				let mut prompt = PromptState::new("Background opacity (0-100)", PromptKind::Opacity);
				prompt.input = session.preferences.background.opacity.to_string();
				app.mode = InputMode::Prompt(prompt);
			} else {
				app.status = "background decoration is disabled".to_string();
			}
			false
		}
		_ => false,
	}
}

fn handle_prompt_key(app: &mut App, code: KeyCode, session: &mut Session<'_>) -> bool {
	match code {
		KeyCode::Esc => {
			app.mode = InputMode::Normal;
			app.status = "Input cancelled".to_string();
		}
		KeyCode::Backspace => {
			if let InputMode::Prompt(prompt) = &mut app.mode {
				prompt.input.pop();
			}
		}
		KeyCode::Char(value) => {
			if let InputMode::Prompt(prompt) = &mut app.mode {
				prompt.input.push(value);
			}
		}
		KeyCode::Enter => {
			let prompt = match std::mem::replace(&mut app.mode, InputMode::Normal) {
				InputMode::Prompt(prompt) => prompt,
				InputMode::Normal | InputMode::Select(_) => return false,
			};

			match submit_prompt(prompt.clone(), app.selected_day, session) {
				Ok(PromptOutcome::Select(select)) => app.mode = InputMode::Select(select),
				Ok(PromptOutcome::Done(message)) => app.status = message,
				Err(err) => {
					app.mode = InputMode::Prompt(prompt);
					app.status = format!("error: {err}");
				}
			}
		}
		_ => {}
	}

	false
}

fn handle_select_key(app: &mut App, code: KeyCode, session: &mut Session<'_>) -> bool {
	match code {
		KeyCode::Esc => {
			app.mode = InputMode::Normal;
			app.status = "Selection cancelled".to_string();
		}
		KeyCode::Up | KeyCode::Char('k') => {
			if let InputMode::Select(select) = &mut app.mode {
				select.move_selection(-1);
			}
		}
		KeyCode::Down | KeyCode::Char('j') => {
			if let InputMode::Select(select) = &mut app.mode {
				select.move_selection(1);
			}
		}
		KeyCode::Enter => {
			let select = match std::mem::replace(&mut app.mode, InputMode::Normal) {
				InputMode::Select(select) => select,
				_ => return false,
			};

			match submit_select(select.clone(), app.selected_day, session) {
				Ok(message) => app.status = message,
				Err(err) => {
					app.mode = InputMode::Select(select);
					app.status = format!("error: {err}");
				}
			}
		}
		_ => {}
	}

	false
}

fn submit_prompt(
	prompt: PromptState,
	selected_day: NaiveDate,
	session: &mut Session<'_>,
) -> Result<PromptOutcome, String> {
	match prompt.kind {
		PromptKind::NewTaskTitle => {
			let title = required_text(&prompt.input, "task title")?;
			build_task_project_select(session.board, title).map(PromptOutcome::Select)
		}
		PromptKind::NewProjectName => {
			let name = required_text(&prompt.input, "project name")?;
			Ok(PromptOutcome::Select(build_project_color_select(name)))
		}
		PromptKind::Memo { day } => {
			session.preferences.set_memo(day, &prompt.input);
			session
				.preferences
				.save(session.preferences_path)
				.map_err(|err| err.to_string())?;
			Ok(PromptOutcome::Done(format!("memo saved for {day}")))
		}
		PromptKind::Opacity => {
			let percent = prompt
				.input
				.trim()
				.parse::<u8>()
				.map_err(|_| "opacity must be a number from 0 to 100".to_string())?;
			session.preferences.set_opacity(percent);
			session
				.preferences
				.save(session.preferences_path)
				.map_err(|err| err.to_string())?;
			Ok(PromptOutcome::Done(format!(
				"background opacity {}%",
				session.preferences.background.opacity
			)))
		}
		PromptKind::GenerateUntil { template_id } => {
			let end = NaiveDate::parse_from_str(prompt.input.trim(), "%Y-%m-%d")
				.map_err(|_| "use YYYY-MM-DD".to_string())?;
			if end < selected_day {
				return Err("end date is before the selected day".to_string());
			}
			Ok(PromptOutcome::Select(build_weekend_select(template_id, end)))
		}
	}
}

fn submit_select(select: SelectState, selected_day: NaiveDate, session: &mut Session<'_>) -> Result<String, String> {
	let selected_value = select
		.selected_option()
		.map(|option| option.value.clone())
		.ok_or_else(|| "no option selected".to_string())?;

	match select.kind {
		SelectKind::ProjectColor { name } => {
			let created = name.clone();
			session
				.runtime
				.block_on(session.board.add_project(name, selected_value))
				.map_err(|err| err.to_string())?;
			Ok(format!("created project: {created}"))
		}
		SelectKind::TaskProject { title } => {
			let project_id = selected_value.ok_or_else(|| "selected project is missing".to_string())?;
			let mut task = Task::draft(title.clone(), project_id);
			task.start = Some(TaskTime::Date(selected_day));
			session
				.runtime
				.block_on(session.board.create_task(task))
				.map_err(|err| err.to_string())?;
			Ok(format!("created task: {title}"))
		}
		SelectKind::Assignee { task_id } => {
			session
				.runtime
				.block_on(session.board.reassign(&task_id, selected_value.as_deref()))
				.map_err(|err| err.to_string())?;
			Ok(match selected_value {
				Some(_) => "assignee changed".to_string(),
				None => "task unassigned".to_string(),
			})
		}
		SelectKind::DeleteConfirm { task_id, title } => {
			if selected_value.as_deref() != Some("delete") {
				return Ok("Delete cancelled".to_string());
			}
			session
				.runtime
				.block_on(session.board.delete_task(&task_id))
				.map_err(|err| err.to_string())?;
			Ok(format!("deleted: {title}"))
		}
		SelectKind::Weekends { template_id, end } => {
			let excluded: BTreeSet<u8> = match selected_value.as_deref() {
				Some("skip") => [0, 6].into_iter().collect(),
				_ => Default::default(),
			};
			let plan = RecurrencePlan::new(selected_day, end, excluded, session.default_time)
				.map_err(|err| err.to_string())?;
			let report = session
				.runtime
				.block_on(session.board.generate_recurring(&template_id, &plan))
				.map_err(|err| err.to_string())?;
			Ok(format!(
				"generated {} task(s), skipped {}",
				report.created.len(),
				report.skipped.len()
			))
		}
	}
}

fn build_project_color_select(name: String) -> SelectState {
	let mut options = vec![SelectOption::new(
		"Automatic (by name)",
		None,
		Style::default().fg(Color::Gray),
	)];
	for color in PROJECT_PALETTE {
		options.push(SelectOption::new(
			format!("████████ {color}"),
			Some(color.to_string()),
			hex_style(color),
		));
	}

	SelectState::new("Select project color", SelectKind::ProjectColor { name }, options)
}

fn build_task_project_select(board: &Board, title: String) -> Result<SelectState, String> {
	let mut projects = board.directory().projects.iter().collect::<Vec<_>>();
	projects.sort_by(|left, right| left.name.cmp(&right.name).then_with(|| left.id.cmp(&right.id)));

	if projects.is_empty() {
		return Err("no projects yet. Press 'p' to create one first".to_string());
	}

	let options = projects
		.into_iter()
		.map(|project| {
			let style = project.color.as_deref().map(hex_style).unwrap_or_default();
			SelectOption::new(project.name.clone(), Some(project.id.clone()), style)
		})
		.collect::<Vec<_>>();

	Ok(SelectState::new("Select project", SelectKind::TaskProject { title }, options))
}

fn build_assignee_select(board: &Board, task_id: String) -> SelectState {
	let mut options = vec![SelectOption::new("(unassigned)", None, Style::default().fg(Color::Gray))];
	for member in &board.directory().members {
		options.push(SelectOption::new(
			member.name.clone(),
			Some(member.id.clone()),
			hex_style(&member.color),
		));
	}
	let mut select = SelectState::new("Assign to", SelectKind::Assignee { task_id: task_id.clone() }, options);
	let current = board.task(&task_id).and_then(|task| task.assignee_id.clone());
	select.selected = select
		.options
		.iter()
		.position(|option| option.value == current)
		.unwrap_or(0);
	select
}

fn build_delete_select(row: &AgendaRow) -> SelectState {
	let options = vec![
		SelectOption::new(
			"Delete",
			Some("delete".to_string()),
			Style::default().fg(Color::LightRed).add_modifier(Modifier::BOLD),
		),
		SelectOption::new("Cancel", Some("cancel".to_string()), Style::default()),
	];

	let mut select = SelectState::new(
		format!("Delete task? {}", row.title),
		SelectKind::DeleteConfirm {
			task_id: row.task_id.clone(),
			title: row.title.clone(),
		},
		options,
	);
	select.selected = 1;
	select
}

fn build_weekend_select(template_id: String, end: NaiveDate) -> SelectState {
	let options = vec![
		SelectOption::new("Every day", Some("all".to_string()), Style::default()),
		SelectOption::new("Skip Saturdays and Sundays", Some("skip".to_string()), Style::default()),
	];
	SelectState::new("Which days?", SelectKind::Weekends { template_id, end }, options)
}

fn build_view(app: &App, board_view: BoardView, board: &Board, preferences: &Preferences) -> ViewModel {
	let mut event_days = HashSet::new();
	for event in &board_view.events {
		event_days.extend(event_days_of(event));
	}

	let agenda = board_view
		.events
		.iter()
		.filter(|event| event_days_of(event).contains(&app.selected_day))
		.map(|event| AgendaRow {
			task_id: event.extended_props.task_id.clone(),
			candidate_index: event.extended_props.candidate_index,
			time: if event.all_day {
				"all day".to_string()
			} else {
				event.start.instant().format("%H:%M").to_string()
			},
			title: event.title.clone(),
			project_name: event.extended_props.project_name.clone(),
			assignee_name: event.extended_props.assignee_name.clone(),
			status: event.extended_props.status,
			task_type: event.extended_props.task_type,
			style: hex_style(&event.background_color),
		})
		.collect();

	let background = board.features().background.then(|| {
		let settings = &preferences.background;
		format!(
			"background: left {} | right {} | {}%",
			settings.left_image.as_deref().unwrap_or("-"),
			settings.right_image.as_deref().unwrap_or("-"),
			settings.opacity
		)
	});

	ViewModel {
		event_days,
		agenda,
		filter_rows: build_filter_rows(board),
		filters_enabled: board.features().filters,
		memo: preferences.memo(app.selected_day).map(str::to_string),
		background,
		visible: board_view.visible,
		total: board_view.total,
		summary: board_view.summary,
	}
}

fn event_days_of(event: &CalendarEvent) -> Vec<NaiveDate> {
	let first = event.start.date();
	let last = event.end.map(|end| end.date()).unwrap_or(first).max(first);
	first.iter_days().take_while(|day| *day <= last).collect()
}

fn build_filter_rows(board: &Board) -> Vec<FilterRow> {
	let filters = board.filters();
	let mut rows = vec![FilterRow::header("Status")];
	for status in TaskStatus::ALL {
		rows.push(FilterRow::toggle(
			status.as_str(),
			FilterValue::Status(status),
			filters.statuses.contains(&status),
		));
	}
	rows.push(FilterRow::header("Priority"));
	for priority in Priority::ALL {
		rows.push(FilterRow::toggle(
			priority.as_str(),
			FilterValue::Priority(priority),
			filters.priorities.contains(&priority),
		));
	}
	rows.push(FilterRow::header("Type"));
	for kind in [TaskType::Single, TaskType::Daily, TaskType::Irregular] {
		rows.push(FilterRow::toggle(kind.as_str(), FilterValue::Type(kind), filters.types.contains(&kind)));
	}
	rows.push(FilterRow::header("Project"));
	for project in &board.directory().projects {
		rows.push(FilterRow::toggle(
			&project.name,
			FilterValue::Project(project.id.clone()),
			filters.projects.contains(&project.id),
		));
	}
	rows.push(FilterRow::header("Assignee"));
	for member in &board.directory().members {
		rows.push(FilterRow::toggle(
			&member.name,
			FilterValue::Assignee(member.id.clone()),
			filters.assignees.contains(&member.id),
		));
	}
	rows
}

fn next_status(status: TaskStatus) -> TaskStatus {
	match status {
		TaskStatus::NotStarted => TaskStatus::InProgress,
		TaskStatus::InProgress => TaskStatus::Completed,
		TaskStatus::Completed => TaskStatus::NotStarted,
	}
}

fn step(index: usize, delta: i32, len: usize) -> usize {
	if len == 0 {
		return 0;
	}
	if delta > 0 {
		(index + delta as usize).min(len - 1)
	} else {
		index.saturating_sub(delta.unsigned_abs() as usize)
	}
}

fn required_text(input: &str, field_name: &str) -> Result<String, String> {
	let trimmed = input.trim();
	if trimmed.is_empty() {
		Err(format!("{field_name} is required"))
	} else {
		Ok(trimmed.to_string())
	}
}

fn hex_color(hex: &str) -> Option<Color> {
	let digits = hex.strip_prefix('#')?;
	if digits.len() != 6 {
		return None;
	}
	let channel = |range: std::ops::Range<usize>| u8::from_str_radix(digits.get(range)?, 16).ok();
	Some(Color::Rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn hex_style(hex: &str) -> Style {
	hex_color(hex).map(|color| Style::default().fg(color)).unwrap_or_default()
}

fn notice_style(level: NoticeLevel) -> Style {
	match level {
		NoticeLevel::Info => Style::default().fg(Color::Gray),
		NoticeLevel::Success => Style::default().fg(Color::LightGreen),
		NoticeLevel::Warning => Style::default().fg(Color::LightYellow),
		NoticeLevel::Error => Style::default().fg(Color::LightRed).add_modifier(Modifier::BOLD),
	}
}

fn border_style(focused: bool) -> Style {
	if focused {
		Style::default()
			.fg(FOCUSED_PANEL_BORDER_COLOR)
			.add_modifier(Modifier::BOLD)
	} else {
		Style::default().fg(INACTIVE_PANEL_BORDER_COLOR)
	}
}

fn first_day_of_month(day: NaiveDate) -> NaiveDate {
	day - Duration::days(i64::from(day.day()) - 1)
}

fn shift_month(day: NaiveDate, delta: i32) -> NaiveDate {
	let months = Months::new(delta.unsigned_abs());
	let shifted = if delta >= 0 {
		day.checked_add_months(months)
	} else {
		day.checked_sub_months(months)
	};
	shifted.unwrap_or(day)
}

#[derive(Debug, Clone)]
enum PromptOutcome {
	Select(SelectState),
	Done(String),
}

#[derive(Debug, Clone)]
struct PromptState {
	title: String,
	input: String,
	kind: PromptKind,
}

impl PromptState {
	fn new(title: impl Into<String>, kind: PromptKind) -> Self {
		Self {
			title: title.into(),
			input: String::new(),
			kind,
		}
	}
}

#[derive(Debug, Clone)]
struct SelectState {
	title: String,
	options: Vec<SelectOption>,
	selected: usize,
	kind: SelectKind,
}

impl SelectState {
	fn new(title: impl Into<String>, kind: SelectKind, options: Vec<SelectOption>) -> Self {
		Self {
			title: title.into(),
			options,
			selected: 0,
			kind,
		}
	}

	fn move_selection(&mut self, delta: i32) {
		self.selected = step(self.selected, delta, self.options.len());
	}

	fn selected_option(&self) -> Option<&SelectOption> {
		self.options.get(self.selected)
	}
}

#[derive(Debug, Clone)]
struct SelectOption {
	label: String,
	value: Option<String>,
	style: Style,
}

impl SelectOption {
	fn new(label: impl Into<String>, value: Option<String>, style: Style) -> Self {
		Self {
			label: label.into(),
			value,
			style,
		}
	}
}

#[derive(Debug, Clone)]
enum PromptKind {
	NewTaskTitle,
	NewProjectName,
	Memo { day: NaiveDate },
	Opacity,
	GenerateUntil { template_id: String },
}

#[derive(Debug, Clone)]
enum SelectKind {
	ProjectColor { name: String },
	TaskProject { title: String },
	Assignee { task_id: String },
	DeleteConfirm { task_id: String, title: String },
	Weekends { template_id: String, end: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FocusPane {
	Calendar,
	Agenda,
	Filters,
}

impl FocusPane {
	fn next(self) -> Self {
		match self {
			FocusPane::Calendar => FocusPane::Agenda,
			FocusPane::Agenda => FocusPane::Filters,
			FocusPane::Filters => FocusPane::Calendar,
		}
	}

	fn prev(self) -> Self {
		match self {
			FocusPane::Calendar => FocusPane::Filters,
			FocusPane::Agenda => FocusPane::Calendar,
			FocusPane::Filters => FocusPane::Agenda,
		}
	}
}

#[derive(Debug, Clone)]
enum InputMode {
	Normal,
	Prompt(PromptState),
	Select(SelectState),
}

#[derive(Debug, Clone)]
struct App {
	focus: FocusPane,
	today: NaiveDate,
	selected_day: NaiveDate,
	calendar_month: NaiveDate,
	agenda_index: usize,
	filter_index: usize,
	mode: InputMode,
	status: String,
	notice: Option<Notice>,
}

impl App {
	fn new(today: NaiveDate) -> Self {
		Self {
			focus: FocusPane::Agenda,
			today,
			selected_day: today,
			calendar_month: first_day_of_month(today),
			agenda_index: 0,
			filter_index: 0,
			mode: InputMode::Normal,
			status: "Ready".to_string(),
			notice: None,
		}
	}

	fn clamp_selection(&mut self, view: &ViewModel) {
		self.agenda_index = self.agenda_index.min(view.agenda.len().saturating_sub(1));
		self.filter_index = self.filter_index.min(view.filter_rows.len().saturating_sub(1));
	}

	fn shift_selected_day(&mut self, delta_days: i64) {
		self.selected_day += Duration::days(delta_days);
		self.calendar_month = first_day_of_month(self.selected_day);
		self.agenda_index = 0;
	}

	fn shift_selected_month(&mut self, delta_months: i32) {
		self.selected_day = shift_month(self.selected_day, delta_months);
		self.calendar_month = first_day_of_month(self.selected_day);
		self.agenda_index = 0;
	}

	fn selected_row<'a>(&self, view: &'a ViewModel) -> Option<&'a AgendaRow> {
		if self.focus != FocusPane::Agenda {
			return None;
		}
		view.agenda.get(self.agenda_index)
	}

	fn report<T, E: std::fmt::Display>(&mut self, result: Result<T, E>, success: &str) {
		self.status = match result {
			Ok(_) => success.to_string(),
			Err(err) => format!("error: {err}"),
		};
	}
}

struct ViewModel {
	event_days: HashSet<NaiveDate>,
	agenda: Vec<AgendaRow>,
	filter_rows: Vec<FilterRow>,
	filters_enabled: bool,
	memo: Option<String>,
	background: Option<String>,
	visible: usize,
	total: usize,
	summary: crate::summary::Summary,
}

#[derive(Debug, Clone)]
struct AgendaRow {
	task_id: String,
	candidate_index: Option<usize>,
	time: String,
	title: String,
	project_name: String,
	assignee_name: Option<String>,
	status: TaskStatus,
	task_type: TaskType,
	style: Style,
}

#[derive(Debug, Clone)]
struct FilterRow {
	label: String,
	value: Option<FilterValue>,
	active: bool,
}

impl FilterRow {
	fn header(label: &str) -> Self {
		Self {
			label: label.to_string(),
			value: None,
			active: false,
		}
	}

	fn toggle(label: &str, value: FilterValue, active: bool) -> Self {
		Self {
			label: label.to_string(),
			value: Some(value),
			active,
		}
	}
}

#[cfg(test)]
mod tests {
	use chrono::NaiveDate;
	use ratatui::style::Color;

	use super::{event_days_of, first_day_of_month, hex_color, shift_month, step};
	use crate::domain::{Directory, Task, TaskTime};
	use crate::filters::FilterState;
	use crate::projection::{DisplayOptions, project};

	fn day(raw: &str) -> NaiveDate {
		NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
	}

	#[test]
	fn hex_colors_become_rgb() {
		assert_eq!(hex_color("#3498db"), Some(Color::Rgb(0x34, 0x98, 0xdb)));
		assert_eq!(hex_color("3498db"), None);
		assert_eq!(hex_color("#34"), None);
	}

	#[test]
	fn ranged_events_cover_every_day() {
		let mut task = Task::draft("Trip", "p");
		task.id = "t".to_string();
		task.start = Some(TaskTime::parse("2024-03-10T09:00").unwrap());
		task.end = Some(TaskTime::parse("2024-03-12T18:00").unwrap());
		let events = project(
			&[task],
			&FilterState::default(),
			&Directory::default(),
			&DisplayOptions::default(),
		);
		assert_eq!(
			event_days_of(&events[0]),
			vec![day("2024-03-10"), day("2024-03-11"), day("2024-03-12")]
		);
	}

	#[test]
	fn month_navigation_clamps_days() {
		assert_eq!(shift_month(day("2024-01-31"), 1), day("2024-02-29"));
		assert_eq!(shift_month(day("2024-03-15"), -3), day("2023-12-15"));
		assert_eq!(first_day_of_month(day("2024-03-15")), day("2024-03-01"));
	}

	#[test]
	fn selection_steps_stay_in_bounds() {
		assert_eq!(step(0, -1, 3), 0);
		assert_eq!(step(2, 1, 3), 2);
		assert_eq!(step(5, 1, 0), 0);
	}
}
