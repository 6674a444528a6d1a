use std::collections::HashSet;
use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{Datelike, Duration, Local, NaiveDate};
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEventKind};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use crossterm::{ExecutableCommand, execute};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};

use crate::aggregate::{Hsl, category_color};
use crate::chart::ChartKind;
use crate::clock::{format_hours, format_tenths, format_time, round_ratio_tenths};
use crate::domain::{ActivityForm, date_id};
use crate::timeline::{Lane, Slot};
use crate::tracker::Submitted;
use crate::{AppTracker, remember};

const FOCUSED_PANEL_BORDER_COLOR: Color = Color::Yellow;
const INACTIVE_PANEL_BORDER_COLOR: Color = Color::DarkGray;
const HIGHLIGHT_BACKGROUND_COLOR: Color = Color::Rgb(42, 45, 52);
const BAR_WIDTH: usize = 18;

pub struct DashboardOptions {
	/// Where the signed-in identity is kept; `None` for ephemeral runs.
	pub state_dir: Option<PathBuf>,
	pub export_dir: PathBuf,
}

pub fn run_dashboard(tracker: &mut AppTracker, options: DashboardOptions) -> Result<(), Box<dyn Error>> {
	enable_raw_mode()?;
	let mut stdout = io::stdout();
	stdout.execute(EnterAlternateScreen)?;
	let backend = CrosstermBackend::new(stdout);
	let mut terminal = Terminal::new(backend)?;

	let result = run_event_loop(&mut terminal, tracker, &options);

	disable_raw_mode()?;
	execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
	terminal.show_cursor()?;

	result
}

fn run_event_loop(
	terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
	tracker: &mut AppTracker,
	options: &DashboardOptions,
) -> Result<(), Box<dyn Error>> {
	let today = Local::now().date_naive();
	let mut app = App::new(tracker.session().date().unwrap_or(today));
	if tracker.session().date().is_none() {
		tracker.select_date(app.selected_day)?;
	}
	app.refresh_recorded_days(tracker);

	loop {
		app.clamp_selection(tracker);
		terminal.draw(|frame| draw_dashboard(frame, &app, tracker))?;

		if event::poll(StdDuration::from_millis(250))? {
			if let CEvent::Key(key) = event::read()? {
				if key.kind != KeyEventKind::Press {
					continue;
				}

				let should_quit = match &app.mode {
					InputMode::Prompt(_) => handle_prompt_key(&mut app, key.code, tracker, options),
					InputMode::Select(_) => handle_select_key(&mut app, key.code, tracker),
					InputMode::Normal => handle_normal_key(&mut app, key.code, tracker, options),
				};

				if should_quit {
					break;
				}
			}
		}
	}

	Ok(())
}

fn draw_dashboard(frame: &mut Frame, app: &App, tracker: &AppTracker) {
	let layout = Layout::default()
		.direction(Direction::Vertical)
		.constraints([Constraint::Min(12), Constraint::Length(6), Constraint::Length(4)])
		.split(frame.area());

	let body = Layout::default()
		.direction(Direction::Horizontal)
		.constraints([
			Constraint::Percentage(26),
			Constraint::Percentage(40),
			Constraint::Percentage(34),
		])
		.split(layout[0]);

	let left = Layout::default()
		.direction(Direction::Vertical)
		.constraints([Constraint::Length(11), Constraint::Min(4)])
		.split(body[0]);

	render_calendar_panel(frame, left[0], app);
	render_filters_panel(frame, left[1], app, tracker);
	render_day_panel(frame, body[1], app, tracker);
	render_analysis_panel(frame, body[2], tracker);
	render_timeline_panel(frame, layout[1], app, tracker);
	render_footer(frame, layout[2], app, tracker);

	if let InputMode::Select(select) = &app.mode {
		render_select_popup(frame, select);
	}
}

fn render_calendar_panel(frame: &mut Frame, area: Rect, app: &App) {
	let month = app.calendar_month;
	let mut lines = Vec::new();
	lines.push(Line::from(format!("{} {}", month.format("%B"), month.year())));
	lines.push(Line::from("Mo Tu We Th Fr Sa Su"));

	let first_weekday = month.weekday().number_from_monday() as usize - 1;
	let days_in_month = days_in_month(month.year(), month.month());
	let mut day_counter = 1u32;
	for week in 0..6 {
		let mut spans = Vec::new();
		for weekday_index in 0..7 {
			let before_first = week == 0 && weekday_index < first_weekday;
			let after_last = day_counter > days_in_month;
			let Some(date) = NaiveDate::from_ymd_opt(month.year(), month.month(), day_counter)
				.filter(|_| !before_first && !after_last)
			else {
				spans.push(Span::raw("   "));
				continue;
			};

			let mut style = Style::default();
			if date == app.selected_day {
				style = style.fg(Color::Black).bg(Color::Yellow).add_modifier(Modifier::BOLD);
			} else if app.recorded_days.contains(&date) {
				style = style.fg(Color::LightYellow).add_modifier(Modifier::BOLD);
			}

			spans.push(Span::styled(format!("{:>2} ", day_counter), style));
			day_counter += 1;
		}
		lines.push(Line::from(spans));
	}

	let block = Block::default()
		.borders(Borders::ALL)
		.title("Calendar")
		.border_style(border_style(app.focus == FocusPane::Calendar));
	frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_filters_panel(frame: &mut Frame, area: Rect, app: &App, tracker: &AppTracker) {
	let filters = tracker.session().filters();
	let items = filters
		.entries()
		.iter()
		.map(|(category, visible)| {
			let mark = if *visible { "[x]" } else { "[ ]" };
			ListItem::new(format!("{mark} {category}"))
		})
		.collect::<Vec<_>>();

	let mut state = ListState::default();
	if !filters.is_empty() {
		state.select(Some(app.filter_index.min(filters.len() - 1)));
	}

	let block = Block::default()
		.borders(Borders::ALL)
		.title("Filters")
		.border_style(border_style(app.focus == FocusPane::Filters));
	let list = List::new(if items.is_empty() {
		vec![ListItem::new("(no categories)")]
	} else {
		items
	})
	.block(block)
	.highlight_style(Style::default().bg(HIGHLIGHT_BACKGROUND_COLOR).add_modifier(Modifier::BOLD));

	frame.render_stateful_widget(list, area, &mut state);
}

fn render_day_panel(frame: &mut Frame, area: Rect, app: &App, tracker: &AppTracker) {
	let session = tracker.session();
	let block = Block::default()
		.borders(Borders::ALL)
		.border_style(border_style(app.focus == FocusPane::Activities));

	let Some(identity) = session.identity() else {
		let lines = vec![
			Line::from("Not signed in."),
			Line::from(""),
			Line::from("l  log in"),
			Line::from("s  create an account"),
		];
		frame.render_widget(Paragraph::new(lines).block(block.title("Account")), area);
		return;
	};

	let Some(day) = session.day() else {
		frame.render_widget(Paragraph::new("(day not loaded)").block(block.title(identity.email.clone())), area);
		return;
	};

	let mut items = day
		.activities
		.iter()
		.map(|activity| {
			let start = match format_time(activity.start_min()) {
				start if start.is_empty() => "--:--".to_string(),
				start => start,
			};
			let editing = session.editing() == Some(activity.id.as_str());
			let mut spans = vec![
				Span::styled(format!("{start} "), Style::default().fg(Color::DarkGray)),
				Span::raw(format!("{} | {} min | ", activity.title, activity.minutes)),
				Span::styled(activity.category.clone(), hsl_style(category_color(&activity.category))),
			];
			if editing {
				spans.push(Span::styled(" (editing)", Style::default().fg(Color::Yellow)));
			}
			ListItem::new(Line::from(spans))
		})
		.collect::<Vec<_>>();
	if items.is_empty() {
		items.push(ListItem::new("No activities for this date."));
	}

	let mut state = ListState::default();
	if !day.activities.is_empty() {
		state.select(Some(app.activity_index.min(day.activities.len() - 1)));
	}

	let title = format!(
		"{} | total {} | remaining {} min",
		day.key.date.format("%A, %d %B %Y"),
		format_hours(day.total_minutes),
		day.remaining_minutes()
	);
	let list = List::new(items)
		.block(block.title(title))
		.highlight_style(Style::default().bg(HIGHLIGHT_BACKGROUND_COLOR).add_modifier(Modifier::BOLD));

	frame.render_stateful_widget(list, area, &mut state);
}

fn render_analysis_panel(frame: &mut Frame, area: Rect, tracker: &AppTracker) {
	let block = Block::default().borders(Borders::ALL).title("Analysis");
	let Some(analysis) = tracker.session().analysis() else {
		frame.render_widget(Paragraph::new("Press Enter to analyse the day.").block(block), area);
		return;
	};

	let chart = &analysis.chart;
	let total = chart.total();
	let max = chart.values.iter().copied().max().unwrap_or(0).max(1);
	let mut lines = Vec::new();
	lines.push(Line::from("Share"));
	for ((label, value), color) in chart.labels.iter().zip(&chart.values).zip(&chart.colors) {
		let pct = round_ratio_tenths(*value as i64 * 100, total as i64);
		lines.push(Line::from(vec![
			Span::styled("■ ", hsl_style(*color)),
			Span::raw(format!("{label} {}%", format_tenths(pct))),
		]));
	}

	lines.push(Line::from(""));
	lines.push(Line::from("Minutes"));
	for ((label, value), color) in chart.labels.iter().zip(&chart.values).zip(chart.bar_colors()) {
		let width = ((*value as f64 / max as f64) * BAR_WIDTH as f64).round() as usize;
		lines.push(Line::from(vec![
			Span::raw(format!("{:<10.10} {:>5} ", label, value)),
			Span::styled("=".repeat(width.max(1)), hsl_style(color)),
		]));
	}

	lines.push(Line::from(""));
	lines.extend(analysis.summary.lines().map(|line| Line::from(line.to_string())));

	let panel = Paragraph::new(lines).block(block).wrap(Wrap { trim: false });
	frame.render_widget(panel, area);
}

fn render_timeline_panel(frame: &mut Frame, area: Rect, app: &App, tracker: &AppTracker) {
	let block = Block::default()
		.borders(Borders::ALL)
		.title("Timeline")
		.border_style(border_style(app.focus == FocusPane::Timeline));
	let inner_width = area.width.saturating_sub(2) as usize;

	let Some(analysis) = tracker.session().analysis() else {
		frame.render_widget(Paragraph::new("(analyse to see the timeline)").block(block), area);
		return;
	};

	let selected = analysis
		.slots
		.get(app.slot_index)
		.map(|slot| slot.activity_id.as_str());
	let track = analysis
		.slots
		.iter()
		.filter(|slot| slot.lane == Lane::Track)
		.collect::<Vec<_>>();
	let bottom = analysis
		.slots
		.iter()
		.filter(|slot| slot.lane == Lane::Bottom)
		.collect::<Vec<_>>();

	let lines = vec![
		hour_ruler(inner_width),
		timeline_row(&track, selected, inner_width),
		Line::from(""),
		timeline_row(&bottom, selected, inner_width),
	];
	frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn hour_ruler(width: usize) -> Line<'static> {
	let mut ruler = vec![' '; width];
	for hour in [0u32, 6, 12, 18] {
		let column = (hour as usize * width) / 24;
		for (offset, digit) in hour.to_string().chars().enumerate() {
			if let Some(cell) = ruler.get_mut(column + offset) {
				*cell = digit;
			}
		}
	}
	Line::styled(ruler.into_iter().collect::<String>(), Style::default().fg(Color::DarkGray))
}

fn timeline_row(slots: &[&Slot], selected: Option<&str>, width: usize) -> Line<'static> {
	let mut cells = vec![(' ', Style::default()); width];
	for slot in slots {
		let (start, end) = slot_columns(slot.left_pct, slot.width_pct, width);
		let (red, green, blue) = slot.color.rgb();
		let mut style = Style::default().fg(Color::Black).bg(Color::Rgb(red, green, blue));
		if selected == Some(slot.activity_id.as_str()) {
			style = style.add_modifier(Modifier::BOLD | Modifier::UNDERLINED);
		}

		let mut label = slot.title.chars();
		for cell in cells.iter_mut().take(end).skip(start) {
			*cell = (label.next().unwrap_or(' '), style);
		}
	}

	Line::from(
		cells
			.into_iter()
			.map(|(glyph, style)| Span::styled(glyph.to_string(), style))
			.collect::<Vec<_>>(),
	)
}

/// Maps a percent placement to a half-open column range of at least one cell.
fn slot_columns(left_pct: f64, width_pct: f64, width: usize) -> (usize, usize) {
	if width == 0 {
		return (0, 0);
	}
	let start = ((left_pct / 100.0) * width as f64).floor() as usize;
	let start = start.min(width - 1);
	let end = (((left_pct + width_pct) / 100.0) * width as f64).round() as usize;
	(start, end.clamp(start + 1, width))
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App, tracker: &AppTracker) {
	let footer_lines = match &app.mode {
		InputMode::Normal if tracker.identity().is_none() => vec![
			Line::from("l log in | s sign up | arrows/hjkl pick a day | n/N month | q quit"),
			Line::from(""),
			Line::from(app.status.clone()),
		],
		InputMode::Normal => vec![
			Line::from("Tab pane | arrows/hjkl navigate | n/N month | Enter analyse (timeline: move) | q quit"),
			Line::from(
				"a add | e edit | c cancel edit | d delete | t re-time | space toggle filter | i improve | y save summary | x export | R reconcile | o log out",
			),
			Line::from(app.status.clone()),
		],
		InputMode::Prompt(prompt) => vec![
			Line::from(prompt.title.clone()),
			Line::from(format!("> {}", prompt.display_input())),
			Line::from("Enter submit | Esc cancel"),
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
		],
	};

	let footer = Paragraph::new(footer_lines).block(Block::default().borders(Borders::ALL).title("Shortcuts"));
	frame.render_widget(footer, area);
}

fn render_select_popup(frame: &mut Frame, select: &SelectState) {
	let area = centered_rect(50, 30, frame.area());
	frame.render_widget(Clear, area);

	let items = select
		.options
		.iter()
		.map(|option| ListItem::new(option.label.clone()))
		.collect::<Vec<_>>();
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

fn handle_normal_key(app: &mut App, code: KeyCode, tracker: &mut AppTracker, options: &DashboardOptions) -> bool {
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
				FocusPane::Calendar => app.shift_selected_day(-7, tracker),
				FocusPane::Activities => app.activity_index = app.activity_index.saturating_sub(1),
				FocusPane::Filters => app.filter_index = app.filter_index.saturating_sub(1),
				FocusPane::Timeline => app.slot_index = app.slot_index.saturating_sub(1),
			}
			false
		}
		KeyCode::Down | KeyCode::Char('j') => {
			match app.focus {
				FocusPane::Calendar => app.shift_selected_day(7, tracker),
				FocusPane::Activities => app.activity_index += 1,
				FocusPane::Filters => app.filter_index += 1,
				FocusPane::Timeline => app.slot_index += 1,
			}
			false
		}
		KeyCode::Left | KeyCode::Char('h') => {
			match app.focus {
				FocusPane::Calendar => app.shift_selected_day(-1, tracker),
				FocusPane::Timeline => app.slot_index = app.slot_index.saturating_sub(1),
				FocusPane::Activities | FocusPane::Filters => {}
			}
			false
		}
		KeyCode::Char('l') if tracker.identity().is_none() => {
			app.mode = InputMode::Prompt(PromptState::new("Email", PromptKind::Email { signup: false }));
			false
		}
		KeyCode::Right | KeyCode::Char('l') => {
			match app.focus {
				FocusPane::Calendar => app.shift_selected_day(1, tracker),
				FocusPane::Timeline => app.slot_index += 1,
				FocusPane::Activities | FocusPane::Filters => {}
			}
			false
		}
		KeyCode::Char('n') => {
			app.shift_selected_month(1, tracker);
			false
		}
		KeyCode::Char('N') => {
			app.shift_selected_month(-1, tracker);
			false
		}
		KeyCode::Char('s') if tracker.identity().is_none() => {
			app.mode = InputMode::Prompt(PromptState::new("Email", PromptKind::Email { signup: true }));
			false
		}
		KeyCode::Char('s') => {
			app.status = "You are already logged in. Logout first to create a new account.".to_string();
			false
		}
		KeyCode::Char('o') => {
			match tracker.sign_out() {
				Ok(()) => {
					app.status = persist_identity(tracker, options, "signed out");
					app.reset_selection();
					app.refresh_recorded_days(tracker);
				}
				Err(err) => app.status = format!("error: {err}"),
			}
			false
		}
		KeyCode::Char('a') => {
			tracker.cancel_edit();
			app.mode = InputMode::Prompt(PromptState::new(
				"Title",
				PromptKind::FormTitle {
					form: ActivityForm::default(),
				},
			));
			false
		}
		KeyCode::Char('e') => {
			match app.selected_activity_id(tracker) {
				Some(id) => match tracker.begin_edit(&id) {
					Some(form) => {
						app.mode = InputMode::Prompt(PromptState::with_input(
							"Title",
							form.title.clone(),
							PromptKind::FormTitle { form },
						));
					}
					None => app.status = "activity no longer exists".to_string(),
				},
				None => app.status = "Select an activity first".to_string(),
			}
			false
		}
		KeyCode::Char('c') => {
			tracker.cancel_edit();
			app.status = "Edit cancelled".to_string();
			false
		}
		KeyCode::Char('d') => {
			match app.selected_activity(tracker) {
				Some((id, title)) => app.mode = InputMode::Select(build_delete_select(id, title)),
				None => app.status = "Select an activity first".to_string(),
			}
			false
		}
		KeyCode::Char('t') => {
			let target = match app.focus {
				FocusPane::Timeline => app
					.selected_slot(tracker)
					.filter(|slot| slot.is_movable())
					.map(|slot| slot.activity_id.clone()),
				_ => app.selected_activity_id(tracker),
			};
			open_move_prompt(app, tracker, target);
			false
		}
		KeyCode::Enter if app.focus == FocusPane::Timeline => {
			let target = app
				.selected_slot(tracker)
				.filter(|slot| slot.is_movable())
				.map(|slot| slot.activity_id.clone());
			open_move_prompt(app, tracker, target);
			false
		}
		KeyCode::Enter => {
			app.status = match tracker.analyse() {
				Ok(analysis) => format!("analysed {} categories", analysis.chart.labels.len()),
				Err(err) => format!("error: {err}"),
			};
			false
		}
		KeyCode::Char(' ') if app.focus == FocusPane::Filters => {
			let category = tracker
				.session()
				.filters()
				.entries()
				.get(app.filter_index)
				.map(|(category, _)| category.clone());
			if let Some(category) = category {
				app.status = match tracker.toggle_filter(&category) {
					Ok(Some(true)) => format!("showing {category}"),
					Ok(Some(false)) => format!("hiding {category}"),
					Ok(None) => format!("unknown category {category}"),
					Err(err) => format!("error: {err}"),
				};
			}
			false
		}
		KeyCode::Char('i') => {
			app.status = match tracker.improve_summary() {
				Ok(_) => "summary improved".to_string(),
				Err(err) => format!("error: {err}"),
			};
			false
		}
		KeyCode::Char('y') => {
			app.status = save_summary(tracker, options).unwrap_or_else(|err| format!("error: {err}"));
			false
		}
		KeyCode::Char('x') => {
			app.status = export_chart(tracker, options).unwrap_or_else(|err| format!("error: {err}"));
			false
		}
		KeyCode::Char('R') => {
			app.status = match tracker.reconcile() {
				Ok(total) => format!("day total set to {total} min"),
				Err(err) => format!("error: {err}"),
			};
			app.refresh_recorded_days(tracker);
			false
		}
		_ => false,
	}
}

fn open_move_prompt(app: &mut App, tracker: &AppTracker, target: Option<String>) {
	let Some(id) = target else {
		app.status = "Select a scheduled activity first".to_string();
		return;
	};
	let current = tracker
		.session()
		.day()
		.and_then(|day| day.activity(&id))
		.map(|activity| format_time(activity.start_min()))
		.unwrap_or_default();
	app.mode = InputMode::Prompt(PromptState::with_input(
		"Enter new start time (HH:MM)",
		current,
		PromptKind::MoveStart { id },
	));
}

fn handle_prompt_key(app: &mut App, code: KeyCode, tracker: &mut AppTracker, options: &DashboardOptions) -> bool {
	match code {
		KeyCode::Esc => {
			if let InputMode::Prompt(prompt) = &app.mode {
				if prompt.kind.is_form() {
					tracker.cancel_edit();
				}
			}
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

			match submit_prompt(prompt.clone(), tracker, options) {
				Ok(PromptOutcome::NextPrompt(next_prompt)) => app.mode = InputMode::Prompt(next_prompt),
				Ok(PromptOutcome::Done(message)) => {
					app.mode = InputMode::Normal;
					app.status = message;
					app.refresh_recorded_days(tracker);
				}
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

fn handle_select_key(app: &mut App, code: KeyCode, tracker: &mut AppTracker) -> bool {
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

			match submit_select(select.clone(), tracker) {
				Ok(message) => {
					app.status = message;
					app.refresh_recorded_days(tracker);
				}
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
	tracker: &mut AppTracker,
	options: &DashboardOptions,
) -> Result<PromptOutcome, String> {
	let input = prompt.input;
	match prompt.kind {
		PromptKind::Email { signup } => Ok(PromptOutcome::NextPrompt(PromptState::masked(
			"Password",
			PromptKind::Password { signup, email: input },
		))),
		PromptKind::Password { signup, email } => {
			let result = if signup {
				tracker.sign_up(&email, &input)
			} else {
				tracker.sign_in(&email, &input)
			};
			let identity = result.map_err(|err| err.to_string())?;
			let message = if signup {
				format!("Account created! signed in as {}", identity.email)
			} else {
				format!("signed in as {}", identity.email)
			};
			Ok(PromptOutcome::Done(persist_identity(tracker, options, &message)))
		}
		PromptKind::FormTitle { mut form } => {
			form.title = input;
			let category = form.category.clone();
			Ok(PromptOutcome::NextPrompt(PromptState::with_input(
				"Category (blank for Other)",
				category,
				PromptKind::FormCategory { form },
			)))
		}
		PromptKind::FormCategory { mut form } => {
			form.category = input;
			let minutes = form.minutes.clone();
			Ok(PromptOutcome::NextPrompt(PromptState::with_input(
				"Minutes",
				minutes,
				PromptKind::FormMinutes { form },
			)))
		}
		PromptKind::FormMinutes { mut form } => {
			form.minutes = input;
			let start = form.start.clone();
			Ok(PromptOutcome::NextPrompt(PromptState::with_input(
				"Start time HH:MM (blank for unscheduled)",
				start,
				PromptKind::FormStart { form },
			)))
		}
		PromptKind::FormStart { mut form } => {
			form.start = input;
			match tracker.submit(&form).map_err(|err| err.to_string())? {
				Submitted::Added(id) => Ok(PromptOutcome::Done(format!("added {} ({id})", form.title.trim()))),
				Submitted::Updated(id) => Ok(PromptOutcome::Done(format!("updated {} ({id})", form.title.trim()))),
			}
		}
		PromptKind::MoveStart { id } => {
			let moved = tracker.move_start(&id, &input).map_err(|err| err.to_string())?;
			if moved {
				Ok(PromptOutcome::Done(format!("moved to {}", input.trim())))
			} else {
				Ok(PromptOutcome::Done("start time unchanged".to_string()))
			}
		}
	}
}

fn submit_select(select: SelectState, tracker: &mut AppTracker) -> Result<String, String> {
	let confirmed = select
		.selected_option()
		.map(|option| option.confirm)
		.ok_or_else(|| "no option selected".to_string())?;

	match select.kind {
		SelectKind::DeleteConfirm { id, title } => {
			if !confirmed {
				return Ok("Delete cancelled".to_string());
			}
			let deleted = tracker.delete(&id).map_err(|err| err.to_string())?;
			Ok(if deleted {
				format!("deleted {title}")
			} else {
				format!("{title} was already gone")
			})
		}
	}
}

fn build_delete_select(id: String, title: String) -> SelectState {
	SelectState::new(
		format!("Delete {title}?"),
		SelectKind::DeleteConfirm { id, title },
		vec![SelectOption::new("Keep", false), SelectOption::new("Delete", true)],
	)
}

fn export_chart(tracker: &AppTracker, options: &DashboardOptions) -> Result<String, Box<dyn Error>> {
	let export = tracker.export(ChartKind::Doughnut)?;
	fs::create_dir_all(&options.export_dir)?;
	let path = options.export_dir.join(&export.file_name);
	fs::write(&path, &export.png)?;
	Ok(format!("wrote {}", path.display()))
}

fn save_summary(tracker: &AppTracker, options: &DashboardOptions) -> Result<String, Box<dyn Error>> {
	let session = tracker.session();
	let (Some(date), Some(analysis)) = (session.date(), session.analysis()) else {
		return Err("Analyse first.".into());
	};
	let path = write_summary(&options.export_dir, date, &analysis.summary)?;
	Ok(format!("summary saved to {}", path.display()))
}

fn write_summary(dir: &Path, date: NaiveDate, text: &str) -> io::Result<PathBuf> {
	fs::create_dir_all(dir)?;
	let path = dir.join(format!("summary-{}.txt", date_id(date)));
	fs::write(&path, format!("{text}\n"))?;
	Ok(path)
}

fn persist_identity(tracker: &AppTracker, options: &DashboardOptions, message: &str) -> String {
	let Some(state_dir) = &options.state_dir else {
		return message.to_string();
	};
	match remember(true, state_dir, tracker) {
		Ok(()) => message.to_string(),
		Err(err) => format!("{message} (warning: failed to store session: {err})"),
	}
}

fn hsl_style(color: Hsl) -> Style {
	let (red, green, blue) = color.rgb();
	Style::default().fg(Color::Rgb(red, green, blue))
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

fn days_in_month(year: i32, month: u32) -> u32 {
	let first_of_next = if month == 12 {
		NaiveDate::from_ymd_opt(year + 1, 1, 1)
	} else {
		NaiveDate::from_ymd_opt(year, month + 1, 1)
	};
	first_of_next
		.and_then(|date| date.pred_opt())
		.map(|date| date.day())
		.unwrap_or(28)
}

fn first_day_of_month(day: NaiveDate) -> NaiveDate {
	day.with_day(1).unwrap_or(day)
}

fn shift_month(day: NaiveDate, delta: i32) -> NaiveDate {
	let mut year = day.year();
	let mut month = day.month() as i32 + delta;
	while month > 12 {
		year += 1;
		month -= 12;
	}
	while month < 1 {
		year -= 1;
		month += 12;
	}
	let month_u32 = month as u32;
	let target_day = day.day().min(days_in_month(year, month_u32));
	NaiveDate::from_ymd_opt(year, month_u32, target_day).unwrap_or(day)
}

#[derive(Debug, Clone)]
enum PromptOutcome {
	NextPrompt(PromptState),
	Done(String),
}

#[derive(Debug, Clone)]
struct PromptState {
	title: String,
	input: String,
	masked: bool,
	kind: PromptKind,
}

impl PromptState {
	fn new(title: impl Into<String>, kind: PromptKind) -> Self {
		Self::with_input(title, String::new(), kind)
	}

	fn with_input(title: impl Into<String>, input: String, kind: PromptKind) -> Self {
		Self {
			title: title.into(),
			input,
			masked: false,
			kind,
		}
	}

	fn masked(title: impl Into<String>, kind: PromptKind) -> Self {
		Self {
			masked: true,
			..Self::new(title, kind)
		}
	}

	fn display_input(&self) -> String {
		if self.masked {
			"*".repeat(self.input.chars().count())
		} else {
			self.input.clone()
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
		if self.options.is_empty() {
			self.selected = 0;
			return;
		}

		if delta > 0 {
			self.selected = (self.selected + delta as usize).min(self.options.len() - 1);
		} else {
			self.selected = self.selected.saturating_sub(delta.unsigned_abs() as usize);
		}
	}

	fn selected_option(&self) -> Option<&SelectOption> {
		self.options.get(self.selected)
	}
}

#[derive(Debug, Clone)]
struct SelectOption {
	label: String,
	confirm: bool,
}

impl SelectOption {
	fn new(label: impl Into<String>, confirm: bool) -> Self {
		Self {
			label: label.into(),
			confirm,
		}
	}
}

#[derive(Debug, Clone)]
enum PromptKind {
	Email { signup: bool },
	Password { signup: bool, email: String },
	FormTitle { form: ActivityForm },
	FormCategory { form: ActivityForm },
	FormMinutes { form: ActivityForm },
	FormStart { form: ActivityForm },
	MoveStart { id: String },
}

impl PromptKind {
	fn is_form(&self) -> bool {
		matches!(
			self,
			PromptKind::FormTitle { .. }
				| PromptKind::FormCategory { .. }
				| PromptKind::FormMinutes { .. }
				| PromptKind::FormStart { .. }
		)
	}
}

#[derive(Debug, Clone)]
enum SelectKind {
	DeleteConfirm { id: String, title: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FocusPane {
	Calendar,
	Activities,
	Filters,
	Timeline,
}

impl FocusPane {
	fn next(self) -> Self {
		match self {
			FocusPane::Calendar => FocusPane::Activities,
			FocusPane::Activities => FocusPane::Filters,
			FocusPane::Filters => FocusPane::Timeline,
			FocusPane::Timeline => FocusPane::Calendar,
		}
	}

	fn prev(self) -> Self {
		match self {
			FocusPane::Calendar => FocusPane::Timeline,
			FocusPane::Activities => FocusPane::Calendar,
			FocusPane::Filters => FocusPane::Activities,
			FocusPane::Timeline => FocusPane::Filters,
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
	selected_day: NaiveDate,
	calendar_month: NaiveDate,
	recorded_days: HashSet<NaiveDate>,
	activity_index: usize,
	filter_index: usize,
	slot_index: usize,
	mode: InputMode,
	status: String,
}

impl App {
	fn new(selected_day: NaiveDate) -> Self {
		Self {
			focus: FocusPane::Activities,
			selected_day,
			calendar_month: first_day_of_month(selected_day),
			recorded_days: HashSet::new(),
			activity_index: 0,
			filter_index: 0,
			slot_index: 0,
			mode: InputMode::Normal,
			status: "Ready".to_string(),
		}
	}

	fn clamp_selection(&mut self, tracker: &AppTracker) {
		let session = tracker.session();
		let activities = session.day().map(|day| day.activities.len()).unwrap_or(0);
		self.activity_index = self.activity_index.min(activities.saturating_sub(1));
		self.filter_index = self.filter_index.min(session.filters().len().saturating_sub(1));
		let slots = session.analysis().map(|analysis| analysis.slots.len()).unwrap_or(0);
		self.slot_index = self.slot_index.min(slots.saturating_sub(1));
	}

	fn reset_selection(&mut self) {
		self.activity_index = 0;
		self.filter_index = 0;
		self.slot_index = 0;
	}

	fn shift_selected_day(&mut self, delta_days: i64, tracker: &mut AppTracker) {
		self.select_day(self.selected_day + Duration::days(delta_days), tracker);
	}

	fn shift_selected_month(&mut self, delta_months: i32, tracker: &mut AppTracker) {
		self.select_day(shift_month(self.selected_day, delta_months), tracker);
	}

	fn select_day(&mut self, day: NaiveDate, tracker: &mut AppTracker) {
		self.selected_day = day;
		self.calendar_month = first_day_of_month(day);
		self.reset_selection();
		if let Err(err) = tracker.select_date(day) {
			self.status = format!("error: {err}");
		}
	}

	fn refresh_recorded_days(&mut self, tracker: &AppTracker) {
		self.recorded_days = match tracker.recorded_days() {
			Ok(days) => days.into_iter().map(|(date, _)| date).collect(),
			Err(_) => HashSet::new(),
		};
	}

	fn selected_activity(&self, tracker: &AppTracker) -> Option<(String, String)> {
		tracker
			.session()
			.day()?
			.activities
			.get(self.activity_index)
			.map(|activity| (activity.id.clone(), activity.title.clone()))
	}

	fn selected_activity_id(&self, tracker: &AppTracker) -> Option<String> {
		self.selected_activity(tracker).map(|(id, _)| id)
	}

	fn selected_slot<'a>(&self, tracker: &'a AppTracker) -> Option<&'a Slot> {
		tracker.session().analysis()?.slots.get(self.slot_index)
	}
}

#[cfg(test)]
mod tests {
	use chrono::NaiveDate;
	use tempfile::tempdir;

	use super::{shift_month, slot_columns, write_summary};

	#[test]
	fn maps_percentages_to_columns() {
		assert_eq!(slot_columns(0.0, 50.0, 100), (0, 50));
		assert_eq!(slot_columns(25.0, 2.0, 100), (25, 27));
		// Always at least one cell, never past the edge.
		assert_eq!(slot_columns(99.9, 2.0, 10), (9, 10));
		assert_eq!(slot_columns(10.0, 0.1, 10), (1, 2));
		assert_eq!(slot_columns(10.0, 5.0, 0), (0, 0));
	}

	#[test]
	fn shifts_months_clamping_the_day() {
		let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).expect("valid date");
		assert_eq!(shift_month(date(2026, 1, 31), 1), date(2026, 2, 28));
		assert_eq!(shift_month(date(2026, 1, 15), -1), date(2025, 12, 15));
		assert_eq!(shift_month(date(2026, 11, 30), 3), date(2027, 2, 28));
	}

	#[test]
	fn writes_summary_next_to_exports() {
		let dir = tempdir().expect("temp dir");
		let out = dir.path().join("exports");
		let date = NaiveDate::from_ymd_opt(2026, 4, 1).expect("valid date");

		let path = write_summary(&out, date, "On 2026-04-01, you logged 120 minutes (2.0h).").expect("write summary");
		assert_eq!(path, out.join("summary-2026-04-01.txt"));
		let saved = std::fs::read_to_string(&path).expect("read summary");
		assert_eq!(saved, "On 2026-04-01, you logged 120 minutes (2.0h).\n");

		write_summary(&out, date, "replaced").expect("overwrite summary");
		assert_eq!(std::fs::read_to_string(&path).expect("read summary"), "replaced\n");
	}
}
