mod aggregate;
mod auth;
mod chart;
mod clock;
mod config;
mod day_store;
mod domain;
mod error;
mod repository;
mod session;
mod state;
mod storage;
mod summary;
mod timeline;
mod tracker;
mod ui;

use std::env;
use std::error::Error;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::auth::LocalAuth;
use crate::chart::{BitmapCharts, ChartKind};
use crate::clock::{format_hours, format_time};
use crate::config::{Config, ConfigSource};
use crate::day_store::DayStore;
use crate::domain::{ActivityForm, date_id, parse_date_id};
use crate::error::TrackerError;
use crate::state::{LOG_FILE, absolutize, clear_identity, load_identity, save_identity, state_dir};
use crate::storage::{DocumentStore, FileStore, MemoryStore};
use crate::tracker::{Submitted, Tracker};
use crate::ui::{DashboardOptions, run_dashboard};

pub type SharedStore = Arc<dyn DocumentStore + Send + Sync>;
pub type AppTracker = Tracker<SharedStore, LocalAuth<SharedStore>, BitmapCharts>;

#[derive(Debug, Parser)]
#[command(name = "daylog", about = "Daily time tracker with a 24-hour budget")]
struct Cli {
	/// Directory holding the document store.
	#[arg(long, global = true)]
	data_dir: Option<PathBuf>,
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	/// Keep everything in memory for this run only.
	#[arg(long, global = true)]
	ephemeral: bool,
	/// Day to work on (YYYY-MM-DD); defaults to today.
	#[arg(long, global = true)]
	date: Option<String>,
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	Signup {
		#[arg(long)]
		email: String,
		#[arg(long)]
		password: String,
	},
	Login {
		#[arg(long)]
		email: String,
		#[arg(long)]
		password: String,
	},
	Logout,
	Whoami,
	Show,
	Add {
		#[arg(long)]
		title: String,
		#[arg(long)]
		minutes: String,
		#[arg(long)]
		category: Option<String>,
		/// Start time as HH:MM.
		#[arg(long)]
		start: Option<String>,
	},
	Update {
		#[arg(long)]
		id: String,
		#[arg(long)]
		title: Option<String>,
		#[arg(long)]
		minutes: Option<String>,
		#[arg(long)]
		category: Option<String>,
		#[arg(long, conflicts_with = "unscheduled")]
		start: Option<String>,
		#[arg(long)]
		unscheduled: bool,
	},
	Delete {
		#[arg(long)]
		id: String,
	},
	Move {
		#[arg(long)]
		id: String,
		#[arg(long)]
		start: String,
	},
	Analyse {
		/// Category to leave out; may be repeated.
		#[arg(long)]
		hide: Vec<String>,
		#[arg(long)]
		improve: bool,
	},
	Export {
		#[arg(long)]
		output: Option<PathBuf>,
		#[arg(long)]
		hide: Vec<String>,
		/// Export the bar chart instead of the doughnut.
		#[arg(long)]
		bar: bool,
	},
	Reconcile,
	Days,
	Dashboard,
}

fn main() {
	if let Err(err) = run() {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}

fn run() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	let state_dir = state_dir();
	let config = ConfigSource::resolve(cli.config.clone(), env::var_os("DAYLOG_CONFIG"), &state_dir).load()?;
	init_logging(&state_dir, &config)?;

	let persist = !cli.ephemeral;
	let store: SharedStore = if cli.ephemeral {
		Arc::new(MemoryStore::new())
	} else {
		let data_dir = match cli.data_dir.clone() {
			Some(path) => absolutize(path),
			None => config.data_dir(env::var_os("DAYLOG_DATA_DIR"), &state_dir),
		};
		info!(data_dir = %data_dir.display(), "using file store");
		Arc::new(FileStore::new(data_dir))
	};

	let mut auth = LocalAuth::new(Arc::clone(&store));
	if persist {
		if let Some(identity) = load_identity(&state_dir)? {
			if !auth.restore(&identity)? {
				clear_identity(&state_dir)?;
			}
		}
	}

	let today = Local::now().date_naive();
	let mut tracker = Tracker::new(DayStore::new(Arc::clone(&store)), auth, BitmapCharts::default(), today)?;
	if let Some(raw) = cli.date.as_deref() {
		tracker.select_date(parse_day(raw)?)?;
	}

	match cli.command.unwrap_or(Command::Dashboard) {
		Command::Signup { email, password } => {
			let identity = tracker.sign_up(&email, &password)?;
			remember(persist, &state_dir, &tracker)?;
			println!("Account created! signed in as {}", identity.email);
		}
		Command::Login { email, password } => {
			let identity = tracker.sign_in(&email, &password)?;
			remember(persist, &state_dir, &tracker)?;
			println!("signed in as {}", identity.email);
		}
		Command::Logout => {
			tracker.sign_out()?;
			remember(persist, &state_dir, &tracker)?;
			println!("signed out");
		}
		Command::Whoami => match tracker.identity() {
			Some(identity) => println!("{} ({})", identity.email, identity.uid),
			None => println!("not signed in"),
		},
		Command::Show => {
			tracker.reload()?;
			print_day(&tracker);
		}
		Command::Add {
			title,
			minutes,
			category,
			start,
		} => {
			let form = ActivityForm {
				title,
				category: category.unwrap_or_default(),
				minutes,
				start: start.unwrap_or_default(),
			};
			if let Submitted::Added(id) = tracker.submit(&form)? {
				println!("added activity {id}");
			}
			print_day(&tracker);
		}
		Command::Update {
			id,
			title,
			minutes,
			category,
			start,
			unscheduled,
		} => {
			tracker.reload()?;
			let mut form = tracker
				.begin_edit(&id)
				.ok_or_else(|| TrackerError::validation(format!("no activity {id} on this day")))?;
			if let Some(title) = title {
				form.title = title;
			}
			if let Some(minutes) = minutes {
				form.minutes = minutes;
			}
			if let Some(category) = category {
				form.category = category;
			}
			if let Some(start) = start {
				form.start = start;
			}
			if unscheduled {
				form.start.clear();
			}
			tracker.submit(&form)?;
			println!("updated activity {id}");
			print_day(&tracker);
		}
		Command::Delete { id } => {
			if tracker.delete(&id)? {
				println!("deleted activity {id}");
			} else {
				println!("nothing to delete");
			}
			print_day(&tracker);
		}
		Command::Move { id, start } => {
			if tracker.move_start(&id, &start)? {
				println!("moved activity {id} to {}", start.trim());
			}
			print_day(&tracker);
		}
		Command::Analyse { hide, improve } => {
			analyse(&mut tracker, &hide)?;
			if improve {
				tracker.improve_summary()?;
			}
			print_analysis(&tracker);
		}
		Command::Export { output, hide, bar } => {
			analyse(&mut tracker, &hide)?;
			let kind = if bar { ChartKind::Bar } else { ChartKind::Doughnut };
			let export = tracker.export(kind)?;
			let path = output.unwrap_or_else(|| config.export_dir().join(&export.file_name));
			write_export(&path, &export.png)?;
			println!("wrote {}", path.display());
		}
		Command::Reconcile => {
			let total = tracker.reconcile()?;
			println!("day total set to {total} min ({})", format_hours(total));
		}
		Command::Days => print_recorded_days(&tracker)?,
		Command::Dashboard => {
			run_dashboard(
				&mut tracker,
				DashboardOptions {
					state_dir: persist.then(|| state_dir.clone()),
					export_dir: config.export_dir(),
				},
			)?;
		}
	}

	Ok(())
}

fn init_logging(state_dir: &Path, config: &Config) -> Result<(), Box<dyn Error>> {
	fs::create_dir_all(state_dir)?;
	let file = OpenOptions::new()
		.create(true)
		.append(true)
		.open(state_dir.join(LOG_FILE))?;
	let filter = EnvFilter::try_new(config.log_filter(env::var("DAYLOG_LOG").ok()))?;

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(Mutex::new(file))
		.with_ansi(false)
		.init();
	Ok(())
}

/// Keeps the state-dir session file in step with the signed-in identity.
pub fn remember(persist: bool, state_dir: &Path, tracker: &AppTracker) -> std::io::Result<()> {
	if !persist {
		return Ok(());
	}
	match tracker.identity() {
		Some(identity) => save_identity(state_dir, identity),
		None => clear_identity(state_dir),
	}
}

fn parse_day(raw: &str) -> Result<NaiveDate, Box<dyn Error>> {
	parse_date_id(raw).ok_or_else(|| format!("invalid date '{raw}', expected YYYY-MM-DD").into())
}

fn analyse(tracker: &mut AppTracker, hide: &[String]) -> Result<(), Box<dyn Error>> {
	tracker.reload()?;
	for category in hide {
		if !tracker.set_filter(category, false)? {
			eprintln!("warning: no category named {category} on this day");
		}
	}
	tracker.analyse()?;
	Ok(())
}

fn write_export(path: &Path, png: &[u8]) -> std::io::Result<()> {
	if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
		fs::create_dir_all(parent)?;
	}
	fs::write(path, png)
}

fn print_day(tracker: &AppTracker) {
	let Some(day) = tracker.session().day() else {
		println!("no day loaded");
		return;
	};

	println!(
		"{} | total {} min ({}) | remaining {} min",
		date_id(day.key.date),
		day.total_minutes,
		format_hours(day.total_minutes),
		day.remaining_minutes()
	);
	if day.activities.is_empty() {
		println!("No activities for this date.");
		return;
	}

	for activity in &day.activities {
		let start = match format_time(activity.start_min()) {
			start if start.is_empty() => "--:--".to_string(),
			start => start,
		};
		println!(
			"{} | {} | {} | {} min | {}",
			activity.id, start, activity.title, activity.minutes, activity.category
		);
	}
}

fn print_analysis(tracker: &AppTracker) {
	let Some(analysis) = tracker.session().analysis() else {
		println!("nothing analysed");
		return;
	};

	println!("by category:");
	let chart = &analysis.chart;
	for ((label, value), color) in chart.labels.iter().zip(&chart.values).zip(&chart.colors) {
		println!("{} | {} min | {} | {}", format_hours(*value as i64), value, label, color);
	}

	println!("\ntimeline:");
	for slot in &analysis.slots {
		let position = match slot.start_min {
			Some(start) => format_time(Some(start)),
			None => "unscheduled".to_string(),
		};
		println!(
			"{:>11} | {:5.1}% +{:4.1}% | {}",
			position, slot.left_pct, slot.width_pct, slot.title
		);
	}

	println!("\n{}", analysis.summary);
}

fn print_recorded_days(tracker: &AppTracker) -> Result<(), Box<dyn Error>> {
	let days = tracker.recorded_days()?;
	if days.is_empty() {
		println!("no recorded days");
		return Ok(());
	}

	for (date, total) in days {
		println!("{} | {} min | {}", date_id(date), total, format_hours(total));
	}
	Ok(())
}
