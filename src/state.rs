use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};

use crate::auth::Identity;

const SESSION_FILE: &str = "session.json";
pub const LOG_FILE: &str = "daylog.log";

/// Per-user state directory: `DAYLOG_STATE_DIR`, then the platform state home.
pub fn state_dir() -> PathBuf {
	resolve_state_dir(
		env::var_os("DAYLOG_STATE_DIR"),
		env::var_os("XDG_STATE_HOME"),
		env::var_os("HOME"),
	)
}

fn resolve_state_dir(
	explicit: Option<OsString>,
	xdg_state_home: Option<OsString>,
	home: Option<OsString>,
) -> PathBuf {
	if let Some(path) = explicit.filter(|path| !path.is_empty()) {
		return PathBuf::from(path);
	}

	#[cfg(target_os = "windows")]
	{
		if let Some(path) = env::var_os("LOCALAPPDATA") {
			return PathBuf::from(path).join("daylog");
		}
	}

	if let Some(path) = xdg_state_home.filter(|path| !path.is_empty()) {
		return PathBuf::from(path).join("daylog");
	}

	if let Some(path) = home.filter(|path| !path.is_empty()) {
		return PathBuf::from(path)
			.join(".local")
			.join("state")
			.join("daylog");
	}

	PathBuf::from(".daylog")
}

/// Identity kept between CLI invocations, if any.
pub fn load_identity(state_dir: &Path) -> Result<Option<Identity>, Error> {
	let raw = match fs::read_to_string(state_dir.join(SESSION_FILE)) {
		Ok(raw) => raw,
		Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
		Err(err) => return Err(err),
	};

	serde_json::from_str(&raw)
		.map(Some)
		.map_err(|err| Error::new(ErrorKind::InvalidData, err))
}

pub fn save_identity(state_dir: &Path, identity: &Identity) -> Result<(), Error> {
	fs::create_dir_all(state_dir)?;
	let raw = serde_json::to_string_pretty(identity).map_err(|err| Error::new(ErrorKind::InvalidData, err))?;
	fs::write(state_dir.join(SESSION_FILE), raw)
}

pub fn clear_identity(state_dir: &Path) -> Result<(), Error> {
	match fs::remove_file(state_dir.join(SESSION_FILE)) {
		Ok(()) => Ok(()),
		Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
		Err(err) => Err(err),
	}
}

pub fn absolutize(path: PathBuf) -> PathBuf {
	let path = if path.is_absolute() {
		path
	} else if let Ok(cwd) = env::current_dir() {
		cwd.join(path)
	} else {
		path
	};

	if path.exists() {
		fs::canonicalize(&path).unwrap_or(path)
	} else {
		path
	}
}
