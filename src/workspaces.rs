use std::env;
use std::fs;
use std::io::{Error, ErrorKind, Write};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "taskboard";
const RECENT_WORKSPACES_FILE: &str = "recent_workspaces.txt";
const CONFIG_FILE: &str = "config.toml";
const PREFERENCES_FILE: &str = "preferences.toml";
pub const MAX_RECENT_WORKSPACES: usize = 50;

/// Picks the workspace file: explicit path, then `TASKBOARD_WORKSPACE`, then the most recent one.
pub fn resolve_workspace_path(cli_path: Option<PathBuf>) -> Result<PathBuf, Error> {
	if let Some(path) = cli_path {
		return Ok(absolutize(path));
	}

	if let Some(path) = env::var_os("TASKBOARD_WORKSPACE") {
		let path = PathBuf::from(path);
		if !path.as_os_str().is_empty() {
			return Ok(absolutize(path));
		}
	}

	if let Some(path) = recent_workspaces(1)?.into_iter().next() {
		return Ok(path);
	}

	Err(Error::new(
		ErrorKind::NotFound,
		"no workspace selected: pass --workspace <path>, set TASKBOARD_WORKSPACE, or pick one from `workspaces`",
	))
}

pub fn remember_workspace(path: &Path) -> Result<(), Error> {
	remember_in(&state_dir(), path)
}

pub fn recent_workspaces(limit: usize) -> Result<Vec<PathBuf>, Error> {
	recent_in(&state_dir(), limit)
}

/// `TASKBOARD_CONFIG`, else `config.toml` in the state dir.
pub fn config_path() -> PathBuf {
	match env::var_os("TASKBOARD_CONFIG") {
		Some(path) if !path.is_empty() => PathBuf::from(path),
		_ => state_dir().join(CONFIG_FILE),
	}
}

pub fn preferences_path() -> PathBuf {
	state_dir().join(PREFERENCES_FILE)
}

fn remember_in(state_dir: &Path, path: &Path) -> Result<(), Error> {
	let path = absolutize(path.to_path_buf());
	let mut entries = recent_in(state_dir, MAX_RECENT_WORKSPACES)?;
	entries.retain(|entry| entry != &path);
	entries.insert(0, path);
	entries.truncate(MAX_RECENT_WORKSPACES);

	fs::create_dir_all(state_dir)?;
	let mut file = fs::File::create(state_dir.join(RECENT_WORKSPACES_FILE))?;
	for entry in &entries {
		writeln!(file, "{}", entry.display())?;
	}
	Ok(())
}

fn recent_in(state_dir: &Path, limit: usize) -> Result<Vec<PathBuf>, Error> {
	let raw = match fs::read_to_string(state_dir.join(RECENT_WORKSPACES_FILE)) {
		Ok(raw) => raw,
		Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
		Err(err) => return Err(err),
	};

	Ok(raw
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.take(limit)
		.map(PathBuf::from)
		.collect())
}

pub fn state_dir() -> PathBuf {
	if let Some(path) = env::var_os("TASKBOARD_STATE_DIR") {
		return PathBuf::from(path);
	}

	#[cfg(target_os = "windows")]
	{
		if let Some(path) = env::var_os("LOCALAPPDATA") {
			return PathBuf::from(path).join(APP_DIR);
		}
	}

	if let Some(path) = env::var_os("XDG_STATE_HOME") {
		return PathBuf::from(path).join(APP_DIR);
	}

	if let Some(path) = env::var_os("HOME") {
		return PathBuf::from(path).join(".local").join("state").join(APP_DIR);
	}

	PathBuf::from(".taskboard")
}

fn absolutize(path: PathBuf) -> PathBuf {
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

#[cfg(test)]
mod tests {
	use std::fs;
	use std::path::PathBuf;

	use super::{recent_in, remember_in};

	#[test]
	fn recent_list_is_most_recent_first_without_repeats() {
		let mut dir = std::env::temp_dir();
		dir.push(format!("taskboard_recent_{}", std::process::id()));
		let _ = fs::remove_dir_all(&dir);

		let a = PathBuf::from("/tmp/a.board");
		let b = PathBuf::from("/tmp/b.board");
		remember_in(&dir, &a).expect("remember a");
		remember_in(&dir, &b).expect("remember b");
		remember_in(&dir, &a).expect("remember a again");

		assert_eq!(recent_in(&dir, 10).expect("recent"), vec![a.clone(), b]);
		assert_eq!(recent_in(&dir, 1).expect("recent"), vec![a]);
		let _ = fs::remove_dir_all(dir);
	}
}
