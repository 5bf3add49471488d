use std::path::{Path, PathBuf};
use std::{fs, io};

/// Extension of every artifact stored in a session directory.
pub const ARTIFACT_EXTENSION: &str = "bin";

/// Reads a whole text file into memory.
pub(crate) fn read_text<P: AsRef<Path>>(filename: P) -> io::Result<String> {
	fs::read_to_string(filename)
}

/// Path of a named artifact inside a session directory.
///
/// Example:
/// `data/latin` + `"model"` → `data/latin/model.bin`
pub(crate) fn artifact_path<P: AsRef<Path>>(directory: P, name: &str) -> PathBuf {
	let mut output = directory.as_ref().join(name);
	output.set_extension(ARTIFACT_EXTENSION);
	output
}

/// Path of the staging file written before `path` is replaced.
fn staging_path(path: &Path) -> PathBuf {
	let mut tmp = path.as_os_str().to_owned();
	tmp.push(".tmp");
	PathBuf::from(tmp)
}

/// Writes a group of artifacts, replacing any previous content.
///
/// Every file is first written next to its target with a `.tmp`
/// extension. Targets are only renamed into place once all of them are
/// staged, a failed write removes the staged files and leaves the
/// targets untouched.
pub(crate) fn write_files(files: &[(PathBuf, Vec<u8>)]) -> io::Result<()> {
	let mut staged = Vec::with_capacity(files.len());
	for (path, bytes) in files {
		let tmp = staging_path(path);
		if let Err(e) = fs::write(&tmp, bytes) {
			for written in &staged {
				let _ = fs::remove_file(written);
			}
			return Err(e);
		}
		staged.push(tmp);
	}

	for (tmp, (path, _)) in staged.iter().zip(files) {
		fs::rename(tmp, path)?;
	}
	Ok(())
}

/// True if `directory` exists and holds at least one entry.
pub(crate) fn has_entries<P: AsRef<Path>>(directory: P) -> io::Result<bool> {
	let directory = directory.as_ref();
	if !directory.exists() {
		return Ok(false);
	}
	if !directory.is_dir() {
		return Ok(true);
	}
	Ok(fs::read_dir(directory)?.next().is_some())
}

/// Extracts the last component of a path.
///
/// Examples:
/// - `"./data/latin"` → `"latin"`
/// - `"latin/"` → `"latin"`
pub fn session_name<P: AsRef<Path>>(path: P) -> io::Result<String> {
	let name = path
		.as_ref()
		.file_name()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Path has no name"))?;

	Ok(name.to_string_lossy().to_string())
}

/// Lists the saved sessions of a directory.
///
/// A saved session is a sub-directory holding a `model.bin` artifact.
/// Returns directory names only (no paths), sorted.
pub fn list_sessions<P: AsRef<Path>>(dir: P) -> io::Result<Vec<String>> {
	let mut sessions = Vec::new();

	for entry in fs::read_dir(dir)? {
		let path = entry?.path();
		if path.is_dir() && artifact_path(&path, "model").is_file() {
			sessions.push(session_name(&path)?);
		}
	}

	sessions.sort();
	Ok(sessions)
}
