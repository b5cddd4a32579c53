//! Turning command line arguments into input and output paths.
//!
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    codec::Format,
    errors::{Error, Result},
};

/// Expand the input arguments into a list of container paths.
///
/// Several arguments are taken as the file list itself. A single argument may be a directory,
/// whose visible files are used in name order, a container file, or a text file listing one
/// path per line. Blank lines and lines starting with `#` in a list file are ignored.
///
pub fn resolve_input_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let path = match paths {
        [] => return Err(Error::NoInputFiles),
        [path] => path,
        _ => return Ok(paths.to_vec()),
    };

    if path.is_dir() {
        let mut files = vec![];
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden && entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        debug!(directory = %path.display(), files = files.len(), "Listed input directory");

        Ok(files)
    } else if path.is_file() {
        if Format::recognizes(path) {
            return Ok(vec![path.clone()]);
        }

        let files: Vec<PathBuf> = fs::read_to_string(path)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(PathBuf::from)
            .collect();
        debug!(list = %path.display(), files = files.len(), "Read input list");

        Ok(files)
    } else {
        Err(Error::BadInputPath(path.clone()))
    }
}

/// Check that `path` can be written as output, returning it as an absolute path.
///
/// An existing file is only accepted with `overwrite`. It is left in place: output replaces it
/// atomically once complete.
///
pub fn validate_output_path(path: &Path, overwrite: bool) -> Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };

    if path.is_dir() {
        Err(Error::OutputIsDirectory(path))
    } else if path.is_file() && !overwrite {
        Err(Error::OutputExists(path))
    } else {
        Ok(path)
    }
}

/// `dir/name.ext` becomes `dir/name<label>.ext`
pub fn add_label_to_path(path: &Path, label: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(extension) => format!("{stem}{label}.{}", extension.to_string_lossy()),
        None => format!("{stem}{label}"),
    };

    path.with_file_name(name)
}
