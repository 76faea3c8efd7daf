//! Work Directory Layout
//!
//! Creates the Makeflow work directory and stages input files into it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{GeneratorError, Result};

/// Creates `path`, wiping a previous one first when `force` is set.
///
/// An existing directory is never reused without `force`.
pub fn create_workdir(path: &Path, force: bool) -> Result<()> {
    if force && path.exists() {
        warn!("Removing existing work directory {}", path.display());
        fs::remove_dir_all(path).map_err(|source| GeneratorError::WorkDir {
            path: path.to_path_buf(),
            source,
        })?;
    }

    match fs::create_dir(path) {
        Ok(()) => {
            info!("Created work directory {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(GeneratorError::WorkDirExists(path.to_path_buf()))
        }
        Err(source) => Err(GeneratorError::WorkDir {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Copies every file of `files` into `workdir`.
///
/// Files already present in the work directory are left alone. The
/// others are looked up in each of `search_dirs`, in order. Returns the
/// number of files copied.
pub fn stage_inputs(workdir: &Path, files: &[String], search_dirs: &[PathBuf]) -> Result<usize> {
    let mut copied = 0;

    for file in files {
        let dest = workdir.join(file);
        if dest.is_file() {
            debug!("Input {} already in work directory", file);
            continue;
        }

        let source = search_dirs
            .iter()
            .map(|dir| dir.join(file))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| GeneratorError::InputNotFound(file.clone()))?;

        fs::copy(&source, &dest)?;
        debug!("Copied {} -> {}", source.display(), dest.display());
        copied += 1;
    }

    info!("Staged {} input files", copied);
    Ok(copied)
}
