use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::app::error::GatewayError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredEntry {
    pub name: String,
    pub is_dir: bool,
    pub size_bytes: u64,
}

pub fn ensure(path: &Path) -> Result<(), GatewayError> {
    fs::create_dir_all(path)
        .with_context(|| format!("create directory {}", path.display()))
        .map_err(GatewayError::filesystem)
}

pub fn remove_tree(path: &Path) -> Result<(), GatewayError> {
    if !path.exists() {
        return Err(not_found(path));
    }
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        // another request removed it between the check and the delete
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(not_found(path)),
        Err(err) => Err(GatewayError::filesystem(
            anyhow::Error::new(err).context(format!("remove directory {}", path.display())),
        )),
    }
}

pub fn remove_subfolder(parent: &Path, name: &str) -> Result<(), GatewayError> {
    let target = subfolder_path(parent, name)?;
    if !target.is_dir() {
        return Err(not_found(&target));
    }
    remove_tree(&target)
}

/// Joins a single client-supplied folder name onto `parent`.
///
/// Only one plain path component is accepted, so `..`, absolute paths and
/// nested names can never reach outside `parent`.
pub fn subfolder_path(parent: &Path, name: &str) -> Result<PathBuf, GatewayError> {
    if name.is_empty() {
        return Err(GatewayError::ClientInput(
            "subfolder_name must not be empty".into(),
        ));
    }
    if name.trim() != name {
        return Err(GatewayError::ClientInput(format!(
            "subfolder name {name:?} has leading or trailing whitespace"
        )));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(component)), None) if !name.contains(['/', '\\']) => {
            Ok(parent.join(component))
        }
        _ => Err(GatewayError::ClientInput(format!(
            "invalid subfolder name {name:?}"
        ))),
    }
}

/// Lists the direct children of `path`; a missing directory lists as empty.
pub fn list(path: &Path) -> Result<Vec<StoredEntry>, GatewayError> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(GatewayError::filesystem(
                anyhow::Error::new(err).context(format!("read directory {}", path.display())),
            ))
        }
    };

    let mut listed = Vec::new();
    for entry in entries.flatten() {
        let entry_path = entry.path();
        let is_dir = entry_path.is_dir();
        listed.push(StoredEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
            size_bytes: total_size(&entry_path),
        });
    }
    listed.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listed)
}

fn total_size(path: &Path) -> u64 {
    if path.is_file() {
        return fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
    }
    let mut size = 0;
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            size += total_size(&entry.path());
        }
    }
    size
}

fn not_found(path: &Path) -> GatewayError {
    GatewayError::NotFound(format!("{} does not exist", path.display()))
}
