use std::fs;
use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::RetrievalError;

pub fn relativize(base_dir: &Utf8Path, deep_path: &Utf8Path) -> Result<Utf8PathBuf, RetrievalError> {
    let base = normalized_components(base_dir);
    let deep = normalized_components(deep_path);

    let shared = base
        .iter()
        .zip(deep.iter())
        .take_while(|(left, right)| left == right)
        .count();

    if shared >= deep.len() {
        return Err(RetrievalError::PathError {
            base: base_dir.to_string(),
            deep: deep_path.to_string(),
        });
    }

    Ok(deep[shared..].iter().collect())
}

pub fn ensure_path(path: &Utf8Path) -> Result<(), RetrievalError> {
    let components = path.components().collect::<Vec<_>>();
    let mut prefixes = Vec::with_capacity(components.len());
    let mut current = Utf8PathBuf::new();
    for component in &components {
        current.push(component.as_str());
        prefixes.push(current.clone());
    }

    let parents = shift_down(&prefixes);
    for (parent, component) in parents.iter().zip(components.iter()) {
        if !matches!(component, Utf8Component::Normal(_)) {
            continue;
        }
        let target = parent.join(component.as_str());
        if target.as_std_path().is_dir() {
            continue;
        }
        match fs::create_dir(target.as_std_path()) {
            Ok(()) => debug!(path = %target, "created directory"),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => {
                return Err(RetrievalError::Filesystem(format!(
                    "create directory {target}: {err}"
                )));
            }
        }
    }
    Ok(())
}

pub fn ensure_parent(file_path: &Utf8Path) -> Result<(), RetrievalError> {
    match file_path.parent() {
        Some(parent) if !parent.as_str().is_empty() => ensure_path(parent),
        _ => Ok(()),
    }
}

pub fn create_blank_file(path: &Utf8Path) -> Result<bool, RetrievalError> {
    if path.as_std_path().exists() {
        debug!(path = %path, "file already exists, keeping it");
        return Ok(false);
    }
    ensure_parent(path)?;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path.as_std_path())
        .map_err(|err| RetrievalError::Filesystem(format!("create {path}: {err}")))?;
    Ok(true)
}

pub fn shift_down<T: Clone + Default>(items: &[T]) -> Vec<T> {
    if items.is_empty() {
        return Vec::new();
    }
    let mut shifted = Vec::with_capacity(items.len());
    shifted.push(T::default());
    shifted.extend_from_slice(&items[..items.len() - 1]);
    shifted
}

fn normalized_components(path: &Utf8Path) -> Vec<Utf8Component<'_>> {
    let mut out: Vec<Utf8Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if matches!(out.last(), Some(Utf8Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
