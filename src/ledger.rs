use std::collections::HashSet;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RetrievalError;
use crate::naming::CanonicalName;
use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerState {
    Uninitialized,
    Empty,
    Populated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    #[default]
    File,
    Directory,
}

pub trait CompletionLedger {
    fn location(&self) -> &Utf8Path;
    fn state(&self) -> LedgerState;
    fn exists(&self, name: &CanonicalName) -> Result<bool, RetrievalError>;
    /// Records a retrieved unit. Does not deduplicate.
    fn append(&mut self, name: &CanonicalName) -> Result<(), RetrievalError>;
}

pub fn open_ledger(
    mode: LedgerMode,
    location: &Utf8Path,
) -> Result<Box<dyn CompletionLedger>, RetrievalError> {
    match mode {
        LedgerMode::File => Ok(Box::new(FileLedger::bootstrap(location)?)),
        LedgerMode::Directory => Ok(Box::new(DirectoryLedger::bootstrap(location)?)),
    }
}

#[derive(Debug)]
pub struct FileLedger {
    path: Utf8PathBuf,
    entries: HashSet<String>,
}

impl FileLedger {
    pub fn open(path: &Utf8Path) -> Result<Self, RetrievalError> {
        if !path.as_std_path().is_file() {
            return Err(RetrievalError::LedgerUnavailable(
                path.as_std_path().to_path_buf(),
            ));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| RetrievalError::Filesystem(format!("read ledger {path}: {err}")))?;
        let entries = content
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect::<HashSet<_>>();
        debug!(path = %path, entries = entries.len(), "loaded ledger file");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn bootstrap(path: &Utf8Path) -> Result<Self, RetrievalError> {
        if paths::create_blank_file(path)? {
            info!(path = %path, "created ledger file");
        }
        Self::open(path)
    }

    pub fn state_at(path: &Utf8Path) -> Result<LedgerState, RetrievalError> {
        if !path.as_std_path().exists() {
            return Ok(LedgerState::Uninitialized);
        }
        Ok(Self::open(path)?.state())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CompletionLedger for FileLedger {
    fn location(&self) -> &Utf8Path {
        &self.path
    }

    fn state(&self) -> LedgerState {
        if self.entries.is_empty() {
            LedgerState::Empty
        } else {
            LedgerState::Populated
        }
    }

    fn exists(&self, name: &CanonicalName) -> Result<bool, RetrievalError> {
        Ok(self.entries.contains(name.as_str()))
    }

    fn append(&mut self, name: &CanonicalName) -> Result<(), RetrievalError> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|_| RetrievalError::LedgerUnavailable(self.path.as_std_path().to_path_buf()))?;
        writeln!(file, "{name}")
            .and_then(|_| file.sync_data())
            .map_err(|err| RetrievalError::Filesystem(format!("append ledger {}: {err}", self.path)))?;
        self.entries.insert(name.as_str().to_string());
        Ok(())
    }
}

#[derive(Debug)]
pub struct DirectoryLedger {
    dir: Utf8PathBuf,
}

impl DirectoryLedger {
    pub fn open(dir: &Utf8Path) -> Result<Self, RetrievalError> {
        if !dir.as_std_path().is_dir() {
            return Err(RetrievalError::LedgerUnavailable(
                dir.as_std_path().to_path_buf(),
            ));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn bootstrap(dir: &Utf8Path) -> Result<Self, RetrievalError> {
        paths::ensure_path(dir)?;
        Self::open(dir)
    }

    fn artifact_path(&self, name: &CanonicalName) -> Utf8PathBuf {
        self.dir.join(name.as_str())
    }
}

impl CompletionLedger for DirectoryLedger {
    fn location(&self) -> &Utf8Path {
        &self.dir
    }

    fn state(&self) -> LedgerState {
        match fs::read_dir(self.dir.as_std_path()) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    LedgerState::Populated
                } else {
                    LedgerState::Empty
                }
            }
            Err(_) => LedgerState::Uninitialized,
        }
    }

    fn exists(&self, name: &CanonicalName) -> Result<bool, RetrievalError> {
        if !self.dir.as_std_path().is_dir() {
            return Err(RetrievalError::LedgerUnavailable(
                self.dir.as_std_path().to_path_buf(),
            ));
        }
        Ok(self.artifact_path(name).as_std_path().is_file())
    }

    fn append(&mut self, name: &CanonicalName) -> Result<(), RetrievalError> {
        if self.exists(name)? {
            Ok(())
        } else {
            Err(RetrievalError::Filesystem(format!(
                "artifact {} missing from {}",
                name, self.dir
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_ledger_states() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("logs/farm_oper.txt")).unwrap();
        assert_eq!(FileLedger::state_at(&path).unwrap(), LedgerState::Uninitialized);

        let mut ledger = FileLedger::bootstrap(&path).unwrap();
        assert_eq!(ledger.state(), LedgerState::Empty);

        let name = CanonicalName::from_ledger_line("MaxFarm_2022-01-01_2022-02-01_Thermal_0.npy");
        ledger.append(&name).unwrap();
        assert_eq!(ledger.state(), LedgerState::Populated);
        assert_eq!(FileLedger::state_at(&path).unwrap(), LedgerState::Populated);
    }

    #[test]
    fn directory_ledger_append_requires_artifact() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().join("images")).unwrap();
        let mut ledger = DirectoryLedger::bootstrap(&dir).unwrap();
        assert_eq!(ledger.state(), LedgerState::Empty);

        let name = CanonicalName::from_ledger_line("MaxFarm_2022-01-01_2022-02-01_Thermal_0.npy");
        assert!(ledger.append(&name).is_err());
        fs::write(dir.join(name.as_str()).as_std_path(), b"x").unwrap();
        ledger.append(&name).unwrap();
        assert!(ledger.exists(&name).unwrap());
        assert_eq!(ledger.state(), LedgerState::Populated);
    }
}
