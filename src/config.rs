use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::app::{OutputLocations, RetrievalRequest};
use crate::domain::{Preface, Project, Region, parse_date, timeslots};
use crate::error::RetrievalError;
use crate::ledger::LedgerMode;
use crate::persist::ARRAY_EXT;

pub const DEFAULT_CONFIG_FILE: &str = "srm.json";
pub const DEFAULT_PLOT_THRESHOLD: usize = 52;
pub const DEFAULT_OPERATION_EXT: &str = ".npy";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub output_root: Option<String>,
    #[serde(default)]
    pub operation_ext: Option<String>,
    #[serde(default)]
    pub plot_threshold: Option<usize>,
    #[serde(default)]
    pub client: Option<ClientConfig>,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://services.sentinel-hub.com/api/v1".to_string(),
            token_env: Some("SRM_TOKEN".to_string()),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn token(&self) -> Option<String> {
        let value = std::env::var(self.token_env.as_ref()?).ok()?;
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProjectEntry {
    pub name: String,
    pub region: [f64; 4],
    pub resolution: f64,
    pub prefaces: PrefaceEntry,
    pub start: String,
    pub end: String,
    pub chunks: usize,
    #[serde(default)]
    pub ledger: LedgerMode,
    #[serde(default)]
    pub write_arrays: bool,
    pub request: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PrefaceEntry {
    Shorthand(String),
    Group(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ResolvedProject {
    pub request_name: String,
    pub request: RetrievalRequest,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub output_root: Utf8PathBuf,
    pub operation_ext: String,
    pub plot_threshold: usize,
    pub client: ClientConfig,
    pub projects: Vec<ResolvedProject>,
}

impl ResolvedConfig {
    pub fn project(&self, name: &str) -> Option<&ResolvedProject> {
        self.projects
            .iter()
            .find(|project| project.request.project.as_str() == name)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, RetrievalError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(RetrievalError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| RetrievalError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| RetrievalError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, RetrievalError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let output_root = Utf8PathBuf::from(config.output_root.unwrap_or_else(|| "out".to_string()));
        let operation_ext = config
            .operation_ext
            .unwrap_or_else(|| DEFAULT_OPERATION_EXT.to_string());
        if operation_ext.contains('_') || operation_ext.contains('/') {
            return Err(RetrievalError::ConfigParse(format!(
                "operation_ext may not contain '_' or '/': {operation_ext}"
            )));
        }
        let plot_threshold = config.plot_threshold.unwrap_or(DEFAULT_PLOT_THRESHOLD);
        let client = config.client.unwrap_or_default();

        let projects = config
            .projects
            .into_iter()
            .map(|entry| resolve_project(entry, &output_root, &operation_ext))
            .collect::<Result<Vec<_>, RetrievalError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            output_root,
            operation_ext,
            plot_threshold,
            client,
            projects,
        })
    }
}

fn resolve_project(
    entry: ProjectEntry,
    output_root: &Utf8Path,
    operation_ext: &str,
) -> Result<ResolvedProject, RetrievalError> {
    let project: Project = entry.name.parse()?;
    if entry.ledger == LedgerMode::Directory && operation_ext != ARRAY_EXT {
        return Err(RetrievalError::ConfigParse(format!(
            "project {project} probes the artifact directory, which holds {ARRAY_EXT} files, \
             but operation_ext is {operation_ext}"
        )));
    }
    let region = Region::try_from(entry.region)?;
    let size = region.pixel_size(entry.resolution)?;

    let prefaces = match entry.prefaces {
        PrefaceEntry::Shorthand(value) => vec![value.parse::<Preface>()?],
        PrefaceEntry::Group(values) => values
            .iter()
            .map(|value| value.parse::<Preface>())
            .collect::<Result<Vec<_>, RetrievalError>>()?,
    };
    if prefaces.is_empty() {
        return Err(RetrievalError::ConfigParse(format!(
            "project {project} lists no prefaces"
        )));
    }
    let mut seen = HashSet::with_capacity(prefaces.len());
    if let Some(repeated) = prefaces.iter().find(|preface| !seen.insert(*preface)) {
        return Err(RetrievalError::ConfigParse(format!(
            "project {project} lists preface {repeated} more than once"
        )));
    }

    let slots = timeslots(parse_date(&entry.start)?, parse_date(&entry.end)?, entry.chunks)?;
    let outputs = OutputLocations::for_project(output_root, &project, &prefaces, entry.ledger);

    Ok(ResolvedProject {
        request_name: entry.request,
        request: RetrievalRequest {
            project,
            prefaces,
            slots,
            region,
            size,
            ledger_mode: entry.ledger,
            write_arrays: entry.write_arrays,
            outputs,
        },
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn entry(prefaces: PrefaceEntry) -> ProjectEntry {
        ProjectEntry {
            name: "MaxFarm".to_string(),
            region: [-69.9040, 43.8586, -69.8987, 43.8651],
            resolution: 30.0,
            prefaces,
            start: "2021-01-01".to_string(),
            end: "2021-12-31".to_string(),
            chunks: 13,
            ledger: LedgerMode::File,
            write_arrays: false,
            request: "thermal".to_string(),
        }
    }

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            schema_version: None,
            output_root: None,
            operation_ext: None,
            plot_threshold: None,
            client: None,
            projects: vec![entry(PrefaceEntry::Shorthand("Thermal".to_string()))],
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.operation_ext, DEFAULT_OPERATION_EXT);
        assert_eq!(resolved.plot_threshold, DEFAULT_PLOT_THRESHOLD);
        let project = &resolved.projects[0].request;
        assert_eq!(project.prefaces.len(), 1);
        assert_eq!(project.slots.len(), 12);
        assert!(project.outputs.ledger.ends_with("satData/logs/MaxFarm_oper.txt"));
    }

    #[test]
    fn rejects_repeated_preface() {
        let config = Config {
            schema_version: None,
            output_root: None,
            operation_ext: None,
            plot_threshold: None,
            client: None,
            projects: vec![entry(PrefaceEntry::Group(vec![
                "B01".to_string(),
                "B02".to_string(),
                "B01".to_string(),
            ]))],
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(RetrievalError::ConfigParse(message)) if message.contains("B01")
        );
    }

    #[test]
    fn rejects_delimiter_in_extension() {
        let config = Config {
            schema_version: None,
            output_root: None,
            operation_ext: Some("_x.npy".to_string()),
            plot_threshold: None,
            client: None,
            projects: Vec::new(),
        };
        assert!(ConfigLoader::resolve_config(config).is_err());
    }
}
