//! A parsed configuration dump: normalized sections plus provenance.

use std::fs;
use std::path::{Path, PathBuf};

use config_block_core::{normalize, parse_file, Document, ParseError, Record, Section};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::snapshot::{self, SnapshotError, SnapshotKind};

pub const ALL_FILENAME: &str = "all.json";
pub const METADATA_FILENAME: &str = "metadata.json";

/// Vdom assumed for devices without virtual domains.
pub const DEFAULT_VDOM: &str = "root";

const GLOBAL_SETTINGS_SECTION: &str = "system global";
const VDOM_SECTION: &str = "vdom";
const CONFIG_VERSION_PREFIX: &str = "#config-version=";

/// Errors raised while loading or dumping a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to read parsed configuration {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid section pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Where a dataset came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub timestamp: String,
    pub hostname: Option<String>,
    pub vdoms: Vec<String>,
    pub source: String,
    pub config_version: Option<String>,
}

/// Normalized sections of one device dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub metadata: Metadata,
    configs: Vec<Section>,
}

impl Dataset {
    /// Build a dataset from an already parsed document.
    pub fn from_document(doc: &Document, source: &str) -> Self {
        let configs = normalize(doc);
        let config_version = doc
            .header
            .iter()
            .find_map(|line| line.strip_prefix(CONFIG_VERSION_PREFIX))
            .map(ToOwned::to_owned);
        let vdoms = vdoms_of_document(doc);
        Self::assemble(configs, source, vdoms, config_version)
    }

    /// Build a dataset from normalized sections, e.g. a loaded `all.json`.
    pub fn from_sections(configs: Vec<Section>, source: &str) -> Self {
        let mut vdoms: Vec<String> = Vec::new();
        for vdom in configs.iter().filter_map(|s| s.vdom.as_deref()) {
            if !vdoms.iter().any(|known| known == vdom) {
                vdoms.push(vdom.to_string());
            }
        }
        vdoms.sort();
        Self::assemble(configs, source, vdoms, None)
    }

    fn assemble(
        configs: Vec<Section>,
        source: &str,
        mut vdoms: Vec<String>,
        config_version: Option<String>,
    ) -> Self {
        let hostname = configs
            .iter()
            .find(|section| section.name == GLOBAL_SETTINGS_SECTION)
            .and_then(|section| section.setting("hostname"))
            .filter(|name| !name.is_empty())
            .map(str::to_lowercase);
        if hostname.is_none() {
            tracing::warn!(source, "no hostname in `system global`");
        }
        if vdoms.is_empty() {
            vdoms.push(DEFAULT_VDOM.to_string());
        }

        Self {
            metadata: Metadata {
                timestamp: timestamp(),
                hostname,
                vdoms,
                source: source.to_string(),
                config_version,
            },
            configs,
        }
    }

    /// Load a dataset from a raw dump, a parsed `all.json`, or a snapshot
    /// (`*.gz`), chosen by file extension.
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let origin = path.display().to_string();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Ok(snapshot::load(path, SnapshotKind::Dataset)?),
            Some("json") => {
                let raw = fs::read_to_string(path).map_err(|source| DatasetError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                let combined: Combined =
                    serde_json::from_str(&raw).map_err(|source| DatasetError::Json {
                        path: path.display().to_string(),
                        source,
                    })?;
                Ok(Self::from_sections(combined.configs, &origin))
            }
            _ => {
                let doc = parse_file(path)?;
                Ok(Self::from_document(&doc, &origin))
            }
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.configs
    }

    /// Every section with the given name, across vdoms.
    pub fn sections_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Section> + 'a {
        self.configs.iter().filter(move |section| section.name == name)
    }

    /// Records of `name` visible from `vdom`.
    ///
    /// On devices without vdoms every section is visible whatever `vdom` is.
    /// Otherwise global sections come first, then the sections of `vdom`, so
    /// a vdom entry follows (and overrides) a global one of the same name.
    pub fn records_in<'a>(
        &'a self,
        name: &'a str,
        vdom: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Record> + 'a {
        let scoped = self.has_vdoms();
        let global = self
            .sections_named(name)
            .filter(move |section| scoped && section.vdom.is_none());
        let own = self.sections_named(name).filter(move |section| {
            !scoped || (section.vdom.is_some() && section.vdom.as_deref() == vdom)
        });
        global.chain(own).flat_map(Section::records)
    }

    /// Distinct section names in document order.
    pub fn section_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for section in &self.configs {
            if !names.contains(&section.name.as_str()) {
                names.push(&section.name);
            }
        }
        names
    }

    pub fn vdom_names(&self) -> &[String] {
        &self.metadata.vdoms
    }

    pub fn has_vdoms(&self) -> bool {
        self.configs.iter().any(|section| section.vdom.is_some())
    }

    /// Vdom scopes to evaluate: each vdom on vdom devices, one unscoped pass
    /// otherwise.
    pub fn scopes(&self) -> Vec<Option<&str>> {
        if self.has_vdoms() {
            self.metadata.vdoms.iter().map(|v| Some(v.as_str())).collect()
        } else {
            vec![None]
        }
    }

    pub fn hostname(&self) -> Option<&str> {
        self.metadata.hostname.as_deref()
    }

    /// Name used for this device in graphs and output directories.
    pub fn device_name(&self) -> String {
        match self.hostname() {
            Some(hostname) => hostname.to_string(),
            None => Path::new(&self.metadata.source)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_lowercase)
                .unwrap_or_else(|| format!("unknown-{}", self.metadata.timestamp)),
        }
    }

    /// Combined `{"configs": [...]}` document.
    pub fn to_json(&self) -> Value {
        json!({ "configs": self.configs })
    }

    /// Records of the sections selected by `selection`, keyed by section
    /// name in document order.
    pub fn select(&self, selection: &SectionSelection) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        for name in self.section_names() {
            if !selection.matches(name) {
                continue;
            }
            let mut rows = Vec::new();
            for section in self.sections_named(name) {
                if section.records.is_empty() && !section.settings.is_empty() {
                    rows.push(json!(section.settings));
                }
                rows.extend(section.records().map(|record| json!(record)));
            }
            out.push((name.to_string(), Value::Array(rows)));
        }
        out
    }

    /// Write the parsed-output layout under `outdir/<device>/` and return
    /// that directory.
    pub fn dump(&self, outdir: &Path, selection: &SectionSelection) -> Result<PathBuf, DatasetError> {
        let dir_name = self
            .hostname()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("unknown-{}", self.metadata.timestamp));
        let dir = outdir.join(dir_name);
        fs::create_dir_all(&dir).map_err(|source| DatasetError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        write_json(&dir.join(ALL_FILENAME), &self.to_json())?;
        for (name, rows) in self.select(selection) {
            write_json(&dir.join(section_filename(&name)), &rows)?;
        }
        write_json(&dir.join(METADATA_FILENAME), &json!(self.metadata))?;

        tracing::info!(dir = %dir.display(), "wrote parsed configuration");
        Ok(dir)
    }
}

/// Section names to dump: exact names, or patterns containing `*` which are
/// matched as regular expressions anchored at the start of the name.
#[derive(Debug, Clone)]
pub struct SectionSelection {
    patterns: Vec<SectionPattern>,
}

#[derive(Debug, Clone)]
enum SectionPattern {
    Exact(String),
    Regex(Regex),
}

impl SectionSelection {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, DatasetError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                if pattern.contains('*') {
                    Regex::new(&format!("^(?:{pattern})"))
                        .map(SectionPattern::Regex)
                        .map_err(|source| DatasetError::InvalidPattern {
                            pattern: pattern.to_string(),
                            source,
                        })
                } else {
                    Ok(SectionPattern::Exact(pattern.to_string()))
                }
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| match pattern {
            SectionPattern::Exact(exact) => exact == name,
            SectionPattern::Regex(regex) => regex.is_match(name),
        })
    }
}

#[derive(Deserialize)]
struct Combined {
    configs: Vec<Section>,
}

/// `firewall service custom` -> `firewall_service_custom.json`
pub fn section_filename(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_whitespace() || c == '"' || c == '\'' { '_' } else { c })
        .collect();
    format!("{stem}.json")
}

fn vdoms_of_document(doc: &Document) -> Vec<String> {
    let mut vdoms: Vec<String> = Vec::new();
    for root in doc.roots() {
        let block = doc.block(*root);
        if !block.is_config() || block.name != VDOM_SECTION {
            continue;
        }
        for (_, entry) in doc.children(*root) {
            if entry.is_edit() && !vdoms.contains(&entry.name) {
                vdoms.push(entry.name.clone());
            }
        }
    }
    vdoms.sort();
    vdoms
}

fn write_json(path: &Path, value: &Value) -> Result<(), DatasetError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| DatasetError::Json {
        path: path.display().to_string(),
        source,
    })?;
    fs::write(path, text).map_err(|source| DatasetError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn timestamp() -> String {
    chrono::Local::now().format("%F_%H_%M_%S").to_string()
}

#[cfg(test)]
mod tests {
    use config_block_core::parse;

    use super::{section_filename, Dataset, SectionSelection, DEFAULT_VDOM};

    const VDOM_DUMP: &str = "#config-version=FG100F-7.0.12-FW-build0523:opmode=0:vdom=1\n\
config vdom\n\
edit root\n\
next\n\
edit dmz\n\
next\n\
end\n\
config global\n\
config system global\n\
set hostname \"FG-Edge\"\n\
end\n\
config firewall address\n\
edit \"shared\"\n\
set subnet 10.9.0.0 255.255.0.0\n\
next\n\
edit \"h2\"\n\
set subnet 10.9.9.9 255.255.255.255\n\
next\n\
end\n\
end\n\
config vdom\n\
edit root\n\
config firewall address\n\
edit \"h1\"\n\
set subnet 10.0.0.1 255.255.255.255\n\
next\n\
end\n\
next\n\
edit dmz\n\
config firewall address\n\
edit \"h2\"\n\
set subnet 10.1.0.1 255.255.255.255\n\
next\n\
end\n\
next\n\
end\n";

    #[test]
    fn vdom_dump_metadata_and_scoping() {
        let doc = parse(VDOM_DUMP).expect("parse");
        let dataset = Dataset::from_document(&doc, "edge.conf");

        assert_eq!(dataset.hostname(), Some("fg-edge"));
        assert_eq!(dataset.vdom_names(), &["dmz".to_string(), "root".to_string()]);
        assert!(dataset.has_vdoms());
        assert_eq!(
            dataset.metadata.config_version.as_deref(),
            Some("FG100F-7.0.12-FW-build0523:opmode=0:vdom=1")
        );

        let root: Vec<_> = dataset
            .records_in("firewall address", Some("root"))
            .map(|r| r.edit.as_str())
            .collect();
        assert_eq!(root, vec!["shared", "h2", "h1"]);
    }

    #[test]
    fn global_records_precede_vdom_records() {
        let doc = parse(VDOM_DUMP).expect("parse");
        let dataset = Dataset::from_document(&doc, "edge.conf");

        let dmz: Vec<_> = dataset
            .records_in("firewall address", Some("dmz"))
            .map(|r| (r.edit.as_str(), r.values("subnet")))
            .collect();
        assert_eq!(
            dmz,
            vec![
                ("shared", vec!["10.9.0.0", "255.255.0.0"]),
                ("h2", vec!["10.9.9.9", "255.255.255.255"]),
                ("h2", vec!["10.1.0.1", "255.255.255.255"]),
            ]
        );

        let global: Vec<_> = dataset
            .records_in("firewall address", None)
            .map(|r| r.edit.as_str())
            .collect();
        assert_eq!(global, vec!["shared", "h2"]);
    }

    #[test]
    fn plain_dump_defaults_to_root_vdom_and_file_stem() {
        let doc = parse("config firewall address\nedit \"h1\"\nnext\nend\n").expect("parse");
        let dataset = Dataset::from_document(&doc, "/tmp/Branch-Fw.txt");

        assert_eq!(dataset.vdom_names(), &[DEFAULT_VDOM.to_string()]);
        assert_eq!(dataset.scopes(), vec![None]);
        assert_eq!(dataset.hostname(), None);
        assert_eq!(dataset.device_name(), "branch-fw");
        assert_eq!(dataset.records_in("firewall address", Some("root")).count(), 1);
    }

    #[test]
    fn selection_mixes_exact_names_and_patterns() {
        let selection =
            SectionSelection::new(&["system.*", "firewall address"]).expect("selection");
        assert!(selection.matches("system interface"));
        assert!(selection.matches("firewall address"));
        assert!(!selection.matches("firewall address6"));
        assert!(!selection.matches("user local"));
    }

    #[test]
    fn section_filenames_replace_spaces_and_quotes() {
        assert_eq!(
            section_filename("firewall service custom"),
            "firewall_service_custom.json"
        );
        assert_eq!(section_filename("a \"b\""), "a__b_.json");
    }
}
