//! Pipeline configuration file support
//!
//! Configuration is read from a TOML file, for example:
//!
//! ```toml
//! controlled_fields = ["mutated_from_allele", "raw_data_accession"]
//! excluded_reference_categories = ["METH_ARRAY_M", "EXP_ARRAY_M", "PEXP_M"]
//! write_open = true
//!
//! [parallel]
//! chunk_size = 5000
//! num_threads = 8
//! ```
//!
//! # Config File Locations
//!
//! When no path is given, configuration is searched in this order (first
//! found wins):
//! 1. `.ferro-join.toml` in current directory
//! 2. `~/.config/ferro-join/config.toml`
//!
//! CLI flags take precedence over config file settings.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::error::JoinError;
use crate::parallel::ParallelConfig;
use crate::raw_sequence::{ReferenceProjection, DEFAULT_EXCLUDED_CATEGORIES};
use crate::redact::ControlledFields;

/// File name looked up in the current directory
pub const LOCAL_CONFIG_FILE: &str = ".ferro-join.toml";

/// Settings for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fields stripped from open-access output
    pub controlled_fields: Vec<String>,
    /// Meta categories left out of the raw-sequence reference table
    pub excluded_reference_categories: Vec<String>,
    /// Whether join tasks also write the redacted open-access copy
    pub write_open: bool,
    /// Donor/sample lookup file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub donor_samples: Option<PathBuf>,
    /// Partitioning and worker pool
    pub parallel: ParallelConfig,
    /// Reference record shape
    pub reference: ReferenceProjection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            controlled_fields: Vec::new(),
            excluded_reference_categories: DEFAULT_EXCLUDED_CATEGORIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            write_open: true,
            donor_samples: None,
            parallel: ParallelConfig::default(),
            reference: ReferenceProjection::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the default locations, if any exists.
    ///
    /// A file that exists but fails to load is an error.
    pub fn load() -> Result<Option<Self>, JoinError> {
        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(home) = dirs_home() {
            candidates.push(home.join(".config").join("ferro-join").join("config.toml"));
        }

        for path in candidates {
            if path.exists() {
                return Self::load_from_path(&path).map(Some);
            }
        }
        Ok(None)
    }

    /// Load and validate configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, JoinError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| JoinError::Config {
            msg: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML content
    pub fn parse(content: &str) -> Result<Self, JoinError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, JoinError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check that every setting is usable
    pub fn validate(&self) -> Result<(), JoinError> {
        if let Some(field) = self.controlled_fields.iter().find(|f| f.trim().is_empty()) {
            return Err(JoinError::Config {
                msg: format!("Invalid controlled field name {:?}", field),
            });
        }

        for category in self.excluded_categories()? {
            if !category.is_meta() {
                return Err(JoinError::Config {
                    msg: format!(
                        "Excluded reference category {} is not a meta category",
                        category
                    ),
                });
            }
        }

        if self.reference.fields.is_empty() {
            return Err(JoinError::Config {
                msg: "Reference projection has no fields".to_string(),
            });
        }
        let mut targets = HashMap::new();
        for mapping in &self.reference.fields {
            if mapping.source.is_empty() || mapping.target.is_empty() {
                return Err(JoinError::Config {
                    msg: "Reference projection field names must not be empty".to_string(),
                });
            }
            if let Some(previous) = targets.insert(mapping.target.as_str(), &mapping.source) {
                return Err(JoinError::Config {
                    msg: format!(
                        "Reference field {} is mapped from both {} and {}",
                        mapping.target, previous, mapping.source
                    ),
                });
            }
        }
        Ok(())
    }

    /// Controlled fields as a lookup set
    pub fn controlled(&self) -> ControlledFields {
        self.controlled_fields.iter().cloned().collect()
    }

    /// Excluded reference categories
    pub fn excluded_categories(&self) -> Result<HashSet<Category>, JoinError> {
        self.excluded_reference_categories
            .iter()
            .map(|name| {
                Category::new(name).map_err(|_| JoinError::Config {
                    msg: format!("Invalid excluded reference category {:?}", name),
                })
            })
            .collect()
    }

    /// Apply CLI overrides. CLI arguments take precedence; controlled fields
    /// given on the command line are added to those of the file.
    pub fn merge_with_cli(
        mut self,
        num_threads: Option<usize>,
        chunk_size: Option<usize>,
        controlled_fields: &[String],
        write_open: Option<bool>,
    ) -> Self {
        if let Some(threads) = num_threads {
            self.parallel.num_threads = threads;
        }
        if let Some(size) = chunk_size {
            self.parallel.chunk_size = size;
        }
        for field in controlled_fields {
            if !self.controlled_fields.contains(field) {
                self.controlled_fields.push(field.clone());
            }
        }
        if let Some(write_open) = write_open {
            self.write_open = write_open;
        }
        self
    }
}

/// Get the user's home directory.
fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
