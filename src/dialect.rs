//! Canonical variable set, alias table, and resolution thresholds.
//!
//! A [`Dialect`] is an immutable value threaded through the parser, the
//! reconciler and the assembler. Supporting another naming vintage means
//! loading a different dialect file, never editing shared state.

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

pub const FISCAL_YEAR_COLUMN: &str = "FISCAL_YEAR";

const DEFAULT_MIN_RESOLVED: usize = 5;

/// How a single-position declaration with no discoverable width is handled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WidthPolicy {
    /// Drop the variable for that year.
    #[default]
    Reject,
    /// Assume a one-byte field.
    DefaultOne,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dialect {
    pub name: String,
    /// Canonical variables in output column order.
    pub variables: Vec<String>,
    /// Canonical name -> historical names, tried in order.
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_min_resolved")]
    pub min_resolved: usize,
    #[serde(default)]
    pub width_policy: WidthPolicy,
    /// Variables whose per-year non-null coverage is reported after assembly.
    #[serde(default)]
    pub key_variables: Vec<String>,
}

fn default_min_resolved() -> usize {
    DEFAULT_MIN_RESOLVED
}

impl Default for Dialect {
    fn default() -> Self {
        Self::sentencing_commission()
    }
}

impl Dialect {
    /// Individual-offender files published for fiscal years 2002 onward.
    pub fn sentencing_commission() -> Self {
        let variables = [
            "DISTRICT", "OFFGUIDE", "SENTTOT", "SENTIMP", "XMINSOR", "XMAXSOR", "NEWRACE",
            "MONSEX", "AGE", "CITIZEN", "NEWEDUC", "CRIMHIST", "CRIMPTS", "WEAPON", "DSPLEA",
            "INOUT", "PRESENT",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        let mut aliases = BTreeMap::new();
        aliases.insert("OFFGUIDE".to_string(), vec!["OFFTYPE2".to_string()]);
        let key_variables = ["SENTTOT", "NEWRACE", "OFFGUIDE", "DSPLEA"]
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            name: "sentencing-commission".to_string(),
            variables,
            aliases,
            min_resolved: DEFAULT_MIN_RESOLVED,
            width_policy: WidthPolicy::Reject,
            key_variables,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Opening dialect file {path:?}"))?;
        let mut dialect: Dialect = serde_yaml::from_str(&raw)
            .with_context(|| format!("Parsing dialect YAML {path:?}"))?;
        dialect.normalize();
        dialect.validate()?;
        Ok(dialect)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Serializing dialect")?;
        std::fs::write(path, yaml).with_context(|| format!("Writing dialect file {path:?}"))
    }

    /// Upper-cases every name so lookups match the parser's output.
    pub fn normalize(&mut self) {
        for variable in &mut self.variables {
            *variable = variable.trim().to_ascii_uppercase();
        }
        self.aliases = std::mem::take(&mut self.aliases)
            .into_iter()
            .map(|(canonical, alternates)| {
                (
                    canonical.trim().to_ascii_uppercase(),
                    alternates
                        .into_iter()
                        .map(|alt| alt.trim().to_ascii_uppercase())
                        .collect(),
                )
            })
            .collect();
        for variable in &mut self.key_variables {
            *variable = variable.trim().to_ascii_uppercase();
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.variables.is_empty(),
            "Dialect '{}' declares no variables",
            self.name
        );
        let mut seen = HashSet::new();
        for variable in &self.variables {
            ensure!(
                seen.insert(variable.as_str()),
                "Dialect '{}' declares '{}' more than once",
                self.name,
                variable
            );
            ensure!(
                variable != FISCAL_YEAR_COLUMN,
                "'{FISCAL_YEAR_COLUMN}' is reserved for the fiscal-year tag"
            );
        }
        for (canonical, alternates) in &self.aliases {
            ensure!(
                seen.contains(canonical.as_str()),
                "Alias entry '{}' does not name a declared variable",
                canonical
            );
            for alternate in alternates {
                ensure!(
                    !seen.contains(alternate.as_str()),
                    "Alias '{}' for '{}' collides with a canonical variable",
                    alternate,
                    canonical
                );
            }
        }
        for key in &self.key_variables {
            ensure!(
                seen.contains(key.as_str()),
                "Key variable '{}' is not a declared variable",
                key
            );
        }
        Ok(())
    }

    pub fn aliases_for(&self, canonical: &str) -> &[String] {
        self.aliases
            .get(canonical)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every name a source may use: canonical names first, then aliases.
    pub fn source_names(&self) -> Vec<String> {
        let mut names = self.variables.clone();
        for canonical in &self.variables {
            for alternate in self.aliases_for(canonical) {
                if !names.contains(alternate) {
                    names.push(alternate.clone());
                }
            }
        }
        names
    }

    /// Output header: canonical variables followed by the fiscal-year tag.
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = self.variables.clone();
        columns.push(FISCAL_YEAR_COLUMN.to_string());
        columns
    }

    /// Key variables for coverage reporting, falling back to every variable.
    pub fn reported_variables(&self) -> &[String] {
        if self.key_variables.is_empty() {
            &self.variables
        } else {
            &self.key_variables
        }
    }
}
