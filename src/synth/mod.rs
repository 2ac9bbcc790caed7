//! Update synthesis: turning an analyzed read query into the write and
//! integrity queries an entity class needs.
//!
//! Every synthesized query is memoized in a [`SynthesisCache`] under a stable
//! [`TemplateKey`]. A caller-supplied override for a key always wins over
//! synthesis, and the whole table can be saved as JSON for inspection.

pub mod template;
pub mod validate;
pub mod write;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{AnalysisError, AnalysisResult, ConfigError, ConfigResult};
use crate::model::PropertyPlan;

pub use template::{Bindings, Filter, SelectTemplate, Template, Token, TripleTemplate, UpdateTemplate};
pub use write::{Synthesizer, NEW, OLD, THIS};

/// Stable name of one synthesized query.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TemplateKey {
    Creation,
    Init(String),
    Change(String),
    Add(String),
    Remove(String),
    Validate(String),
    Required(String),
}

impl TemplateKey {
    /// Keys a property with this plan needs.
    pub fn for_plan(plan: &PropertyPlan) -> Vec<TemplateKey> {
        let v = || plan.variable.clone();
        match (plan.functional, plan.nullable) {
            (true, false) => vec![
                TemplateKey::Change(v()),
                TemplateKey::Validate(v()),
                TemplateKey::Required(v()),
            ],
            (true, true) => vec![
                TemplateKey::Init(v()),
                TemplateKey::Change(v()),
                TemplateKey::Add(v()),
                TemplateKey::Remove(v()),
                TemplateKey::Validate(v()),
            ],
            (false, _) => vec![TemplateKey::Add(v()), TemplateKey::Remove(v())],
        }
    }

    pub fn variable(&self) -> Option<&str> {
        match self {
            TemplateKey::Creation => None,
            TemplateKey::Init(v)
            | TemplateKey::Change(v)
            | TemplateKey::Add(v)
            | TemplateKey::Remove(v)
            | TemplateKey::Validate(v)
            | TemplateKey::Required(v) => Some(v),
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (prefix, var) = match self {
            TemplateKey::Creation => return f.write_str("creation"),
            TemplateKey::Init(v) => ("init", v),
            TemplateKey::Change(v) => ("change", v),
            TemplateKey::Add(v) => ("add", v),
            TemplateKey::Remove(v) => ("remove", v),
            TemplateKey::Validate(v) => ("validate", v),
            TemplateKey::Required(v) => ("required", v),
        };
        write!(f, "{prefix}-{var}")
    }
}

impl FromStr for TemplateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "creation" {
            return Ok(TemplateKey::Creation);
        }
        let (prefix, var) = s
            .split_once('-')
            .ok_or_else(|| format!("unknown template key: {s}"))?;
        let var = var.to_string();
        match prefix {
            "init" => Ok(TemplateKey::Init(var)),
            "change" => Ok(TemplateKey::Change(var)),
            "add" => Ok(TemplateKey::Add(var)),
            "remove" => Ok(TemplateKey::Remove(var)),
            "validate" => Ok(TemplateKey::Validate(var)),
            "required" => Ok(TemplateKey::Required(var)),
            _ => Err(format!("unknown template key: {s}")),
        }
    }
}

/// Memoized templates plus caller overrides.
#[derive(Debug, Clone, Default)]
pub struct SynthesisCache {
    entries: BTreeMap<TemplateKey, Template>,
    overrides: BTreeMap<TemplateKey, String>,
}

impl SynthesisCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed overrides from a text table; unknown keys are a config error.
    pub fn with_overrides(table: &BTreeMap<String, String>) -> AnalysisResult<Self> {
        let mut cache = Self::new();
        for (key, text) in table {
            let key = key
                .parse::<TemplateKey>()
                .map_err(|message| AnalysisError::ConfigMismatch { message })?;
            cache.overrides.insert(key, text.clone());
        }
        Ok(cache)
    }

    /// The entry for `key`, synthesizing it on first use unless overridden.
    pub fn resolve(
        &mut self,
        key: TemplateKey,
        synthesize: impl FnOnce() -> AnalysisResult<Option<Template>>,
    ) -> AnalysisResult<Option<&Template>> {
        if !self.entries.contains_key(&key) {
            let template = match self.overrides.get(&key) {
                Some(text) => Some(Template::Text(text.clone())),
                None => synthesize()?,
            };
            match template {
                Some(template) => {
                    tracing::debug!(%key, overridden = template.is_override(), "memoized template");
                    self.entries.insert(key.clone(), template);
                }
                None => return Ok(None),
            }
        }
        Ok(self.entries.get(&key))
    }

    pub fn get(&self, key: &TemplateKey) -> Option<&Template> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &TemplateKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every memoized entry as parameterized text.
    pub fn table(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(key, template)| (key.to_string(), template.to_text()))
            .collect()
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(&self.table()).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read a saved table back as an override set.
    pub fn load_table(path: &Path) -> ConfigResult<BTreeMap<String, String>> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

impl Synthesizer<'_> {
    /// Synthesize one key; `None` when it does not apply to this class.
    pub fn synthesize(&self, key: &TemplateKey) -> AnalysisResult<Option<Template>> {
        Ok(Some(match key {
            TemplateKey::Creation => Template::Update(self.creation()?),
            TemplateKey::Init(v) => Template::Update(self.initializer(v)?),
            TemplateKey::Change(v) => Template::Update(self.modify(v, true, true)?),
            TemplateKey::Add(v) => Template::Update(self.modify(v, false, true)?),
            TemplateKey::Remove(v) => Template::Update(self.modify(v, true, false)?),
            TemplateKey::Validate(v) => Template::Select(self.functional_check(v)?),
            TemplateKey::Required(v) => match self.required_check(v)? {
                Some(select) => Template::Select(select),
                None => return Ok(None),
            },
        }))
    }

    /// Fill `cache` with every key the class needs.
    pub fn synthesize_all(&self, cache: &mut SynthesisCache) -> AnalysisResult<()> {
        self.check_contract()?;
        let keys = std::iter::once(TemplateKey::Creation)
            .chain(self.plans().iter().flat_map(TemplateKey::for_plan));
        for key in keys {
            cache.resolve(key.clone(), || self.synthesize(&key))?;
        }
        tracing::debug!(templates = cache.len(), "synthesis complete");
        Ok(())
    }
}
