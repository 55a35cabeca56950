//! Dynamics parameter files.
//!
//! Point mechanisms (synapses) are a single JSON object
//! `{"expsyn": {"e": 0, "tau": 2}}`. Density mechanisms come as a base file
//! of mechanism groups, each a list of blocks mixing group variables with
//! per-section mechanism blocks, plus optional per-cell override files that
//! replace group variables:
//!
//! ```json
//! {"pas_0": [{"e_pas": -70},
//!            {"dend": {"section": "dend", "mech": "pas", "g": 0.001, "e": "e_pas"}}]}
//! ```

use crate::error::{Result, StoreError};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// A named mechanism with numeric parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct MechanismDesc {
    pub name: String,
    pub values: BTreeMap<String, f64>,
}

impl MechanismDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, param: &str, value: f64) -> Self {
        self.set(param, value);
        self
    }

    pub fn set(&mut self, param: &str, value: f64) {
        self.values.insert(param.to_string(), value);
    }

    pub fn get(&self, param: &str) -> Option<f64> {
        self.values.get(param).copied()
    }
}

impl fmt::Display for MechanismDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.values.is_empty() {
            let params: Vec<String> = self
                .values
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "({})", params.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionKind {
    Soma,
    Dend,
    Axon,
    Apic,
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Soma => "soma",
            SectionKind::Dend => "dend",
            SectionKind::Axon => "axon",
            SectionKind::Apic => "apic",
        }
    }
}

impl FromStr for SectionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "soma" => Ok(SectionKind::Soma),
            "dend" => Ok(SectionKind::Dend),
            "axon" => Ok(SectionKind::Axon),
            "apic" => Ok(SectionKind::Apic),
            other => Err(format!("unknown section kind {:?}", other)),
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field of a mechanism block, classified once while parsing.
#[derive(Debug, Clone, PartialEq)]
enum BlockField {
    Section(String),
    Mech(String),
    /// Parameter taking its value from a group variable.
    Alias { param: String, variable: String },
    Param { param: String, value: f64 },
}

/// An entry of a mechanism group's parameter list.
#[derive(Debug, Clone, PartialEq)]
enum GroupField {
    Variable { name: String, value: f64 },
    Block(MechBlock),
}

/// A mechanism placed on one section kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MechBlock {
    pub section: SectionKind,
    pub mech: MechanismDesc,
    /// parameter -> group variable
    pub aliases: BTreeMap<String, String>,
}

/// Group variables and the mechanism blocks that may refer to them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MechGroup {
    pub variables: BTreeMap<String, f64>,
    pub blocks: Vec<MechBlock>,
}

pub type DensityBase = BTreeMap<String, MechGroup>;

/// group id -> variable -> value
pub type DensityOverride = BTreeMap<String, BTreeMap<String, f64>>;

/// Resolved mechanisms per section kind.
pub type DensityMechs = BTreeMap<SectionKind, Vec<MechanismDesc>>;

fn config_error(path: &Path, reason: impl Into<String>) -> StoreError {
    StoreError::Config {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn parse_json(text: &str, path: &Path) -> Result<Value> {
    serde_json::from_str(text).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn as_object<'v>(value: &'v Value, path: &Path, what: &str) -> Result<&'v Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| config_error(path, format!("{} must be an object", what)))
}

fn numeric_map(value: &Value, path: &Path, what: &str) -> Result<BTreeMap<String, f64>> {
    as_object(value, path, what)?
        .iter()
        .map(|(k, v)| {
            v.as_f64()
                .map(|x| (k.clone(), x))
                .ok_or_else(|| config_error(path, format!("{}: {} is not a number", what, k)))
        })
        .collect()
}

pub fn parse_point_mechanism(text: &str, path: &Path) -> Result<MechanismDesc> {
    let json = parse_json(text, path)?;
    let mechs = as_object(&json, path, "point mechanism file")?;
    let mut iter = mechs.iter();
    match (iter.next(), iter.next()) {
        (Some((name, params)), None) => Ok(MechanismDesc {
            name: name.clone(),
            values: numeric_map(params, path, name)?,
        }),
        _ => Err(config_error(
            path,
            format!(
                "point mechanism file must describe exactly one mechanism, found {}",
                mechs.len()
            ),
        )),
    }
}

pub fn read_point_mechanism(path: &Path) -> Result<MechanismDesc> {
    let text = fs::read_to_string(path).map_err(StoreError::io(path))?;
    parse_point_mechanism(&text, path)
}

fn classify_block_field(key: &str, value: &Value) -> std::result::Result<BlockField, String> {
    match (key, value) {
        ("section", Value::String(s)) => Ok(BlockField::Section(s.clone())),
        ("mech", Value::String(s)) => Ok(BlockField::Mech(s.clone())),
        ("section", _) | ("mech", _) => Err(format!("{} must be a string", key)),
        (_, Value::String(s)) => Ok(BlockField::Alias {
            param: key.to_string(),
            variable: s.clone(),
        }),
        (_, Value::Number(n)) => n
            .as_f64()
            .map(|value| BlockField::Param {
                param: key.to_string(),
                value,
            })
            .ok_or_else(|| format!("{} is out of range", key)),
        _ => Err(format!("no idea how to handle entry {}", key)),
    }
}

fn classify_block(
    group: &str,
    key: &str,
    fields: &Map<String, Value>,
    path: &Path,
) -> Result<MechBlock> {
    let mut section = None;
    let mut name = None;
    let mut values = BTreeMap::new();
    let mut aliases = BTreeMap::new();

    for (k, v) in fields {
        let field = classify_block_field(k, v).map_err(|reason| {
            config_error(path, format!("group {} block {}: {}", group, key, reason))
        })?;
        match field {
            BlockField::Section(s) => section = Some(s),
            BlockField::Mech(m) => name = Some(m),
            BlockField::Alias { param, variable } => {
                aliases.insert(param, variable);
            }
            BlockField::Param { param, value } => {
                values.insert(param, value);
            }
        }
    }

    let missing = |what: &str| {
        config_error(path, format!("group {} block {}: no {}", group, key, what))
    };
    let section: SectionKind = section
        .ok_or_else(|| missing("section"))?
        .parse()
        .map_err(|e: String| config_error(path, format!("group {} block {}: {}", group, key, e)))?;
    let name = name.ok_or_else(|| missing("mech"))?;

    Ok(MechBlock {
        section,
        mech: MechanismDesc { name, values },
        aliases,
    })
}

fn classify_group_field(group: &str, key: &str, value: &Value, path: &Path) -> Result<GroupField> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(|value| GroupField::Variable {
                name: key.to_string(),
                value,
            })
            .ok_or_else(|| config_error(path, format!("group {}: {} is out of range", group, key))),
        Value::Object(fields) => classify_block(group, key, fields, path).map(GroupField::Block),
        _ => Err(config_error(
            path,
            format!("group {}: no idea how to handle entry {}", group, key),
        )),
    }
}

pub fn parse_density_base(text: &str, path: &Path) -> Result<DensityBase> {
    let json = parse_json(text, path)?;
    let mut base = DensityBase::new();

    for (group, entries) in as_object(&json, path, "density mechanism file")? {
        let entries: Vec<&Value> = match entries {
            Value::Array(list) => list.iter().collect(),
            Value::Object(_) => vec![entries],
            _ => {
                return Err(config_error(
                    path,
                    format!("group {} must be a list of parameter blocks", group),
                ))
            }
        };

        let mut mech_group = MechGroup::default();
        for entry in entries {
            for (key, value) in as_object(entry, path, group)? {
                match classify_group_field(group, key, value, path)? {
                    GroupField::Variable { name, value } => {
                        mech_group.variables.insert(name, value);
                    }
                    GroupField::Block(block) => mech_group.blocks.push(block),
                }
            }
        }
        base.insert(group.clone(), mech_group);
    }
    Ok(base)
}

pub fn read_density_base(path: &Path) -> Result<DensityBase> {
    let text = fs::read_to_string(path).map_err(StoreError::io(path))?;
    parse_density_base(&text, path)
}

pub fn parse_density_override(text: &str, path: &Path) -> Result<DensityOverride> {
    let json = parse_json(text, path)?;
    let mut overrides = DensityOverride::new();
    for (group, vars) in as_object(&json, path, "density override file")? {
        overrides.insert(group.clone(), numeric_map(vars, path, group)?);
    }
    Ok(overrides)
}

pub fn read_density_override(path: &Path) -> Result<DensityOverride> {
    let text = fs::read_to_string(path).map_err(StoreError::io(path))?;
    parse_density_override(&text, path)
}

/// Applies `overrides` to the group variables of `base` and substitutes
/// every aliased parameter with its variable's value.
pub fn resolve_density(
    base: &DensityBase,
    overrides: Option<&DensityOverride>,
) -> Result<DensityMechs> {
    if let Some(overrides) = overrides {
        for group in overrides.keys().filter(|g| !base.contains_key(*g)) {
            warn!(group = %group, "override for unknown mechanism group ignored");
        }
    }

    let mut mechs = DensityMechs::new();
    for (id, group) in base {
        let mut variables = group.variables.clone();
        if let Some(vars) = overrides.and_then(|o| o.get(id)) {
            variables.extend(vars.iter().map(|(k, v)| (k.clone(), *v)));
        }

        for block in &group.blocks {
            let mut mech = block.mech.clone();
            for (param, variable) in &block.aliases {
                let value = variables.get(variable).ok_or_else(|| {
                    StoreError::not_found("variable", format!("{}.{}", id, variable))
                })?;
                mech.set(param, *value);
            }
            mechs.entry(block.section).or_default().push(mech);
        }
    }
    Ok(mechs)
}

/// Where dynamics files come from, keyed by the file names found in type
/// tables and node groups.
pub trait DynamicsSource: Send + Sync {
    fn point_mechanism(&self, file: &str) -> Result<Arc<MechanismDesc>>;

    fn density_base(&self, file: &str) -> Result<Arc<DensityBase>>;

    fn density_override(&self, file: &str) -> Result<Arc<DensityOverride>>;
}

/// Directory-backed dynamics files, each parsed at most once.
#[derive(Debug, Default)]
pub struct DynamicsCatalog {
    synaptic_dir: PathBuf,
    neuron_dir: PathBuf,
    point: DashMap<String, Arc<MechanismDesc>>,
    density: DashMap<String, Arc<DensityBase>>,
    overrides: DashMap<String, Arc<DensityOverride>>,
}

fn cached<T>(
    cache: &DashMap<String, Arc<T>>,
    key: &str,
    load: impl FnOnce() -> Result<T>,
) -> Result<Arc<T>> {
    if let Some(hit) = cache.get(key) {
        return Ok(hit.value().clone());
    }
    let parsed = Arc::new(load()?);
    cache.insert(key.to_string(), parsed.clone());
    Ok(parsed)
}

impl DynamicsCatalog {
    /// Synapse files resolve against `synaptic_dir`, density base and
    /// override files against `neuron_dir`.
    pub fn new(synaptic_dir: impl Into<PathBuf>, neuron_dir: impl Into<PathBuf>) -> Self {
        Self {
            synaptic_dir: synaptic_dir.into(),
            neuron_dir: neuron_dir.into(),
            ..Default::default()
        }
    }

    /// Number of parsed files held.
    pub fn cached_files(&self) -> usize {
        self.point.len() + self.density.len() + self.overrides.len()
    }
}

impl DynamicsSource for DynamicsCatalog {
    fn point_mechanism(&self, file: &str) -> Result<Arc<MechanismDesc>> {
        cached(&self.point, file, || {
            let path = self.synaptic_dir.join(file);
            debug!(path = %path.display(), "reading point mechanism");
            read_point_mechanism(&path)
        })
    }

    fn density_base(&self, file: &str) -> Result<Arc<DensityBase>> {
        cached(&self.density, file, || {
            let path = self.neuron_dir.join(file);
            debug!(path = %path.display(), "reading density mechanisms");
            read_density_base(&path)
        })
    }

    fn density_override(&self, file: &str) -> Result<Arc<DensityOverride>> {
        cached(&self.overrides, file, || {
            let path = self.neuron_dir.join(file);
            debug!(path = %path.display(), "reading density overrides");
            read_density_override(&path)
        })
    }
}
