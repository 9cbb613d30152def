//! Pattern catalog.
//!
//! The catalog is the declarative list of every command the engine
//! understands. It is loaded once (the embedded built-in YAML or a
//! caller-supplied file), validated, and never mutated afterwards.

pub mod template;

pub use template::{Arity, Segment, Template};

use crate::error::{Error, ErrorContext, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

const BUILTIN_CATALOG: &str = include_str!("builtin.yaml");

/// Token class of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    Bool,
    Enum,
    Ipv4,
    Ipv6,
    /// IPv4 or IPv6 literal
    Ip,
    /// Filter address: literal, range, prefix, list or wildcard
    Address,
    /// Route destination: `default`, prefix or dotted mask
    Prefix,
    Mac,
    Interface,
    Port,
    Protocol,
    /// Route next hop (`pp 1`, `tunnel 2`, `dhcp lan2`, an address, ...)
    Gateway,
    Hex,
    /// Address with prefix length or an address range
    Network,
    /// DNS query pattern
    Domain,
    String,
    Flag,
}

/// Whether a parameter is written positionally or as `key=value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamForm {
    Positional,
    KeyValue,
}

/// One parameter of a command pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ParamKind,

    #[serde(default)]
    pub required: bool,

    /// Inclusive numeric bounds for `int` parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<[u64; 2]>,

    /// Allowed spellings for `enum` parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Normalizer field key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equivalence: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<ParamForm>,

    #[serde(default)]
    pub repeated: bool,

    #[serde(default)]
    pub rest: bool,

    /// Upper bound on list length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

impl Parameter {
    /// Checks an integer value against the declared range.
    pub fn check_range(&self, value: u64) -> Result<()> {
        match self.range {
            Some([min, max]) if value < min || value > max => Err(Error::validation(
                &self.name,
                "value",
                format!("{} is outside {}..={}", value, min, max),
            )),
            _ => Ok(()),
        }
    }
}

/// An example line that must match its own pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Example {
    pub input: String,
    /// Where the example was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// One supported command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPattern {
    pub name: String,
    pub family: String,

    /// Context this sub-option line belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Context this line opens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opens_context: Option<String>,

    pub syntax: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_form: Option<String>,

    /// Legacy spellings the device still accepts and may print
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    #[serde(default)]
    pub examples: Vec<Example>,

    #[serde(skip)]
    ordinal: usize,

    #[serde(skip)]
    template: Template,

    #[serde(skip)]
    no_form_template: Option<Template>,

    #[serde(skip)]
    alias_templates: Vec<Template>,
}

impl CommandPattern {
    /// Position in the catalog, which is also the emission order.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn no_form_template(&self) -> Option<&Template> {
        self.no_form_template.as_ref()
    }

    pub fn alias_templates(&self) -> &[Template] {
        &self.alias_templates
    }

    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Declared defaults, keyed by parameter name.
    pub fn defaults(&self) -> IndexMap<String, String> {
        self.parameters
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect()
    }

    /// Renders the canonical set command.
    pub fn render(&self, values: &IndexMap<String, String>) -> Result<String> {
        self.template.render(values, |name| {
            self.param(name).and_then(|p| p.default.clone())
        })
    }

    /// Renders the no-form.
    pub fn render_no_form(&self, values: &IndexMap<String, String>) -> Result<String> {
        let template = self
            .no_form_template
            .as_ref()
            .ok_or_else(|| Error::catalog(&self.name, "pattern has no no-form"))?;
        template.render(values, |_| None)
    }

    fn compile(&mut self, ordinal: usize) -> Result<()> {
        self.ordinal = ordinal;
        self.template = Template::parse(&self.syntax)?;
        self.no_form_template = self.no_form.as_deref().map(Template::parse).transpose()?;
        self.alias_templates = self
            .aliases
            .iter()
            .map(|a| Template::parse(a))
            .collect::<Result<Vec<_>>>()?;
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        let mut declared: HashMap<&str, &Parameter> = HashMap::new();
        for param in &self.parameters {
            if declared.insert(param.name.as_str(), param).is_some() {
                return Err(Error::catalog(
                    &self.name,
                    format!("parameter '{}' declared twice", param.name),
                ));
            }
            if param.range.is_some() && param.kind != ParamKind::Int {
                return Err(Error::catalog(
                    &self.name,
                    format!("range on non-int parameter '{}'", param.name),
                ));
            }
        }

        let used = self.template.placeholders();
        for (name, arity) in &used {
            let param = declared.get(name).ok_or_else(|| {
                Error::catalog(&self.name, format!("placeholder '{}' is not declared", name))
            })?;
            if param.repeated && *arity != Arity::List {
                return Err(Error::catalog(
                    &self.name,
                    format!("'{}' is declared repeated but is not a list", name),
                ));
            }
            if param.rest && *arity != Arity::Rest {
                return Err(Error::catalog(
                    &self.name,
                    format!("'{}' is declared rest but does not take the rest of the line", name),
                ));
            }
        }
        for flag in self.template.flags() {
            if declared.get(flag).map(|p| p.kind) != Some(ParamKind::Flag) {
                return Err(Error::catalog(
                    &self.name,
                    format!("flag '{{{}}}' must bind a flag parameter", flag),
                ));
            }
        }
        for name in declared.keys() {
            if !used.iter().any(|(u, _)| u == name) {
                return Err(Error::catalog(
                    &self.name,
                    format!("parameter '{}' is never used", name),
                ));
            }
        }

        let extra = self
            .no_form_template
            .iter()
            .chain(self.alias_templates.iter());
        for template in extra {
            for (name, _) in template.placeholders() {
                if !declared.contains_key(name) {
                    return Err(Error::catalog(
                        &self.name,
                        format!("'{}' in '{}' is not declared", name, template.source()),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    version: String,
    commands: Vec<CommandPattern>,
}

/// The validated, immutable set of command patterns.
#[derive(Debug, Clone)]
pub struct Catalog {
    version: String,
    patterns: Vec<CommandPattern>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// The catalog embedded in the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    /// Loads a catalog file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parses and validates catalog YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(content)?;
        let mut patterns = file.commands;
        let mut index = HashMap::new();
        let mut syntaxes: HashMap<String, String> = HashMap::new();

        for (ordinal, pattern) in patterns.iter_mut().enumerate() {
            pattern.compile(ordinal)?;
            if index.insert(pattern.name.clone(), ordinal).is_some() {
                return Err(Error::catalog(&pattern.name, "duplicate pattern name"));
            }

            let sources = std::iter::once(pattern.template.source())
                .chain(pattern.no_form_template.iter().map(Template::source))
                .chain(pattern.alias_templates.iter().map(Template::source));
            for source in sources {
                if let Some(owner) = syntaxes.insert(source.to_string(), pattern.name.clone()) {
                    if owner != pattern.name {
                        return Err(Error::catalog(
                            &pattern.name,
                            format!("syntax '{}' already belongs to '{}'", source, owner),
                        ));
                    }
                }
            }
        }

        for pattern in &patterns {
            if let Some(context) = &pattern.context {
                let opened = patterns
                    .iter()
                    .any(|p| p.opens_context.as_deref() == Some(context.as_str()));
                if !opened {
                    return Err(Error::catalog(
                        &pattern.name,
                        format!("no pattern opens context '{}'", context),
                    ));
                }
            }
        }

        debug!(version = %file.version, patterns = patterns.len(), "Loaded command catalog");
        Ok(Self {
            version: file.version,
            patterns,
            index,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn get(&self, name: &str) -> Option<&CommandPattern> {
        self.index.get(name).map(|&i| &self.patterns[i])
    }

    /// Looks up a pattern the caller knows exists.
    pub fn pattern(&self, name: &str) -> Result<&CommandPattern> {
        self.get(name)
            .ok_or_else(|| Error::catalog(name, "pattern is not in the catalog"))
    }

    pub fn patterns(&self) -> impl Iterator<Item = &CommandPattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Catalog position of a pattern; unknown names sort last.
    pub fn ordinal(&self, name: &str) -> usize {
        self.index.get(name).copied().unwrap_or(usize::MAX)
    }

    /// Patterns of one family in declaration order.
    pub fn by_family<'a>(&'a self, family: &'a str) -> impl Iterator<Item = &'a CommandPattern> {
        self.patterns.iter().filter(move |p| p.family == family)
    }

    /// Distinct family names in declaration order.
    pub fn families(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for pattern in &self.patterns {
            if !out.contains(&pattern.family.as_str()) {
                out.push(&pattern.family);
            }
        }
        out
    }

    /// First keyword of every syntax, alias and no-form.
    pub fn heads(&self) -> BTreeSet<String> {
        self.patterns
            .iter()
            .flat_map(|p| {
                std::iter::once(&p.template)
                    .chain(p.no_form_template.iter())
                    .chain(p.alias_templates.iter())
            })
            .map(|t| t.head().to_string())
            .collect()
    }
}
