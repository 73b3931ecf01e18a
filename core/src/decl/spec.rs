//! Serializable description of a class hierarchy.
//!
//! Fixtures and configuration files describe hierarchies in TOML:
//!
//! ```toml
//! [[class]]
//! name = "A"
//! data_size = 4
//! data_align = 4
//! [[class.method]]
//! name = "f"
//! virtual = true
//!
//! [[class]]
//! name = "B"
//! bases = [{ name = "A", virtual = true }]
//! [[class.method]]
//! name = "f"
//! ```

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use super::builder::{ClassGraphBuilder, MethodSpec};
use super::graph::{BaseSpec, ClassGraph};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HierarchySpec {
    #[serde(default, rename = "class")]
    pub classes: Vec<ClassSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassSpec {
    pub name: String,
    #[serde(default)]
    pub bases: Vec<BaseEntry>,
    #[serde(default)]
    pub data_size: u64,
    #[serde(default = "default_align")]
    pub data_align: u64,
    #[serde(default, rename = "method")]
    pub methods: Vec<MethodEntry>,
}

/// Either a bare base name or a table carrying the virtuality flag.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BaseEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default, rename = "virtual")]
        is_virtual: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodEntry {
    /// Omitted for destructors
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    #[serde(default)]
    pub pure: bool,
    #[serde(default)]
    pub destructor: bool,
    /// Covariant return: name of the class returned by pointer or reference
    #[serde(default)]
    pub returns: Option<String>,
    /// Explicit override targets spelled `Class::method`
    #[serde(default)]
    pub overrides: Vec<String>,
}

fn default_align() -> u64 {
    1
}

impl HierarchySpec {
    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).context("failed to parse class hierarchy")
    }

    /// Build and finalize the declaration graph described by this spec.
    pub fn to_graph(&self) -> Result<ClassGraph> {
        let mut builder = ClassGraphBuilder::new();
        for class in &self.classes {
            let mut bases = Vec::with_capacity(class.bases.len());
            for entry in &class.bases {
                let (name, is_virtual) = match entry {
                    BaseEntry::Name(name) => (name.as_str(), false),
                    BaseEntry::Detailed { name, is_virtual } => (name.as_str(), *is_virtual),
                };
                let id = builder
                    .graph()
                    .lookup(name)
                    .ok_or_else(|| anyhow!("class '{}' names unknown base '{}'", class.name, name))?;
                bases.push(if is_virtual {
                    BaseSpec::virtual_base(id)
                } else {
                    BaseSpec::direct(id)
                });
            }
            let id = builder.add_class(&class.name, bases)?;
            builder.set_data(id, class.data_size, class.data_align)?;

            for method in &class.methods {
                let spec = method
                    .to_method_spec(&builder)
                    .with_context(|| format!("in class '{}'", class.name))?;
                builder.add_method(id, spec)?;
            }
        }
        builder.finish()
    }
}

impl MethodEntry {
    fn to_method_spec(&self, builder: &ClassGraphBuilder) -> Result<MethodSpec> {
        let graph = builder.graph();
        let mut spec = match (self.destructor, &self.name) {
            (true, _) => MethodSpec::destructor(),
            (false, Some(name)) => MethodSpec::method(name),
            (false, None) => bail!("method entry without a name"),
        };
        spec.is_virtual = self.is_virtual;
        spec.params = self.params.clone();
        if self.pure {
            spec = spec.pure();
        }
        if let Some(ret) = &self.returns {
            let class = graph
                .lookup(ret)
                .ok_or_else(|| anyhow!("unknown return class '{}'", ret))?;
            spec = spec.returns(class);
        }
        for target in &self.overrides {
            let (class_name, method_name) = target
                .split_once("::")
                .ok_or_else(|| anyhow!("override target '{}' must be spelled Class::method", target))?;
            let class = graph
                .lookup(class_name)
                .ok_or_else(|| anyhow!("unknown class '{}' in override target", class_name))?;
            let method = if method_name.starts_with('~') {
                graph.destructor(class)
            } else {
                graph.find_method(class, method_name)
            }
            .ok_or_else(|| anyhow!("'{}' has no member '{}'", class_name, method_name))?;
            spec = spec.overriding(method);
        }
        Ok(spec)
    }
}
