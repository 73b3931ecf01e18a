use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::decl::{ClassGraph, ClassSpec, HierarchySpec};

/// Which C++ ABI a context lays tables out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbiKind {
    #[default]
    Itanium,
    Microsoft,
}

impl fmt::Display for AbiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiKind::Itanium => write!(f, "itanium"),
            AbiKind::Microsoft => write!(f, "microsoft"),
        }
    }
}

/// Target parameters shared by both layout algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AbiOptions {
    /// Size and alignment of a data pointer in bytes (4 or 8).
    pub pointer_width: u8,
    /// Emit the RTTI complete-object-locator slot ahead of Microsoft vftables.
    pub rtti_data: bool,
}

impl Default for AbiOptions {
    fn default() -> Self {
        Self {
            pointer_width: 8,
            rtti_data: true,
        }
    }
}

impl AbiOptions {
    pub const fn pointer_bytes(&self) -> i64 {
        self.pointer_width as i64
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.pointer_width, 4 | 8) {
            bail!("unsupported pointer width {} (expected 4 or 8)", self.pointer_width);
        }
        Ok(())
    }
}

/// A complete layout request: target parameters plus the hierarchy to lay out.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    #[serde(default)]
    pub abi: AbiKind,
    #[serde(default)]
    pub options: AbiOptions,
    #[serde(default, rename = "class")]
    pub classes: Vec<ClassSpec>,
}

impl LayoutConfig {
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let config: LayoutConfig = toml::from_str(src).context("failed to parse layout config")?;
        config.options.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&src).with_context(|| format!("in {}", path.display()))
    }

    pub fn hierarchy(&self) -> HierarchySpec {
        HierarchySpec {
            classes: self.classes.clone(),
        }
    }

    pub fn graph(&self) -> Result<ClassGraph> {
        self.hierarchy().to_graph()
    }
}
