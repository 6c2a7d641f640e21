use crate::constraint::{self, Constraint, ConstraintError};
use crate::types::{AlternativeName, ModuleName, ServiceName, VolumeName};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Name of the descriptor file inside each module directory.
pub const DESCRIPTOR_FILE: &str = "module.toml";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read module descriptor: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse module descriptor: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("descriptor in directory '{dir}' declares module name '{declared}'")]
    NameMismatch { dir: String, declared: String },
    #[error("invalid dependency in module '{module}': {source}")]
    Constraint {
        module: String,
        #[source]
        source: ConstraintError,
    },
    #[error("alternative '{alternative}' of module '{module}': {reason}")]
    InvalidAlternative {
        module: String,
        alternative: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ModuleDescriptor {
    pub name: ModuleName,
    pub version: Version,
    /// Minimum engine version this module works with.
    #[serde(default)]
    pub engine: Option<Version>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<ServiceName, ServiceDecl>,
    #[serde(default)]
    pub volumes: BTreeMap<VolumeName, VolumeDecl>,
    #[serde(default)]
    pub alternatives: BTreeMap<AlternativeName, AlternativeDecl>,
    #[serde(default)]
    pub dependencies: DependencySection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceDecl {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<Version>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    /// Usable by services of other modules.
    #[default]
    Shared,
    /// Bound to a directory on the host filesystem.
    Exposed,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VolumeDecl {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: VolumeKind,
    #[serde(default)]
    pub version: Option<Version>,
    /// Host path for exposed volumes, relative to the project root.
    #[serde(default)]
    pub mapping: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AlternativeDecl {
    #[serde(default)]
    pub description: Option<String>,
    /// Service name → fragment reference under `alt/<alternative>/`.
    #[serde(default)]
    pub substitute: BTreeMap<ServiceName, String>,
    #[serde(default)]
    pub add: Vec<ServiceName>,
    #[serde(default)]
    pub remove: Vec<ServiceName>,
}

impl AlternativeDecl {
    /// Every service this alternative touches.
    pub fn touched_services(&self) -> BTreeSet<&ServiceName> {
        self.substitute
            .keys()
            .chain(self.add.iter())
            .chain(self.remove.iter())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DependencySection {
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
}

/// Parsed dependency constraints of one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleConstraints {
    pub services: Vec<Constraint>,
    pub volumes: Vec<Constraint>,
}

impl ModuleDescriptor {
    /// Parse the dependency lines. Lines that are not constraints at all are
    /// skipped with a warning; lines that start a constraint but are
    /// malformed are errors.
    pub fn constraints(&self) -> Result<ModuleConstraints, DescriptorError> {
        Ok(ModuleConstraints {
            services: self.parse_lines(&self.dependencies.services)?,
            volumes: self.parse_lines(&self.dependencies.volumes)?,
        })
    }

    fn parse_lines(&self, lines: &[String]) -> Result<Vec<Constraint>, DescriptorError> {
        let mut out = Vec::with_capacity(lines.len());
        for line in lines {
            match constraint::parse(line) {
                Ok(Some(c)) => out.push(c),
                Ok(None) => {
                    warn!("module {}: ignoring dependency line '{line}'", self.name);
                }
                Err(source) => {
                    return Err(DescriptorError::Constraint {
                        module: self.name.to_string(),
                        source,
                    })
                }
            }
        }
        Ok(out)
    }

    /// Structural checks that serde cannot express.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        self.constraints()?;
        for (alt_name, alt) in &self.alternatives {
            let mut seen = BTreeSet::new();
            let all = alt
                .substitute
                .keys()
                .chain(alt.add.iter())
                .chain(alt.remove.iter());
            for service in all {
                if !seen.insert(service) {
                    return Err(DescriptorError::InvalidAlternative {
                        module: self.name.to_string(),
                        alternative: alt_name.to_string(),
                        reason: format!("service '{service}' listed more than once"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Version of a volume: its own declaration, falling back to the module's.
    pub fn volume_version(&self, volume: &str) -> Version {
        self.volumes
            .get(volume)
            .and_then(|v| v.version)
            .unwrap_or(self.version)
    }

    /// Version of a service: its own declaration, falling back to the module's.
    pub fn service_version(&self, service: &str) -> Version {
        self.services
            .get(service)
            .and_then(|s| s.version)
            .unwrap_or(self.version)
    }
}

pub fn parse_descriptor_str(input: &str) -> Result<ModuleDescriptor, DescriptorError> {
    let descriptor: ModuleDescriptor = toml::from_str(input)?;
    descriptor.validate()?;
    Ok(descriptor)
}

/// Load `<module_dir>/module.toml` and check that it names its own directory.
pub fn load_descriptor(module_dir: &Path) -> Result<ModuleDescriptor, DescriptorError> {
    let content = fs::read_to_string(module_dir.join(DESCRIPTOR_FILE))?;
    let descriptor = parse_descriptor_str(&content)?;
    let dir_name = module_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if descriptor.name.as_str() != dir_name {
        return Err(DescriptorError::NameMismatch {
            dir: dir_name,
            declared: descriptor.name.into_inner(),
        });
    }
    Ok(descriptor)
}
