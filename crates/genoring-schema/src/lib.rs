//! Module descriptors, version ordering, dependency constraints, and
//! environment files for GenoRing.
//!
//! This crate defines the schema layer: the `module.toml` descriptor
//! (`ModuleDescriptor`), the `MAJOR.MINOR[-QUALIFIER[N]]` version order
//! (`Version`), the `REQUIRES`/`CONFLICTS`/`BEFORE`/`AFTER` constraint grammar
//! (`Constraint`), comment-preserving environment files (`EnvFile`), and
//! identifier newtypes.

pub mod constraint;
pub mod descriptor;
pub mod envfile;
pub mod types;
pub mod version;

pub use constraint::{Clause, Constraint, ConstraintError, ConstraintKind, ModuleSet};
pub use descriptor::{
    load_descriptor, parse_descriptor_str, AlternativeDecl, DependencySection, DescriptorError,
    ModuleConstraints, ModuleDescriptor, ServiceDecl, VolumeDecl, VolumeKind, DESCRIPTOR_FILE,
};
pub use envfile::{EnvFile, EnvFileError, VarTags};
pub use types::{is_valid_module_name, AlternativeName, ModuleName, ServiceName, VolumeName};
pub use version::{sort_tags_desc, Comparator, Qualifier, Version};
