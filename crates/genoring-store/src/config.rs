use crate::layout::ProjectLayout;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;

fn default_environment() -> String {
    "prod".to_owned()
}

fn default_online_profiles() -> Vec<String> {
    vec!["prod".to_owned(), "staging".to_owned(), "dev".to_owned()]
}

fn default_readiness_timeout() -> u64 {
    300
}

fn default_compose_command() -> Vec<String> {
    vec!["docker".to_owned(), "compose".to_owned()]
}

fn default_container_command() -> String {
    "docker".to_owned()
}

/// Optional `genoring.toml` at the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Compose project name; defaults to the project directory name.
    #[serde(default)]
    pub project_name: Option<String>,
    /// Online sub-profile used when the system is started online.
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_online_profiles")]
    pub online_profiles: Vec<String>,
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,
    #[serde(default = "default_compose_command")]
    pub compose_command: Vec<String>,
    /// Lower-level container CLI used for inspection and image builds.
    #[serde(default = "default_container_command")]
    pub container_command: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project_name: None,
            environment: default_environment(),
            online_profiles: default_online_profiles(),
            readiness_timeout_secs: default_readiness_timeout(),
            compose_command: default_compose_command(),
            container_command: default_container_command(),
        }
    }
}

impl EngineConfig {
    /// Load `genoring.toml`, falling back to defaults when it is absent.
    pub fn load(layout: &ProjectLayout) -> Result<Self, StoreError> {
        let path = layout.engine_config_file();
        if !path.exists() {
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.online_profiles.is_empty() {
            return Err(StoreError::Config(
                "online_profiles must name at least one profile".to_owned(),
            ));
        }
        if !self.online_profiles.contains(&self.environment) {
            return Err(StoreError::Config(format!(
                "environment '{}' is not one of the online profiles ({})",
                self.environment,
                self.online_profiles.join(", ")
            )));
        }
        for reserved in ["offline", "backend", "online"] {
            if self.online_profiles.iter().any(|p| p == reserved) {
                return Err(StoreError::Config(format!(
                    "'{reserved}' cannot be used as an online profile name"
                )));
            }
        }
        if self.compose_command.is_empty() || self.container_command.is_empty() {
            return Err(StoreError::Config(
                "compose_command and container_command must not be empty".to_owned(),
            ));
        }
        Ok(())
    }

    /// Every concrete profile: the online sub-profiles, then `backend` and
    /// `offline`.
    pub fn all_profiles(&self) -> Vec<String> {
        let mut all = self.online_profiles.clone();
        all.push("backend".to_owned());
        all.push("offline".to_owned());
        all
    }

    pub fn project_name(&self, layout: &ProjectLayout) -> String {
        self.project_name.clone().unwrap_or_else(|| {
            layout
                .root()
                .file_name()
                .map_or_else(|| "genoring".to_owned(), |n| n.to_string_lossy().to_lowercase())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&ProjectLayout::new(dir.path())).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(
            config.all_profiles(),
            vec!["prod", "staging", "dev", "backend", "offline"]
        );
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        fs::write(
            layout.engine_config_file(),
            "environment = \"dev\"\nreadiness_timeout_secs = 30\n",
        )
        .unwrap();
        let config = EngineConfig::load(&layout).unwrap();
        assert_eq!(config.environment, "dev");
        assert_eq!(config.readiness_timeout_secs, 30);
        assert_eq!(config.compose_command, vec!["docker", "compose"]);
    }

    #[test]
    fn rejects_unknown_environment() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        fs::write(layout.engine_config_file(), "environment = \"qa\"\n").unwrap();
        assert!(matches!(
            EngineConfig::load(&layout).unwrap_err(),
            StoreError::Config(_)
        ));
    }

    #[test]
    fn rejects_reserved_profile_names() {
        let config = EngineConfig {
            online_profiles: vec!["prod".to_owned(), "offline".to_owned()],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
