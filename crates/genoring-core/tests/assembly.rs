use genoring_core::{Assembler, CoreError};
use genoring_schema::{ModuleName, Version};
use genoring_store::{EngineConfig, ModuleRegistry, ModuleStatus, ProjectLayout};
use serde_yaml::Value;
use std::fs;
use std::path::Path;

struct Project {
    dir: tempfile::TempDir,
    registry: ModuleRegistry,
    config: EngineConfig,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        layout.initialize().unwrap();
        Self {
            registry: ModuleRegistry::new(layout),
            config: EngineConfig::default(),
            dir,
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn file(&self, rel: &str, content: &str) -> &Self {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        self
    }

    fn module(&self, name: &str, descriptor_tail: &str) -> &Self {
        self.file(
            &format!("modules/{name}/module.toml"),
            &format!("name = \"{name}\"\nversion = \"1.0\"\n{descriptor_tail}"),
        )
    }

    fn enable(&self, names: &[&str]) {
        for name in names {
            self.registry
                .set_status(&ModuleName::new(*name), ModuleStatus::Enabled, None)
                .unwrap();
        }
    }

    fn assembler(&self) -> Assembler<'_> {
        Assembler::new(&self.registry, &self.config)
    }
}

fn service<'a>(asm: &'a genoring_core::Assembly, name: &str) -> &'a Value {
    &asm.services[name].definition
}

#[test]
fn assembly_is_byte_identical_when_nothing_changes() {
    let p = Project::new();
    p.module("genoring", "")
        .file("modules/genoring/services/genoring-proxy.yml", "image: nginx\nports: [\"80:80\"]\n")
        .file("modules/genoring/services/genoring-db.yml", "image: postgres\n")
        .file("modules/genoring/volumes/genoring-data.yml", "labels: {tier: data}\n")
        .module(
            "gigwa",
            "\n[dependencies]\nservices = [\"genoring-gigwa AFTER genoring genoring-db\"]\n",
        )
        .file("modules/gigwa/services/genoring-gigwa.yml", "image: gigwa\n");
    p.enable(&["genoring", "gigwa"]);

    let read_all = || {
        let mut files = vec![fs::read(p.root().join("docker-compose.yml")).unwrap()];
        for profile in p.config.all_profiles() {
            files.push(fs::read(p.registry.layout().dependency_overlay(&profile)).unwrap());
        }
        files
    };

    p.assembler().assemble_enabled().unwrap().write(p.registry.layout()).unwrap();
    let first = read_all();
    p.registry.invalidate();
    p.assembler().assemble_enabled().unwrap().write(p.registry.layout()).unwrap();
    assert_eq!(first, read_all());
}

#[test]
fn volume_major_version_mismatch_is_fatal() {
    let p = Project::new();
    p.module(
        "alpha",
        "\n[volumes.genoring-foo]\ntype = \"shared\"\nversion = \"2.0\"\n",
    )
    .module(
        "beta",
        "\n[volumes.genoring-foo]\ntype = \"shared\"\nversion = \"3.0\"\n",
    );
    p.enable(&["alpha", "beta"]);

    let err = p.assembler().assemble_enabled().unwrap_err();
    match err {
        CoreError::VolumeMajorConflict {
            volume,
            first_version,
            second_version,
            ..
        } => {
            assert_eq!(volume, "genoring-foo");
            assert_eq!(first_version, Version::new(2, 0));
            assert_eq!(second_version, Version::new(3, 0));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!p.root().join("docker-compose.yml").exists());
}

#[test]
fn compatible_volume_versions_keep_the_highest_minor() {
    let p = Project::new();
    p.module(
        "alpha",
        "\n[volumes.genoring-foo]\ntype = \"shared\"\nversion = \"2.0\"\n",
    )
    .file("modules/alpha/volumes/genoring-foo.yml", "labels: {from: alpha}\n")
    .module(
        "beta",
        "\n[volumes.genoring-foo]\ntype = \"shared\"\nversion = \"2.3\"\n",
    )
    .file("modules/beta/volumes/genoring-foo.yml", "labels: {from: beta}\n");
    p.enable(&["alpha", "beta"]);

    let asm = p.assembler().assemble_enabled().unwrap();
    let volume = &asm.volumes["genoring-foo"];
    assert_eq!(volume.version, Version::new(2, 3));
    assert_eq!(volume.owner.as_str(), "beta");
    assert_eq!(volume.declared_by.len(), 2);
    assert_eq!(volume.definition["labels"]["from"].as_str(), Some("beta"));
}

#[test]
fn override_replaces_while_merge_unions() {
    let p = Project::new();
    p.module("base", "")
        .file(
            "modules/base/services/web.yml",
            "image: foo\nenvironment:\n  - A=1\n",
        )
        .module("patcher", "")
        .file("modules/patcher/overrides/web.yml", "image: bar\n")
        .file(
            "modules/patcher/merges/web.yml",
            "environment:\n  - B=2\n",
        );
    p.enable(&["base", "patcher"]);

    let asm = p.assembler().assemble_enabled().unwrap();
    let web = service(&asm, "web");
    assert_eq!(web["image"].as_str(), Some("bar"));
    let env: Vec<&str> = web["environment"]
        .as_sequence()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(env, vec!["A=1", "B=2"]);
    assert_eq!(asm.services["web"].owner.as_str(), "base");
}

#[test]
fn duplicate_service_ownership_is_fatal() {
    let p = Project::new();
    p.module("alpha", "")
        .file("modules/alpha/services/shared.yml", "image: a\n")
        .module("beta", "")
        .file("modules/beta/services/shared.yml", "image: b\n");
    p.enable(&["alpha", "beta"]);
    assert!(matches!(
        p.assembler().assemble_enabled().unwrap_err(),
        CoreError::DuplicateService { .. }
    ));
}

#[test]
fn online_scoped_ordering_expands_to_each_online_profile() {
    let p = Project::new();
    p.module("genoring", "")
        .file("modules/genoring/services/genoring-proxy.yml", "image: nginx\n")
        .module(
            "gigwa",
            "\n[dependencies]\nservices = [\"online:genoring-gigwa AFTER genoring genoring-proxy\"]\n",
        )
        .file("modules/gigwa/services/genoring-gigwa.yml", "image: gigwa\n");
    p.enable(&["genoring", "gigwa"]);

    let asm = p.assembler().assemble_enabled().unwrap();
    for profile in ["prod", "staging", "dev"] {
        let deps = asm.depends_on(profile, "genoring-gigwa");
        assert_eq!(deps.len(), 1, "profile {profile}");
        assert_eq!(deps[0].as_str(), "genoring-proxy");
    }
    assert!(asm.depends_on("offline", "genoring-gigwa").is_empty());
    assert!(asm.depends_on("backend", "genoring-gigwa").is_empty());
}
