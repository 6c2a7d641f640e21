//! Dependency constraints: lifecycle gating and start-order edges.

use crate::assemble::AssembledService;
use crate::engine::ENGINE_VERSION;
use crate::CoreError;
use genoring_schema::{
    Clause, Constraint, ConstraintKind, ModuleDescriptor, ModuleName, ModuleSet, ServiceName,
};
use genoring_store::{EnabledSet, EngineConfig, ModuleRegistry};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Per profile: service → services it must start after.
pub type StartOrder = BTreeMap<String, BTreeMap<ServiceName, BTreeSet<ServiceName>>>;

/// A service without a `profiles` list runs under every profile.
pub fn is_active_in(definition: &Value, profile: &str) -> bool {
    match definition.get("profiles").and_then(Value::as_sequence) {
        None => true,
        Some(list) => list.iter().any(|p| p.as_str() == Some(profile)),
    }
}

fn clause_enabled(clause: &Clause, set: &EnabledSet) -> bool {
    set.enabled_version(&clause.module)
        .is_some_and(|v| clause.version_matches(v.as_ref()))
}

/// Derive `depends_on` edges from every BEFORE/AFTER constraint of
/// `modules`, one edge set per concrete profile.
pub fn start_order(
    registry: &ModuleRegistry,
    modules: &[ModuleName],
    services: &BTreeMap<ServiceName, AssembledService>,
    config: &EngineConfig,
) -> Result<StartOrder, CoreError> {
    let set = registry.set_of(modules)?;
    let all = config.all_profiles();
    let mut order: StartOrder = all
        .iter()
        .map(|p| {
            let edges = services
                .keys()
                .map(|s| (s.clone(), BTreeSet::new()))
                .collect();
            (p.clone(), edges)
        })
        .collect();

    let owned_by = |module: &ModuleName| -> Vec<&ServiceName> {
        services
            .iter()
            .filter(|(_, s)| &s.owner == module)
            .map(|(name, _)| name)
            .collect()
    };

    for module in modules {
        let constraints = registry.descriptor(module)?.constraints()?.services;
        for constraint in constraints.iter().filter(|c| !c.kind.is_gating()) {
            let subjects: Vec<&ServiceName> = match &constraint.service {
                Some(s) => services
                    .get_key_value(s.as_str())
                    .map(|(k, _)| vec![k])
                    .unwrap_or_default(),
                None => owned_by(module),
            };
            for clause in &constraint.clauses {
                if !clause_enabled(clause, &set) {
                    continue;
                }
                let targets: Vec<&ServiceName> = match &clause.element {
                    Some(e) => services
                        .get_key_value(e.as_str())
                        .filter(|(_, s)| s.owner == clause.module)
                        .map(|(k, _)| vec![k])
                        .unwrap_or_default(),
                    None => owned_by(&clause.module),
                };
                for profile in constraint.expand_profiles(&all, &config.online_profiles) {
                    let Some(edges) = order.get_mut(&profile) else {
                        continue;
                    };
                    for &subject in &subjects {
                        for &target in &targets {
                            if subject == target
                                || !is_active_in(&services[subject].definition, &profile)
                                || !is_active_in(&services[target].definition, &profile)
                            {
                                continue;
                            }
                            let (from, to) = if constraint.kind == ConstraintKind::Before {
                                (target, subject)
                            } else {
                                (subject, target)
                            };
                            debug!("{profile}: {from} depends on {to}");
                            edges.entry(from.clone()).or_default().insert(to.clone());
                        }
                    }
                }
            }
        }
    }

    for (profile, edges) in &order {
        if let Some(services) = find_cycle(edges) {
            return Err(CoreError::DependencyCycle {
                profile: profile.clone(),
                services,
            });
        }
    }
    Ok(order)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn find_cycle(edges: &BTreeMap<ServiceName, BTreeSet<ServiceName>>) -> Option<Vec<String>> {
    fn visit<'a>(
        node: &'a ServiceName,
        edges: &'a BTreeMap<ServiceName, BTreeSet<ServiceName>>,
        marks: &mut BTreeMap<&'a ServiceName, Mark>,
        stack: &mut Vec<&'a ServiceName>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        stack.push(node);
        if let Some(next) = edges.get(node) {
            for n in next {
                if let Some(cycle) = visit(n, edges, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    let mut stack = Vec::new();
    edges
        .keys()
        .find_map(|node| visit(node, edges, &mut marks, &mut stack))
}

/// Fail on the first REQUIRES or CONFLICTS constraint of `module` that does
/// not hold against `set`.
pub fn check_gating(
    module: &ModuleName,
    constraints: &[Constraint],
    set: &EnabledSet,
) -> Result<(), CoreError> {
    for constraint in constraints.iter().filter(|c| c.kind.is_gating()) {
        if constraint.is_satisfied_by(set) {
            continue;
        }
        let (kind, module, constraint) =
            (constraint.kind, module.to_string(), constraint.to_string());
        return Err(if kind == ConstraintKind::Requires {
            CoreError::Unmet { module, constraint }
        } else {
            CoreError::Conflict { module, constraint }
        });
    }
    Ok(())
}

pub fn check_engine_version(descriptor: &ModuleDescriptor) -> Result<(), CoreError> {
    match descriptor.engine {
        Some(required) if required > ENGINE_VERSION => Err(CoreError::EngineTooOld {
            module: descriptor.name.to_string(),
            required,
            current: ENGINE_VERSION,
        }),
        _ => Ok(()),
    }
}

/// Every check that must pass before `modules` are enabled together: engine
/// version, their own constraints against the would-be enabled set, and the
/// CONFLICTS of modules already enabled.
pub fn check_enable(registry: &ModuleRegistry, modules: &[ModuleName]) -> Result<(), CoreError> {
    let mut set = registry.enabled_set()?;
    for module in modules {
        let descriptor = registry.descriptor(module)?;
        check_engine_version(&descriptor)?;
        set.insert(
            module.clone(),
            Some(descriptor.version),
            registry.elements_of(module)?,
        );
    }
    for module in modules {
        let constraints = registry.descriptor(module)?.constraints()?;
        check_gating(module, &constraints.services, &set)?;
    }
    for other in registry.list_enabled()? {
        if modules.contains(&other) {
            continue;
        }
        let constraints = registry.descriptor(&other)?.constraints()?;
        let conflicts: Vec<Constraint> = constraints
            .services
            .into_iter()
            .filter(|c| c.kind == ConstraintKind::Conflicts)
            .collect();
        check_gating(&other, &conflicts, &set)?;
    }
    Ok(())
}

/// Refuse to disable `module` while another enabled module REQUIRES it and
/// no other clause would still satisfy that requirement.
pub fn check_disable(registry: &ModuleRegistry, module: &ModuleName) -> Result<(), CoreError> {
    let set = registry.enabled_set()?.without(module);
    for other in set.modules() {
        let constraints = registry.descriptor(other)?.constraints()?;
        for constraint in constraints
            .services
            .iter()
            .filter(|c| c.kind == ConstraintKind::Requires)
        {
            let names_module = constraint.clauses.iter().any(|c| &c.module == module);
            if names_module && !constraint.is_satisfied_by(&set) {
                return Err(CoreError::RequiredBy {
                    module: module.to_string(),
                    dependent: other.to_string(),
                    constraint: constraint.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use genoring_schema::{constraint, Version};

    fn set(entries: &[(&str, &str)]) -> EnabledSet {
        let mut set = EnabledSet::default();
        for (name, version) in entries {
            set.insert(ModuleName::new(*name), Version::parse(version), BTreeSet::new());
        }
        set
    }

    fn constraints(lines: &[&str]) -> Vec<Constraint> {
        lines
            .iter()
            .map(|l| constraint::parse(l).unwrap().unwrap())
            .collect()
    }

    #[test]
    fn or_clause_requires_any_module() {
        let gigwa = ModuleName::new("gigwa");
        let c = constraints(&["REQUIRES mongo OR mariadb"]);

        assert!(check_gating(&gigwa, &c, &set(&[("mongo", "1.0")])).is_ok());
        assert!(check_gating(&gigwa, &c, &set(&[("mariadb", "1.0")])).is_ok());
        assert!(check_gating(&gigwa, &c, &set(&[("mongo", "1.0"), ("mariadb", "1.0")])).is_ok());
        let err = check_gating(&gigwa, &c, &set(&[("genoring", "1.0")])).unwrap_err();
        assert!(matches!(err, CoreError::Unmet { .. }));
    }

    #[test]
    fn versioned_requirement_and_conflict() {
        let gigwa = ModuleName::new("gigwa");
        let c = constraints(&["REQUIRES genoring >= 1.0", "CONFLICTS brapi < 2.0"]);
        assert!(check_gating(&gigwa, &c, &set(&[("genoring", "1.2")])).is_ok());
        assert!(matches!(
            check_gating(&gigwa, &c, &set(&[("genoring", "0.9")])).unwrap_err(),
            CoreError::Unmet { .. }
        ));
        assert!(matches!(
            check_gating(&gigwa, &c, &set(&[("genoring", "1.2"), ("brapi", "1.5")]))
                .unwrap_err(),
            CoreError::Conflict { .. }
        ));
        assert!(check_gating(&gigwa, &c, &set(&[("genoring", "1.2"), ("brapi", "2.1")])).is_ok());
    }

    #[test]
    fn ordering_constraints_never_gate() {
        let gigwa = ModuleName::new("gigwa");
        let c = constraints(&["genoring-gigwa AFTER genoring genoring-proxy"]);
        assert!(check_gating(&gigwa, &c, &set(&[])).is_ok());
    }

    #[test]
    fn detects_cycles() {
        let s = |n: &str| ServiceName::new(n);
        let mut edges: BTreeMap<ServiceName, BTreeSet<ServiceName>> = BTreeMap::new();
        edges.insert(s("a"), BTreeSet::from([s("b")]));
        edges.insert(s("b"), BTreeSet::from([s("c")]));
        edges.insert(s("c"), BTreeSet::new());
        assert!(find_cycle(&edges).is_none());

        edges.insert(s("c"), BTreeSet::from([s("a")]));
        let cycle = find_cycle(&edges).unwrap();
        assert_eq!(cycle, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn profile_activity() {
        let def: Value = serde_yaml::from_str("image: x\nprofiles: [prod, offline]\n").unwrap();
        assert!(is_active_in(&def, "prod"));
        assert!(!is_active_in(&def, "backend"));
        let always: Value = serde_yaml::from_str("image: x\n").unwrap();
        assert!(is_active_in(&always, "backend"));
    }

    #[test]
    fn engine_version_gate() {
        let mut d = genoring_schema::parse_descriptor_str(
            "name = \"future\"\nversion = \"1.0\"\nengine = \"9.0\"\n",
        )
        .unwrap();
        assert!(matches!(
            check_engine_version(&d).unwrap_err(),
            CoreError::EngineTooOld { .. }
        ));
        d.engine = Some(Version::new(1, 0));
        assert!(check_engine_version(&d).is_ok());
    }
}
