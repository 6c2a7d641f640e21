//! Structural operations on compose fragments.

use serde_yaml::Value;
use std::collections::BTreeMap;

/// Deep replace. Keys present in `patch` replace those in `base`, nested
/// mappings are patched recursively, and a `null` value deletes the key.
pub fn apply_override(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Mapping(base_map), Value::Mapping(patch_map)) => {
            for (key, value) in patch_map {
                if value.is_null() {
                    base_map.remove(key);
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_mapping() && value.is_mapping() => {
                        apply_override(existing, value);
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Deep structural merge. Mappings combine keys recursively, sequences are
/// concatenated (entries already present are not repeated), and scalars take
/// the value from `extra`.
pub fn apply_merge(base: &mut Value, extra: &Value) {
    match (base, extra) {
        (Value::Mapping(base_map), Value::Mapping(extra_map)) => {
            for (key, value) in extra_map {
                match base_map.get_mut(key) {
                    Some(existing) => apply_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Sequence(base_seq), Value::Sequence(extra_seq)) => {
            for item in extra_seq {
                if !base_seq.contains(item) {
                    base_seq.push(item.clone());
                }
            }
        }
        (_, Value::Null) => {}
        (base, extra) => *base = extra.clone(),
    }
}

/// Replace `${VAR}` and `${VAR:-default}` in every string of `value`.
/// References to unknown variables without a default are left as written so
/// the container runtime can still resolve them.
pub fn substitute_env(value: &mut Value, env: &BTreeMap<String, String>) {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = substitute_str(s, env);
            }
        }
        Value::Sequence(seq) => {
            for item in seq {
                substitute_env(item, env);
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                substitute_env(item, env);
            }
        }
        Value::Tagged(tagged) => substitute_env(&mut tagged.value, env),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn substitute_str(input: &str, env: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        // `$${` is an escaped dollar for compose; keep it intact.
        if start > 0 && rest.as_bytes()[start - 1] == b'$' {
            out.push_str(&rest[..start + 2]);
            rest = &rest[start + 2..];
            continue;
        }
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let inner = &after[..end];
        let (name, default) = match inner.split_once(":-") {
            Some((n, d)) => (n, Some(d)),
            None => (inner, None),
        };
        match (env.get(name), default) {
            (Some(v), _) => out.push_str(v),
            (None, Some(d)) => out.push_str(d),
            (None, None) => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn override_replaces_fields() {
        let mut base = yaml("image: foo\nports: ['80:80']\nenvironment:\n  A: '1'\n  B: '2'\n");
        apply_override(&mut base, &yaml("image: bar\nenvironment:\n  B: '3'\n"));
        assert_eq!(base["image"], yaml("bar"));
        assert_eq!(base["ports"], yaml("['80:80']"));
        assert_eq!(base["environment"], yaml("A: '1'\nB: '3'\n"));
    }

    #[test]
    fn override_null_deletes_field() {
        let mut base = yaml("image: foo\nports: ['80:80']\n");
        apply_override(&mut base, &yaml("ports: ~\n"));
        assert!(base.get("ports").is_none());
        assert_eq!(base["image"], yaml("foo"));
    }

    #[test]
    fn override_replaces_sequences_wholesale() {
        let mut base = yaml("volumes: [a, b]\n");
        apply_override(&mut base, &yaml("volumes: [c]\n"));
        assert_eq!(base["volumes"], yaml("[c]"));
    }

    #[test]
    fn merge_unions_environment_entries() {
        let mut base = yaml("image: foo\nenvironment:\n  - A=1\n");
        apply_merge(&mut base, &yaml("environment:\n  - B=2\n  - A=1\n"));
        assert_eq!(base["environment"], yaml("[A=1, B=2]"));
        assert_eq!(base["image"], yaml("foo"));

        let mut base = yaml("environment:\n  A: '1'\n");
        apply_merge(&mut base, &yaml("environment:\n  B: '2'\n"));
        assert_eq!(base["environment"], yaml("A: '1'\nB: '2'\n"));
    }

    #[test]
    fn merge_null_keeps_base() {
        let mut base = yaml("image: foo\n");
        apply_merge(&mut base, &yaml("image: ~\n"));
        assert_eq!(base["image"], yaml("foo"));
    }

    #[test]
    fn substitutes_known_variables_only() {
        let env = BTreeMap::from([
            ("PORT".to_owned(), "8080".to_owned()),
            ("HOST".to_owned(), "example.org".to_owned()),
        ]);
        let mut v = yaml(
            "ports: ['${PORT}:80']\nenvironment:\n  URL: 'http://${HOST}:${PORT}/${PATH:-gigwa}'\n  OTHER: '${UNKNOWN}'\n  COST: '$${PORT}'\n",
        );
        substitute_env(&mut v, &env);
        assert_eq!(v["ports"][0], yaml("'8080:80'"));
        assert_eq!(
            v["environment"]["URL"],
            yaml("'http://example.org:8080/gigwa'")
        );
        assert_eq!(v["environment"]["OTHER"], yaml("'${UNKNOWN}'"));
        assert_eq!(v["environment"]["COST"], yaml("'$${PORT}'"));
    }

    #[test]
    fn unterminated_reference_is_kept() {
        let env = BTreeMap::from([("A".to_owned(), "x".to_owned())]);
        assert_eq!(substitute_str("${A} ${B", &env), "x ${B");
    }
}
