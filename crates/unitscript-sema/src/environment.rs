use std::collections::HashMap;

use crate::schema::TypeTag;

/// Mapping from binding name to compile-time type tag, mirroring the set of
/// names the host injects into the VM's global `vars` before execution.
#[derive(Debug, Clone)]
pub struct Environment {
    names: HashMap<String, TypeTag>,
}

const BOT_PATTERN_MAX: u32 = 4;
const GUNDAM_PATTERN_MAX: u32 = 30;

impl Environment {
    /// Build the standard environment: builtins, ammo constants, selectors,
    /// `CORE`, pattern-matched unit bindings (`B1`..`B4`, `G1`..`G30`), and
    /// `self` typed as `self_type`. `env_types` layers in any additional
    /// host-declared bindings, overriding the standard set on name clash.
    pub fn standard(self_type: TypeTag, env_types: &HashMap<String, TypeTag>) -> Self {
        let mut names = HashMap::new();

        for builtin in [
            "len", "range", "abs", "nearest", "furthest", "weakest", "strongest",
        ] {
            names.insert(builtin.to_string(), TypeTag::Any);
        }
        for ammo in ["BULLET", "ROCKET", "LASER", "ICE", "GRENADE"] {
            names.insert(ammo.to_string(), TypeTag::Any);
        }
        names.insert("CORE".to_string(), TypeTag::Core);

        for i in 1..=BOT_PATTERN_MAX {
            let name = format!("B{i}");
            names.insert(name.clone(), pattern_type(&name).expect("B-pattern in range"));
        }
        for i in 1..=GUNDAM_PATTERN_MAX {
            let name = format!("G{i}");
            names.insert(name.clone(), pattern_type(&name).expect("G-pattern in range"));
        }

        names.insert("self".to_string(), self_type);

        for (name, tag) in env_types {
            names.insert(name.clone(), tag.clone());
        }

        Self { names }
    }

    pub fn get(&self, name: &str) -> Option<&TypeTag> {
        self.names.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }
}

/// Does `name` match a pattern-bound unit binding (`B1`..`B4`, `G1`..`G30`)?
/// Backs `Environment::standard`'s own B/G table construction, and is also
/// exposed for callers that want to classify a name without building a
/// full `Environment`.
pub fn pattern_type(name: &str) -> Option<TypeTag> {
    if let Some(rest) = name.strip_prefix('B') {
        if let Ok(n) = rest.parse::<u32>() {
            if (1..=BOT_PATTERN_MAX).contains(&n) {
                return Some(TypeTag::Bot);
            }
        }
    }
    if let Some(rest) = name.strip_prefix('G') {
        if let Ok(n) = rest.parse::<u32>() {
            if (1..=GUNDAM_PATTERN_MAX).contains(&n) {
                return Some(TypeTag::Gundam);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_bindings_resolve_to_bot_and_gundam() {
        let env = Environment::standard(TypeTag::Bot, &HashMap::new());
        assert_eq!(env.get("B1"), Some(&TypeTag::Bot));
        assert_eq!(env.get("G30"), Some(&TypeTag::Gundam));
        assert_eq!(env.get("G31"), None);
        assert_eq!(env.get("B5"), None);
    }

    #[test]
    fn test_self_typed_by_caller() {
        let env = Environment::standard(TypeTag::Gundam, &HashMap::new());
        assert_eq!(env.get("self"), Some(&TypeTag::Gundam));
    }

    #[test]
    fn test_env_types_override_standard_set() {
        let mut overrides = HashMap::new();
        overrides.insert("CORE".to_string(), TypeTag::Any);
        let env = Environment::standard(TypeTag::Bot, &overrides);
        assert_eq!(env.get("CORE"), Some(&TypeTag::Any));
    }
}
