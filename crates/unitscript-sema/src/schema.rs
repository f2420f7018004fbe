use std::collections::HashMap;

/// A compile-time type label on a binding. Has no runtime representation —
/// it only drives attribute checking and is discarded once bytecode is
/// emitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Any,
    Number,
    /// `List`, optionally carrying a known element tag (e.g. `List(Enemy)`
    /// for `self.scan()`). The element tag is best-effort and frequently
    /// absent.
    List(Option<Box<TypeTag>>),
    Bot,
    Gundam,
    Player,
    Enemy,
    Core,
}

impl TypeTag {
    pub fn list_of(tag: TypeTag) -> Self {
        TypeTag::List(Some(Box::new(tag)))
    }

    pub fn list_any() -> Self {
        TypeTag::List(None)
    }

    /// Element type yielded by iterating a value of this tag, if known.
    pub fn element_type(&self) -> TypeTag {
        match self {
            TypeTag::List(Some(elem)) => (**elem).clone(),
            _ => TypeTag::Any,
        }
    }

    /// Name used in diagnostics, matching the schema's own vocabulary.
    pub fn display_name(&self) -> &'static str {
        match self {
            TypeTag::Any => "any",
            TypeTag::Number => "number",
            TypeTag::List(_) => "List",
            TypeTag::Bot => "Bot",
            TypeTag::Gundam => "Gundam",
            TypeTag::Player => "Player",
            TypeTag::Enemy => "Enemy",
            TypeTag::Core => "Core",
        }
    }

    /// Key used to look attributes up in the schema: list element type
    /// doesn't change which attributes a `List` exposes.
    fn schema_key(&self) -> TypeTag {
        match self {
            TypeTag::List(_) => TypeTag::list_any(),
            other => other.clone(),
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// An attribute a type tag exposes, and the tag its value (or its call
/// result, for method-like attributes) carries.
#[derive(Debug, Clone)]
pub struct AttributeDescriptor {
    pub result: TypeTag,
}

/// Registry of the attributes each type tag legally exposes. Attribute
/// checking only ever runs against this fixed, built-in schema — there is
/// no user-defined type declaration surface in the language.
pub struct TypeSchema {
    attrs: HashMap<TypeTag, HashMap<String, AttributeDescriptor>>,
}

impl TypeSchema {
    pub fn standard() -> Self {
        let mut attrs: HashMap<TypeTag, HashMap<String, AttributeDescriptor>> = HashMap::new();

        let unit_attrs = |hacker_target: TypeTag| -> HashMap<String, AttributeDescriptor> {
            let mut m = HashMap::new();
            m.insert("forward".into(), AttributeDescriptor { result: TypeTag::Any });
            m.insert("fire".into(), AttributeDescriptor { result: TypeTag::Any });
            m.insert(
                "scan".into(),
                AttributeDescriptor {
                    result: TypeTag::list_of(TypeTag::Enemy),
                },
            );
            m.insert("hp".into(), AttributeDescriptor { result: TypeTag::Number });
            m.insert(
                "pos".into(),
                AttributeDescriptor {
                    result: TypeTag::list_of(TypeTag::Number),
                },
            );
            m.insert("id".into(), AttributeDescriptor { result: TypeTag::Number });
            m.insert(
                "hacker".into(),
                AttributeDescriptor { result: hacker_target },
            );
            m
        };

        attrs.insert(TypeTag::Bot, unit_attrs(TypeTag::Player));
        attrs.insert(TypeTag::Gundam, unit_attrs(TypeTag::Player));

        let mut player_attrs = HashMap::new();
        player_attrs.insert("name".into(), AttributeDescriptor { result: TypeTag::Any });
        player_attrs.insert(
            "scrap".into(),
            AttributeDescriptor { result: TypeTag::Number },
        );
        attrs.insert(TypeTag::Player, player_attrs);

        let mut enemy_attrs = HashMap::new();
        enemy_attrs.insert("hp".into(), AttributeDescriptor { result: TypeTag::Number });
        enemy_attrs.insert(
            "pos".into(),
            AttributeDescriptor {
                result: TypeTag::list_of(TypeTag::Number),
            },
        );
        enemy_attrs.insert("id".into(), AttributeDescriptor { result: TypeTag::Number });
        attrs.insert(TypeTag::Enemy, enemy_attrs);

        let mut core_attrs = HashMap::new();
        core_attrs.insert("hp".into(), AttributeDescriptor { result: TypeTag::Number });
        core_attrs.insert(
            "pos".into(),
            AttributeDescriptor {
                result: TypeTag::list_of(TypeTag::Number),
            },
        );
        attrs.insert(TypeTag::Core, core_attrs);

        Self { attrs }
    }

    /// Look up `name` on `tag`. Returns `None` when the tag has no attribute
    /// table (e.g. "any", "number") as well as when the attribute is simply
    /// missing — callers distinguish the two by checking `is_typed` first.
    pub fn lookup(&self, tag: &TypeTag, name: &str) -> Option<&AttributeDescriptor> {
        self.attrs.get(&tag.schema_key())?.get(name)
    }

    /// Does this tag carry an attribute table at all? `Any`/`Number` do not,
    /// so attribute access on them is never checked.
    pub fn is_typed(&self, tag: &TypeTag) -> bool {
        self.attrs.contains_key(&tag.schema_key())
    }

    /// Best-effort "did you mean" suggestion: a declared attribute that has
    /// `missed` as a prefix, or is Levenshtein-close to it.
    pub fn suggest(&self, tag: &TypeTag, missed: &str) -> Option<String> {
        let candidates = self.attrs.get(&tag.schema_key())?;
        let mut best: Option<(usize, &str)> = None;
        for name in candidates.keys() {
            if name.starts_with(missed) {
                return Some(name.clone());
            }
            let dist = levenshtein(missed, name);
            if dist <= 2 && best.map(|(d, _)| dist < d).unwrap_or(true) {
                best = Some((dist, name));
            }
        }
        best.map(|(_, name)| name.to_string())
    }
}

impl Default for TypeSchema {
    fn default() -> Self {
        Self::standard()
    }
}

/// Classic Wagner-Fischer edit distance, used only for "did you mean"
/// suggestions — not performance sensitive.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev_diag = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            let new_val = (row[j] + 1).min(row[j - 1] + 1).min(prev_diag + cost);
            prev_diag = row[j];
            row[j] = new_val;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_suggestion_matches_forward() {
        let schema = TypeSchema::standard();
        assert_eq!(
            schema.suggest(&TypeTag::Bot, "forw"),
            Some("forward".to_string())
        );
    }

    #[test]
    fn test_levenshtein_close_match() {
        let schema = TypeSchema::standard();
        assert_eq!(schema.suggest(&TypeTag::Bot, "scna"), Some("scan".to_string()));
    }

    #[test]
    fn test_unknown_attribute_no_suggestion() {
        let schema = TypeSchema::standard();
        assert_eq!(schema.suggest(&TypeTag::Bot, "zzz_unrelated"), None);
    }

    #[test]
    fn test_any_and_number_are_untyped() {
        let schema = TypeSchema::standard();
        assert!(!schema.is_typed(&TypeTag::Any));
        assert!(!schema.is_typed(&TypeTag::Number));
        assert!(schema.is_typed(&TypeTag::Bot));
    }
}
