//! Persona descriptors and the registry the orchestrator validates against

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Descriptive fields of a persona, supplied by the caller each turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub perspective: String,
    #[serde(default)]
    pub style: String,
}

impl PersonaDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        perspective: impl Into<String>,
        style: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            perspective: perspective.into(),
            style: style.into(),
        }
    }
}

/// Source of known personas
pub trait PersonaRegistry: Send + Sync {
    /// Look up a persona by id
    fn get(&self, id: &str) -> Option<PersonaDescriptor>;

    /// All registered ids, sorted
    fn ids(&self) -> Vec<String>;

    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

/// A fixed table of personas keyed by lower-cased id
#[derive(Debug, Clone, Default)]
pub struct StaticPersonaRegistry {
    personas: BTreeMap<String, PersonaDescriptor>,
}

impl StaticPersonaRegistry {
    pub fn new(personas: impl IntoIterator<Item = PersonaDescriptor>) -> Self {
        let mut registry = Self::default();
        for persona in personas {
            registry.insert(persona);
        }
        registry
    }

    /// Register a persona, normalizing its id. Replaces any previous entry.
    pub fn insert(&mut self, mut persona: PersonaDescriptor) {
        persona.id = persona.id.to_lowercase();
        self.personas.insert(persona.id.clone(), persona);
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

impl PersonaRegistry for StaticPersonaRegistry {
    fn get(&self, id: &str) -> Option<PersonaDescriptor> {
        self.personas.get(&id.to_lowercase()).cloned()
    }

    fn ids(&self) -> Vec<String> {
        self.personas.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = StaticPersonaRegistry::new([PersonaDescriptor::new(
            "Plato",
            "Plato",
            "An idealist",
            "Poetic",
        )]);
        let found = registry.get("PLATO").unwrap();
        assert_eq!(found.id, "plato");
        assert!(registry.contains("plato"));
        assert!(!registry.contains("zeno"));
    }

    #[test]
    fn test_ids_sorted() {
        let registry = StaticPersonaRegistry::new([
            PersonaDescriptor::new("turing", "Alan Turing", "", ""),
            PersonaDescriptor::new("aristotle", "Aristotle", "", ""),
        ]);
        assert_eq!(registry.ids(), vec!["aristotle", "turing"]);
        assert_eq!(registry.len(), 2);
    }
}
