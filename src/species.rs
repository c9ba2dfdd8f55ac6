use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Index of a species within the species set of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpeciesId(pub u16);

/// Resolves species codes used in size class tables.
pub trait SpeciesLookup {
    fn resolve(&self, code: &str) -> Option<SpeciesId>;
}

/// Species codes known to a run; lookups ignore ASCII case.
#[derive(Debug, Clone, Default)]
pub struct SpeciesSet {
    codes: Vec<String>,
    by_code: HashMap<String, SpeciesId>,
}

impl SpeciesSet {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for code in codes {
            set.add(code);
        }
        set
    }

    /// Adds a code, returning the existing id when it is already known.
    pub fn add(&mut self, code: impl Into<String>) -> SpeciesId {
        let code = code.into();
        let key = code.to_ascii_lowercase();
        if let Some(id) = self.by_code.get(&key) {
            return *id;
        }
        let id = SpeciesId(self.codes.len() as u16);
        self.codes.push(code);
        self.by_code.insert(key, id);
        id
    }

    pub fn code(&self, id: SpeciesId) -> Option<&str> {
        self.codes.get(id.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl SpeciesLookup for SpeciesSet {
    fn resolve(&self, code: &str) -> Option<SpeciesId> {
        self.by_code.get(&code.trim().to_ascii_lowercase()).copied()
    }
}
