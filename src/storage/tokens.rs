use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::{LabelId, TypeId};

#[derive(Default)]
struct TokenTable {
    by_name: FxHashMap<String, u32>,
    names: Vec<String>,
}

impl TokenTable {
    fn get_or_create(&mut self, name: &str) -> u32 {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), id);
        id
    }
}

/// Name-to-id mapping for labels and relationship types.
#[derive(Default)]
pub struct TokenRegistry {
    labels: RwLock<TokenTable>,
    types: RwLock<TokenTable>,
}

impl TokenRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of label `name`, creating it when unknown.
    pub fn get_or_create_label(&self, name: &str) -> LabelId {
        if let Some(id) = self.label_id(name) {
            return id;
        }
        LabelId(self.labels.write().get_or_create(name))
    }

    /// Id of label `name`, if registered.
    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.labels.read().by_name.get(name).copied().map(LabelId)
    }

    /// Name of label `id`, if registered.
    pub fn label_name(&self, id: LabelId) -> Option<String> {
        self.labels.read().names.get(id.0 as usize).cloned()
    }

    /// Returns the id of relationship type `name`, creating it when unknown.
    pub fn get_or_create_type(&self, name: &str) -> TypeId {
        if let Some(id) = self.type_id(name) {
            return id;
        }
        TypeId(self.types.write().get_or_create(name))
    }

    /// Id of relationship type `name`, if registered.
    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.types.read().by_name.get(name).copied().map(TypeId)
    }

    /// Name of relationship type `id`, if registered.
    pub fn type_name(&self, id: TypeId) -> Option<String> {
        self.types.read().names.get(id.0 as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_and_types_have_separate_id_spaces() {
        let tokens = TokenRegistry::new();
        let person = tokens.get_or_create_label("person");
        let friend = tokens.get_or_create_type("friend");
        assert_eq!(person, LabelId(0));
        assert_eq!(friend, TypeId(0));
        assert_eq!(tokens.get_or_create_label("person"), person);
        assert_eq!(tokens.get_or_create_label("place"), LabelId(1));
        assert_eq!(tokens.label_name(LabelId(1)).as_deref(), Some("place"));
        assert_eq!(tokens.type_id("friend"), Some(friend));
        assert_eq!(tokens.type_id("enemy"), None);
        assert_eq!(tokens.type_name(TypeId(3)), None);
    }
}
