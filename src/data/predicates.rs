use std::collections::{BTreeMap, BTreeSet};

use crate::data::types::Type;

/// A named relation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Predicate(pub(crate) u32);

/// Table of declared predicates.
///
/// Predicates start out static; the domain loader marks any predicate that
/// appears in an effect literal as dynamic.
#[derive(Debug, Default)]
pub struct PredicateTable {
    names: Vec<String>,
    parameters: Vec<Vec<Type>>,
    dynamic: BTreeSet<Predicate>,
    by_name: BTreeMap<String, Predicate>,
}

impl PredicateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate with the given name, or return the existing one.
    pub fn add_predicate(&mut self, name: &str) -> Predicate {
        if let Some(&p) = self.by_name.get(name) {
            return p;
        }
        let p = Predicate(self.names.len() as u32);
        self.names.push(name.to_string());
        self.parameters.push(Vec::new());
        self.by_name.insert(name.to_string(), p);
        p
    }

    pub fn find_predicate(&self, name: &str) -> Option<Predicate> {
        self.by_name.get(name).copied()
    }

    /// Append a typed parameter to the given predicate.
    pub fn add_parameter(&mut self, p: Predicate, t: Type) {
        self.parameters[p.0 as usize].push(t);
    }

    pub fn parameters(&self, p: Predicate) -> &[Type] {
        &self.parameters[p.0 as usize]
    }

    pub fn name(&self, p: Predicate) -> &str {
        &self.names[p.0 as usize]
    }

    /// Mark the given predicate as dynamic.
    pub fn make_dynamic(&mut self, p: Predicate) {
        self.dynamic.insert(p);
    }

    /// Test if the given predicate is static.
    pub fn is_static(&self, p: Predicate) -> bool {
        !self.dynamic.contains(&p)
    }
}

#[cfg(test)]
mod tests {
    use super::PredicateTable;
    use crate::data::types::Type;

    #[test]
    fn predicates_default_to_static() {
        let mut table = PredicateTable::new();
        let at = table.add_predicate("at");
        let fuel = table.add_predicate("fuel-level");
        table.add_parameter(at, Type::OBJECT);
        table.add_parameter(at, Type::OBJECT);
        assert!(table.is_static(at));
        table.make_dynamic(at);
        assert!(!table.is_static(at));
        assert!(table.is_static(fuel));
        assert_eq!(table.parameters(at).len(), 2);
    }

    #[test]
    fn adding_twice_returns_the_same_predicate() {
        let mut table = PredicateTable::new();
        let p1 = table.add_predicate("clear");
        let p2 = table.add_predicate("clear");
        assert_eq!(p1, p2);
        assert_eq!(table.find_predicate("clear"), Some(p1));
        assert_eq!(table.find_predicate("missing"), None);
    }
}
