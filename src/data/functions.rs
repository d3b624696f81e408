use std::collections::{BTreeMap, BTreeSet};

use crate::data::types::Type;

/// A named numeric function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Function(pub(crate) u32);

/// Table of declared functions. Like predicates, functions are static until
/// the loader sees one updated by an effect.
#[derive(Debug, Default)]
pub struct FunctionTable {
    names: Vec<String>,
    parameters: Vec<Vec<Type>>,
    dynamic: BTreeSet<Function>,
    by_name: BTreeMap<String, Function>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function with the given name, or return the existing one.
    pub fn add_function(&mut self, name: &str) -> Function {
        if let Some(&f) = self.by_name.get(name) {
            return f;
        }
        let f = Function(self.names.len() as u32);
        self.names.push(name.to_string());
        self.parameters.push(Vec::new());
        self.by_name.insert(name.to_string(), f);
        f
    }

    pub fn find_function(&self, name: &str) -> Option<Function> {
        self.by_name.get(name).copied()
    }

    /// Append a typed parameter to the given function.
    pub fn add_parameter(&mut self, f: Function, t: Type) {
        self.parameters[f.0 as usize].push(t);
    }

    pub fn parameters(&self, f: Function) -> &[Type] {
        &self.parameters[f.0 as usize]
    }

    pub fn name(&self, f: Function) -> &str {
        &self.names[f.0 as usize]
    }

    pub fn make_dynamic(&mut self, f: Function) {
        self.dynamic.insert(f);
    }

    pub fn is_static(&self, f: Function) -> bool {
        !self.dynamic.contains(&f)
    }
}

#[cfg(test)]
mod tests {
    use super::FunctionTable;

    #[test]
    fn functions_intern_by_name() {
        let mut table = FunctionTable::new();
        let f1 = table.add_function("distance");
        let f2 = table.add_function("distance");
        assert_eq!(f1, f2);
        assert!(table.is_static(f1));
        table.make_dynamic(f1);
        assert!(!table.is_static(f2));
    }
}
