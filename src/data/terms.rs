use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::data::types::{Type, TypeTable};

/// An object constant. Objects are numbered from zero across a planning run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Object(pub(crate) i32);

/// A variable. Variables are numbered downwards from -1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(pub(crate) i32);

/// A term is an object or a variable, encoded by the sign of its index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Term(pub(crate) i32);

impl From<Object> for Term {
    fn from(o: Object) -> Term {
        Term(o.0)
    }
}

impl From<Variable> for Term {
    fn from(v: Variable) -> Term {
        Term(v.0)
    }
}

impl Term {
    pub fn is_object(self) -> bool {
        self.0 >= 0
    }

    pub fn is_variable(self) -> bool {
        self.0 < 0
    }

    pub fn as_object(self) -> Option<Object> {
        self.is_object().then_some(Object(self.0))
    }

    pub fn as_variable(self) -> Option<Variable> {
        self.is_variable().then_some(Variable(self.0))
    }
}

/// Variable-to-term substitution with deterministic iteration order.
pub type SubstitutionMap = BTreeMap<Variable, Term>;

/// Variable types live in a registry shared between a domain's term table and
/// the term tables of its problems, so fresh variables minted while planning
/// resolve from either.
#[derive(Debug, Default)]
struct VariableTypes(RefCell<Vec<Type>>);

/// Table of objects and variables.
///
/// A problem's table extends its domain's table; lookups fall through to the
/// parent. Fresh-variable creation and the compatible-objects cache take
/// `&self` and use interior mutability, since both are exercised mid-search.
#[derive(Debug)]
pub struct TermTable {
    parent: Option<Rc<TermTable>>,
    names: RefCell<Vec<String>>,
    object_types: RefCell<Vec<Type>>,
    first_object: usize,
    objects: RefCell<BTreeMap<String, Object>>,
    variable_types: Rc<VariableTypes>,
    compatible: RefCell<BTreeMap<Type, Rc<Vec<Object>>>>,
}

impl Default for TermTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TermTable {
    pub fn new() -> Self {
        Self {
            parent: None,
            names: RefCell::new(Vec::new()),
            object_types: RefCell::new(Vec::new()),
            first_object: 0,
            objects: RefCell::new(BTreeMap::new()),
            variable_types: Rc::new(VariableTypes::default()),
            compatible: RefCell::new(BTreeMap::new()),
        }
    }

    /// Construct a table extending the given table.
    pub fn extending(parent: Rc<TermTable>) -> Self {
        let first_object = parent.object_count();
        let variable_types = Rc::clone(&parent.variable_types);
        Self {
            parent: Some(parent),
            names: RefCell::new(Vec::new()),
            object_types: RefCell::new(Vec::new()),
            first_object,
            objects: RefCell::new(BTreeMap::new()),
            variable_types,
            compatible: RefCell::new(BTreeMap::new()),
        }
    }

    fn object_count(&self) -> usize {
        self.first_object + self.names.borrow().len()
    }

    /// Mint a fresh variable of the given type.
    pub fn add_variable(&self, t: Type) -> Variable {
        let mut types = self.variable_types.0.borrow_mut();
        types.push(t);
        Variable(-(types.len() as i32))
    }

    /// Add an object with the given name and type, or return the existing
    /// object of that name.
    pub fn add_object(&self, name: &str, t: Type) -> Object {
        if let Some(o) = self.find_object(name) {
            return o;
        }
        let object = Object(self.object_count() as i32);
        self.objects.borrow_mut().insert(name.to_string(), object);
        self.names.borrow_mut().push(name.to_string());
        self.object_types.borrow_mut().push(t);
        object
    }

    /// Return the object with the given name, searching parent tables.
    pub fn find_object(&self, name: &str) -> Option<Object> {
        if let Some(&o) = self.objects.borrow().get(name) {
            return Some(o);
        }
        self.parent.as_ref().and_then(|p| p.find_object(name))
    }

    /// Return the type of the given term.
    pub fn type_of(&self, term: Term) -> Type {
        if term.is_object() {
            let index = term.0 as usize;
            if index < self.first_object {
                match &self.parent {
                    Some(p) => p.type_of(term),
                    None => Type::OBJECT,
                }
            } else {
                self.object_types.borrow()[index - self.first_object]
            }
        } else {
            self.variable_types.0.borrow()[(-term.0 - 1) as usize]
        }
    }

    /// Return the display name of an object.
    pub fn object_name(&self, o: Object) -> String {
        let index = o.0 as usize;
        if index < self.first_object {
            match &self.parent {
                Some(p) => p.object_name(o),
                None => format!("obj#{}", o.0),
            }
        } else {
            self.names.borrow()[index - self.first_object].clone()
        }
    }

    /// Return the objects assignable to a term of the given type. Results
    /// are cached per queried type.
    pub fn compatible_objects(&self, types: &TypeTable, t: Type) -> Rc<Vec<Object>> {
        if let Some(cached) = self.compatible.borrow().get(&t) {
            return Rc::clone(cached);
        }
        let mut result: Vec<Object> = match &self.parent {
            Some(p) => p.compatible_objects(types, t).as_ref().clone(),
            None => Vec::new(),
        };
        for (_, &o) in self.objects.borrow().iter() {
            if types.is_subtype(self.type_of(o.into()), t) {
                result.push(o);
            }
        }
        result.sort();
        let result = Rc::new(result);
        self.compatible.borrow_mut().insert(t, Rc::clone(&result));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::{Term, TermTable};
    use crate::data::types::{Type, TypeTable};
    use std::rc::Rc;

    #[test]
    fn objects_and_variables_are_distinguished_by_sign() {
        let mut types = TypeTable::new();
        let t = types.add_type("block");
        let table = TermTable::new();
        let a = table.add_object("a", t);
        let x = table.add_variable(t);
        assert!(Term::from(a).is_object());
        assert!(Term::from(x).is_variable());
        assert_eq!(table.type_of(a.into()), t);
        assert_eq!(table.type_of(x.into()), t);
    }

    #[test]
    fn problem_table_extends_domain_table() {
        let mut types = TypeTable::new();
        let t = types.add_type("block");
        let domain_terms = Rc::new(TermTable::new());
        let a = domain_terms.add_object("a", t);
        let problem_terms = TermTable::extending(Rc::clone(&domain_terms));
        let b = problem_terms.add_object("b", t);
        assert_eq!(problem_terms.find_object("a"), Some(a));
        assert_eq!(problem_terms.find_object("b"), Some(b));
        assert!(domain_terms.find_object("b").is_none());
        let compatible = problem_terms.compatible_objects(&types, t);
        assert_eq!(compatible.as_ref(), &vec![a, b]);
    }

    #[test]
    fn fresh_variables_share_one_registry() {
        let mut types = TypeTable::new();
        let t = types.add_type("block");
        let domain_terms = Rc::new(TermTable::new());
        let x = domain_terms.add_variable(t);
        let problem_terms = TermTable::extending(Rc::clone(&domain_terms));
        let y = problem_terms.add_variable(Type::OBJECT);
        assert_ne!(x, y);
        assert_eq!(problem_terms.type_of(x.into()), t);
        assert_eq!(domain_terms.type_of(y.into()), Type::OBJECT);
    }
}
