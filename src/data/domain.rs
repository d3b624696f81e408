use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::data::actions::Action;
use crate::data::functions::{Function, FunctionTable};
use crate::data::predicates::PredicateTable;
use crate::data::terms::TermTable;
use crate::data::types::TypeTable;
use crate::data::ModelEnv;

/// PDDL requirement flags accepted by the reader.
#[derive(Clone, Debug, Default)]
pub struct Requirements {
    pub strips: bool,
    pub typing: bool,
    pub negative_preconditions: bool,
    pub disjunctive_preconditions: bool,
    pub equality: bool,
    pub existential_preconditions: bool,
    pub universal_preconditions: bool,
    pub conditional_effects: bool,
    pub durative_actions: bool,
    pub duration_inequalities: bool,
    pub fluents: bool,
    pub timed_initial_literals: bool,
}

impl Requirements {
    pub fn enable_quantified_preconditions(&mut self) {
        self.existential_preconditions = true;
        self.universal_preconditions = true;
    }

    pub fn enable_adl(&mut self) {
        self.strips = true;
        self.typing = true;
        self.negative_preconditions = true;
        self.disjunctive_preconditions = true;
        self.equality = true;
        self.enable_quantified_preconditions();
        self.conditional_effects = true;
    }
}

/// A planning domain: declared types, relations, functions, constants, and
/// action schemas. Built mutably by the reader, then frozen behind `Rc`.
#[derive(Debug)]
pub struct Domain {
    name: String,
    pub requirements: Requirements,
    types: TypeTable,
    predicates: PredicateTable,
    functions: FunctionTable,
    total_time: Function,
    terms: Rc<TermTable>,
    actions: BTreeMap<String, Rc<Action>>,
    next_action_id: Cell<usize>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Domain {
        let mut functions = FunctionTable::new();
        let total_time = functions.add_function("total-time");
        Domain {
            name: name.into(),
            requirements: Requirements::default(),
            types: TypeTable::new(),
            predicates: PredicateTable::new(),
            functions,
            total_time,
            terms: Rc::new(TermTable::new()),
            actions: BTreeMap::new(),
            next_action_id: Cell::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeTable {
        &mut self.types
    }

    pub fn predicates(&self) -> &PredicateTable {
        &self.predicates
    }

    pub fn predicates_mut(&mut self) -> &mut PredicateTable {
        &mut self.predicates
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionTable {
        &mut self.functions
    }

    pub fn total_time(&self) -> Function {
        self.total_time
    }

    pub fn terms(&self) -> &Rc<TermTable> {
        &self.terms
    }

    pub fn actions(&self) -> &BTreeMap<String, Rc<Action>> {
        &self.actions
    }

    pub fn find_action(&self, name: &str) -> Option<&Rc<Action>> {
        self.actions.get(name)
    }

    /// Allocate an action id. Ids order achiever maps, so they stay unique
    /// across schemas, groundings, and synthetic actions.
    pub fn fresh_action_id(&self) -> usize {
        let id = self.next_action_id.get();
        self.next_action_id.set(id + 1);
        id
    }

    pub fn env(&self) -> ModelEnv<'_> {
        ModelEnv { types: &self.types, terms: &self.terms }
    }

    /// Add a schema, strengthening its effect link conditions first.
    pub fn add_action(&mut self, mut schema: Action) {
        let env = ModelEnv { types: &self.types, terms: &self.terms };
        schema.strengthen_effects(&env);
        self.actions.insert(schema.name.clone(), Rc::new(schema));
    }
}

#[cfg(test)]
mod tests {
    use super::Domain;
    use crate::data::actions::Action;

    #[test]
    fn action_ids_are_unique() {
        let domain = Domain::new("test");
        let a = domain.fresh_action_id();
        let b = domain.fresh_action_id();
        assert_ne!(a, b);
    }

    #[test]
    fn actions_are_found_by_name() {
        let mut domain = Domain::new("test");
        let id = domain.fresh_action_id();
        domain.add_action(Action::schema(id, "pickup", false));
        assert!(domain.find_action("pickup").is_some());
        assert!(domain.find_action("drop").is_none());
    }
}
