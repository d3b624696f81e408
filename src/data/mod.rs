//! Planning object model: types, terms, relations, formulas, effects,
//! actions, and the domain/problem containers the engine consumes.

pub mod actions;
pub mod chain;
pub mod domain;
pub mod effects;
pub mod expressions;
pub mod formulas;
pub mod functions;
pub mod predicates;
pub mod problem;
pub mod terms;
pub mod types;

pub use actions::{Action, ActionKind};
pub use chain::{Chain, ChainRef};
pub use domain::{Domain, Requirements};
pub use effects::{Effect, EffectTime};
pub use expressions::{Expression, Fluent, ValueMap};
pub use formulas::{Atom, BindingLiteral, Formula, FormulaTime, Literal, Quantified};
pub use functions::{Function, FunctionTable};
pub use predicates::{Predicate, PredicateTable};
pub use problem::Problem;
pub use terms::{Object, SubstitutionMap, Term, TermTable, Variable};
pub use types::{Type, TypeSet, TypeTable};

use thiserror::Error;

/// A malformed domain or problem detected while building or searching.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DomainError {
    /// A supertype declaration would make two simple types mutually subtypes.
    #[error("incompatible types")]
    IncompatibleTypes,
    /// A static fluent was read before its initial value was defined.
    #[error("value of static fluent is undefined")]
    UndefinedFluent,
    /// A durative action's duration bound did not ground to a constant.
    #[error("non-constant duration")]
    NonConstantDuration,
    /// Constant folding encountered a division by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// A parameter tuple does not match the arity of its action domain.
    #[error("action domain column out of range")]
    ColumnOutOfRange,
}

/// Borrowed view of the tables formula and binding operations consult.
#[derive(Copy, Clone)]
pub struct ModelEnv<'a> {
    pub types: &'a TypeTable,
    pub terms: &'a TermTable,
}
