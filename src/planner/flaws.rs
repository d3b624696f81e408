use std::rc::Rc;

use crate::data::effects::Effect;
use crate::data::formulas::{BindingLiteral, Formula, FormulaTime, Literal};
use crate::data::predicates::PredicateTable;
use crate::planner::plans::Link;
use crate::planner::GOAL_ID;

/// An unestablished condition of a step.
#[derive(Clone, Debug)]
pub struct OpenCondition {
    pub step_id: usize,
    pub condition: Rc<Formula>,
    /// Time stamp for literal conditions.
    pub when: FormulaTime,
}

impl OpenCondition {
    pub fn new(step_id: usize, condition: Rc<Formula>) -> OpenCondition {
        OpenCondition { step_id, condition, when: FormulaTime::AtStart }
    }

    pub fn literal_at(step_id: usize, literal: &Literal, when: FormulaTime) -> OpenCondition {
        OpenCondition { step_id, condition: Formula::from_literal(literal), when }
    }

    pub fn literal(&self) -> Option<Literal> {
        self.condition.literal()
    }

    pub fn disjuncts(&self) -> Option<&[Rc<Formula>]> {
        match self.condition.as_ref() {
            Formula::Disjunction(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn inequality(&self) -> Option<&BindingLiteral> {
        match self.condition.as_ref() {
            Formula::Inequality(bl) => Some(bl),
            _ => None,
        }
    }

    /// A static open condition can be resolved from the initial state only.
    pub fn is_static(&self, predicates: &PredicateTable) -> bool {
        self.step_id != GOAL_ID
            && self
                .literal()
                .is_some_and(|l| predicates.is_static(l.predicate()))
    }
}

impl PartialEq for OpenCondition {
    fn eq(&self, other: &OpenCondition) -> bool {
        self.step_id == other.step_id
            && Rc::ptr_eq(&self.condition, &other.condition)
            && self.when == other.when
    }
}

/// A causal link threatened by a step's effect.
#[derive(Clone, Debug)]
pub struct Unsafe {
    pub link: Link,
    pub step_id: usize,
    pub effect: Rc<Effect>,
}

impl PartialEq for Unsafe {
    fn eq(&self, other: &Unsafe) -> bool {
        self.link == other.link
            && self.step_id == other.step_id
            && Rc::ptr_eq(&self.effect, &other.effect)
    }
}

/// Two possibly concurrent effects on opposite-polarity unifiable literals.
/// The `Unexpanded` state means the threats of this plan have not been
/// enumerated yet.
#[derive(Clone, Debug)]
pub enum MutexThreat {
    Unexpanded,
    Threat {
        step_id1: usize,
        effect1: Rc<Effect>,
        step_id2: usize,
        effect2: Rc<Effect>,
    },
}

impl PartialEq for MutexThreat {
    fn eq(&self, other: &MutexThreat) -> bool {
        match (self, other) {
            (MutexThreat::Unexpanded, MutexThreat::Unexpanded) => true,
            (
                MutexThreat::Threat { step_id1, effect1, step_id2, effect2 },
                MutexThreat::Threat {
                    step_id1: o1,
                    effect1: oe1,
                    step_id2: o2,
                    effect2: oe2,
                },
            ) => {
                step_id1 == o1
                    && step_id2 == o2
                    && Rc::ptr_eq(effect1, oe1)
                    && Rc::ptr_eq(effect2, oe2)
            }
            _ => false,
        }
    }
}

/// Anything standing between a partial plan and a solution.
#[derive(Clone, Debug)]
pub enum Flaw {
    OpenCond(OpenCondition),
    Threat(Unsafe),
    Mutex(MutexThreat),
}
