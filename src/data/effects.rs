use std::rc::Rc;

use crate::data::formulas::{Formula, Literal};
use crate::data::problem::Problem;
use crate::data::terms::{SubstitutionMap, Variable};

/// Temporal annotation on an effect.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EffectTime {
    AtStart,
    AtEnd,
}

/// A single effect of an action: a literal it asserts, when it takes hold,
/// the condition under which it applies, and the extra condition that must
/// hold for the effect to be considered for causal linking.
#[derive(Clone, Debug)]
pub struct Effect {
    /// Universally quantified variables local to this effect.
    pub parameters: Vec<Variable>,
    pub condition: Rc<Formula>,
    pub link_condition: Rc<Formula>,
    pub literal: Literal,
    pub when: EffectTime,
}

impl Effect {
    pub fn new(literal: Literal, when: EffectTime) -> Effect {
        Effect {
            parameters: Vec::new(),
            condition: Formula::truth(),
            link_condition: Formula::truth(),
            literal,
            when,
        }
    }

    /// Test if this effect universally quantifies the given variable.
    pub fn quantifies(&self, variable: Variable) -> bool {
        self.parameters.contains(&variable)
    }

    fn instantiation(
        &self,
        args: &SubstitutionMap,
        problem: &Problem,
        condition: Rc<Formula>,
    ) -> Effect {
        Effect {
            parameters: Vec::new(),
            condition,
            link_condition: self.link_condition.instantiate(args, problem),
            literal: self.literal.substitute(args),
            when: self.when,
        }
    }

    /// Push all groundings of this effect onto `effects`, iterating the
    /// cross product of objects compatible with each quantified parameter
    /// and pruning branches whose condition becomes a contradiction.
    /// `useful` counts groundings whose link condition survived.
    pub fn instantiations(
        &self,
        effects: &mut Vec<Rc<Effect>>,
        useful: &mut usize,
        subst: &SubstitutionMap,
        problem: &Problem,
    ) {
        let condition = self.condition.instantiate(subst, problem);
        if self.parameters.is_empty() {
            if !condition.is_contradiction() {
                let inst = self.instantiation(subst, problem, condition);
                if !inst.link_condition.is_contradiction() {
                    *useful += 1;
                }
                effects.push(Rc::new(inst));
            }
            return;
        }
        let env = problem.env();
        let mut arguments = Vec::with_capacity(self.parameters.len());
        for &param in &self.parameters {
            let objects = problem
                .terms()
                .compatible_objects(env.types, env.terms.type_of(param.into()));
            if objects.is_empty() {
                return;
            }
            arguments.push(objects);
        }
        let mut args = subst.clone();
        self.instantiate_rec(0, &arguments, &mut args, condition, effects, useful, problem);
    }

    #[allow(clippy::too_many_arguments)]
    fn instantiate_rec(
        &self,
        depth: usize,
        arguments: &[Rc<Vec<crate::data::terms::Object>>],
        args: &mut SubstitutionMap,
        condition: Rc<Formula>,
        effects: &mut Vec<Rc<Effect>>,
        useful: &mut usize,
        problem: &Problem,
    ) {
        if depth == self.parameters.len() {
            let inst = self.instantiation(args, problem, condition);
            if !inst.link_condition.is_contradiction() {
                *useful += 1;
            }
            effects.push(Rc::new(inst));
            return;
        }
        for &obj in arguments[depth].iter() {
            let mut partial = SubstitutionMap::new();
            partial.insert(self.parameters[depth], obj.into());
            let narrowed = condition.instantiate(&partial, problem);
            if narrowed.is_contradiction() {
                continue;
            }
            args.insert(self.parameters[depth], obj.into());
            self.instantiate_rec(depth + 1, arguments, args, narrowed, effects, useful, problem);
        }
        args.remove(&self.parameters[depth]);
    }
}
