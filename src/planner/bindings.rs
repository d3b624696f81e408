use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::data::actions::Action;
use crate::data::chain::{Chain, ChainRef};
use crate::data::formulas::{BindingLiteral, Literal};
use crate::data::problem::Problem;
use crate::data::terms::{Object, Term, Variable};
use crate::data::types::Type;
use crate::data::{DomainError, ModelEnv};
use crate::planner::graph::PlanningGraph;

/// A single (non-)codesignation constraint between a step variable and a
/// term.
#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    pub var: Variable,
    pub var_id: usize,
    pub term: Term,
    pub term_id: usize,
    pub equality: bool,
}

impl Binding {
    pub fn equality(var: Variable, var_id: usize, term: Term, term_id: usize) -> Binding {
        Binding { var, var_id, term, term_id, equality: true }
    }

    pub fn inequality(var: Variable, var_id: usize, term: Term, term_id: usize) -> Binding {
        Binding { var, var_id, term, term_id, equality: false }
    }
}

/// A list of bindings, usually a most general unifier.
pub type BindingList = Vec<Binding>;

/// A variable together with the step it belongs to.
pub type StepVariable = (Variable, usize);

/// The set of still-possible parameter tuples of one action instance.
#[derive(Debug)]
pub struct ActionDomain {
    tuples: Vec<Rc<Vec<Object>>>,
    projections: RefCell<BTreeMap<usize, Rc<BTreeSet<Object>>>>,
}

impl ActionDomain {
    pub fn new(tuples: Vec<Rc<Vec<Object>>>) -> Rc<ActionDomain> {
        Rc::new(ActionDomain { tuples, projections: RefCell::new(BTreeMap::new()) })
    }

    pub fn size(&self) -> usize {
        self.tuples.len()
    }

    /// The arity of the tuples in this domain.
    pub fn width(&self) -> usize {
        self.tuples.first().map_or(0, |t| t.len())
    }

    pub fn tuples(&self) -> &[Rc<Vec<Object>>] {
        &self.tuples
    }

    /// The set of objects occurring in the given column, cached per column.
    pub fn projection(&self, column: usize) -> Rc<BTreeSet<Object>> {
        if let Some(cached) = self.projections.borrow().get(&column) {
            return Rc::clone(cached);
        }
        let projection: BTreeSet<Object> =
            self.tuples.iter().map(|t| t[column]).collect();
        let projection = Rc::new(projection);
        self.projections.borrow_mut().insert(column, Rc::clone(&projection));
        projection
    }

    pub fn projection_size(&self, column: usize) -> usize {
        self.projection(column).len()
    }

    fn filtered(
        self: &Rc<Self>,
        column: usize,
        keep: impl Fn(Object) -> bool,
    ) -> Option<Rc<ActionDomain>> {
        let tuples: Vec<Rc<Vec<Object>>> = self
            .tuples
            .iter()
            .filter(|t| keep(t[column]))
            .cloned()
            .collect();
        if tuples.is_empty() {
            None
        } else if tuples.len() == self.tuples.len() {
            Some(Rc::clone(self))
        } else {
            Some(ActionDomain::new(tuples))
        }
    }

    /// Restrict a column to one object, or `None` if that empties the
    /// domain.
    pub fn restricted(self: &Rc<Self>, obj: Object, column: usize) -> Option<Rc<ActionDomain>> {
        self.filtered(column, |o| o == obj)
    }

    /// Restrict a column to a set of objects.
    pub fn restricted_to(
        self: &Rc<Self>,
        objs: &BTreeSet<Object>,
        column: usize,
    ) -> Option<Rc<ActionDomain>> {
        self.filtered(column, |o| objs.contains(&o))
    }

    /// Exclude one object from a column.
    pub fn excluded(self: &Rc<Self>, obj: Object, column: usize) -> Option<Rc<ActionDomain>> {
        self.filtered(column, |o| o != obj)
    }
}

/// A parameterised relational constraint tying one step's parameters to an
/// action domain.
#[derive(Clone, Debug)]
pub struct StepDomain {
    pub id: usize,
    parameters: Rc<Vec<Variable>>,
    domain: Rc<ActionDomain>,
}

/// Outcome of narrowing a step domain.
enum Restriction {
    Empty,
    Unchanged,
    Narrowed(StepDomain),
}

impl StepDomain {
    pub fn new(id: usize, parameters: Vec<Variable>, domain: Rc<ActionDomain>) -> StepDomain {
        StepDomain { id, parameters: Rc::new(parameters), domain }
    }

    pub fn parameters(&self) -> &[Variable] {
        &self.parameters
    }

    /// The column of the given variable, if it is one of the parameters.
    pub fn index_of(&self, var: Variable) -> Option<usize> {
        self.parameters.iter().position(|&p| p == var)
    }

    pub fn includes(&self, obj: Object, column: usize) -> bool {
        self.domain.tuples().iter().any(|t| t[column] == obj)
    }

    pub fn projection(&self, column: usize) -> Rc<BTreeSet<Object>> {
        self.domain.projection(column)
    }

    pub fn projection_size(&self, column: usize) -> usize {
        self.domain.projection_size(column)
    }

    fn narrowed(&self, domain: Option<Rc<ActionDomain>>) -> Restriction {
        match domain {
            None => Restriction::Empty,
            Some(d) if Rc::ptr_eq(&d, &self.domain) => Restriction::Unchanged,
            Some(d) => Restriction::Narrowed(StepDomain {
                id: self.id,
                parameters: Rc::clone(&self.parameters),
                domain: d,
            }),
        }
    }

    fn restricted(&self, obj: Object, column: usize) -> Restriction {
        self.narrowed(self.domain.restricted(obj, column))
    }

    fn restricted_to(&self, objs: &BTreeSet<Object>, column: usize) -> Restriction {
        self.narrowed(self.domain.restricted_to(objs, column))
    }

    fn excluded(&self, obj: Object, column: usize) -> Restriction {
        self.narrowed(self.domain.excluded(obj, column))
    }
}

/// One codesignation class: the step variables bound together, an optional
/// object constant they are pinned to, the step variables they must differ
/// from, and the most specific type any member may take.
#[derive(Clone, Debug)]
pub struct VarSet {
    constant: Option<Object>,
    cd_set: ChainRef<StepVariable>,
    ncd_set: ChainRef<StepVariable>,
    typ: Type,
}

impl VarSet {
    pub fn constant(&self) -> Option<Object> {
        self.constant
    }

    fn includes_object(&self, obj: Object) -> bool {
        self.constant == Some(obj)
    }

    fn includes_var(&self, var: Variable, step_id: usize) -> bool {
        Chain::contains(&self.cd_set, &(var, step_id))
    }

    fn includes_term(&self, term: Term, step_id: usize) -> bool {
        match term.as_object() {
            Some(obj) => self.includes_object(obj),
            None => match term.as_variable() {
                Some(var) => self.includes_var(var, step_id),
                None => false,
            },
        }
    }

    fn excludes(&self, var: Variable, step_id: usize) -> bool {
        Chain::contains(&self.ncd_set, &(var, step_id))
    }

    /// Pin this varset to an object, or `None` if the object's type does not
    /// fit.
    fn add_object(&self, obj: Object, env: &ModelEnv) -> Option<VarSet> {
        match self.constant {
            Some(existing) => (existing == obj).then(|| self.clone()),
            None => {
                let ot = env.terms.type_of(obj.into());
                env.types.is_subtype(ot, self.typ).then(|| VarSet {
                    constant: Some(obj),
                    cd_set: self.cd_set.clone(),
                    ncd_set: self.ncd_set.clone(),
                    typ: ot,
                })
            }
        }
    }

    /// Add a step variable to the codesignation set.
    fn add_var(&self, var: Variable, step_id: usize, env: &ModelEnv) -> Option<VarSet> {
        if self.excludes(var, step_id) {
            return None;
        }
        let var_type = env.terms.type_of(var.into());
        let typ = if self.constant.is_some() {
            if !env.types.is_subtype(self.typ, var_type) {
                return None;
            }
            self.typ
        } else {
            env.types.most_specific(self.typ, var_type)?
        };
        Some(VarSet {
            constant: self.constant,
            cd_set: Some(Chain::cons((var, step_id), self.cd_set.clone())),
            ncd_set: self.ncd_set.clone(),
            typ,
        })
    }

    fn add_term(&self, term: Term, step_id: usize, env: &ModelEnv) -> Option<VarSet> {
        match term.as_object() {
            Some(obj) => self.add_object(obj, env),
            None => match term.as_variable() {
                Some(var) => self.add_var(var, step_id, env),
                None => None,
            },
        }
    }

    /// Add a step variable to the non-codesignation set. Assumes the
    /// variable is not already a member.
    fn restrict(&self, var: Variable, step_id: usize) -> VarSet {
        VarSet {
            constant: self.constant,
            cd_set: self.cd_set.clone(),
            ncd_set: Some(Chain::cons((var, step_id), self.ncd_set.clone())),
            typ: self.typ,
        }
    }

    /// Merge two varsets, or `None` if they are incompatible.
    fn combine(&self, other: &VarSet, env: &ModelEnv) -> Option<VarSet> {
        let (constant, typ) = match (self.constant, other.constant) {
            (Some(c1), Some(c2)) => {
                if c1 != c2 {
                    return None;
                }
                (Some(c1), self.typ)
            }
            (Some(c1), None) => {
                if !env.types.is_subtype(self.typ, other.typ) {
                    return None;
                }
                (Some(c1), self.typ)
            }
            (None, Some(c2)) => {
                if !env.types.is_subtype(other.typ, self.typ) {
                    return None;
                }
                (Some(c2), other.typ)
            }
            (None, None) => (None, env.types.most_specific(self.typ, other.typ)?),
        };
        let mut cd_set = self.cd_set.clone();
        for sv in Chain::iter(&other.cd_set) {
            if self.excludes(sv.0, sv.1) {
                return None;
            }
            cd_set = Some(Chain::cons(*sv, cd_set));
        }
        let mut ncd_set = self.ncd_set.clone();
        for sv in Chain::iter(&other.ncd_set) {
            if self.includes_var(sv.0, sv.1) {
                return None;
            }
            if !self.excludes(sv.0, sv.1) {
                ncd_set = Some(Chain::cons(*sv, ncd_set));
            }
        }
        Some(VarSet { constant, cd_set, ncd_set, typ })
    }

    /// The varset representing a single binding. For an inequality,
    /// `reverse` selects which side of the binding the varset is built
    /// around; the forward direction of a variable-object inequality has no
    /// varset of its own.
    fn make(binding: &Binding, reverse: bool, env: &ModelEnv) -> Option<VarSet> {
        if binding.equality {
            let cd_set = Some(Chain::cons((binding.var, binding.var_id), None));
            match binding.term.as_object() {
                Some(obj) => Some(VarSet {
                    constant: Some(obj),
                    cd_set,
                    ncd_set: None,
                    typ: env.terms.type_of(binding.term),
                }),
                None => {
                    let var2 = binding.term.as_variable()?;
                    let typ = env.types.most_specific(
                        env.terms.type_of(binding.var.into()),
                        env.terms.type_of(binding.term),
                    )?;
                    Some(VarSet {
                        constant: None,
                        cd_set: Some(Chain::cons((var2, binding.term_id), cd_set)),
                        ncd_set: None,
                        typ,
                    })
                }
            }
        } else if reverse {
            let ncd_set = Some(Chain::cons((binding.var, binding.var_id), None));
            match binding.term.as_object() {
                Some(obj) => Some(VarSet {
                    constant: Some(obj),
                    cd_set: None,
                    ncd_set,
                    typ: env.terms.type_of(binding.term),
                }),
                None => {
                    let var2 = binding.term.as_variable()?;
                    Some(VarSet {
                        constant: None,
                        cd_set: Some(Chain::cons((var2, binding.term_id), None)),
                        ncd_set,
                        typ: env.terms.type_of(binding.term),
                    })
                }
            }
        } else {
            let var2 = binding.term.as_variable()?;
            Some(VarSet {
                constant: None,
                cd_set: Some(Chain::cons((binding.var, binding.var_id), None)),
                ncd_set: Some(Chain::cons((var2, binding.term_id), None)),
                typ: env.terms.type_of(binding.var.into()),
            })
        }
    }
}

fn find_varset_object(varsets: &ChainRef<VarSet>, obj: Object) -> Option<VarSet> {
    Chain::iter(varsets).find(|vs| vs.includes_object(obj)).cloned()
}

fn find_varset_var(varsets: &ChainRef<VarSet>, var: Variable, step_id: usize) -> Option<VarSet> {
    Chain::iter(varsets)
        .find(|vs| vs.includes_var(var, step_id))
        .cloned()
}

fn find_varset_term(varsets: &ChainRef<VarSet>, term: Term, step_id: usize) -> Option<VarSet> {
    match term.as_object() {
        Some(obj) => find_varset_object(varsets, obj),
        None => match term.as_variable() {
            Some(var) => find_varset_var(varsets, var, step_id),
            None => None,
        },
    }
}

/// The step domain covering the given variable, with its column.
fn find_step_domain(
    step_domains: &ChainRef<StepDomain>,
    var: Variable,
    step_id: usize,
) -> Option<(StepDomain, usize)> {
    if step_id == 0 {
        return None;
    }
    for sd in Chain::iter(step_domains) {
        if sd.id == step_id {
            return sd.index_of(var).map(|column| (sd.clone(), column));
        }
    }
    None
}

/// Emit equality bindings for every column whose projection collapsed to a
/// single object. This is what makes singleton propagation transitive.
fn add_domain_bindings(
    bindings: &mut BindingList,
    old_sd: &StepDomain,
    new_sd: &StepDomain,
    excluded_column: Option<usize>,
) {
    for c in 0..old_sd.parameters().len() {
        if excluded_column == Some(c) {
            continue;
        }
        if new_sd.projection_size(c) == 1 && old_sd.projection_size(c) > 1 {
            if let Some(&obj) = new_sd.projection(c).iter().next() {
                bindings.push(Binding::equality(
                    new_sd.parameters()[c],
                    new_sd.id,
                    obj.into(),
                    0,
                ));
            }
        }
    }
}

/// A collection of variable bindings: varsets forming the transitive
/// closure of the codesignation relation, plus per-step parameter domains.
/// Immutable; every update returns a new collection sharing the unchanged
/// tails.
#[derive(Clone, Debug, Default)]
pub struct Bindings {
    varsets: ChainRef<VarSet>,
    high_step: usize,
    step_domains: ChainRef<StepDomain>,
}

impl Bindings {
    /// Check if two literals unify under empty bindings, extending `mgu`
    /// with the most general unifier.
    pub fn is_unifiable(
        mgu: &mut BindingList,
        l1: &Literal,
        id1: usize,
        l2: &Literal,
        id2: usize,
        env: &ModelEnv,
    ) -> bool {
        Bindings::default().unify(mgu, l1, id1, l2, id2, env)
    }

    /// Return the object a term is bound to, or the term itself.
    pub fn get_binding(&self, term: Term, step_id: usize) -> Term {
        if term.is_variable() && step_id <= self.high_step {
            if let Some(vs) = find_varset_term(&self.varsets, term, step_id) {
                if let Some(obj) = vs.constant {
                    return obj.into();
                }
            }
        }
        term
    }

    /// The set of objects the given step variable may still take.
    pub fn get_domain(
        &self,
        var: Variable,
        step_id: usize,
        problem: &Problem,
    ) -> BTreeSet<Object> {
        if let Some((sd, column)) = find_step_domain(&self.step_domains, var, step_id) {
            return sd.projection(column).as_ref().clone();
        }
        let env = problem.env();
        let mut objs: BTreeSet<Object> = problem
            .terms()
            .compatible_objects(env.types, env.terms.type_of(var.into()))
            .iter()
            .copied()
            .collect();
        if step_id <= self.high_step {
            if let Some(vs) = find_varset_var(&self.varsets, var, step_id) {
                if let Some(obj) = vs.constant {
                    return BTreeSet::from([obj]);
                }
                for &(v2, id2) in Chain::iter(&vs.ncd_set) {
                    if id2 <= self.high_step {
                        if let Some(vs2) = find_varset_var(&self.varsets, v2, id2) {
                            if let Some(obj) = vs2.constant {
                                objs.remove(&obj);
                            }
                        }
                    }
                }
            }
        }
        objs
    }

    /// Check if one literal is the negation of the other and their atoms
    /// unify; the most general unifier extends `mgu`.
    pub fn affects(
        &self,
        mgu: &mut BindingList,
        l1: &Literal,
        id1: usize,
        l2: &Literal,
        id2: usize,
        env: &ModelEnv,
    ) -> bool {
        if l1.negated {
            self.unify(mgu, l2, id2, &Literal::positive(Rc::clone(&l1.atom)), id1, env)
        } else if l2.negated {
            self.unify(mgu, &Literal::positive(Rc::clone(&l2.atom)), id2, l1, id1, env)
        } else {
            false
        }
    }

    /// Check if two literals of equal polarity unify under these bindings,
    /// extending `mgu` with the most general unifier.
    pub fn unify(
        &self,
        mgu: &mut BindingList,
        l1: &Literal,
        id1: usize,
        l2: &Literal,
        id2: usize,
        env: &ModelEnv,
    ) -> bool {
        if l1.negated != l2.negated {
            return false;
        }
        let a1 = &l1.atom;
        let a2 = &l2.atom;
        if a1.is_ground() && a2.is_ground() {
            return a1 == a2;
        }
        if a1.predicate != a2.predicate || a1.terms.len() != a2.terms.len() {
            return false;
        }
        let first = mgu.len();
        let ok = if a1.is_ground() || a2.is_ground() {
            let (lifted, ground, lifted_id) =
                if a1.is_ground() { (a2, a1, id2) } else { (a1, a2, id1) };
            self.unify_against_ground(mgu, lifted, ground, lifted_id, env)
        } else {
            self.unify_lifted(mgu, a1, id1, a2, id2, env)
        };
        if !ok {
            mgu.truncate(first);
            return false;
        }
        if self.add(mgu, true, env).is_none() {
            mgu.truncate(first);
            return false;
        }
        true
    }

    fn unify_against_ground(
        &self,
        mgu: &mut BindingList,
        lifted: &crate::data::formulas::Atom,
        ground: &crate::data::formulas::Atom,
        lifted_id: usize,
        env: &ModelEnv,
    ) -> bool {
        let mut bound: BTreeMap<Variable, Term> = BTreeMap::new();
        for (&t1, &t2) in lifted.terms.iter().zip(ground.terms.iter()) {
            match t1.as_variable() {
                None => {
                    if t1 != t2 {
                        return false;
                    }
                }
                Some(v1) => {
                    if let Some(&prev) = bound.get(&v1) {
                        if prev != t2 {
                            return false;
                        }
                        continue;
                    }
                    let bt = self.get_binding(t1, lifted_id);
                    if bt.is_object() {
                        if bt != t2 {
                            return false;
                        }
                    } else {
                        if !env
                            .types
                            .is_subtype(env.terms.type_of(t2), env.terms.type_of(t1))
                        {
                            return false;
                        }
                        mgu.push(Binding::equality(v1, lifted_id, t2, 0));
                    }
                    bound.insert(v1, t2);
                }
            }
        }
        true
    }

    fn unify_lifted(
        &self,
        mgu: &mut BindingList,
        a1: &crate::data::formulas::Atom,
        id1: usize,
        a2: &crate::data::formulas::Atom,
        id2: usize,
        env: &ModelEnv,
    ) -> bool {
        for (&t1, &t2) in a1.terms.iter().zip(a2.terms.iter()) {
            match (t1.as_variable(), t2.as_variable()) {
                (None, None) => {
                    if t1 != t2 {
                        return false;
                    }
                }
                (None, Some(v2)) => {
                    if !env
                        .types
                        .is_subtype(env.terms.type_of(t1), env.terms.type_of(t2))
                    {
                        return false;
                    }
                    mgu.push(Binding::equality(v2, id2, t1, 0));
                }
                (Some(v1), None) => {
                    if !env
                        .types
                        .is_subtype(env.terms.type_of(t2), env.terms.type_of(t1))
                    {
                        return false;
                    }
                    mgu.push(Binding::equality(v1, id1, t2, id2));
                }
                (Some(v1), Some(_)) => {
                    if !env
                        .types
                        .is_compatible(env.terms.type_of(t1), env.terms.type_of(t2))
                    {
                        return false;
                    }
                    mgu.push(Binding::equality(v1, id1, t2, id2));
                }
            }
        }
        true
    }

    /// Check if an equality condition is consistent with these bindings.
    pub fn consistent_with_equality(&self, bl: &BindingLiteral, step_id: usize) -> bool {
        let var_id = bl.step_id1(step_id);
        let term_id = bl.step_id2(step_id);
        let vs = if term_id <= self.high_step {
            find_varset_term(&self.varsets, bl.term, term_id)
        } else {
            None
        };
        match vs {
            None => true,
            Some(vs) => {
                if vs.includes_var(bl.variable, var_id) {
                    true
                } else if vs.excludes(bl.variable, var_id) {
                    false
                } else if let Some(obj) = vs.constant {
                    match find_step_domain(&self.step_domains, bl.variable, var_id) {
                        Some((sd, column)) => sd.includes(obj, column),
                        None => true,
                    }
                } else {
                    true
                }
            }
        }
    }

    /// Check if an inequality condition is consistent with these bindings.
    pub fn consistent_with_inequality(&self, bl: &BindingLiteral, step_id: usize) -> bool {
        let var_id = bl.step_id1(step_id);
        let term_id = bl.step_id2(step_id);
        let vs = if term_id <= self.high_step {
            find_varset_term(&self.varsets, bl.term, term_id)
        } else {
            None
        };
        match vs {
            None => true,
            Some(vs) => {
                !vs.includes_var(bl.variable, var_id) || vs.excludes(bl.variable, var_id)
            }
        }
    }

    /// Return the bindings extended with the given constraints, or `None`
    /// if they are inconsistent. With `test_only`, consistency is checked
    /// without building the new collection.
    pub fn add(
        &self,
        new_bindings: &BindingList,
        test_only: bool,
        env: &ModelEnv,
    ) -> Option<Bindings> {
        if new_bindings.is_empty() {
            return Some(self.clone());
        }
        let mut varsets = self.varsets.clone();
        let mut high_step = self.high_step;
        let mut high_step_vars: BTreeSet<StepVariable> = BTreeSet::new();
        let mut step_domains = self.step_domains.clone();

        // The worklist grows as singleton projections emit new equalities.
        let mut queue: BindingList = new_bindings.clone();
        let mut index = 0;
        while index < queue.len() {
            let bind = queue[index].clone();
            index += 1;

            let sv = (bind.var, bind.var_id);
            let vs1 = if bind.var_id <= self.high_step || high_step_vars.contains(&sv) {
                find_varset_var(&varsets, bind.var, bind.var_id)
            } else {
                if bind.var_id > high_step {
                    high_step = bind.var_id;
                }
                high_step_vars.insert(sv);
                None
            };
            let vs2 = match bind.term.as_variable() {
                None => find_varset_term(&varsets, bind.term, bind.term_id),
                Some(tv) => {
                    let sv2 = (tv, bind.term_id);
                    if bind.term_id <= self.high_step || high_step_vars.contains(&sv2) {
                        find_varset_var(&varsets, tv, bind.term_id)
                    } else {
                        if bind.term_id > high_step {
                            high_step = bind.term_id;
                        }
                        high_step_vars.insert(sv2);
                        None
                    }
                }
            };

            if bind.equality {
                let already_bound = vs1
                    .as_ref()
                    .is_some_and(|v1| v1.includes_term(bind.term, bind.term_id));
                if already_bound {
                    continue;
                }
                let comb = match (&vs1, &vs2) {
                    (None, None) => VarSet::make(&bind, false, env),
                    (None, Some(v2)) => v2.add_var(bind.var, bind.var_id, env),
                    (Some(v1), None) => v1.add_term(bind.term, bind.term_id, env),
                    (Some(v1), Some(v2)) => v1.combine(v2, env),
                }?;
                let obj = comb.constant;
                varsets = Some(Chain::cons(comb, varsets));

                // Restrict the step domains of every newly codesignated
                // variable.
                let mut svars: Vec<StepVariable> = Vec::new();
                match &vs1 {
                    None => svars.push((bind.var, bind.var_id)),
                    Some(v1) if v1.constant.is_none() => {
                        svars.extend(Chain::iter(&v1.cd_set).copied());
                    }
                    _ => {}
                }
                match &vs2 {
                    None => {
                        if let Some(tv) = bind.term.as_variable() {
                            svars.push((tv, bind.term_id));
                        }
                    }
                    Some(v2) if v2.constant.is_none() => {
                        svars.extend(Chain::iter(&v2.cd_set).copied());
                    }
                    _ => {}
                }
                if let Some(obj) = obj {
                    for &(var, var_id) in &svars {
                        if let Some((sd, column)) =
                            find_step_domain(&step_domains, var, var_id)
                        {
                            match sd.restricted(obj, column) {
                                Restriction::Empty => return None,
                                Restriction::Unchanged => {}
                                Restriction::Narrowed(new_sd) => {
                                    add_domain_bindings(&mut queue, &sd, &new_sd, Some(column));
                                    step_domains = Some(Chain::cons(new_sd, step_domains));
                                }
                            }
                        }
                    }
                } else {
                    let mut intersection: Option<BTreeSet<Object>> = None;
                    for &(var, var_id) in &svars {
                        if let Some((sd, column)) =
                            find_step_domain(&step_domains, var, var_id)
                        {
                            let projection = sd.projection(column);
                            let cut = match intersection {
                                None => projection.as_ref().clone(),
                                Some(acc) => {
                                    acc.intersection(&projection).copied().collect()
                                }
                            };
                            if cut.is_empty() {
                                return None;
                            }
                            intersection = Some(cut);
                        }
                    }
                    if let Some(intersection) = intersection {
                        for &(var, var_id) in &svars {
                            if let Some((sd, column)) =
                                find_step_domain(&step_domains, var, var_id)
                            {
                                match sd.restricted_to(&intersection, column) {
                                    Restriction::Empty => return None,
                                    Restriction::Unchanged => {}
                                    Restriction::Narrowed(new_sd) => {
                                        add_domain_bindings(&mut queue, &sd, &new_sd, None);
                                        step_domains = Some(Chain::cons(new_sd, step_domains));
                                    }
                                }
                            }
                        }
                    }
                }
            } else {
                // Inequality.
                if let Some(v1) = &vs1 {
                    if v1.includes_term(bind.term, bind.term_id) {
                        return None;
                    }
                }
                let mut separate1 = true;
                let mut separate2 = true;
                let vs1_new = match &vs1 {
                    None => {
                        let made = VarSet::make(&bind, false, env);
                        if let Some(vs) = &made {
                            varsets = Some(Chain::cons(vs.clone(), varsets));
                        }
                        made
                    }
                    Some(v1) => match bind.term.as_variable() {
                        Some(tv) => {
                            if v1.excludes(tv, bind.term_id) {
                                separate1 = false;
                                Some(v1.clone())
                            } else {
                                let restricted = v1.restrict(tv, bind.term_id);
                                varsets = Some(Chain::cons(restricted.clone(), varsets));
                                Some(restricted)
                            }
                        }
                        None => {
                            separate1 = false;
                            Some(v1.clone())
                        }
                    },
                };
                let vs2_new = match &vs2 {
                    None => {
                        let made = VarSet::make(&bind, true, env);
                        if let Some(vs) = &made {
                            varsets = Some(Chain::cons(vs.clone(), varsets));
                        }
                        made
                    }
                    Some(v2) => {
                        if v2.excludes(bind.var, bind.var_id) {
                            separate2 = false;
                            Some(v2.clone())
                        } else {
                            let restricted = v2.restrict(bind.var, bind.var_id);
                            varsets = Some(Chain::cons(restricted.clone(), varsets));
                            Some(restricted)
                        }
                    }
                };
                if separate1 {
                    if let (Some(v1), Some(v2)) = (&vs1_new, &vs2_new) {
                        if let Some(obj) = v1.constant {
                            for &(var, var_id) in Chain::iter(&v2.cd_set) {
                                if let Some((sd, column)) =
                                    find_step_domain(&step_domains, var, var_id)
                                {
                                    match sd.excluded(obj, column) {
                                        Restriction::Empty => return None,
                                        Restriction::Unchanged => {}
                                        Restriction::Narrowed(new_sd) => {
                                            add_domain_bindings(&mut queue, &sd, &new_sd, None);
                                            step_domains =
                                                Some(Chain::cons(new_sd, step_domains));
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                if separate2 {
                    if let Some(v2) = &vs2_new {
                        if let Some(obj) = v2.constant {
                            let vars: Vec<StepVariable> = match &vs1_new {
                                Some(v1) if v1.cd_set.is_some() => {
                                    Chain::iter(&v1.cd_set).copied().collect()
                                }
                                _ => vec![(bind.var, bind.var_id)],
                            };
                            for (var, var_id) in vars {
                                if let Some((sd, column)) =
                                    find_step_domain(&step_domains, var, var_id)
                                {
                                    match sd.excluded(obj, column) {
                                        Restriction::Empty => return None,
                                        Restriction::Unchanged => {}
                                        Restriction::Narrowed(new_sd) => {
                                            add_domain_bindings(&mut queue, &sd, &new_sd, None);
                                            step_domains =
                                                Some(Chain::cons(new_sd, step_domains));
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        if test_only {
            Some(self.clone())
        } else {
            Some(Bindings { varsets, high_step, step_domains })
        }
    }

    /// Attach the planning graph's parameter-tuple enumeration for a new
    /// step as a step domain; columns that are already singletons pin their
    /// parameter.
    pub fn add_step(
        &self,
        step_id: usize,
        action: &Action,
        graph: &PlanningGraph,
        env: &ModelEnv,
    ) -> Result<Option<Bindings>, DomainError> {
        let parameters = action.parameters();
        if parameters.is_empty() {
            return Ok(Some(self.clone()));
        }
        let Some(domain) = graph.action_domain(&action.name) else {
            return Ok(None);
        };
        if domain.width() != parameters.len() {
            return Err(DomainError::ColumnOutOfRange);
        }
        let step_domain = StepDomain::new(step_id, parameters.to_vec(), domain);
        let mut varsets = self.varsets.clone();
        let mut high_step = self.high_step;
        for column in 0..parameters.len() {
            if step_domain.projection_size(column) == 1 {
                if let Some(&obj) = step_domain.projection(column).iter().next() {
                    let vs = VarSet {
                        constant: Some(obj),
                        cd_set: Some(Chain::cons((parameters[column], step_id), None)),
                        ncd_set: None,
                        typ: env.terms.type_of(parameters[column].into()),
                    };
                    varsets = Some(Chain::cons(vs, varsets));
                    if step_id > high_step {
                        high_step = step_id;
                    }
                }
            }
        }
        Ok(Some(Bindings {
            varsets,
            high_step,
            step_domains: Some(Chain::cons(step_domain, self.step_domains.clone())),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::{ActionDomain, Binding, Bindings, StepDomain, VarSet};
    use crate::data::chain::Chain;
    use crate::data::formulas::{Atom, Literal};
    use crate::data::terms::{Term, TermTable};
    use crate::data::types::{Type, TypeTable};
    use crate::data::predicates::PredicateTable;
    use crate::data::ModelEnv;
    use std::rc::Rc;

    struct Fixture {
        types: TypeTable,
        terms: TermTable,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture { types: TypeTable::new(), terms: TermTable::new() }
        }

        fn env(&self) -> ModelEnv<'_> {
            ModelEnv { types: &self.types, terms: &self.terms }
        }
    }

    #[test]
    fn equality_then_contradicting_inequality_fails() {
        let fx = Fixture::new();
        let o1 = fx.terms.add_object("o1", Type::OBJECT);
        let x = fx.terms.add_variable(Type::OBJECT);
        let env = fx.env();
        let eq = vec![Binding::equality(x, 1, o1.into(), 0)];
        let bindings = Bindings::default().add(&eq, false, &env).unwrap();
        let neq = vec![Binding::inequality(x, 1, o1.into(), 0)];
        assert!(bindings.add(&neq, false, &env).is_none());
    }

    #[test]
    fn binding_propagates_through_codesignation() {
        let fx = Fixture::new();
        let o1 = fx.terms.add_object("o1", Type::OBJECT);
        let x = fx.terms.add_variable(Type::OBJECT);
        let y = fx.terms.add_variable(Type::OBJECT);
        let env = fx.env();
        let bindings = Bindings::default()
            .add(&vec![Binding::equality(y, 2, o1.into(), 0)], false, &env)
            .unwrap();
        let bindings = bindings
            .add(&vec![Binding::equality(x, 1, Term::from(y), 2)], false, &env)
            .unwrap();
        assert_eq!(bindings.get_binding(x.into(), 1), Term::from(o1));
    }

    #[test]
    fn binding_order_does_not_matter() {
        let fx = Fixture::new();
        let o1 = fx.terms.add_object("o1", Type::OBJECT);
        let x = fx.terms.add_variable(Type::OBJECT);
        let y = fx.terms.add_variable(Type::OBJECT);
        let env = fx.env();
        let forward = Bindings::default()
            .add(
                &vec![
                    Binding::equality(x, 1, Term::from(y), 2),
                    Binding::equality(y, 2, o1.into(), 0),
                ],
                false,
                &env,
            )
            .unwrap();
        let backward = Bindings::default()
            .add(
                &vec![
                    Binding::equality(y, 2, o1.into(), 0),
                    Binding::equality(x, 1, Term::from(y), 2),
                ],
                false,
                &env,
            )
            .unwrap();
        assert_eq!(forward.get_binding(x.into(), 1), Term::from(o1));
        assert_eq!(backward.get_binding(x.into(), 1), Term::from(o1));
    }

    #[test]
    fn incompatible_constants_fail_to_merge() {
        let fx = Fixture::new();
        let o1 = fx.terms.add_object("o1", Type::OBJECT);
        let o2 = fx.terms.add_object("o2", Type::OBJECT);
        let x = fx.terms.add_variable(Type::OBJECT);
        let y = fx.terms.add_variable(Type::OBJECT);
        let env = fx.env();
        let bindings = Bindings::default()
            .add(
                &vec![
                    Binding::equality(x, 1, o1.into(), 0),
                    Binding::equality(y, 2, o2.into(), 0),
                ],
                false,
                &env,
            )
            .unwrap();
        assert!(bindings
            .add(&vec![Binding::equality(x, 1, Term::from(y), 2)], false, &env)
            .is_none());
    }

    #[test]
    fn unify_binds_variables_to_objects() {
        let fx = Fixture::new();
        let a = fx.terms.add_object("a", Type::OBJECT);
        let x = fx.terms.add_variable(Type::OBJECT);
        let env = fx.env();
        let mut preds = PredicateTable::new();
        let p = preds.add_predicate("p");
        let lifted = Literal::positive(Atom::new(p, vec![x.into()]));
        let ground = Literal::positive(Atom::new(p, vec![a.into()]));
        let mut mgu = Vec::new();
        assert!(Bindings::is_unifiable(&mut mgu, &lifted, 1, &ground, 0, &env));
        assert_eq!(mgu.len(), 1);
        assert_eq!(mgu[0].term, Term::from(a));
    }

    #[test]
    fn unify_rejects_distinct_ground_atoms() {
        let fx = Fixture::new();
        let a = fx.terms.add_object("a", Type::OBJECT);
        let b = fx.terms.add_object("b", Type::OBJECT);
        let env = fx.env();
        let mut preds = PredicateTable::new();
        let p = preds.add_predicate("p");
        let l1 = Literal::positive(Atom::new(p, vec![a.into()]));
        let l2 = Literal::positive(Atom::new(p, vec![b.into()]));
        let mut mgu = Vec::new();
        assert!(!Bindings::is_unifiable(&mut mgu, &l1, 0, &l2, 0, &env));
    }

    #[test]
    fn repeated_variable_must_unify_consistently() {
        let fx = Fixture::new();
        let a = fx.terms.add_object("a", Type::OBJECT);
        let b = fx.terms.add_object("b", Type::OBJECT);
        let x = fx.terms.add_variable(Type::OBJECT);
        let env = fx.env();
        let mut preds = PredicateTable::new();
        let p = preds.add_predicate("p");
        let lifted = Literal::positive(Atom::new(p, vec![x.into(), x.into()]));
        let same = Literal::positive(Atom::new(p, vec![a.into(), a.into()]));
        let different = Literal::positive(Atom::new(p, vec![a.into(), b.into()]));
        let mut mgu = Vec::new();
        assert!(Bindings::is_unifiable(&mut mgu, &lifted, 1, &same, 0, &env));
        mgu.clear();
        assert!(!Bindings::is_unifiable(&mut mgu, &lifted, 1, &different, 0, &env));
    }

    #[test]
    fn singleton_step_domain_column_pins_the_variable() {
        let fx = Fixture::new();
        let o1 = fx.terms.add_object("o1", Type::OBJECT);
        let o2 = fx.terms.add_object("o2", Type::OBJECT);
        let x = fx.terms.add_variable(Type::OBJECT);
        let y = fx.terms.add_variable(Type::OBJECT);
        let env = fx.env();
        // Tuples <o1,o1> and <o2,o2>: pinning x to o1 collapses y's column.
        let domain = ActionDomain::new(vec![
            Rc::new(vec![o1, o1]),
            Rc::new(vec![o2, o2]),
        ]);
        let step_domain = StepDomain::new(1, vec![x, y], domain);
        let bindings = Bindings {
            varsets: None,
            high_step: 1,
            step_domains: Some(Chain::cons(step_domain, None)),
        };
        let bindings = bindings
            .add(&vec![Binding::equality(x, 1, o1.into(), 0)], false, &env)
            .unwrap();
        assert_eq!(bindings.get_binding(y.into(), 1), Term::from(o1));
        let domain = bindings.get_domain(y, 1, &dummy_problem());
        assert_eq!(domain.len(), 1);
        assert!(domain.contains(&o1));
    }

    fn dummy_problem() -> crate::data::problem::Problem {
        let domain = crate::data::domain::Domain::new("d");
        crate::data::problem::Problem::new("p", Rc::new(domain))
    }

    #[test]
    fn pinned_variable_domain_collapses() {
        let fx = Fixture::new();
        let o1 = fx.terms.add_object("o1", Type::OBJECT);
        fx.terms.add_object("o2", Type::OBJECT);
        let x = fx.terms.add_variable(Type::OBJECT);
        let y = fx.terms.add_variable(Type::OBJECT);
        let env = fx.env();
        let bindings = Bindings::default()
            .add(
                &vec![
                    Binding::equality(y, 2, o1.into(), 0),
                    Binding::equality(x, 1, Term::from(y), 2),
                ],
                false,
                &env,
            )
            .unwrap();
        let domain = bindings.get_domain(x, 1, &dummy_problem());
        assert_eq!(domain.len(), 1);
        assert!(domain.contains(&o1));
    }

    #[test]
    fn varset_combine_respects_exclusions() {
        let fx = Fixture::new();
        let x = fx.terms.add_variable(Type::OBJECT);
        let y = fx.terms.add_variable(Type::OBJECT);
        let env = fx.env();
        let vs1 = VarSet::make(&Binding::inequality(x, 1, Term::from(y), 2), false, &env)
            .unwrap();
        // x != y, so merging a varset containing y must fail.
        let other = VarSet::make(
            &Binding::equality(y, 2, Term::from(x), 3),
            false,
            &env,
        )
        .unwrap();
        assert!(vs1.combine(&other, &env).is_none());
    }
}
