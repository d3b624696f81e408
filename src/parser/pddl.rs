use std::rc::Rc;

use thiserror::Error;

use crate::data::actions::Action;
use crate::data::domain::Domain;
use crate::data::effects::{Effect, EffectTime};
use crate::data::expressions::{Expression, Fluent};
use crate::data::formulas::{Atom, Formula, FormulaTime, Literal};
use crate::data::problem::Problem;
use crate::data::terms::{Term, Variable};
use crate::data::types::{Type, TypeSet};
use crate::data::{DomainError, ModelEnv};
use crate::parser::lexer::{tokenize, LocatedToken, Token};

/// A syntax or consistency error in a PDDL input.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

/// Read a PDDL domain definition.
pub fn parse_domain(text: &str) -> Result<Domain, ParseError> {
    Reader::new(text).domain()
}

/// Read a PDDL problem definition against a previously read domain.
pub fn parse_problem(text: &str, domain: Rc<Domain>) -> Result<Problem, ParseError> {
    Reader::new(text).problem(domain)
}

/// Variables in scope, innermost last.
type Scope = Vec<(String, Variable)>;

struct Reader {
    tokens: Vec<LocatedToken>,
    pos: usize,
}

impl Reader {
    fn new(text: &str) -> Reader {
        Reader { tokens: tokenize(text), pos: 0 }
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map_or(0, |t| t.line)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError { line: self.line(), message: message.into() }
    }

    fn domain_error(&self, err: DomainError) -> ParseError {
        self.error(err.to_string())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        match self.tokens.get(self.pos) {
            Some(t) => {
                self.pos += 1;
                Ok(t.token.clone())
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn expect_lparen(&mut self) -> Result<(), ParseError> {
        match self.next()? {
            Token::LParen => Ok(()),
            other => Err(self.error(format!("expected `(`, found `{}`", other))),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ParseError> {
        match self.next()? {
            Token::RParen => Ok(()),
            other => Err(self.error(format!("expected `)`, found `{}`", other))),
        }
    }

    fn symbol(&mut self) -> Result<String, ParseError> {
        match self.next()? {
            Token::Symbol(s) => Ok(s),
            other => Err(self.error(format!("expected name, found `{}`", other))),
        }
    }

    fn expect_symbol(&mut self, expected: &str) -> Result<(), ParseError> {
        let s = self.symbol()?;
        if s == expected {
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`, found `{}`", expected, s)))
        }
    }

    fn at_rparen(&self) -> bool {
        matches!(self.peek(), Some(Token::RParen))
    }

    fn skip_form(&mut self) -> Result<(), ParseError> {
        let mut depth = 0usize;
        loop {
            match self.next()? {
                Token::LParen => depth += 1,
                Token::RParen => {
                    if depth == 0 {
                        return Err(self.error("unexpected `)`"));
                    }
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {
                    if depth == 0 {
                        return Ok(());
                    }
                }
            }
        }
    }

    // ---- domains ----

    fn domain(&mut self) -> Result<Domain, ParseError> {
        self.expect_lparen()?;
        self.expect_symbol("define")?;
        self.expect_lparen()?;
        self.expect_symbol("domain")?;
        let name = self.symbol()?;
        self.expect_rparen()?;
        let mut domain = Domain::new(name);
        while !self.at_rparen() {
            self.expect_lparen()?;
            let section = self.symbol()?;
            match section.as_str() {
                ":requirements" => self.requirements(&mut domain)?,
                ":types" => self.types(&mut domain)?,
                ":constants" => {
                    let constants = self.typed_names(&mut domain)?;
                    for (name, t) in constants {
                        domain.terms().add_object(&name, t);
                    }
                    self.expect_rparen()?;
                }
                ":predicates" => self.predicates(&mut domain)?,
                ":functions" => self.functions(&mut domain)?,
                ":action" => self.action(&mut domain, false)?,
                ":durative-action" => self.action(&mut domain, true)?,
                other => return Err(self.error(format!("unknown section `{}`", other))),
            }
        }
        self.expect_rparen()?;
        Ok(domain)
    }

    fn requirements(&mut self, domain: &mut Domain) -> Result<(), ParseError> {
        while !self.at_rparen() {
            let flag = self.symbol()?;
            let requirements = &mut domain.requirements;
            match flag.as_str() {
                ":strips" => requirements.strips = true,
                ":typing" => requirements.typing = true,
                ":negative-preconditions" => requirements.negative_preconditions = true,
                ":disjunctive-preconditions" => requirements.disjunctive_preconditions = true,
                ":equality" => requirements.equality = true,
                ":existential-preconditions" => requirements.existential_preconditions = true,
                ":universal-preconditions" => requirements.universal_preconditions = true,
                ":quantified-preconditions" => requirements.enable_quantified_preconditions(),
                ":conditional-effects" => requirements.conditional_effects = true,
                ":adl" => requirements.enable_adl(),
                ":durative-actions" => requirements.durative_actions = true,
                ":duration-inequalities" => requirements.duration_inequalities = true,
                ":fluents" => requirements.fluents = true,
                ":timed-initial-literals" => requirements.timed_initial_literals = true,
                other => {
                    return Err(self.error(format!("unsupported requirement `{}`", other)))
                }
            }
        }
        self.expect_rparen()
    }

    /// A typed list of names: `a b - t c - (either t1 t2) d`.
    fn typed_names(&mut self, domain: &mut Domain) -> Result<Vec<(String, Type)>, ParseError> {
        let mut result = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        while !self.at_rparen() {
            let name = self.symbol()?;
            if name == "-" {
                let t = self.type_spec(domain)?;
                result.extend(pending.drain(..).map(|n| (n, t)));
            } else {
                pending.push(name);
            }
        }
        result.extend(pending.into_iter().map(|n| (n, Type::OBJECT)));
        Ok(result)
    }

    fn type_spec(&mut self, domain: &mut Domain) -> Result<Type, ParseError> {
        match self.next()? {
            Token::Symbol(name) => Ok(domain.types_mut().add_type(&name)),
            Token::LParen => {
                self.expect_symbol("either")?;
                let mut components = TypeSet::new();
                while !self.at_rparen() {
                    let name = self.symbol()?;
                    components.insert(domain.types_mut().add_type(&name));
                }
                self.expect_rparen()?;
                domain
                    .types_mut()
                    .union_type(components)
                    .ok_or_else(|| self.error("empty union type"))
            }
            other => Err(self.error(format!("expected type, found `{}`", other))),
        }
    }

    fn types(&mut self, domain: &mut Domain) -> Result<(), ParseError> {
        let typed = self.typed_names(domain)?;
        for (name, supertype) in typed {
            let t = domain.types_mut().add_type(&name);
            domain
                .types_mut()
                .add_supertype(t, supertype)
                .map_err(|e| self.domain_error(e))?;
        }
        self.expect_rparen()
    }

    fn predicates(&mut self, domain: &mut Domain) -> Result<(), ParseError> {
        while !self.at_rparen() {
            self.expect_lparen()?;
            let name = self.symbol()?;
            let predicate = domain.predicates_mut().add_predicate(&name);
            let parameters = self.typed_variables_raw(domain)?;
            for (_, t) in parameters {
                domain.predicates_mut().add_parameter(predicate, t);
            }
            self.expect_rparen()?;
        }
        self.expect_rparen()
    }

    fn functions(&mut self, domain: &mut Domain) -> Result<(), ParseError> {
        while !self.at_rparen() {
            self.expect_lparen()?;
            let name = self.symbol()?;
            let function = domain.functions_mut().add_function(&name);
            let parameters = self.typed_variables_raw(domain)?;
            for (_, t) in parameters {
                domain.functions_mut().add_parameter(function, t);
            }
            self.expect_rparen()?;
            // Optional `- number` annotation after a function declaration.
            if matches!(self.peek(), Some(Token::Symbol(s)) if s == "-") {
                self.next()?;
                self.symbol()?;
            }
        }
        self.expect_rparen()
    }

    /// A typed variable list, names only (for predicate declarations).
    fn typed_variables_raw(
        &mut self,
        domain: &mut Domain,
    ) -> Result<Vec<(String, Type)>, ParseError> {
        let mut result = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        while !self.at_rparen() {
            let name = self.symbol()?;
            if name == "-" {
                let t = self.type_spec(domain)?;
                result.extend(pending.drain(..).map(|n| (n, t)));
            } else if name.starts_with('?') {
                pending.push(name);
            } else {
                return Err(self.error(format!("expected variable, found `{}`", name)));
            }
        }
        result.extend(pending.into_iter().map(|n| (n, Type::OBJECT)));
        Ok(result)
    }

    /// A typed variable list creating fresh scoped variables.
    fn typed_variables(
        &mut self,
        domain: &mut Domain,
        scope: &mut Scope,
    ) -> Result<Vec<Variable>, ParseError> {
        let typed = self.typed_variables_raw(domain)?;
        let mut variables = Vec::with_capacity(typed.len());
        for (name, t) in typed {
            let v = domain.terms().add_variable(t);
            scope.push((name, v));
            variables.push(v);
        }
        Ok(variables)
    }

    fn action(&mut self, domain: &mut Domain, durative: bool) -> Result<(), ParseError> {
        let name = self.symbol()?;
        let mut schema = Action::schema(domain.fresh_action_id(), name, durative);
        let mut scope = Scope::new();
        let mut effects: Vec<Effect> = Vec::new();
        while !self.at_rparen() {
            let keyword = self.symbol()?;
            match keyword.as_str() {
                ":parameters" => {
                    self.expect_lparen()?;
                    for v in self.typed_variables(domain, &mut scope)? {
                        schema.add_parameter(v);
                    }
                    self.expect_rparen()?;
                }
                ":precondition" if !durative => {
                    let condition = self.formula(domain, &mut scope)?;
                    schema.set_condition(condition);
                }
                ":condition" if durative => {
                    let condition = self.timed_formula(domain, &mut scope)?;
                    schema.set_condition(condition);
                }
                ":duration" if durative => {
                    self.duration_constraint(domain, &mut scope, &mut schema)?;
                }
                ":effect" => {
                    if durative {
                        self.durative_effect(
                            domain,
                            &mut scope,
                            &mut effects,
                            Formula::truth(),
                            &[],
                        )?;
                    } else {
                        self.effect(
                            domain,
                            &mut scope,
                            &mut effects,
                            EffectTime::AtEnd,
                            Formula::truth(),
                            &[],
                        )?;
                    }
                }
                other => return Err(self.error(format!("unknown keyword `{}`", other))),
            }
        }
        self.expect_rparen()?;
        for effect in effects {
            domain
                .predicates_mut()
                .make_dynamic(effect.literal.predicate());
            schema.add_effect(effect);
        }
        domain.add_action(schema);
        Ok(())
    }

    fn duration_constraint(
        &mut self,
        domain: &mut Domain,
        scope: &mut Scope,
        schema: &mut Action,
    ) -> Result<(), ParseError> {
        self.expect_lparen()?;
        let op = self.symbol()?;
        match op.as_str() {
            "and" => {
                while !self.at_rparen() {
                    self.duration_constraint(domain, scope, schema)?;
                }
                self.expect_rparen()
            }
            "=" | "<=" | ">=" => {
                self.expect_symbol("?duration")?;
                let expr = self.expression(domain, scope)?;
                match op.as_str() {
                    "=" => schema.set_duration(expr),
                    "<=" => schema.set_max_duration(expr),
                    _ => schema.set_min_duration(expr),
                }
                self.expect_rparen()
            }
            other => Err(self.error(format!("unknown duration constraint `{}`", other))),
        }
    }

    // ---- formulas ----

    fn term(&mut self, domain: &Domain, scope: &Scope) -> Result<Term, ParseError> {
        let name = self.symbol()?;
        if name.starts_with('?') {
            scope
                .iter()
                .rev()
                .find(|(n, _)| *n == name)
                .map(|&(_, v)| v.into())
                .ok_or_else(|| self.error(format!("unbound variable `{}`", name)))
        } else {
            domain
                .terms()
                .find_object(&name)
                .map(Term::from)
                .ok_or_else(|| self.error(format!("unknown object `{}`", name)))
        }
    }

    fn atom(&mut self, domain: &Domain, scope: &Scope, name: &str) -> Result<Rc<Atom>, ParseError> {
        let predicate = domain
            .predicates()
            .find_predicate(name)
            .ok_or_else(|| self.error(format!("unknown predicate `{}`", name)))?;
        let mut terms = Vec::new();
        while !self.at_rparen() {
            terms.push(self.term(domain, scope)?);
        }
        self.expect_rparen()?;
        if terms.len() != domain.predicates().parameters(predicate).len() {
            return Err(self.error(format!("wrong number of arguments for `{}`", name)));
        }
        Ok(Atom::new(predicate, terms))
    }

    fn formula(&mut self, domain: &mut Domain, scope: &mut Scope) -> Result<Rc<Formula>, ParseError> {
        self.expect_lparen()?;
        let head = self.symbol()?;
        match head.as_str() {
            "and" => {
                let mut result = Formula::truth();
                while !self.at_rparen() {
                    result = Formula::and(result, self.formula(domain, scope)?);
                }
                self.expect_rparen()?;
                Ok(result)
            }
            "or" => {
                let mut result = Formula::falsity();
                while !self.at_rparen() {
                    result = Formula::or(result, self.formula(domain, scope)?);
                }
                self.expect_rparen()?;
                Ok(result)
            }
            "not" => {
                let inner = self.formula(domain, scope)?;
                self.expect_rparen()?;
                Ok(Formula::negation(&inner))
            }
            "imply" => {
                let antecedent = self.formula(domain, scope)?;
                let consequent = self.formula(domain, scope)?;
                self.expect_rparen()?;
                Ok(Formula::or(Formula::negation(&antecedent), consequent))
            }
            "exists" | "forall" => {
                self.expect_lparen()?;
                let depth = scope.len();
                let parameters = self.typed_variables(domain, scope)?;
                self.expect_rparen()?;
                let body = self.formula(domain, scope)?;
                self.expect_rparen()?;
                scope.truncate(depth);
                let quantified = crate::data::formulas::Quantified { parameters, body };
                let formula = if head == "exists" {
                    Formula::Exists(quantified)
                } else {
                    Formula::Forall(quantified, std::cell::RefCell::new(None))
                };
                Ok(Rc::new(formula))
            }
            "=" => {
                let t1 = self.term(domain, scope)?;
                let t2 = self.term(domain, scope)?;
                self.expect_rparen()?;
                let env = ModelEnv { types: domain.types(), terms: domain.terms() };
                Ok(Formula::equality(t1, 0, t2, 0, &env))
            }
            name => Ok(Formula::atom(self.atom(domain, scope, name)?)),
        }
    }

    /// A durative condition: `at start`/`over all`/`at end` wrappers over
    /// goal descriptions, conjoined.
    fn timed_formula(
        &mut self,
        domain: &mut Domain,
        scope: &mut Scope,
    ) -> Result<Rc<Formula>, ParseError> {
        self.expect_lparen()?;
        let head = self.symbol()?;
        match head.as_str() {
            "and" => {
                let mut result = Formula::truth();
                while !self.at_rparen() {
                    result = Formula::and(result, self.timed_formula(domain, scope)?);
                }
                self.expect_rparen()?;
                Ok(result)
            }
            "at" | "over" => {
                let when = self.symbol()?;
                let when = match (head.as_str(), when.as_str()) {
                    ("at", "start") => FormulaTime::AtStart,
                    ("at", "end") => FormulaTime::AtEnd,
                    ("over", "all") => FormulaTime::OverAll,
                    _ => return Err(self.error("expected `at start`, `at end`, or `over all`")),
                };
                let inner = self.formula(domain, scope)?;
                self.expect_rparen()?;
                Ok(stamp_formula(&inner, when))
            }
            other => Err(self.error(format!("expected timed condition, found `{}`", other))),
        }
    }

    // ---- effects ----

    #[allow(clippy::too_many_arguments)]
    fn effect(
        &mut self,
        domain: &mut Domain,
        scope: &mut Scope,
        effects: &mut Vec<Effect>,
        when: EffectTime,
        condition: Rc<Formula>,
        parameters: &[Variable],
    ) -> Result<(), ParseError> {
        self.expect_lparen()?;
        let head = self.symbol()?;
        match head.as_str() {
            "and" => {
                while !self.at_rparen() {
                    self.effect(domain, scope, effects, when, Rc::clone(&condition), parameters)?;
                }
                self.expect_rparen()
            }
            "not" => {
                self.expect_lparen()?;
                let name = self.symbol()?;
                let atom = self.atom(domain, scope, &name)?;
                self.expect_rparen()?;
                self.push_effect(effects, Literal::negative(atom), when, condition, parameters);
                Ok(())
            }
            "when" => {
                let extra = self.formula(domain, scope)?;
                let condition = Formula::and(condition, extra);
                self.effect(domain, scope, effects, when, condition, parameters)?;
                self.expect_rparen()
            }
            "forall" => {
                self.expect_lparen()?;
                let depth = scope.len();
                let mut quantified = parameters.to_vec();
                quantified.extend(self.typed_variables(domain, scope)?);
                self.expect_rparen()?;
                self.effect(domain, scope, effects, when, condition, &quantified)?;
                scope.truncate(depth);
                self.expect_rparen()
            }
            name => {
                let atom = self.atom(domain, scope, name)?;
                self.push_effect(effects, Literal::positive(atom), when, condition, parameters);
                Ok(())
            }
        }
    }

    fn durative_effect(
        &mut self,
        domain: &mut Domain,
        scope: &mut Scope,
        effects: &mut Vec<Effect>,
        condition: Rc<Formula>,
        parameters: &[Variable],
    ) -> Result<(), ParseError> {
        self.expect_lparen()?;
        let head = self.symbol()?;
        match head.as_str() {
            "and" => {
                while !self.at_rparen() {
                    self.durative_effect(domain, scope, effects, Rc::clone(&condition), parameters)?;
                }
                self.expect_rparen()
            }
            "at" => {
                let when = match self.symbol()?.as_str() {
                    "start" => EffectTime::AtStart,
                    "end" => EffectTime::AtEnd,
                    other => {
                        return Err(self.error(format!("expected `start` or `end`, found `{}`", other)))
                    }
                };
                self.effect(domain, scope, effects, when, condition, parameters)?;
                self.expect_rparen()
            }
            "when" => {
                let extra = self.timed_formula(domain, scope)?;
                let condition = Formula::and(condition, extra);
                self.durative_effect(domain, scope, effects, condition, parameters)?;
                self.expect_rparen()
            }
            "forall" => {
                self.expect_lparen()?;
                let depth = scope.len();
                let mut quantified = parameters.to_vec();
                quantified.extend(self.typed_variables(domain, scope)?);
                self.expect_rparen()?;
                self.durative_effect(domain, scope, effects, condition, &quantified)?;
                scope.truncate(depth);
                self.expect_rparen()
            }
            other => Err(self.error(format!("expected durative effect, found `{}`", other))),
        }
    }

    fn push_effect(
        &self,
        effects: &mut Vec<Effect>,
        literal: Literal,
        when: EffectTime,
        condition: Rc<Formula>,
        parameters: &[Variable],
    ) {
        let mut effect = Effect::new(literal, when);
        effect.condition = condition;
        effect.parameters = parameters.to_vec();
        effects.push(effect);
    }

    // ---- expressions ----

    fn expression(
        &mut self,
        domain: &Domain,
        scope: &Scope,
    ) -> Result<Rc<Expression>, ParseError> {
        match self.next()? {
            Token::Number(n) => Ok(Expression::value(n)),
            Token::LParen => {
                let head = self.symbol()?;
                match head.as_str() {
                    "+" | "-" | "*" | "/" => {
                        let a = self.expression(domain, scope)?;
                        let b = self.expression(domain, scope)?;
                        self.expect_rparen()?;
                        match head.as_str() {
                            "+" => Ok(Expression::addition(a, b)),
                            "-" => Ok(Expression::subtraction(a, b)),
                            "*" => Ok(Expression::multiplication(a, b)),
                            _ => Expression::division(a, b).map_err(|e| self.domain_error(e)),
                        }
                    }
                    name => {
                        let function = domain
                            .functions()
                            .find_function(name)
                            .ok_or_else(|| self.error(format!("unknown function `{}`", name)))?;
                        let mut terms = Vec::new();
                        while !self.at_rparen() {
                            terms.push(self.term(domain, scope)?);
                        }
                        self.expect_rparen()?;
                        Ok(Rc::new(Expression::Fluent(Fluent::new(function, terms))))
                    }
                }
            }
            other => Err(self.error(format!("expected expression, found `{}`", other))),
        }
    }

    // ---- problems ----

    fn problem(&mut self, domain: Rc<Domain>) -> Result<Problem, ParseError> {
        self.expect_lparen()?;
        self.expect_symbol("define")?;
        self.expect_lparen()?;
        self.expect_symbol("problem")?;
        let name = self.symbol()?;
        self.expect_rparen()?;
        let mut problem = Problem::new(name, Rc::clone(&domain));
        while !self.at_rparen() {
            self.expect_lparen()?;
            let section = self.symbol()?;
            match section.as_str() {
                ":domain" => {
                    let dname = self.symbol()?;
                    if dname != domain.name() {
                        return Err(
                            self.error(format!("problem expects domain `{}`", dname))
                        );
                    }
                    self.expect_rparen()?;
                }
                ":requirements" => {
                    // Problem-level requirements add nothing new; validate
                    // the names and move on.
                    while !self.at_rparen() {
                        self.symbol()?;
                    }
                    self.expect_rparen()?;
                }
                ":objects" => {
                    let objects = self.typed_names_for_problem(&domain)?;
                    for (name, t) in objects {
                        problem.terms().add_object(&name, t);
                    }
                    self.expect_rparen()?;
                }
                ":init" => self.init_section(&domain, &mut problem)?,
                ":goal" => {
                    let goal = self.goal_formula(&domain, &problem, &mut Scope::new())?;
                    problem.set_goal(goal);
                    self.expect_rparen()?;
                }
                ":metric" => {
                    let direction = self.symbol()?;
                    let negate = match direction.as_str() {
                        "minimize" => false,
                        "maximize" => true,
                        other => {
                            return Err(self.error(format!(
                                "expected `minimize` or `maximize`, found `{}`",
                                other
                            )))
                        }
                    };
                    let expr = self.problem_expression(&domain, &problem)?;
                    problem
                        .set_metric(expr, negate)
                        .map_err(|e| self.domain_error(e))?;
                    self.expect_rparen()?;
                }
                other => return Err(self.error(format!("unknown section `{}`", other))),
            }
        }
        self.expect_rparen()?;
        problem.finish();
        Ok(problem)
    }

    fn typed_names_for_problem(
        &mut self,
        domain: &Domain,
    ) -> Result<Vec<(String, Type)>, ParseError> {
        let mut result = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        while !self.at_rparen() {
            let name = self.symbol()?;
            if name == "-" {
                let t = self.problem_type(domain)?;
                result.extend(pending.drain(..).map(|n| (n, t)));
            } else {
                pending.push(name);
            }
        }
        result.extend(pending.into_iter().map(|n| (n, Type::OBJECT)));
        Ok(result)
    }

    /// A type reference in a problem; the type must already be declared.
    fn problem_type(&mut self, domain: &Domain) -> Result<Type, ParseError> {
        match self.next()? {
            Token::Symbol(name) => domain
                .types()
                .find_type(&name)
                .ok_or_else(|| self.error(format!("unknown type `{}`", name))),
            other => Err(self.error(format!("expected type, found `{}`", other))),
        }
    }

    fn init_section(
        &mut self,
        domain: &Rc<Domain>,
        problem: &mut Problem,
    ) -> Result<(), ParseError> {
        while !self.at_rparen() {
            self.expect_lparen()?;
            let head = self.symbol()?;
            match head.as_str() {
                "=" => {
                    self.expect_lparen()?;
                    let name = self.symbol()?;
                    let function = domain
                        .functions()
                        .find_function(&name)
                        .ok_or_else(|| self.error(format!("unknown function `{}`", name)))?;
                    let mut terms = Vec::new();
                    while !self.at_rparen() {
                        terms.push(self.problem_term(domain, problem)?);
                    }
                    self.expect_rparen()?;
                    let value = match self.next()? {
                        Token::Number(n) => n,
                        other => {
                            return Err(
                                self.error(format!("expected number, found `{}`", other))
                            )
                        }
                    };
                    self.expect_rparen()?;
                    problem.add_init_value(Fluent::new(function, terms), value);
                }
                "at" if matches!(self.peek(), Some(Token::Number(_))) => {
                    let time = match self.next()? {
                        Token::Number(n) => n,
                        _ => unreachable!("peeked a number"),
                    };
                    let literal = self.init_literal(domain, problem)?;
                    self.expect_rparen()?;
                    problem.add_init_literal(time, literal);
                }
                "not" => {
                    // Negative initial literals add nothing under the
                    // closed world assumption.
                    self.skip_form()?;
                    self.expect_rparen()?;
                }
                name => {
                    let atom = self.problem_atom(domain, problem, name)?;
                    problem.add_init_atom(atom);
                }
            }
        }
        self.expect_rparen()
    }

    fn init_literal(
        &mut self,
        domain: &Rc<Domain>,
        problem: &Problem,
    ) -> Result<Literal, ParseError> {
        self.expect_lparen()?;
        let head = self.symbol()?;
        if head == "not" {
            self.expect_lparen()?;
            let name = self.symbol()?;
            let atom = self.problem_atom(domain, problem, &name)?;
            self.expect_rparen()?;
            Ok(Literal::negative(atom))
        } else {
            let atom = self.problem_atom(domain, problem, &head)?;
            Ok(Literal::positive(atom))
        }
    }

    fn problem_term(&mut self, domain: &Domain, problem: &Problem) -> Result<Term, ParseError> {
        let name = self.symbol()?;
        problem
            .terms()
            .find_object(&name)
            .map(Term::from)
            .or_else(|| domain.terms().find_object(&name).map(Term::from))
            .ok_or_else(|| self.error(format!("unknown object `{}`", name)))
    }

    fn problem_atom(
        &mut self,
        domain: &Domain,
        problem: &Problem,
        name: &str,
    ) -> Result<Rc<Atom>, ParseError> {
        let predicate = domain
            .predicates()
            .find_predicate(name)
            .ok_or_else(|| self.error(format!("unknown predicate `{}`", name)))?;
        let mut terms = Vec::new();
        while !self.at_rparen() {
            terms.push(self.problem_term(domain, problem)?);
        }
        self.expect_rparen()?;
        if terms.len() != domain.predicates().parameters(predicate).len() {
            return Err(self.error(format!("wrong number of arguments for `{}`", name)));
        }
        Ok(Atom::new(predicate, terms))
    }

    /// A goal formula over problem objects; quantified variables are drawn
    /// from the problem's term table.
    fn goal_formula(
        &mut self,
        domain: &Rc<Domain>,
        problem: &Problem,
        scope: &mut Scope,
    ) -> Result<Rc<Formula>, ParseError> {
        self.expect_lparen()?;
        let head = self.symbol()?;
        self.goal_tail(domain, problem, scope, head)
    }

    fn goal_tail(
        &mut self,
        domain: &Rc<Domain>,
        problem: &Problem,
        scope: &mut Scope,
        head: String,
    ) -> Result<Rc<Formula>, ParseError> {
        match head.as_str() {
            "and" => {
                let mut result = Formula::truth();
                while !self.at_rparen() {
                    result = Formula::and(result, self.goal_formula(domain, problem, scope)?);
                }
                self.expect_rparen()?;
                Ok(result)
            }
            "or" => {
                let mut result = Formula::falsity();
                while !self.at_rparen() {
                    result = Formula::or(result, self.goal_formula(domain, problem, scope)?);
                }
                self.expect_rparen()?;
                Ok(result)
            }
            "not" => {
                let inner = self.goal_formula(domain, problem, scope)?;
                self.expect_rparen()?;
                Ok(Formula::negation(&inner))
            }
            "imply" => {
                let antecedent = self.goal_formula(domain, problem, scope)?;
                let consequent = self.goal_formula(domain, problem, scope)?;
                self.expect_rparen()?;
                Ok(Formula::or(Formula::negation(&antecedent), consequent))
            }
            "exists" | "forall" => {
                self.expect_lparen()?;
                let depth = scope.len();
                let typed = self.goal_variables(domain, problem)?;
                let mut parameters = Vec::with_capacity(typed.len());
                for (name, t) in typed {
                    let v = problem.terms().add_variable(t);
                    scope.push((name, v));
                    parameters.push(v);
                }
                self.expect_rparen()?;
                let body = self.goal_formula(domain, problem, scope)?;
                self.expect_rparen()?;
                scope.truncate(depth);
                let quantified = crate::data::formulas::Quantified { parameters, body };
                let formula = if head == "exists" {
                    Formula::Exists(quantified)
                } else {
                    Formula::Forall(quantified, std::cell::RefCell::new(None))
                };
                Ok(Rc::new(formula))
            }
            "=" => {
                let t1 = self.goal_term(domain, problem, scope)?;
                let t2 = self.goal_term(domain, problem, scope)?;
                self.expect_rparen()?;
                let env = problem.env();
                Ok(Formula::equality(t1, 0, t2, 0, &env))
            }
            name => {
                let predicate = domain
                    .predicates()
                    .find_predicate(name)
                    .ok_or_else(|| self.error(format!("unknown predicate `{}`", name)))?;
                let mut terms = Vec::new();
                while !self.at_rparen() {
                    terms.push(self.goal_term(domain, problem, scope)?);
                }
                self.expect_rparen()?;
                if terms.len() != domain.predicates().parameters(predicate).len() {
                    return Err(self.error(format!("wrong number of arguments for `{}`", name)));
                }
                Ok(Formula::atom(Atom::new(predicate, terms)))
            }
        }
    }

    fn goal_variables(
        &mut self,
        domain: &Domain,
        _problem: &Problem,
    ) -> Result<Vec<(String, Type)>, ParseError> {
        let mut result = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        while !self.at_rparen() {
            let name = self.symbol()?;
            if name == "-" {
                let t = self.problem_type(domain)?;
                result.extend(pending.drain(..).map(|n| (n, t)));
            } else if name.starts_with('?') {
                pending.push(name);
            } else {
                return Err(self.error(format!("expected variable, found `{}`", name)));
            }
        }
        result.extend(pending.into_iter().map(|n| (n, Type::OBJECT)));
        Ok(result)
    }

    fn goal_term(
        &mut self,
        domain: &Domain,
        problem: &Problem,
        scope: &Scope,
    ) -> Result<Term, ParseError> {
        let name = self.symbol()?;
        if name.starts_with('?') {
            scope
                .iter()
                .rev()
                .find(|(n, _)| *n == name)
                .map(|&(_, v)| v.into())
                .ok_or_else(|| self.error(format!("unbound variable `{}`", name)))
        } else {
            problem
                .terms()
                .find_object(&name)
                .or_else(|| domain.terms().find_object(&name))
                .map(Term::from)
                .ok_or_else(|| self.error(format!("unknown object `{}`", name)))
        }
    }

    fn problem_expression(
        &mut self,
        domain: &Rc<Domain>,
        problem: &Problem,
    ) -> Result<Rc<Expression>, ParseError> {
        match self.next()? {
            Token::Number(n) => Ok(Expression::value(n)),
            Token::LParen => {
                let head = self.symbol()?;
                match head.as_str() {
                    "+" | "-" | "*" | "/" => {
                        let a = self.problem_expression(domain, problem)?;
                        let b = self.problem_expression(domain, problem)?;
                        self.expect_rparen()?;
                        match head.as_str() {
                            "+" => Ok(Expression::addition(a, b)),
                            "-" => Ok(Expression::subtraction(a, b)),
                            "*" => Ok(Expression::multiplication(a, b)),
                            _ => Expression::division(a, b).map_err(|e| self.domain_error(e)),
                        }
                    }
                    name => {
                        let function = domain
                            .functions()
                            .find_function(name)
                            .ok_or_else(|| self.error(format!("unknown function `{}`", name)))?;
                        let mut terms = Vec::new();
                        while !self.at_rparen() {
                            terms.push(self.problem_term(domain, problem)?);
                        }
                        self.expect_rparen()?;
                        Ok(Rc::new(Expression::Fluent(Fluent::new(function, terms))))
                    }
                }
            }
            other => Err(self.error(format!("expected expression, found `{}`", other))),
        }
    }
}

/// Stamp every literal of a goal description with a condition time.
fn stamp_formula(formula: &Rc<Formula>, when: FormulaTime) -> Rc<Formula> {
    match formula.as_ref() {
        Formula::Atom(_) | Formula::Negation(_) => {
            let literal = formula.literal().expect("literal formula");
            Formula::timed(literal, when)
        }
        Formula::Conjunction(fs) => fs.iter().fold(Formula::truth(), |acc, f| {
            Formula::and(acc, stamp_formula(f, when))
        }),
        Formula::Disjunction(fs) => fs.iter().fold(Formula::falsity(), |acc, f| {
            Formula::or(acc, stamp_formula(f, when))
        }),
        Formula::Exists(q) => Rc::new(Formula::Exists(crate::data::formulas::Quantified {
            parameters: q.parameters.clone(),
            body: stamp_formula(&q.body, when),
        })),
        Formula::Forall(q, _) => Rc::new(Formula::Forall(
            crate::data::formulas::Quantified {
                parameters: q.parameters.clone(),
                body: stamp_formula(&q.body, when),
            },
            std::cell::RefCell::new(None),
        )),
        _ => Rc::clone(formula),
    }
}
