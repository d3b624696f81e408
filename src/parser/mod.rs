//! Reader for the PDDL subset the planner consumes: typed predicates and
//! functions, action schemas, durative actions, timed initial literals,
//! fluents, and metrics. Produces the object model in [`crate::data`].

mod lexer;
mod pddl;

pub use lexer::{tokenize, LocatedToken, Token};
pub use pddl::{parse_domain, parse_problem, ParseError};

#[cfg(test)]
mod tests {
    use super::{parse_domain, parse_problem};
    use std::rc::Rc;

    const DOMAIN: &str = r#"
(define (domain logistics)
  (:requirements :typing :durative-actions)
  (:types truck package location - object)
  (:predicates (at ?t - truck ?l - location)
               (in ?p - package ?t - truck)
               (pat ?p - package ?l - location))
  (:durative-action drive
    :parameters (?t - truck ?from ?to - location)
    :duration (= ?duration 5)
    :condition (at start (at ?t ?from))
    :effect (and (at start (not (at ?t ?from)))
                 (at end (at ?t ?to)))))
"#;

    #[test]
    fn domain_round_trip() {
        let domain = parse_domain(DOMAIN).expect("domain parses");
        assert_eq!(domain.name(), "logistics");
        assert!(domain.requirements.durative_actions);
        let drive = domain.find_action("drive").expect("drive declared");
        assert!(drive.durative);
        assert_eq!(drive.parameters().len(), 3);
        assert_eq!(drive.effects.len(), 2);
        assert_eq!(drive.min_duration.as_value(), Some(5.0));
        assert_eq!(drive.max_duration.as_value(), Some(5.0));
        // `at` appears in effects, so it must be dynamic.
        let at = domain.predicates().find_predicate("at").unwrap();
        let pat = domain.predicates().find_predicate("pat").unwrap();
        assert!(!domain.predicates().is_static(at));
        assert!(domain.predicates().is_static(pat));
    }

    #[test]
    fn problem_round_trip() {
        let domain = Rc::new(parse_domain(DOMAIN).expect("domain parses"));
        let problem_text = r#"
(define (problem move-one)
  (:domain logistics)
  (:objects t1 - truck home away - location)
  (:init (at t1 home) (at 3.0 (at t1 away)))
  (:goal (at t1 away)))
"#;
        let problem = parse_problem(problem_text, domain).expect("problem parses");
        assert_eq!(problem.name(), "move-one");
        assert_eq!(problem.init_atoms().len(), 1);
        assert_eq!(problem.timed_actions().len(), 1);
        assert!(!problem.goal().is_tautology());
    }

    #[test]
    fn unknown_requirement_is_rejected() {
        let text = "(define (domain d) (:requirements :probabilistic-effects))";
        assert!(parse_domain(text).is_err());
    }

    #[test]
    fn unknown_predicate_is_rejected() {
        let text = "(define (domain d) (:action a :parameters () :precondition (p) :effect (q)))";
        assert!(parse_domain(text).is_err());
    }
}
