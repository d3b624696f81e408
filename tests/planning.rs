//! End-to-end planning scenarios.
//!
//! Each test reads a small domain and problem, runs the planner with
//! default settings, and checks the shape of the returned plan.

use std::collections::BTreeMap;
use std::rc::Rc;

use poplar::data::chain::Chain;
use poplar::planner::{PlanResult, Planner, THRESHOLD};
use poplar::{parse_domain, parse_problem, Parameters, Plan, Problem};

fn solve(domain_text: &str, problem_text: &str) -> (Rc<Plan>, Problem) {
    let domain = Rc::new(parse_domain(domain_text).expect("domain parses"));
    let problem = parse_problem(problem_text, domain).expect("problem parses");
    let planner = Planner::new(&problem, Parameters::default()).expect("planner builds");
    let result = planner.search().expect("search runs");
    match result {
        PlanResult::Solved { plan } => (plan, problem),
        other => panic!("expected a plan, got {:?}", other),
    }
}

/// Named steps of a plan with their scheduled start times, in order.
fn schedule(plan: &Plan) -> Vec<(String, f32)> {
    let mut starts = BTreeMap::new();
    let mut ends = BTreeMap::new();
    plan.orderings.schedule(&mut starts, &mut ends);
    let mut steps: Vec<(String, f32)> = Chain::iter(&plan.steps)
        .filter(|s| !s.action.is_synthetic())
        .map(|s| (s.action.name.clone(), starts.get(&s.id).copied().unwrap_or(0.0)))
        .collect();
    steps.sort_by(|a, b| a.1.total_cmp(&b.1));
    steps
}

fn makespan(plan: &Plan) -> f32 {
    let mut starts = BTreeMap::new();
    let mut ends = BTreeMap::new();
    plan.orderings.schedule(&mut starts, &mut ends)
}

#[test]
fn empty_problem_is_trivially_complete() {
    let (plan, _) = solve(
        "(define (domain empty))",
        "(define (problem nothing) (:domain empty) (:goal (and)))",
    );
    assert!(plan.is_complete());
    assert_eq!(plan.num_steps, 0);
    assert_eq!(plan.num_links, 0);
}

#[test]
fn single_step_plan() {
    let (plan, _) = solve(
        r#"
(define (domain unary)
  (:predicates (p ?x))
  (:action op
    :parameters (?x)
    :effect (p ?x)))
"#,
        r#"
(define (problem one)
  (:domain unary)
  (:objects a)
  (:goal (p a)))
"#,
    );
    assert_eq!(plan.num_steps, 1);
    let steps = schedule(&plan);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].0, "op");
}

#[test]
fn unachievable_precondition_prunes_the_achiever() {
    // `p` never appears in an effect, so only set-b is applicable.
    let (plan, _) = solve(
        r#"
(define (domain pick)
  (:requirements :negative-preconditions)
  (:predicates (p) (q))
  (:action set-a
    :parameters ()
    :precondition (p)
    :effect (q))
  (:action set-b
    :parameters ()
    :precondition (not (p))
    :effect (q)))
"#,
        r#"
(define (problem choose)
  (:domain pick)
  (:goal (q)))
"#,
    );
    let steps = schedule(&plan);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].0, "set-b");
}

#[test]
fn chained_moves_are_ordered() {
    let (plan, _) = solve(
        r#"
(define (domain travel)
  (:predicates (at ?l) (adj ?a ?b))
  (:action move
    :parameters (?from ?to)
    :precondition (and (at ?from) (adj ?from ?to))
    :effect (and (at ?to) (not (at ?from)))))
"#,
        r#"
(define (problem go)
  (:domain travel)
  (:objects l1 l2 l3)
  (:init (at l1) (adj l1 l2) (adj l2 l3))
  (:goal (at l3)))
"#,
    );
    let steps = schedule(&plan);
    assert_eq!(steps.len(), 2, "both moves are needed");
    assert!(steps.iter().all(|(name, _)| name == "move"));
    assert!(steps[0].1 < steps[1].1, "the two moves must be strictly ordered");
}

#[test]
fn threat_resolved_by_ordering() {
    // make-q deletes p, so it must be demoted before make-p.
    let (plan, _) = solve(
        r#"
(define (domain interfere)
  (:predicates (p) (q))
  (:action make-p
    :parameters ()
    :effect (p))
  (:action make-q
    :parameters ()
    :effect (and (q) (not (p)))))
"#,
        r#"
(define (problem both)
  (:domain interfere)
  (:goal (and (p) (q))))
"#,
    );
    let steps = schedule(&plan);
    assert_eq!(steps.len(), 2);
    let q_start = steps.iter().find(|(n, _)| n == "make-q").map(|s| s.1);
    let p_start = steps.iter().find(|(n, _)| n == "make-p").map(|s| s.1);
    assert!(
        q_start < p_start,
        "make-q must come before make-p to protect the p link"
    );
}

#[test]
fn durative_chain_makespan() {
    let (plan, _) = solve(
        r#"
(define (domain delivery)
  (:requirements :durative-actions)
  (:predicates (loaded) (flown) (delivered))
  (:durative-action load
    :parameters ()
    :duration (= ?duration 2)
    :effect (at end (loaded)))
  (:durative-action fly
    :parameters ()
    :duration (= ?duration 5)
    :condition (at start (loaded))
    :effect (at end (flown)))
  (:durative-action unload
    :parameters ()
    :duration (= ?duration 2)
    :condition (at start (flown))
    :effect (at end (delivered))))
"#,
        r#"
(define (problem deliver)
  (:domain delivery)
  (:goal (delivered)))
"#,
    );
    let steps = schedule(&plan);
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0].0, "load");
    assert_eq!(steps[1].0, "fly");
    assert_eq!(steps[2].0, "unload");
    let total = makespan(&plan);
    assert!(
        (total - 9.0).abs() < 10.0 * THRESHOLD,
        "makespan {} should be 9.0 within a few separation steps",
        total
    );
}

#[test]
fn timed_initial_literal_delays_the_start() {
    let (plan, _) = solve(
        r#"
(define (domain door)
  (:requirements :durative-actions :timed-initial-literals)
  (:predicates (open) (inside))
  (:durative-action enter
    :parameters ()
    :duration (= ?duration 1)
    :condition (at start (open))
    :effect (at end (inside))))
"#,
        r#"
(define (problem wait)
  (:domain door)
  (:init (at 3.0 (open)))
  (:goal (inside)))
"#,
    );
    let mut starts = BTreeMap::new();
    let mut ends = BTreeMap::new();
    plan.orderings.schedule(&mut starts, &mut ends);
    let enter = Chain::iter(&plan.steps)
        .find(|s| s.action.name == "enter")
        .expect("enter step in plan");
    let start = starts.get(&enter.id).copied().unwrap_or(0.0);
    assert!(
        start >= 3.0,
        "enter starts at {} but the door opens at 3.0",
        start
    );
}

#[test]
fn impossible_goal_reports_no_plan() {
    let domain = Rc::new(
        parse_domain(
            r#"
(define (domain stuck)
  (:predicates (p) (q))
  (:action noop
    :parameters ()
    :precondition (p)
    :effect (q)))
"#,
        )
        .expect("domain parses"),
    );
    let problem = parse_problem(
        "(define (problem hopeless) (:domain stuck) (:goal (q)))",
        domain,
    )
    .expect("problem parses");
    let planner = Planner::new(&problem, Parameters::default()).expect("planner builds");
    let result = planner.search().expect("search runs");
    assert!(matches!(result, PlanResult::NoPlan));
}

#[test]
fn refinements_preserve_plan_invariants() {
    // Every child of the initial plan keeps consistent counts and never
    // loses steps.
    let domain = Rc::new(
        parse_domain(
            r#"
(define (domain unary)
  (:predicates (p ?x))
  (:action op
    :parameters (?x)
    :effect (p ?x)))
"#,
        )
        .expect("domain parses"),
    );
    let problem = parse_problem(
        r#"
(define (problem one)
  (:domain unary)
  (:objects a b)
  (:goal (p a)))
"#,
        domain,
    )
    .expect("problem parses");
    let planner = Planner::new(&problem, Parameters::default()).expect("planner builds");
    let result = planner.search().expect("search runs");
    let PlanResult::Solved { plan } = result else {
        panic!("expected a plan");
    };
    assert!(plan.is_complete());
    assert_eq!(plan.num_open_conds, 0);
    assert_eq!(plan.num_unsafes, 0);
    assert_eq!(Chain::len(&plan.links), plan.num_links);
    assert!(plan.num_steps >= 1);
}
