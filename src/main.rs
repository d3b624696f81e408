//! Command-line front end for the planner.
#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::process;
use std::rc::Rc;

use itertools::Itertools;

use poplar::data::chain::Chain;
use poplar::planner::{PlanResult, Planner};
use poplar::{parse_domain, parse_problem, Parameters, Plan, Problem};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage(program: &str) {
    eprintln!("Usage: {} [options] domain-file problem-file", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -S, --search ALG        A-STAR | IDA-STAR | HILL-CLIMBING");
    eprintln!("  -H, --heuristic H       slash-separated rank list, e.g. ADD/MAKESPAN");
    eprintln!("  -F, --flaw-order F      flaw selection order; repeat for round robin");
    eprintln!("  -L, --limit N           generated-plan limit for the matching order");
    eprintln!("  -C, --action-cost C     UNIT | DURATION | RELATIVE");
    eprintln!("  -W, --weight W          multiplier on heuristic terms");
    eprintln!("  -T, --time-limit M      wall clock limit in minutes");
    eprintln!("  -G, --ground-actions    plan with fully ground actions");
    eprintln!("  -D, --domain-constraints  attach parameter-domain constraints");
    eprintln!("  -K, --keep-static       keep static preconditions (default)");
    eprintln!("      --strip-static      drop static preconditions");
    eprintln!("  -R, --random-open-conditions  shuffle open-condition insertion");
    eprintln!("      --seed N            seed for random choices");
    eprintln!("  -v, --verbose N         verbosity 0-4");
    eprintln!("  -h, --help              show this message");
    eprintln!("  -V, --version           show version");
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Render a completed plan as a totally ordered schedule.
fn print_plan(plan: &Plan, problem: &Problem) {
    let mut start_times = BTreeMap::new();
    let mut end_times = BTreeMap::new();
    let makespan = plan.orderings.schedule(&mut start_times, &mut end_times);
    println!("; makespan {:.2}", makespan);
    let mut steps: Vec<_> = Chain::iter(&plan.steps)
        .filter(|s| !s.action.is_synthetic())
        .collect();
    steps.sort_by(|a, b| {
        start_times
            .get(&a.id)
            .unwrap_or(&0.0)
            .total_cmp(start_times.get(&b.id).unwrap_or(&0.0))
    });
    for step in steps {
        let start = start_times.get(&step.id).copied().unwrap_or(0.0);
        let args = if step.action.arguments().is_empty() {
            step.action
                .parameters()
                .iter()
                .map(|&p| {
                    let term = plan.bindings.get_binding(p.into(), step.id);
                    match term.as_object() {
                        Some(obj) => problem.terms().object_name(obj),
                        None => "?".to_string(),
                    }
                })
                .join(" ")
        } else {
            step.action
                .arguments()
                .iter()
                .map(|&o| problem.terms().object_name(o))
                .join(" ")
        };
        let mut line = if args.is_empty() {
            format!("{:.2}: ({})", start, step.action.name)
        } else {
            format!("{:.2}: ({} {})", start, step.action.name, args)
        };
        if step.action.durative {
            let end = end_times.get(&step.id).copied().unwrap_or(start);
            line.push_str(&format!(" [{:.2}]", end - start));
        }
        println!("{}", line);
    }
}

struct CliArgs {
    params: Parameters,
    domain_file: Option<String>,
    problem_file: Option<String>,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut params = Parameters::default();
    let mut flaw_orders = Vec::new();
    let mut search_limits = Vec::new();
    let mut files = Vec::new();
    let mut verbosity = 0u8;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("option {} expects a value", name))
        };
        match arg.as_str() {
            "-S" | "--search" => params.search_algorithm = value(arg)?.parse().map_err(|e| format!("{}", e))?,
            "-H" | "--heuristic" => params.heuristic = value(arg)?.parse().map_err(|e| format!("{}", e))?,
            "-F" | "--flaw-order" => flaw_orders.push(value(arg)?.parse().map_err(|e| format!("{}", e))?),
            "-L" | "--limit" => search_limits.push(
                value(arg)?.parse::<usize>().map_err(|e| format!("invalid limit: {}", e))?,
            ),
            "-C" | "--action-cost" => params.action_cost = value(arg)?.parse().map_err(|e| format!("{}", e))?,
            "-W" | "--weight" => params.weight = value(arg)?.parse::<f32>().map_err(|e| format!("invalid weight: {}", e))?,
            "-T" | "--time-limit" => params.time_limit = Some(
                value(arg)?.parse::<u64>().map_err(|e| format!("invalid time limit: {}", e))?,
            ),
            "-G" | "--ground-actions" => params.ground_actions = true,
            "-D" | "--domain-constraints" => params.domain_constraints = true,
            "-K" | "--keep-static" => params.keep_static_preconditions = true,
            "--strip-static" => params.keep_static_preconditions = false,
            "-R" | "--random-open-conditions" => params.random_open_conditions = true,
            "--seed" => params.seed = value(arg)?.parse::<u64>().map_err(|e| format!("invalid seed: {}", e))?,
            "-v" | "--verbose" => verbosity = value(arg)?.parse::<u8>().map_err(|e| format!("invalid verbosity: {}", e))?,
            other if other.starts_with('-') => return Err(format!("unknown option `{}`", other)),
            _ => files.push(arg.clone()),
        }
    }
    if !flaw_orders.is_empty() {
        params.flaw_orders = flaw_orders;
        params.search_limits = search_limits;
    }
    init_tracing(verbosity);
    let mut files = files.into_iter();
    Ok(CliArgs {
        params,
        domain_file: files.next(),
        problem_file: files.next(),
    })
}

fn run(cli: CliArgs) -> i32 {
    let (Some(domain_file), Some(problem_file)) = (cli.domain_file, cli.problem_file) else {
        eprintln!("error: domain and problem files are required");
        return 2;
    };
    let domain_text = match fs::read_to_string(&domain_file) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("error: {}: {}", domain_file, err);
            return 1;
        }
    };
    let problem_text = match fs::read_to_string(&problem_file) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("error: {}: {}", problem_file, err);
            return 1;
        }
    };
    let domain = match parse_domain(&domain_text) {
        Ok(domain) => Rc::new(domain),
        Err(err) => {
            eprintln!("{}: {}", domain_file, err);
            return 2;
        }
    };
    let problem = match parse_problem(&problem_text, Rc::clone(&domain)) {
        Ok(problem) => problem,
        Err(err) => {
            eprintln!("{}: {}", problem_file, err);
            return 2;
        }
    };
    let planner = match Planner::new(&problem, cli.params) {
        Ok(planner) => planner,
        Err(err) => {
            eprintln!("error: {}", err);
            return 2;
        }
    };
    match planner.search() {
        Ok(PlanResult::Solved { plan }) => {
            print_plan(&plan, &problem);
            let (generated, visited, dead_ends) = planner.stats();
            eprintln!(
                "; generated {} visited {} dead ends {}",
                generated, visited, dead_ends
            );
            0
        }
        Ok(PlanResult::Limit { .. }) => {
            println!("; no plan (limit reached)");
            3
        }
        Ok(PlanResult::NoPlan) => {
            println!("; no plan");
            4
        }
        Err(err) => {
            eprintln!("error: {}", err);
            2
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage(&program);
        return;
    }
    if args.iter().any(|a| a == "-V" || a == "--version") {
        println!("poplar {}", VERSION);
        return;
    }
    match parse_args(&args[1..]) {
        Ok(cli) => process::exit(run(cli)),
        Err(message) => {
            eprintln!("error: {}", message);
            print_usage(&program);
            process::exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_is_valid() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn unknown_options_are_rejected() {
        let args = vec!["--frobnicate".to_string()];
        assert!(parse_args(&args).is_err());
    }
}
