use std::{env, fs, process::ExitCode, time::Instant};

use stepwise::{
    Code, Interpreter, InterpreterConfig, LimitedTracker, NoopTracer, ResourceLimits, RunOutcome, StderrTracer,
    StdPrint, ThreadOutcome, VmTracer,
};

const USAGE: &str = "usage: stepwise [--seed N] [--max-steps N] [--trace] CODE.json...";

#[derive(Debug, Default)]
struct Options {
    seed: Option<u64>,
    max_steps: Option<usize>,
    trace: bool,
    files: Vec<String>,
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let mut codes = Vec::with_capacity(options.files.len());
    for file_path in &options.files {
        match read_code(file_path) {
            Ok(code) => codes.push(code),
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    let config = InterpreterConfig { seed: options.seed };
    let mut limits = ResourceLimits::new();
    if let Some(max_steps) = options.max_steps {
        limits = limits.max_instructions(max_steps);
    }
    let tracker = LimitedTracker::new(limits);
    if options.trace {
        run_all(codes, config, tracker, StderrTracer::new())
    } else {
        run_all(codes, config, tracker, NoopTracer)
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--seed" => options.seed = Some(parse_number(&arg, args.next())?),
            "--max-steps" => options.max_steps = Some(parse_number(&arg, args.next())?),
            "--trace" => options.trace = true,
            flag if flag.starts_with("--") => return Err(format!("unknown option {flag}")),
            _ => options.files.push(arg),
        }
    }
    if options.files.is_empty() {
        return Err("no code files given".to_owned());
    }
    Ok(options)
}

fn parse_number<N: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<N, String> {
    let value = value.ok_or_else(|| format!("{flag} expects a value"))?;
    value
        .parse()
        .map_err(|_| format!("{flag} expects a non-negative integer, got {value:?}"))
}

fn read_code(file_path: &str) -> Result<Code, String> {
    let json = fs::read_to_string(file_path).map_err(|err| format!("reading {file_path}: {err}"))?;
    Code::from_json(&json).map_err(|err| format!("{file_path}: {err}"))
}

/// Spawns one thread per code object, runs them all to completion and reports each outcome.
fn run_all<Tr: VmTracer>(
    codes: Vec<Code>,
    config: InterpreterConfig,
    tracker: LimitedTracker,
    tracer: Tr,
) -> ExitCode {
    let mut interp = match Interpreter::with_tracer(config, tracker, tracer) {
        Ok(interp) => interp,
        Err(err) => {
            eprintln!("error starting interpreter: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut threads = Vec::with_capacity(codes.len());
    for code in codes {
        let name = code.name.clone();
        let spawned = interp
            .load(code)
            .map_err(|err| err.to_string())
            .and_then(|module| interp.spawn(module).map_err(|err| err.to_string()));
        match spawned {
            Ok(thread) => threads.push((thread, name)),
            Err(err) => {
                eprintln!("error loading {name}: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    let start = Instant::now();
    let run = interp.run(&mut StdPrint);
    let elapsed = start.elapsed();
    eprintln!(
        "finished after {elapsed:?}, {} instructions",
        interp.tracker().instruction_count()
    );
    if let RunOutcome::Deadlocked { parked } = run {
        eprintln!("deadlocked with {} parked threads", parked.len());
        return ExitCode::FAILURE;
    }

    let mut success = true;
    for (thread, name) in threads {
        match interp.outcome(thread) {
            Some(outcome) => {
                println!("{thread} {name}: {outcome}");
                success &= matches!(outcome, ThreadOutcome::Returned(_));
            }
            None => success = false,
        }
    }
    if success { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
