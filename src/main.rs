use std::io::{self, BufRead, Write};

use cheese_pipeline::error::InputError;
use cheese_pipeline::{logging, sim};

fn parse_usize_list(arg: &str) -> Option<Vec<usize>> {
    if arg == "-" {
        return None;
    }
    let mut values = Vec::new();
    for part in arg.split(',') {
        if part.trim().is_empty() {
            return None;
        }
        let value = part.trim().parse::<usize>().ok()?;
        values.push(value);
    }
    Some(values)
}

/// Parse one answer to the burger-count prompt.
fn parse_burger_count(line: &str) -> Result<usize, InputError> {
    let value = line
        .trim()
        .parse::<i64>()
        .map_err(|_| InputError::NotAnInteger)?;
    if value <= 0 {
        return Err(InputError::NotPositive);
    }
    usize::try_from(value).map_err(|_| InputError::NotAnInteger)
}

/// Ask until a positive integer arrives; `None` on end of input.
fn prompt_burger_count(input: &mut impl BufRead) -> Option<usize> {
    let mut line = String::new();
    loop {
        print!("How many burgers do you want? ");
        let _ = io::stdout().flush();
        line.clear();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
        match parse_burger_count(&line) {
            Ok(count) => return Some(count),
            Err(err) => println!("{err}"),
        }
    }
}

fn print_usage(program: &str) {
    println!("Cheeseburger pipeline");
    println!("Usage:");
    println!("  {program} (prompt for a burger count and run)");
    println!("  {program} run <burgers> [delay_ms] [timeout_ms]");
    println!("  {program} stress [target_sets] [runs] [jitter_us] [timeout_ms]");
    println!("  {program} --help");
    println!();
    println!("Target sets are comma-separated lists (e.g., 1,2,50).");
    println!("Use \"-\" to keep the default set.");
    println!("Defaults:");
    println!("  run    delay_ms=100 timeout_ms=none (block indefinitely)");
    println!("  stress targets=1,2,10,50 runs=3 jitter_us=500 timeout_ms=none");
    println!("Set RUST_LOG=debug for lifecycle logs, RUST_LOG=warn to hide per-unit lines.");
}

fn exit_with_usage(program: &str, message: &str) -> ! {
    eprintln!("{message}");
    print_usage(program);
    std::process::exit(2);
}

fn parse_optional_u64(program: &str, name: &str, arg: Option<String>) -> Option<u64> {
    let arg = arg?;
    match arg.parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => exit_with_usage(program, &format!("invalid {name} value: {arg}")),
    }
}

fn main() {
    logging::init();
    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "cheese_pipeline".to_string());
    let mut args = std::env::args().skip(1);
    let ok = match args.next().as_deref() {
        Some("run") => {
            let target = match args.next().map(|v| parse_burger_count(&v)) {
                Some(Ok(target)) => target,
                Some(Err(err)) => exit_with_usage(&program, &format!("run: {err}")),
                None => exit_with_usage(&program, "run: missing burger count"),
            };
            let delay_ms = parse_optional_u64(&program, "delay_ms", args.next());
            let timeout_ms = parse_optional_u64(&program, "timeout_ms", args.next());
            if let Some(extra) = args.next() {
                exit_with_usage(&program, &format!("run: unexpected argument: {extra}"));
            }
            sim::run_once(target, delay_ms, timeout_ms)
        }
        Some("stress") => {
            let target_sets = match args.next() {
                Some(arg) if arg == "-" => None,
                Some(arg) => match parse_usize_list(&arg) {
                    Some(values) => Some(values),
                    None => exit_with_usage(
                        &program,
                        &format!("stress: invalid target_sets value: {arg}"),
                    ),
                },
                None => None,
            };
            let runs = parse_optional_u64(&program, "runs", args.next()).map(|v| v as usize);
            let jitter_us = parse_optional_u64(&program, "jitter_us", args.next());
            let timeout_ms = parse_optional_u64(&program, "timeout_ms", args.next());
            if let Some(extra) = args.next() {
                exit_with_usage(&program, &format!("stress: unexpected argument: {extra}"));
            }
            sim::run_stress(target_sets, runs, jitter_us, timeout_ms)
        }
        Some("--help") | Some("-h") | Some("help") => {
            print_usage(&program);
            true
        }
        Some(other) => exit_with_usage(&program, &format!("unknown command: {other}")),
        None => {
            let stdin = io::stdin();
            let Some(target) = prompt_burger_count(&mut stdin.lock()) else {
                eprintln!("no burger count given");
                std::process::exit(2);
            };
            sim::run_once(target, None, None)
        }
    };
    if !ok {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn burger_count_must_be_a_positive_integer() {
        assert_eq!(parse_burger_count("3\n"), Ok(3));
        assert_eq!(parse_burger_count("  12 "), Ok(12));
        assert_eq!(parse_burger_count("0"), Err(InputError::NotPositive));
        assert_eq!(parse_burger_count("-4"), Err(InputError::NotPositive));
        assert_eq!(parse_burger_count("two"), Err(InputError::NotAnInteger));
        assert_eq!(parse_burger_count("1.5"), Err(InputError::NotAnInteger));
    }

    #[test]
    fn prompt_repeats_until_valid() {
        let mut input = Cursor::new("abc\n-1\n0\n4\n");
        assert_eq!(prompt_burger_count(&mut input), Some(4));
    }

    #[test]
    fn prompt_gives_up_on_end_of_input() {
        let mut input = Cursor::new("nope\n");
        assert_eq!(prompt_burger_count(&mut input), None);
    }

    #[test]
    fn usize_lists_parse_or_reject() {
        assert_eq!(parse_usize_list("1,2, 50"), Some(vec![1, 2, 50]));
        assert_eq!(parse_usize_list("-"), None);
        assert_eq!(parse_usize_list("1,,2"), None);
        assert_eq!(parse_usize_list("x"), None);
    }
}
