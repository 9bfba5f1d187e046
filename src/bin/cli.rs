use datatree::config::EngineConfig;
use datatree::engine::{DataTreeEvaluator, PassReport};
use datatree::loader::{from_json_file_with, from_json_file_with_overrides};
use datatree::value::Value;
use std::env;
use std::io::{self, Write};
use std::time::Instant;

fn print_report(report: &PassReport) {
    for (path, error) in &report.errors {
        println!("  ! {}: {}", path, error.message);
    }
    for effect in &report.effects {
        match serde_json::to_string(effect) {
            Ok(json) => println!("  > {}", json),
            Err(e) => println!("  > unprintable effect: {}", e),
        }
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: {}", e),
    }
}

/// Raw values are taken as JSON when they parse, as text otherwise.
fn parse_raw(text: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(text)
        .map(Value::from)
        .unwrap_or_else(|_| Value::str(text))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <tree.json> [config.json]", args[0]);
        return Ok(());
    }

    let mut evaluator: DataTreeEvaluator = if args.len() == 3 {
        let config = EngineConfig::from_file(&args[2])?.with_env_overrides()?;
        from_json_file_with(&args[1], config)?
    } else {
        from_json_file_with_overrides(&args[1], |var| env::var(var).ok())?
    };

    let mut start_time = Instant::now();
    let report = evaluator.process_pending()?;
    print_report(&report);
    print_json(&evaluator.snapshot().to_json());

    let mut elapsed_time;
    let mut status = String::from("ok");
    loop {
        elapsed_time = start_time.elapsed().as_secs_f64();
        print!("[{:.3}] ({}) > ", elapsed_time, status);
        io::stdout().flush()?;

        let mut command = String::new();
        if io::stdin().read_line(&mut command).map(|n| n == 0).unwrap_or(true) {
            break;
        }
        let command = command.trim();
        start_time = Instant::now();

        if command.is_empty() {
            status = String::from("invalid command");
            continue;
        }

        if command == "help" {
            println!("Commands:");
            println!("  q: Quit");
            println!("  show <Entity>: Print the evaluated entity");
            println!("  errors: Print every error marker");
            println!("  <Entity>.<path>=<value>: Set a raw value and re-evaluate");
            continue;
        }

        if command == "q" {
            break;
        } else if command == "errors" {
            let snapshot = evaluator.snapshot();
            for (path, error) in snapshot.errors() {
                println!("{} [{:?}] {}", path, error.kind, error.message);
            }
            status = String::from("ok");
        } else if let Some(name) = command.strip_prefix("show ") {
            match evaluator.snapshot().entity(name.trim()) {
                Some(value) => {
                    print_json(&value.to_json());
                    status = String::from("ok");
                }
                None => status = String::from("unknown entity"),
            }
        } else if let Some(equal_pos) = command.find('=') {
            let target = command[..equal_pos].trim();
            let raw = command[equal_pos + 1..].trim();
            match target.split_once('.') {
                Some((entity, path)) if !path.is_empty() => {
                    evaluator.apply_entity_edit(entity, path, parse_raw(raw));
                    match evaluator.process_pending() {
                        Ok(report) => {
                            print_report(&report);
                            status = if report.skipped.is_empty() {
                                format!("{} evaluated", report.evaluated.len())
                            } else {
                                String::from("unknown entity")
                            };
                        }
                        Err(e) => status = e.to_string(),
                    }
                }
                _ => status = String::from("invalid command"),
            }
        } else {
            status = String::from("invalid command");
        }
    }

    Ok(())
}
