use std::collections::HashMap;
use std::env;
use std::process;

use unitscript_runtime::{NoHost, Value, VM};
use unitscript_sema::TypeTag;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "run" => {
            if args.len() < 3 {
                eprintln!("Usage: unitscript run <file.us>");
                process::exit(1);
            }
            cmd_run(&args[2]);
        }
        "check" => {
            if args.len() < 3 {
                eprintln!("Usage: unitscript check <file.us>");
                process::exit(1);
            }
            cmd_check(&args[2]);
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        "version" | "--version" | "-V" => {
            println!("unitscript {}", env!("CARGO_PKG_VERSION"));
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("unitscript - embeddable unit-program scripting language");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  unitscript run <file.us>     Compile and run a source file to completion");
    eprintln!("  unitscript check <file.us>   Compile a source file and report diagnostics");
    eprintln!("  unitscript version           Show version");
    eprintln!("  unitscript help              Show this help");
}

/// Compile and run a source file with no host bound (any `HostObject`
/// access will fail). Intended for exercising the language in isolation,
/// not as a stand-in for a real embedding.
fn cmd_run(path: &str) {
    let source = read_source(path);
    let program = unitscript_codegen::compile_default(&source);
    if !program.is_ok() {
        report_compile_errors(&program);
        process::exit(1);
    }

    let mut vm = VM::new().with_host(Box::new(NoHost));
    vm.load(program);
    vm.run(100_000);

    let state = vm.get_state();
    if let Some(err) = &state.error {
        eprintln!("Runtime error (line {}): {}", err.line, err);
        process::exit(1);
    }
    if !state.halted {
        eprintln!("Program did not halt within the instruction budget");
        process::exit(1);
    }

    let mut names: Vec<&String> = state.vars.keys().collect();
    names.sort();
    for name in names {
        print_binding(name, state.vars.get(name).unwrap());
    }
}

fn print_binding(name: &str, value: &Value) {
    println!("{} = {}", name, value);
}

/// Compile a source file and report any diagnostics without running it.
fn cmd_check(path: &str) {
    let source = read_source(path);
    let program = unitscript_codegen::compile(&source, TypeTag::Any, HashMap::new());
    if program.is_ok() {
        println!("OK: {}", path);
    } else {
        report_compile_errors(&program);
        process::exit(1);
    }
}

fn read_source(path: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading '{}': {}", path, e);
            process::exit(1);
        }
    }
}

fn report_compile_errors(program: &unitscript_ir::Program) {
    for diag in &program.diagnostics {
        eprintln!("error (line {}): {}", diag.line, diag);
    }
}
