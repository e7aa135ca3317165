use std::io::{self, BufRead, Write};
use std::{env, fs, process};

use lox::{Error, VM};

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("Usage: lox [path]");
            process::exit(64);
        }
    }
}

fn repl() {
    let mut vm = VM::default();
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().expect("Failed to flush stdout.");
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                // Errors keep the session alive.
                let _ = vm.interpret(&line);
            }
        }
    }
}

fn run_file(path: &str) {
    let src = match fs::read_to_string(path) {
        Ok(src) => src,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {}", path, err);
            process::exit(74);
        }
    };
    let mut vm = VM::default();
    match vm.interpret(&src) {
        Ok(()) => {}
        Err(Error::Compile) => process::exit(65),
        Err(Error::Runtime) => process::exit(70),
    }
}
