use crisp::reader::LogicalLine;
use crisp::{Interpreter, InterpreterConfig, Value};
use env_logger::Env;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::process;

fn main() {
    let filter = if std::env::args().skip(1).any(|arg| arg == "debug") {
        "trace"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    if let Err(e) = run_repl() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_repl() -> Result<(), Box<dyn std::error::Error>> {
    println!("crisp, a minimal Lisp");
    println!("Each line is one expression: `sum 1 2`, `def sq (lambda (x) product x x)`");
    println!("Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let mut interp = Interpreter::with_config(InterpreterConfig::from_env())?;
    let mut line = LogicalLine::new();

    loop {
        let prompt = if line.is_balanced() { "crisp> " } else { "  ...> " };
        let input = match rl.readline(prompt) {
            Ok(input) => input,
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let _ = rl.add_history_entry(input.as_str());

        for c in input.chars().chain(std::iter::once('\n')) {
            if !line.ingest(c) {
                continue;
            }
            if line.is_blank() {
                line.reset();
                continue;
            }
            let text = line.take();
            let result = interp.eval_line(&text)?;
            if result != Value::Nil {
                println!("{}", interp.print(result));
            }
        }
    }
}
