//! Interactive prompt loop

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::error::{PygroundError, Result};
use crate::repl::session::{ReplCommand, ReplSession, Reply};
use crate::script::ProgramRunner;

pub fn run_repl(runner: ProgramRunner) -> Result<()> {
    let mut rl = DefaultEditor::new().map_err(|e| PygroundError::Sandbox(e.to_string()))?;

    println!("pyground v{} - Interactive Mode", env!("CARGO_PKG_VERSION"));
    println!("Type program lines, ':run' to execute, ':help' for commands\n");

    let mut session = ReplSession::new(runner);
    loop {
        match rl.readline(">>> ") {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = rl.add_history_entry(line.as_str());
                }
                match session.handle(ReplCommand::parse(&line)) {
                    Reply::Nothing => {}
                    Reply::Text(text) => println!("{}\n", text),
                    Reply::Ran(report) => {
                        print!("{}", report.stdout);
                        eprint!("{}", report.stderr);
                        println!("--- {} ---\n", report.outcome);
                    }
                    Reply::Quit => break,
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }
    println!("Goodbye!");
    Ok(())
}
