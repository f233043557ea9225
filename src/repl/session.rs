//! Line-by-line program editing state behind the interactive mode

use crate::sandbox::RunReport;
use crate::script::ProgramRunner;

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// A line of program text, kept verbatim
    Source(String),
    Run,
    /// `:stdin TEXT` queues an input line; `:stdin` alone clears the queue
    Stdin(Option<String>),
    Show,
    Clear,
    Help,
    Quit,
    Unknown(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> ReplCommand {
        let Some(command) = line.trim().strip_prefix(':') else {
            return ReplCommand::Source(line.trim_end().to_string());
        };
        let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
        match name {
            "run" | "r" => ReplCommand::Run,
            "stdin" | "in" => {
                ReplCommand::Stdin((!rest.is_empty()).then(|| rest.to_string()))
            }
            "show" | "list" => ReplCommand::Show,
            "clear" | "reset" => ReplCommand::Clear,
            "help" | "?" => ReplCommand::Help,
            "quit" | "exit" | "q" => ReplCommand::Quit,
            other => ReplCommand::Unknown(other.to_string()),
        }
    }
}

/// What the prompt loop should do after a command
#[derive(Debug)]
pub enum Reply {
    Nothing,
    Text(String),
    Ran(RunReport),
    Quit,
}

/// The program being edited and the input lines queued for it
#[derive(Debug, Default)]
pub struct ReplSession {
    runner: ProgramRunner,
    lines: Vec<String>,
    stdin: Vec<String>,
}

impl ReplSession {
    pub fn new(runner: ProgramRunner) -> Self {
        Self {
            runner,
            lines: Vec::new(),
            stdin: Vec::new(),
        }
    }

    pub fn source(&self) -> String {
        let mut source = self.lines.join("\n");
        source.push('\n');
        source
    }

    pub fn handle(&mut self, command: ReplCommand) -> Reply {
        match command {
            ReplCommand::Source(line) => {
                self.lines.push(line);
                Reply::Nothing
            }
            ReplCommand::Run => {
                if self.lines.is_empty() {
                    return Reply::Text("Nothing to run yet".to_string());
                }
                let stdin = self.stdin.join("\n");
                Reply::Ran(self.runner.run_source(&self.source(), &stdin))
            }
            ReplCommand::Stdin(Some(line)) => {
                self.stdin.push(line);
                Reply::Text(format!("{} input line(s) queued", self.stdin.len()))
            }
            ReplCommand::Stdin(None) => {
                self.stdin.clear();
                Reply::Text("Input queue cleared".to_string())
            }
            ReplCommand::Show => Reply::Text(self.listing()),
            ReplCommand::Clear => {
                self.lines.clear();
                self.stdin.clear();
                Reply::Text("Program cleared".to_string())
            }
            ReplCommand::Help => Reply::Text(HELP.trim().to_string()),
            ReplCommand::Quit => Reply::Quit,
            ReplCommand::Unknown(name) => {
                Reply::Text(format!("Unknown command ':{}', try :help", name))
            }
        }
    }

    /// Numbered program lines followed by the queued input
    fn listing(&self) -> String {
        let mut output = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            output.push_str(&format!("{:>4} | {}\n", i + 1, line));
        }
        if !self.stdin.is_empty() {
            output.push_str(&format!("stdin: {:?}\n", self.stdin));
        }
        if output.is_empty() {
            output.push_str("(empty program)\n");
        }
        output.trim_end().to_string()
    }
}

const HELP: &str = r#"
Type program lines as you would in a file; indentation is kept.

  :run              run the program typed so far
  :stdin TEXT       queue TEXT as the next line input() returns
  :stdin            clear the input queue
  :show             list the program and queued input
  :clear            start over
  :quit             leave
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ReplCommand::parse(":run"), ReplCommand::Run);
        assert_eq!(
            ReplCommand::parse(":stdin 86"),
            ReplCommand::Stdin(Some("86".to_string()))
        );
        assert_eq!(ReplCommand::parse(":stdin"), ReplCommand::Stdin(None));
        assert_eq!(
            ReplCommand::parse("    print(x)  "),
            ReplCommand::Source("    print(x)".to_string())
        );
        assert_eq!(
            ReplCommand::parse(":bogus"),
            ReplCommand::Unknown("bogus".to_string())
        );
    }

    #[test]
    fn test_session_runs_program_with_queued_input() {
        let mut session = ReplSession::default();
        for line in ["n = int(input())", "for i in range(n):", "    print(i)"] {
            session.handle(ReplCommand::parse(line));
        }
        session.handle(ReplCommand::parse(":stdin 3"));
        match session.handle(ReplCommand::Run) {
            Reply::Ran(report) => {
                assert_eq!(report.stdout, "0\n1\n2\n");
                assert_eq!(report.stderr, "");
            }
            other => panic!("expected a run, got {:?}", other),
        }
    }

    #[test]
    fn test_clear_and_show() {
        let mut session = ReplSession::default();
        session.handle(ReplCommand::parse("x = 1"));
        match session.handle(ReplCommand::Show) {
            Reply::Text(text) => assert_eq!(text, "   1 | x = 1"),
            other => panic!("unexpected {:?}", other),
        }
        session.handle(ReplCommand::Clear);
        assert!(matches!(
            session.handle(ReplCommand::Run),
            Reply::Text(text) if text == "Nothing to run yet"
        ));
    }
}
