//! pyground CLI - run practice Python programs in a captured sandbox

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use pyground::cli::{Args, SubCommand};
use pyground::output::{format_builtins, format_issues, format_program, format_report, OutputFormat};
use pyground::script::{has_errors, load_source, stdin_payload, ProgramRunner};
use pyground::security::allowlist;
use pyground::{parse_program, validate_program, Sandbox};

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let format = OutputFormat::from_flag(args.json);
    let sandbox = Sandbox::new(args.sandbox_config());
    debug!(config = ?sandbox.config(), "sandbox configured");
    let runner = ProgramRunner::new(sandbox);

    match &args.command {
        SubCommand::Run {
            file,
            stdin,
            stdin_file,
        } => {
            let stdin = stdin_payload(stdin.as_deref(), stdin_file.as_deref())
                .context("failed to read the stdin payload")?;
            let source = read_program(file)?;
            forward_interrupts(&runner);
            let report = runner.run_source(&source, &stdin);

            match format {
                OutputFormat::Json => println!("{}", format_report(&report, &format)),
                OutputFormat::Human => {
                    print!("{}", report.stdout);
                    eprint!("{}", report.stderr);
                    if args.verbose {
                        eprintln!("{}", format_report(&report, &format));
                    }
                }
            }
            Ok(exit_code(report.outcome.exit_code()))
        }

        SubCommand::Check { file } => {
            let source = read_program(file)?;
            let program = match parse_program(&source) {
                Ok(program) => program,
                Err(e) => {
                    eprint!("{}", e.render(&file.display().to_string()));
                    return Ok(ExitCode::FAILURE);
                }
            };
            if args.json {
                println!("{}", format_program(&program));
            }
            let issues = validate_program(&program);
            let report = format_issues(&issues, &format);
            if args.json {
                eprintln!("{}", report);
            } else {
                println!("{}", report);
            }
            Ok(if has_errors(&issues) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        SubCommand::Builtins => {
            println!("{}", format_builtins(&allowlist::reachable_names(), &format));
            Ok(ExitCode::SUCCESS)
        }

        SubCommand::Repl => {
            forward_interrupts(&runner);
            pyground::repl::run_repl(runner)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Make Ctrl-C stop the running program instead of the whole process
fn forward_interrupts(runner: &ProgramRunner) {
    let handle = runner.interrupt_handle();
    if let Err(e) = ctrlc::set_handler(move || handle.interrupt()) {
        debug!("could not install the Ctrl-C handler: {}", e);
    }
}

fn read_program(path: &Path) -> anyhow::Result<String> {
    load_source(path).with_context(|| format!("failed to read program {}", path.display()))
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
