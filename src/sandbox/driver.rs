//! Capture-and-run driver
//!
//! A run builds a fresh [`Environment`] and a fresh pair of
//! [`OutputBuffers`], parses the source, executes it on a dedicated worker
//! thread and classifies how it ended. Program faults never escape as Rust
//! errors: they become report text in the captured stderr.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::engine::exceptions::{ExcKind, Exec, Flow, HaltReason, PROGRAM_FILENAME};
use crate::engine::interpreter::{Interpreter, Limits};
use crate::parser::parse_program;
use crate::sandbox::capture::{OutputBuffers, OutputLimitExceeded};
use crate::sandbox::environment::Environment;

/// Highest accepted recursion limit; deeper programs would outgrow the worker stack
pub const MAX_RECURSION_LIMIT: usize = 10_000;

/// Extra time granted to a worker past its deadline before it is abandoned
const GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Runtime configuration of a [`Sandbox`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock budget of a run; `None` disables the watchdog
    pub timeout: Option<Duration>,
    pub recursion_limit: usize,
    /// Bytes of program stdout kept before the run is halted
    pub max_output: usize,
    /// Stack size of the worker thread
    pub stack_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(10)),
            recursion_limit: 1000,
            max_output: 1 << 20,
            stack_size: 256 << 20,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    /// The program raised `SystemExit`
    Terminated,
    Faulted,
    TimedOut,
    Interrupted,
    OutputLimited,
}

impl Outcome {
    /// Process exit code the CLI reports for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Completed | Outcome::Terminated => 0,
            Outcome::Faulted | Outcome::OutputLimited => 1,
            Outcome::TimedOut => 124,
            Outcome::Interrupted => 130,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Outcome::Completed => "completed",
            Outcome::Terminated => "terminated",
            Outcome::Faulted => "faulted",
            Outcome::TimedOut => "timed out",
            Outcome::Interrupted => "interrupted",
            Outcome::OutputLimited => "output limited",
        };
        write!(f, "{}", name)
    }
}

/// The captured result pair together with run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub stdout: String,
    pub stderr: String,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn into_pair(self) -> (String, String) {
        (self.stdout, self.stderr)
    }
}

/// Stops the runs started through [`Sandbox::run_with`] with this handle
///
/// Every run owns its own flag. A handle only reaches the runs it was passed
/// to while they are in flight, so interrupting it never touches other runs
/// of the same sandbox, and an interrupt sent between runs is dropped.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    runs: Arc<Mutex<Vec<Weak<AtomicBool>>>>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        for flag in self.lock_runs().iter().filter_map(Weak::upgrade) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Number of runs this handle can currently reach
    pub fn active_runs(&self) -> usize {
        self.lock_runs().iter().filter(|f| f.strong_count() > 0).count()
    }

    fn attach(&self, flag: &Arc<AtomicBool>) {
        let mut runs = self.lock_runs();
        runs.retain(|f| f.strong_count() > 0);
        runs.push(Arc::downgrade(flag));
    }

    fn detach(&self, flag: &Arc<AtomicBool>) {
        let target = Arc::downgrade(flag);
        self.lock_runs()
            .retain(|f| f.strong_count() > 0 && !f.ptr_eq(&target));
    }

    fn lock_runs(&self) -> std::sync::MutexGuard<'_, Vec<Weak<AtomicBool>>> {
        match self.runs.lock() {
            Ok(runs) => runs,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Runs programs with a fixed configuration
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl Sandbox {
    pub fn new(mut config: SandboxConfig) -> Self {
        config.recursion_limit = config.recursion_limit.clamp(1, MAX_RECURSION_LIMIT);
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `source` with `stdin` as its line queue
    pub fn run(&self, source: &str, stdin: &str) -> RunReport {
        self.run_with(source, stdin, &InterruptHandle::new())
    }

    /// Like [`Sandbox::run`], reachable through `handle` while it executes
    pub fn run_with(&self, source: &str, stdin: &str, handle: &InterruptHandle) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let interrupt = Arc::new(AtomicBool::new(false));
        handle.attach(&interrupt);
        debug!(bytes = source.len(), "building environment");

        let (stdout, stderr, outcome) = self.supervise(source, stdin, &interrupt);
        handle.detach(&interrupt);

        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(%outcome, elapsed_ms, "run finished");
        RunReport {
            stdout,
            stderr,
            outcome,
            started_at,
            elapsed_ms,
        }
    }

    /// Spawn the worker and wait for it, abandoning it once the deadline
    /// and the grace period have both passed
    fn supervise(
        &self,
        source: &str,
        stdin: &str,
        interrupt: &Arc<AtomicBool>,
    ) -> (String, String, Outcome) {
        let config = self.config.clone();
        let limits = Limits {
            deadline: config
                .timeout
                .and_then(|timeout| Instant::now().checked_add(timeout)),
            interrupt: interrupt.clone(),
            recursion_limit: config.recursion_limit,
        };
        let source = source.to_string();
        let stdin = stdin.to_string();
        let (tx, rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name("pyground-run".to_string())
            .stack_size(config.stack_size)
            .spawn(move || {
                let result = execute(&source, &stdin, limits, &config);
                // the receiver is gone when the run was abandoned
                let _ = tx.send(result);
            });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                error!("failed to spawn worker thread: {}", e);
                return internal_error(format!("could not start the program: {}", e));
            }
        };

        let received = match self.config.timeout {
            Some(timeout) => rx.recv_timeout(timeout + GRACE_PERIOD),
            None => rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(result) => {
                if worker.join().is_err() {
                    warn!("worker panicked after reporting its result");
                }
                result
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let timeout = self.config.timeout.unwrap_or_default();
                warn!(?timeout, "worker missed its deadline, abandoning it");
                // only this run's worker sees the flag
                interrupt.store(true, Ordering::SeqCst);
                (String::new(), timeout_report(timeout), Outcome::TimedOut)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let reason = match worker.join() {
                    Err(payload) => panic_message(payload.as_ref()),
                    Ok(()) => "worker exited without a result".to_string(),
                };
                error!("worker failed: {}", reason);
                internal_error(reason)
            }
        }
    }
}

/// Parse and execute one program; runs on the worker thread
fn execute(
    source: &str,
    stdin: &str,
    limits: Limits,
    config: &SandboxConfig,
) -> (String, String, Outcome) {
    let mut output = OutputBuffers::new(config.max_output);
    let program = match parse_program(source) {
        Ok(program) => program,
        Err(e) => {
            debug!(line = e.lineno, "program failed to parse");
            output.write_stderr(&e.render(PROGRAM_FILENAME));
            let (stdout, stderr) = output.into_parts();
            return (stdout, stderr, Outcome::Faulted);
        }
    };
    trace!(statements = program.body.len(), "executing");

    let mut interpreter = Interpreter::new(Environment::new(stdin), output, limits);
    let result = interpreter.execute(&program);
    classify(result, interpreter.into_output(), config)
}

/// Turn the way a program ended into the captured pair and an [`Outcome`]
///
/// `SystemExit` cannot be named by programs; it only arrives here when the
/// engine raises it on a program's behalf.
fn classify(
    result: Exec<()>,
    mut output: OutputBuffers,
    config: &SandboxConfig,
) -> (String, String, Outcome) {
    let outcome = match result {
        Ok(()) => Outcome::Completed,
        Err(Flow::Raise(exc)) if exc.kind == ExcKind::SystemExit => {
            output.append_stdout(&format!("SystemExit: {}\n", exc.message()));
            Outcome::Terminated
        }
        Err(Flow::Raise(exc)) => {
            debug!(kind = exc.kind.name(), "program raised");
            output.write_stderr(&exc.render());
            Outcome::Faulted
        }
        Err(Flow::Halt(reason)) => {
            debug!(?reason, "program halted");
            halt(&mut output, reason, config)
        }
        // `execute` absorbs stray loop and return exits at module level
        Err(Flow::Return(_) | Flow::Break | Flow::Continue) => Outcome::Completed,
    };
    let (stdout, stderr) = output.into_parts();
    (stdout, stderr, outcome)
}

fn halt(output: &mut OutputBuffers, reason: HaltReason, config: &SandboxConfig) -> Outcome {
    match reason {
        HaltReason::Timeout => {
            output.write_stderr(&timeout_report(config.timeout.unwrap_or_default()));
            Outcome::TimedOut
        }
        HaltReason::Interrupted => {
            output.write_stderr("KeyboardInterrupt\n");
            Outcome::Interrupted
        }
        HaltReason::OutputLimit => {
            let limit = OutputLimitExceeded {
                limit: config.max_output,
            };
            output.write_stderr(&format!("{}\n", limit));
            Outcome::OutputLimited
        }
    }
}

fn timeout_report(timeout: Duration) -> String {
    format!(
        "TimeoutError: execution exceeded the time limit of {:?}\n",
        timeout
    )
}

fn internal_error(reason: String) -> (String, String, Outcome) {
    (
        String::new(),
        format!("internal error: {}\n", reason),
        Outcome::Faulted,
    )
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Run `source` with the default configuration, returning `(stdout, stderr)`
pub fn run(source: &str, stdin: &str) -> (String, String) {
    Sandbox::default().run(source, stdin).into_pair()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::engine::exceptions::ExceptionValue;
    use crate::engine::value::Value;

    #[test]
    fn test_completed_run() {
        let (out, err) = run("print('hi')\n", "");
        assert_eq!(out, "hi\n");
        assert_eq!(err, "");
    }

    #[test]
    fn test_system_exit_goes_to_stdout() {
        let (stdout, stderr, outcome) = classify(
            Err(Flow::Raise(Rc::new(ExceptionValue::new(
                ExcKind::SystemExit,
                vec![Value::from("bye")],
            )))),
            OutputBuffers::new(64),
            &SandboxConfig::default(),
        );
        assert_eq!(outcome, Outcome::Terminated);
        assert_eq!(stdout, "SystemExit: bye\n");
        assert_eq!(stderr, "");
        assert!(outcome.is_success());
    }

    #[test]
    fn test_system_exit_is_not_a_builtin() {
        let report = Sandbox::default().run("print('a')\nraise SystemExit(1)\n", "");
        assert_eq!(report.outcome, Outcome::Faulted);
        assert_eq!(report.stdout, "a\n");
        assert!(report
            .stderr
            .ends_with("NameError: name 'SystemExit' is not defined\n"));
    }

    #[test]
    fn test_syntax_error_report() {
        let report = Sandbox::default().run("x = (1,\n", "");
        assert_eq!(report.outcome, Outcome::Faulted);
        assert!(report.stderr.starts_with("  File \"<string>\", line 1"));
        assert!(report.stderr.contains("SyntaxError"));
    }

    #[test]
    fn test_timeout_halts_infinite_loop() {
        let sandbox = Sandbox::new(SandboxConfig {
            timeout: Some(Duration::from_millis(100)),
            ..SandboxConfig::default()
        });
        let report = sandbox.run("print('start')\nwhile True:\n    pass\n", "");
        assert_eq!(report.outcome, Outcome::TimedOut);
        assert_eq!(report.outcome.exit_code(), 124);
        assert_eq!(report.stdout, "start\n");
        assert_eq!(
            report.stderr,
            "TimeoutError: execution exceeded the time limit of 100ms\n"
        );
    }

    #[test]
    fn test_output_limit() {
        let sandbox = Sandbox::new(SandboxConfig {
            max_output: 12,
            ..SandboxConfig::default()
        });
        let report = sandbox.run("while True:\n    print('spam')\n", "");
        assert_eq!(report.outcome, Outcome::OutputLimited);
        assert_eq!(report.stdout, "spam\nspam\nsp");
        assert_eq!(report.stderr, "output limit of 12 bytes exceeded\n");
    }

    #[test]
    fn test_interrupt_before_run_is_dropped() {
        let sandbox = Sandbox::default();
        let handle = InterruptHandle::new();
        handle.interrupt();
        let report = sandbox.run_with("print(1)\n", "", &handle);
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(handle.active_runs(), 0);
    }

    #[test]
    fn test_interrupt_stops_running_program() {
        let sandbox = Sandbox::new(SandboxConfig {
            timeout: None,
            ..SandboxConfig::default()
        });
        let handle = InterruptHandle::new();
        let remote = handle.clone();
        let stopper = thread::spawn(move || {
            while remote.active_runs() == 0 {
                thread::sleep(Duration::from_millis(10));
            }
            thread::sleep(Duration::from_millis(50));
            remote.interrupt();
        });
        let report = sandbox.run_with("while True:\n    pass\n", "", &handle);
        stopper.join().unwrap();
        assert_eq!(report.outcome, Outcome::Interrupted);
        assert_eq!(report.stderr, "KeyboardInterrupt\n");
    }

    #[test]
    fn test_runs_sharing_a_sandbox_keep_their_own_flags() {
        let sandbox = Arc::new(Sandbox::new(SandboxConfig {
            timeout: None,
            ..SandboxConfig::default()
        }));
        let handle = InterruptHandle::new();

        let counting = {
            let sandbox = Arc::clone(&sandbox);
            thread::spawn(move || {
                sandbox.run("n = 0\nfor i in range(300000):\n    n += 1\nprint(n)\n", "")
            })
        };
        let spinning = {
            let sandbox = Arc::clone(&sandbox);
            let handle = handle.clone();
            thread::spawn(move || sandbox.run_with("while True:\n    pass\n", "", &handle))
        };
        while handle.active_runs() == 0 {
            thread::sleep(Duration::from_millis(10));
        }
        handle.interrupt();

        let spun = spinning.join().unwrap();
        let counted = counting.join().unwrap();
        assert_eq!(spun.outcome, Outcome::Interrupted);
        assert_eq!(counted.outcome, Outcome::Completed);
        assert_eq!(counted.stdout, "300000\n");
        assert_eq!(counted.stderr, "");
    }

    #[test]
    fn test_abandoned_worker_does_not_stop_siblings() {
        let impatient = Sandbox::new(SandboxConfig {
            timeout: Some(Duration::from_millis(50)),
            ..SandboxConfig::default()
        });
        let patient = Sandbox::new(SandboxConfig {
            timeout: None,
            ..SandboxConfig::default()
        });
        let sibling = thread::spawn(move || {
            patient.run("n = 0\nfor i in range(200000):\n    n += 1\nprint(n)\n", "")
        });
        let report = impatient.run("while True:\n    pass\n", "");
        assert_eq!(report.outcome, Outcome::TimedOut);
        let sibling = sibling.join().unwrap();
        assert_eq!(sibling.outcome, Outcome::Completed);
        assert_eq!(sibling.stdout, "200000\n");
    }

    #[test]
    fn test_recursion_limit_is_clamped() {
        let sandbox = Sandbox::new(SandboxConfig {
            recursion_limit: 1_000_000,
            ..SandboxConfig::default()
        });
        assert_eq!(sandbox.config().recursion_limit, MAX_RECURSION_LIMIT);
    }

    #[test]
    fn test_report_serializes() {
        let report = Sandbox::default().run("print(1)\n", "");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["stdout"], "1\n");
    }
}
