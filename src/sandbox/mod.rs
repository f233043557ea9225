//! Sandboxed execution of learner programs

pub mod capture;
pub mod driver;
pub mod environment;

pub use capture::{OutputBuffers, OutputLimitExceeded};
pub use driver::{
    run, InterruptHandle, Outcome, RunReport, Sandbox, SandboxConfig, MAX_RECURSION_LIMIT,
};
pub use environment::Environment;
