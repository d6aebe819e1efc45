//! Gateway diagnostic run.
//!
//! - `state`: check ids, per-check results, events and effects
//! - `machine`: the pure transition function and the machine wrapper
//! - `aggregate`: overall verdict and ordered findings
//! - `wired`: ethernet flip-flop detection
//! - `run`: async driver, cancellation and presentation hooks

pub mod aggregate;
pub mod machine;
pub mod run;
pub mod state;
pub mod wired;

pub use aggregate::{aggregate, Finding, Message, Report, RunMode};
pub use machine::{transition, DiagnosticMachine, MachineEnv, Transition};
pub use run::{CancelToken, DiagnosticObserver, DiagnosticRun, NullObserver, RunOutcome};
pub use state::{
    Badge, CheckGroup, Effect, Event, RunContext, StateId, StepData, TelephonyStatus, WifiHost,
    WiredObservation,
};
pub use wired::{FlipFlopDetector, WiredMonitor};
