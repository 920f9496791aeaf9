//! Onboarding system — walks a new member through the step catalog in a
//! private channel, then grants full access.
//!
//! The sequencer answers platform events, the watchdog nudges stalled
//! members, and recovery picks up channels left over from a restart.

pub mod catalog;
pub mod completion;
pub mod history;
pub mod recovery;
pub mod registry;
pub mod routes;
pub mod sequencer;
pub mod session;
pub mod step;
pub mod watchdog;

pub use catalog::StepCatalog;
pub use completion::{CompletionHandler, CompletionReport};
pub use recovery::{RecoveryReport, recover};
pub use registry::SessionRegistry;
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use sequencer::{CurrentStep, IncomingReaction, IncomingText, OnboardingDeps, StepSequencer};
pub use session::{OnboardingSession, SessionStatus};
pub use step::{AnswerAction, AnswerValidator, OnboardingStep, PollCondition, SkipRule, StepKind};
pub use watchdog::{Escalation, SweepReport, Watchdog, spawn_watchdog};
