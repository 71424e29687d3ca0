pub mod orchestrator;

pub use orchestrator::{RegisterOutcome, RegistrationOrchestrator, RegistrationSettings, VerifyOutcome};
