mod orchestrator;

pub use orchestrator::CheckInOrchestrator;
