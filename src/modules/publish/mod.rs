pub mod client;
pub mod detector;
pub mod orchestrator;
pub mod safety;
