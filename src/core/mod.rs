pub mod agents;
pub mod config;
pub mod error;
pub mod fetch;
pub mod job;
pub mod llm;
pub mod notifier;
pub mod orchestrator;
pub mod stages;
pub mod terminal;
pub mod warehouse;

#[cfg(test)]
pub(crate) mod testing;
