mod store;
pub mod types;
pub mod views;

pub use store::{JobFilter, JobStore, JobSubscription};
pub use types::{
    AgentIdentity, BusinessAnalysis, ColumnSchema, ColumnType, DataManifest, DemoContent,
    GeneratedTable, GoldenQuery, JobRecord, LogEntry, LogLevel, NarrativeScript, ORCHESTRATOR_TAG,
    Phase, ProvisionedResources, SchemaDefinition, StageKind, TableSchema,
};
pub use views::{JobSummary, ResultView, StatusView, SubmitResponse};
