use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Position of a job in the pipeline, including the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Research,
    DataModeling,
    Infrastructure,
    AgentCreation,
    DemoContent,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Research => "research",
            Phase::DataModeling => "data_modeling",
            Phase::Infrastructure => "infrastructure",
            Phase::AgentCreation => "agent_creation",
            Phase::DemoContent => "demo_content",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            Phase::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "research" => Some(Phase::Research),
            "data_modeling" => Some(Phase::DataModeling),
            "infrastructure" => Some(Phase::Infrastructure),
            "agent_creation" => Some(Phase::AgentCreation),
            "demo_content" => Some(Phase::DemoContent),
            "completed" => Some(Phase::Completed),
            "failed" => Some(Phase::Failed),
            "cancelled" | "canceled" => Some(Phase::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }

    /// The phase that follows this one on the success path.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Research => Some(Phase::DataModeling),
            Phase::DataModeling => Some(Phase::Infrastructure),
            Phase::Infrastructure => Some(Phase::AgentCreation),
            Phase::AgentCreation => Some(Phase::DemoContent),
            Phase::DemoContent => Some(Phase::Completed),
            Phase::Completed | Phase::Failed | Phase::Cancelled => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the six ordered units of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Research,
    DataModeling,
    SyntheticData,
    Infrastructure,
    AgentCreation,
    DemoContent,
}

impl StageKind {
    pub const ORDER: [StageKind; 6] = [
        StageKind::Research,
        StageKind::DataModeling,
        StageKind::SyntheticData,
        StageKind::Infrastructure,
        StageKind::AgentCreation,
        StageKind::DemoContent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Research => "research",
            StageKind::DataModeling => "data_modeling",
            StageKind::SyntheticData => "synthetic_data",
            StageKind::Infrastructure => "infrastructure",
            StageKind::AgentCreation => "agent_creation",
            StageKind::DemoContent => "demo_content",
        }
    }

    /// Phase the record reports while this stage runs. Synthetic data is part
    /// of the data modeling phase.
    pub fn phase(self) -> Phase {
        match self {
            StageKind::Research => Phase::Research,
            StageKind::DataModeling | StageKind::SyntheticData => Phase::DataModeling,
            StageKind::Infrastructure => Phase::Infrastructure,
            StageKind::AgentCreation => Phase::AgentCreation,
            StageKind::DemoContent => Phase::DemoContent,
        }
    }

    /// Progress percentage reached once this stage has committed its output.
    pub fn checkpoint(self) -> u8 {
        match self {
            StageKind::Research => 20,
            StageKind::DataModeling => 35,
            StageKind::SyntheticData => 45,
            StageKind::Infrastructure => 70,
            StageKind::AgentCreation => 85,
            StageKind::DemoContent => 95,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    /// Stage tag, or "orchestrator" for entries outside any stage.
    pub stage: String,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorRecord {
    pub stage: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub const ORCHESTRATOR_TAG: &str = "orchestrator";

// --- Stage payloads ---

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BusinessAnalysis {
    pub company_name: String,
    pub industry: String,
    pub summary: String,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub key_entities: Vec<String>,
    /// Pages that contributed to the analysis.
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    String,
    Int64,
    Float64,
    Numeric,
    Bool,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Int64 => "INT64",
            ColumnType::Float64 => "FLOAT64",
            ColumnType::Numeric => "NUMERIC",
            ColumnType::Bool => "BOOL",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    /// Accepts the canonical names plus the common SQL aliases LLMs emit.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STRING" | "TEXT" | "VARCHAR" => Some(ColumnType::String),
            "INT64" | "INTEGER" | "INT" | "BIGINT" => Some(ColumnType::Int64),
            "FLOAT64" | "FLOAT" | "DOUBLE" => Some(ColumnType::Float64),
            "NUMERIC" | "DECIMAL" => Some(ColumnType::Numeric),
            "BOOL" | "BOOLEAN" => Some(ColumnType::Bool),
            "DATE" => Some(ColumnType::Date),
            "TIMESTAMP" | "DATETIME" => Some(ColumnType::Timestamp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: ColumnType,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SchemaDefinition {
    pub dataset_name: String,
    pub tables: Vec<TableSchema>,
}

impl SchemaDefinition {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeneratedTable {
    pub table: String,
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DataManifest {
    pub tables: Vec<GeneratedTable>,
}

impl DataManifest {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProvisionedResources {
    pub project_id: String,
    pub dataset_id: String,
    pub tables: Vec<String>,
    pub rows_loaded: usize,
}

impl ProvisionedResources {
    pub fn resource_id(&self) -> String {
        format!("{}.{}", self.project_id, self.dataset_id)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub display_name: String,
    /// Whether the post-creation smoke question got an answer.
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GoldenQuery {
    pub question: String,
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub insight: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NarrativeScript {
    pub title: String,
    pub script: String,
    #[serde(default)]
    pub talking_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DemoContent {
    pub golden_queries: Vec<GoldenQuery>,
    pub narrative: NarrativeScript,
}

/// One optional slot per stage. Each slot is written by its owning stage only.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JobOutputs {
    pub business_analysis: Option<BusinessAnalysis>,
    pub schema: Option<SchemaDefinition>,
    pub data_manifest: Option<DataManifest>,
    pub resources: Option<ProvisionedResources>,
    pub agent: Option<AgentIdentity>,
    pub demo: Option<DemoContent>,
}

impl JobOutputs {
    /// Stages whose slot is populated, in pipeline order.
    pub fn populated(&self) -> Vec<StageKind> {
        StageKind::ORDER
            .into_iter()
            .filter(|kind| self.is_set(*kind))
            .collect()
    }

    pub fn is_set(&self, kind: StageKind) -> bool {
        match kind {
            StageKind::Research => self.business_analysis.is_some(),
            StageKind::DataModeling => self.schema.is_some(),
            StageKind::SyntheticData => self.data_manifest.is_some(),
            StageKind::Infrastructure => self.resources.is_some(),
            StageKind::AgentCreation => self.agent.is_some(),
            StageKind::DemoContent => self.demo.is_some(),
        }
    }

    /// True when the slot owned by `kind` holds the same value in both.
    pub(crate) fn slot_eq(&self, other: &JobOutputs, kind: StageKind) -> bool {
        match kind {
            StageKind::Research => self.business_analysis == other.business_analysis,
            StageKind::DataModeling => self.schema == other.schema,
            StageKind::SyntheticData => self.data_manifest == other.data_manifest,
            StageKind::Infrastructure => self.resources == other.resources,
            StageKind::AgentCreation => self.agent == other.agent,
            StageKind::DemoContent => self.demo == other.demo,
        }
    }
}

/// Lifecycle, identity and accumulated outputs of one provisioning request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub source_url: String,
    pub requester: Option<String>,
    pub target_project: Option<String>,
    pub phase: Phase,
    pub current_stage: Option<StageKind>,
    pub progress: u8,
    pub outputs: JobOutputs,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<ErrorRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        job_id: impl Into<String>,
        source_url: impl Into<String>,
        requester: Option<String>,
        target_project: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            source_url: source_url.into(),
            requester,
            target_project,
            phase: Phase::Research,
            current_stage: None,
            progress: 0,
            outputs: JobOutputs::default(),
            logs: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_log(&mut self, stage: &str, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            stage: stage.to_string(),
            level,
            message: message.into(),
        });
    }

    pub fn push_error(&mut self, stage: &str, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            stage: stage.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn recent_logs(&self, limit: usize) -> &[LogEntry] {
        let start = self.logs.len().saturating_sub(limit);
        &self.logs[start..]
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
