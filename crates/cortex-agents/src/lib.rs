//! DB-configured agents: output parsing, deterministic preprocessing, the
//! configurable agent core, and the specialised agents built on it.

pub mod agent;
pub mod error;
pub mod parser;
pub mod preprocess;
pub mod reports;
pub mod schema;
pub mod specialised;

pub use agent::{render_template, AgentSettings, ConfigurableAgent};
pub use error::{AgentError, Result};
pub use parser::{parse_json, parse_key_value, parse_list, ParseOutcome};
pub use preprocess::{default_status, PreprocessResult, Preprocessor};
pub use reports::{DailyReportAgent, WeeklyReportAgent};
pub use schema::{FieldSpec, FieldType, OutputSchema};
pub use specialised::{EditAgent, Intent, IntentAgent, QueryAgent, QueryClassifier, StructureAgent};
