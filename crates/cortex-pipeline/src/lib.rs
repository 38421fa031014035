//! The intent pipeline: prefix dispatch, fuzzy entity matching, intent
//! classification and execution, clarifications, and the human-in-the-loop
//! queue behind them.

pub mod edit;
pub mod error;
pub mod hitl;
pub mod matcher;
pub mod notify;
pub mod orchestrator;
pub mod prefix;
pub mod query;

pub use edit::{EditHandler, EditOutcome};
pub use error::{PipelineError, Result};
pub use hitl::{HumanInLoop, HumanRequest, RequestStatus, RequestType};
pub use matcher::{EntityMatch, EntityMatcher};
pub use notify::{Notifier, NullNotifier};
pub use orchestrator::IntentPipeline;
pub use prefix::{parse_prefix, ParsedInput, PrefixKind};
pub use query::{QueryHandler, QueryOutcome, SearchType};
