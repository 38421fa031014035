//! Thin typed wrappers around [`ConfigurableAgent`] that fix the agent name
//! and the context keys its prompt template expects.

use serde_json::{json, Value};

use cortex_store::Store;

use crate::agent::ConfigurableAgent;
use crate::error::Result;

/// The classified action for a piece of captured text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Create,
    Update,
    Complete,
    Delete,
    Unclear,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Create => "create",
            Intent::Update => "update",
            Intent::Complete => "complete",
            Intent::Delete => "delete",
            Intent::Unclear => "unclear",
        }
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "create" => Ok(Intent::Create),
            "update" => Ok(Intent::Update),
            "complete" => Ok(Intent::Complete),
            "delete" => Ok(Intent::Delete),
            "unclear" => Ok(Intent::Unclear),
            other => Err(format!("unknown intent: {other}")),
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classifies text plus fuzzy DB matches into an intent.
pub struct IntentAgent {
    agent: ConfigurableAgent,
}

impl IntentAgent {
    pub fn new(store: Store) -> Result<Self> {
        Ok(Self {
            agent: ConfigurableAgent::new(store, "intent_agent")?,
        })
    }

    /// Returns `{intent, category?, target?, options?, question?, confidence,
    /// reasoning}` per the agent's output schema.
    pub async fn analyze(
        &self,
        text: &str,
        matches: &[Value],
    ) -> Result<serde_json::Map<String, Value>> {
        let mut ctx = serde_json::Map::new();
        ctx.insert("text".into(), json!(text));
        ctx.insert("matches".into(), json!(matches));
        self.agent.execute(&ctx).await
    }

    pub fn reload(&self) -> Result<()> {
        self.agent.reload()
    }
}

/// Turns text into category-shaped fields (create) or a change map (update).
pub struct StructureAgent {
    agent: ConfigurableAgent,
}

impl StructureAgent {
    pub fn new(store: Store) -> Result<Self> {
        Ok(Self {
            agent: ConfigurableAgent::new(store, "structure_agent")?,
        })
    }

    /// `preprocessed` is the deterministic context from the preprocessor
    /// (resolved dates, priority, status, hints); it is merged into the
    /// template context alongside intent/category/target.
    pub async fn structure(
        &self,
        intent: Intent,
        category: Option<&str>,
        target: Option<&Value>,
        preprocessed: serde_json::Map<String, Value>,
    ) -> Result<serde_json::Map<String, Value>> {
        let mut ctx = preprocessed;
        ctx.insert("intent".into(), json!(intent.as_str()));
        ctx.insert(
            "category".into(),
            category.map(Value::from).unwrap_or(Value::Null),
        );
        ctx.insert(
            "target".into(),
            target.cloned().unwrap_or(Value::Null),
        );
        self.agent.execute(&ctx).await
    }

    pub fn reload(&self) -> Result<()> {
        self.agent.reload()
    }
}

/// Stage one of the query path: picks a table and search strategy from
/// closed sets. Never produces SQL.
pub struct QueryClassifier {
    agent: ConfigurableAgent,
}

impl QueryClassifier {
    pub fn new(store: Store) -> Result<Self> {
        Ok(Self {
            agent: ConfigurableAgent::new(store, "query_classifier")?,
        })
    }

    /// Returns `{table, search_type ∈ {name, date_range, fulltext, all},
    /// search_value?}`.
    pub async fn classify(
        &self,
        question: &str,
        today: &str,
    ) -> Result<serde_json::Map<String, Value>> {
        let mut ctx = serde_json::Map::new();
        ctx.insert("question".into(), json!(question));
        ctx.insert("today".into(), json!(today));
        self.agent.execute(&ctx).await
    }
}

/// Stage two of the query path: phrases an answer over the fetched rows.
pub struct QueryAgent {
    agent: ConfigurableAgent,
}

impl QueryAgent {
    pub fn new(store: Store) -> Result<Self> {
        Ok(Self {
            agent: ConfigurableAgent::new(store, "query_agent")?,
        })
    }

    pub async fn answer(
        &self,
        question: &str,
        rows: &Value,
    ) -> Result<serde_json::Map<String, Value>> {
        let mut ctx = serde_json::Map::new();
        ctx.insert("question".into(), json!(question));
        ctx.insert("rows".into(), rows.clone());
        self.agent.execute(&ctx).await
    }
}

/// Interprets `!` edit instructions into a single whitelisted action.
pub struct EditAgent {
    agent: ConfigurableAgent,
}

impl EditAgent {
    pub fn new(store: Store) -> Result<Self> {
        Ok(Self {
            agent: ConfigurableAgent::new(store, "edit_agent")?,
        })
    }

    /// Returns `{action: {operation, table, id, field?, new_value?,
    /// target_name?}, confirmation_question?}`.
    pub async fn interpret(
        &self,
        instruction: &str,
        tables: &[&str],
        today: &str,
    ) -> Result<serde_json::Map<String, Value>> {
        let mut ctx = serde_json::Map::new();
        ctx.insert("instruction".into(), json!(instruction));
        ctx.insert("tables".into(), json!(tables));
        ctx.insert("today".into(), json!(today));
        self.agent.execute(&ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_round_trips() {
        for intent in [
            Intent::Create,
            Intent::Update,
            Intent::Complete,
            Intent::Delete,
            Intent::Unclear,
        ] {
            let parsed: Intent = intent.as_str().parse().unwrap();
            assert_eq!(parsed, intent);
        }
        assert!("query".parse::<Intent>().is_err());
    }
}
