//! Query handler for `?` questions.
//!
//! Two stages: a classifier picks the table and search strategy from closed
//! sets, the server assembles the SELECT with bound parameters, and the
//! query agent phrases an answer over the rows. The model never emits SQL.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use cortex_agents::{QueryAgent, QueryClassifier};
use cortex_store::{EntityTable, Row, Store};

use crate::error::Result;

const ROW_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    Name,
    DateRange,
    Fulltext,
    All,
}

impl std::str::FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "name" => Ok(SearchType::Name),
            "date_range" => Ok(SearchType::DateRange),
            "fulltext" => Ok(SearchType::Fulltext),
            "all" => Ok(SearchType::All),
            other => Err(format!("unknown search type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct QueryHandler {
    store: Store,
    classifier: QueryClassifier,
    agent: QueryAgent,
}

impl QueryHandler {
    pub fn new(store: Store) -> Result<Self> {
        Ok(Self {
            classifier: QueryClassifier::new(store.clone())?,
            agent: QueryAgent::new(store.clone())?,
            store,
        })
    }

    pub async fn handle(&self, question: &str, today: &str) -> Result<QueryOutcome> {
        if question.trim().is_empty() {
            return Ok(QueryOutcome {
                success: false,
                answer: "Bitte stelle eine Frage.".to_string(),
                data: None,
                error: Some("empty_question".to_string()),
            });
        }

        let classification = match self.classifier.classify(question, today).await {
            Ok(c) => c,
            Err(e) => {
                return Ok(QueryOutcome {
                    success: false,
                    answer: "Konnte die Frage nicht verstehen.".to_string(),
                    data: None,
                    error: Some(e.to_json().to_string()),
                })
            }
        };

        let Some(table) = classification
            .get("table")
            .and_then(Value::as_str)
            .and_then(|t| t.parse::<EntityTable>().ok())
        else {
            return Ok(QueryOutcome {
                success: false,
                answer: "Zugriff auf diese Daten ist nicht erlaubt.".to_string(),
                data: None,
                error: Some("forbidden_table".to_string()),
            });
        };

        let search_type = classification
            .get("search_type")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<SearchType>().ok())
            .unwrap_or(SearchType::All);
        let search_value = classification
            .get("search_value")
            .and_then(Value::as_str)
            .unwrap_or("");

        debug!(table = %table, ?search_type, search_value, "query classified");

        let rows = run_search(&self.store, table, search_type, search_value, today)?;
        let rows_value = Value::Array(rows.into_iter().map(Value::Object).collect());

        let answered = match self.agent.answer(question, &rows_value).await {
            Ok(result) => result,
            Err(e) => {
                return Ok(QueryOutcome {
                    success: false,
                    answer: "Fehler bei der Abfrage.".to_string(),
                    data: Some(rows_value),
                    error: Some(e.to_json().to_string()),
                })
            }
        };

        let answer = answered
            .get("answer")
            .and_then(Value::as_str)
            .unwrap_or("Keine Daten gefunden.")
            .to_string();

        Ok(QueryOutcome {
            success: true,
            answer,
            data: Some(rows_value),
            error: None,
        })
    }

}

/// Assemble and run the whitelisted SELECT for one classification.
pub fn run_search(
    store: &Store,
    table: EntityTable,
    search_type: SearchType,
    search_value: &str,
    today: &str,
) -> Result<Vec<Row>> {
    let name_col = table.name_column();
    let notes_col = table.notes_column();
    let guard = if table == EntityTable::CalendarEvents {
        "1 = 1"
    } else {
        "deleted_at IS NULL"
    };

    let rows = match search_type {
        SearchType::Name => {
            let pattern = format!("%{}%", search_value.to_lowercase());
            let sql = format!(
                "SELECT * FROM {table} WHERE {guard} AND LOWER({name_col}) LIKE ?1
                 ORDER BY id LIMIT {ROW_LIMIT}"
            );
            store.query(&sql, &[&pattern])?
        }
        SearchType::Fulltext => {
            let pattern = format!("%{}%", search_value.to_lowercase());
            let sql = format!(
                "SELECT * FROM {table} WHERE {guard}
                   AND (LOWER({name_col}) LIKE ?1
                     OR LOWER(COALESCE({notes_col}, '')) LIKE ?1)
                 ORDER BY id LIMIT {ROW_LIMIT}"
            );
            store.query(&sql, &[&pattern])?
        }
        SearchType::DateRange => {
            let date_col = match table {
                EntityTable::Tasks => "due_date",
                EntityTable::CalendarEvents => "start_time",
                _ => "created_at",
            };
            // "start..end" bounds the range; a single date means "from
            // today until that date".
            let (start, end) = match search_value.split_once("..") {
                Some((s, e)) => (s.trim().to_string(), e.trim().to_string()),
                None if !search_value.is_empty() => {
                    (today.to_string(), search_value.trim().to_string())
                }
                None => (today.to_string(), today.to_string()),
            };
            let sql = format!(
                "SELECT * FROM {table} WHERE {guard}
                   AND date({date_col}) >= date(?1) AND date({date_col}) <= date(?2)
                 ORDER BY {date_col} LIMIT {ROW_LIMIT}"
            );
            store.query(&sql, &[&start, &end])?
        }
        SearchType::All => {
            let sql = format!(
                "SELECT * FROM {table} WHERE {guard} ORDER BY id LIMIT {ROW_LIMIT}"
            );
            store.query(&sql, &[])?
        }
    };
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_type_parses_the_closed_set() {
        assert_eq!("name".parse::<SearchType>().unwrap(), SearchType::Name);
        assert_eq!("date_range".parse::<SearchType>().unwrap(), SearchType::DateRange);
        assert_eq!("fulltext".parse::<SearchType>().unwrap(), SearchType::Fulltext);
        assert_eq!("all".parse::<SearchType>().unwrap(), SearchType::All);
        assert!("sql".parse::<SearchType>().is_err());
    }

    #[test]
    fn name_search_matches_substrings() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_entity(
                EntityTable::People,
                &serde_json::json!({"name": "Tim Tester", "email": "tim@example.org"})
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .unwrap();

        let rows = run_search(&store, EntityTable::People, SearchType::Name, "tim", "2026-01-12")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("email").unwrap(), "tim@example.org");
    }

    #[test]
    fn date_range_search_uses_due_date_for_tasks() {
        let store = Store::open_in_memory().unwrap();
        for (title, due) in [("fällig", "2026-01-14"), ("später", "2026-02-01")] {
            store
                .insert_entity(
                    EntityTable::Tasks,
                    &serde_json::json!({"title": title, "due_date": due})
                        .as_object()
                        .unwrap()
                        .clone(),
                )
                .unwrap();
        }

        let rows = run_search(
            &store,
            EntityTable::Tasks,
            SearchType::DateRange,
            "2026-01-16",
            "2026-01-12",
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("title").unwrap(), "fällig");
    }
}
