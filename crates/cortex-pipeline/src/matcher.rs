//! Keyword extraction and weighted fuzzy search across the entity tables.

use serde_json::{json, Value};
use tracing::warn;

use cortex_store::{RowExt, Store};
use cortex_store::EntityTable;

use crate::error::Result;

/// One fuzzy hit. Scores: exact name 1.0, name substring 0.8, notes
/// substring 0.5.
#[derive(Debug, Clone)]
pub struct EntityMatch {
    pub table: EntityTable,
    pub id: i64,
    pub name: String,
    pub notes: String,
    pub score: f64,
}

impl EntityMatch {
    /// Shape handed to the intent agent's prompt.
    pub fn to_value(&self) -> Value {
        json!({
            "table": self.table.as_str(),
            "id": self.id,
            "data": {"name": self.name, "notes": self.notes},
            "match_score": self.score,
        })
    }
}

pub struct EntityMatcher {
    store: Store,
    stopwords: Vec<String>,
    keyword_min_length: usize,
    max_matches: usize,
}

impl EntityMatcher {
    pub fn new(
        store: Store,
        stopwords: Vec<String>,
        keyword_min_length: usize,
        max_matches: usize,
    ) -> Self {
        Self {
            store,
            stopwords,
            keyword_min_length,
            max_matches,
        }
    }

    /// Lowercase, split on non-alphanumeric runs (umlauts and ß survive),
    /// drop stopwords and short tokens, dedupe preserving order.
    pub fn extract_keywords(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut keywords = Vec::new();
        for token in lower.split(|c: char| !c.is_alphanumeric()) {
            if token.chars().count() < self.keyword_min_length {
                continue;
            }
            if self.stopwords.iter().any(|s| s == token) {
                continue;
            }
            if !keywords.iter().any(|k| k == token) {
                keywords.push(token.to_string());
            }
        }
        keywords
    }

    /// Weighted LIKE search over every entity table for each keyword.
    /// Deduplicated by (table, id) keeping the best score, capped at
    /// `max_matches`.
    pub fn search(&self, keywords: &[String]) -> Result<Vec<EntityMatch>> {
        let mut matches: Vec<EntityMatch> = Vec::new();

        for table in EntityTable::ALL {
            let name_col = table.name_column();
            let notes_col = table.notes_column();
            let guard = if table == EntityTable::CalendarEvents {
                ""
            } else {
                "deleted_at IS NULL AND "
            };

            let sql = format!(
                "SELECT id, {name_col} AS name, COALESCE({notes_col}, '') AS notes,
                        CASE
                            WHEN LOWER({name_col}) = ?1 THEN 1.0
                            WHEN LOWER({name_col}) LIKE ?2 THEN 0.8
                            ELSE 0.5
                        END AS match_score
                 FROM {table}
                 WHERE {guard}(LOWER({name_col}) LIKE ?2
                    OR LOWER(COALESCE({notes_col}, '')) LIKE ?2)
                 LIMIT 5"
            );

            for keyword in keywords {
                let pattern = format!("%{keyword}%");
                let rows = match self.store.query(&sql, &[keyword, &pattern]) {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!(table = %table, %keyword, error = %e, "fuzzy search failed");
                        continue;
                    }
                };
                for row in rows {
                    let Some(id) = row.i64_opt("id") else { continue };
                    matches.push(EntityMatch {
                        table,
                        id,
                        name: row.str_or("name", ""),
                        notes: row.str_or("notes", ""),
                        score: row.f64_opt("match_score").unwrap_or(0.0),
                    });
                }
            }
        }

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let mut seen = std::collections::HashSet::new();
        let mut unique = Vec::new();
        for m in matches {
            if seen.insert((m.table, m.id)) {
                unique.push(m);
                if unique.len() >= self.max_matches {
                    break;
                }
            }
        }
        Ok(unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matcher(store: Store) -> EntityMatcher {
        let stopwords = ["der", "die", "das", "ist", "ein", "an", "und", "bis"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        EntityMatcher::new(store, stopwords, 2, 5)
    }

    fn seed(store: &Store) {
        for (name, notes) in [
            ("Reibekuchenofen", "Ofen im Garten bauen"),
            ("Steuererklärung", "Belege sammeln"),
        ] {
            store
                .insert_entity(
                    EntityTable::Projects,
                    &json!({"name": name, "notes": notes}).as_object().unwrap().clone(),
                )
                .unwrap();
        }
        store
            .insert_entity(
                EntityTable::People,
                &json!({"name": "Schmidt", "context": "Handwerker"})
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .unwrap();
    }

    #[test]
    fn keywords_drop_stopwords_and_short_tokens() {
        let store = Store::open_in_memory().unwrap();
        let m = matcher(store);
        let kws = m.extract_keywords("Das ist ein Test für die Steuererklärung!");
        assert_eq!(kws, vec!["test", "für", "steuererklärung"]);
    }

    #[test]
    fn keywords_preserve_umlauts_and_order() {
        let store = Store::open_in_memory().unwrap();
        let m = matcher(store);
        let kws = m.extract_keywords("Grüße grüße an Müller");
        assert_eq!(kws, vec!["grüße", "müller"]);
    }

    #[test]
    fn exact_name_match_scores_highest() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        let m = matcher(store);
        let hits = m.search(&["reibekuchenofen".to_string()]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].table, EntityTable::Projects);
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[0].name, "Reibekuchenofen");
    }

    #[test]
    fn notes_match_scores_lower_than_name_match() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        let m = matcher(store);
        // "garten" only appears in project notes.
        let hits = m.search(&["garten".to_string()]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, 0.5);
    }

    #[test]
    fn duplicate_hits_keep_best_score() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        let m = matcher(store);
        // "ofen" hits the same project twice: name substring and notes.
        let hits = m
            .search(&["ofen".to_string(), "reibekuchenofen".to_string()])
            .unwrap();
        let project_hits: Vec<_> = hits
            .iter()
            .filter(|h| h.table == EntityTable::Projects)
            .collect();
        assert_eq!(project_hits.len(), 1);
        assert_eq!(project_hits[0].score, 1.0);
    }

    #[test]
    fn soft_deleted_rows_never_match() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        let id = store
            .query_one("SELECT id FROM projects WHERE name = 'Reibekuchenofen'", &[])
            .unwrap()
            .unwrap()
            .i64_opt("id")
            .unwrap();
        store.soft_delete_entity(EntityTable::Projects, id).unwrap();

        let m = matcher(store);
        let hits = m.search(&["reibekuchenofen".to_string()]).unwrap();
        assert!(hits.is_empty());
    }
}
