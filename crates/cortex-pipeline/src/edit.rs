//! Edit handler for `!` instructions.
//!
//! Non-critical edits (status, dates) run immediately; deletes and changes
//! to a person's identity fields require a confirmed second call that
//! replays the pending action.

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use cortex_agents::EditAgent;
use cortex_store::{EntityTable, Store};

use crate::error::Result;

/// Person columns whose change needs explicit confirmation.
const CRITICAL_PERSON_FIELDS: &[&str] = &[
    "name",
    "first_name",
    "last_name",
    "phone",
    "email",
    "context",
];

#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub needs_confirmation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EditOutcome {
    fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            needs_confirmation: false,
            confirmation_question: None,
            pending_action: None,
            error: Some(error.into()),
        }
    }

    fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            needs_confirmation: false,
            confirmation_question: None,
            pending_action: None,
            error: None,
        }
    }
}

pub struct EditHandler {
    store: Store,
    agent: EditAgent,
}

impl EditHandler {
    pub fn new(store: Store) -> Result<Self> {
        let agent = EditAgent::new(store.clone())?;
        Ok(Self { store, agent })
    }

    pub async fn handle(
        &self,
        instruction: &str,
        today: &str,
        confirmed: bool,
        pending_action: Option<Value>,
    ) -> Result<EditOutcome> {
        // A confirmed call replays the action it was asked to confirm.
        if confirmed {
            if let Some(action) = pending_action {
                return Ok(self.execute_action(&action));
            }
        }

        if instruction.trim().is_empty() {
            return Ok(EditOutcome::failure(
                "Bitte gib an, was geändert werden soll.",
                "empty_instruction",
            ));
        }

        let tables: Vec<&str> = EntityTable::ALL.iter().map(|t| t.as_str()).collect();
        let result = match self.agent.interpret(instruction, &tables, today).await {
            Ok(result) => result,
            Err(e) => {
                return Ok(EditOutcome::failure(
                    "Konnte die Anweisung nicht verstehen.",
                    e.to_json().to_string(),
                ))
            }
        };

        let Some(action) = result.get("action").filter(|a| a.is_object()).cloned() else {
            return Ok(EditOutcome::failure("Keine gültige Aktion erkannt.", "no_action"));
        };

        let Some(table) = action
            .get("table")
            .and_then(Value::as_str)
            .and_then(|t| t.parse::<EntityTable>().ok())
        else {
            return Ok(EditOutcome::failure(
                "Änderungen an dieser Tabelle sind nicht erlaubt.",
                "forbidden_table",
            ));
        };

        if is_critical(&action, table) && !confirmed {
            let question = build_confirmation(&action, table)
                .or_else(|| {
                    result
                        .get("confirmation_question")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "Diese Änderung durchführen?".to_string());
            return Ok(EditOutcome {
                success: true,
                message: String::new(),
                needs_confirmation: true,
                confirmation_question: Some(question),
                pending_action: Some(action),
                error: None,
            });
        }

        Ok(self.execute_action(&action))
    }

    fn execute_action(&self, action: &Value) -> EditOutcome {
        let operation = action.get("operation").and_then(Value::as_str).unwrap_or("update");
        let Some(table) = action
            .get("table")
            .and_then(Value::as_str)
            .and_then(|t| t.parse::<EntityTable>().ok())
        else {
            return EditOutcome::failure(
                "Änderungen an dieser Tabelle sind nicht erlaubt.",
                "forbidden_table",
            );
        };
        let Some(id) = action.get("id").and_then(Value::as_i64) else {
            return EditOutcome::failure("Kein Ziel angegeben.", "missing_id");
        };

        match operation {
            "delete" => match self.store.soft_delete_entity(table, id) {
                Ok(0) => EditOutcome::failure(
                    format!("Eintrag #{id} in {table} nicht gefunden."),
                    "not_found",
                ),
                Ok(_) => {
                    info!(table = %table, id, "entity deleted via edit");
                    EditOutcome::done(format!("Eintrag #{id} aus {table} gelöscht."))
                }
                Err(e) => EditOutcome::failure("Fehler beim Löschen.", e.to_string()),
            },
            "update" => {
                let Some(field) = action.get("field").and_then(Value::as_str) else {
                    return EditOutcome::failure("Feld oder Wert fehlt.", "missing_field_or_value");
                };
                let Some(new_value) = action.get("new_value").filter(|v| !v.is_null()) else {
                    return EditOutcome::failure("Feld oder Wert fehlt.", "missing_field_or_value");
                };

                let mut changes = serde_json::Map::new();
                changes.insert(field.to_string(), new_value.clone());
                match self.store.update_entity(table, id, &changes) {
                    Ok(0) => EditOutcome::failure(
                        format!("Eintrag #{id} in {table} nicht gefunden."),
                        "not_found",
                    ),
                    Ok(_) => {
                        info!(table = %table, id, field, "entity updated via edit");
                        EditOutcome::done(format!("{table} #{id}: {field} wurde geändert."))
                    }
                    Err(e) => EditOutcome::failure("Fehler beim Ausführen.", e.to_string()),
                }
            }
            other => EditOutcome::failure(
                format!("Unbekannte Operation: {other}"),
                "unknown_operation",
            ),
        }
    }
}

/// Critical iff deleting, or touching a person's identity fields.
pub fn is_critical(action: &Value, table: EntityTable) -> bool {
    let operation = action.get("operation").and_then(Value::as_str).unwrap_or("update");
    if operation == "delete" {
        return true;
    }
    if table == EntityTable::People {
        if let Some(field) = action.get("field").and_then(Value::as_str) {
            return CRITICAL_PERSON_FIELDS.contains(&field);
        }
    }
    false
}

fn build_confirmation(action: &Value, table: EntityTable) -> Option<String> {
    let operation = action.get("operation").and_then(Value::as_str).unwrap_or("update");
    let target = action
        .get("target_name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", action.get("id").and_then(Value::as_i64).unwrap_or(0)));

    if operation == "delete" {
        return Some(format!("Soll '{target}' aus {table} wirklich gelöscht werden?"));
    }
    if table == EntityTable::People {
        let field = action.get("field").and_then(Value::as_str)?;
        let new_value = action.get("new_value")?;
        let shown = match new_value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Some(format!("Soll {field} von '{target}' auf '{shown}' geändert werden?"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delete_is_always_critical() {
        let action = json!({"operation": "delete", "table": "tasks", "id": 1});
        assert!(is_critical(&action, EntityTable::Tasks));
    }

    #[test]
    fn person_identity_fields_are_critical() {
        for field in ["name", "first_name", "last_name", "phone", "email", "context"] {
            let action = json!({"operation": "update", "table": "people", "id": 1, "field": field});
            assert!(is_critical(&action, EntityTable::People), "{field} must be critical");
        }
    }

    #[test]
    fn status_changes_are_not_critical() {
        let action = json!({"operation": "update", "table": "tasks", "id": 1, "field": "status"});
        assert!(!is_critical(&action, EntityTable::Tasks));

        let action = json!({"operation": "update", "table": "people", "id": 1, "field": "last_contact"});
        assert!(!is_critical(&action, EntityTable::People));
    }

    #[test]
    fn confirmation_question_names_the_target() {
        let action = json!({
            "operation": "delete", "table": "projects", "id": 3,
            "target_name": "Reibekuchenofen",
        });
        let question = build_confirmation(&action, EntityTable::Projects).unwrap();
        assert!(question.contains("Reibekuchenofen"));
        assert!(question.contains("projects"));
    }
}
