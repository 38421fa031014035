//! Closed enumeration of entity tables and their columns.
//!
//! Every piece of dynamically assembled SQL (fuzzy search, generic updates,
//! soft deletes) resolves identifiers through this module. Values are always
//! bound as parameters; only names from these closed sets are interpolated.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTable {
    Projects,
    Tasks,
    People,
    Ideas,
    CalendarEvents,
}

impl EntityTable {
    pub const ALL: [EntityTable; 5] = [
        EntityTable::Projects,
        EntityTable::Tasks,
        EntityTable::People,
        EntityTable::Ideas,
        EntityTable::CalendarEvents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityTable::Projects => "projects",
            EntityTable::Tasks => "tasks",
            EntityTable::People => "people",
            EntityTable::Ideas => "ideas",
            EntityTable::CalendarEvents => "calendar_events",
        }
    }

    /// The display-name column used for matching and listings.
    pub fn name_column(&self) -> &'static str {
        match self {
            EntityTable::Tasks | EntityTable::CalendarEvents => "title",
            _ => "name",
        }
    }

    /// The free-text column searched with the lower 0.5 weight.
    pub fn notes_column(&self) -> &'static str {
        match self {
            EntityTable::People => "context",
            EntityTable::Ideas => "one_liner",
            EntityTable::CalendarEvents => "description",
            _ => "notes",
        }
    }

    /// Columns a generic update or insert may touch on this table.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            EntityTable::Projects => &["name", "status", "priority", "notes"],
            EntityTable::Tasks => &[
                "title", "status", "priority", "due_date", "project_id", "person_id", "tags",
                "notes",
            ],
            EntityTable::People => &[
                "name",
                "first_name",
                "middle_name",
                "last_name",
                "phone",
                "email",
                "street",
                "house_nr",
                "zip",
                "city",
                "country",
                "important_dates",
                "last_contact",
                "context",
            ],
            EntityTable::Ideas => &["name", "one_liner", "status", "priority", "tags"],
            EntityTable::CalendarEvents => &[
                "title",
                "description",
                "location",
                "start_time",
                "end_time",
                "all_day",
                "recurrence",
                "person_id",
                "calendar_id",
            ],
        }
    }

    pub fn allows_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    /// Tables that carry a task/idea/project-style status column.
    pub fn has_status(&self) -> bool {
        !matches!(self, EntityTable::People | EntityTable::CalendarEvents)
    }
}

impl std::fmt::Display for EntityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityTable {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "projects" => Ok(EntityTable::Projects),
            "tasks" => Ok(EntityTable::Tasks),
            "people" => Ok(EntityTable::People),
            "ideas" => Ok(EntityTable::Ideas),
            "calendar_events" => Ok(EntityTable::CalendarEvents),
            other => Err(format!("unknown table: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_round_trips_through_str() {
        for table in EntityTable::ALL {
            let parsed: EntityTable = table.as_str().parse().unwrap();
            assert_eq!(parsed, table);
        }
    }

    #[test]
    fn unknown_table_is_rejected() {
        assert!("system_settings".parse::<EntityTable>().is_err());
        assert!("tasks; DROP TABLE tasks".parse::<EntityTable>().is_err());
    }

    #[test]
    fn people_free_text_column_is_context() {
        assert_eq!(EntityTable::People.notes_column(), "context");
        assert_eq!(EntityTable::Tasks.name_column(), "title");
    }

    #[test]
    fn column_whitelist_blocks_unknown_columns() {
        assert!(EntityTable::Tasks.allows_column("due_date"));
        assert!(!EntityTable::Tasks.allows_column("deleted_at"));
        assert!(!EntityTable::People.allows_column("icloud_uid"));
    }
}
