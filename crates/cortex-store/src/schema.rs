use rusqlite::{params, Connection, Result};

/// Initialise all tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_entity_tables(conn)?;
    create_pipeline_tables(conn)?;
    create_config_tables(conn)?;
    create_scheduler_tables(conn)?;
    create_sync_tables(conn)?;
    Ok(())
}

/// Seed the rows a fresh install needs to be operational: agent configs,
/// the built-in schedules and jobs, base settings, German stopwords.
/// Existing rows are left untouched.
pub fn seed_defaults(conn: &Connection) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();

    for (name, template, schema) in default_agents() {
        conn.execute(
            "INSERT OR IGNORE INTO agent_configs
             (agent_name, provider, model, system_prompt, user_prompt_template,
              output_schema, is_active, created_at, updated_at)
             VALUES (?1, 'anthropic', 'claude-sonnet-4-5', ?2, ?3, ?4, 1, ?5, ?5)",
            params![name, default_system_prompt(name), template, schema, now],
        )?;
    }

    let schedules: [(&str, &str, Option<i64>, Option<&str>, Option<i64>, Option<i64>); 4] = [
        ("contact-sync-hourly", "interval", Some(60), None, None, None),
        ("calendar-sync-half-hourly", "interval", Some(30), None, None, None),
        ("daily-morning", "daily", None, Some("07:00"), None, None),
        ("weekly-sunday-evening", "weekly", None, Some("18:00"), Some(6), None),
    ];
    for (name, kind, minutes, time, dow, dom) in schedules {
        conn.execute(
            "INSERT INTO schedules
             (name, type, interval_minutes, time_of_day, day_of_week, day_of_month,
              enabled, created_at, updated_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7
             WHERE NOT EXISTS (SELECT 1 FROM schedules WHERE name = ?1)",
            params![name, kind, minutes, time, dow, dom, now],
        )?;
    }

    for (job, schedule) in [
        ("contact_sync", "contact-sync-hourly"),
        ("calendar_sync", "calendar-sync-half-hourly"),
        ("daily_report", "daily-morning"),
        ("weekly_report", "weekly-sunday-evening"),
    ] {
        conn.execute(
            "INSERT OR IGNORE INTO scheduled_jobs
             (job_name, schedule_id, enabled, created_at, updated_at)
             SELECT ?1, id, 1, ?3, ?3 FROM schedules WHERE name = ?2",
            params![job, schedule, now],
        )?;
    }

    for (key, value, description) in [
        ("timezone", "\"Europe/Berlin\"", "Local timezone for date resolution"),
        ("confidence_threshold", "0.3", "Below this the pipeline asks back"),
        ("max_matches", "5", "Fuzzy search result cap"),
        ("keyword_min_length", "2", "Shortest keyword considered"),
    ] {
        conn.execute(
            "INSERT OR IGNORE INTO system_settings
             (setting_key, setting_value, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![key, value, description, now],
        )?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO language_mappings
         (mapping_type, mapping_key, language, mapping_value, is_active, created_at, updated_at)
         VALUES ('stopwords', 'default', 'de', ?1, 1, ?2, ?2)",
        params![DEFAULT_STOPWORDS_DE, now],
    )?;

    Ok(())
}

const DEFAULT_STOPWORDS_DE: &str = r#"["der","die","das","ein","eine","und","oder","aber","ist","sind","war","hat","habe","ich","du","er","sie","es","wir","ihr","mit","von","zu","auf","für","im","am","um","an","in","den","dem","des","bitte","mal","noch","auch","schon","dann","doch"]"#;

fn default_system_prompt(agent: &str) -> &'static str {
    match agent {
        "intent_agent" => {
            "Du klassifizierst Eingaben für ein Second-Brain-System. \
             Antworte ausschließlich mit einem JSON-Objekt, ohne Erklärtext."
        }
        "structure_agent" => {
            "Du strukturierst Freitext zu Datenbank-Feldern. \
             Nutze die vorab aufgelösten Werte (Datum, Priorität, Status) unverändert. \
             Antworte ausschließlich mit einem JSON-Objekt."
        }
        "query_classifier" => {
            "Du ordnest Fragen einer Tabelle und einer Suchstrategie zu. \
             Erlaubte Tabellen: projects, tasks, people, ideas, calendar_events. \
             Erlaubte search_type-Werte: name, date_range, fulltext, all. \
             Antworte ausschließlich mit einem JSON-Objekt."
        }
        "query_agent" => {
            "Du beantwortest Fragen anhand der übergebenen Datensätze, knapp und \
             auf Deutsch. Antworte ausschließlich mit einem JSON-Objekt."
        }
        "edit_agent" => {
            "Du übersetzt Änderungswünsche in genau eine Aktion (update oder delete) \
             auf einer erlaubten Tabelle. Antworte ausschließlich mit einem JSON-Objekt."
        }
        "daily_report_agent" => {
            "Du erstellst einen kurzen täglichen Fokus-Report. \
             Antworte ausschließlich mit einem JSON-Objekt."
        }
        "weekly_report_agent" => {
            "Du erstellst einen Wochenrückblick mit Muster-Erkennung. \
             Antworte ausschließlich mit einem JSON-Objekt."
        }
        _ => "Antworte ausschließlich mit einem JSON-Objekt.",
    }
}

fn default_agents() -> [(&'static str, &'static str, &'static str); 7] {
    [
        (
            "intent_agent",
            "Eingabe: {text}\n\nGefundene Einträge in der Datenbank:\n{matches}\n\n\
             Bestimme den Intent (create, update, complete, delete oder unclear). \
             Bei unclear: formuliere eine Rückfrage und liste die Kandidaten als options \
             [{{\"table\": ..., \"id\": ..., \"label\": ...}}].\n\
             Antwortformat: {{\"intent\": ..., \"category\": ..., \"target\": {{\"table\": ..., \"id\": ...}}, \
             \"options\": [...], \"question\": ..., \"confidence\": 0.0, \"reasoning\": ...}}",
            r#"{"intent": {"type": "string", "required": true}, "category": {"type": "string"}, "target": {"type": "object"}, "options": {"type": "array"}, "question": {"type": "string"}, "confidence": {"type": "number", "default": 0}, "reasoning": {"type": "string"}}"#,
        ),
        (
            "structure_agent",
            "Eingabe: {text}\nIntent: {intent}\nKategorie: {category}\nZiel: {target}\n\
             Heute: {current_date}\nAufgelöstes Datum: {resolved_due_date}\n\
             Aufgelöste Zeit: {resolved_time}\nStartzeit: {resolved_start_time}\n\
             Priorität: {resolved_priority}\nStatus: {resolved_status}\n\
             Hinweise: {preprocessing_hints}\n\n\
             Bei create: {{\"data\": {{...}}, \"linked_entities\": {{\"person_name\": ..., \"project_name\": ...}}}}.\n\
             Bei update: {{\"changes\": {{nur geänderte Felder}}}}.",
            r#"{"data": {"type": "object"}, "changes": {"type": "object"}, "linked_entities": {"type": "object"}}"#,
        ),
        (
            "query_classifier",
            "Frage: {question}\nHeute: {today}\n\n\
             Antwortformat: {{\"table\": ..., \"search_type\": ..., \"search_value\": ...}}",
            r#"{"table": {"type": "string", "required": true}, "search_type": {"type": "string", "required": true}, "search_value": {"type": "string"}}"#,
        ),
        (
            "query_agent",
            "Frage: {question}\n\nDatensätze:\n{rows}\n\n\
             Antwortformat: {{\"answer\": ...}}",
            r#"{"answer": {"type": "string", "required": true}}"#,
        ),
        (
            "edit_agent",
            "Anweisung: {instruction}\nErlaubte Tabellen: {tables}\nHeute: {today}\n\n\
             Antwortformat: {{\"action\": {{\"operation\": \"update\"|\"delete\", \"table\": ..., \
             \"id\": ..., \"field\": ..., \"new_value\": ..., \"target_name\": ...}}, \
             \"confirmation_question\": ...}}",
            r#"{"action": {"type": "object", "required": true}, "confirmation_question": {"type": "string"}}"#,
        ),
        (
            "daily_report_agent",
            "Heute: {today}\nOffene Aufgaben: {open_tasks}\nÜberfällig: {overdue_tasks}\n\
             Heutige Termine: {todays_events}\nZuletzt erledigt: {recently_completed}\n\n\
             Antwortformat: {{\"top_3_tasks\": [...], \"avoiding\": {{...}}, \
             \"quick_win\": {{...}}, \"todays_events\": [...], \"summary_text\": ...}}",
            r#"{"top_3_tasks": {"type": "array"}, "avoiding": {"type": "object"}, "quick_win": {"type": "object"}, "todays_events": {"type": "array"}, "summary_text": {"type": "string", "required": true}}"#,
        ),
        (
            "weekly_report_agent",
            "Zeitraum: {period_start} bis {period_end}\nErledigt: {completed_tasks}\n\
             Neu: {new_tasks}\nOffen: {open_tasks}\nAktive Projekte: {active_projects}\n\
             Kommende Termine: {upcoming_calendar}\nMuster: {patterns}\n\n\
             Antwortformat: {{\"week_summary\": ..., \"completed_count\": 0, \
             \"biggest_open_projects\": [...], \"next_week_priorities\": [...], \
             \"upcoming_calendar\": [...], \"pattern_insight\": ..., \"summary_text\": ...}}",
            r#"{"week_summary": {"type": "string"}, "completed_count": {"type": "integer"}, "biggest_open_projects": {"type": "array"}, "next_week_priorities": {"type": "array"}, "upcoming_calendar": {"type": "array"}, "pattern_insight": {"type": "string"}, "summary_text": {"type": "string", "required": true}}"#,
        ),
    ]
}

fn create_entity_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS people (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL,
            first_name      TEXT,
            middle_name     TEXT,
            last_name       TEXT,
            phone           TEXT,
            email           TEXT,
            street          TEXT,
            house_nr        TEXT,
            zip             TEXT,
            city            TEXT,
            country         TEXT,
            important_dates TEXT NOT NULL DEFAULT '[]',
            last_contact    TEXT,
            context         TEXT,
            icloud_uid      TEXT,
            google_uid      TEXT,
            nextcloud_uid   TEXT,
            sync_etag       TEXT,
            sync_status     TEXT NOT NULL DEFAULT 'pending',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            deleted_at      TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_people_icloud ON people(icloud_uid)
            WHERE icloud_uid IS NOT NULL AND deleted_at IS NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_people_google ON people(google_uid)
            WHERE google_uid IS NOT NULL AND deleted_at IS NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_people_nextcloud ON people(nextcloud_uid)
            WHERE nextcloud_uid IS NOT NULL AND deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS projects (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'active',
            priority    INTEGER NOT NULL DEFAULT 2,
            notes       TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            deleted_at  TEXT
        );

        CREATE TABLE IF NOT EXISTS ideas (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            one_liner   TEXT,
            status      TEXT NOT NULL DEFAULT 'inbox',
            priority    INTEGER NOT NULL DEFAULT 2,
            tags        TEXT NOT NULL DEFAULT '[]',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            deleted_at  TEXT
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'inbox',
            priority    INTEGER NOT NULL DEFAULT 2,
            due_date    TEXT,
            project_id  INTEGER,
            person_id   INTEGER,
            tags        TEXT NOT NULL DEFAULT '[]',
            notes       TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            deleted_at  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, due_date);

        CREATE TABLE IF NOT EXISTS calendar_events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT NOT NULL,
            description TEXT,
            location    TEXT,
            start_time  TEXT,
            end_time    TEXT,
            all_day     INTEGER NOT NULL DEFAULT 0,
            recurrence  TEXT,
            person_id   INTEGER,
            calendar_id TEXT,
            icloud_uid  TEXT,
            etag        TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_uid ON calendar_events(icloud_uid);
        CREATE INDEX IF NOT EXISTS idx_events_start ON calendar_events(start_time);",
    )
}

fn create_pipeline_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS inbox_log (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            captured_text TEXT NOT NULL,
            intent        TEXT,
            target_table  TEXT,
            target_id     INTEGER,
            changes       TEXT,
            confidence    REAL NOT NULL DEFAULT 0,
            needs_review  INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS human_requests (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            automation   TEXT NOT NULL,
            request_type TEXT NOT NULL,
            question     TEXT NOT NULL,
            options      TEXT,
            status       TEXT NOT NULL DEFAULT 'pending',
            response     TEXT,
            context      TEXT,
            created_at   TEXT NOT NULL,
            answered_at  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_human_requests_status
            ON human_requests(automation, status);",
    )
}

fn create_config_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agent_configs (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_name           TEXT NOT NULL UNIQUE,
            provider             TEXT NOT NULL,
            model                TEXT NOT NULL,
            system_prompt        TEXT NOT NULL,
            user_prompt_template TEXT,
            input_schema         TEXT,
            output_schema        TEXT,
            retry_count          INTEGER NOT NULL DEFAULT 3,
            timeout_seconds      INTEGER NOT NULL DEFAULT 30,
            max_tokens           INTEGER NOT NULL DEFAULT 1024,
            temperature          REAL NOT NULL DEFAULT 0.2,
            fallback_provider    TEXT,
            fallback_model       TEXT,
            is_active            INTEGER NOT NULL DEFAULT 1,
            total_calls          INTEGER NOT NULL DEFAULT 0,
            error_count          INTEGER NOT NULL DEFAULT 0,
            last_used_at         TEXT,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS system_settings (
            setting_key   TEXT PRIMARY KEY,
            setting_value TEXT NOT NULL,
            description   TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS language_mappings (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            mapping_type  TEXT NOT NULL,
            mapping_key   TEXT NOT NULL,
            language      TEXT NOT NULL DEFAULT 'de',
            mapping_value TEXT NOT NULL,
            is_active     INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            UNIQUE(mapping_type, mapping_key, language)
        );

        CREATE TABLE IF NOT EXISTS api_keys (
            provider   TEXT PRIMARY KEY,
            api_key    TEXT NOT NULL,
            valid      INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS telegram_config (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            bot_token      TEXT NOT NULL,
            chat_id        TEXT,
            webhook_secret TEXT,
            is_active      INTEGER NOT NULL DEFAULT 1,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS report_channels (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            report_type  TEXT NOT NULL,
            channel_type TEXT NOT NULL,
            recipients   TEXT NOT NULL DEFAULT '[]',
            is_active    INTEGER NOT NULL DEFAULT 1,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            UNIQUE(report_type, channel_type)
        );",
    )
}

fn create_scheduler_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schedules (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            name             TEXT NOT NULL,
            type             TEXT NOT NULL,
            interval_minutes INTEGER,
            time_of_day      TEXT,
            day_of_week      INTEGER,
            day_of_month     INTEGER,
            enabled          INTEGER NOT NULL DEFAULT 1,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            job_name    TEXT NOT NULL UNIQUE,
            schedule_id INTEGER,
            enabled     INTEGER NOT NULL DEFAULT 1,
            last_run    TEXT,
            next_run    TEXT,
            run_count   INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            last_error  TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    )
}

fn create_sync_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_config (
            provider          TEXT PRIMARY KEY,
            enabled           INTEGER NOT NULL DEFAULT 0,
            sync_interval     INTEGER NOT NULL DEFAULT 300,
            credentials       TEXT NOT NULL DEFAULT '{}',
            last_sync         TEXT,
            write_calendar_id TEXT,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_log (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            provider   TEXT NOT NULL,
            direction  TEXT NOT NULL,
            action     TEXT NOT NULL,
            status     TEXT NOT NULL,
            details    TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sync_log_provider
            ON sync_log(provider, created_at DESC);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_twice_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        seed_defaults(&conn).unwrap();
        seed_defaults(&conn).unwrap();

        let agents: i64 = conn
            .query_row("SELECT COUNT(*) FROM agent_configs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(agents, 7);

        let schedules: i64 = conn
            .query_row("SELECT COUNT(*) FROM schedules", [], |r| r.get(0))
            .unwrap();
        assert_eq!(schedules, 4);

        let jobs: i64 = conn
            .query_row("SELECT COUNT(*) FROM scheduled_jobs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(jobs, 4);
    }

    #[test]
    fn seeded_schemas_are_valid_json() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        seed_defaults(&conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT agent_name, output_schema FROM agent_configs")
            .unwrap();
        let rows: Vec<(String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(rows.len(), 7);
        for (agent, schema) in rows {
            let parsed: serde_json::Value =
                serde_json::from_str(&schema).unwrap_or_else(|_| panic!("{agent} schema invalid"));
            assert!(parsed.is_object());
        }
    }
}
