//! Sync orchestration: pull, resolve, push, delete, token bookkeeping.

use std::collections::HashMap;

use chrono::DateTime;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use cortex_store::{now_rfc3339, Row, RowExt, Store};

use crate::caldav::ICloudCalendarProvider;
use crate::carddav::NextcloudProvider;
use crate::contact::{Contact, ImportantDate, ProviderKind, SyncProvider};
use crate::error::{Result, SyncError};
use crate::icloud::ICloudProvider;
use crate::people::GoogleProvider;
use crate::resolver::{Action, ConflictResolver};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncStats {
    pub pulled: usize,
    pub pushed: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub errors: usize,
}

pub struct SyncService {
    store: Store,
    providers: HashMap<ProviderKind, Box<dyn SyncProvider>>,
}

impl SyncService {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            providers: HashMap::new(),
        }
    }

    /// Build and authenticate the adapter for `kind`.
    pub async fn init_provider(&mut self, kind: ProviderKind, credentials: &Value) -> Result<()> {
        let mut provider: Box<dyn SyncProvider> = match kind {
            ProviderKind::Nextcloud => Box::new(NextcloudProvider::new()),
            ProviderKind::Icloud => Box::new(ICloudProvider::new()),
            ProviderKind::Google => Box::new(GoogleProvider::new()),
        };
        provider.authenticate(credentials).await?;
        self.providers.insert(kind, provider);
        Ok(())
    }

    pub fn is_initialized(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// One full sync run for a provider: pulls are applied before pushes,
    /// one bad contact never poisons the batch, and the new sync token is
    /// persisted at the end.
    pub async fn sync_provider(&self, kind: ProviderKind) -> Result<SyncStats> {
        let provider = self
            .providers
            .get(&kind)
            .ok_or(SyncError::NotAuthenticated)?;

        let mut stats = SyncStats::default();
        let sync_token = self.load_sync_token(kind)?;
        let changes = provider.changes_since(sync_token.as_deref()).await?;

        // Pull: remote -> store.
        for remote in changes.created.iter().chain(changes.updated.iter()) {
            match self.apply_remote_contact(kind, remote) {
                Ok(RemoteOutcome::Pulled) => stats.pulled += 1,
                Ok(RemoteOutcome::Conflict) => stats.conflicts += 1,
                Ok(RemoteOutcome::NoOp) => {}
                Err(e) => {
                    stats.errors += 1;
                    error!(provider = %kind, error = %e, "failed to apply remote contact");
                }
            }
        }

        // Remote deletions become soft deletes.
        for uid in &changes.deleted {
            match self.apply_remote_delete(kind, uid) {
                Ok(true) => stats.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.errors += 1;
                    error!(provider = %kind, error = %e, "failed to apply remote delete");
                }
            }
        }

        // Push: everything pending or never seen by this provider.
        for local in self.pending_contacts(kind)? {
            let id = local.id.unwrap_or_default();
            match provider.push_contact(&local).await {
                Ok(uid) => {
                    self.record_pushed(kind, id, &uid)?;
                    stats.pushed += 1;
                }
                Err(e) => {
                    stats.errors += 1;
                    error!(provider = %kind, contact = id, error = %e, "push failed");
                }
            }
        }

        if let Some(ref token) = changes.sync_token {
            self.save_sync_token(kind, token)?;
        } else {
            self.touch_last_sync(kind)?;
        }

        self.log_sync(kind, &stats);
        info!(provider = %kind, ?stats, "sync run finished");
        Ok(stats)
    }

    fn apply_remote_contact(&self, kind: ProviderKind, remote: &Contact) -> Result<RemoteOutcome> {
        let Some(remote_uid) = remote.uid_for(kind) else {
            warn!(provider = %kind, "remote contact without UID skipped");
            return Ok(RemoteOutcome::NoOp);
        };

        let local = self.find_by_provider_uid(kind, remote_uid)?;

        match local {
            None => {
                self.insert_contact(remote)?;
                Ok(RemoteOutcome::Pulled)
            }
            Some(local) => {
                let resolution = ConflictResolver::resolve(Some(&local), Some(remote), kind);
                match resolution.action {
                    Action::Pull => {
                        self.update_contact(&resolution.contact)?;
                        Ok(RemoteOutcome::Pulled)
                    }
                    // Local wins: the push phase sends it out.
                    Action::Push => Ok(RemoteOutcome::Conflict),
                    Action::None => Ok(RemoteOutcome::NoOp),
                }
            }
        }
    }

    fn apply_remote_delete(&self, kind: ProviderKind, uid: &str) -> Result<bool> {
        let sql = format!(
            "UPDATE people SET deleted_at = ?1, sync_status = 'deleted', updated_at = ?1
             WHERE {} = ?2 AND deleted_at IS NULL",
            kind.uid_column()
        );
        Ok(self.store.exec(&sql, &[&now_rfc3339(), &uid])? > 0)
    }

    fn find_by_provider_uid(&self, kind: ProviderKind, uid: &str) -> Result<Option<Contact>> {
        let sql = format!(
            "SELECT * FROM people WHERE {} = ?1 AND deleted_at IS NULL",
            kind.uid_column()
        );
        Ok(self.store.query_one(&sql, &[&uid])?.map(contact_from_row))
    }

    /// Locals that must go out: marked pending, or never pushed to this
    /// provider.
    fn pending_contacts(&self, kind: ProviderKind) -> Result<Vec<Contact>> {
        let sql = format!(
            "SELECT * FROM people
             WHERE deleted_at IS NULL
               AND (sync_status = 'pending' OR {} IS NULL)",
            kind.uid_column()
        );
        Ok(self
            .store
            .query(&sql, &[])?
            .into_iter()
            .map(contact_from_row)
            .collect())
    }

    fn insert_contact(&self, contact: &Contact) -> Result<i64> {
        let name = display_name(contact);
        let dates = serde_json::to_string(&contact.important_dates).unwrap_or_else(|_| "[]".into());
        let now = now_rfc3339();
        let id = self.store.insert(
            "INSERT INTO people
             (name, first_name, middle_name, last_name, phone, email,
              street, house_nr, zip, city, country, important_dates,
              last_contact, context, icloud_uid, google_uid, nextcloud_uid,
              sync_etag, sync_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                     ?13, ?14, ?15, ?16, ?17, ?18, 'synced', ?19, ?19)",
            &[
                &name,
                &contact.first_name,
                &contact.middle_name,
                &contact.last_name,
                &contact.phone,
                &contact.email,
                &contact.street,
                &contact.house_nr,
                &contact.zip,
                &contact.city,
                &contact.country,
                &dates,
                &contact.last_contact,
                &contact.context,
                &contact.icloud_uid,
                &contact.google_uid,
                &contact.nextcloud_uid,
                &contact.sync_etag,
                &now,
            ],
        )?;
        Ok(id)
    }

    fn update_contact(&self, contact: &Contact) -> Result<()> {
        let Some(id) = contact.id else {
            return Err(SyncError::Store(cortex_store::StoreError::NotFound(
                "contact without id".into(),
            )));
        };
        let name = display_name(contact);
        let dates = serde_json::to_string(&contact.important_dates).unwrap_or_else(|_| "[]".into());
        self.store.exec(
            "UPDATE people SET
                name = ?1, first_name = ?2, middle_name = ?3, last_name = ?4,
                phone = ?5, email = ?6, street = ?7, house_nr = ?8, zip = ?9,
                city = ?10, country = ?11, important_dates = ?12,
                last_contact = ?13, context = ?14,
                icloud_uid = ?15, google_uid = ?16, nextcloud_uid = ?17,
                sync_etag = ?18, sync_status = 'synced', updated_at = ?19
             WHERE id = ?20",
            &[
                &name,
                &contact.first_name,
                &contact.middle_name,
                &contact.last_name,
                &contact.phone,
                &contact.email,
                &contact.street,
                &contact.house_nr,
                &contact.zip,
                &contact.city,
                &contact.country,
                &dates,
                &contact.last_contact,
                &contact.context,
                &contact.icloud_uid,
                &contact.google_uid,
                &contact.nextcloud_uid,
                &contact.sync_etag,
                &now_rfc3339(),
                &id,
            ],
        )?;
        Ok(())
    }

    fn record_pushed(&self, kind: ProviderKind, id: i64, uid: &str) -> Result<()> {
        let sql = format!(
            "UPDATE people SET {} = ?1, sync_status = 'synced', updated_at = ?2 WHERE id = ?3",
            kind.uid_column()
        );
        self.store.exec(&sql, &[&uid, &now_rfc3339(), &id])?;
        Ok(())
    }

    fn load_sync_token(&self, kind: ProviderKind) -> Result<Option<String>> {
        let row = self.store.query_one(
            "SELECT credentials FROM sync_config WHERE provider = ?1",
            &[&kind.as_str()],
        )?;
        Ok(row
            .and_then(|r| r.json_opt("credentials"))
            .and_then(|c| {
                c.get("sync_token")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }))
    }

    fn save_sync_token(&self, kind: ProviderKind, token: &str) -> Result<()> {
        let row = self.store.query_one(
            "SELECT credentials FROM sync_config WHERE provider = ?1",
            &[&kind.as_str()],
        )?;
        let mut credentials = row
            .and_then(|r| r.json_opt("credentials"))
            .unwrap_or_else(|| json!({}));
        credentials["sync_token"] = json!(token);

        self.store.exec(
            "UPDATE sync_config SET credentials = ?1, last_sync = ?2, updated_at = ?2
             WHERE provider = ?3",
            &[&credentials.to_string(), &now_rfc3339(), &kind.as_str()],
        )?;
        Ok(())
    }

    fn touch_last_sync(&self, kind: ProviderKind) -> Result<()> {
        self.store.exec(
            "UPDATE sync_config SET last_sync = ?1, updated_at = ?1 WHERE provider = ?2",
            &[&now_rfc3339(), &kind.as_str()],
        )?;
        Ok(())
    }

    /// One sync_log row per non-zero statistic.
    fn log_sync(&self, kind: ProviderKind, stats: &SyncStats) {
        let entries = [
            ("pulled", stats.pulled),
            ("pushed", stats.pushed),
            ("deleted", stats.deleted),
            ("conflicts", stats.conflicts),
            ("errors", stats.errors),
        ];
        for (action, count) in entries {
            if count == 0 {
                continue;
            }
            let status = if action == "errors" { "error" } else { "success" };
            let details = json!({"count": count}).to_string();
            if let Err(e) = self.store.exec(
                "INSERT INTO sync_log (provider, direction, action, status, details, created_at)
                 VALUES (?1, 'sync', ?2, ?3, ?4, ?5)",
                &[&kind.as_str(), &action, &status, &details, &now_rfc3339()],
            ) {
                warn!(error = %e, "sync_log write failed");
            }
        }
    }
}

enum RemoteOutcome {
    Pulled,
    Conflict,
    NoOp,
}

fn display_name(contact: &Contact) -> String {
    let full = contact.full_name();
    if full.is_empty() {
        "Unbekannt".to_string()
    } else {
        full
    }
}

fn contact_from_row(row: Row) -> Contact {
    let important_dates: Vec<ImportantDate> = row
        .json_opt("important_dates")
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let parse_ts = |key: &str| {
        row.str_opt(key)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.to_utc())
    };

    Contact {
        id: row.i64_opt("id"),
        first_name: row.str_or("first_name", ""),
        middle_name: row.str_opt("middle_name").map(str::to_string),
        last_name: row.str_or("last_name", ""),
        phone: row.str_opt("phone").map(str::to_string),
        email: row.str_opt("email").map(str::to_string),
        street: row.str_opt("street").map(str::to_string),
        house_nr: row.str_opt("house_nr").map(str::to_string),
        zip: row.str_opt("zip").map(str::to_string),
        city: row.str_opt("city").map(str::to_string),
        country: row.str_opt("country").map(str::to_string),
        important_dates,
        last_contact: row.str_opt("last_contact").map(str::to_string),
        context: row.str_opt("context").map(str::to_string),
        created_at: parse_ts("created_at"),
        updated_at: parse_ts("updated_at"),
        icloud_uid: row.str_opt("icloud_uid").map(str::to_string),
        google_uid: row.str_opt("google_uid").map(str::to_string),
        nextcloud_uid: row.str_opt("nextcloud_uid").map(str::to_string),
        sync_etag: row.str_opt("sync_etag").map(str::to_string),
    }
}

/// Upsert events pulled from CalDAV into calendar_events, keyed by UID.
/// Returns the number of events written.
pub async fn sync_calendar(
    store: &Store,
    provider: &ICloudCalendarProvider,
    write_calendar_id: Option<&str>,
    start: &str,
    end: &str,
) -> Result<usize> {
    let calendars = provider.list_calendars().await?;
    info!(count = calendars.len(), "calendars discovered");

    let mut total = 0;
    for calendar in &calendars {
        let events = match provider.pull_events(calendar, Some(start), Some(end)).await {
            Ok(events) => events,
            Err(e) => {
                error!(calendar = %calendar.name, error = %e, "calendar pull failed");
                continue;
            }
        };
        info!(calendar = %calendar.name, count = events.len(), "events pulled");

        for event in events {
            let Some(ref uid) = event.uid else { continue };
            let start_time = event.start_time.map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string());
            let end_time = event.end_time.map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string());
            let now = now_rfc3339();

            let existing = store.query_one(
                "SELECT id FROM calendar_events WHERE icloud_uid = ?1",
                &[&uid],
            )?;
            let result = match existing {
                Some(_) => store.exec(
                    "UPDATE calendar_events
                     SET title = ?1, start_time = ?2, end_time = ?3, all_day = ?4,
                         location = ?5, description = ?6, recurrence = ?7, etag = ?8,
                         updated_at = ?9
                     WHERE icloud_uid = ?10",
                    &[
                        &event.title,
                        &start_time,
                        &end_time,
                        &(event.all_day as i64),
                        &event.location,
                        &event.description,
                        &event.recurrence,
                        &event.etag,
                        &now,
                        &uid,
                    ],
                ),
                None => store.exec(
                    "INSERT INTO calendar_events
                     (title, start_time, end_time, all_day, location, description,
                      recurrence, etag, icloud_uid, calendar_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                    &[
                        &event.title,
                        &start_time,
                        &end_time,
                        &(event.all_day as i64),
                        &event.location,
                        &event.description,
                        &event.recurrence,
                        &event.etag,
                        &uid,
                        &write_calendar_id,
                        &now,
                    ],
                ),
            };
            match result {
                Ok(_) => total += 1,
                Err(e) => error!(uid, error = %e, "event upsert failed"),
            }
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_service() -> SyncService {
        let store = Store::open_in_memory().unwrap();
        store
            .exec(
                "INSERT INTO sync_config (provider, enabled, credentials, created_at, updated_at)
                 VALUES ('nextcloud', 1, '{}', ?1, ?1)",
                &[&now_rfc3339()],
            )
            .unwrap();
        SyncService::new(store)
    }

    fn remote(last_name: &str, uid: &str) -> Contact {
        Contact {
            first_name: "Max".into(),
            last_name: last_name.into(),
            nextcloud_uid: Some(uid.into()),
            updated_at: Some(chrono::Utc::now()),
            ..Default::default()
        }
    }

    #[test]
    fn remote_contact_without_local_row_is_inserted_synced() {
        let service = seeded_service();
        let outcome = service
            .apply_remote_contact(ProviderKind::Nextcloud, &remote("Mustermann", "nc-1"))
            .unwrap();
        assert!(matches!(outcome, RemoteOutcome::Pulled));

        let row = service
            .store
            .query_one("SELECT * FROM people WHERE nextcloud_uid = 'nc-1'", &[])
            .unwrap()
            .unwrap();
        assert_eq!(row.str_opt("sync_status"), Some("synced"));
        assert_eq!(row.str_opt("name"), Some("Max Mustermann"));
    }

    #[test]
    fn newer_remote_updates_the_local_row() {
        let service = seeded_service();
        service
            .apply_remote_contact(ProviderKind::Nextcloud, &remote("Mustermann", "nc-1"))
            .unwrap();
        // Age the local row so the remote is strictly newer.
        service
            .store
            .exec(
                "UPDATE people SET updated_at = '2020-01-01T00:00:00+00:00'",
                &[],
            )
            .unwrap();

        let outcome = service
            .apply_remote_contact(ProviderKind::Nextcloud, &remote("Mueller", "nc-1"))
            .unwrap();
        assert!(matches!(outcome, RemoteOutcome::Pulled));

        let row = service
            .store
            .query_one("SELECT last_name FROM people WHERE nextcloud_uid = 'nc-1'", &[])
            .unwrap()
            .unwrap();
        assert_eq!(row.str_opt("last_name"), Some("Mueller"));
    }

    #[test]
    fn older_remote_is_a_conflict_kept_for_push() {
        let service = seeded_service();
        service
            .apply_remote_contact(ProviderKind::Nextcloud, &remote("Mustermann", "nc-1"))
            .unwrap();

        let mut stale = remote("Mueller", "nc-1");
        stale.updated_at = Some(
            DateTime::parse_from_rfc3339("2020-01-01T00:00:00+00:00")
                .unwrap()
                .to_utc(),
        );
        let outcome = service
            .apply_remote_contact(ProviderKind::Nextcloud, &stale)
            .unwrap();
        assert!(matches!(outcome, RemoteOutcome::Conflict));

        let row = service
            .store
            .query_one("SELECT last_name FROM people WHERE nextcloud_uid = 'nc-1'", &[])
            .unwrap()
            .unwrap();
        assert_eq!(row.str_opt("last_name"), Some("Mustermann"));
    }

    #[test]
    fn remote_delete_soft_deletes_with_status() {
        let service = seeded_service();
        service
            .apply_remote_contact(ProviderKind::Nextcloud, &remote("Mustermann", "nc-1"))
            .unwrap();

        assert!(service
            .apply_remote_delete(ProviderKind::Nextcloud, "nc-1")
            .unwrap());
        // Applying again is a no-op.
        assert!(!service
            .apply_remote_delete(ProviderKind::Nextcloud, "nc-1")
            .unwrap());

        let row = service
            .store
            .query_one(
                "SELECT sync_status, deleted_at FROM people WHERE nextcloud_uid = 'nc-1'",
                &[],
            )
            .unwrap()
            .unwrap();
        assert_eq!(row.str_opt("sync_status"), Some("deleted"));
        assert!(row.str_opt("deleted_at").is_some());
    }

    #[test]
    fn pending_selection_covers_new_and_flagged_rows() {
        let service = seeded_service();
        let now = now_rfc3339();
        // Never pushed to nextcloud.
        service
            .store
            .exec(
                "INSERT INTO people (name, first_name, last_name, sync_status, created_at, updated_at)
                 VALUES ('Anna Neu', 'Anna', 'Neu', 'synced', ?1, ?1)",
                &[&now],
            )
            .unwrap();
        // Pushed before but flagged pending.
        service
            .store
            .exec(
                "INSERT INTO people (name, first_name, last_name, nextcloud_uid, sync_status, created_at, updated_at)
                 VALUES ('Ben Alt', 'Ben', 'Alt', 'nc-9', 'pending', ?1, ?1)",
                &[&now],
            )
            .unwrap();
        // Synced and known: not pending.
        service
            .store
            .exec(
                "INSERT INTO people (name, first_name, last_name, nextcloud_uid, sync_status, created_at, updated_at)
                 VALUES ('Cara Fertig', 'Cara', 'Fertig', 'nc-10', 'synced', ?1, ?1)",
                &[&now],
            )
            .unwrap();

        let pending = service.pending_contacts(ProviderKind::Nextcloud).unwrap();
        let names: Vec<&str> = pending.iter().map(|c| c.first_name.as_str()).collect();
        assert_eq!(names, vec!["Anna", "Ben"]);
    }

    #[test]
    fn sync_token_round_trips_through_credentials() {
        let service = seeded_service();
        assert!(service.load_sync_token(ProviderKind::Nextcloud).unwrap().is_none());

        service
            .save_sync_token(ProviderKind::Nextcloud, "http://sync/42")
            .unwrap();
        assert_eq!(
            service.load_sync_token(ProviderKind::Nextcloud).unwrap().as_deref(),
            Some("http://sync/42")
        );

        let row = service
            .store
            .query_one("SELECT last_sync FROM sync_config WHERE provider = 'nextcloud'", &[])
            .unwrap()
            .unwrap();
        assert!(row.str_opt("last_sync").is_some());
    }

    #[test]
    fn sync_log_gets_one_row_per_nonzero_stat() {
        let service = seeded_service();
        let stats = SyncStats {
            pulled: 3,
            pushed: 0,
            deleted: 1,
            conflicts: 0,
            errors: 0,
        };
        service.log_sync(ProviderKind::Nextcloud, &stats);

        let rows = service
            .store
            .query("SELECT action FROM sync_log ORDER BY action", &[])
            .unwrap();
        let actions: Vec<&str> = rows.iter().filter_map(|r| r.str_opt("action")).collect();
        assert_eq!(actions, vec!["deleted", "pulled"]);
    }
}
