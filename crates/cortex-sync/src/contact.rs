//! Shared sync data structures and the provider interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// The contact-sync providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Icloud,
    Google,
    Nextcloud,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] =
        [ProviderKind::Icloud, ProviderKind::Google, ProviderKind::Nextcloud];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Icloud => "icloud",
            ProviderKind::Google => "google",
            ProviderKind::Nextcloud => "nextcloud",
        }
    }

    /// The people column that stores this provider's UID.
    pub fn uid_column(&self) -> &'static str {
        match self {
            ProviderKind::Icloud => "icloud_uid",
            ProviderKind::Google => "google_uid",
            ProviderKind::Nextcloud => "nextcloud_uid",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "icloud" => Ok(ProviderKind::Icloud),
            "google" => Ok(ProviderKind::Google),
            "nextcloud" => Ok(ProviderKind::Nextcloud),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// A typed important date, e.g. `{"type": "birthday", "date": "1990-05-15"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportantDate {
    #[serde(rename = "type")]
    pub kind: String,
    pub date: String,
}

/// Contact as it travels between the store and the providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contact {
    pub id: Option<i64>,

    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,

    pub phone: Option<String>,
    pub email: Option<String>,

    pub street: Option<String>,
    pub house_nr: Option<String>,
    pub zip: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,

    #[serde(default)]
    pub important_dates: Vec<ImportantDate>,
    pub last_contact: Option<String>,
    pub context: Option<String>,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,

    pub icloud_uid: Option<String>,
    pub google_uid: Option<String>,
    pub nextcloud_uid: Option<String>,
    pub sync_etag: Option<String>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.first_name.is_empty() {
            parts.push(&self.first_name);
        }
        if let Some(ref middle) = self.middle_name {
            if !middle.is_empty() {
                parts.push(middle);
            }
        }
        if !self.last_name.is_empty() {
            parts.push(&self.last_name);
        }
        parts.join(" ")
    }

    pub fn uid_for(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::Icloud => self.icloud_uid.as_deref(),
            ProviderKind::Google => self.google_uid.as_deref(),
            ProviderKind::Nextcloud => self.nextcloud_uid.as_deref(),
        }
    }

    pub fn set_uid(&mut self, provider: ProviderKind, uid: impl Into<String>) {
        let uid = Some(uid.into());
        match provider {
            ProviderKind::Icloud => self.icloud_uid = uid,
            ProviderKind::Google => self.google_uid = uid,
            ProviderKind::Nextcloud => self.nextcloud_uid = uid,
        }
    }
}

/// Delta since the last sync. Adapters that cannot distinguish created from
/// updated put everything into `created`; the service matches by UID anyway.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub created: Vec<Contact>,
    pub updated: Vec<Contact>,
    /// Provider UIDs of deleted contacts.
    pub deleted: Vec<String>,
    pub sync_token: Option<String>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.created.is_empty() || !self.updated.is_empty() || !self.deleted.is_empty()
    }
}

/// A contact-sync provider adapter.
#[async_trait]
pub trait SyncProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Authenticate against the provider. Must be called before any other
    /// operation; returns `SyncError::Auth` on bad credentials.
    async fn authenticate(&mut self, credentials: &Value) -> Result<()>;

    /// Full pull of all contacts.
    async fn pull_contacts(&self) -> Result<Vec<Contact>>;

    /// Create or update one contact; returns its provider UID.
    async fn push_contact(&self, contact: &Contact) -> Result<String>;

    /// Delete by provider UID. Returns false when the contact is gone already.
    async fn delete_contact(&self, uid: &str) -> Result<bool>;

    /// Changes since `sync_token` (None means initial full sync).
    async fn changes_since(&self, sync_token: Option<&str>) -> Result<ChangeSet>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_skips_empty_parts() {
        let contact = Contact {
            first_name: "Max".into(),
            middle_name: Some("Peter".into()),
            last_name: "Mustermann".into(),
            ..Default::default()
        };
        assert_eq!(contact.full_name(), "Max Peter Mustermann");

        let contact = Contact {
            first_name: "Max".into(),
            ..Default::default()
        };
        assert_eq!(contact.full_name(), "Max");
    }

    #[test]
    fn uid_accessors_match_provider() {
        let mut contact = Contact::default();
        contact.set_uid(ProviderKind::Google, "people/c1");
        assert_eq!(contact.uid_for(ProviderKind::Google), Some("people/c1"));
        assert_eq!(contact.uid_for(ProviderKind::Icloud), None);
    }
}
