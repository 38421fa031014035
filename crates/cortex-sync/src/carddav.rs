//! Generic CardDAV adapter (Nextcloud-style servers).
//!
//! The collection URL is computed from the server root and username; the
//! server supports sync-collection, so incremental pulls ride on the
//! collection-level sync-token.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::contact::{ChangeSet, Contact, ProviderKind, SyncProvider};
use crate::dav::{
    self, parse_multistatus, DavClient, AUTH_TIMEOUT, ITEM_TIMEOUT, REPORT_TIMEOUT,
};
use crate::error::{Result, SyncError};
use crate::vcard;

pub struct NextcloudProvider {
    dav: Option<DavClient>,
    base_url: Option<String>,
}

impl NextcloudProvider {
    pub fn new() -> Self {
        Self {
            dav: None,
            base_url: None,
        }
    }

    fn client(&self) -> Result<(&DavClient, &str)> {
        match (&self.dav, &self.base_url) {
            (Some(dav), Some(base)) => Ok((dav, base.as_str())),
            _ => Err(SyncError::NotAuthenticated),
        }
    }

    /// Current collection-level sync token via PROPFIND.
    async fn fetch_sync_token(&self) -> Result<Option<String>> {
        let (dav, base) = self.client()?;
        let (status, body) = dav
            .request(
                "PROPFIND",
                base,
                Some("0"),
                Some(dav::PROPFIND_SYNC_TOKEN.to_string()),
                "application/xml",
                AUTH_TIMEOUT,
            )
            .await?;
        if status != 207 {
            return Ok(None);
        }
        Ok(parse_multistatus(&body)?.sync_token)
    }

    fn entry_to_contact(entry: &crate::dav::DavEntry) -> Option<Contact> {
        let data = entry.address_data.as_deref()?;
        let mut contact = match vcard::parse(data) {
            Ok(contact) => contact,
            Err(e) => {
                warn!(error = %e, "skipping invalid vCard");
                return None;
            }
        };
        if let Some(uid) = vcard::extract_uid(data) {
            contact.nextcloud_uid = Some(uid);
        } else if let Some(href) = entry.href.as_deref() {
            contact.nextcloud_uid = Some(dav::uid_from_href(href, ".vcf"));
        }
        contact.sync_etag = entry.etag.clone();
        Some(contact)
    }
}

impl Default for NextcloudProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncProvider for NextcloudProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Nextcloud
    }

    async fn authenticate(&mut self, credentials: &Value) -> Result<()> {
        let server_url = required(credentials, "server_url")?;
        let username = required(credentials, "username")?;
        let password = required(credentials, "password")?;

        let base = format!(
            "{}/remote.php/dav/addressbooks/users/{}/contacts/",
            server_url.trim_end_matches('/'),
            username
        );
        let dav = DavClient::new(username, password);

        let (status, _) = dav
            .request("PROPFIND", &base, Some("0"), None, "application/xml", AUTH_TIMEOUT)
            .await?;
        if status == 401 {
            return Err(SyncError::Auth {
                provider: "nextcloud".into(),
            });
        }
        if !matches!(status, 200 | 207) {
            return Err(SyncError::Status {
                operation: "PROPFIND collection".into(),
                status,
            });
        }

        info!(collection = %base, "nextcloud authenticated");
        self.dav = Some(dav);
        self.base_url = Some(base);
        Ok(())
    }

    async fn pull_contacts(&self) -> Result<Vec<Contact>> {
        let (dav, base) = self.client()?;
        let (status, body) = dav
            .request(
                "REPORT",
                base,
                Some("1"),
                Some(dav::REPORT_ADDRESSBOOK_QUERY.to_string()),
                "application/xml",
                REPORT_TIMEOUT,
            )
            .await?;
        if status != 207 {
            return Err(SyncError::Status {
                operation: "REPORT addressbook-query".into(),
                status,
            });
        }

        let parsed = parse_multistatus(&body)?;
        Ok(parsed
            .entries
            .iter()
            .filter_map(Self::entry_to_contact)
            .collect())
    }

    async fn push_contact(&self, contact: &Contact) -> Result<String> {
        let (dav, base) = self.client()?;

        let uid = contact
            .nextcloud_uid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut to_send = contact.clone();
        to_send.nextcloud_uid = Some(uid.clone());

        let card = vcard::serialize(&to_send, Some(ProviderKind::Nextcloud));
        let url = format!("{base}{uid}.vcf");
        let (status, _) = dav
            .request("PUT", &url, None, Some(card), "text/vcard", ITEM_TIMEOUT)
            .await?;

        if matches!(status, 200 | 201 | 204) {
            Ok(uid)
        } else {
            Err(SyncError::Status {
                operation: "PUT contact".into(),
                status,
            })
        }
    }

    async fn delete_contact(&self, uid: &str) -> Result<bool> {
        let (dav, base) = self.client()?;
        let url = format!("{base}{uid}.vcf");
        let (status, _) = dav
            .request("DELETE", &url, None, None, "text/vcard", ITEM_TIMEOUT)
            .await?;
        Ok(matches!(status, 200 | 204))
    }

    async fn changes_since(&self, sync_token: Option<&str>) -> Result<ChangeSet> {
        let Some(token) = sync_token else {
            // Initial sync: everything counts as created.
            let created = self.pull_contacts().await?;
            let sync_token = self.fetch_sync_token().await?;
            return Ok(ChangeSet {
                created,
                sync_token,
                ..Default::default()
            });
        };

        let (dav, base) = self.client()?;
        let (status, body) = dav
            .request(
                "REPORT",
                base,
                None,
                Some(dav::report_sync_collection(token)),
                "application/xml",
                REPORT_TIMEOUT,
            )
            .await?;
        if status != 207 {
            return Err(SyncError::Status {
                operation: "REPORT sync-collection".into(),
                status,
            });
        }

        let parsed = parse_multistatus(&body)?;
        let mut changes = ChangeSet {
            sync_token: parsed.sync_token.clone(),
            ..Default::default()
        };

        for entry in &parsed.entries {
            if entry.is_deleted() {
                if let Some(href) = entry.href.as_deref() {
                    changes.deleted.push(dav::uid_from_href(href, ".vcf"));
                }
            } else if let Some(contact) = Self::entry_to_contact(entry) {
                changes.created.push(contact);
            }
        }

        Ok(changes)
    }
}

fn required<'a>(credentials: &'a Value, key: &str) -> Result<&'a str> {
    credentials
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SyncError::MissingCredential(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_credentials_are_rejected() {
        let mut provider = NextcloudProvider::new();
        let err = provider
            .authenticate(&json!({"server_url": "https://cloud.example.org"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingCredential(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn operations_require_authentication() {
        let provider = NextcloudProvider::new();
        assert!(matches!(
            provider.pull_contacts().await.unwrap_err(),
            SyncError::NotAuthenticated
        ));
    }
}
