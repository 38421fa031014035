//! Apple CardDAV adapter.
//!
//! Auth is Apple ID plus an app-specific password (hyphens and spaces are
//! stripped). The addressbook is found by walking current-user-principal →
//! addressbook-home-set → the collection whose resourcetype is addressbook.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::contact::{ChangeSet, Contact, ProviderKind, SyncProvider};
use crate::dav::{
    self, absolutize, parse_multistatus, DavClient, AUTH_TIMEOUT, ITEM_TIMEOUT, REPORT_TIMEOUT,
};
use crate::error::{Result, SyncError};
use crate::vcard;

const CARDDAV_URL: &str = "https://contacts.icloud.com";

pub struct ICloudProvider {
    dav: Option<DavClient>,
    home_url: Option<String>,
    /// Discovered addressbook collection, cached per session.
    addressbook_url: Mutex<Option<String>>,
}

impl ICloudProvider {
    pub fn new() -> Self {
        Self {
            dav: None,
            home_url: None,
            addressbook_url: Mutex::new(None),
        }
    }

    fn dav(&self) -> Result<&DavClient> {
        self.dav.as_ref().ok_or(SyncError::NotAuthenticated)
    }

    /// Find the addressbook collection under the home set.
    async fn addressbook_url(&self) -> Result<String> {
        if let Some(url) = self.addressbook_url.lock().unwrap().clone() {
            return Ok(url);
        }

        let dav = self.dav()?;
        let home = self.home_url.as_deref().ok_or(SyncError::NotAuthenticated)?;

        let (status, body) = dav
            .request(
                "PROPFIND",
                home,
                Some("1"),
                Some(dav::PROPFIND_RESOURCETYPE.to_string()),
                "application/xml; charset=utf-8",
                AUTH_TIMEOUT,
            )
            .await?;
        if status != 207 {
            return Err(SyncError::Status {
                operation: "PROPFIND addressbooks".into(),
                status,
            });
        }

        let parsed = parse_multistatus(&body)?;
        let url = parsed
            .entries
            .iter()
            .find(|entry| entry.is_addressbook)
            .and_then(|entry| entry.href.as_deref())
            .map(|href| absolutize(CARDDAV_URL, href))
            .ok_or_else(|| SyncError::Xml("no addressbook collection found".into()))?;

        info!(addressbook = %url, "icloud addressbook discovered");
        *self.addressbook_url.lock().unwrap() = Some(url.clone());
        Ok(url)
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
            contact.icloud_uid = Some(uid);
        } else if let Some(href) = entry.href.as_deref() {
            contact.icloud_uid = Some(dav::uid_from_href(href, ".vcf"));
        }
        contact.sync_etag = entry.etag.clone();
        Some(contact)
    }
}

impl Default for ICloudProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncProvider for ICloudProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Icloud
    }

    async fn authenticate(&mut self, credentials: &Value) -> Result<()> {
        let apple_id = required(credentials, "apple_id")?.trim().to_string();
        let app_password = required(credentials, "app_password")?
            .replace(['-', ' '], "")
            .trim()
            .to_string();

        let dav = DavClient::new(apple_id, app_password);
        let home = discover_home(&dav, CARDDAV_URL, dav::PROPFIND_ADDRESSBOOK_HOME, "icloud").await?;

        self.dav = Some(dav);
        self.home_url = Some(home);
        *self.addressbook_url.lock().unwrap() = None;
        Ok(())
    }

    async fn pull_contacts(&self) -> Result<Vec<Contact>> {
        let dav = self.dav()?;
        let addressbook = self.addressbook_url().await?;

        let (status, body) = dav
            .request(
                "REPORT",
                &addressbook,
                Some("1"),
                Some(dav::REPORT_ADDRESSBOOK_QUERY.to_string()),
                "application/xml; charset=utf-8",
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
        let dav = self.dav()?;
        let addressbook = self.addressbook_url().await?;

        let uid = contact
            .icloud_uid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut to_send = contact.clone();
        to_send.icloud_uid = Some(uid.clone());

        let card = vcard::serialize(&to_send, Some(ProviderKind::Icloud));
        let url = format!("{addressbook}{uid}.vcf");
        let (status, _) = dav
            .request(
                "PUT",
                &url,
                None,
                Some(card),
                "text/vcard; charset=utf-8",
                ITEM_TIMEOUT,
            )
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
        let dav = self.dav()?;
        let addressbook = self.addressbook_url().await?;
        let url = format!("{addressbook}{uid}.vcf");
        let (status, _) = dav
            .request("DELETE", &url, None, None, "text/vcard", ITEM_TIMEOUT)
            .await?;
        Ok(matches!(status, 200 | 204))
    }

    /// The service has no usable sync-collection for contacts; every run is
    /// a full pull matched by UID downstream.
    async fn changes_since(&self, _sync_token: Option<&str>) -> Result<ChangeSet> {
        let created = self.pull_contacts().await?;
        Ok(ChangeSet {
            created,
            ..Default::default()
        })
    }
}

/// Walk current-user-principal → home-set property. Shared with the CalDAV
/// adapter, which passes its own service URL and home-set body.
pub(crate) async fn discover_home(
    dav: &DavClient,
    service_url: &str,
    home_body: &str,
    provider: &str,
) -> Result<String> {
    let (status, body) = dav
        .request(
            "PROPFIND",
            service_url,
            Some("0"),
            Some(dav::PROPFIND_PRINCIPAL.to_string()),
            "application/xml; charset=utf-8",
            AUTH_TIMEOUT,
        )
        .await?;
    if status == 401 {
        return Err(SyncError::Auth {
            provider: provider.into(),
        });
    }
    if !matches!(status, 200 | 207) {
        return Err(SyncError::Status {
            operation: "PROPFIND principal".into(),
            status,
        });
    }

    let principal = parse_multistatus(&body)?
        .entries
        .iter()
        .find_map(|entry| entry.principal.clone())
        .ok_or_else(|| SyncError::Xml("no current-user-principal".into()))?;
    let principal_url = absolutize(service_url, &principal);

    let (status, body) = dav
        .request(
            "PROPFIND",
            &principal_url,
            Some("0"),
            Some(home_body.to_string()),
            "application/xml; charset=utf-8",
            AUTH_TIMEOUT,
        )
        .await?;
    if !matches!(status, 200 | 207) {
        return Err(SyncError::Status {
            operation: "PROPFIND home-set".into(),
            status,
        });
    }

    let home = parse_multistatus(&body)?
        .entries
        .iter()
        .find_map(|entry| entry.home_set.clone())
        .ok_or_else(|| SyncError::Xml("no home-set href".into()))?;
    Ok(absolutize(service_url, &home))
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
    async fn app_password_credentials_are_required() {
        let mut provider = ICloudProvider::new();
        let err = provider
            .authenticate(&json!({"apple_id": "max@icloud.com"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingCredential(_)));
    }

    #[tokio::test]
    async fn unauthenticated_operations_fail_fast() {
        let provider = ICloudProvider::new();
        assert!(matches!(
            provider.pull_contacts().await.unwrap_err(),
            SyncError::NotAuthenticated
        ));
    }
}
