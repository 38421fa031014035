//! Google People API adapter.
//!
//! OAuth 2.0 with a stored refresh token; expired access tokens are
//! refreshed transparently. Pulls walk `people/me/connections` with a
//! person-field projection; incremental sync rides on `syncToken`.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::contact::{ChangeSet, Contact, ImportantDate, ProviderKind, SyncProvider};
use crate::error::{Result, SyncError};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://people.googleapis.com/v1";
const PERSON_FIELDS: &str = "names,phoneNumbers,emailAddresses,addresses,birthdays,metadata";
const UPDATE_FIELDS: &str = "names,phoneNumbers,emailAddresses,addresses,birthdays";
const PAGE_SIZE: u32 = 100;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

struct OAuthCredentials {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

pub struct GoogleProvider {
    client: reqwest::Client,
    token_url: String,
    api_base: String,
    credentials: Option<OAuthCredentials>,
    access_token: Mutex<Option<String>>,
}

impl GoogleProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: TOKEN_URL.to_string(),
            api_base: API_BASE.to_string(),
            credentials: None,
            access_token: Mutex::new(None),
        }
    }

    async fn refresh_access_token(&self) -> Result<String> {
        let creds = self.credentials.as_ref().ok_or(SyncError::NotAuthenticated)?;

        let response = self
            .client
            .post(&self.token_url)
            .timeout(HTTP_TIMEOUT)
            .form(&[
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("refresh_token", creds.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::Auth {
                provider: "google".into(),
            });
        }

        let body: Value = response.json().await.map_err(SyncError::Network)?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or(SyncError::Auth {
                provider: "google".into(),
            })?
            .to_string();

        *self.access_token.lock().unwrap() = Some(token.clone());
        debug!("google access token refreshed");
        Ok(token)
    }

    async fn bearer(&self) -> Result<String> {
        let cached = self.access_token.lock().unwrap().clone();
        match cached {
            Some(token) => Ok(token),
            None => self.refresh_access_token().await,
        }
    }

    /// One API call, re-authenticating once on a 401.
    async fn api_request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<(u16, Value)> {
        let mut token = self.bearer().await?;

        for attempt in 0..2 {
            let mut builder = self
                .client
                .request(method.clone(), url)
                .bearer_auth(&token)
                .timeout(HTTP_TIMEOUT);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();

            if status == 401 && attempt == 0 {
                token = self.refresh_access_token().await?;
                continue;
            }

            let payload: Value = response.json().await.unwrap_or(Value::Null);
            return Ok((status, payload));
        }
        unreachable!("second attempt always returns");
    }

    async fn pull_page(
        &self,
        page_token: Option<&str>,
        sync_token: Option<&str>,
    ) -> Result<(u16, Value)> {
        let mut url = format!(
            "{}/people/me/connections?personFields={}&pageSize={}&requestSyncToken=true",
            self.api_base, PERSON_FIELDS, PAGE_SIZE
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={token}"));
        }
        if let Some(token) = sync_token {
            url.push_str(&format!("&syncToken={token}"));
        }
        self.api_request(reqwest::Method::GET, &url, None).await
    }

    async fn walk_connections(&self, sync_token: Option<&str>) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        let mut page_token: Option<String> = None;

        loop {
            let (status, body) = self.pull_page(page_token.as_deref(), sync_token).await?;
            if status == 410 {
                // Expired sync token: the caller restarts with a full sync.
                info!("google sync token expired, falling back to full sync");
                return Box::pin(self.walk_connections(None)).await;
            }
            if status != 200 {
                return Err(SyncError::Status {
                    operation: "connections.list".into(),
                    status,
                });
            }

            for person in body
                .get("connections")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let deleted = person
                    .pointer("/metadata/deleted")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let resource = person
                    .get("resourceName")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if deleted {
                    if !resource.is_empty() {
                        changes.deleted.push(resource);
                    }
                } else if let Some(contact) = person_to_contact(person) {
                    changes.created.push(contact);
                }
            }

            if let Some(token) = body.get("nextSyncToken").and_then(Value::as_str) {
                changes.sync_token = Some(token.to_string());
            }

            match body.get("nextPageToken").and_then(Value::as_str) {
                Some(next) => page_token = Some(next.to_string()),
                None => break,
            }
        }

        Ok(changes)
    }
}

impl Default for GoogleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncProvider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn authenticate(&mut self, credentials: &Value) -> Result<()> {
        let get = |key: &str| -> Result<String> {
            credentials
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| SyncError::MissingCredential(key.to_string()))
        };

        self.credentials = Some(OAuthCredentials {
            client_id: get("client_id")?,
            client_secret: get("client_secret")?,
            refresh_token: get("refresh_token")?,
        });
        self.refresh_access_token().await?;
        info!("google authenticated");
        Ok(())
    }

    async fn pull_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.walk_connections(None).await?.created)
    }

    async fn push_contact(&self, contact: &Contact) -> Result<String> {
        let mut person = contact_to_person(contact);

        match contact.google_uid.as_deref() {
            Some(resource) => {
                // Updates need the current etag.
                let (status, current) = self
                    .api_request(
                        reqwest::Method::GET,
                        &format!("{}/{}?personFields=metadata", self.api_base, resource),
                        None,
                    )
                    .await?;
                if status != 200 {
                    return Err(SyncError::Status {
                        operation: "people.get".into(),
                        status,
                    });
                }
                if let Some(etag) = current.get("etag") {
                    person["etag"] = etag.clone();
                }

                let url = format!(
                    "{}/{}:updateContact?updatePersonFields={}",
                    self.api_base, resource, UPDATE_FIELDS
                );
                let (status, body) = self
                    .api_request(reqwest::Method::PATCH, &url, Some(&person))
                    .await?;
                if status != 200 {
                    return Err(SyncError::Status {
                        operation: "updateContact".into(),
                        status,
                    });
                }
                Ok(body
                    .get("resourceName")
                    .and_then(Value::as_str)
                    .unwrap_or(resource)
                    .to_string())
            }
            None => {
                let url = format!("{}/people:createContact", self.api_base);
                let (status, body) = self
                    .api_request(reqwest::Method::POST, &url, Some(&person))
                    .await?;
                if status != 200 {
                    return Err(SyncError::Status {
                        operation: "createContact".into(),
                        status,
                    });
                }
                body.get("resourceName")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| SyncError::Xml("createContact returned no resourceName".into()))
            }
        }
    }

    async fn delete_contact(&self, uid: &str) -> Result<bool> {
        let url = format!("{}/{}:deleteContact", self.api_base, uid);
        let (status, _) = self.api_request(reqwest::Method::DELETE, &url, None).await?;
        match status {
            200 | 204 => Ok(true),
            404 => Ok(false),
            status => Err(SyncError::Status {
                operation: "deleteContact".into(),
                status,
            }),
        }
    }

    async fn changes_since(&self, sync_token: Option<&str>) -> Result<ChangeSet> {
        self.walk_connections(sync_token).await
    }
}

/// Map one People API person resource to a Contact.
fn person_to_contact(person: &Value) -> Option<Contact> {
    let resource = person.get("resourceName").and_then(Value::as_str)?;

    let mut contact = Contact {
        google_uid: Some(resource.to_string()),
        sync_etag: person
            .get("etag")
            .and_then(Value::as_str)
            .map(str::to_string),
        ..Default::default()
    };

    if let Some(name) = person.pointer("/names/0") {
        contact.first_name = name
            .get("givenName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        contact.last_name = name
            .get("familyName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        contact.middle_name = name
            .get("middleName")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
    }

    contact.phone = person
        .pointer("/phoneNumbers/0/value")
        .and_then(Value::as_str)
        .map(str::to_string);
    contact.email = person
        .pointer("/emailAddresses/0/value")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(address) = person.pointer("/addresses/0") {
        contact.street = address
            .get("streetAddress")
            .and_then(Value::as_str)
            .map(str::to_string);
        contact.city = address.get("city").and_then(Value::as_str).map(str::to_string);
        contact.zip = address
            .get("postalCode")
            .and_then(Value::as_str)
            .map(str::to_string);
        contact.country = address
            .get("country")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    if let Some(date) = person.pointer("/birthdays/0/date") {
        let (y, m, d) = (
            date.get("year").and_then(Value::as_i64),
            date.get("month").and_then(Value::as_i64),
            date.get("day").and_then(Value::as_i64),
        );
        if let (Some(m), Some(d)) = (m, d) {
            let date = match y {
                Some(y) => format!("{y:04}-{m:02}-{d:02}"),
                None => format!("--{m:02}-{d:02}"),
            };
            contact.important_dates.push(ImportantDate {
                kind: "birthday".into(),
                date,
            });
        }
    }

    Some(contact)
}

/// Map a Contact to the People API person body.
fn contact_to_person(contact: &Contact) -> Value {
    let mut person = json!({
        "names": [{
            "givenName": contact.first_name,
            "familyName": contact.last_name,
        }],
    });
    if let Some(ref middle) = contact.middle_name {
        person["names"][0]["middleName"] = json!(middle);
    }
    if let Some(ref phone) = contact.phone {
        person["phoneNumbers"] = json!([{"value": phone}]);
    }
    if let Some(ref email) = contact.email {
        person["emailAddresses"] = json!([{"value": email}]);
    }

    let has_address = contact.street.is_some() || contact.city.is_some() || contact.zip.is_some();
    if has_address {
        let street = match (&contact.street, &contact.house_nr) {
            (Some(street), Some(nr)) => Some(format!("{street} {nr}")),
            (Some(street), None) => Some(street.clone()),
            _ => None,
        };
        person["addresses"] = json!([{
            "streetAddress": street,
            "city": contact.city,
            "postalCode": contact.zip,
            "country": contact.country,
        }]);
    }

    if let Some(birthday) = contact
        .important_dates
        .iter()
        .find(|d| d.kind == "birthday")
    {
        let parts: Vec<&str> = birthday.date.split('-').filter(|p| !p.is_empty()).collect();
        if parts.len() >= 2 {
            let mut date = json!({});
            let (month, day) = if parts.len() == 3 {
                date["year"] = json!(parts[0].parse::<i64>().ok());
                (parts[1], parts[2])
            } else {
                (parts[0], parts[1])
            };
            date["month"] = json!(month.parse::<i64>().ok());
            date["day"] = json!(day.parse::<i64>().ok());
            person["birthdays"] = json!([{"date": date}]);
        }
    }

    person
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_resource_maps_to_contact() {
        let person = json!({
            "resourceName": "people/c123",
            "etag": "e1",
            "names": [{"givenName": "Max", "familyName": "Mustermann", "middleName": "Peter"}],
            "phoneNumbers": [{"value": "+49 170 1"}],
            "emailAddresses": [{"value": "max@example.org"}],
            "addresses": [{"streetAddress": "Musterstraße 12", "city": "Berlin", "postalCode": "10115", "country": "DE"}],
            "birthdays": [{"date": {"year": 1990, "month": 5, "day": 15}}],
        });

        let contact = person_to_contact(&person).unwrap();
        assert_eq!(contact.google_uid.as_deref(), Some("people/c123"));
        assert_eq!(contact.first_name, "Max");
        assert_eq!(contact.middle_name.as_deref(), Some("Peter"));
        assert_eq!(contact.city.as_deref(), Some("Berlin"));
        assert_eq!(contact.important_dates[0].date, "1990-05-15");
    }

    #[test]
    fn yearless_birthday_keeps_month_and_day() {
        let person = json!({
            "resourceName": "people/c1",
            "birthdays": [{"date": {"month": 5, "day": 15}}],
        });
        let contact = person_to_contact(&person).unwrap();
        assert_eq!(contact.important_dates[0].date, "--05-15");
    }

    #[test]
    fn contact_round_trips_through_person_body() {
        let contact = Contact {
            first_name: "Max".into(),
            last_name: "Mustermann".into(),
            phone: Some("+49 170 1".into()),
            email: Some("max@example.org".into()),
            street: Some("Musterstraße".into()),
            house_nr: Some("12".into()),
            city: Some("Berlin".into()),
            zip: Some("10115".into()),
            important_dates: vec![ImportantDate {
                kind: "birthday".into(),
                date: "1990-05-15".into(),
            }],
            ..Default::default()
        };

        let person = contact_to_person(&contact);
        assert_eq!(person["names"][0]["givenName"], "Max");
        assert_eq!(person["addresses"][0]["streetAddress"], "Musterstraße 12");
        assert_eq!(person["birthdays"][0]["date"]["year"], 1990);
        assert_eq!(person["birthdays"][0]["date"]["month"], 5);
    }

    #[tokio::test]
    async fn missing_oauth_fields_fail_fast() {
        let mut provider = GoogleProvider::new();
        let err = provider
            .authenticate(&json!({"client_id": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingCredential(_)));
        assert!(err.is_fatal());
    }
}
