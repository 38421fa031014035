//! Apple CalDAV adapter.
//!
//! Same credentials and discovery dance as the CardDAV side, but against
//! caldav.icloud.com with calendar-home-set. Events move as iCalendar
//! payloads at `{calendar}{uid}.ics`.

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dav::{
    self, absolutize, parse_multistatus, DavClient, AUTH_TIMEOUT, ITEM_TIMEOUT, REPORT_TIMEOUT,
};
use crate::error::{Result, SyncError};
use crate::ical::{self, CalendarEvent};
use crate::icloud::discover_home;

const CALDAV_URL: &str = "https://caldav.icloud.com";

#[derive(Debug, Clone)]
pub struct Calendar {
    pub uid: String,
    pub name: String,
    pub color: Option<String>,
    pub ctag: Option<String>,
    pub url: String,
}

pub struct ICloudCalendarProvider {
    dav: Option<DavClient>,
    calendar_home_url: Option<String>,
}

impl ICloudCalendarProvider {
    pub fn new() -> Self {
        Self {
            dav: None,
            calendar_home_url: None,
        }
    }

    fn client(&self) -> Result<(&DavClient, &str)> {
        match (&self.dav, &self.calendar_home_url) {
            (Some(dav), Some(home)) => Ok((dav, home.as_str())),
            _ => Err(SyncError::NotAuthenticated),
        }
    }

    pub async fn authenticate(&mut self, credentials: &Value) -> Result<()> {
        let apple_id = credentials
            .get("apple_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SyncError::MissingCredential("apple_id".into()))?
            .trim()
            .to_string();
        let app_password = credentials
            .get("app_password")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SyncError::MissingCredential("app_password".into()))?
            .replace(['-', ' '], "");

        let dav = DavClient::new(apple_id, app_password);
        let home = discover_home(&dav, CALDAV_URL, dav::PROPFIND_CALENDAR_HOME, "icloud").await?;

        info!(calendar_home = %home, "caldav authenticated");
        self.dav = Some(dav);
        self.calendar_home_url = Some(home);
        Ok(())
    }

    /// All calendars in the home set, with display name, colour and ctag.
    pub async fn list_calendars(&self) -> Result<Vec<Calendar>> {
        let (dav, home) = self.client()?;

        let (status, body) = dav
            .request(
                "PROPFIND",
                home,
                Some("1"),
                Some(dav::PROPFIND_CALENDARS.to_string()),
                "application/xml; charset=utf-8",
                AUTH_TIMEOUT,
            )
            .await?;
        if status != 207 {
            return Err(SyncError::Status {
                operation: "PROPFIND calendars".into(),
                status,
            });
        }

        let parsed = parse_multistatus(&body)?;
        let calendars = parsed
            .entries
            .iter()
            .filter(|entry| entry.is_calendar)
            .filter_map(|entry| {
                let href = entry.href.as_deref()?;
                let uid = dav::uid_from_href(href, "");
                Some(Calendar {
                    name: entry.displayname.clone().unwrap_or_else(|| uid.clone()),
                    uid,
                    color: entry.color.clone(),
                    ctag: entry.ctag.clone(),
                    url: absolutize(CALDAV_URL, href),
                })
            })
            .collect();
        Ok(calendars)
    }

    /// Events in one calendar, optionally bounded to `[start, end]`
    /// (YYYYMMDD).
    pub async fn pull_events(
        &self,
        calendar: &Calendar,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Vec<CalendarEvent>> {
        let (dav, _) = self.client()?;

        let (status, body) = dav
            .request(
                "REPORT",
                &calendar.url,
                Some("1"),
                Some(dav::report_calendar_query(start, end)),
                "application/xml; charset=utf-8",
                REPORT_TIMEOUT,
            )
            .await?;
        if status != 207 {
            return Err(SyncError::Status {
                operation: "REPORT calendar-query".into(),
                status,
            });
        }

        let parsed = parse_multistatus(&body)?;
        let mut events = Vec::new();
        for entry in &parsed.entries {
            let Some(data) = entry.calendar_data.as_deref() else {
                continue;
            };
            for mut event in ical::parse(data) {
                event.etag = entry.etag.clone();
                events.push(event);
            }
        }
        if events.is_empty() && !parsed.entries.is_empty() {
            warn!(calendar = %calendar.name, "calendar REPORT returned no parseable events");
        }
        Ok(events)
    }

    /// Create or update one event. Returns its UID.
    pub async fn push_event(&self, calendar: &Calendar, event: &CalendarEvent) -> Result<String> {
        let (dav, _) = self.client()?;

        let uid = event
            .uid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut to_send = event.clone();
        to_send.uid = Some(uid.clone());

        let ics = ical::serialize(&to_send);
        let url = format!("{}{uid}.ics", calendar.url);
        let (status, _) = dav
            .request(
                "PUT",
                &url,
                None,
                Some(ics),
                "text/calendar; charset=utf-8",
                ITEM_TIMEOUT,
            )
            .await?;

        if matches!(status, 200 | 201 | 204) {
            Ok(uid)
        } else {
            Err(SyncError::Status {
                operation: "PUT event".into(),
                status,
            })
        }
    }

    pub async fn delete_event(&self, calendar: &Calendar, uid: &str) -> Result<bool> {
        let (dav, _) = self.client()?;
        let url = format!("{}{uid}.ics", calendar.url);
        let (status, _) = dav
            .request("DELETE", &url, None, None, "text/calendar", ITEM_TIMEOUT)
            .await?;
        Ok(matches!(status, 200 | 204))
    }
}

impl Default for ICloudCalendarProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn credentials_are_checked_before_any_network_io() {
        let mut provider = ICloudCalendarProvider::new();
        let err = provider.authenticate(&json!({})).await.unwrap_err();
        assert!(matches!(err, SyncError::MissingCredential(_)));
    }

    #[tokio::test]
    async fn listing_requires_authentication() {
        let provider = ICloudCalendarProvider::new();
        assert!(matches!(
            provider.list_calendars().await.unwrap_err(),
            SyncError::NotAuthenticated
        ));
    }
}
