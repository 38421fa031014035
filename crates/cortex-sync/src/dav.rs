//! Shared WebDAV plumbing: an HTTP client that speaks PROPFIND/REPORT and a
//! namespace-agnostic multistatus parser.
//!
//! DAV servers answer with deeply nested, prefix-varying XML; the parser
//! keys on local element names only, which works for DAV:, carddav and
//! caldav alike.

use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::error::{Result, SyncError};

pub const AUTH_TIMEOUT: Duration = Duration::from_secs(30);
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(60);
pub const ITEM_TIMEOUT: Duration = Duration::from_secs(15);

pub struct DavClient {
    client: reqwest::Client,
    username: String,
    password: String,
}

impl DavClient {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// One DAV request with Basic auth. Returns status and body text.
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        depth: Option<&str>,
        body: Option<String>,
        content_type: &str,
        timeout: Duration,
    ) -> Result<(u16, String)> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| SyncError::Xml(format!("bad method: {method}")))?;

        let mut builder = self
            .client
            .request(method.clone(), url)
            .basic_auth(&self.username, Some(&self.password))
            .header("User-Agent", "DAVx5/4.3.1-ose")
            .header("Accept", "*/*")
            .timeout(timeout);

        if let Some(depth) = depth {
            builder = builder.header("Depth", depth);
        }
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", content_type)
                .body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        debug!(%method, url, status, "DAV request");
        Ok((status, text))
    }
}

/// One `<response>` element of a multistatus body, flattened to the
/// properties the adapters consume.
#[derive(Debug, Clone, Default)]
pub struct DavEntry {
    pub href: Option<String>,
    pub status: Option<String>,
    pub etag: Option<String>,
    pub address_data: Option<String>,
    pub calendar_data: Option<String>,
    pub displayname: Option<String>,
    pub color: Option<String>,
    pub ctag: Option<String>,
    /// href inside `current-user-principal`.
    pub principal: Option<String>,
    /// href inside `addressbook-home-set` / `calendar-home-set`.
    pub home_set: Option<String>,
    pub is_addressbook: bool,
    pub is_calendar: bool,
}

impl DavEntry {
    pub fn is_deleted(&self) -> bool {
        self.status.as_deref().is_some_and(|s| s.contains("404"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Multistatus {
    pub entries: Vec<DavEntry>,
    pub sync_token: Option<String>,
}

pub fn parse_multistatus(xml: &str) -> Result<Multistatus> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut result = Multistatus::default();
    let mut current: Option<DavEntry> = None;
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e.local_name().as_ref());
                if name == "response" {
                    current = Some(DavEntry::default());
                }
                stack.push(name);
            }
            Ok(Event::Empty(ref e)) => {
                let name = local_name(e.local_name().as_ref());
                if let Some(ref mut entry) = current {
                    if stack.last().map(String::as_str) == Some("resourcetype") {
                        match name.as_str() {
                            "addressbook" => entry.is_addressbook = true,
                            "calendar" => entry.is_calendar = true,
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                if local_name(e.local_name().as_ref()) == "response" {
                    if let Some(entry) = current.take() {
                        result.entries.push(entry);
                    }
                }
                stack.pop();
            }
            Ok(Event::Text(ref t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| SyncError::Xml(e.to_string()))?
                    .into_owned();
                assign_text(&stack, &text, &mut current, &mut result);
            }
            Ok(Event::CData(ref t)) => {
                let bytes: &[u8] = t;
                let text = String::from_utf8_lossy(bytes).into_owned();
                assign_text(&stack, &text, &mut current, &mut result);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SyncError::Xml(e.to_string())),
            _ => {}
        }
    }

    Ok(result)
}

fn assign_text(
    stack: &[String],
    text: &str,
    current: &mut Option<DavEntry>,
    result: &mut Multistatus,
) {
    let Some(innermost) = stack.last().map(String::as_str) else {
        return;
    };
    let inside = |name: &str| stack.iter().any(|s| s == name);

    match innermost {
        "sync-token" => result.sync_token = Some(text.to_string()),
        "href" => {
            if let Some(entry) = current.as_mut() {
                if inside("current-user-principal") {
                    entry.principal = Some(text.to_string());
                } else if inside("addressbook-home-set") || inside("calendar-home-set") {
                    entry.home_set = Some(text.to_string());
                } else if entry.href.is_none() {
                    entry.href = Some(text.to_string());
                }
            }
        }
        "getetag" => {
            if let Some(entry) = current.as_mut() {
                entry.etag = Some(text.trim_matches('"').to_string());
            }
        }
        "address-data" => {
            if let Some(entry) = current.as_mut() {
                entry.address_data = Some(text.to_string());
            }
        }
        "calendar-data" => {
            if let Some(entry) = current.as_mut() {
                entry.calendar_data = Some(text.to_string());
            }
        }
        "displayname" => {
            if let Some(entry) = current.as_mut() {
                entry.displayname = Some(text.to_string());
            }
        }
        "calendar-color" => {
            if let Some(entry) = current.as_mut() {
                entry.color = Some(text.to_string());
            }
        }
        "getctag" => {
            if let Some(entry) = current.as_mut() {
                entry.ctag = Some(text.to_string());
            }
        }
        "status" => {
            if let Some(entry) = current.as_mut() {
                entry.status = Some(text.to_string());
            }
        }
        _ => {}
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// The UID of a DAV resource from its href, e.g.
/// `/addressbooks/u/contacts/abc-1.vcf` → `abc-1`.
pub fn uid_from_href(href: &str, suffix: &str) -> String {
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(href)
        .trim_end_matches(suffix)
        .to_string()
}

/// Absolutise a DAV href against the service base.
pub fn absolutize(base: &str, href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{}{}", base.trim_end_matches('/'), href)
    }
}

// Request body templates.

pub const PROPFIND_PRINCIPAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:current-user-principal/>
  </d:prop>
</d:propfind>"#;

pub const PROPFIND_ADDRESSBOOK_HOME: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
  <d:prop>
    <card:addressbook-home-set/>
  </d:prop>
</d:propfind>"#;

pub const PROPFIND_CALENDAR_HOME: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:cal="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <cal:calendar-home-set/>
  </d:prop>
</d:propfind>"#;

pub const PROPFIND_RESOURCETYPE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:displayname/>
  </d:prop>
</d:propfind>"#;

pub const PROPFIND_CALENDARS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:cal="urn:ietf:params:xml:ns:caldav" xmlns:cs="http://calendarserver.org/ns/" xmlns:apple="http://apple.com/ns/ical/">
  <d:prop>
    <d:resourcetype/>
    <d:displayname/>
    <apple:calendar-color/>
    <cs:getctag/>
  </d:prop>
</d:propfind>"#;

pub const PROPFIND_SYNC_TOKEN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:sync-token/>
  </d:prop>
</d:propfind>"#;

pub const REPORT_ADDRESSBOOK_QUERY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<card:addressbook-query xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
  <d:prop>
    <d:getetag/>
    <card:address-data/>
  </d:prop>
</card:addressbook-query>"#;

pub fn report_sync_collection(sync_token: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<d:sync-collection xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
  <d:sync-token>{sync_token}</d:sync-token>
  <d:sync-level>1</d:sync-level>
  <d:prop>
    <d:getetag/>
    <card:address-data/>
  </d:prop>
</d:sync-collection>"#
    )
}

pub fn report_calendar_query(start: Option<&str>, end: Option<&str>) -> String {
    let time_range = match (start, end) {
        (Some(start), Some(end)) => {
            format!(r#"<cal:time-range start="{start}T000000Z" end="{end}T235959Z"/>"#)
        }
        _ => String::new(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<cal:calendar-query xmlns:d="DAV:" xmlns:cal="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <cal:calendar-data/>
  </d:prop>
  <cal:filter>
    <cal:comp-filter name="VCALENDAR">
      <cal:comp-filter name="VEVENT">
        {time_range}
      </cal:comp-filter>
    </cal:comp-filter>
  </cal:filter>
</cal:calendar-query>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_addressbook_query_response() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
  <d:response>
    <d:href>/addressbooks/u/contacts/abc-1.vcf</d:href>
    <d:propstat>
      <d:prop>
        <d:getetag>"etag-1"</d:getetag>
        <card:address-data>BEGIN:VCARD
VERSION:3.0
N:Mustermann;Max;;;
UID:abc-1
END:VCARD</card:address-data>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

        let parsed = parse_multistatus(xml).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        let entry = &parsed.entries[0];
        assert_eq!(entry.href.as_deref(), Some("/addressbooks/u/contacts/abc-1.vcf"));
        assert_eq!(entry.etag.as_deref(), Some("etag-1"));
        assert!(entry.address_data.as_deref().unwrap().contains("Mustermann"));
        assert!(!entry.is_deleted());
    }

    #[test]
    fn parses_sync_collection_with_deletion() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
  <d:response>
    <d:href>/contacts/gone.vcf</d:href>
    <d:status>HTTP/1.1 404 Not Found</d:status>
  </d:response>
  <d:sync-token>http://sync/token/42</d:sync-token>
</d:multistatus>"#;

        let parsed = parse_multistatus(xml).unwrap();
        assert_eq!(parsed.sync_token.as_deref(), Some("http://sync/token/42"));
        assert!(parsed.entries[0].is_deleted());
        assert_eq!(uid_from_href(parsed.entries[0].href.as_deref().unwrap(), ".vcf"), "gone");
    }

    #[test]
    fn parses_principal_discovery() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/</d:href>
    <d:propstat>
      <d:prop>
        <d:current-user-principal>
          <d:href>/principals/users/max/</d:href>
        </d:current-user-principal>
      </d:prop>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

        let parsed = parse_multistatus(xml).unwrap();
        assert_eq!(
            parsed.entries[0].principal.as_deref(),
            Some("/principals/users/max/")
        );
        assert_eq!(parsed.entries[0].href.as_deref(), Some("/"));
    }

    #[test]
    fn parses_resourcetype_flags() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
  <d:response>
    <d:href>/home/card/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/><card:addressbook/></d:resourcetype>
        <d:displayname>Contacts</d:displayname>
      </d:prop>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

        let parsed = parse_multistatus(xml).unwrap();
        assert!(parsed.entries[0].is_addressbook);
        assert!(!parsed.entries[0].is_calendar);
        assert_eq!(parsed.entries[0].displayname.as_deref(), Some("Contacts"));
    }

    #[test]
    fn absolutize_handles_both_forms() {
        assert_eq!(
            absolutize("https://contacts.icloud.com", "/home/card/"),
            "https://contacts.icloud.com/home/card/"
        );
        assert_eq!(
            absolutize("https://contacts.icloud.com", "https://p42-contacts.icloud.com/x/"),
            "https://p42-contacts.icloud.com/x/"
        );
    }
}
