//! vCard 3.0 codec.
//!
//! Parses the line set the providers actually emit (N, FN, TEL, EMAIL, ADR,
//! BDAY, ANNIVERSARY, UID) and serialises symmetrically. Round trip
//! preserves name parts, phone, email, city/zip/country and the important
//! dates.

use regex::Regex;
use std::sync::OnceLock;

use crate::contact::{Contact, ImportantDate, ProviderKind};
use crate::error::{Result, SyncError};

pub fn parse(vcard: &str) -> Result<Contact> {
    if vcard.trim().is_empty() || !vcard.contains("BEGIN:VCARD") {
        return Err(SyncError::InvalidVcard("missing BEGIN:VCARD".into()));
    }

    let mut contact = Contact::default();

    for raw_line in vcard.lines() {
        let line = raw_line.trim();
        let (key, value) = match line.split_once(':') {
            Some((k, v)) => (k, v.trim()),
            None => continue,
        };
        // Parameters like TEL;TYPE=CELL are part of the key.
        let name = key.split(';').next().unwrap_or_default().to_ascii_uppercase();

        match name.as_str() {
            "N" => parse_name(value, &mut contact),
            "TEL" if contact.phone.is_none() => contact.phone = non_empty(value),
            "EMAIL" if contact.email.is_none() => contact.email = non_empty(value),
            "ADR" => parse_address(value, &mut contact),
            "BDAY" => {
                if let Some(date) = non_empty(value) {
                    contact.important_dates.push(ImportantDate {
                        kind: "birthday".into(),
                        date,
                    });
                }
            }
            "ANNIVERSARY" => {
                if let Some(date) = non_empty(value) {
                    contact.important_dates.push(ImportantDate {
                        kind: "anniversary".into(),
                        date,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(contact)
}

/// N: last;first;middle;prefix;suffix
fn parse_name(value: &str, contact: &mut Contact) {
    let parts: Vec<&str> = value.split(';').collect();
    if let Some(last) = parts.first() {
        contact.last_name = (*last).to_string();
    }
    if let Some(first) = parts.get(1) {
        contact.first_name = (*first).to_string();
    }
    if let Some(middle) = parts.get(2).copied().filter(|m| !m.is_empty()) {
        contact.middle_name = Some(middle.to_string());
    }
}

/// ADR: po-box;extended;street;city;region;zip;country. The street cell
/// carries "Musterstraße 12"; the trailing house number (digits, optionally
/// with a letter suffix) is split off.
fn parse_address(value: &str, contact: &mut Contact) {
    let parts: Vec<&str> = value.split(';').collect();

    if let Some(street_cell) = parts.get(2).copied().filter(|s| !s.is_empty()) {
        if let Some((street, nr)) = street_cell.rsplit_once(' ') {
            if nr.chars().all(|c| c.is_ascii_digit()) && !nr.is_empty() {
                contact.street = Some(street.to_string());
                contact.house_nr = Some(nr.to_string());
            } else {
                static NR_RE: OnceLock<Regex> = OnceLock::new();
                let re = NR_RE.get_or_init(|| Regex::new(r"^(.+?)\s+(\d+\w*)$").unwrap());
                if let Some(caps) = re.captures(street_cell) {
                    contact.street = Some(caps[1].to_string());
                    contact.house_nr = Some(caps[2].to_string());
                } else {
                    contact.street = Some(street_cell.to_string());
                }
            }
        } else {
            contact.street = Some(street_cell.to_string());
        }
    }

    if let Some(city) = parts.get(3).copied().filter(|s| !s.is_empty()) {
        contact.city = Some(city.to_string());
    }
    if let Some(zip) = parts.get(5).copied().filter(|s| !s.is_empty()) {
        contact.zip = Some(zip.to_string());
    }
    if let Some(country) = parts.get(6).copied().filter(|s| !s.is_empty()) {
        contact.country = Some(country.to_string());
    }
}

/// UID line of a raw vCard, used to key DAV resources.
pub fn extract_uid(vcard: &str) -> Option<String> {
    vcard
        .lines()
        .find_map(|line| line.trim().strip_prefix("UID:"))
        .map(|uid| uid.trim().to_string())
        .filter(|uid| !uid.is_empty())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Serialise to vCard 3.0. The UID line carries the given provider's UID
/// when the contact has one.
pub fn serialize(contact: &Contact, provider: Option<ProviderKind>) -> String {
    let mut lines = vec![
        "BEGIN:VCARD".to_string(),
        "VERSION:3.0".to_string(),
        format!("FN:{}", contact.full_name()),
        format!(
            "N:{};{};{};;",
            contact.last_name,
            contact.first_name,
            contact.middle_name.as_deref().unwrap_or("")
        ),
    ];

    if let Some(ref phone) = contact.phone {
        lines.push(format!("TEL;TYPE=CELL:{phone}"));
    }
    if let Some(ref email) = contact.email {
        lines.push(format!("EMAIL;TYPE=HOME:{email}"));
    }

    let has_address = contact.street.is_some()
        || contact.city.is_some()
        || contact.zip.is_some()
        || contact.country.is_some();
    if has_address {
        let street_full = match (&contact.street, &contact.house_nr) {
            (Some(street), Some(nr)) => format!("{street} {nr}"),
            (Some(street), None) => street.clone(),
            _ => String::new(),
        };
        lines.push(format!(
            "ADR;TYPE=HOME:;;{};{};;{};{}",
            street_full,
            contact.city.as_deref().unwrap_or(""),
            contact.zip.as_deref().unwrap_or(""),
            contact.country.as_deref().unwrap_or("")
        ));
    }

    for entry in &contact.important_dates {
        match entry.kind.as_str() {
            "birthday" => lines.push(format!("BDAY:{}", entry.date)),
            "anniversary" => lines.push(format!("ANNIVERSARY:{}", entry.date)),
            _ => {}
        }
    }

    if let Some(uid) = provider.and_then(|p| contact.uid_for(p)) {
        lines.push(format!("UID:{uid}"));
    }

    lines.push("END:VCARD".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD: &str = "BEGIN:VCARD\nVERSION:3.0\nFN:Dr. Max Peter Mustermann\nN:Mustermann;Max;Peter;Dr.;\nTEL;TYPE=CELL:+49 170 1234567\nEMAIL;TYPE=HOME:max@example.org\nADR;TYPE=HOME:;;Musterstraße 12;Berlin;;10115;Germany\nBDAY:1990-05-15\nEND:VCARD";

    #[test]
    fn parses_the_full_card() {
        let contact = parse(CARD).unwrap();
        assert_eq!(contact.first_name, "Max");
        assert_eq!(contact.middle_name.as_deref(), Some("Peter"));
        assert_eq!(contact.last_name, "Mustermann");
        assert_eq!(contact.phone.as_deref(), Some("+49 170 1234567"));
        assert_eq!(contact.email.as_deref(), Some("max@example.org"));
        assert_eq!(contact.street.as_deref(), Some("Musterstraße"));
        assert_eq!(contact.house_nr.as_deref(), Some("12"));
        assert_eq!(contact.city.as_deref(), Some("Berlin"));
        assert_eq!(contact.zip.as_deref(), Some("10115"));
        assert_eq!(contact.country.as_deref(), Some("Germany"));
        assert_eq!(contact.important_dates.len(), 1);
        assert_eq!(contact.important_dates[0].kind, "birthday");
        assert_eq!(contact.important_dates[0].date, "1990-05-15");
    }

    #[test]
    fn house_number_with_letter_suffix_is_split() {
        let card = "BEGIN:VCARD\nVERSION:3.0\nN:Test;A;;;\nADR:;;Hauptstraße 5a;Köln;;50667;DE\nEND:VCARD";
        let contact = parse(card).unwrap();
        assert_eq!(contact.street.as_deref(), Some("Hauptstraße"));
        assert_eq!(contact.house_nr.as_deref(), Some("5a"));
    }

    #[test]
    fn street_without_number_stays_whole() {
        let card = "BEGIN:VCARD\nVERSION:3.0\nN:Test;A;;;\nADR:;;Am Markt;Bremen;;28195;DE\nEND:VCARD";
        let contact = parse(card).unwrap();
        assert_eq!(contact.street.as_deref(), Some("Am Markt"));
        assert_eq!(contact.house_nr, None);
    }

    #[test]
    fn only_the_first_phone_and_email_are_kept() {
        let card = "BEGIN:VCARD\nVERSION:3.0\nN:Test;A;;;\nTEL;TYPE=CELL:111\nTEL;TYPE=WORK:222\nEMAIL:a@x.de\nEMAIL:b@x.de\nEND:VCARD";
        let contact = parse(card).unwrap();
        assert_eq!(contact.phone.as_deref(), Some("111"));
        assert_eq!(contact.email.as_deref(), Some("a@x.de"));
    }

    #[test]
    fn invalid_input_is_rejected() {
        assert!(parse("").is_err());
        assert!(parse("just some text").is_err());
    }

    #[test]
    fn serialize_includes_provider_uid() {
        let mut contact = parse(CARD).unwrap();
        contact.set_uid(ProviderKind::Nextcloud, "abc-123");
        let out = serialize(&contact, Some(ProviderKind::Nextcloud));
        assert!(out.contains("UID:abc-123"));

        // UID for a different provider is not leaked.
        let out = serialize(&contact, Some(ProviderKind::Icloud));
        assert!(!out.contains("UID:"));
    }

    #[test]
    fn round_trip_preserves_the_contract_fields() {
        let original = parse(CARD).unwrap();
        let reparsed = parse(&serialize(&original, None)).unwrap();

        assert_eq!(reparsed.first_name, original.first_name);
        assert_eq!(reparsed.middle_name, original.middle_name);
        assert_eq!(reparsed.last_name, original.last_name);
        assert_eq!(reparsed.phone, original.phone);
        assert_eq!(reparsed.email, original.email);
        assert_eq!(reparsed.city, original.city);
        assert_eq!(reparsed.zip, original.zip);
        assert_eq!(reparsed.country, original.country);
        assert_eq!(reparsed.important_dates, original.important_dates);

        // A second pass is stable too.
        let twice = parse(&serialize(&reparsed, None)).unwrap();
        assert_eq!(twice.first_name, original.first_name);
        assert_eq!(twice.important_dates, original.important_dates);
    }
}
