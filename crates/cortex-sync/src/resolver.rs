//! Conflict resolution: last write wins, local wins ties.

use serde::Serialize;

use crate::contact::{Contact, ProviderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Local,
    Remote,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Push,
    Pull,
    None,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub winner: Winner,
    pub action: Action,
    pub contact: Contact,
    pub reason: String,
}

pub struct ConflictResolver;

impl ConflictResolver {
    /// Decide between a local and a remote version of the same contact.
    ///
    /// Equal timestamps go to local (the store is the single source of
    /// truth). A remote win merges remote fields over local identity: the
    /// local row id and every known provider UID survive.
    pub fn resolve(
        local: Option<&Contact>,
        remote: Option<&Contact>,
        provider: ProviderKind,
    ) -> Resolution {
        match (local, remote) {
            (Some(local), None) => Resolution {
                winner: Winner::Local,
                action: Action::Push,
                contact: local.clone(),
                reason: "contact only exists locally".into(),
            },
            (None, Some(remote)) => Resolution {
                winner: Winner::Remote,
                action: Action::Pull,
                contact: remote.clone(),
                reason: "contact only exists remotely".into(),
            },
            (None, None) => Resolution {
                winner: Winner::None,
                action: Action::None,
                contact: Contact::default(),
                reason: "nothing to resolve".into(),
            },
            (Some(local), Some(remote)) => {
                if identical(local, remote) {
                    return Resolution {
                        winner: Winner::None,
                        action: Action::None,
                        contact: local.clone(),
                        reason: "contacts are identical".into(),
                    };
                }

                let local_time = local.updated_at.unwrap_or(chrono::DateTime::UNIX_EPOCH);
                let remote_time = remote.updated_at.unwrap_or(chrono::DateTime::UNIX_EPOCH);

                if local_time >= remote_time {
                    Resolution {
                        winner: Winner::Local,
                        action: Action::Push,
                        contact: local.clone(),
                        reason: format!("local is newer ({local_time} >= {remote_time})"),
                    }
                } else {
                    Resolution {
                        winner: Winner::Remote,
                        action: Action::Pull,
                        contact: merge(local, remote, provider),
                        reason: format!("remote is newer ({remote_time} > {local_time})"),
                    }
                }
            }
        }
    }
}

/// Compared on the synchronised payload fields only; ids, timestamps and
/// etags differ by construction.
fn identical(local: &Contact, remote: &Contact) -> bool {
    local.first_name == remote.first_name
        && local.middle_name == remote.middle_name
        && local.last_name == remote.last_name
        && local.phone == remote.phone
        && local.email == remote.email
        && local.street == remote.street
        && local.house_nr == remote.house_nr
        && local.zip == remote.zip
        && local.city == remote.city
        && local.country == remote.country
        && local.important_dates == remote.important_dates
        && local.context == remote.context
}

/// Remote fields, local identity: keep the local row id and all known
/// provider UIDs, then apply the remote provider's UID from the remote copy.
fn merge(local: &Contact, remote: &Contact, provider: ProviderKind) -> Contact {
    let mut merged = remote.clone();
    merged.id = local.id;

    if local.icloud_uid.is_some() {
        merged.icloud_uid = local.icloud_uid.clone();
    }
    if local.google_uid.is_some() {
        merged.google_uid = local.google_uid.clone();
    }
    if local.nextcloud_uid.is_some() {
        merged.nextcloud_uid = local.nextcloud_uid.clone();
    }

    if let Some(uid) = remote.uid_for(provider) {
        merged.set_uid(provider, uid.to_string());
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn contact(name: &str, updated: &str) -> Contact {
        Contact {
            id: Some(7),
            first_name: "Max".into(),
            last_name: name.into(),
            updated_at: Some(
                NaiveDateTime::parse_from_str(updated, "%Y-%m-%d %H:%M:%S")
                    .unwrap()
                    .and_utc(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn local_only_pushes() {
        let local = contact("Mustermann", "2026-01-10 12:00:00");
        let r = ConflictResolver::resolve(Some(&local), None, ProviderKind::Icloud);
        assert_eq!(r.action, Action::Push);
        assert_eq!(r.winner, Winner::Local);
    }

    #[test]
    fn remote_only_pulls() {
        let remote = contact("Mueller", "2026-01-10 12:00:00");
        let r = ConflictResolver::resolve(None, Some(&remote), ProviderKind::Icloud);
        assert_eq!(r.action, Action::Pull);
        assert_eq!(r.winner, Winner::Remote);
    }

    #[test]
    fn identical_contacts_are_a_no_op() {
        let a = contact("Mustermann", "2026-01-10 12:00:00");
        let mut b = contact("Mustermann", "2026-01-11 09:00:00");
        b.id = Some(99);
        let r = ConflictResolver::resolve(Some(&a), Some(&b), ProviderKind::Icloud);
        assert_eq!(r.action, Action::None);
    }

    #[test]
    fn newer_local_wins() {
        let local = contact("Mustermann", "2026-01-12 12:00:00");
        let remote = contact("Mueller", "2026-01-12 11:00:00");
        let r = ConflictResolver::resolve(Some(&local), Some(&remote), ProviderKind::Icloud);
        assert_eq!(r.action, Action::Push);
        assert_eq!(r.contact.last_name, "Mustermann");
    }

    #[test]
    fn equal_timestamps_go_to_local() {
        let local = contact("Mustermann", "2026-01-12 12:00:00");
        let remote = contact("Mueller", "2026-01-12 12:00:00");
        let r = ConflictResolver::resolve(Some(&local), Some(&remote), ProviderKind::Icloud);
        assert_eq!(r.winner, Winner::Local);
        assert_eq!(r.action, Action::Push);
    }

    #[test]
    fn newer_remote_merges_and_preserves_identity() {
        let mut local = contact("Mustermann", "2026-01-12 11:00:00");
        local.google_uid = Some("people/c9".into());
        local.nextcloud_uid = Some("nc-1".into());

        let mut remote = contact("Mueller", "2026-01-12 12:00:00");
        remote.id = None;
        remote.icloud_uid = Some("icloud-5".into());

        let r = ConflictResolver::resolve(Some(&local), Some(&remote), ProviderKind::Icloud);
        assert_eq!(r.action, Action::Pull);
        assert_eq!(r.contact.last_name, "Mueller");
        // Local identity survives the merge.
        assert_eq!(r.contact.id, Some(7));
        assert_eq!(r.contact.google_uid.as_deref(), Some("people/c9"));
        assert_eq!(r.contact.nextcloud_uid.as_deref(), Some("nc-1"));
        // The syncing provider's UID comes from remote.
        assert_eq!(r.contact.icloud_uid.as_deref(), Some("icloud-5"));
    }

    #[test]
    fn resolution_is_idempotent() {
        let local = contact("Mustermann", "2026-01-12 11:00:00");
        let remote = contact("Mueller", "2026-01-12 12:00:00");
        let first = ConflictResolver::resolve(Some(&local), Some(&remote), ProviderKind::Icloud);
        assert_eq!(first.action, Action::Pull);

        // Applying the merge and resolving again against the same remote
        // must be a no-op.
        let mut applied = first.contact.clone();
        applied.updated_at = remote.updated_at;
        let second = ConflictResolver::resolve(Some(&applied), Some(&remote), ProviderKind::Icloud);
        assert_eq!(second.action, Action::None);
    }
}
