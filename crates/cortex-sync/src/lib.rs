//! Bidirectional contact and calendar synchronisation: codecs, conflict
//! resolution, the DAV/People adapters, and the orchestrating service.

pub mod caldav;
pub mod carddav;
pub mod contact;
pub mod dav;
pub mod error;
pub mod ical;
pub mod icloud;
pub mod people;
pub mod resolver;
pub mod service;
pub mod vcard;

pub use caldav::{Calendar, ICloudCalendarProvider};
pub use carddav::NextcloudProvider;
pub use contact::{ChangeSet, Contact, ImportantDate, ProviderKind, SyncProvider};
pub use error::{Result, SyncError};
pub use icloud::ICloudProvider;
pub use people::GoogleProvider;
pub use resolver::{Action, ConflictResolver, Resolution, Winner};
pub use service::{sync_calendar, SyncService, SyncStats};
