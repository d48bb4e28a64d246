//! Persistence port for the normalized records.
//!
//! Every entity has a natural key. Lookup-or-create and create operations
//! never fail on an already-present key: they hand back the stored row as
//! [`Upsert::Existing`] instead.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::NaiveDate;
use serde::Serialize;

use crate::export::ExportRow;

pub type Id = i64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Store is inconsistent: {0}")]
    Corrupt(String),
    #[error("Unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Outcome of a lookup-or-create: the entity and whether this call created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert<T> {
    Created(T),
    Existing(T),
}

impl<T> Upsert<T> {
    pub fn is_created(&self) -> bool {
        matches!(self, Upsert::Created(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Upsert::Created(t) | Upsert::Existing(t) => t,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Upsert::Created(t) | Upsert::Existing(t) => t,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Legislature {
    pub id: Id,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeetingType {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Meeting {
    pub id: Id,
    pub date: NaiveDate,
    pub number: u32,
    pub attendance_bid: i64,
    pub schedule_url: String,
    pub legislature_id: Id,
    pub meeting_type_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub id: Id,
    pub mp_bid: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Party {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attendance {
    pub id: Id,
    pub meeting_id: Id,
    pub member_id: Id,
    pub party_id: Id,
    pub status: String,
    pub reason: String,
}

/// A meeting not yet stored. Its natural key is
/// (date, number, legislature, meeting type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMeeting {
    pub date: NaiveDate,
    pub number: u32,
    pub attendance_bid: i64,
    pub schedule_url: String,
    pub legislature_id: Id,
    pub meeting_type_id: Id,
}

/// An attendance not yet stored. Its natural key is (meeting, member).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttendance {
    pub meeting_id: Id,
    pub member_id: Id,
    pub party_id: Id,
    pub status: String,
    pub reason: String,
}

/// Natural key of a meeting, by names rather than row ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeetingKey<'a> {
    pub legislature: &'a str,
    pub meeting_type: &'a str,
    pub date: NaiveDate,
    pub number: u32,
}

pub trait Store {
    /// Looks a meeting up by natural key without creating anything.
    fn find_meeting(&mut self, key: MeetingKey<'_>) -> Result<Option<Meeting>, StoreError>;

    /// Runs `f` as one unit of work: when it fails, nothing it wrote is kept.
    fn atomically<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        Self: Sized,
        E: From<StoreError>,
        F: FnOnce(&mut Self) -> Result<T, E>;

    fn get_or_create_legislature(&mut self, number: &str)
    -> Result<Upsert<Legislature>, StoreError>;

    fn get_or_create_meeting_type(&mut self, name: &str) -> Result<Upsert<MeetingType>, StoreError>;

    /// Members are keyed by `mp_bid`; the name is recorded on first sight only.
    fn get_or_create_member(&mut self, mp_bid: i64, name: &str)
    -> Result<Upsert<Member>, StoreError>;

    fn get_or_create_party(&mut self, name: &str) -> Result<Upsert<Party>, StoreError>;

    /// Inserts `meeting`, or returns the row already holding its natural key.
    fn create_meeting(&mut self, meeting: NewMeeting) -> Result<Upsert<Meeting>, StoreError>;

    /// Inserts `attendance`, or returns the row already recorded for the
    /// same meeting and member. Existing rows are never updated.
    fn create_attendance(
        &mut self,
        attendance: NewAttendance,
    ) -> Result<Upsert<Attendance>, StoreError>;

    /// Flattened attendance rows ordered by meeting date, meeting number and
    /// member.
    fn export_rows(&mut self) -> Result<Vec<ExportRow>, StoreError>;
}
