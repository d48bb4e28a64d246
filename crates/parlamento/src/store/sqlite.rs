use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Params, Row, params};

use super::{
    Attendance, Legislature, Meeting, MeetingKey, MeetingType, Member, NewAttendance, NewMeeting,
    Party, Store, StoreError, Upsert,
};
use crate::export::ExportRow;

const SCHEMA_VERSION: i64 = 1;

/// SQLite-backed store. Natural keys are enforced by UNIQUE constraints, so
/// concurrent writers converge on the same rows.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;

        if current < 1 {
            let sql = include_str!("../../migrations/0001_attendance_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    /// Runs `insert` (an `ON CONFLICT DO NOTHING ... RETURNING` statement) and
    /// falls back to `find` when the natural key is already taken.
    fn insert_or_find<T>(
        &self,
        insert: &str,
        insert_params: impl Params,
        find: &str,
        find_params: impl Params,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Upsert<T>, StoreError> {
        if let Some(created) = self
            .conn
            .query_row(insert, insert_params, map)
            .optional()?
        {
            return Ok(Upsert::Created(created));
        }
        let existing = self.conn.query_row(find, find_params, map)?;
        Ok(Upsert::Existing(existing))
    }
}

fn legislature_row(row: &Row<'_>) -> rusqlite::Result<Legislature> {
    Ok(Legislature {
        id: row.get(0)?,
        number: row.get(1)?,
    })
}

fn meeting_type_row(row: &Row<'_>) -> rusqlite::Result<MeetingType> {
    Ok(MeetingType {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn member_row(row: &Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        id: row.get(0)?,
        mp_bid: row.get(1)?,
        name: row.get(2)?,
    })
}

fn party_row(row: &Row<'_>) -> rusqlite::Result<Party> {
    Ok(Party {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn meeting_row(row: &Row<'_>) -> rusqlite::Result<Meeting> {
    Ok(Meeting {
        id: row.get(0)?,
        date: row.get(1)?,
        number: row.get(2)?,
        attendance_bid: row.get(3)?,
        schedule_url: row.get(4)?,
        legislature_id: row.get(5)?,
        meeting_type_id: row.get(6)?,
    })
}

fn attendance_row(row: &Row<'_>) -> rusqlite::Result<Attendance> {
    Ok(Attendance {
        id: row.get(0)?,
        meeting_id: row.get(1)?,
        member_id: row.get(2)?,
        party_id: row.get(3)?,
        status: row.get(4)?,
        reason: row.get(5)?,
    })
}

impl Store for SqliteStore {
    fn find_meeting(&mut self, key: MeetingKey<'_>) -> Result<Option<Meeting>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT m.id, m.date, m.number, m.attendance_bid, m.schedule_url,
                        m.legislature_id, m.meeting_type_id
                 FROM meeting m
                 JOIN legislature l ON l.id = m.legislature_id
                 JOIN meeting_type t ON t.id = m.meeting_type_id
                 WHERE l.number = ?1 AND t.name = ?2 AND m.date = ?3 AND m.number = ?4",
                params![key.legislature, key.meeting_type, key.date, key.number],
                meeting_row,
            )
            .optional()?)
    }

    /// Wraps `f` in a savepoint. A `rusqlite::Savepoint` would borrow the
    /// connection that `f` needs, so the statements are issued directly.
    fn atomically<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        self.conn
            .execute_batch("SAVEPOINT unit_of_work")
            .map_err(StoreError::from)?;

        match f(self) {
            Ok(value) => {
                self.conn
                    .execute_batch("RELEASE unit_of_work")
                    .map_err(StoreError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self
                    .conn
                    .execute_batch("ROLLBACK TO unit_of_work; RELEASE unit_of_work")
                {
                    log::error!("Failed to roll back unit of work: {}", rollback);
                }
                Err(e)
            }
        }
    }

    fn get_or_create_legislature(
        &mut self,
        number: &str,
    ) -> Result<Upsert<Legislature>, StoreError> {
        self.insert_or_find(
            "INSERT INTO legislature (number) VALUES (?1)
             ON CONFLICT DO NOTHING RETURNING id, number",
            params![number],
            "SELECT id, number FROM legislature WHERE number = ?1",
            params![number],
            legislature_row,
        )
    }

    fn get_or_create_meeting_type(&mut self, name: &str) -> Result<Upsert<MeetingType>, StoreError> {
        self.insert_or_find(
            "INSERT INTO meeting_type (name) VALUES (?1)
             ON CONFLICT DO NOTHING RETURNING id, name",
            params![name],
            "SELECT id, name FROM meeting_type WHERE name = ?1",
            params![name],
            meeting_type_row,
        )
    }

    fn get_or_create_member(
        &mut self,
        mp_bid: i64,
        name: &str,
    ) -> Result<Upsert<Member>, StoreError> {
        self.insert_or_find(
            "INSERT INTO member (mp_bid, name) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING RETURNING id, mp_bid, name",
            params![mp_bid, name],
            "SELECT id, mp_bid, name FROM member WHERE mp_bid = ?1",
            params![mp_bid],
            member_row,
        )
    }

    fn get_or_create_party(&mut self, name: &str) -> Result<Upsert<Party>, StoreError> {
        self.insert_or_find(
            "INSERT INTO party (name) VALUES (?1)
             ON CONFLICT DO NOTHING RETURNING id, name",
            params![name],
            "SELECT id, name FROM party WHERE name = ?1",
            params![name],
            party_row,
        )
    }

    fn create_meeting(&mut self, meeting: NewMeeting) -> Result<Upsert<Meeting>, StoreError> {
        self.insert_or_find(
            "INSERT INTO meeting
                (date, number, attendance_bid, schedule_url, legislature_id, meeting_type_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT DO NOTHING
             RETURNING id, date, number, attendance_bid, schedule_url,
                       legislature_id, meeting_type_id",
            params![
                meeting.date,
                meeting.number,
                meeting.attendance_bid,
                meeting.schedule_url,
                meeting.legislature_id,
                meeting.meeting_type_id,
            ],
            "SELECT id, date, number, attendance_bid, schedule_url,
                    legislature_id, meeting_type_id
             FROM meeting
             WHERE date = ?1 AND number = ?2 AND legislature_id = ?3 AND meeting_type_id = ?4",
            params![
                meeting.date,
                meeting.number,
                meeting.legislature_id,
                meeting.meeting_type_id,
            ],
            meeting_row,
        )
    }

    fn create_attendance(
        &mut self,
        attendance: NewAttendance,
    ) -> Result<Upsert<Attendance>, StoreError> {
        self.insert_or_find(
            "INSERT INTO attendance (meeting_id, member_id, party_id, status, reason)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT DO NOTHING
             RETURNING id, meeting_id, member_id, party_id, status, reason",
            params![
                attendance.meeting_id,
                attendance.member_id,
                attendance.party_id,
                attendance.status,
                attendance.reason,
            ],
            "SELECT id, meeting_id, member_id, party_id, status, reason
             FROM attendance WHERE meeting_id = ?1 AND member_id = ?2",
            params![attendance.meeting_id, attendance.member_id],
            attendance_row,
        )
    }

    fn export_rows(&mut self) -> Result<Vec<ExportRow>, StoreError> {
        let mut statement = self.conn.prepare(
            "SELECT l.number, m.date, m.number, m.attendance_bid, t.name,
                    p.name, p.mp_bid, y.name, a.status, a.reason
             FROM attendance a
             JOIN meeting m ON m.id = a.meeting_id
             JOIN legislature l ON l.id = m.legislature_id
             JOIN meeting_type t ON t.id = m.meeting_type_id
             JOIN member p ON p.id = a.member_id
             JOIN party y ON y.id = a.party_id
             ORDER BY m.date, m.number, p.id",
        )?;

        let rows = statement
            .query_map([], |row| {
                Ok(ExportRow {
                    legislature: row.get(0)?,
                    date: row.get(1)?,
                    number: row.get(2)?,
                    attendance_bid: row.get(3)?,
                    meeting_type: row.get(4)?,
                    member_name: row.get(5)?,
                    mp_bid: row.get(6)?,
                    party: row.get(7)?,
                    status: row.get(8)?,
                    reason: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}
