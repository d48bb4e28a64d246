use std::collections::HashMap;
use std::hash::Hash;

use chrono::NaiveDate;

use super::{
    Attendance, Id, Legislature, Meeting, MeetingKey, MeetingType, Member, NewAttendance,
    NewMeeting, Party, Store, StoreError, Upsert,
};
use crate::export::ExportRow;

/// Rows plus a natural-key index. Ids start at 1 and follow insertion order.
#[derive(Debug, Clone)]
struct Table<K, T> {
    rows: Vec<T>,
    keys: HashMap<K, usize>,
}

impl<K, T> Default for Table<K, T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            keys: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, T: Clone> Table<K, T> {
    fn get_or_insert_with(&mut self, key: K, make: impl FnOnce(Id) -> T) -> Upsert<T> {
        if let Some(&index) = self.keys.get(&key) {
            return Upsert::Existing(self.rows[index].clone());
        }
        let row = make(self.rows.len() as Id + 1);
        self.keys.insert(key, self.rows.len());
        self.rows.push(row.clone());
        Upsert::Created(row)
    }

    fn find(&self, key: &K) -> Option<&T> {
        self.keys.get(key).map(|&index| &self.rows[index])
    }

    fn by_id(&self, id: Id) -> Option<&T> {
        usize::try_from(id - 1).ok().and_then(|i| self.rows.get(i))
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Store kept entirely in memory. Used by tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    legislatures: Table<String, Legislature>,
    meeting_types: Table<String, MeetingType>,
    meetings: Table<(NaiveDate, u32, Id, Id), Meeting>,
    members: Table<i64, Member>,
    parties: Table<String, Party>,
    attendance: Table<(Id, Id), Attendance>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meeting_count(&self) -> usize {
        self.meetings.len()
    }

    pub fn attendance_count(&self) -> usize {
        self.attendance.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn party_count(&self) -> usize {
        self.parties.len()
    }
}

fn dangling(what: &str, id: Id) -> StoreError {
    StoreError::Corrupt(format!("{} {} does not exist", what, id))
}

impl Store for MemoryStore {
    fn find_meeting(&mut self, key: MeetingKey<'_>) -> Result<Option<Meeting>, StoreError> {
        let (Some(legislature), Some(meeting_type)) = (
            self.legislatures.find(&key.legislature.to_string()),
            self.meeting_types.find(&key.meeting_type.to_string()),
        ) else {
            return Ok(None);
        };
        Ok(self
            .meetings
            .find(&(key.date, key.number, legislature.id, meeting_type.id))
            .cloned())
    }

    /// Works on a snapshot of the tables, restored when `f` fails.
    fn atomically<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        let snapshot = self.clone();
        let result = f(self);
        if result.is_err() {
            *self = snapshot;
        }
        result
    }

    fn get_or_create_legislature(
        &mut self,
        number: &str,
    ) -> Result<Upsert<Legislature>, StoreError> {
        Ok(self
            .legislatures
            .get_or_insert_with(number.to_string(), |id| Legislature {
                id,
                number: number.to_string(),
            }))
    }

    fn get_or_create_meeting_type(&mut self, name: &str) -> Result<Upsert<MeetingType>, StoreError> {
        Ok(self
            .meeting_types
            .get_or_insert_with(name.to_string(), |id| MeetingType {
                id,
                name: name.to_string(),
            }))
    }

    fn get_or_create_member(
        &mut self,
        mp_bid: i64,
        name: &str,
    ) -> Result<Upsert<Member>, StoreError> {
        Ok(self.members.get_or_insert_with(mp_bid, |id| Member {
            id,
            mp_bid,
            name: name.to_string(),
        }))
    }

    fn get_or_create_party(&mut self, name: &str) -> Result<Upsert<Party>, StoreError> {
        Ok(self.parties.get_or_insert_with(name.to_string(), |id| Party {
            id,
            name: name.to_string(),
        }))
    }

    fn create_meeting(&mut self, meeting: NewMeeting) -> Result<Upsert<Meeting>, StoreError> {
        if self.legislatures.by_id(meeting.legislature_id).is_none() {
            return Err(dangling("legislature", meeting.legislature_id));
        }
        if self.meeting_types.by_id(meeting.meeting_type_id).is_none() {
            return Err(dangling("meeting type", meeting.meeting_type_id));
        }

        let key = (
            meeting.date,
            meeting.number,
            meeting.legislature_id,
            meeting.meeting_type_id,
        );
        Ok(self.meetings.get_or_insert_with(key, |id| Meeting {
            id,
            date: meeting.date,
            number: meeting.number,
            attendance_bid: meeting.attendance_bid,
            schedule_url: meeting.schedule_url,
            legislature_id: meeting.legislature_id,
            meeting_type_id: meeting.meeting_type_id,
        }))
    }

    fn create_attendance(
        &mut self,
        attendance: NewAttendance,
    ) -> Result<Upsert<Attendance>, StoreError> {
        if self.meetings.by_id(attendance.meeting_id).is_none() {
            return Err(dangling("meeting", attendance.meeting_id));
        }
        if self.members.by_id(attendance.member_id).is_none() {
            return Err(dangling("member", attendance.member_id));
        }
        if self.parties.by_id(attendance.party_id).is_none() {
            return Err(dangling("party", attendance.party_id));
        }

        let key = (attendance.meeting_id, attendance.member_id);
        Ok(self.attendance.get_or_insert_with(key, |id| Attendance {
            id,
            meeting_id: attendance.meeting_id,
            member_id: attendance.member_id,
            party_id: attendance.party_id,
            status: attendance.status,
            reason: attendance.reason,
        }))
    }

    fn export_rows(&mut self) -> Result<Vec<ExportRow>, StoreError> {
        let mut keyed = Vec::with_capacity(self.attendance.len());

        for row in &self.attendance.rows {
            let meeting = self
                .meetings
                .by_id(row.meeting_id)
                .ok_or_else(|| dangling("meeting", row.meeting_id))?;
            let legislature = self
                .legislatures
                .by_id(meeting.legislature_id)
                .ok_or_else(|| dangling("legislature", meeting.legislature_id))?;
            let meeting_type = self
                .meeting_types
                .by_id(meeting.meeting_type_id)
                .ok_or_else(|| dangling("meeting type", meeting.meeting_type_id))?;
            let member = self
                .members
                .by_id(row.member_id)
                .ok_or_else(|| dangling("member", row.member_id))?;
            let party = self
                .parties
                .by_id(row.party_id)
                .ok_or_else(|| dangling("party", row.party_id))?;

            keyed.push((
                (meeting.date, meeting.number, member.id),
                ExportRow {
                    legislature: legislature.number.clone(),
                    date: meeting.date,
                    number: meeting.number,
                    attendance_bid: meeting.attendance_bid,
                    meeting_type: meeting_type.name.clone(),
                    member_name: member.name.clone(),
                    mp_bid: member.mp_bid,
                    party: party.name.clone(),
                    status: row.status.clone(),
                    reason: row.reason.clone(),
                },
            ));
        }

        keyed.sort_by_key(|(key, _)| *key);
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{exercise_rollback, exercise_store};

    #[test]
    fn test_memory_store_contract() {
        let mut store = MemoryStore::new();
        exercise_store(&mut store);
        assert_eq!(store.meeting_count(), 1);
        assert_eq!(store.attendance_count(), 1);
    }

    #[test]
    fn test_memory_store_rolls_back_failed_unit() {
        let mut store = MemoryStore::new();
        exercise_rollback(&mut store);
        assert_eq!(store.party_count(), 1);
    }

    #[test]
    fn test_ids_follow_insertion_order() {
        let mut store = MemoryStore::new();
        let ps = store.get_or_create_party("PS").unwrap().into_inner();
        let psd = store.get_or_create_party("PSD").unwrap().into_inner();
        assert_eq!((ps.id, psd.id), (1, 2));
        assert_eq!(store.get_or_create_party("PS").unwrap().get().id, 1);
        assert_eq!(store.party_count(), 2);
    }

    #[test]
    fn test_dangling_reference_is_rejected() {
        let mut store = MemoryStore::new();
        let err = store
            .create_attendance(NewAttendance {
                meeting_id: 42,
                member_id: 1,
                party_id: 1,
                status: "Presença".into(),
                reason: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn test_export_rows_are_ordered() {
        let mut store = MemoryStore::new();
        let leg = store.get_or_create_legislature("XIII").unwrap().into_inner();
        let kind = store
            .get_or_create_meeting_type("Reunião Plenária")
            .unwrap()
            .into_inner();
        let party = store.get_or_create_party("PS").unwrap().into_inner();
        let late = store.get_or_create_member(20, "Bruno").unwrap().into_inner();
        let early = store.get_or_create_member(10, "Alice").unwrap().into_inner();

        let mut meeting = |day: u32, number: u32| {
            store
                .create_meeting(NewMeeting {
                    date: NaiveDate::from_ymd_opt(2017, 7, day).unwrap(),
                    number,
                    attendance_bid: i64::from(number),
                    schedule_url: String::new(),
                    legislature_id: leg.id,
                    meeting_type_id: kind.id,
                })
                .unwrap()
                .into_inner()
        };
        let newer = meeting(20, 2);
        let older = meeting(19, 1);

        for meeting in [&newer, &older] {
            for member in [&late, &early] {
                store
                    .create_attendance(NewAttendance {
                        meeting_id: meeting.id,
                        member_id: member.id,
                        party_id: party.id,
                        status: "Presença".into(),
                        reason: String::new(),
                    })
                    .unwrap();
            }
        }

        let order: Vec<(u32, String)> = store
            .export_rows()
            .unwrap()
            .into_iter()
            .map(|r| (r.number, r.member_name))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, "Bruno".to_string()),
                (1, "Alice".to_string()),
                (2, "Bruno".to_string()),
                (2, "Alice".to_string()),
            ]
        );
    }
}
