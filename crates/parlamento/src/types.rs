use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// One row of the plenary meetings index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMeeting {
    pub legislature: String,
    pub date: NaiveDate,
    pub attendance_bid: i64,
    pub number: u32,
    pub meeting_type: String,
    pub schedule_url: String,
}

impl Display for RawMeeting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} nº {} - {} (BID {})",
            self.legislature, self.date, self.number, self.meeting_type, self.attendance_bid
        )
    }
}

/// One attendee row of a meeting detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAttendance {
    pub name: String,
    pub mp_bid: i64,
    pub party: String,
    pub status: String,
    pub reason: String,
}

impl Display for RawAttendance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) - {}", self.name, self.party, self.status)?;
        if !self.reason.is_empty() {
            write!(f, ": {}", self.reason)?;
        }
        Ok(())
    }
}
