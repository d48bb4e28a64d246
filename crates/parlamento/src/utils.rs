use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::RawMeeting;

/// Counters reported at the end of an ingest run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeStats {
    pub meetings_created: usize,
    pub meetings_skipped: usize,
    pub attendance_created: usize,
    pub attendance_ignored: usize,
    /// Update run ended at an already-stored meeting.
    pub stopped_early: bool,
}

impl std::fmt::Display for ScrapeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nStatistics:")?;
        writeln!(f, "  Meetings stored:        {}", self.meetings_created)?;
        writeln!(f, "  Meetings skipped:       {}", self.meetings_skipped)?;
        writeln!(f, "  Attendance stored:      {}", self.attendance_created)?;
        writeln!(f, "  Attendance ignored:     {}", self.attendance_ignored)?;
        if self.stopped_early {
            writeln!(f, "  Stopped at the first known meeting")?;
        }
        Ok(())
    }
}

/// Meeting counts per legislature, for listings.
#[derive(Debug, Default, Serialize)]
pub struct MeetingStats {
    pub per_legislature: BTreeMap<String, usize>,
    pub total: usize,
}

impl MeetingStats {
    pub fn from_meetings(meetings: &[RawMeeting]) -> MeetingStats {
        let mut per_legislature = BTreeMap::new();
        for meeting in meetings {
            *per_legislature
                .entry(meeting.legislature.clone())
                .or_insert(0) += 1;
        }
        MeetingStats {
            per_legislature,
            total: meetings.len(),
        }
    }
}

impl std::fmt::Display for MeetingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nStatistics:")?;
        for (legislature, count) in &self.per_legislature {
            writeln!(f, "  Legislature {:<8} {}", legislature, count)?;
        }
        writeln!(f, "  Total:                {}", self.total)
    }
}
