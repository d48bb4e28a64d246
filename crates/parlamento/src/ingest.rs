//! Normalizes scraped meetings and attendance into the store.

use crate::parser::PageLayout;
use crate::scraper::{LegislatureIndex, ScraperError, fetch_attendance};
use crate::store::{Meeting, MeetingKey, NewAttendance, NewMeeting, Store, StoreError, Upsert};
use crate::transport::Fetcher;
use crate::types::{RawAttendance, RawMeeting};
use crate::utils::ScrapeStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Walk the whole index, skipping meetings already stored.
    FullRead,
    /// Stop at the first meeting already stored. The index lists meetings
    /// newest first, so everything after it is known too.
    Update,
}

/// Stores a meeting together with its legislature and meeting type.
pub fn store_meeting<S: Store>(
    store: &mut S,
    raw: &RawMeeting,
) -> Result<Upsert<Meeting>, StoreError> {
    let legislature = store.get_or_create_legislature(&raw.legislature)?.into_inner();
    let meeting_type = store.get_or_create_meeting_type(&raw.meeting_type)?.into_inner();

    store.create_meeting(NewMeeting {
        date: raw.date,
        number: raw.number,
        attendance_bid: raw.attendance_bid,
        schedule_url: raw.schedule_url.clone(),
        legislature_id: legislature.id,
        meeting_type_id: meeting_type.id,
    })
}

/// Stores the attendance rows of `meeting`. Rows already recorded for the
/// same member are left untouched.
pub fn store_attendance<S: Store>(
    store: &mut S,
    meeting: &Meeting,
    rows: &[RawAttendance],
    stats: &mut ScrapeStats,
) -> Result<(), StoreError> {
    for raw in rows {
        let member = store.get_or_create_member(raw.mp_bid, &raw.name)?.into_inner();
        let party = store.get_or_create_party(&raw.party)?.into_inner();

        let outcome = store.create_attendance(NewAttendance {
            meeting_id: meeting.id,
            member_id: member.id,
            party_id: party.id,
            status: raw.status.clone(),
            reason: raw.reason.clone(),
        })?;

        if outcome.is_created() {
            stats.attendance_created += 1;
        } else {
            log::debug!(
                "Attendance of {} at meeting {} already recorded",
                raw.mp_bid,
                meeting.attendance_bid
            );
            stats.attendance_ignored += 1;
        }
    }
    Ok(())
}

/// Walks `index` and stores every new meeting with its attendance list.
///
/// Detail pages go through `details`, so the index session only ever
/// carries index postbacks. A meeting is written only together with its
/// attendance, so a failed detail fetch leaves it unread for the next run.
pub async fn run<F, L, D, S>(
    index: &mut LegislatureIndex<F, L>,
    details: &mut D,
    store: &mut S,
    mode: RunMode,
) -> Result<ScrapeStats, ScraperError>
where
    F: Fetcher,
    L: PageLayout,
    D: Fetcher,
    S: Store,
{
    let mut stats = ScrapeStats::default();
    let level = index.config().progress_level();

    while let Some(raw) = index.next_meeting().await? {
        let key = MeetingKey {
            legislature: &raw.legislature,
            meeting_type: &raw.meeting_type,
            date: raw.date,
            number: raw.number,
        };
        if store.find_meeting(key)?.is_some() {
            stats.meetings_skipped += 1;
            if mode == RunMode::Update {
                log::info!(
                    "Meeting {} of {} already stored, nothing newer to read",
                    raw.number,
                    raw.date
                );
                stats.stopped_early = true;
                break;
            }
            log::log!(level, "Skipping {} meeting", raw.date);
            continue;
        }

        log::log!(level, "Reading {} meeting", raw.date);
        let rows = fetch_attendance(
            details,
            index.layout(),
            &index.config().site,
            raw.attendance_bid,
        )
        .await?;

        let tally = store.atomically(|store| {
            let meeting = store_meeting(store, &raw)?.into_inner();
            let mut tally = ScrapeStats::default();
            store_attendance(store, &meeting, &rows, &mut tally)?;
            Ok::<_, StoreError>(tally)
        })?;

        stats.meetings_created += 1;
        stats.attendance_created += tally.attendance_created;
        stats.attendance_ignored += tally.attendance_ignored;
    }

    log::info!("{}", stats);
    Ok(stats)
}
