use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

pub(crate) fn validate_window(window: &TimeWindow) -> Result<(), EngineError> {
    if let Some(end) = window.end
        && window.start >= end
    {
        return Err(EngineError::InvalidTimeRange);
    }
    Ok(())
}

/// What a booking window would collide with on a resource.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConflictCheck {
    Clear,
    Booking { id: Ulid, reference: String },
    Unavailability { id: Ulid, reason: Option<String> },
}

/// Scan the locked state for anything blocking `window`. Bookings win over
/// unavailability in the report so the caller can name the competing
/// reservation. `exclude` skips one booking id (updates checking against
/// themselves).
pub(crate) fn first_conflict(
    rs: &ResourceState,
    window: &TimeWindow,
    exclude: Option<Ulid>,
) -> ConflictCheck {
    for booking in rs.active_bookings_on(window.date) {
        if Some(booking.id) == exclude {
            continue;
        }
        if booking.window.overlaps(window) {
            return ConflictCheck::Booking {
                id: booking.id,
                reference: booking.reference_number.clone(),
            };
        }
    }
    for period in &rs.unavailability {
        if period.blocks(window) {
            return ConflictCheck::Unavailability {
                id: period.id,
                reason: period.reason.clone(),
            };
        }
    }
    ConflictCheck::Clear
}

/// Same scan as an error: used by the mutation path where any hit aborts.
pub(crate) fn check_conflict(
    rs: &ResourceState,
    window: &TimeWindow,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match first_conflict(rs, window, exclude) {
        ConflictCheck::Clear => Ok(()),
        ConflictCheck::Booking { id, reference } => {
            Err(EngineError::BookingConflict { id, reference })
        }
        ConflictCheck::Unavailability { id, reason } => {
            Err(EngineError::UnavailabilityConflict { id, reason })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn hm(minutes: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap()
    }

    fn minute_window(start: u32, end: u32) -> TimeWindow {
        TimeWindow::new(d("2025-03-01"), hm(start), Some(hm(end)))
    }

    fn state_with(bookings: &[(u32, u32)]) -> ResourceState {
        let mut rs = ResourceState::new(
            Ulid::new(),
            "VEH-2025-00001".into(),
            ResourceKind::Vehicle,
            "Coaster bus".into(),
            true,
            7,
        );
        for (i, &(s, e)) in bookings.iter().enumerate() {
            rs.insert_booking(Booking {
                id: Ulid::new(),
                reference_number: format!("VHB-2025-{:05}", i + 1),
                resource_id: rs.id,
                source_request_id: None,
                requester: "USR-2025-00001".into(),
                window: minute_window(s, e),
                status: BookingStatus::Pending,
                confirmed_by: None,
                confirmed_at: None,
                cancelled_at: None,
                cancellation_reason: None,
                check_in_time: None,
                check_out_time: None,
                remarks: None,
            });
        }
        rs
    }

    #[test]
    fn validate_window_rejects_inverted_range() {
        assert_eq!(
            validate_window(&minute_window(600, 540)),
            Err(EngineError::InvalidTimeRange)
        );
        assert_eq!(
            validate_window(&minute_window(600, 600)),
            Err(EngineError::InvalidTimeRange)
        );
        assert!(validate_window(&minute_window(540, 600)).is_ok());
        // Open-ended is always a valid range.
        assert!(validate_window(&TimeWindow::new(d("2025-03-01"), hm(540), None)).is_ok());
    }

    #[test]
    fn exclude_skips_own_booking() {
        let rs = state_with(&[(540, 600)]);
        let own = rs.bookings[0].id;
        assert_eq!(first_conflict(&rs, &minute_window(550, 590), Some(own)), ConflictCheck::Clear);
        assert!(matches!(
            first_conflict(&rs, &minute_window(550, 590), None),
            ConflictCheck::Booking { .. }
        ));
    }

    #[test]
    fn booking_reported_before_unavailability() {
        let mut rs = state_with(&[(540, 600)]);
        rs.insert_unavailability(UnavailabilityPeriod {
            id: Ulid::new(),
            resource_id: rs.id,
            start: d("2025-03-01").and_time(hm(500)),
            end: d("2025-03-01").and_time(hm(700)),
            reason: Some("brake service".into()),
            is_recurring: false,
            recurrence_pattern: None,
            status: UnavailabilityStatus::Active,
        });
        assert!(matches!(
            first_conflict(&rs, &minute_window(550, 590), None),
            ConflictCheck::Booking { .. }
        ));
        // Outside the booking but inside the maintenance window.
        assert!(matches!(
            first_conflict(&rs, &minute_window(620, 650), None),
            ConflictCheck::Unavailability { .. }
        ));
    }

    proptest! {
        /// The predicate agrees with a brute-force minute-by-minute scan.
        #[test]
        fn overlap_matches_brute_force(
            a in 0u32..1380, alen in 1u32..60,
            b in 0u32..1380, blen in 1u32..60,
        ) {
            let w1 = minute_window(a, a + alen);
            let w2 = minute_window(b, b + blen);
            let brute = (a..a + alen).any(|m| (b..b + blen).contains(&m));
            prop_assert_eq!(w1.overlaps(&w2), brute);
        }

        /// Sequentially accepted windows are pairwise non-overlapping: each
        /// candidate is admitted only if the conflict check passes against
        /// everything admitted before it.
        #[test]
        fn accepted_set_stays_conflict_free(
            candidates in prop::collection::vec((0u32..1380, 1u32..90), 1..40)
        ) {
            let mut rs = state_with(&[]);
            let mut accepted: Vec<TimeWindow> = Vec::new();
            for (i, &(s, len)) in candidates.iter().enumerate() {
                let window = minute_window(s, s + len);
                if check_conflict(&rs, &window, None).is_ok() {
                    rs.insert_booking(Booking {
                        id: Ulid::new(),
                        reference_number: format!("VHB-2025-{:05}", i + 1),
                        resource_id: rs.id,
                        source_request_id: None,
                        requester: "USR-2025-00001".into(),
                        window,
                        status: BookingStatus::Confirmed,
                        confirmed_by: None,
                        confirmed_at: None,
                        cancelled_at: None,
                        cancellation_reason: None,
                        check_in_time: None,
                        check_out_time: None,
                        remarks: None,
                    });
                    accepted.push(window);
                }
            }
            for i in 0..accepted.len() {
                for j in (i + 1)..accepted.len() {
                    prop_assert!(!accepted[i].overlaps(&accepted[j]));
                }
            }
        }

        /// Any window touching an active unavailability period is rejected,
        /// including boundary contact.
        #[test]
        fn unavailability_rejects_entire_range(
            ps in 0u32..1200, plen in 1u32..120,
            s in 0u32..1380, len in 1u32..60,
        ) {
            let mut rs = state_with(&[]);
            rs.insert_unavailability(UnavailabilityPeriod {
                id: Ulid::new(),
                resource_id: rs.id,
                start: d("2025-03-01").and_time(hm(ps)),
                end: d("2025-03-01").and_time(hm(ps + plen)),
                reason: None,
                is_recurring: false,
                recurrence_pattern: None,
                status: UnavailabilityStatus::Active,
            });
            let window = minute_window(s, s + len);
            let touches = ps <= s + len && s <= ps + plen;
            prop_assert_eq!(check_conflict(&rs, &window, None).is_err(), touches);
        }
    }
}
