use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::audit::AuditRecord;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{ConflictCheck, check_conflict, first_conflict, now, validate_window};
use super::{Engine, EngineError};

pub(super) fn kind_label(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Vehicle => "vehicle",
        ResourceKind::Venue => "venue",
    }
}

/// Fallback used when a cancellation arrives without a reason.
pub const DEFAULT_CANCEL_REASON: &str = "Cancelled by user";

impl Engine {
    /// Place a booking. Conflict detection and insertion happen under the
    /// resource write lock, so two racing requests for the same slot
    /// serialize and exactly one wins.
    pub async fn create_booking(
        &self,
        new: NewBooking,
        performed_by: &str,
    ) -> Result<Booking, EngineError> {
        validate_window(&new.window)?;
        if new.requester.trim().is_empty() {
            return Err(EngineError::Validation("requester required"));
        }
        if let Some(ref r) = new.remarks
            && r.len() > MAX_REMARKS_LEN
        {
            return Err(EngineError::LimitExceeded("remarks too long"));
        }
        let rs = self
            .get_resource(&new.resource_id)
            .ok_or(EngineError::NotFound(new.resource_id))?;
        let mut guard = rs.write().await;
        if guard.status != ResourceStatus::Available {
            return Err(EngineError::ResourceUnavailable {
                id: new.resource_id,
                status: guard.status,
            });
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }

        if let Err(e) = check_conflict(&guard, &new.window, None) {
            metrics::counter!(
                observability::BOOKING_CONFLICTS_TOTAL,
                "kind" => kind_label(guard.kind)
            )
            .increment(1);
            return Err(e);
        }

        let (status, confirmed_by, confirmed_at) = if new.confirm {
            (
                BookingStatus::Confirmed,
                new.confirmed_by
                    .clone()
                    .or_else(|| Some(performed_by.to_string())),
                Some(now()),
            )
        } else {
            (BookingStatus::Pending, None, None)
        };
        let booking = Booking {
            id: Ulid::new(),
            reference_number: self.refs.next(guard.kind.booking_prefix()),
            resource_id: new.resource_id,
            source_request_id: new.source_request_id,
            requester: new.requester,
            window: new.window,
            status,
            confirmed_by,
            confirmed_at,
            cancelled_at: None,
            cancellation_reason: None,
            check_in_time: None,
            check_out_time: None,
            remarks: new.remarks,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(
            observability::BOOKINGS_CREATED_TOTAL,
            "kind" => kind_label(guard.kind)
        )
        .increment(1);
        self.audit.record(AuditRecord {
            action: "Create",
            target: booking.reference_number.clone(),
            performed_by: performed_by.to_string(),
            title: "Booking created".into(),
            details: format!("{} on {}", guard.reference_number, booking.window.date),
        });
        Ok(booking)
    }

    /// Patch a booking. A moved window is re-checked for conflicts with the
    /// booking itself excluded. Status transitions stamp their timestamps
    /// exactly once: confirming stamps `confirmed_at`, cancelling stamps
    /// `cancelled_at`; a booking already in the target status keeps its
    /// original stamp.
    pub async fn update_booking(
        &self,
        id: Ulid,
        patch: BookingPatch,
        performed_by: &str,
    ) -> Result<Booking, EngineError> {
        if let Some(ref r) = patch.remarks
            && r.len() > MAX_REMARKS_LEN
        {
            return Err(EngineError::LimitExceeded("remarks too long"));
        }
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))?;

        let window = patch.window.unwrap_or(current.window);
        validate_window(&window)?;
        let status = patch.status.unwrap_or(current.status);
        if status.is_active() {
            check_conflict(&guard, &window, Some(id))?;
        }

        let confirming = status == BookingStatus::Confirmed
            && current.status != BookingStatus::Confirmed;
        let cancelling = status == BookingStatus::Cancelled
            && current.status != BookingStatus::Cancelled;

        let event = Event::BookingUpdated {
            id,
            resource_id,
            window,
            status,
            confirmed_by: if confirming {
                patch
                    .confirmed_by
                    .or_else(|| Some(performed_by.to_string()))
            } else {
                patch.confirmed_by.or(current.confirmed_by)
            },
            confirmed_at: if confirming {
                Some(now())
            } else {
                current.confirmed_at
            },
            cancelled_at: if cancelling {
                Some(now())
            } else {
                current.cancelled_at
            },
            cancellation_reason: if cancelling {
                Some(
                    patch
                        .cancellation_reason
                        .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string()),
                )
            } else {
                patch.cancellation_reason.or(current.cancellation_reason)
            },
            check_in_time: patch.check_in_time.or(current.check_in_time),
            check_out_time: patch.check_out_time.or(current.check_out_time),
            remarks: patch.remarks.or(current.remarks),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        if cancelling {
            metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        }
        let updated = guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))?;
        self.audit.record(AuditRecord {
            action: "Update",
            target: updated.reference_number.clone(),
            performed_by: performed_by.to_string(),
            title: "Booking updated".into(),
            details: format!("status {:?}", updated.status),
        });
        Ok(updated)
    }

    /// Cancel a booking, keeping the row. Idempotent: cancelling an
    /// already-cancelled booking returns it unchanged, preserving the
    /// original `cancelled_at` and reason.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        reason: Option<String>,
        performed_by: &str,
    ) -> Result<Booking, EngineError> {
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))?;
        if current.status == BookingStatus::Cancelled {
            return Ok(current);
        }

        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        let event = Event::BookingCancelled {
            id,
            resource_id,
            cancelled_at: now(),
            reason: reason.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        let cancelled = guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))?;
        self.audit.record(AuditRecord {
            action: "Delete",
            target: cancelled.reference_number.clone(),
            performed_by: performed_by.to_string(),
            title: "Booking cancelled".into(),
            details: reason,
        });
        Ok(cancelled)
    }

    /// Advisory pre-flight check. Read-lock only: a clear report may be
    /// stale by the time a create is attempted, which re-validates under
    /// the write lock. With no start time the whole day is checked.
    pub async fn check_availability(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
    ) -> Result<AvailabilityReport, EngineError> {
        let window = match start {
            Some(start) => TimeWindow::new(date, start, end),
            None => TimeWindow::new(date, NaiveTime::MIN, None),
        };
        validate_window(&window)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;

        if guard.status != ResourceStatus::Available {
            return Ok(AvailabilityReport {
                available: false,
                reason: Some(format!("resource is {}", guard.status)),
                conflicting_reference: None,
            });
        }
        Ok(match first_conflict(&guard, &window, None) {
            ConflictCheck::Clear => AvailabilityReport {
                available: true,
                reason: None,
                conflicting_reference: None,
            },
            ConflictCheck::Booking { reference, .. } => AvailabilityReport {
                available: false,
                reason: Some("conflicts with an existing booking".into()),
                conflicting_reference: Some(reference),
            },
            ConflictCheck::Unavailability { reason, .. } => AvailabilityReport {
                available: false,
                reason: Some(reason.unwrap_or_else(|| "resource unavailable".into())),
                conflicting_reference: None,
            },
        })
    }

    pub async fn booking(&self, id: &Ulid) -> Option<Booking> {
        let resource_id = self.get_resource_for_booking(id)?;
        let rs = self.get_resource(&resource_id)?;
        let guard = rs.read().await;
        guard.booking(id).cloned()
    }

    /// Non-cancelled bookings on a resource, in chronological order.
    pub async fn bookings(&self, resource_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard
            .bookings
            .iter()
            .filter(|b| b.status != BookingStatus::Cancelled)
            .cloned()
            .collect())
    }

    /// Pending/Confirmed bookings on one date.
    pub async fn bookings_on(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.active_bookings_on(date).cloned().collect())
    }
}
