use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::audit::AuditRecord;
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn add_unavailability(
        &self,
        resource_id: Ulid,
        start: NaiveDateTime,
        end: NaiveDateTime,
        reason: Option<String>,
        is_recurring: bool,
        recurrence_pattern: Option<String>,
        performed_by: &str,
    ) -> Result<UnavailabilityPeriod, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidTimeRange);
        }
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if guard.unavailability.len() >= MAX_UNAVAILABILITY_PER_RESOURCE {
            return Err(EngineError::LimitExceeded(
                "too many unavailability periods on resource",
            ));
        }

        let period = UnavailabilityPeriod {
            id: Ulid::new(),
            resource_id,
            start,
            end,
            reason,
            is_recurring,
            recurrence_pattern,
            status: UnavailabilityStatus::Active,
        };
        let event = Event::UnavailabilityAdded {
            period: period.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        self.audit.record(AuditRecord {
            action: "Create",
            target: guard.reference_number.clone(),
            performed_by: performed_by.to_string(),
            title: "Unavailability declared".into(),
            details: format!("{start} to {end}"),
        });
        Ok(period)
    }

    pub async fn update_unavailability(
        &self,
        resource_id: Ulid,
        id: Ulid,
        start: NaiveDateTime,
        end: NaiveDateTime,
        reason: Option<String>,
        performed_by: &str,
    ) -> Result<UnavailabilityPeriod, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidTimeRange);
        }
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        let current = guard.unavailability(&id).ok_or(EngineError::NotFound(id))?;
        if current.status == UnavailabilityStatus::Cancelled {
            return Err(EngineError::Validation("period is cancelled"));
        }

        let event = Event::UnavailabilityUpdated {
            id,
            resource_id,
            start,
            end,
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .unavailability(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        self.audit.record(AuditRecord {
            action: "Update",
            target: guard.reference_number.clone(),
            performed_by: performed_by.to_string(),
            title: "Unavailability updated".into(),
            details: format!("{start} to {end}"),
        });
        Ok(updated)
    }

    /// Soft cancel. Cancelling an already-cancelled period is a no-op.
    pub async fn cancel_unavailability(
        &self,
        resource_id: Ulid,
        id: Ulid,
        performed_by: &str,
    ) -> Result<UnavailabilityPeriod, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        let current = guard
            .unavailability(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if current.status == UnavailabilityStatus::Cancelled {
            return Ok(current);
        }

        let event = Event::UnavailabilityCancelled { id, resource_id };
        self.persist_and_apply(&mut guard, &event).await?;
        let cancelled = guard
            .unavailability(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        self.audit.record(AuditRecord {
            action: "Delete",
            target: guard.reference_number.clone(),
            performed_by: performed_by.to_string(),
            title: "Unavailability cancelled".into(),
            details: format!("{} to {}", current.start, current.end),
        });
        Ok(cancelled)
    }

    /// Non-cancelled periods, sorted by start.
    pub async fn active_unavailability(
        &self,
        resource_id: Ulid,
    ) -> Result<Vec<UnavailabilityPeriod>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard
            .unavailability
            .iter()
            .filter(|p| p.status != UnavailabilityStatus::Cancelled)
            .cloned()
            .collect())
    }
}
