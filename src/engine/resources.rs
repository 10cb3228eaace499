use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::audit::AuditRecord;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, SharedResourceState};

impl Engine {
    pub async fn create_resource(
        &self,
        kind: ResourceKind,
        name: String,
        requires_approval: bool,
        booking_advance_days: u32,
        performed_by: &str,
    ) -> Result<ResourceSummary, EngineError> {
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if name.trim().is_empty() {
            return Err(EngineError::Validation("resource name required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }

        let id = Ulid::new();
        let reference_number = self.refs.next(kind.resource_prefix());
        let event = Event::ResourceCreated {
            id,
            reference_number: reference_number.clone(),
            kind,
            name: name.clone(),
            requires_approval,
            booking_advance_days,
        };
        self.wal_append(&event).await?;

        let rs = ResourceState::new(
            id,
            reference_number.clone(),
            kind,
            name.clone(),
            requires_approval,
            booking_advance_days,
        );
        let summary = rs.summary();
        self.by_reference.insert(reference_number.clone(), id);
        self.resources.insert(id, Arc::new(RwLock::new(rs)));
        metrics::gauge!(observability::RESOURCES_ACTIVE).increment(1.0);
        self.audit.record(AuditRecord {
            action: "Create",
            target: reference_number,
            performed_by: performed_by.to_string(),
            title: "Resource registered".into(),
            details: name,
        });
        Ok(summary)
    }

    pub fn resource_by_reference(&self, reference: &str) -> Option<SharedResourceState> {
        let id = self.by_reference.get(reference).map(|e| *e.value())?;
        self.get_resource(&id)
    }

    pub async fn resource_summary(&self, id: &Ulid) -> Option<ResourceSummary> {
        let rs = self.get_resource(id)?;
        let guard = rs.read().await;
        Some(guard.summary())
    }

    /// All resources except archived ones, sorted by reference number.
    pub async fn list_resources(&self) -> Vec<ResourceSummary> {
        let mut out = Vec::new();
        for entry in self.resources.iter() {
            let rs = entry.value().clone();
            let guard = rs.read().await;
            if guard.status != ResourceStatus::Archived {
                out.push(guard.summary());
            }
        }
        out.sort_by(|a, b| a.reference_number.cmp(&b.reference_number));
        out
    }

    pub async fn list_resources_by_status(&self, status: ResourceStatus) -> Vec<ResourceSummary> {
        let mut out = Vec::new();
        for entry in self.resources.iter() {
            let rs = entry.value().clone();
            let guard = rs.read().await;
            if guard.status == status {
                out.push(guard.summary());
            }
        }
        out.sort_by(|a, b| a.reference_number.cmp(&b.reference_number));
        out
    }

    pub async fn set_resource_status(
        &self,
        id: Ulid,
        status: ResourceStatus,
        performed_by: &str,
    ) -> Result<(), EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let previous = guard.status;
        if previous == status {
            return Ok(());
        }

        let event = Event::ResourceStatusChanged { id, status };
        self.persist_and_apply(&mut guard, &event).await?;

        match (previous, status) {
            (ResourceStatus::Archived, _) => {
                metrics::gauge!(observability::RESOURCES_ACTIVE).increment(1.0)
            }
            (_, ResourceStatus::Archived) => {
                metrics::gauge!(observability::RESOURCES_ACTIVE).decrement(1.0)
            }
            _ => {}
        }
        self.audit.record(AuditRecord {
            action: "Update",
            target: guard.reference_number.clone(),
            performed_by: performed_by.to_string(),
            title: "Resource status changed".into(),
            details: format!("{previous} -> {status}"),
        });
        Ok(())
    }

    /// Soft delete: flips the status to Archived. Archiving a resource that
    /// is already archived (or missing) is NotFound, so repeated deletes
    /// surface to the caller.
    pub async fn archive_resource(&self, id: Ulid, performed_by: &str) -> Result<(), EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if guard.status == ResourceStatus::Archived {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::ResourceStatusChanged {
            id,
            status: ResourceStatus::Archived,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::gauge!(observability::RESOURCES_ACTIVE).decrement(1.0);
        self.audit.record(AuditRecord {
            action: "Delete",
            target: guard.reference_number.clone(),
            performed_by: performed_by.to_string(),
            title: "Resource archived".into(),
            details: guard.name.clone(),
        });
        Ok(())
    }
}
