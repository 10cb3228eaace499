use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::audit::AuditRecord;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

/// Ordering policy for the three sign-off slots. Checked before a stage is
/// recorded; the default accepts any order.
pub trait ApprovalPolicy: Send + Sync {
    fn allow_stage(
        &self,
        chain: &ApprovalChain,
        stage: ApprovalStage,
        decision: ApprovalDecision,
    ) -> Result<(), EngineError>;
}

/// Stages may be set and re-set in any order.
pub struct PermissivePolicy;

impl ApprovalPolicy for PermissivePolicy {
    fn allow_stage(
        &self,
        _chain: &ApprovalChain,
        _stage: ApprovalStage,
        _decision: ApprovalDecision,
    ) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Immediate Head, then GSO Director, then Operations Director. A later
/// stage cannot be decided until the earlier one is Approved.
pub struct SequentialPolicy;

impl ApprovalPolicy for SequentialPolicy {
    fn allow_stage(
        &self,
        chain: &ApprovalChain,
        stage: ApprovalStage,
        _decision: ApprovalDecision,
    ) -> Result<(), EngineError> {
        match stage {
            ApprovalStage::ImmediateHead => Ok(()),
            ApprovalStage::GsoDirector => {
                if chain.immediate_head == ApprovalDecision::Approved {
                    Ok(())
                } else {
                    Err(EngineError::Validation(
                        "immediate head approval required first",
                    ))
                }
            }
            ApprovalStage::OperationsDirector => {
                if chain.gso_director == ApprovalDecision::Approved {
                    Ok(())
                } else {
                    Err(EngineError::Validation(
                        "GSO director approval required first",
                    ))
                }
            }
        }
    }
}

/// What the chain implies for the request as a whole.
fn derived_status(chain: &ApprovalChain) -> RequestStatus {
    if chain.fully_approved() {
        RequestStatus::Approved
    } else if chain.any_denied() {
        RequestStatus::Denied
    } else {
        RequestStatus::Pending
    }
}

impl Engine {
    /// Create a governed request. When it names a resource and a window,
    /// the bridge also places a provisional Pending booking; a booking
    /// failure (conflict, resource down) never fails the request — it is
    /// logged and the request is left unlinked.
    pub async fn create_request(
        &self,
        new: NewRequest,
        performed_by: &str,
    ) -> Result<RequestState, EngineError> {
        if self.requests.len() >= MAX_REQUESTS {
            return Err(EngineError::LimitExceeded("too many requests"));
        }
        if new.title.trim().is_empty() {
            return Err(EngineError::Validation("request title required"));
        }
        if new.title.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("request title too long"));
        }

        let id = Ulid::new();
        let reference_number = self.refs.next(new.kind.prefix());
        let request = RequestState {
            id,
            reference_number: reference_number.clone(),
            kind: new.kind,
            title: new.title.clone(),
            requester: new.requester.clone(),
            resource_id: new.resource_id,
            window: new.window,
            purpose: new.purpose,
            status: RequestStatus::Pending,
            approvals: ApprovalChain::default(),
            archived: false,
            booking_id: None,
        };
        let event = Event::RequestCreated {
            request: request.clone(),
        };
        self.wal_append(&event).await?;
        let arc = Arc::new(RwLock::new(request));
        self.by_reference.insert(reference_number.clone(), id);
        self.requests.insert(id, arc.clone());
        metrics::counter!(
            observability::REQUESTS_CREATED_TOTAL,
            "kind" => new.kind.prefix()
        )
        .increment(1);
        self.audit.record(AuditRecord {
            action: "Create",
            target: reference_number.clone(),
            performed_by: performed_by.to_string(),
            title: "Request filed".into(),
            details: new.title,
        });

        if let (Some(resource_id), Some(window)) = (new.resource_id, new.window) {
            let placed = self
                .create_booking(
                    NewBooking {
                        resource_id,
                        requester: new.requester,
                        window,
                        source_request_id: Some(id),
                        confirm: false,
                        confirmed_by: None,
                        remarks: None,
                    },
                    performed_by,
                )
                .await;
            match placed {
                Ok(booking) => {
                    let mut guard = arc.write().await;
                    let link = Event::RequestBookingLinked {
                        id,
                        booking_id: booking.id,
                    };
                    self.persist_and_apply_request(&mut guard, &link).await?;
                }
                Err(e) => {
                    tracing::warn!(
                        request = %reference_number,
                        error = %e,
                        "request filed without provisional booking"
                    );
                    self.audit.record(AuditRecord {
                        action: "Create",
                        target: reference_number.clone(),
                        performed_by: performed_by.to_string(),
                        title: "Provisional booking failed".into(),
                        details: e.to_string(),
                    });
                }
            }
        }

        let guard = arc.read().await;
        Ok(guard.clone())
    }

    /// Record one stage of the approval chain. On the transition to fully
    /// approved, the linked provisional booking (if any, still Pending) is
    /// confirmed, stamped with the final approver.
    pub async fn set_approval_stage(
        &self,
        reference: &str,
        stage: ApprovalStage,
        decision: ApprovalDecision,
        actor: &str,
    ) -> Result<RequestState, EngineError> {
        let arc = self
            .request_arc(reference)
            .ok_or_else(|| EngineError::RequestNotFound(reference.to_string()))?;
        let mut guard = arc.write().await;
        if guard.archived {
            return Err(EngineError::RequestNotFound(reference.to_string()));
        }
        self.policy.allow_stage(&guard.approvals, stage, decision)?;

        let id = guard.id;
        let event = Event::ApprovalStageSet {
            id,
            stage,
            decision,
            actor: actor.to_string(),
        };
        self.persist_and_apply_request(&mut guard, &event).await?;
        metrics::counter!(
            observability::APPROVAL_STAGES_SET_TOTAL,
            "stage" => stage.label(),
            "decision" => decision.to_string()
        )
        .increment(1);

        // Completed/Cancelled requests keep their terminal status.
        let implied = derived_status(&guard.approvals);
        let newly_approved = implied == RequestStatus::Approved
            && guard.status != RequestStatus::Approved;
        if implied != guard.status
            && matches!(
                guard.status,
                RequestStatus::Pending | RequestStatus::Approved | RequestStatus::Denied
            )
        {
            let event = Event::RequestStatusChanged { id, status: implied };
            self.persist_and_apply_request(&mut guard, &event).await?;
        }
        self.audit.record(AuditRecord {
            action: "Update",
            target: guard.reference_number.clone(),
            performed_by: actor.to_string(),
            title: "Approval stage recorded".into(),
            details: format!("{}: {decision}", stage.label()),
        });
        let booking_id = guard.booking_id;
        let result = guard.clone();
        drop(guard);

        // Lock order is always request before resource, so release the
        // request lock before touching the booking.
        if newly_approved && let Some(booking_id) = booking_id {
            self.confirm_linked_booking(booking_id, actor).await;
        }

        Ok(result)
    }

    async fn confirm_linked_booking(&self, booking_id: Ulid, actor: &str) {
        let still_pending = matches!(
            self.booking(&booking_id).await,
            Some(b) if b.status == BookingStatus::Pending
        );
        if !still_pending {
            return;
        }
        let patch = BookingPatch {
            status: Some(BookingStatus::Confirmed),
            confirmed_by: Some(actor.to_string()),
            ..BookingPatch::default()
        };
        if let Err(e) = self.update_booking(booking_id, patch, actor).await {
            tracing::warn!(booking = %booking_id, error = %e, "linked booking not confirmed");
        }
    }

    /// Force the request status, bypassing the chain (Completed/Cancelled).
    pub async fn set_request_status(
        &self,
        reference: &str,
        status: RequestStatus,
        performed_by: &str,
    ) -> Result<RequestState, EngineError> {
        let arc = self
            .request_arc(reference)
            .ok_or_else(|| EngineError::RequestNotFound(reference.to_string()))?;
        let mut guard = arc.write().await;
        if guard.archived {
            return Err(EngineError::RequestNotFound(reference.to_string()));
        }
        let event = Event::RequestStatusChanged {
            id: guard.id,
            status,
        };
        self.persist_and_apply_request(&mut guard, &event).await?;
        self.audit.record(AuditRecord {
            action: "Update",
            target: guard.reference_number.clone(),
            performed_by: performed_by.to_string(),
            title: "Request status changed".into(),
            details: format!("{status:?}"),
        });
        Ok(guard.clone())
    }

    /// Soft delete (and its undo). Setting the flag to its current value is
    /// an error, so repeated deletes surface to the caller.
    pub async fn archive_request(
        &self,
        reference: &str,
        archived: bool,
        performed_by: &str,
    ) -> Result<(), EngineError> {
        let arc = self
            .request_arc(reference)
            .ok_or_else(|| EngineError::RequestNotFound(reference.to_string()))?;
        let mut guard = arc.write().await;
        if guard.archived == archived {
            return Err(EngineError::RequestNotFound(reference.to_string()));
        }
        let event = Event::RequestArchived {
            id: guard.id,
            archived,
        };
        self.persist_and_apply_request(&mut guard, &event).await?;
        self.audit.record(AuditRecord {
            action: if archived { "Delete" } else { "Update" },
            target: guard.reference_number.clone(),
            performed_by: performed_by.to_string(),
            title: if archived {
                "Request archived".into()
            } else {
                "Request restored".into()
            },
            details: guard.title.clone(),
        });
        Ok(())
    }

    pub async fn request(&self, reference: &str) -> Option<RequestState> {
        let arc = self.request_arc(reference)?;
        let guard = arc.read().await;
        Some(guard.clone())
    }

    pub async fn list_requests(&self, archived: bool) -> Vec<RequestState> {
        let mut out = Vec::new();
        for entry in self.requests.iter() {
            let arc = entry.value().clone();
            let guard = arc.read().await;
            if guard.archived == archived {
                out.push(guard.clone());
            }
        }
        out.sort_by(|a, b| a.reference_number.cmp(&b.reference_number));
        out
    }

    fn request_arc(&self, reference: &str) -> Option<super::SharedRequestState> {
        let id = self.by_reference.get(reference).map(|e| *e.value())?;
        self.get_request(&id)
    }
}
