mod approvals;
mod bookings;
mod conflict;
mod error;
mod refnum;
mod resources;
mod unavailability;

pub use approvals::{ApprovalPolicy, PermissivePolicy, SequentialPolicy};
pub use bookings::DEFAULT_CANCEL_REASON;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::audit::AuditLog;
use crate::model::*;
use crate::wal::Wal;

use refnum::RefSequences;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
pub type SharedRequestState = Arc<RwLock<RequestState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
    result: &io::Result<()>,
) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub resources: DashMap<Ulid, SharedResourceState>,
    pub requests: DashMap<Ulid, SharedRequestState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub audit: Arc<AuditLog>,
    /// Reverse lookup: booking id → owning resource id.
    pub(super) booking_to_resource: DashMap<Ulid, Ulid>,
    /// Reference number → entity id, for resources and requests.
    pub(super) by_reference: DashMap<String, Ulid>,
    pub(super) refs: RefSequences,
    pub(super) policy: Box<dyn ApprovalPolicy>,
}

/// Apply an event directly to a ResourceState (no locking — caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, booking_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ResourceStatusChanged { status, .. } => {
            rs.status = *status;
        }
        Event::UnavailabilityAdded { period } => {
            rs.insert_unavailability(period.clone());
        }
        Event::UnavailabilityUpdated {
            id,
            start,
            end,
            reason,
            ..
        } => {
            if let Some(mut period) = rs.take_unavailability(id) {
                period.start = *start;
                period.end = *end;
                period.reason = reason.clone();
                rs.insert_unavailability(period);
            }
        }
        Event::UnavailabilityCancelled { id, .. } => {
            if let Some(period) = rs.unavailability_mut(id) {
                period.status = UnavailabilityStatus::Cancelled;
            }
        }
        Event::BookingCreated { booking } => {
            booking_map.insert(booking.id, booking.resource_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingUpdated {
            id,
            window,
            status,
            confirmed_by,
            confirmed_at,
            cancelled_at,
            cancellation_reason,
            check_in_time,
            check_out_time,
            remarks,
            ..
        } => {
            // Remove + reinsert so a moved window lands in sort order.
            if let Some(mut booking) = rs.take_booking(id) {
                booking.window = *window;
                booking.status = *status;
                booking.confirmed_by = confirmed_by.clone();
                booking.confirmed_at = *confirmed_at;
                booking.cancelled_at = *cancelled_at;
                booking.cancellation_reason = cancellation_reason.clone();
                booking.check_in_time = *check_in_time;
                booking.check_out_time = *check_out_time;
                booking.remarks = remarks.clone();
                rs.insert_booking(booking);
            }
        }
        Event::BookingCancelled {
            id,
            cancelled_at,
            reason,
            ..
        } => {
            if let Some(booking) = rs.bookings.iter_mut().find(|b| &b.id == id) {
                booking.status = BookingStatus::Cancelled;
                booking.cancelled_at = Some(*cancelled_at);
                booking.cancellation_reason = Some(reason.clone());
            }
        }
        // Resource/request lifecycle events are handled at the map level
        Event::ResourceCreated { .. }
        | Event::RequestCreated { .. }
        | Event::RequestBookingLinked { .. }
        | Event::ApprovalStageSet { .. }
        | Event::RequestStatusChanged { .. }
        | Event::RequestArchived { .. } => {}
    }
}

/// Apply a request-scoped event (caller holds the request lock).
fn apply_to_request(req: &mut RequestState, event: &Event) {
    match event {
        Event::RequestBookingLinked { booking_id, .. } => {
            req.booking_id = Some(*booking_id);
        }
        Event::ApprovalStageSet {
            stage, decision, ..
        } => {
            req.approvals.set(*stage, *decision);
        }
        Event::RequestStatusChanged { status, .. } => {
            req.status = *status;
        }
        Event::RequestArchived { archived, .. } => {
            req.archived = *archived;
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, audit: Arc<AuditLog>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            resources: DashMap::new(),
            requests: DashMap::new(),
            wal_tx,
            audit,
            booking_to_resource: DashMap::new(),
            by_reference: DashMap::new(),
            refs: RefSequences::new(),
            policy: Box::new(PermissivePolicy),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::ResourceCreated {
                    id,
                    reference_number,
                    kind,
                    name,
                    requires_approval,
                    booking_advance_days,
                } => {
                    let rs = ResourceState::new(
                        *id,
                        reference_number.clone(),
                        *kind,
                        name.clone(),
                        *requires_approval,
                        *booking_advance_days,
                    );
                    engine.refs.observe(reference_number);
                    engine.by_reference.insert(reference_number.clone(), *id);
                    engine.resources.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::RequestCreated { request } => {
                    engine.refs.observe(&request.reference_number);
                    engine
                        .by_reference
                        .insert(request.reference_number.clone(), request.id);
                    engine
                        .requests
                        .insert(request.id, Arc::new(RwLock::new(request.clone())));
                }
                other => {
                    if let Some(resource_id) = event_resource_id(other) {
                        if let Some(entry) = engine.resources.get(&resource_id) {
                            let rs_arc = entry.clone();
                            let mut guard =
                                rs_arc.try_write().expect("replay: uncontended write");
                            if let Event::BookingCreated { booking } = other {
                                engine.refs.observe(&booking.reference_number);
                            }
                            apply_to_resource(&mut guard, other, &engine.booking_to_resource);
                        }
                    } else if let Some(request_id) = event_request_id(other)
                        && let Some(entry) = engine.requests.get(&request_id)
                    {
                        let req_arc = entry.clone();
                        let mut guard = req_arc.try_write().expect("replay: uncontended write");
                        apply_to_request(&mut guard, other);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Swap the approval ordering policy. Call before sharing the engine.
    pub fn set_policy(&mut self, policy: Box<dyn ApprovalPolicy>) {
        self.policy = policy;
    }

    async fn wal_append_once(&self, event: &Event) -> Result<(), String> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| "WAL writer shut down".to_string())?;
        rx.await
            .map_err(|_| "WAL writer dropped response".to_string())?
            .map_err(|e| e.to_string())
    }

    /// Write event to WAL via the background group-commit writer. One
    /// internal retry after a short backoff; a second failure surfaces as
    /// `Retryable` and the mutation is not applied.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        match self.wal_append_once(event).await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!(error = %first, "WAL append failed, retrying");
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.wal_append_once(event)
                    .await
                    .map_err(EngineError::Retryable)
            }
        }
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn get_request(&self, id: &Ulid) -> Option<SharedRequestState> {
        self.requests.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_resource.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call (caller holds the resource lock).
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.booking_to_resource);
        Ok(())
    }

    /// WAL-append + apply for a request (caller holds the request lock).
    pub(super) async fn persist_and_apply_request(
        &self,
        req: &mut RequestState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_request(req, event);
        Ok(())
    }

    /// Lookup booking → resource, get resource, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .get_resource_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, guard))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.resources.iter() {
            let rs = entry.value().clone();
            let guard = rs.try_read().expect("compact: uncontended read");
            events.push(Event::ResourceCreated {
                id: guard.id,
                reference_number: guard.reference_number.clone(),
                kind: guard.kind,
                name: guard.name.clone(),
                requires_approval: guard.requires_approval,
                booking_advance_days: guard.booking_advance_days,
            });
            if guard.status != ResourceStatus::Available {
                events.push(Event::ResourceStatusChanged {
                    id: guard.id,
                    status: guard.status,
                });
            }
            for period in &guard.unavailability {
                events.push(Event::UnavailabilityAdded {
                    period: period.clone(),
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        // RequestState snapshots carry their approvals/status/archive flag,
        // so one event per request is exact.
        for entry in self.requests.iter() {
            let req = entry.value().clone();
            let guard = req.try_read().expect("compact: uncontended read");
            events.push(Event::RequestCreated {
                request: guard.clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Retryable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Retryable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Retryable(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the owning resource_id from a resource-scoped event.
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ResourceStatusChanged { id, .. } => Some(*id),
        Event::UnavailabilityAdded { period } => Some(period.resource_id),
        Event::UnavailabilityUpdated { resource_id, .. }
        | Event::UnavailabilityCancelled { resource_id, .. }
        | Event::BookingUpdated { resource_id, .. }
        | Event::BookingCancelled { resource_id, .. } => Some(*resource_id),
        Event::BookingCreated { booking } => Some(booking.resource_id),
        _ => None,
    }
}

/// Extract the owning request id from a request-scoped event.
fn event_request_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RequestBookingLinked { id, .. }
        | Event::ApprovalStageSet { id, .. }
        | Event::RequestStatusChanged { id, .. }
        | Event::RequestArchived { id, .. } => Some(*id),
        _ => None,
    }
}
