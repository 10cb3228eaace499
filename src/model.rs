use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

// ── Resources ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Vehicle,
    Venue,
}

impl ResourceKind {
    pub fn resource_prefix(self) -> &'static str {
        match self {
            ResourceKind::Vehicle => "VEH",
            ResourceKind::Venue => "VEN",
        }
    }

    pub fn booking_prefix(self) -> &'static str {
        match self {
            ResourceKind::Vehicle => "VHB",
            ResourceKind::Venue => "VNB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Available,
    Unavailable,
    UnderMaintenance,
    Archived,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Available => write!(f, "Available"),
            ResourceStatus::Unavailable => write!(f, "Unavailable"),
            ResourceStatus::UnderMaintenance => write!(f, "Under Maintenance"),
            ResourceStatus::Archived => write!(f, "Archived"),
        }
    }
}

// ── Time windows ─────────────────────────────────────────────────

/// A booking slot: one calendar date plus a start time and an optional end
/// time. `end == None` is an open-ended trip and blocks the resource from
/// `start` until the end of `date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
}

impl TimeWindow {
    pub fn new(date: NaiveDate, start: NaiveTime, end: Option<NaiveTime>) -> Self {
        Self { date, start, end }
    }

    /// The window as a half-open `[start, end)` datetime span.
    pub fn span(&self) -> (NaiveDateTime, NaiveDateTime) {
        let start = self.date.and_time(self.start);
        let end = match self.end {
            Some(t) => self.date.and_time(t),
            None => self
                .date
                .succ_opt()
                .unwrap_or(self.date)
                .and_time(NaiveTime::MIN),
        };
        (start, end)
    }

    /// Half-open overlap: `[a, b)` and `[c, d)` overlap iff `a < d && c < b`.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        let (a, b) = self.span();
        let (c, d) = other.span();
        a < d && c < b
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Pending and Confirmed bookings hold their slot; Cancelled and
    /// Completed ones do not.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    /// Display-only, e.g. `VHB-2025-00001`. Identity is the Ulid.
    pub reference_number: String,
    pub resource_id: Ulid,
    /// Set when the booking was placed by the request-to-booking bridge.
    pub source_request_id: Option<Ulid>,
    pub requester: String,
    pub window: TimeWindow,
    pub status: BookingStatus,
    pub confirmed_by: Option<String>,
    pub confirmed_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancellation_reason: Option<String>,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub remarks: Option<String>,
}

// ── Unavailability ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailabilityStatus {
    Active,
    Cancelled,
    Expired,
}

/// A maintenance/blackout window declared by staff, independent of any
/// booking. Soft-deleted: cancellation flips the status, the row stays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailabilityPeriod {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub reason: Option<String>,
    pub is_recurring: bool,
    /// Opaque JSON recurrence description; stored verbatim, never expanded.
    pub recurrence_pattern: Option<String>,
    pub status: UnavailabilityStatus,
}

impl UnavailabilityPeriod {
    /// Whether this period blocks the given booking window. The
    /// intersection test is inclusive on both ends: a booking touching the
    /// boundary of a maintenance window conflicts.
    pub fn blocks(&self, window: &TimeWindow) -> bool {
        if self.status == UnavailabilityStatus::Cancelled {
            return false;
        }
        let (s, e) = window.span();
        self.start <= e && s <= self.end
    }

    pub fn recurrence_json(&self) -> Option<serde_json::Value> {
        self.recurrence_pattern
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

// ── Resource state ───────────────────────────────────────────────

/// A bookable resource plus everything scheduled on it. One `RwLock`
/// guards the whole struct, so a writer sees bookings and unavailability
/// atomically.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub reference_number: String,
    pub kind: ResourceKind,
    pub name: String,
    pub status: ResourceStatus,
    pub requires_approval: bool,
    /// How far ahead bookings may be placed. Carried configuration; not
    /// enforced by the engine (matches upstream behavior).
    pub booking_advance_days: u32,
    /// All bookings ever made, cancelled rows retained, sorted by
    /// `(window.date, window.start)`.
    pub bookings: Vec<Booking>,
    /// Blackout windows, cancelled rows retained, sorted by `start`.
    pub unavailability: Vec<UnavailabilityPeriod>,
}

impl ResourceState {
    pub fn new(
        id: Ulid,
        reference_number: String,
        kind: ResourceKind,
        name: String,
        requires_approval: bool,
        booking_advance_days: u32,
    ) -> Self {
        Self {
            id,
            reference_number,
            kind,
            name,
            status: ResourceStatus::Available,
            requires_approval,
            booking_advance_days,
            bookings: Vec::new(),
            unavailability: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by `(date, start)`.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.window.date, booking.window.start);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.window.date, b.window.start))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| &b.id == id)
    }

    pub fn take_booking(&mut self, id: &Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| &b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Pending/Confirmed bookings on the given date. Uses binary search to
    /// skip everything scheduled on earlier dates.
    pub fn active_bookings_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        let from = self.bookings.partition_point(|b| b.window.date < date);
        self.bookings[from..]
            .iter()
            .take_while(move |b| b.window.date == date)
            .filter(|b| b.status.is_active())
    }

    /// Insert an unavailability period maintaining sort order by `start`.
    pub fn insert_unavailability(&mut self, period: UnavailabilityPeriod) {
        let pos = self
            .unavailability
            .binary_search_by_key(&period.start, |p| p.start)
            .unwrap_or_else(|e| e);
        self.unavailability.insert(pos, period);
    }

    pub fn unavailability(&self, id: &Ulid) -> Option<&UnavailabilityPeriod> {
        self.unavailability.iter().find(|p| &p.id == id)
    }

    pub fn unavailability_mut(&mut self, id: &Ulid) -> Option<&mut UnavailabilityPeriod> {
        self.unavailability.iter_mut().find(|p| &p.id == id)
    }

    pub fn take_unavailability(&mut self, id: &Ulid) -> Option<UnavailabilityPeriod> {
        let pos = self.unavailability.iter().position(|p| &p.id == id)?;
        Some(self.unavailability.remove(pos))
    }

    pub fn summary(&self) -> ResourceSummary {
        ResourceSummary {
            id: self.id,
            reference_number: self.reference_number.clone(),
            kind: self.kind,
            name: self.name.clone(),
            status: self.status,
            requires_approval: self.requires_approval,
            booking_advance_days: self.booking_advance_days,
        }
    }
}

/// Resource header without the booking/unavailability rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub id: Ulid,
    pub reference_number: String,
    pub kind: ResourceKind,
    pub name: String,
    pub status: ResourceStatus,
    pub requires_approval: bool,
    pub booking_advance_days: u32,
}

// ── Approval chains & governed requests ──────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStage {
    ImmediateHead,
    GsoDirector,
    OperationsDirector,
}

impl ApprovalStage {
    pub fn label(self) -> &'static str {
        match self {
            ApprovalStage::ImmediateHead => "immediate head",
            ApprovalStage::GsoDirector => "GSO director",
            ApprovalStage::OperationsDirector => "operations director",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    #[default]
    Pending,
    Approved,
    Denied,
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalDecision::Pending => write!(f, "Pending"),
            ApprovalDecision::Approved => write!(f, "Approved"),
            ApprovalDecision::Denied => write!(f, "Denied"),
        }
    }
}

/// Three independent sign-off slots. Stages may be set in any order and
/// re-set later; ordering policy, if any, is layered on via
/// `ApprovalPolicy`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalChain {
    pub immediate_head: ApprovalDecision,
    pub gso_director: ApprovalDecision,
    pub operations_director: ApprovalDecision,
}

impl ApprovalChain {
    pub fn get(&self, stage: ApprovalStage) -> ApprovalDecision {
        match stage {
            ApprovalStage::ImmediateHead => self.immediate_head,
            ApprovalStage::GsoDirector => self.gso_director,
            ApprovalStage::OperationsDirector => self.operations_director,
        }
    }

    pub fn set(&mut self, stage: ApprovalStage, decision: ApprovalDecision) {
        match stage {
            ApprovalStage::ImmediateHead => self.immediate_head = decision,
            ApprovalStage::GsoDirector => self.gso_director = decision,
            ApprovalStage::OperationsDirector => self.operations_director = decision,
        }
    }

    pub fn fully_approved(&self) -> bool {
        self.immediate_head == ApprovalDecision::Approved
            && self.gso_director == ApprovalDecision::Approved
            && self.operations_director == ApprovalDecision::Approved
    }

    pub fn any_denied(&self) -> bool {
        self.immediate_head == ApprovalDecision::Denied
            || self.gso_director == ApprovalDecision::Denied
            || self.operations_director == ApprovalDecision::Denied
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Job,
    Vehicle,
    Venue,
    Purchasing,
}

impl RequestKind {
    pub fn prefix(self) -> &'static str {
        match self {
            RequestKind::Job => "JR",
            RequestKind::Vehicle => "SV",
            RequestKind::Venue => "VR",
            RequestKind::Purchasing => "PR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Completed,
    Cancelled,
}

/// A governed request (job / vehicle / venue / purchasing) carrying the
/// approval chain. Archived requests are hidden, never destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestState {
    pub id: Ulid,
    pub reference_number: String,
    pub kind: RequestKind,
    pub title: String,
    pub requester: String,
    /// The resource the request wants, if any; drives the bridge.
    pub resource_id: Option<Ulid>,
    pub window: Option<TimeWindow>,
    pub purpose: Option<String>,
    pub status: RequestStatus,
    pub approvals: ApprovalChain,
    pub archived: bool,
    /// Provisional booking placed by the bridge, when it succeeded.
    pub booking_id: Option<Ulid>,
}

// ── Input DTOs ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub resource_id: Ulid,
    pub requester: String,
    pub window: TimeWindow,
    pub source_request_id: Option<Ulid>,
    /// Skip Pending and confirm immediately (stamps `confirmed_at`).
    pub confirm: bool,
    pub confirmed_by: Option<String>,
    pub remarks: Option<String>,
}

/// Exactly the caller-mutable booking fields. System-managed stamps
/// (`reference_number`, `confirmed_at`, `cancelled_at`) are written by the
/// engine on the corresponding status transitions only.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub window: Option<TimeWindow>,
    pub status: Option<BookingStatus>,
    pub confirmed_by: Option<String>,
    pub cancellation_reason: Option<String>,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRequest {
    pub kind: RequestKind,
    pub title: String,
    pub requester: String,
    pub resource_id: Option<Ulid>,
    pub window: Option<TimeWindow>,
    pub purpose: Option<String>,
}

/// Advisory pre-flight answer. May be stale by the time a real create is
/// attempted; `create_booking` always re-validates under the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityReport {
    pub available: bool,
    pub reason: Option<String>,
    pub conflicting_reference: Option<String>,
}

// ── WAL events ───────────────────────────────────────────────────

/// The WAL record format. Replaying these in order reconstructs the
/// engine state exactly, including soft-deleted rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        reference_number: String,
        kind: ResourceKind,
        name: String,
        requires_approval: bool,
        booking_advance_days: u32,
    },
    ResourceStatusChanged {
        id: Ulid,
        status: ResourceStatus,
    },
    UnavailabilityAdded {
        period: UnavailabilityPeriod,
    },
    UnavailabilityUpdated {
        id: Ulid,
        resource_id: Ulid,
        start: NaiveDateTime,
        end: NaiveDateTime,
        reason: Option<String>,
    },
    UnavailabilityCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingUpdated {
        id: Ulid,
        resource_id: Ulid,
        window: TimeWindow,
        status: BookingStatus,
        confirmed_by: Option<String>,
        confirmed_at: Option<NaiveDateTime>,
        cancelled_at: Option<NaiveDateTime>,
        cancellation_reason: Option<String>,
        check_in_time: Option<NaiveDateTime>,
        check_out_time: Option<NaiveDateTime>,
        remarks: Option<String>,
    },
    BookingCancelled {
        id: Ulid,
        resource_id: Ulid,
        cancelled_at: NaiveDateTime,
        reason: String,
    },
    RequestCreated {
        request: RequestState,
    },
    RequestBookingLinked {
        id: Ulid,
        booking_id: Ulid,
    },
    ApprovalStageSet {
        id: Ulid,
        stage: ApprovalStage,
        decision: ApprovalDecision,
        actor: String,
    },
    RequestStatusChanged {
        id: Ulid,
        status: RequestStatus,
    },
    RequestArchived {
        id: Ulid,
        archived: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        s.parse().unwrap()
    }

    fn window(date: &str, start: &str, end: &str) -> TimeWindow {
        TimeWindow::new(d(date), t(start), Some(t(end)))
    }

    fn booking_at(resource_id: Ulid, date: &str, start: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            reference_number: "VHB-2025-00001".into(),
            resource_id,
            source_request_id: None,
            requester: "USR-2025-00001".into(),
            window: TimeWindow::new(
                d(date),
                t(start),
                Some(t(start) + chrono::Duration::hours(1)),
            ),
            status: BookingStatus::Pending,
            confirmed_by: None,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            check_in_time: None,
            check_out_time: None,
            remarks: None,
        }
    }

    #[test]
    fn window_overlap_is_half_open() {
        let a = window("2025-03-01", "09:00", "11:00");
        let b = window("2025-03-01", "10:00", "12:00");
        let c = window("2025-03-01", "11:00", "13:00");
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back, not overlapping
    }

    #[test]
    fn windows_on_different_dates_never_overlap() {
        let a = window("2025-03-01", "09:00", "11:00");
        let b = window("2025-03-02", "09:00", "11:00");
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn open_ended_window_blocks_rest_of_day() {
        let open = TimeWindow::new(d("2025-03-01"), t("14:00"), None);
        let evening = window("2025-03-01", "20:00", "22:00");
        let morning = window("2025-03-01", "08:00", "14:00");
        assert!(open.overlaps(&evening));
        assert!(!open.overlaps(&morning)); // ends exactly at the open start
    }

    #[test]
    fn unavailability_blocking_is_inclusive() {
        let period = UnavailabilityPeriod {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            start: d("2025-03-01").and_time(t("08:00")),
            end: d("2025-03-01").and_time(t("12:00")),
            reason: Some("engine overhaul".into()),
            is_recurring: false,
            recurrence_pattern: None,
            status: UnavailabilityStatus::Active,
        };
        // Touching the boundary conflicts.
        assert!(period.blocks(&window("2025-03-01", "06:00", "08:00")));
        assert!(period.blocks(&window("2025-03-01", "12:00", "13:00")));
        assert!(period.blocks(&window("2025-03-01", "09:00", "10:00")));
        assert!(!period.blocks(&window("2025-03-02", "09:00", "10:00")));
    }

    #[test]
    fn cancelled_unavailability_never_blocks() {
        let period = UnavailabilityPeriod {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            start: d("2025-03-01").and_time(t("08:00")),
            end: d("2025-03-01").and_time(t("12:00")),
            reason: None,
            is_recurring: false,
            recurrence_pattern: None,
            status: UnavailabilityStatus::Cancelled,
        };
        assert!(!period.blocks(&window("2025-03-01", "09:00", "10:00")));
    }

    #[test]
    fn booking_insert_keeps_date_then_time_order() {
        let mut rs = ResourceState::new(
            Ulid::new(),
            "VEH-2025-00001".into(),
            ResourceKind::Vehicle,
            "Coaster bus".into(),
            true,
            7,
        );
        for (date, start) in [
            ("2025-03-02", "09:00"),
            ("2025-03-01", "13:00"),
            ("2025-03-01", "08:00"),
        ] {
            rs.insert_booking(booking_at(rs.id, date, start));
        }
        let starts: Vec<_> = rs
            .bookings
            .iter()
            .map(|b| (b.window.date, b.window.start))
            .collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn active_bookings_on_filters_date_and_status() {
        let mut rs = ResourceState::new(
            Ulid::new(),
            "VEN-2025-00001".into(),
            ResourceKind::Venue,
            "Auditorium".into(),
            true,
            14,
        );
        rs.insert_booking(booking_at(rs.id, "2025-03-01", "08:00"));
        let mut cancelled = booking_at(rs.id, "2025-03-01", "10:00");
        cancelled.status = BookingStatus::Cancelled;
        rs.insert_booking(cancelled);
        rs.insert_booking(booking_at(rs.id, "2025-03-02", "08:00"));

        let hits: Vec<_> = rs.active_bookings_on(d("2025-03-01")).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].window.start, t("08:00"));
    }

    #[test]
    fn chain_fully_approved() {
        let mut chain = ApprovalChain::default();
        assert!(!chain.fully_approved());
        chain.set(ApprovalStage::ImmediateHead, ApprovalDecision::Approved);
        chain.set(ApprovalStage::GsoDirector, ApprovalDecision::Approved);
        assert!(!chain.fully_approved());
        chain.set(ApprovalStage::OperationsDirector, ApprovalDecision::Approved);
        assert!(chain.fully_approved());
        assert!(!chain.any_denied());
    }

    #[test]
    fn chain_stage_is_resettable() {
        let mut chain = ApprovalChain::default();
        chain.set(ApprovalStage::GsoDirector, ApprovalDecision::Denied);
        assert!(chain.any_denied());
        chain.set(ApprovalStage::GsoDirector, ApprovalDecision::Approved);
        assert!(!chain.any_denied());
        assert_eq!(
            chain.get(ApprovalStage::GsoDirector),
            ApprovalDecision::Approved
        );
    }

    #[test]
    fn recurrence_pattern_round_trips_as_json() {
        let period = UnavailabilityPeriod {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            start: d("2025-01-06").and_time(t("07:00")),
            end: d("2025-01-06").and_time(t("09:00")),
            reason: Some("weekly wash".into()),
            is_recurring: true,
            recurrence_pattern: Some(r#"{"freq":"weekly","day":"Mon"}"#.into()),
            status: UnavailabilityStatus::Active,
        };
        let json = period.recurrence_json().unwrap();
        assert_eq!(json["freq"], "weekly");
    }

    #[test]
    fn event_serialization_round_trip() {
        let event = Event::BookingCreated {
            booking: booking_at(Ulid::new(), "2025-03-01", "09:00"),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
