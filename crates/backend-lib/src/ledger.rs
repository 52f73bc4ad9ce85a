// ============================
// crates/backend-lib/src/ledger.rs
// ============================
//! Staffing ledger.
//!
//! Owns the applied, accepted and rejected sets of every event. A worker
//! is in at most one of them, and `status_to_pay` is recomputed on every
//! write. Mutations of one event run under an event-level lock and are
//! written with compare-and-set on the row version, so a writer outside
//! this process cannot be silently overwritten either.
//!
//! Rejecting a worker also evicts their live connections from the
//! event's chat room.
use std::sync::Arc;

use chrono::Utc;
use crewchat_common::{CapacitySnapshot, PaymentQuote};
use dashmap::DashMap;
use metrics::counter;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::StaffingSettings;
use crate::error::AppError;
use crate::gate;
use crate::metrics::{APPLICATION_SUBMITTED, CREW_ACCEPTED, CREW_REJECTED, LEDGER_CAS_RETRY};
use crate::models::{Application, Event, EventStatus, Evidence, Membership};
use crate::registry::RoomRegistry;
use crate::storage::{Storage, StoreClient};
use crate::validation::{normalize_phone_number, validate_evidence, validate_phone_number};

pub struct StaffingLedger<S> {
    store: Arc<StoreClient<S>>,
    registry: Arc<RoomRegistry>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    settings: StaffingSettings,
}

impl<S: Storage> StaffingLedger<S> {
    pub fn new(
        store: Arc<StoreClient<S>>,
        registry: Arc<RoomRegistry>,
        settings: StaffingSettings,
    ) -> Self {
        Self {
            store,
            registry,
            locks: DashMap::new(),
            settings,
        }
    }

    /// Current staffing counters, visible to the organizer and accepted crew
    pub async fn snapshot(&self, event_id: Uuid, caller: &str) -> Result<CapacitySnapshot, AppError> {
        validate_phone_number(caller)?;
        let event = gate::load_authorized(&self.store, event_id, caller).await?;
        Ok(event.capacity_snapshot())
    }

    /// Move a worker into the accepted crew. Accepting twice is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn accept(
        &self,
        event_id: Uuid,
        organizer: &str,
        worker: &str,
    ) -> Result<CapacitySnapshot, AppError> {
        validate_phone_number(organizer)?;
        validate_phone_number(worker)?;

        let mut wrote = false;
        let event = self
            .update_event(event_id, |event| {
                wrote = false;
                gate::require_organizer(event, organizer)?;
                if event.accepted.contains(worker) {
                    return Ok(false);
                }
                if !event.has_open_slot() {
                    return Err(AppError::CapacityReached {
                        event_id: event.id,
                        capacity: event.capacity(),
                    });
                }
                event.applied.remove(worker);
                event.rejected.remove(worker);
                event.accepted.insert(worker.to_string());
                wrote = true;
                Ok(true)
            })
            .await?;

        if wrote {
            counter!(CREW_ACCEPTED).increment(1);
            tracing::info!(
                accepted = event.accepted.len(),
                capacity = event.capacity(),
                status_to_pay = event.status_to_pay,
                "crew member accepted"
            );
        }
        Ok(event.capacity_snapshot())
    }

    /// Move an applicant or crew member to the rejected set and drop their
    /// connections from the event's room
    #[tracing::instrument(skip(self))]
    pub async fn reject(
        &self,
        event_id: Uuid,
        organizer: &str,
        worker: &str,
    ) -> Result<CapacitySnapshot, AppError> {
        validate_phone_number(organizer)?;
        validate_phone_number(worker)?;

        let mut wrote = false;
        let event = self
            .update_event(event_id, |event| {
                wrote = false;
                gate::require_organizer(event, organizer)?;
                match event.membership(worker) {
                    Membership::Rejected => Ok(false),
                    Membership::None => Err(AppError::ApplicationNotFound {
                        event_id: event.id,
                        worker: worker.to_string(),
                    }),
                    Membership::Applied | Membership::Accepted => {
                        event.applied.remove(worker);
                        event.accepted.remove(worker);
                        event.rejected.insert(worker.to_string());
                        wrote = true;
                        Ok(true)
                    },
                }
            })
            .await?;

        if wrote {
            counter!(CREW_REJECTED).increment(1);
            tracing::info!(accepted = event.accepted.len(), "application rejected");
        }
        // A repeated reject still evicts, in case the first one failed here
        self.evict_from_room(event_id, worker).await;
        Ok(event.capacity_snapshot())
    }

    async fn evict_from_room(&self, event_id: Uuid, worker: &str) {
        match self
            .store
            .read("get_room_for_event", |s| s.get_room_for_event(event_id))
            .await
        {
            Ok(Some(room)) => {
                self.registry.evict_identity(room.id, worker);
            },
            Ok(None) => {},
            // Sends re-check membership, so a missed eviction only leaks broadcasts
            Err(e) => tracing::warn!(%event_id, "could not evict rejected worker: {e}"),
        }
    }

    /// Submit an application with evidence
    #[tracing::instrument(skip(self, evidence), fields(images = evidence.images.len()))]
    pub async fn apply(
        &self,
        event_id: Uuid,
        worker: &str,
        evidence: Evidence,
    ) -> Result<Application, AppError> {
        validate_phone_number(worker)?;
        validate_evidence(
            &evidence.images,
            evidence.experience.as_deref(),
            self.settings.max_evidence_items,
        )?;

        let lock = self.lock_for(event_id);
        let _guard = lock.lock().await;

        let event = gate::load_event(&self.store, event_id).await?;
        check_can_apply(&event, worker)?;

        let application = Application {
            event_id,
            phone_number: worker.to_string(),
            images: evidence.images,
            experience: evidence.experience,
            submitted_at: Utc::now(),
        };
        let stored = match self
            .store
            .write("insert_application", |s| s.insert_application(&application))
            .await
        {
            Ok(()) => application,
            // Row left behind by an earlier attempt whose event update failed
            Err(AppError::DuplicateApplication { .. }) => self
                .store
                .read("get_application", |s| s.get_application(event_id, worker))
                .await?
                .ok_or_else(|| AppError::Internal("application row vanished".to_string()))?,
            Err(e) => return Err(e),
        };

        let saved_marker = normalize_phone_number(worker)?;
        self.update_event_locked(event_id, |event| {
            check_can_apply(event, worker)?;
            event.applied.insert(worker.to_string());
            event.saved.remove(worker);
            event.saved.remove(&saved_marker);
            Ok(true)
        })
        .await?;

        counter!(APPLICATION_SUBMITTED).increment(1);
        tracing::info!("application submitted");
        Ok(stored)
    }

    /// Take back a pending application
    #[tracing::instrument(skip(self))]
    pub async fn withdraw(&self, event_id: Uuid, worker: &str) -> Result<CapacitySnapshot, AppError> {
        validate_phone_number(worker)?;

        let lock = self.lock_for(event_id);
        let _guard = lock.lock().await;

        let removed = self
            .store
            .write("delete_application", |s| s.delete_application(event_id, worker))
            .await?;
        let event = self
            .update_event_locked(event_id, |event| Ok(event.applied.remove(worker)))
            .await?;

        if !removed {
            return Err(AppError::ApplicationNotFound {
                event_id,
                worker: worker.to_string(),
            });
        }
        tracing::info!("application withdrawn");
        Ok(event.capacity_snapshot())
    }

    /// Mark an event as saved for later by a worker
    #[tracing::instrument(skip(self))]
    pub async fn save_for_later(&self, event_id: Uuid, worker: &str) -> Result<(), AppError> {
        let marker = normalize_phone_number(worker)?;
        self.update_event(event_id, |event| Ok(event.saved.insert(marker.clone())))
            .await?;
        Ok(())
    }

    /// What the organizer owes for the full crew of an event
    pub async fn payment_quote(&self, event_id: Uuid, organizer: &str) -> Result<PaymentQuote, AppError> {
        validate_phone_number(organizer)?;
        let event = gate::load_as_organizer(&self.store, event_id, organizer).await?;
        let latest = self
            .store
            .read("latest_payment", |s| s.latest_payment(event_id))
            .await?;

        Ok(PaymentQuote {
            event_id,
            crew_slots: event.capacity(),
            male_pay: event.male_crew_pay,
            female_pay: event.female_crew_pay,
            days: event.days(),
            total_due: total_due(&event, self.settings.service_fee_rate),
            latest_payment_status: latest.map(|p| p.status.as_str().to_string()),
        })
    }

    /// Read-modify-write an event under its lock.
    ///
    /// `change` returns `Ok(false)` when there is nothing to write. It may run
    /// more than once if the compare-and-set loses to another writer.
    pub async fn update_event<F>(&self, event_id: Uuid, change: F) -> Result<Event, AppError>
    where
        F: FnMut(&mut Event) -> Result<bool, AppError>,
    {
        let lock = self.lock_for(event_id);
        let _guard = lock.lock().await;
        self.update_event_locked(event_id, change).await
    }

    /// Drop the lock entry of a deleted or ended event
    pub fn forget(&self, event_id: Uuid) {
        self.locks.remove(&event_id);
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    async fn update_event_locked<F>(&self, event_id: Uuid, mut change: F) -> Result<Event, AppError>
    where
        F: FnMut(&mut Event) -> Result<bool, AppError>,
    {
        let mut conflicts = 0;
        loop {
            let mut event = gate::load_event(&self.store, event_id).await?;
            if !change(&mut event)? {
                return Ok(event);
            }

            let expected = event.version;
            event.version += 1;
            event.recompute_capacity();

            let swapped = self
                .store
                .write("compare_and_swap_event", |s| s.compare_and_swap_event(expected, &event))
                .await?;
            if swapped {
                return Ok(event);
            }

            conflicts += 1;
            counter!(LEDGER_CAS_RETRY).increment(1);
            if conflicts > self.settings.cas_retry_limit {
                return Err(AppError::Conflict(format!(
                    "event {event_id} changed concurrently {conflicts} times"
                )));
            }
            tracing::warn!(%event_id, conflicts, "event row changed underneath, re-reading");
        }
    }

    fn lock_for(&self, event_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(event_id).or_default().clone()
    }
}

fn check_can_apply(event: &Event, worker: &str) -> Result<(), AppError> {
    if event.status == EventStatus::Ended {
        return Err(AppError::InvalidTransition("Event has already ended".to_string()));
    }
    match event.membership(worker) {
        Membership::None => Ok(()),
        Membership::Applied | Membership::Accepted => Err(AppError::DuplicateApplication {
            event_id: event.id,
            worker: worker.to_string(),
        }),
        Membership::Rejected => Err(AppError::ApplicationRejected {
            event_id: event.id,
            worker: worker.to_string(),
        }),
    }
}

/// `subtotal * (1 + fee) * days`, rounded to cents
pub fn total_due(event: &Event, service_fee_rate: f64) -> f64 {
    let subtotal = f64::from(event.male_crew) * event.male_crew_pay
        + f64::from(event.female_crew) * event.female_crew_pay;
    let total = subtotal * (1.0 + service_fee_rate) * event.days() as f64;
    (total * 100.0).round() / 100.0
}
