// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Admission Control
//!
//! Per-link concurrency budget. Every delegation over a link holds an
//! [`AdmissionTicket`] for its whole duration; a link with
//! `max_concurrent = N > 0` never has more than `N` unreleased tickets.
//!
//! State is kept per link id and created lazily on the first acquire. The
//! limit is refreshed from the link record on every acquire, so lowering it
//! only affects future acquisitions. Tickets already out are never revoked.
//!
//! Counters live in process memory only: after a restart every link starts
//! at zero in flight.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::errors::DelegationError;
use crate::domain::link::{DelegationLink, LinkId};

#[derive(Debug, Default)]
struct SlotState {
    in_flight: u32,
    max_concurrent: u32,
}

/// Current load on one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkLoad {
    pub link_id: LinkId,
    pub in_flight: u32,
    /// `0` means unlimited.
    pub max_concurrent: u32,
}

impl LinkLoad {
    pub fn has_capacity(&self) -> bool {
        self.max_concurrent == 0 || self.in_flight < self.max_concurrent
    }
}

/// A reserved concurrency slot. Released exactly once, on [`release`] or drop.
///
/// [`release`]: AdmissionTicket::release
#[derive(Debug)]
pub struct AdmissionTicket {
    link_id: LinkId,
    acquired_at: Instant,
    slot: Arc<Mutex<SlotState>>,
    released: AtomicBool,
}

impl AdmissionTicket {
    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Give the slot back. Calling this more than once is a no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut slot = self.slot.lock();
        slot.in_flight = slot.in_flight.saturating_sub(1);
        metrics::gauge!("switchyard_admission_in_flight", "link_id" => self.link_id.to_string())
            .set(f64::from(slot.in_flight));
        debug!(
            link_id = %self.link_id,
            in_flight = slot.in_flight,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Admission slot released"
        );
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        self.release();
    }
}

/// Outcome of [`AdmissionController::run_admitted`] when the work itself
/// could not finish.
#[derive(Debug, thiserror::Error)]
pub enum AdmittedError<E> {
    #[error(transparent)]
    Rejected(DelegationError),

    #[error("delegation over link {link_id} timed out after {timeout:?}")]
    TimedOut { link_id: LinkId, timeout: Duration },

    #[error("delegation failed: {0}")]
    Failed(E),
}

#[derive(Default)]
pub struct AdmissionController {
    slots: DashMap<LinkId, Arc<Mutex<SlotState>>>,
}

impl AdmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot on `link`, or fail with `AdmissionRejected`.
    ///
    /// Never blocks on I/O and never queues.
    pub fn acquire(&self, link: &DelegationLink) -> Result<AdmissionTicket, DelegationError> {
        // The shard guard is held across the test-and-increment so that an
        // idle-slot eviction cannot interleave with it.
        let entry = self.slots.entry(link.id).or_default();
        let mut slot = entry.lock();
        slot.max_concurrent = link.max_concurrent;

        if slot.max_concurrent > 0 && slot.in_flight >= slot.max_concurrent {
            metrics::counter!("switchyard_admission_rejected_total").increment(1);
            debug!(
                link_id = %link.id,
                in_flight = slot.in_flight,
                max_concurrent = slot.max_concurrent,
                "Admission rejected"
            );
            return Err(DelegationError::AdmissionRejected {
                link_id: link.id,
                in_flight: slot.in_flight,
                max_concurrent: slot.max_concurrent,
            });
        }

        slot.in_flight += 1;
        metrics::gauge!("switchyard_admission_in_flight", "link_id" => link.id.to_string())
            .set(f64::from(slot.in_flight));
        debug!(link_id = %link.id, in_flight = slot.in_flight, "Admission slot acquired");

        drop(slot);
        Ok(AdmissionTicket {
            link_id: link.id,
            acquired_at: Instant::now(),
            slot: Arc::clone(entry.value()),
            released: AtomicBool::new(false),
        })
    }

    /// Explicit release; equivalent to `ticket.release()`.
    pub fn release(&self, ticket: &AdmissionTicket) {
        ticket.release();
    }

    /// Acquire, run `work`, and release on every exit path: completion,
    /// error, timeout, the returned future being dropped, or a panic.
    pub async fn run_admitted<F, T, E>(
        &self,
        link: &DelegationLink,
        timeout: Option<Duration>,
        work: F,
    ) -> Result<T, AdmittedError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let ticket = self.acquire(link).map_err(AdmittedError::Rejected)?;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result.map_err(AdmittedError::Failed),
                Err(_) => {
                    warn!(link_id = %link.id, timeout = ?limit, "Admitted delegation timed out");
                    Err(AdmittedError::TimedOut {
                        link_id: link.id,
                        timeout: limit,
                    })
                }
            },
            None => work.await.map_err(AdmittedError::Failed),
        };

        ticket.release();
        outcome
    }

    /// Load on one link. Unknown links report zero in flight and no limit.
    pub fn load(&self, link_id: LinkId) -> LinkLoad {
        match self.slots.get(&link_id) {
            Some(entry) => {
                let slot = entry.lock();
                LinkLoad {
                    link_id,
                    in_flight: slot.in_flight,
                    max_concurrent: slot.max_concurrent,
                }
            }
            None => LinkLoad {
                link_id,
                in_flight: 0,
                max_concurrent: 0,
            },
        }
    }

    /// Whether `link` could be admitted right now.
    pub fn has_capacity(&self, link: &DelegationLink) -> bool {
        if link.max_concurrent == 0 {
            return true;
        }
        self.load(link.id).in_flight < link.max_concurrent
    }

    /// Load of every link with state, sorted by link id.
    pub fn snapshot(&self) -> Vec<LinkLoad> {
        let mut loads: Vec<_> = self
            .slots
            .iter()
            .map(|entry| {
                let slot = entry.value().lock();
                LinkLoad {
                    link_id: *entry.key(),
                    in_flight: slot.in_flight,
                    max_concurrent: slot.max_concurrent,
                }
            })
            .collect();
        loads.sort_by_key(|l| l.link_id);
        loads
    }

    /// Drop state for a link that was invalidated. Links with tickets still
    /// out keep their state until the next invalidation finds them idle.
    pub fn evict_if_idle(&self, link_id: LinkId) -> bool {
        let evicted = self
            .slots
            .remove_if(&link_id, |_, slot| slot.lock().in_flight == 0)
            .is_some();
        if evicted {
            debug!(link_id = %link_id, "Admission state evicted");
        }
        evicted
    }

    pub fn tracked_links(&self) -> usize {
        self.slots.len()
    }
}
