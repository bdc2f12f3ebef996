//! Slot pool - the fixed set of dispatch channels
//!
//! Each slot is bound to one origination identity and carries at most one
//! call. A slot moves `Free -> Claimed -> Busy -> Free`; a failed launch goes
//! straight from `Claimed` back to `Free`.
//!
//! Claims hand out a [`SlotClaim`] ticket stamped with a generation number.
//! Transitions driven by a launch (`mark_busy`, `release_claim`) only apply
//! while the slot still holds that exact claim, so a launch that settles after
//! its claim was reaped as stale cannot clobber whoever holds the slot now.
//!
//! All state, including the `call_id -> slot` index, sits behind one mutex;
//! no method holds it across an await.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub type SlotId = usize;

/// State of one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// Reserved for a launch that has not settled yet
    Claimed {
        generation: u64,
        lead_id: Option<String>,
        since: Instant,
    },
    /// Carrying a live call
    Busy {
        call_id: String,
        lead_id: Option<String>,
        started_at: Instant,
    },
}

/// One dispatch channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: SlotId,
    pub origination_id: String,
    pub state: SlotState,
}

impl Slot {
    pub fn is_free(&self) -> bool {
        matches!(self.state, SlotState::Free)
    }

    pub fn call_id(&self) -> Option<&str> {
        match &self.state {
            SlotState::Busy { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    pub fn lead_id(&self) -> Option<&str> {
        match &self.state {
            SlotState::Claimed { lead_id, .. } | SlotState::Busy { lead_id, .. } => lead_id.as_deref(),
            SlotState::Free => None,
        }
    }
}

/// Ticket for a claimed slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClaim {
    pub slot: SlotId,
    generation: u64,
}

/// What the pool knew about a call it just released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedCall {
    pub slot: SlotId,
    pub call_id: String,
    pub lead_id: Option<String>,
    pub started_at: Instant,
}

/// A busy slot as seen by the reconciler's poll sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyCall {
    pub slot: SlotId,
    pub call_id: String,
    pub lead_id: Option<String>,
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<Slot>,
    by_call: HashMap<String, SlotId>,
    next_generation: u64,
}

impl PoolState {
    fn release(&mut self, slot: SlotId) -> Option<SlotState> {
        let entry = self.slots.get_mut(slot)?;
        let previous = std::mem::replace(&mut entry.state, SlotState::Free);
        if let SlotState::Busy { call_id, .. } = &previous
            && self.by_call.get(call_id) == Some(&slot)
        {
            self.by_call.remove(call_id);
        }
        Some(previous)
    }

    fn holds_claim(&self, claim: &SlotClaim) -> bool {
        matches!(
            self.slots.get(claim.slot).map(|s| &s.state),
            Some(SlotState::Claimed { generation, .. }) if *generation == claim.generation
        )
    }
}

/// Fixed pool of dispatch slots
#[derive(Debug)]
pub struct SlotPool {
    state: Mutex<PoolState>,
}

impl SlotPool {
    /// One slot per origination identity; the count never changes afterwards
    pub fn new<I, S>(origination_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = origination_ids
            .into_iter()
            .enumerate()
            .map(|(id, origination_id)| Slot {
                id,
                origination_id: origination_id.into(),
                state: SlotState::Free,
            })
            .collect();

        Self {
            state: Mutex::new(PoolState {
                slots,
                by_call: HashMap::new(),
                next_generation: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Total slots
    pub fn len(&self) -> usize {
        self.state().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().slots.is_empty()
    }

    /// Atomically reserve the lowest-numbered free slot
    pub fn claim_free_slot(&self) -> Option<SlotClaim> {
        let mut state = self.state();
        let generation = state.next_generation;
        let slot = state.slots.iter_mut().find(|s| s.is_free())?;

        slot.state = SlotState::Claimed {
            generation,
            lead_id: None,
            since: Instant::now(),
        };
        let claim = SlotClaim {
            slot: slot.id,
            generation,
        };
        state.next_generation += 1;
        Some(claim)
    }

    /// Record which lead a claimed slot is launching
    pub fn bind_lead(&self, claim: &SlotClaim, lead: &str) -> bool {
        let mut state = self.state();
        if !state.holds_claim(claim) {
            return false;
        }
        if let SlotState::Claimed { lead_id, .. } = &mut state.slots[claim.slot].state {
            *lead_id = Some(lead.to_string());
        }
        true
    }

    /// Origination identity bound to a slot
    pub fn origination_id(&self, slot: SlotId) -> Option<String> {
        self.state().slots.get(slot).map(|s| s.origination_id.clone())
    }

    /// Move a claimed slot to busy with the launched call
    ///
    /// Returns false if the claim is no longer held. If the launch service
    /// hands back a call id the index already maps to another slot, that
    /// stale mapping is dropped and its slot freed: the launch service is
    /// the source of truth for call identity.
    pub fn mark_busy(&self, claim: &SlotClaim, call_id: &str) -> bool {
        let mut state = self.state();
        if !state.holds_claim(claim) {
            return false;
        }

        if let Some(other) = state.by_call.get(call_id).copied()
            && other != claim.slot
        {
            log::warn!("Call {} was indexed to slot {}; freeing it for slot {}", call_id, other, claim.slot);
            state.release(other);
        }

        let lead_id = state.slots[claim.slot].lead_id().map(String::from);
        state.slots[claim.slot].state = SlotState::Busy {
            call_id: call_id.to_string(),
            lead_id,
            started_at: Instant::now(),
        };
        state.by_call.insert(call_id.to_string(), claim.slot);
        true
    }

    /// Free a slot only if it still holds this claim
    pub fn release_claim(&self, claim: &SlotClaim) -> bool {
        let mut state = self.state();
        if !state.holds_claim(claim) {
            return false;
        }
        state.release(claim.slot);
        true
    }

    /// Free a slot unconditionally, clearing its index entry
    pub fn free(&self, slot: SlotId) -> bool {
        let mut state = self.state();
        match state.release(slot) {
            Some(SlotState::Free) | None => false,
            Some(_) => true,
        }
    }

    /// Free whichever slot carries `call_id`
    ///
    /// Unknown call ids are a no-op returning false; completion signals can
    /// be duplicated or refer to calls this process never tracked.
    pub fn free_by_call_id(&self, call_id: &str) -> bool {
        self.release_call(call_id).is_some()
    }

    /// Like [`free_by_call_id`](Self::free_by_call_id), returning what was released
    pub fn release_call(&self, call_id: &str) -> Option<ReleasedCall> {
        let mut state = self.state();
        let slot = *state.by_call.get(call_id)?;

        let matches_slot = state.slots.get(slot).and_then(|s| s.call_id()) == Some(call_id);
        if !matches_slot {
            // Dangling index entry; drop it and report nothing released
            log::warn!("Call {} indexed to slot {} which does not carry it", call_id, slot);
            state.by_call.remove(call_id);
            return None;
        }

        match state.release(slot)? {
            SlotState::Busy {
                call_id,
                lead_id,
                started_at,
            } => Some(ReleasedCall {
                slot,
                call_id,
                lead_id,
                started_at,
            }),
            _ => None,
        }
    }

    /// Repair divergence between slots and the call index
    ///
    /// Drops index entries that point at a slot not carrying that call, and
    /// frees busy slots whose call is missing from the index. Returns the
    /// number of repairs made.
    pub fn heal_index(&self) -> usize {
        let mut state = self.state();
        let PoolState { slots, by_call, .. } = &mut *state;
        let mut repairs = 0;

        by_call.retain(|call_id, slot| {
            let consistent = slots.get(*slot).and_then(|s| s.call_id()) == Some(call_id.as_str());
            if !consistent {
                log::warn!("Dropping dangling index entry {} -> slot {}", call_id, slot);
                repairs += 1;
            }
            consistent
        });

        for slot in slots.iter_mut() {
            let orphaned = slot.call_id().is_some_and(|call_id| by_call.get(call_id) != Some(&slot.id));
            if orphaned {
                log::warn!("Slot {} busy with unindexed call {:?}; freeing", slot.id, slot.call_id());
                slot.state = SlotState::Free;
                repairs += 1;
            }
        }

        repairs
    }

    /// Free slots claimed longer than `max_age` without becoming busy
    ///
    /// Returns the lead ids those claims were launching, if bound.
    pub fn release_stale_claims(&self, max_age: Duration) -> Vec<(SlotId, Option<String>)> {
        let mut state = self.state();
        let mut released = Vec::new();
        for slot in state.slots.iter_mut() {
            if let SlotState::Claimed { lead_id, since, .. } = &slot.state
                && since.elapsed() >= max_age
            {
                released.push((slot.id, lead_id.clone()));
                slot.state = SlotState::Free;
            }
        }
        released
    }

    /// Snapshot of every busy slot
    pub fn busy_calls(&self) -> Vec<BusyCall> {
        self.state()
            .slots
            .iter()
            .filter_map(|s| match &s.state {
                SlotState::Busy { call_id, lead_id, .. } => Some(BusyCall {
                    slot: s.id,
                    call_id: call_id.clone(),
                    lead_id: lead_id.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Whether a lead is being launched or is on a call
    pub fn is_lead_in_flight(&self, lead_id: &str) -> bool {
        self.state().slots.iter().any(|s| s.lead_id() == Some(lead_id))
    }

    /// Slot currently carrying a call
    pub fn slot_for_call(&self, call_id: &str) -> Option<SlotId> {
        self.state().by_call.get(call_id).copied()
    }

    pub fn free_count(&self) -> usize {
        self.state().slots.iter().filter(|s| s.is_free()).count()
    }

    /// Slots with a live call
    pub fn busy_count(&self) -> usize {
        self.state().slots.iter().filter(|s| s.call_id().is_some()).count()
    }

    /// Slots reserved for an unsettled launch
    pub fn claimed_count(&self) -> usize {
        self.state()
            .slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Claimed { .. }))
            .count()
    }

    /// Copy of every slot
    pub fn slots(&self) -> Vec<Slot> {
        self.state().slots.clone()
    }

    #[cfg(test)]
    pub(crate) fn corrupt_index(&self, call_id: &str, slot: SlotId) {
        self.state().by_call.insert(call_id.to_string(), slot);
    }

    #[cfg(test)]
    pub(crate) fn corrupt_unindex(&self, call_id: &str) {
        self.state().by_call.remove(call_id);
    }
}
