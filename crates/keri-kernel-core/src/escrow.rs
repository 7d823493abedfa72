//! Bounded escrow for events that arrive before their predecessors.
//!
//! Capacity is bounded overall and per identifier. Entries also expire after
//! a number of router calls, so identifiers that never incept cannot hold
//! space forever.

use std::collections::BTreeMap;

use crate::message::SignedMessage;
use crate::prefix::Prefix;

/// Why an event is waiting in escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowReason {
    /// The identifier is known but earlier events are missing.
    OutOfOrder,
    /// No inception has been accepted for the identifier yet.
    MissingInception,
}

/// A parsed message held until it can be applied.
#[derive(Debug, Clone)]
pub struct EscrowedEvent {
    pub message: SignedMessage,
    pub reason: EscrowReason,
    /// Replay passes survived without being applied.
    pub attempts: u32,
    /// Escrow clock reading when the event was stored.
    pub escrowed_at: u64,
}

/// Result of escrowing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowInsert {
    Stored,
    /// An identical message is already waiting.
    Duplicate,
    Full,
    /// The identifier already holds its share of the escrow.
    PrefixFull,
}

/// Events keyed by (prefix, sn), iterated in ascending sequence order.
#[derive(Debug)]
pub struct Escrow {
    entries: BTreeMap<(Prefix, u64), Vec<EscrowedEvent>>,
    len: usize,
    capacity: usize,
    prefix_limit: usize,
    clock: u64,
}

impl Escrow {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            len: 0,
            capacity,
            prefix_limit: capacity,
            clock: 0,
        }
    }

    /// Cap the events any single identifier may hold.
    pub fn with_prefix_limit(mut self, limit: usize) -> Self {
        self.prefix_limit = limit;
        self
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn prefix_limit(&self) -> usize {
        self.prefix_limit
    }

    /// Events waiting for `prefix`.
    pub fn count(&self, prefix: &Prefix) -> usize {
        self.entries
            .range((prefix.clone(), 0)..=(prefix.clone(), u64::MAX))
            .map(|(_, waiting)| waiting.len())
            .sum()
    }

    pub fn insert(&mut self, message: SignedMessage, reason: EscrowReason) -> EscrowInsert {
        let key = (message.prefix().clone(), message.sn());
        if let Some(waiting) = self.entries.get(&key) {
            if waiting.iter().any(|e| e.message.event.raw == message.event.raw) {
                return EscrowInsert::Duplicate;
            }
        }
        if self.len >= self.capacity {
            return EscrowInsert::Full;
        }
        if self.count(&key.0) >= self.prefix_limit {
            return EscrowInsert::PrefixFull;
        }
        self.entries.entry(key).or_default().push(EscrowedEvent {
            message,
            reason,
            attempts: 0,
            escrowed_at: self.clock,
        });
        self.len += 1;
        EscrowInsert::Stored
    }

    /// Remove and return everything waiting at exactly (prefix, sn).
    pub fn take(&mut self, prefix: &Prefix, sn: u64) -> Vec<EscrowedEvent> {
        let taken = self.entries.remove(&(prefix.clone(), sn)).unwrap_or_default();
        self.len -= taken.len();
        taken
    }

    /// Remove and return everything for `prefix` at or below `sn`.
    pub fn take_through(&mut self, prefix: &Prefix, sn: u64) -> Vec<EscrowedEvent> {
        let keys: Vec<_> = self
            .entries
            .range((prefix.clone(), 0)..=(prefix.clone(), sn))
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .flat_map(|k| self.take(&k.0, k.1))
            .collect()
    }

    /// Sequence numbers waiting for `prefix`, ascending.
    pub fn sns(&self, prefix: &Prefix) -> Vec<u64> {
        self.entries
            .range((prefix.clone(), 0)..=(prefix.clone(), u64::MAX))
            .map(|((_, sn), _)| *sn)
            .collect()
    }

    /// Count a failed replay pass against every event for `prefix` and drop
    /// those past `budget`. Returns how many were dropped.
    pub fn age(&mut self, prefix: &Prefix, budget: u32) -> usize {
        let mut dropped = 0;
        for ((_, _), waiting) in self
            .entries
            .range_mut((prefix.clone(), 0)..=(prefix.clone(), u64::MAX))
        {
            for e in waiting.iter_mut() {
                e.attempts += 1;
            }
            let before = waiting.len();
            waiting.retain(|e| e.attempts <= budget);
            dropped += before - waiting.len();
        }
        self.entries
            .retain(|(p, _), waiting| p != prefix || !waiting.is_empty());
        self.len -= dropped;
        dropped
    }

    /// Advance the escrow clock by one and drop events stored more than
    /// `lifetime` ticks ago, whatever their identifier. Returns how many were
    /// dropped.
    pub fn tick(&mut self, lifetime: u64) -> usize {
        self.clock += 1;
        if self.is_empty() {
            return 0;
        }
        let now = self.clock;
        let mut dropped = 0;
        self.entries.retain(|_, waiting| {
            let before = waiting.len();
            waiting.retain(|e| now - e.escrowed_at <= lifetime);
            dropped += before - waiting.len();
            !waiting.is_empty()
        });
        self.len -= dropped;
        dropped
    }

    /// Drop everything escrowed for `prefix`.
    pub fn purge(&mut self, prefix: &Prefix) -> usize {
        let sns = self.sns(prefix);
        sns.into_iter().map(|sn| self.take(prefix, sn).len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EventBuilder;
    use crate::crypto::Signer;
    use crate::derivation::MatterCode;
    use crate::event::Event;
    use crate::state::KeyState;

    fn messages(count: u64) -> (Prefix, Vec<SignedMessage>) {
        messages_for(4, count)
    }

    fn messages_for(seed: u8, count: u64) -> (Prefix, Vec<SignedMessage>) {
        let signer = Signer::from_seed(&[seed; 32], true);
        let icp = EventBuilder::inception(vec![signer.public_key()]).build().unwrap();
        let Event::Inception(inner) = &icp.event else {
            panic!("not an inception");
        };
        let mut state =
            KeyState::from_inception(inner, icp.digest(MatterCode::Blake3_256).unwrap());
        let prefix = state.prefix.clone();
        let mut out = Vec::new();
        for _ in 0..count {
            let ixn = EventBuilder::interaction(&state).build().unwrap();
            state.sn += 1;
            state.last_digest = ixn.digest(MatterCode::Blake3_256).unwrap();
            out.push(SignedMessage::sign(ixn, &[&signer]));
        }
        (prefix, out)
    }

    #[test]
    fn test_insert_and_take() {
        let (prefix, msgs) = messages(3);
        let mut escrow = Escrow::new(10);
        for m in msgs.iter().rev() {
            assert_eq!(escrow.insert(m.clone(), EscrowReason::OutOfOrder), EscrowInsert::Stored);
        }
        assert_eq!(escrow.sns(&prefix), vec![1, 2, 3]);
        assert_eq!(escrow.take(&prefix, 2).len(), 1);
        assert_eq!(escrow.len(), 2);
        assert!(escrow.take(&prefix, 2).is_empty());
    }

    #[test]
    fn test_duplicate_insert() {
        let (_, msgs) = messages(1);
        let mut escrow = Escrow::new(10);
        escrow.insert(msgs[0].clone(), EscrowReason::OutOfOrder);
        assert_eq!(
            escrow.insert(msgs[0].clone(), EscrowReason::OutOfOrder),
            EscrowInsert::Duplicate
        );
        assert_eq!(escrow.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let (_, msgs) = messages(3);
        let mut escrow = Escrow::new(2);
        escrow.insert(msgs[0].clone(), EscrowReason::OutOfOrder);
        escrow.insert(msgs[1].clone(), EscrowReason::OutOfOrder);
        assert_eq!(
            escrow.insert(msgs[2].clone(), EscrowReason::OutOfOrder),
            EscrowInsert::Full
        );
        assert_eq!(escrow.len(), 2);
    }

    #[test]
    fn test_aging_drops_past_budget() {
        let (prefix, msgs) = messages(2);
        let mut escrow = Escrow::new(10);
        for m in msgs {
            escrow.insert(m, EscrowReason::OutOfOrder);
        }
        assert_eq!(escrow.age(&prefix, 2), 0);
        assert_eq!(escrow.age(&prefix, 2), 0);
        assert_eq!(escrow.age(&prefix, 2), 2);
        assert!(escrow.is_empty());
        assert!(escrow.sns(&prefix).is_empty());
    }

    #[test]
    fn test_prefix_limit() {
        let (a, flood) = messages_for(4, 3);
        let (b, honest) = messages_for(5, 1);
        let mut escrow = Escrow::new(10).with_prefix_limit(2);
        escrow.insert(flood[0].clone(), EscrowReason::MissingInception);
        escrow.insert(flood[1].clone(), EscrowReason::MissingInception);
        assert_eq!(
            escrow.insert(flood[2].clone(), EscrowReason::MissingInception),
            EscrowInsert::PrefixFull
        );
        assert_eq!(escrow.count(&a), 2);
        assert_eq!(
            escrow.insert(honest[0].clone(), EscrowReason::OutOfOrder),
            EscrowInsert::Stored
        );
        assert_eq!(escrow.count(&b), 1);
    }

    #[test]
    fn test_tick_expires_every_prefix() {
        let (a, first) = messages_for(4, 2);
        let (b, second) = messages_for(5, 1);
        let mut escrow = Escrow::new(10);
        for m in first {
            escrow.insert(m, EscrowReason::MissingInception);
        }
        assert_eq!(escrow.tick(2), 0);
        escrow.insert(second[0].clone(), EscrowReason::MissingInception);
        assert_eq!(escrow.tick(2), 0);
        assert_eq!(escrow.tick(2), 2);
        assert!(escrow.sns(&a).is_empty());
        assert_eq!(escrow.sns(&b), vec![1]);
        assert_eq!(escrow.tick(2), 1);
        assert!(escrow.is_empty());
    }

    #[test]
    fn test_take_through_and_purge() {
        let (prefix, msgs) = messages(4);
        let mut escrow = Escrow::new(10);
        for m in msgs {
            escrow.insert(m, EscrowReason::OutOfOrder);
        }
        assert_eq!(escrow.take_through(&prefix, 2).len(), 2);
        assert_eq!(escrow.sns(&prefix), vec![3, 4]);
        assert_eq!(escrow.purge(&prefix), 2);
        assert!(escrow.is_empty());
    }
}
