//! Per-event unit of work.
//!
//! Handlers never write to the store directly. Everything one event changes is
//! staged here and committed in a single transaction together with the
//! event's dedup mark, so a crash or a redelivery never leaves half an event
//! applied.

use crate::domain::{Address, BlockTime, CounterDelta, Entity, EntityId, EventKey, TemplateKind, U256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Created by this event; inserted only if still absent at commit.
    New,
    /// Loaded from the store and modified.
    Dirty,
    /// Loaded from the store, unchanged.
    Clean,
}

#[derive(Debug, Clone)]
pub struct ChangeSet {
    key: EventKey,
    timestamp: BlockTime,
    entries: BTreeMap<EntityId, (Entity, EntryState)>,
    subscriptions: Vec<(Address, TemplateKind)>,
    counters: Vec<CounterDelta>,
}

impl ChangeSet {
    pub fn new(key: EventKey, timestamp: BlockTime) -> Self {
        ChangeSet {
            key,
            timestamp,
            entries: BTreeMap::new(),
            subscriptions: Vec::new(),
            counters: Vec::new(),
        }
    }

    pub fn key(&self) -> EventKey {
        self.key
    }

    pub fn timestamp(&self) -> BlockTime {
        self.timestamp
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entries.get(id).map(|(entity, _)| entity)
    }

    pub fn state(&self, id: &EntityId) -> Option<EntryState> {
        self.entries.get(id).map(|(_, state)| *state)
    }

    /// Stage a freshly constructed entity. An entity already staged under the same id wins.
    pub fn insert_new(&mut self, entity: Entity) -> &Entity {
        let id = entity.id().clone();
        &self
            .entries
            .entry(id)
            .or_insert((entity, EntryState::New))
            .0
    }

    /// Stage an entity as read from the store.
    pub fn insert_loaded(&mut self, entity: Entity) -> &Entity {
        let id = entity.id().clone();
        &self
            .entries
            .entry(id)
            .or_insert((entity, EntryState::Clean))
            .0
    }

    /// Mutable access; a clean entry becomes dirty.
    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        let (entity, state) = self.entries.get_mut(id)?;
        if *state == EntryState::Clean {
            *state = EntryState::Dirty;
        }
        Some(entity)
    }

    /// Watch `address` under `template` once this event commits. First registration wins.
    pub fn subscribe(&mut self, address: Address, template: TemplateKind) {
        if !self.subscriptions.iter().any(|(a, _)| *a == address) {
            self.subscriptions.push((address, template));
        }
    }

    pub fn bump(&mut self, entity: &EntityId, name: &'static str, amount: U256) {
        if amount.is_zero() {
            return;
        }
        self.counters.push(CounterDelta {
            entity: entity.clone(),
            name,
            amount,
        });
    }

    pub fn new_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entries
            .values()
            .filter(|(_, state)| *state == EntryState::New)
            .map(|(entity, _)| entity)
    }

    pub fn dirty_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entries
            .values()
            .filter(|(_, state)| *state == EntryState::Dirty)
            .map(|(entity, _)| entity)
    }

    pub fn subscriptions(&self) -> &[(Address, TemplateKind)] {
        &self.subscriptions
    }

    pub fn counters(&self) -> &[CounterDelta] {
        &self.counters
    }

    /// True when committing would write nothing but the dedup mark.
    pub fn is_empty(&self) -> bool {
        self.new_entities().next().is_none()
            && self.dirty_entities().next().is_none()
            && self.subscriptions.is_empty()
            && self.counters.is_empty()
    }
}
