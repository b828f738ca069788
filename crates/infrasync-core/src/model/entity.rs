// ── Entity identity and per-peer cache ──
//
// Every configuration object on a peer is identified by (kind, name).
// The cache mirrors what the peer last reported, grouped by kind so a
// single kind can be replaced wholesale after a query-all.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

/// A configuration object that can live on a peer.
pub trait ManagedEntity: Clone + fmt::Debug + Send + Sync + 'static {
    /// Entity kind. Its `Display` form is the peer's native type name.
    type Kind: Copy + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;

    /// Unique within `kind` on one peer.
    fn name(&self) -> String;

    /// Creation phase. Entities referencing others get a higher order
    /// than what they reference.
    fn order(&self) -> u8;

    /// Structural equality, ignoring attributes only the peer populates.
    fn same_as(&self, other: &Self) -> bool;
}

// ── EntityCache ─────────────────────────────────────────────────────

/// Kind → name → entity mirror of one peer's live configuration.
#[derive(Debug, Clone)]
pub struct EntityCache<E: ManagedEntity> {
    by_kind: BTreeMap<E::Kind, BTreeMap<String, E>>,
}

impl<E: ManagedEntity> Default for EntityCache<E> {
    fn default() -> Self {
        Self {
            by_kind: BTreeMap::new(),
        }
    }
}

impl<E: ManagedEntity> EntityCache<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: E::Kind, name: &str) -> Option<&E> {
        self.by_kind.get(&kind)?.get(name)
    }

    pub fn contains(&self, kind: E::Kind, name: &str) -> bool {
        self.get(kind, name).is_some()
    }

    /// Insert or replace an entity. Returns the previous one, if any.
    pub fn insert(&mut self, entity: E) -> Option<E> {
        self.by_kind
            .entry(entity.kind())
            .or_default()
            .insert(entity.name(), entity)
    }

    pub fn remove(&mut self, kind: E::Kind, name: &str) -> Option<E> {
        self.by_kind.get_mut(&kind)?.remove(name)
    }

    /// Replace everything cached for `kind` with `entities`.
    pub fn replace_kind(&mut self, kind: E::Kind, entities: impl IntoIterator<Item = E>) {
        let fresh = entities.into_iter().map(|e| (e.name(), e)).collect();
        self.by_kind.insert(kind, fresh);
    }

    pub fn clear(&mut self) {
        self.by_kind.clear();
    }

    /// Names cached for one kind, sorted.
    pub fn names(&self, kind: E::Kind) -> Vec<String> {
        self.by_kind
            .get(&kind)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cached entities, ordered by kind then name.
    pub fn snapshot(&self) -> Vec<E> {
        self.by_kind
            .values()
            .flat_map(BTreeMap::values)
            .cloned()
            .collect()
    }
}
