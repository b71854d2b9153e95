//! Market Snapshots
//!
//! Last-known-value cache, one slot per watched symbol. A slot exists from
//! the moment a symbol is watched (empty until the first tick) until the
//! symbol is unwatched. Updates replace the whole snapshot; fields are never
//! merged across ticks.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::symbol::Symbol;

/// Numeric fields carried by one market-data tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteFields {
    /// Last traded price.
    pub current: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Absolute change versus previous close.
    pub change: Decimal,
    /// Percent change versus previous close.
    pub percent_change: Decimal,
}

/// Price direction derived from [`MarketSnapshot::change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Positive change.
    Up,
    /// Negative change.
    Down,
    /// No change.
    Flat,
}

/// The last accepted values for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketSnapshot {
    /// Symbol the values belong to.
    pub symbol: Symbol,
    /// Last traded price.
    pub current: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Absolute change versus previous close.
    pub change: Decimal,
    /// Percent change versus previous close.
    pub percent_change: Decimal,
    /// When the tick was accepted locally.
    pub received_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Build a snapshot from tick fields.
    #[must_use]
    pub const fn new(symbol: Symbol, fields: QuoteFields, received_at: DateTime<Utc>) -> Self {
        Self {
            symbol,
            current: fields.current,
            high: fields.high,
            low: fields.low,
            change: fields.change,
            percent_change: fields.percent_change,
            received_at,
        }
    }

    /// The numeric fields of this snapshot.
    #[must_use]
    pub const fn fields(&self) -> QuoteFields {
        QuoteFields {
            current: self.current,
            high: self.high,
            low: self.low,
            change: self.change,
            percent_change: self.percent_change,
        }
    }

    /// Sign of the change for display.
    #[must_use]
    pub fn direction(&self) -> Direction {
        if self.change.is_zero() {
            Direction::Flat
        } else if self.change.is_sign_negative() {
            Direction::Down
        } else {
            Direction::Up
        }
    }
}

/// Result of a snapshot lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotLookup {
    /// The symbol is not watched.
    NotWatched,
    /// Watched, but no tick has been accepted yet.
    Pending,
    /// Watched with data.
    Ready(MarketSnapshot),
}

impl SnapshotLookup {
    /// The snapshot, if data has arrived.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&MarketSnapshot> {
        match self {
            Self::Ready(snapshot) => Some(snapshot),
            Self::NotWatched | Self::Pending => None,
        }
    }

    /// Consume into the snapshot, if data has arrived.
    #[must_use]
    pub fn into_snapshot(self) -> Option<MarketSnapshot> {
        match self {
            Self::Ready(snapshot) => Some(snapshot),
            Self::NotWatched | Self::Pending => None,
        }
    }

    /// Whether the symbol is watched at all.
    #[must_use]
    pub const fn is_watched(&self) -> bool {
        !matches!(self, Self::NotWatched)
    }
}

/// Per-symbol last-value cache.
///
/// Slots are created by [`SnapshotStore::track`] and removed by
/// [`SnapshotStore::evict`]; [`SnapshotStore::update`] only fills existing
/// slots. Keeping the key set in lockstep with the subscription registry is
/// the caller's job.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    slots: HashMap<Symbol, Option<MarketSnapshot>>,
}

impl SnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an empty slot for a newly watched symbol.
    ///
    /// Existing slots are left untouched.
    pub fn track(&mut self, symbol: Symbol) {
        self.slots.entry(symbol).or_insert(None);
    }

    /// Replace the snapshot for a tracked symbol.
    ///
    /// Returns the stored snapshot, or `None` if the symbol has no slot.
    pub fn update(
        &mut self,
        symbol: &Symbol,
        fields: QuoteFields,
        received_at: DateTime<Utc>,
    ) -> Option<&MarketSnapshot> {
        let slot = self.slots.get_mut(symbol)?;
        *slot = Some(MarketSnapshot::new(symbol.clone(), fields, received_at));
        slot.as_ref()
    }

    /// Look up the current value for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> SnapshotLookup {
        match self.slots.get(symbol) {
            None => SnapshotLookup::NotWatched,
            Some(None) => SnapshotLookup::Pending,
            Some(Some(snapshot)) => SnapshotLookup::Ready(snapshot.clone()),
        }
    }

    /// Remove the slot for a symbol. Returns whether a slot existed.
    pub fn evict(&mut self, symbol: &str) -> bool {
        self.slots.remove(symbol).is_some()
    }

    /// Whether a slot exists for the symbol.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.slots.contains_key(symbol)
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All snapshots that have data.
    pub fn snapshots(&self) -> impl Iterator<Item = &MarketSnapshot> {
        self.slots.values().filter_map(Option::as_ref)
    }
}
