//! The routing table: one [`Route`] slot per routing key.

use std::{fmt, io};

use thiserror::Error;
use tlm_wire::{StreamId, MAX_APP_ID};

use crate::filter::{FilterError, FilterRule};

mod file;
pub use file::*;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("Table file error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Packet[{index}]: {source}")]
    InvalidRecord { index: usize, source: RecordError },
    #[error("Routing key {0} out of range, valid range is 0 to {max}", max = MAX_APP_ID - 1)]
    KeyOutOfRange(usize),
}

/// Why a single table record was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing dec-id")]
    MissingId,
    #[error("missing attributes, only {0} of 7 defined")]
    MissingAttributes(usize),
    #[error("dec-id {0} is not a valid stream id")]
    InvalidId(i64),
    #[error("{field} value {value} out of range")]
    OutOfRange { field: &'static str, value: i64 },
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),
}

/// Outcome of the most recent table load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadStatus {
    #[default]
    Undefined = 0,
    Valid = 1,
    Invalid = 2,
}

/// Software bus quality of service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Qos {
    pub priority: u8,
    pub reliability: u8,
}

/// How packets of one stream are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    pub stream_id: StreamId,
    pub qos: Qos,
    /// Maximum number of this stream's packets queued on the input pipe.
    pub buf_limit: u16,
    pub filter: FilterRule,
}

impl Route {
    /// The contents of an empty slot.
    pub const UNUSED: Self = Self {
        stream_id: StreamId::UNUSED,
        qos: Qos { priority: 0, reliability: 0 },
        buf_limit: 0,
        filter: FilterRule::ALWAYS,
    };

    pub fn new(stream_id: StreamId, qos: Qos, buf_limit: u16, filter: FilterRule) -> Self {
        Self { stream_id, qos, buf_limit, filter }
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        !self.stream_id.is_unused()
    }

    /// Routing key of this route's stream.
    #[inline]
    pub fn key(&self) -> usize {
        self.stream_id.key()
    }
}

impl Default for Route {
    fn default() -> Self {
        Self::UNUSED
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} qos=({},{}) buf_limit={} filter=({:?} N={} X={} O={})",
            self.stream_id,
            self.qos.priority,
            self.qos.reliability,
            self.buf_limit,
            self.filter.kind(),
            self.filter.pass(),
            self.filter.group(),
            self.filter.offset()
        )
    }
}

/// A direct-addressed table holding exactly [`MAX_APP_ID`] slots.
#[derive(Clone, PartialEq, Eq)]
pub struct RouteTable {
    slots: Box<[Route]>,
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter_used().map(|r| (r.key(), r))).finish()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    /// Creates a table with every slot unused.
    pub fn new() -> Self {
        Self { slots: vec![Route::UNUSED; MAX_APP_ID].into_boxed_slice() }
    }

    pub fn set_all_unused(&mut self) {
        self.slots.fill(Route::UNUSED);
    }

    pub fn set_unused(&mut self, key: usize) -> Result<(), TableError> {
        let slot = self.slots.get_mut(key).ok_or(TableError::KeyOutOfRange(key))?;
        *slot = Route::UNUSED;
        Ok(())
    }

    /// Returns the slot for `key`, used or not.
    #[inline]
    pub fn get(&self, key: usize) -> Option<&Route> {
        self.slots.get(key)
    }

    /// Stores `route` in the slot of its stream, replacing whatever was there.
    pub fn insert(&mut self, route: Route) {
        let key = route.key();
        self.slots[key] = route;
    }

    /// Replaces the filter of an occupied slot. Returns false if the slot is unused.
    pub fn set_filter(&mut self, key: usize, filter: FilterRule) -> Result<bool, TableError> {
        let slot = self.slots.get_mut(key).ok_or(TableError::KeyOutOfRange(key))?;
        if !slot.is_used() {
            return Ok(false);
        }

        slot.filter = filter;
        Ok(true)
    }

    /// Iterates over occupied slots in key order.
    pub fn iter_used(&self) -> impl Iterator<Item = &Route> + '_ {
        self.slots.iter().filter(|r| r.is_used())
    }

    /// Number of occupied slots.
    pub fn len_used(&self) -> usize {
        self.iter_used().count()
    }

    /// Builds a replacement table: a copy of this one with every record overlaid in
    /// order, so later records for the same key win. Fails on the first invalid record
    /// and leaves `self` untouched either way.
    pub fn overlay(&self, records: &[PacketRecord]) -> Result<RouteTable, TableError> {
        let mut table = self.clone();

        for (index, record) in records.iter().enumerate() {
            let route =
                record.to_route().map_err(|source| TableError::InvalidRecord { index, source })?;
            table.insert(route);
        }

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterKind;

    fn route(id: u16) -> Route {
        Route::new(
            StreamId::new(id),
            Qos { priority: 1, reliability: 0 },
            4,
            FilterRule::new(FilterKind::BySequenceCount, 1, 2, 0).unwrap(),
        )
    }

    #[test]
    fn new_table_is_all_unused() {
        let table = RouteTable::new();
        assert_eq!(table.len_used(), 0);
        assert_eq!(table.get(0), Some(&Route::UNUSED));
        assert_eq!(table.get(MAX_APP_ID - 1), Some(&Route::UNUSED));
        assert_eq!(table.get(MAX_APP_ID), None);
    }

    #[test]
    fn insert_addresses_by_masked_key() {
        let mut table = RouteTable::new();
        table.insert(route(0x0923));

        assert_eq!(table.get(0x123).unwrap().stream_id, StreamId::new(0x0923));

        table.set_unused(0x123).unwrap();
        assert_eq!(table.len_used(), 0);
        assert!(matches!(table.set_unused(MAX_APP_ID), Err(TableError::KeyOutOfRange(_))));
    }

    #[test]
    fn set_filter_requires_used_slot() {
        let mut table = RouteTable::new();
        table.insert(route(0x0801));

        assert!(table.set_filter(1, FilterRule::ALWAYS).unwrap());
        assert_eq!(table.get(1).unwrap().filter, FilterRule::ALWAYS);
        assert!(!table.set_filter(2, FilterRule::ALWAYS).unwrap());
    }

    #[test]
    fn iteration_is_in_key_order() {
        let mut table = RouteTable::new();
        for id in [0x0805, 0x0801, 0x0803] {
            table.insert(route(id));
        }

        let keys: Vec<_> = table.iter_used().map(|r| r.key()).collect();
        assert_eq!(keys, vec![1, 3, 5]);

        table.set_all_unused();
        assert_eq!(table.len_used(), 0);
    }
}
