use std::path::Path;

use tlm_transport::Transport;
use tlm_wire::StreamId;
use tracing::{debug, error, info, warn};

use super::{PacketRouter, RouterError};
use crate::{
    bus::Pipe,
    filter::FilterRule,
    table::{LoadStatus, Route, RouteTable, TableDocument},
};

/// Outcome of re-subscribing to every route of a new table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionReport {
    /// Occupied slots in the new table.
    pub routes: usize,
    /// Routes whose subscription failed. They stay in the table.
    pub failed: usize,
}

/// Outcome of a successful table load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records in the loaded document.
    pub records: usize,
    pub subscriptions: SubscriptionReport,
}

impl<P: Pipe, T: Transport> PacketRouter<P, T> {
    /// Adds a route and subscribes to its stream. Rejected if the slot is taken; the
    /// table is only updated once the subscription succeeds.
    pub fn add_route(&mut self, route: Route) -> Result<(), RouterError> {
        let stream_id = route.stream_id;
        if stream_id.is_unused() {
            return Err(RouterError::RouteUnused(stream_id));
        }

        if self.table.get(route.key()).is_some_and(Route::is_used) {
            error!(%stream_id, "Error adding packet, packet already exists in the packet table");
            return Err(RouterError::RouteExists(stream_id));
        }

        if let Err(e) = self.pipe.subscribe(stream_id, route.qos, route.buf_limit) {
            error!(err = ?e, %stream_id, buf_limit = route.buf_limit, "Error subscribing to packet");
            return Err(e.into());
        }

        self.table.insert(route);
        info!(%stream_id, buf_limit = route.buf_limit, "Added packet");

        Ok(())
    }

    /// Removes the route of `stream_id`'s slot. Removing an unused slot succeeds.
    ///
    /// The slot is cleared even if unsubscribing fails.
    pub fn remove_route(&mut self, stream_id: StreamId) -> Result<(), RouterError> {
        let key = stream_id.key();
        let Some(route) = self.table.get(key).copied().filter(Route::is_used) else {
            warn!(%stream_id, "Packet not defined in packet table, nothing to remove");
            return Ok(());
        };

        self.table.set_unused(key)?;

        if let Err(e) = self.pipe.unsubscribe(route.stream_id) {
            error!(err = ?e, %stream_id, "Removed packet from packet table, but unsubscribe failed");
            return Err(e.into());
        }

        info!(%stream_id, "Removed packet from the packet table");
        Ok(())
    }

    /// Unsubscribes and clears every occupied slot, then flushes the pipe. Every slot is
    /// cleared even when some unsubscribes fail.
    pub fn remove_all_routes(&mut self) -> Result<usize, RouterError> {
        let (attempted, failed) = self.clear_routes();

        if failed == 0 {
            info!(removed = attempted, "Removed all table packet entries");
            Ok(attempted)
        } else {
            error!(attempted, failed, "Failed to unsubscribe some packet entries");
            Err(RouterError::Unsubscribe { attempted, failed })
        }
    }

    /// Returns `(attempted, failed)` unsubscribe counts.
    fn clear_routes(&mut self) -> (usize, usize) {
        let mut attempted = 0;
        let mut failed = 0;

        let used: Vec<Route> = self.table.iter_used().copied().collect();
        for route in used {
            attempted += 1;
            if let Err(e) = self.pipe.unsubscribe(route.stream_id) {
                failed += 1;
                error!(err = ?e, stream_id = %route.stream_id, key = route.key(), "Error unsubscribing");
            }
        }

        self.table.set_all_unused();
        let flushed = self.pipe.flush();
        debug!(flushed, "Flushed input pipe");

        (attempted, failed)
    }

    /// Replaces the filter of an occupied slot.
    pub fn update_filter(
        &mut self,
        stream_id: StreamId,
        kind: u16,
        pass: u16,
        group: u16,
        offset: u16,
    ) -> Result<(), RouterError> {
        let key = stream_id.key();
        if !self.table.get(key).is_some_and(Route::is_used) {
            error!(%stream_id, "Error updating filter, packet not in use");
            return Err(RouterError::RouteUnused(stream_id));
        }

        let filter = FilterRule::from_raw(kind, pass, group, offset).map_err(|e| {
            error!(err = %e, %stream_id, kind, "Error updating filter");
            e
        })?;

        let old = self.table.get(key).map(|r| r.filter).unwrap_or_default();
        self.table.set_filter(key, filter)?;

        info!(
            %stream_id,
            from = ?(old.kind(), old.pass(), old.group(), old.offset()),
            to = ?(filter.kind(), pass, group, offset),
            "Changed filter (type, N, X, O)"
        );

        Ok(())
    }

    /// Installs `table` as the working table: drops every current subscription, flushes
    /// the pipe and subscribes to every occupied slot of the new table. Statistics restart
    /// only if every subscription succeeded.
    pub fn replace_table(&mut self, table: RouteTable) -> SubscriptionReport {
        self.clear_routes();
        self.table = table;

        let mut report = SubscriptionReport::default();
        let used: Vec<Route> = self.table.iter_used().copied().collect();
        for route in used {
            report.routes += 1;
            if let Err(e) = self.pipe.subscribe(route.stream_id, route.qos, route.buf_limit) {
                report.failed += 1;
                error!(
                    err = ?e,
                    stream_id = %route.stream_id,
                    buf_limit = route.buf_limit,
                    "Error subscribing to stream"
                );
            }
        }

        if report.failed == 0 {
            self.stats.reset(None, self.options.stats_init_delay);
            info!(routes = report.routes, "Loaded new table");
        } else {
            error!(routes = report.routes, failed = report.failed, "Loaded new table with failed subscriptions");
        }

        report
    }

    /// Overlays the document's records onto a copy of the current table and installs the
    /// result. An invalid record rejects the whole load.
    pub fn load_table(&mut self, doc: &TableDocument) -> Result<LoadReport, RouterError> {
        let records = doc.records();
        if records.is_empty() {
            warn!("Table file has no packet entries");
            self.load_status = LoadStatus::Valid;
            self.load_count = 0;
            return Ok(LoadReport::default());
        }

        let table = match self.table.overlay(&records) {
            Ok(table) => table,
            Err(e) => {
                error!(err = %e, "Table load rejected");
                self.load_status = LoadStatus::Invalid;
                return Err(e.into());
            }
        };

        let subscriptions = self.replace_table(table);
        self.load_status = LoadStatus::Valid;
        self.load_count = records.len();
        info!(entries = records.len(), "Packet table load updated entries");

        Ok(LoadReport { records: records.len(), subscriptions })
    }

    /// Reads a table file and loads it.
    pub fn load_table_file(&mut self, path: impl AsRef<Path>) -> Result<LoadReport, RouterError> {
        let path = path.as_ref();
        let doc = match TableDocument::from_file(path) {
            Ok(doc) => doc,
            Err(e) => {
                error!(err = %e, path = %path.display(), "Error reading table file");
                self.load_status = LoadStatus::Invalid;
                return Err(e.into());
            }
        };

        self.load_table(&doc)
    }

    /// Writes every occupied slot to a table file that can be loaded again.
    pub fn dump_table_file(&self, path: impl AsRef<Path>) -> Result<usize, RouterError> {
        let path = path.as_ref();
        let doc = self.table.to_document();

        if let Err(e) = doc.write_file(path) {
            error!(err = %e, path = %path.display(), "Error creating dump file");
            return Err(e.into());
        }

        info!(path = %path.display(), routes = doc.packets.len(), "Dumped packet table");
        Ok(doc.packets.len())
    }

    /// The slot of `stream_id`, used or not, for route telemetry.
    pub fn route_telemetry(&self, stream_id: StreamId) -> Route {
        self.table.get(stream_id.key()).copied().unwrap_or_default()
    }
}
