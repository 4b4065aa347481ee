//! The packet router: drains the input pipe, filters by route and forwards over UDP.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::{Duration, Instant},
};

use thiserror::Error;
use tlm_transport::{Transport, TransportError};
use tlm_wire::TimeFormat;
use tracing::debug;

use crate::{
    bus::BusError,
    filter::FilterError,
    stats::{clamp_interval, OutputStats},
    table::{LoadStatus, RouteTable, TableError},
};

mod output;
pub use output::OutputCycle;

mod routes;
pub use routes::{LoadReport, SubscriptionReport};

/// Default UDP port telemetry is sent to.
pub const DEFAULT_UDP_PORT: u16 = 1235;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Table error: {0}")]
    Table(#[from] TableError),
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Packet {0} already exists in the packet table")]
    RouteExists(tlm_wire::StreamId),
    #[error("Packet {0} not in use")]
    RouteUnused(tlm_wire::StreamId),
    #[error("Failed {failed} of {attempted} unsubscribes")]
    Unsubscribe { attempted: usize, failed: usize },
}

#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Destination UDP port.
    udp_port: u16,
    /// Length of one statistics reporting interval, normally the run loop period.
    reporting_interval: Duration,
    /// How long statistics settle after startup or a table load.
    stats_init_delay: Duration,
    /// How long statistics settle after an output or rate reconfiguration.
    stats_config_delay: Duration,
    /// Layout of packet time fields.
    time_format: TimeFormat,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            udp_port: DEFAULT_UDP_PORT,
            reporting_interval: Duration::from_millis(500),
            stats_init_delay: Duration::from_secs(20),
            stats_config_delay: Duration::from_secs(5),
            time_format: TimeFormat::default(),
        }
    }
}

impl RouterOptions {
    /// Sets the destination UDP port.
    pub fn udp_port(mut self, port: u16) -> Self {
        self.udp_port = port;
        self
    }

    /// Sets the statistics reporting interval, raised to at least
    /// [`MIN_REPORTING_INTERVAL`](crate::stats::MIN_REPORTING_INTERVAL).
    pub fn reporting_interval(mut self, interval: Duration) -> Self {
        self.reporting_interval = clamp_interval(interval);
        self
    }

    /// Sets the statistics settle time used at startup and after table loads.
    pub fn stats_init_delay(mut self, delay: Duration) -> Self {
        self.stats_init_delay = delay;
        self
    }

    /// Sets the statistics settle time used after reconfiguration.
    pub fn stats_config_delay(mut self, delay: Duration) -> Self {
        self.stats_config_delay = delay;
        self
    }

    pub fn time_format(mut self, format: TimeFormat) -> Self {
        self.time_format = format;
        self
    }
}

/// Snapshot of the router state reported in housekeeping telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterStatus {
    pub enabled: bool,
    pub suppressed: bool,
    pub dest: SocketAddr,
    pub routes: usize,
    pub load_status: LoadStatus,
    pub load_count: usize,
    pub stats_valid: bool,
    pub pkts_per_sec: f64,
    pub bytes_per_sec: f64,
}

/// Routes packets from a bus pipe `P` to datagram sockets of transport `T`.
///
/// All operations run to completion on the caller's thread; the router never blocks on
/// the pipe or the socket.
#[derive(Debug)]
pub struct PacketRouter<P, T: Transport> {
    options: RouterOptions,
    pipe: P,
    transport: T,
    socket: Option<T::Socket>,
    table: RouteTable,
    stats: OutputStats,
    dest: Ipv4Addr,
    enabled: bool,
    /// Set after a send failure, cleared by enabling output.
    suppressed: bool,
    last_cycle: Instant,
    load_status: LoadStatus,
    load_count: usize,
}

impl<P, T: Transport> PacketRouter<P, T> {
    /// Creates a router with an empty table and output disabled.
    pub fn new(pipe: P, transport: T) -> Self {
        Self::with_options(pipe, transport, RouterOptions::default())
    }

    pub fn with_options(pipe: P, transport: T, options: RouterOptions) -> Self {
        let stats = OutputStats::new(options.reporting_interval, options.stats_init_delay);

        Self {
            options,
            pipe,
            transport,
            socket: None,
            table: RouteTable::new(),
            stats,
            dest: Ipv4Addr::UNSPECIFIED,
            enabled: false,
            suppressed: true,
            last_cycle: Instant::now(),
            load_status: LoadStatus::Undefined,
            load_count: 0,
        }
    }

    #[inline]
    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    #[inline]
    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    #[inline]
    pub fn stats(&self) -> &OutputStats {
        &self.stats
    }

    #[inline]
    pub fn pipe(&self) -> &P {
        &self.pipe
    }

    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[inline]
    pub fn socket(&self) -> Option<&T::Socket> {
        self.socket.as_ref()
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// The destination telemetry is sent to.
    #[inline]
    pub fn dest(&self) -> SocketAddr {
        SocketAddr::from((self.dest, self.options.udp_port))
    }

    #[inline]
    pub fn time_format(&self) -> TimeFormat {
        self.options.time_format
    }

    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            enabled: self.enabled,
            suppressed: self.suppressed,
            dest: self.dest(),
            routes: self.table.len_used(),
            load_status: self.load_status,
            load_count: self.load_count,
            stats_valid: self.stats.is_valid(),
            pkts_per_sec: self.stats.pkts_per_sec(),
            bytes_per_sec: self.stats.bytes_per_sec(),
        }
    }

    /// Clears the table load status and restarts statistics.
    pub fn reset_status(&mut self) {
        self.load_status = LoadStatus::Undefined;
        self.load_count = 0;
        self.stats.reset(None, self.options.stats_config_delay);
    }

    /// Changes the statistics reporting interval and restarts statistics.
    pub fn set_reporting_interval(&mut self, interval: Duration) {
        let interval = clamp_interval(interval);
        debug!(?interval, "Reporting interval changed");
        self.options.reporting_interval = interval;
        self.stats.reset(Some(interval), self.options.stats_config_delay);
    }
}
