//! Table-driven telemetry output routing.
//!
//! A [`PacketRouter`] drains packets from a bus [`Pipe`](bus::Pipe), drops the ones its
//! [`RouteTable`] filters out and forwards the rest as UDP datagrams. [`EventPlayback`]
//! replays the event service's log as telemetry batches.

pub mod bus;
pub mod filter;
pub mod playback;
pub mod router;
pub mod stats;
pub mod table;

pub use filter::{FilterKind, FilterRule};
pub use playback::{EventPlayback, PlaybackOptions, PlaybackState};
pub use router::{PacketRouter, RouterError, RouterOptions, RouterStatus};
pub use stats::{OutputStats, StatsState};
pub use table::{Qos, Route, RouteTable, TableDocument};
