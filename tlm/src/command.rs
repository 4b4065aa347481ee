use std::path::PathBuf;

use tlm_router::{table::Qos, FilterRule};
use tlm_wire::StreamId;

/// Ground commands handled by [`App::dispatch`](crate::App::dispatch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Logs the application version.
    Noop,
    /// Clears the command counters, the table load status and the output statistics.
    Reset,
    /// Loads a table file, or the configured one if `None`.
    LoadTable(Option<PathBuf>),
    /// Dumps the table to a file, or the configured one if `None`.
    DumpTable(Option<PathBuf>),
    AddRoute { stream_id: StreamId, qos: Qos, buf_limit: u16, filter: RawFilter },
    RemoveRoute(StreamId),
    RemoveAllRoutes,
    UpdateFilter { stream_id: StreamId, filter: RawFilter },
    /// Enables output to a dotted-quad IPv4 address.
    EnableOutput(String),
    SendRouteTlm(StreamId),
    /// Publishes the fixed [`DataTypeTlm`](crate::DataTypeTlm) packet ground tools use to
    /// check their decoding of every field type.
    SendDataTypeTlm,
    SetRunLoopDelay(u16),
    /// Logs which of 20 synthetic packets the `N`/`X`/`O` parameters filter, by sequence
    /// count and by time.
    TestFilter(RawFilter),
    ConfigPlayback { log_file: PathBuf, hk_period: u16 },
    StartPlayback,
    StopPlayback,
}

impl Command {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Reset => "reset",
            Self::LoadTable(_) => "load-table",
            Self::DumpTable(_) => "dump-table",
            Self::AddRoute { .. } => "add-route",
            Self::RemoveRoute(_) => "remove-route",
            Self::RemoveAllRoutes => "remove-all-routes",
            Self::UpdateFilter { .. } => "update-filter",
            Self::EnableOutput(_) => "enable-output",
            Self::SendRouteTlm(_) => "send-route-tlm",
            Self::SendDataTypeTlm => "send-data-type-tlm",
            Self::SetRunLoopDelay(_) => "set-run-loop-delay",
            Self::TestFilter(_) => "test-filter",
            Self::ConfigPlayback { .. } => "config-playback",
            Self::StartPlayback => "start-playback",
            Self::StopPlayback => "stop-playback",
        }
    }
}

/// Filter parameters as they arrive in a command, before validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawFilter {
    pub kind: u16,
    /// N
    pub pass: u16,
    /// X
    pub group: u16,
    /// O
    pub offset: u16,
}

impl RawFilter {
    pub fn new(kind: u16, pass: u16, group: u16, offset: u16) -> Self {
        Self { kind, pass, group, offset }
    }
}

impl From<FilterRule> for RawFilter {
    fn from(rule: FilterRule) -> Self {
        Self::new(rule.kind().into(), rule.pass(), rule.group(), rule.offset())
    }
}
