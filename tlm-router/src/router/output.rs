use std::{net::Ipv4Addr, time::Instant};

use tlm_transport::{DatagramSocket, Transport, TransportError};
use tlm_wire::Packet;
use tracing::{debug, error, info, trace, warn};

use super::{PacketRouter, RouterError};
use crate::{bus::Pipe, filter::is_filtered};

/// What one output cycle did.
#[derive(Debug, Default)]
pub struct OutputCycle {
    /// Packets read from the pipe.
    pub drained: usize,
    /// Packets dropped by their route's filter.
    pub filtered: usize,
    /// Packets sent successfully.
    pub forwarded: usize,
    /// Bytes sent successfully.
    pub bytes: usize,
    /// The send failure that suppressed output during this cycle, if any.
    pub send_error: Option<TransportError>,
}

impl<P: Pipe, T: Transport> PacketRouter<P, T> {
    /// Enables output to `dest`, clearing suppression. A socket is opened and statistics
    /// restart only when output was disabled; otherwise just the destination changes.
    pub fn enable_output(&mut self, dest: Ipv4Addr) -> Result<(), RouterError> {
        self.dest = dest;
        self.suppressed = false;
        info!(dest = %self.dest(), "Telemetry output enabled");

        if self.enabled {
            return Ok(());
        }

        match self.transport.open() {
            Ok(socket) => {
                debug!(local_addr = ?socket.local_addr().ok(), "Opened telemetry socket");
                self.socket = Some(socket);
                self.stats.reset(None, self.options.stats_config_delay);
                self.enabled = true;
                Ok(())
            }
            Err(e) => {
                error!(err = ?e, "Telemetry output enable socket error");
                Err(e.into())
            }
        }
    }

    /// Drains the input pipe and forwards every packet that passes its route's filter.
    pub fn output_telemetry(&mut self) -> OutputCycle {
        self.output_telemetry_at(Instant::now())
    }

    /// [`Self::output_telemetry`] with an explicit cycle time, used to compute the
    /// statistics interval.
    pub fn output_telemetry_at(&mut self, now: Instant) -> OutputCycle {
        let mut cycle = OutputCycle::default();
        let dest = self.dest();

        loop {
            let packet = match self.pipe.try_recv() {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => {
                    error!(err = ?e, "Error reading input pipe");
                    break;
                }
            };
            cycle.drained += 1;

            if !self.enabled || self.suppressed {
                continue;
            }

            let parsed = match Packet::parse(&packet) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(err = ?e, "Dropping malformed packet");
                    continue;
                }
            };

            let filter = self.table.get(parsed.stream_id().key()).map(|r| r.filter).unwrap_or_default();
            if is_filtered(&parsed, &filter, self.options.time_format) {
                trace!(stream_id = %parsed.stream_id(), seq = parsed.sequence_count(), "Filtered");
                cycle.filtered += 1;
                continue;
            }

            let Some(socket) = self.socket.as_ref() else { continue };
            match socket.send_to(&packet, dest) {
                Ok(sent) => {
                    cycle.forwarded += 1;
                    cycle.bytes += sent;
                }
                Err(e) => {
                    error!(err = ?e, ?dest, "Error sending packet, telemetry output suppressed");
                    self.suppressed = true;
                    cycle.send_error = Some(e);
                }
            }
        }

        let delta = now.saturating_duration_since(self.last_cycle);
        self.last_cycle = now;
        self.stats.update(cycle.forwarded as u64, cycle.bytes as u64, delta);

        cycle
    }
}
