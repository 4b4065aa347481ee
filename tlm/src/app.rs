use std::{net::Ipv4Addr, path::PathBuf, time::Duration};

use bytes::{Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tlm_common::MissionTime;
use tlm_router::{
    bus::{EvsClient, Pipe, Publisher},
    filter::{preview, FilterKind},
    router::{LoadReport, OutputCycle},
    EventPlayback, FilterRule, PacketRouter, Route, RouterError,
};
use tlm_transport::Transport;
use tlm_wire::{
    frame::{Codec, TlmFrame},
    packet::SEQ_COUNT_MASK,
    StreamId,
};
use tokio_util::codec::Encoder;
use tracing::{debug, error, info, warn};

use crate::{AppConfig, AppError, Command, DataTypeTlm, HkTlm, PlaybackTlm, RawFilter, RouteTlm};

/// Version reported by the no-op command.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The telemetry output application: owns the router and the playback engine, executes
/// commands and produces housekeeping telemetry.
///
/// `P` is the telemetry input pipe, `T` the output transport and `B` the bus the
/// application's own telemetry and event service requests are published on.
pub struct App<P, T: Transport, B> {
    config: AppConfig,
    router: PacketRouter<P, T>,
    playback: EventPlayback<EvsClient<B>>,
    publisher: B,
    codec: Codec,
    /// Current run loop period in milliseconds.
    run_loop_delay: u16,
    valid_cmds: u16,
    invalid_cmds: u16,
    /// Next sequence count per produced stream.
    seq: FxHashMap<StreamId, u16>,
}

impl<P, T, B> std::fmt::Debug for App<P, T, B>
where
    P: std::fmt::Debug,
    T: Transport + std::fmt::Debug,
    T::Socket: std::fmt::Debug,
    B: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("router", &self.router)
            .field("playback", &self.playback)
            .field("publisher", &self.publisher)
            .field("codec", &self.codec)
            .field("run_loop_delay", &self.run_loop_delay)
            .field("valid_cmds", &self.valid_cmds)
            .field("invalid_cmds", &self.invalid_cmds)
            .field("seq", &self.seq)
            .finish()
    }
}

impl<P, T, B> App<P, T, B>
where
    P: Pipe,
    T: Transport,
    B: Publisher + Clone,
{
    pub fn new(config: AppConfig, pipe: P, transport: T, publisher: B) -> Result<Self, AppError> {
        config.validate()?;

        let router = PacketRouter::with_options(pipe, transport, config.router_options());
        let evs = EvsClient::new(publisher.clone(), config.evs_cmd_stream(), config.evs_write_log_fc);
        let playback = EventPlayback::new(evs, config.playback_options());

        info!(
            version = VERSION,
            pipe = %config.pipe_name,
            udp_port = config.udp_port,
            run_loop_delay_ms = config.run_loop_delay_ms,
            "Telemetry output initialized"
        );

        Ok(Self {
            codec: Codec::new(config.time_format()),
            run_loop_delay: config.run_loop_delay_ms,
            config,
            router,
            playback,
            publisher,
            valid_cmds: 0,
            invalid_cmds: 0,
            seq: FxHashMap::default(),
        })
    }

    /// Loads the configured startup table.
    pub fn load_startup_table(&mut self) -> Result<LoadReport, AppError> {
        let path = PathBuf::from(&self.config.table_load_file);
        Ok(self.router.load_table_file(path)?)
    }

    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[inline]
    pub fn router(&self) -> &PacketRouter<P, T> {
        &self.router
    }

    #[inline]
    pub fn playback(&self) -> &EventPlayback<EvsClient<B>> {
        &self.playback
    }

    #[inline]
    pub fn valid_cmds(&self) -> u16 {
        self.valid_cmds
    }

    #[inline]
    pub fn invalid_cmds(&self) -> u16 {
        self.invalid_cmds
    }

    /// The period the application's run loop should tick at.
    #[inline]
    pub fn run_loop_delay(&self) -> Duration {
        Duration::from_millis(self.run_loop_delay.into())
    }

    /// Executes a command and updates the command counters.
    pub fn dispatch(&mut self, cmd: Command) -> Result<(), AppError> {
        let name = cmd.name();
        let counted = !matches!(cmd, Command::Reset);

        match self.execute(cmd) {
            Ok(()) => {
                if counted {
                    self.valid_cmds = self.valid_cmds.wrapping_add(1);
                }
                debug!(cmd = name, "Command accepted");
                Ok(())
            }
            Err(e) => {
                self.invalid_cmds = self.invalid_cmds.wrapping_add(1);
                warn!(cmd = name, err = %e, "Command rejected");
                Err(e)
            }
        }
    }

    fn execute(&mut self, cmd: Command) -> Result<(), AppError> {
        match cmd {
            Command::Noop => {
                info!(version = VERSION, "Telemetry output received a no operation command");
            }
            Command::Reset => {
                self.valid_cmds = 0;
                self.invalid_cmds = 0;
                self.router.reset_status();
            }
            Command::LoadTable(path) => {
                let path = path.unwrap_or_else(|| PathBuf::from(&self.config.table_load_file));
                self.router.load_table_file(path)?;
            }
            Command::DumpTable(path) => {
                let path = path.unwrap_or_else(|| PathBuf::from(&self.config.table_dump_file));
                self.router.dump_table_file(path)?;
            }
            Command::AddRoute { stream_id, qos, buf_limit, filter } => {
                let filter = self.validate_filter(stream_id, filter)?;
                self.router.add_route(Route::new(stream_id, qos, buf_limit, filter))?;
            }
            Command::RemoveRoute(stream_id) => self.router.remove_route(stream_id)?,
            Command::RemoveAllRoutes => {
                self.router.remove_all_routes()?;
            }
            Command::UpdateFilter { stream_id, filter } => {
                self.router.update_filter(stream_id, filter.kind, filter.pass, filter.group, filter.offset)?
            }
            Command::EnableOutput(dest) => {
                let addr: Ipv4Addr = match dest.trim().parse() {
                    Ok(addr) => addr,
                    Err(_) => {
                        error!(dest = %dest, "Enable output rejected, invalid IPv4 address");
                        return Err(AppError::InvalidAddress(dest));
                    }
                };
                self.router.enable_output(addr)?;
            }
            Command::SendRouteTlm(stream_id) => {
                let route = self.router.route_telemetry(stream_id);
                let mut payload = BytesMut::new();
                RouteTlm::from(&route).encode(&mut payload);
                self.publish_tlm(self.config.route_tlm_mid, payload.freeze())?;
            }
            Command::SendDataTypeTlm => {
                let mut payload = BytesMut::new();
                DataTypeTlm::default().encode(&mut payload);
                self.publish_tlm(self.config.data_type_tlm_mid, payload.freeze())?;
            }
            Command::SetRunLoopDelay(value) => self.set_run_loop_delay(value)?,
            Command::TestFilter(filter) => self.test_filter(filter)?,
            Command::ConfigPlayback { log_file, hk_period } => {
                self.playback.configure(log_file, hk_period)?;
            }
            Command::StartPlayback => self.playback.start()?,
            Command::StopPlayback => self.playback.stop(),
        }

        Ok(())
    }

    fn validate_filter(&self, stream_id: StreamId, raw: RawFilter) -> Result<FilterRule, AppError> {
        FilterRule::from_raw(raw.kind, raw.pass, raw.group, raw.offset).map_err(|e| {
            error!(err = %e, %stream_id, kind = raw.kind, "Invalid filter");
            AppError::Router(RouterError::Filter(e))
        })
    }

    fn set_run_loop_delay(&mut self, value: u16) -> Result<(), AppError> {
        let (min, max) = (self.config.run_loop_delay_min_ms, self.config.run_loop_delay_max_ms);
        if !(min..=max).contains(&value) {
            error!(value, min, max, "Invalid run loop delay");
            return Err(AppError::InvalidRunLoopDelay { value, min, max });
        }

        info!(from = self.run_loop_delay, to = value, "Run loop delay changed (ms)");
        self.run_loop_delay = value;
        self.router.set_reporting_interval(self.run_loop_delay());

        Ok(())
    }

    /// Logs the pass/filter pattern of the parameters applied by sequence count and by
    /// time.
    fn test_filter(&self, raw: RawFilter) -> Result<(), AppError> {
        for kind in [FilterKind::BySequenceCount, FilterKind::ByTime] {
            let rule = FilterRule::new(kind, raw.pass, raw.group, raw.offset).map_err(RouterError::from)?;
            let pattern: String = preview(&rule, self.router.time_format())
                .iter()
                .map(|filtered| if *filtered { 'F' } else { 'P' })
                .collect();

            info!(?kind, n = raw.pass, x = raw.group, o = raw.offset, %pattern, "Filter test");
        }

        Ok(())
    }

    /// Runs one output cycle.
    pub fn run_cycle(&mut self) -> OutputCycle {
        self.router.output_telemetry()
    }

    /// Runs the playback engine and publishes housekeeping telemetry.
    ///
    /// A playback failure is reported by the playback engine and does not stop the
    /// housekeeping packet.
    pub fn housekeeping(&mut self) -> Result<(), AppError> {
        match self.playback.execute() {
            Ok(Some(batch)) => {
                let mut payload = BytesMut::new();
                PlaybackTlm::from(batch).encode(self.codec.format(), &mut payload);
                self.publish_tlm(self.config.playback_tlm_mid, payload.freeze())?;
            }
            Ok(None) => {}
            Err(e) => debug!(err = %e, "Playback cycle failed"),
        }

        let mut payload = BytesMut::new();
        self.hk_tlm().encode(&mut payload);
        self.publish_tlm(self.config.hk_tlm_mid, payload.freeze())
    }

    /// The current housekeeping values.
    pub fn hk_tlm(&self) -> HkTlm {
        HkTlm {
            valid_cmds: self.valid_cmds,
            invalid_cmds: self.invalid_cmds,
            run_loop_delay_ms: self.run_loop_delay,
            playback_enabled: self.playback.is_enabled(),
            playback_hk_period: u8::try_from(self.playback.hk_period()).unwrap_or(u8::MAX),
            ..HkTlm::from_status(&self.router.status())
        }
    }

    fn publish_tlm(&mut self, mid: u16, payload: Bytes) -> Result<(), AppError> {
        let stream_id = StreamId::new(mid);
        let seq = self.seq.entry(stream_id).or_default();
        let frame = TlmFrame::new(stream_id, *seq, MissionTime::now(), payload);
        *seq = seq.wrapping_add(1) & SEQ_COUNT_MASK;

        let mut buf = BytesMut::new();
        self.codec.encode(frame, &mut buf)?;
        self.publisher.publish(buf.freeze())?;

        Ok(())
    }
}
