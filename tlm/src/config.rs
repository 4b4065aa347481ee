use std::{fs::File, io::BufReader, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tlm_router::{bus::DEFAULT_PIPE_DEPTH, router::DEFAULT_UDP_PORT, PlaybackOptions, RouterOptions};
use tlm_wire::{StreamId, TimeFormat};

use crate::AppError;

/// Application configuration, read from a JSON init file. Missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AppConfig {
    /// Name of the pipe telemetry is read from.
    pub pipe_name: String,
    pub pipe_depth: usize,
    /// Destination UDP port.
    pub udp_port: u16,

    /// Run loop period in milliseconds, also the statistics reporting interval.
    pub run_loop_delay_ms: u16,
    pub run_loop_delay_min_ms: u16,
    pub run_loop_delay_max_ms: u16,

    /// Statistics settle time after startup and table loads.
    pub stats_init_delay_ms: u64,
    /// Statistics settle time after output or run loop changes.
    pub stats_config_delay_ms: u64,

    /// Table loaded at startup and by load commands without a file.
    pub table_load_file: String,
    /// Default target of dump commands.
    pub table_dump_file: String,

    pub playback_hk_period: u16,
    pub playback_log_file: String,

    /// Event service command stream and its "write log to file" function code.
    pub evs_cmd_mid: u16,
    pub evs_write_log_fc: u8,

    pub hk_tlm_mid: u16,
    pub data_type_tlm_mid: u16,
    pub route_tlm_mid: u16,
    pub playback_tlm_mid: u16,

    /// Width of the sub-second field of telemetry time stamps, 16 or 32.
    pub subsecond_bits: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipe_name: "TLM_OUT_PIPE".to_owned(),
            pipe_depth: DEFAULT_PIPE_DEPTH,
            udp_port: DEFAULT_UDP_PORT,
            run_loop_delay_ms: 500,
            run_loop_delay_min_ms: 100,
            run_loop_delay_max_ms: 5000,
            stats_init_delay_ms: 20_000,
            stats_config_delay_ms: 5_000,
            table_load_file: "/cf/tlm_out_pkt_tbl.json".to_owned(),
            table_dump_file: "/cf/tlm_out_pkt_tbl_d.json".to_owned(),
            playback_hk_period: 1,
            playback_log_file: "/cf/tlm_out_evt_log.dat".to_owned(),
            evs_cmd_mid: 0x1801,
            evs_write_log_fc: 3,
            hk_tlm_mid: 0x0880,
            data_type_tlm_mid: 0x0883,
            route_tlm_mid: 0x0881,
            playback_tlm_mid: 0x0882,
            subsecond_bits: 16,
        }
    }
}

impl AppConfig {
    /// Reads and validates a JSON init file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.run_loop_delay_min_ms == 0 || self.run_loop_delay_min_ms > self.run_loop_delay_max_ms {
            return Err(AppError::InvalidConfig(format!(
                "run loop delay bounds {}..={} ms",
                self.run_loop_delay_min_ms, self.run_loop_delay_max_ms
            )));
        }

        if !(self.run_loop_delay_min_ms..=self.run_loop_delay_max_ms).contains(&self.run_loop_delay_ms) {
            return Err(AppError::InvalidConfig(format!(
                "run loop delay {} ms outside {}..={} ms",
                self.run_loop_delay_ms, self.run_loop_delay_min_ms, self.run_loop_delay_max_ms
            )));
        }

        if self.pipe_depth == 0 {
            return Err(AppError::InvalidConfig("pipe depth must be positive".to_owned()));
        }

        self.try_time_format()?;
        Ok(())
    }

    fn try_time_format(&self) -> Result<TimeFormat, AppError> {
        match self.subsecond_bits {
            16 => Ok(TimeFormat::Subsec16),
            32 => Ok(TimeFormat::Subsec32),
            bits => Err(AppError::InvalidConfig(format!("unsupported subsecond width {bits}"))),
        }
    }

    /// Time format of telemetry headers. Falls back to the default for an invalid width.
    pub fn time_format(&self) -> TimeFormat {
        self.try_time_format().unwrap_or_default()
    }

    #[inline]
    pub fn run_loop_delay(&self) -> Duration {
        Duration::from_millis(self.run_loop_delay_ms.into())
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions::default()
            .udp_port(self.udp_port)
            .reporting_interval(self.run_loop_delay())
            .stats_init_delay(Duration::from_millis(self.stats_init_delay_ms))
            .stats_config_delay(Duration::from_millis(self.stats_config_delay_ms))
            .time_format(self.time_format())
    }

    pub fn playback_options(&self) -> PlaybackOptions {
        PlaybackOptions::default()
            .hk_period(self.playback_hk_period)
            .log_file(&self.playback_log_file)
            .time_format(self.time_format())
    }

    #[inline]
    pub fn evs_cmd_stream(&self) -> StreamId {
        StreamId::new(self.evs_cmd_mid)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tlm_out_ini.json");
        fs::write(&path, r#"{"udp-port": 5000, "run-loop-delay-ms": 250, "subsecond-bits": 32}"#)
            .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.udp_port, 5000);
        assert_eq!(config.run_loop_delay(), Duration::from_millis(250));
        assert_eq!(config.time_format(), TimeFormat::Subsec32);
        assert_eq!(config.pipe_depth, DEFAULT_PIPE_DEPTH);
        assert_eq!(config.hk_tlm_mid, AppConfig::default().hk_tlm_mid);
    }

    #[test]
    fn rejects_invalid_values() {
        let config = AppConfig { run_loop_delay_ms: 50, ..Default::default() };
        assert!(matches!(config.validate(), Err(AppError::InvalidConfig(_))));

        let config = AppConfig { run_loop_delay_min_ms: 600, run_loop_delay_max_ms: 400, ..Default::default() };
        assert!(matches!(config.validate(), Err(AppError::InvalidConfig(_))));

        let config = AppConfig { subsecond_bits: 24, ..Default::default() };
        assert!(matches!(config.validate(), Err(AppError::InvalidConfig(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"udp-port": "x"}"#).unwrap();
        assert!(matches!(AppConfig::from_file(&path), Err(AppError::Json(_))));
    }
}
