#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use std::io;

use thiserror::Error;

pub use tlm_router::*;
pub use tlm_transport::*;
pub use tlm_wire as wire;

mod app;
pub use app::{App, VERSION};

mod command;
pub use command::{Command, RawFilter};

mod config;
pub use config::AppConfig;

pub mod telemetry;
pub use telemetry::{DataTypeTlm, HkTlm, PlaybackTlm, RouteTlm};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("Config file error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Router error: {0}")]
    Router(#[from] RouterError),
    #[error("Playback error: {0}")]
    Playback(#[from] playback::PlaybackError),
    #[error("Bus error: {0}")]
    Bus(#[from] bus::BusError),
    #[error("Wire error: {0}")]
    Wire(#[from] tlm_wire::Error),
    #[error("Invalid destination address {0:?}")]
    InvalidAddress(String),
    #[error("Run loop delay {value} ms outside {min}..={max} ms")]
    InvalidRunLoopDelay { value: u16, min: u16, max: u16 },
}
