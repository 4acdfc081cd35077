//! # lumen-core
//!
//! Core types for the Lumen film.
//! This crate holds the host side of the film that the hardware merge reads
//! from and writes into: pixel channels, per-pipeline light group scales,
//! sample counters, configuration, and the shared error type.

pub mod channel;
pub mod config;
pub mod error;
pub mod film;
pub mod hash;
pub mod samples;
pub mod scale;

pub use config::*;

pub use channel::{Channel, ChannelKind};
pub use error::{LumenError, LumenResult};
pub use film::Film;
pub use samples::SampleCounters;
pub use scale::{PipelineScaleConfig, RadianceChannelScale};
