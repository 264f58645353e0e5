pub mod banner;
pub mod catalog;
pub mod decoders;
pub mod engine;
pub mod payloads;
pub mod results;
pub mod stats;

pub use catalog::ProbeCatalog;
pub use decoders::{DecoderBank, ProtocolDecoder};
pub use engine::ProbeEngine;
pub use results::{ParsedInfo, Probe, ProbeResult, Target, Transport};
pub use stats::ProbeStats;
