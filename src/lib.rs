#[macro_use]
extern crate lazy_static;

/// Policy engine: matches requests to pools/replies and materializes attributes.
pub mod backend;
/// Decoder/Encoder contract and the reference RADIUS wire codec.
pub mod codec;
/// Command-line argument parsing and the config-check/show-config subcommands.
pub mod cli;
/// Configuration model, loading, and validation.
pub mod config;
/// External dialog persistence.
pub mod dialog_store;
pub mod enums;
pub mod error;
pub mod logging;
/// Ordered, first-match regex rule engine for pool/reply selection.
pub mod matching;
/// Address pool runtime: CIDR expansion and allocate/restore.
pub mod pools;
/// Reply attribute directive evaluation.
pub mod reply;
/// The UDP listener: bounded-concurrency datagram dispatch.
pub mod servers;
#[cfg(test)]
mod tests;

/// Internal limit of in-flight datagram handlers per listener, absent an
/// explicit `max_concurrent` in config.
pub const MAX_IN_FLIGHT: usize = 512;

/// The maximum size of a RADIUS UDP packet, RFC 2865 §3.
pub const UDP_BUFFER_SIZE: usize = 4096;
