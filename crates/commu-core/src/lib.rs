//! Core helpers shared by every commu crate: tracing setup and the
//! human-memorable identifiers peers exchange out of band.

pub mod ident;
pub mod tracing;

pub use ident::{
    generate_connection_code, generate_peer_id, is_connection_code, is_peer_id,
    normalize_connection_code,
};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing, parse_level};
