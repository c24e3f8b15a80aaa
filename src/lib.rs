//! Fennec ASR realtime streaming SDK.
//!
//! Re-exports the session API from `fennec-realtime` and the wire types from
//! `fennec-realtime-types` under a single crate name.

pub use fennec_realtime::*;
