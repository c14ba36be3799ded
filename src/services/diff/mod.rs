//! Config change-diff protocol
//!
//! This module contains the multi-key change query protocol:
//! - `types`: config keys, watch sets and protocol errors
//! - `encoding`: percent-encoding helpers
//! - `codec`: wire encoders / decoders
//! - `service`: server side md5 comparison

pub mod codec;
pub mod encoding;
pub mod service;
pub mod types;

pub use codec::{
    decode_changed_keys, decode_watch_set, encode_changed_keys, encode_changed_keys_debug, encode_watch_set,
};
pub use service::{Md5Cache, content_md5};
pub use types::{ClientWatchSet, ConfigKey, DEFAULT_GROUP, MAX_WATCH_ENTRIES, ProtocolError};
