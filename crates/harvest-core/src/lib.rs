//! Harvest Core - Traffic capture model and session logic.
//!
//! This crate provides:
//! - Normalized request/response model ([`TrafficEntry`])
//! - Entry construction from interception callbacks ([`EntryConstructor`])
//! - In-memory entry store, recording gate and URL filter
//! - HAR 1.2 encoding and decoding
//! - The [`Session`] context tying these together with an event bus

pub mod constructor;
pub mod error;
pub mod events;
pub mod filter;
pub mod gate;
pub mod har;
pub mod kv;
pub mod model;
pub mod normalize;
pub mod session;
pub mod store;
pub mod transfer;

pub use constructor::{EntryConstructor, ExchangeId, RequestHead, ResponseHead};
pub use error::{CoreError, FilterError, HarError, KvError, Result};
pub use events::{EventBus, SessionEvent};
pub use filter::{FilterEngine, FILTER_KEY};
pub use gate::RecordingGate;
pub use har::{from_har, parse_har, to_har, Har};
pub use kv::KeyValueStore;
pub use model::{Body, BodyEncoding, Header, TrafficEntry, TrafficRequest, TrafficResponse};
pub use normalize::{BodyBuffer, DEFAULT_MAX_BODY_BYTES};
pub use session::{Session, SessionConfig};
pub use store::EntryStore;
pub use transfer::{read_har, write_har, ExportSelection};
