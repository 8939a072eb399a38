//! Tessera — the data-synchronization core of a membership portal.
//!
//! A client-side resource cache and mutation-synchronization layer:
//! remote resources are fetched once, cached under stable keys, edited
//! optimistically ahead of server confirmation, reconciled or rolled
//! back when the server answers, and invalidated in fanout when a
//! confirmed change makes dependent entries stale. Asynchronous
//! server-side processes (payment settlement) are tracked to a terminal
//! state by an explicit polling state machine.
//!
//! ## Wiring
//!
//! ```ignore
//! let settings = tessera::config::load()?;
//! tessera::infra::telemetry::init(&settings.logging)?;
//!
//! let transport = Arc::new(RestTransport::new(&settings.transport)?);
//! let portal = Portal::new(&settings, transport, Arc::new(SystemClock));
//!
//! let comments = portal.comments().list("pub-1").await?;
//! ```

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;

pub use application::portal::Portal;
pub use application::transport::{ResourceTransport, WriteRequest};
pub use cache::{
    CacheEntry, CacheStore, EntryStatus, InvalidationBus, KeyPattern, MutationExecutor,
    PollState, PollingVerifier, QueryExecutor, ResourceKey,
};
pub use domain::error::ResourceError;
pub use domain::records::ResourceValue;
pub use domain::types::ResourceKind;
