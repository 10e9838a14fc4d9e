// lib.rs - Logix EtherNet/IP tag client
// =========================================================================
//
// # Logix EtherNet/IP Client
//
// A non-blocking tag client for Allen-Bradley ControlLogix-class PLCs. Tags
// are created from attribute strings, addressed by integer handles, and
// driven by a small pool of background workers that own the TCP sessions.
//
// ## Features
//
// - **Shared Sessions**: Tags on the same gateway and route share one
//   registered EtherNet/IP session
// - **Unconnected Messaging**: Read Tag, Write Tag and Get Attribute List
//   wrapped in CIP Unconnected Send for backplane routing
// - **Retry With Backoff**: Tags reopen their session on connection loss
//   following a configurable backoff schedule
// - **Sync And Async**: Blocking calls with timeouts, or `tokio` futures
//
// ## Layout
//
// ```text
// EipClient ── TagManager ── Tag ──┐
//      │                          ├── SessionManager ── Session ── Transport
//      └── Scheduler (workers) ───┘          │
//                                       ResourceCache
// ```
//
// Low layers (`buffer`, `eip`, `cip`, `tag_path`) are plain codecs with no
// I/O and are usable on their own.
// =========================================================================

pub mod attributes;
pub mod buffer;
pub mod cache;
pub mod cip;
pub mod client;
pub mod config;
pub mod eip;
pub mod endpoint;
pub mod error;
pub mod job;
pub mod request;
pub mod resource;
pub mod session;
pub mod tag;
pub mod tag_manager;
pub mod tag_path;
pub mod transport;
pub mod version;

// Re-export commonly used items
pub use attributes::TagAttributes;
pub use buffer::{ByteBuffer, ByteOrder, SharedBuffer};
pub use cache::ResourceCache;
pub use cip::{CipType, ControllerIdentity};
pub use client::EipClient;
pub use config::{ClientConfig, ConnectionConfig, RetryConfig, SchedulerConfig};
pub use endpoint::Endpoint;
pub use error::{EipError, Result, Status};
pub use job::{JobClass, JobHandle, JobStatus, Scheduler};
pub use resource::{ResourceRegistry, Shared, WeakShared};
pub use session::{Session, SessionManager, SessionPhase};
pub use tag::{Tag, TagPhase};
pub use tag_path::{TagPath, TagSegment};
pub use transport::{Connector, TcpConnector, Transport};
pub use version::VERSION;
