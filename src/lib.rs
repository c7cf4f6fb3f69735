//! Connection-lifecycle core for a gRPC-over-HTTP/2 transport.
//!
//! This crate owns the parts of a gRPC transport that are worth
//! reimplementing from scratch: the client and server per-connection state
//! machines (readiness, keep-alive policing, idle/age/grace timers, the
//! two-phase `GOAWAY` shutdown dance), the per-stream framing/admission
//! handler, and the name-resolver contract that feeds a client its
//! endpoints. The HTTP/2 frame codec and stream multiplexer, TLS engine,
//! message (de)serialization, and RPC dispatch are treated as external
//! collaborators; see [`transport`] for the traits this crate expects them
//! to implement.
#![recursion_limit = "256"]

pub mod client;
pub mod error;
pub mod metadata;
pub mod resolver;
pub mod server;
pub mod status;
pub mod stream;
pub mod timers;
pub mod transport;
pub mod types;

pub use error::{Error, RpcError};
pub use resolver::{NameResolutionResult, NameResolver, ResolverDriver, ResolverIterator, UpdateMode};
pub use status::{Code, Status};
pub use types::{CloseReason, ConnectionEvent, Endpoint, SocketAddress};
