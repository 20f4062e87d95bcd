//! Ironwire session runtime.
//!
//! A client endpoint for the ironwire secure transport: key exchange
//! over a raw TCP stream, encrypted/signed frames, chunked payload
//! transfer, and concurrent dispatch of decoded events to named
//! handlers while the receive loop keeps reading.
//!
//! # Failure Semantics
//!
//! - Any short read or framing violation is a fatal [`ConnectionError`]:
//!   the receive loop stops, the `disconnect` event fires exactly once,
//!   and the stream is released. No retries, no partial frames.
//! - A signature mismatch is NOT fatal: it is logged and the event is
//!   still dispatched. This mirrors the protocol's reference behavior
//!   and is a documented weakness, not a design goal.
//! - In-flight handlers are never cancelled by a disconnect; they run
//!   to completion and are joined when the loop winds down.

#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod bootstrap;
pub mod chunk;
pub mod error;
pub mod handshake;
pub mod keys;
pub mod router;
pub mod session;

pub use bootstrap::{BootstrapError, Certificate, CertificateBootstrap, CertificateRequest};
pub use chunk::SpooledPayload;
pub use error::ConnectionError;
pub use keys::{Identity, KeyStore};
pub use router::{DeliveryMode, EventData, EventRouter};
pub use session::{Session, SessionConfig};
