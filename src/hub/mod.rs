//! Network Hub Module
//!
//! The transport layer every other subsystem talks through. A peer runs one
//! hub: it owns the peer's identity, the logical clock, the set of known
//! peers and the dispatch table for inbound messages.
//!
//! ## Core Mechanisms
//! - **Envelope**: every exchange is a typed request/response pair of
//!   `Envelope { msg_type, sender, logical_time, payload_json }`. Standard
//!   response types (`ack`, `decline`, `invalid`, `redundant`, `cant_reach`)
//!   cover the common outcomes; everything else carries a typed JSON payload.
//! - **Dispatch**: inbound messages are routed through a registry mapping
//!   `msg_type -> async handler`. Registration is explicit and happens only
//!   at startup; an unknown type indicates version skew and is answered with
//!   `invalid`.
//! - **Transport**: outbound requests are HTTP POSTs with a bounded number
//!   of attempts and jittered exponential backoff. Transport exhaustion is
//!   an error the caller deals with, never a panic.
//! - **Clock coupling**: the hub merges the logical clock on every received
//!   envelope and every received reply, so all holders of a chunk share a
//!   synchronized coarse ordering.
//! - **Discovery**: peers find each other through a line-delimited peer
//!   file guarded by a lock file, plus explicit seed addresses; newcomers
//!   announce themselves to everyone they found.

pub mod discovery;
pub mod handlers;
pub mod registry;
pub mod service;
pub mod types;
