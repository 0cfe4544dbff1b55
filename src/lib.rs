//! Palisade, a forward HTTP/1.1 caching proxy.
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                  PALISADE                    │
//!                        │                                              │
//!   Client ──────────────┼─▶ acceptor ──▶ handler ──▶ forwarder ────────┼──▶ Origin
//!                        │      │            │            │             │
//!                        │      │            ▼            ▼             │
//!                        │      │      ┌──────────┐  ┌─────────┐        │
//!                        │      │      │  cache   │  │ tunnel  │        │
//!                        │      │      │ (store)  │  │(CONNECT)│        │
//!                        │      │      └──────────┘  └─────────┘        │
//!                        │      ▼                                       │
//!                        │  event log (one line per request event)      │
//!                        └──────────────────────────────────────────────┘
//! ```
//!
//! Each accepted connection is handled top to bottom by one spawned task:
//! parse the request, dispatch on method (GET with cache lookup, POST
//! forwarded verbatim, CONNECT tunneled), relay the origin's bytes back,
//! and record every step in the serialized event log.

// Core subsystems
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod proxy;
pub mod telemetry;
