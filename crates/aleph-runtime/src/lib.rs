// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Interface to the wrapped conversational-agent runtime.
//!
//! The runtime itself is an opaque subprocess; this crate only knows its
//! typed event stream (text deltas, tool-use boundaries, turn end) and the
//! few control messages the harness writes back (user turns, hook
//! responses, interrupts).  Everything else — token streaming internals,
//! tool schemas — is the runtime's own business.

mod client;
mod events;
mod mock;
mod subprocess;

pub use client::{EventStream, RuntimeClient, RuntimeError};
pub use events::RuntimeEvent;
pub use mock::ScriptedRuntime;
pub use subprocess::SubprocessClient;
