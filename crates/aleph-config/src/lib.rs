// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod home;
mod loader;
mod schema;

pub use home::{
    AlephHome, ALEPH_AGENT_ID_ENV, ALEPH_HOME_ENV, RUNTIME_MEMORY_DISABLE_ENV,
    TOOL_DESCRIPTIONS_MARKER,
};
pub use loader::load;
pub use schema::{
    AgentConfig, BoardConfig, Config, MailConfig, PermissionMode, PruneConfig, RuntimeConfig,
};
