// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Control port allocation

use std::collections::HashSet;
use std::net::TcpListener;

use tracing::trace;

use crate::errors::{AgentflowError, AgentflowResult};
use crate::pipeline::PortRange;

/// Hands out control ports from a configured range
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    range: PortRange,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self { range }
    }

    /// First port that is neither reserved nor bound by someone else
    pub fn allocate(&self, agent: &str, reserved: &HashSet<u16>) -> AgentflowResult<u16> {
        if self.range.start == 0 {
            return Self::ephemeral().ok_or_else(|| self.unavailable(agent));
        }

        for port in self.range.start..self.range.end {
            if reserved.contains(&port) {
                trace!(port, "port reserved by a live agent");
                continue;
            }
            if Self::is_free(port) {
                return Ok(port);
            }
        }

        Err(self.unavailable(agent))
    }

    /// Whether a port can be bound on the loopback interface
    pub fn is_free(port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).is_ok()
    }

    fn ephemeral() -> Option<u16> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).ok()?;
        listener.local_addr().ok().map(|addr| addr.port())
    }

    fn unavailable(&self, agent: &str) -> AgentflowError {
        AgentflowError::PortUnavailable {
            agent: agent.to_string(),
            start: self.range.start,
            end: self.range.end,
        }
    }
}
