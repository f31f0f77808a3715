//! Worker roles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of capability a task is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Splits tasks into subtasks and aggregates their results
    Delegator,
    /// Accepts or rejects candidate results
    Verifier,
    /// Produces results for leaf tasks
    #[default]
    #[serde(alias = "swe_agent")]
    Worker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Delegator => "delegator",
            Role::Verifier => "verifier",
            Role::Worker => "worker",
        }
    }

    pub fn all() -> &'static [Role] {
        &[Role::Delegator, Role::Verifier, Role::Worker]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delegator" => Ok(Role::Delegator),
            "verifier" => Ok(Role::Verifier),
            "worker" | "swe_agent" => Ok(Role::Worker),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}
