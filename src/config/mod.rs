//! Replica set configuration: parsing and validation.
//!
//! A configuration document is parsed from its wire form, validated once,
//! and immutable afterwards. Members reference each other by config index;
//! config replacement rebuilds indices by member-id matching.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::{HostAndPort, Millis};

const MAX_MEMBERS: usize = 50;
const MAX_PRIORITY: f64 = 1000.0;
const MAX_SLAVE_DELAY_SECS: u64 = 3600 * 24 * 366;

fn default_priority() -> f64 {
    1.0
}

fn default_votes() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

/// Per-member declarative attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberConfig {
    #[serde(rename = "_id")]
    pub id: i32,
    pub host: HostAndPort,
    #[serde(default = "default_priority")]
    pub priority: f64,
    #[serde(default = "default_votes")]
    pub votes: i32,
    #[serde(default)]
    pub hidden: bool,
    #[serde(rename = "arbiterOnly", default)]
    pub arbiter_only: bool,
    #[serde(rename = "buildIndexes", default = "default_true")]
    pub build_indexes: bool,
    #[serde(rename = "slaveDelay", default)]
    pub slave_delay_secs: u64,
}

impl MemberConfig {
    /// Whether this member may ever stand for election.
    pub fn is_electable(&self) -> bool {
        !self.arbiter_only && self.priority > 0.0
    }

    pub fn is_voter(&self) -> bool {
        self.votes > 0
    }
}

/// The `settings` sub-document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplSettings {
    #[serde(rename = "chainingAllowed")]
    pub chaining_allowed: bool,
    #[serde(rename = "heartbeatTimeoutSecs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(rename = "electionTimeoutMillis")]
    pub election_timeout_millis: u64,
}

impl Default for ReplSettings {
    fn default() -> Self {
        Self {
            chaining_allowed: true,
            heartbeat_timeout_secs: 5,
            election_timeout_millis: 10_000,
        }
    }
}

/// A validated replica set membership document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    #[serde(rename = "_id")]
    pub set_name: String,
    pub version: i64,
    pub members: Vec<MemberConfig>,
    #[serde(default)]
    pub settings: ReplSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("replica set config parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("replica set name cannot be empty")]
    EmptySetName,
    #[error("replica set config version {version} is invalid; must be >= 1")]
    BadVersion { version: i64 },
    #[error("replica set must have between 1 and {MAX_MEMBERS} members, got {count}")]
    MemberCount { count: usize },
    #[error("duplicate member id {id}")]
    DuplicateMemberId { id: i32 },
    #[error("duplicate member host {host}")]
    DuplicateHost { host: HostAndPort },
    #[error("member {id} has invalid priority {priority}; must be in [0, {MAX_PRIORITY}]")]
    BadPriority { id: i32, priority: f64 },
    #[error("member {id} has invalid votes {votes}; must be 0 or 1")]
    BadVotes { id: i32, votes: i32 },
    #[error("replica set must have at least one voting member")]
    NoVoters,
    #[error("member {id} may not disable buildIndexes unless its priority is 0")]
    BuildIndexesRequiresZeroPriority { id: i32 },
    #[error("member {id} may not have a slave delay unless its priority is 0")]
    SlaveDelayRequiresZeroPriority { id: i32 },
    #[error("member {id} has invalid slave delay {delay}s")]
    BadSlaveDelay { id: i32, delay: u64 },
    #[error("arbiter member {id} may not be {attribute}")]
    ArbiterConstraint { id: i32, attribute: &'static str },
}

impl ReplicaSetConfig {
    /// Parse a configuration document and validate it in one step.
    pub fn from_doc(doc: &Value) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_value(doc.clone())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.set_name.trim().is_empty() {
            return Err(ConfigError::EmptySetName);
        }
        if self.version < 1 {
            return Err(ConfigError::BadVersion {
                version: self.version,
            });
        }
        if self.members.is_empty() || self.members.len() > MAX_MEMBERS {
            return Err(ConfigError::MemberCount {
                count: self.members.len(),
            });
        }

        let mut ids = BTreeSet::new();
        let mut hosts = BTreeSet::new();
        for member in &self.members {
            if !ids.insert(member.id) {
                return Err(ConfigError::DuplicateMemberId { id: member.id });
            }
            if !hosts.insert(member.host.clone()) {
                return Err(ConfigError::DuplicateHost {
                    host: member.host.clone(),
                });
            }
            if !member.priority.is_finite()
                || member.priority < 0.0
                || member.priority > MAX_PRIORITY
            {
                return Err(ConfigError::BadPriority {
                    id: member.id,
                    priority: member.priority,
                });
            }
            if member.votes != 0 && member.votes != 1 {
                return Err(ConfigError::BadVotes {
                    id: member.id,
                    votes: member.votes,
                });
            }
            if !member.build_indexes && member.priority > 0.0 {
                return Err(ConfigError::BuildIndexesRequiresZeroPriority { id: member.id });
            }
            if member.slave_delay_secs > MAX_SLAVE_DELAY_SECS {
                return Err(ConfigError::BadSlaveDelay {
                    id: member.id,
                    delay: member.slave_delay_secs,
                });
            }
            if member.slave_delay_secs > 0 && member.priority > 0.0 {
                return Err(ConfigError::SlaveDelayRequiresZeroPriority { id: member.id });
            }
            if member.arbiter_only {
                if member.hidden {
                    return Err(ConfigError::ArbiterConstraint {
                        id: member.id,
                        attribute: "hidden",
                    });
                }
                if member.slave_delay_secs > 0 {
                    return Err(ConfigError::ArbiterConstraint {
                        id: member.id,
                        attribute: "slave delayed",
                    });
                }
                if !member.build_indexes {
                    return Err(ConfigError::ArbiterConstraint {
                        id: member.id,
                        attribute: "exempt from building indexes",
                    });
                }
            }
        }

        if !self.members.iter().any(|m| m.is_voter()) {
            return Err(ConfigError::NoVoters);
        }
        Ok(())
    }

    pub fn member_at(&self, index: usize) -> &MemberConfig {
        &self.members[index]
    }

    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    pub fn find_member_index(&self, host: &HostAndPort) -> Option<usize> {
        self.members.iter().position(|m| &m.host == host)
    }

    pub fn find_member_index_by_id(&self, id: i32) -> Option<usize> {
        self.members.iter().position(|m| m.id == id)
    }

    pub fn find_member_by_id(&self, id: i32) -> Option<&MemberConfig> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn total_votes(&self) -> i32 {
        self.members.iter().map(|m| m.votes).sum()
    }

    pub fn heartbeat_timeout(&self) -> Millis {
        Millis::from_secs(self.settings.heartbeat_timeout_secs)
    }
}
