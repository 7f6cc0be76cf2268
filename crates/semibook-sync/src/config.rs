//! Semibook and router configuration

use semibook_types::{Address, SemibookError, SemibookResult};
use serde::{Deserialize, Serialize};

/// Per-semibook options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemibookOptions {
    /// Maximum number of offers kept in the cached prefix
    pub max_offers: usize,
    /// Page size used when fetching the snapshot
    pub chunk_size: usize,
    /// Number of per-block checkpoints kept for reorg recovery
    pub max_retained_blocks: usize,
}

impl Default for SemibookOptions {
    fn default() -> Self {
        Self {
            max_offers: 50,
            chunk_size: 50,
            max_retained_blocks: 50,
        }
    }
}

impl SemibookOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cached prefix bound
    pub fn with_max_offers(mut self, max_offers: usize) -> Self {
        self.max_offers = max_offers;
        self
    }

    /// Set the snapshot page size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set how many blocks can be rolled back without a refetch
    pub fn with_max_retained_blocks(mut self, blocks: usize) -> Self {
        self.max_retained_blocks = blocks;
        self
    }

    /// Check the options are usable
    pub fn validate(&self) -> SemibookResult<()> {
        if self.max_offers == 0 {
            return Err(SemibookError::Configuration(
                "max_offers must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(SemibookError::Configuration(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Event router configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Contract whose logs are routed
    pub address: Address,
    /// Initialization attempts before registration gives up
    #[serde(default = "default_registration_attempts")]
    pub max_registration_attempts: u32,
}

fn default_registration_attempts() -> u32 {
    5
}

impl RouterConfig {
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            max_registration_attempts: default_registration_attempts(),
        }
    }

    /// Set the registration retry bound
    pub fn with_max_registration_attempts(mut self, attempts: u32) -> Self {
        self.max_registration_attempts = attempts;
        self
    }

    pub fn validate(&self) -> SemibookResult<()> {
        if self.max_registration_attempts == 0 {
            return Err(SemibookError::Configuration(
                "max_registration_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
