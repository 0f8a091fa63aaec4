use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Ethereum,
    Base,
}

impl ChainType {
    /// Every chain a user receives a deposit address on.
    pub const ALL: [ChainType; 2] = [ChainType::Ethereum, ChainType::Base];

    pub fn to_db_string(&self) -> &'static str {
        match self {
            ChainType::Ethereum => "ethereum",
            ChainType::Base => "base",
        }
    }

    pub fn from_db_string(s: &str) -> Option<ChainType> {
        match s {
            "ethereum" => Some(ChainType::Ethereum),
            "base" => Some(ChainType::Base),
            _ => None,
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

impl std::str::FromStr for ChainType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainType::from_db_string(&s.to_lowercase()).ok_or_else(|| format!("unknown chain: {s}"))
    }
}
