use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ProcessError;

/// How a process treats existing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Read tiles that exist, compute and write the others.
    #[default]
    Continue,
    /// Always compute and write.
    Overwrite,
    /// Only read. Output metadata is verified but never established.
    Readonly,
    /// Compute without writing.
    Memory,
}

impl RunMode {
    pub fn writes(&self) -> bool {
        matches!(self, Self::Continue | Self::Overwrite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Overwrite => "overwrite",
            Self::Readonly => "readonly",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "overwrite" => Ok(Self::Overwrite),
            "readonly" => Ok(Self::Readonly),
            "memory" => Ok(Self::Memory),
            other => Err(ProcessError::config(format!("unknown run mode '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for mode in [RunMode::Continue, RunMode::Overwrite, RunMode::Readonly, RunMode::Memory] {
            assert_eq!(mode.to_string().parse::<RunMode>().unwrap(), mode);
        }
        assert_eq!("OVERWRITE".parse::<RunMode>().unwrap(), RunMode::Overwrite);
        assert!("append".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_writes() {
        assert!(RunMode::Continue.writes());
        assert!(RunMode::Overwrite.writes());
        assert!(!RunMode::Readonly.writes());
        assert!(!RunMode::Memory.writes());
    }
}
