//! Supported sandbox operating systems.

use crate::error::CoreError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Closed set of OS images a sandbox can be created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OsKind {
    /// Ubuntu 22.04 with tmate preinstalled.
    #[default]
    Ubuntu,
    /// Debian 12 with tmate preinstalled.
    Debian,
}

impl OsKind {
    /// Every supported OS.
    pub const ALL: [OsKind; 2] = [OsKind::Ubuntu, OsKind::Debian];

    /// Container image reference.
    pub fn image_ref(self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu-22.04-with-tmate",
            Self::Debian => "debian-with-tmate",
        }
    }

    /// Label stored on the record and shown to users.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Ubuntu => "Ubuntu 22.04",
            Self::Debian => "Debian 12",
        }
    }

    /// Short tag accepted by [`FromStr`].
    pub fn tag(self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
        }
    }
}

impl FromStr for OsKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|os| os.tag() == tag)
            .ok_or_else(|| CoreError::UnknownOs(s.to_string()))
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
