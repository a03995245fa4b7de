//! Operating system families a collector can target.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Android,
    MacOs,
    Windows,
    FreeBsd,
    OpenBsd,
    NetBsd,
    SunOs,
}

impl Platform {
    pub const ALL: [Platform; 8] = [
        Platform::Linux,
        Platform::Android,
        Platform::MacOs,
        Platform::Windows,
        Platform::FreeBsd,
        Platform::OpenBsd,
        Platform::NetBsd,
        Platform::SunOs,
    ];

    /// Platform the binary was built for. Unknown targets map to `Linux`.
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "freebsd") {
            Platform::FreeBsd
        } else if cfg!(target_os = "openbsd") {
            Platform::OpenBsd
        } else if cfg!(target_os = "netbsd") {
            Platform::NetBsd
        } else if cfg!(any(target_os = "solaris", target_os = "illumos")) {
            Platform::SunOs
        } else {
            Platform::Linux
        }
    }

    /// Node-style platform name (`linux`, `darwin`, `win32`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Android => "android",
            Platform::MacOs => "darwin",
            Platform::Windows => "win32",
            Platform::FreeBsd => "freebsd",
            Platform::OpenBsd => "openbsd",
            Platform::NetBsd => "netbsd",
            Platform::SunOs => "sunos",
        }
    }

    /// Whether a `/proc` tree with Linux layout is the native counter source.
    pub fn has_procfs(self) -> bool {
        matches!(self, Platform::Linux | Platform::Android)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognized platform names.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownPlatform(pub String);

impl fmt::Display for UnknownPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown platform '{}'", self.0)
    }
}

impl std::error::Error for UnknownPlatform {}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "android" => Ok(Platform::Android),
            "darwin" | "macos" | "osx" => Ok(Platform::MacOs),
            "win32" | "windows" => Ok(Platform::Windows),
            "freebsd" => Ok(Platform::FreeBsd),
            "openbsd" => Ok(Platform::OpenBsd),
            "netbsd" => Ok(Platform::NetBsd),
            "sunos" | "solaris" | "illumos" => Ok(Platform::SunOs),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}
