//! Host system detection

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operating system family of the build host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Windows,
    Linux,
    MacOs,
    FreeBsd,
    Solaris,
    Other,
}

impl OsFamily {
    pub fn current() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    fn from_os_name(name: &str) -> Self {
        match name {
            "windows" => Self::Windows,
            "linux" | "android" => Self::Linux,
            "macos" | "ios" => Self::MacOs,
            "freebsd" => Self::FreeBsd,
            "solaris" | "illumos" => Self::Solaris,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::MacOs => "macos",
            Self::FreeBsd => "freebsd",
            Self::Solaris => "sunos",
            Self::Other => "other",
        }
    }

    pub fn is_unix(&self) -> bool {
        !matches!(self, Self::Windows)
    }

    pub fn is_file_system_case_sensitive(&self) -> bool {
        self.is_unix() && !matches!(self, Self::MacOs)
    }
}

/// CPU architecture of the build host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
}

impl Arch {
    pub fn current() -> Self {
        Self::from_arch_name(std::env::consts::ARCH)
    }

    fn from_arch_name(name: &str) -> Self {
        if name.starts_with("aarch64") || name.starts_with("arm") {
            Self::Arm64
        } else {
            Self::X64
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
        }
    }
}

/// Description of the machine running the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostInfo {
    pub os: OsFamily,
    pub arch: Arch,
}

impl HostInfo {
    pub fn detect() -> Self {
        Self {
            os: OsFamily::current(),
            arch: Arch::current(),
        }
    }

    /// e.g. "linux-x64"
    pub fn family_arch(&self) -> String {
        format!("{}-{}", self.os.as_str(), self.arch.as_str())
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.family_arch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_family_from_name() {
        assert_eq!(OsFamily::from_os_name("linux"), OsFamily::Linux);
        assert_eq!(OsFamily::from_os_name("macos"), OsFamily::MacOs);
        assert_eq!(OsFamily::from_os_name("windows"), OsFamily::Windows);
        assert_eq!(OsFamily::from_os_name("haiku"), OsFamily::Other);
    }

    #[test]
    fn test_case_sensitivity() {
        assert!(OsFamily::Linux.is_file_system_case_sensitive());
        assert!(!OsFamily::MacOs.is_file_system_case_sensitive());
        assert!(!OsFamily::Windows.is_file_system_case_sensitive());
    }

    #[test]
    fn test_arch_from_name() {
        assert_eq!(Arch::from_arch_name("aarch64"), Arch::Arm64);
        assert_eq!(Arch::from_arch_name("x86_64"), Arch::X64);
    }

    #[test]
    fn test_family_arch() {
        let host = HostInfo {
            os: OsFamily::Linux,
            arch: Arch::Arm64,
        };
        assert_eq!(host.family_arch(), "linux-arm64");
    }
}
