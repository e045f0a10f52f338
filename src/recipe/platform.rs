//! Target platform matching for `<actions os=".." architecture="..">`.

use std::fmt;

/// Operating system and architecture a binary recipe targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
        }
    }

    /// The platform this process is running on, in recipe vocabulary
    /// (`linux`/`darwin`, `x86_64`/`i386`/`aarch64`).
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let architecture = match std::env::consts::ARCH {
            "x86" => "i386",
            other => other,
        };
        Self::new(os, architecture)
    }

    /// Current platform with optional overrides from configuration.
    pub fn with_overrides(os: Option<&str>, architecture: Option<&str>) -> Self {
        let current = Self::current();
        Self::new(
            os.unwrap_or(&current.os),
            architecture.unwrap_or(&current.architecture),
        )
    }

    /// True if a recipe tagged `os`/`architecture` can run here.
    pub fn matches(&self, os: &str, architecture: &str) -> bool {
        self.os.eq_ignore_ascii_case(os.trim())
            && arch_family(&self.architecture) == arch_family(architecture.trim())
    }
}

fn arch_family(arch: &str) -> String {
    match arch.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" | "x64" => "x86_64".into(),
        "i386" | "i486" | "i586" | "i686" | "x86" => "i386".into(),
        "aarch64" | "arm64" => "aarch64".into(),
        other => other.to_string(),
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_is_case_insensitive_on_os() {
        let linux = Platform::new("linux", "x86_64");
        assert!(linux.matches("Linux", "x86_64"));
        assert!(!linux.matches("darwin", "x86_64"));
    }

    #[test]
    fn test_architecture_aliases() {
        let linux = Platform::new("linux", "x86_64");
        assert!(linux.matches("linux", "amd64"));
        assert!(!linux.matches("linux", "i686"));

        let arm = Platform::new("darwin", "arm64");
        assert!(arm.matches("darwin", "aarch64"));
    }

    #[test]
    fn test_overrides() {
        let p = Platform::with_overrides(Some("darwin"), None);
        assert_eq!(p.os, "darwin");
        assert_eq!(p.architecture, Platform::current().architecture);
    }
}
