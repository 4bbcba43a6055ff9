use std::fmt;
use std::str::FromStr;

use super::error::GuidelinesError;

/// A guideline document's schema version (§9 SUPPLEMENT 2, from
/// `routing_guidelines_version.cc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GuidelineVersion {
    pub major: u32,
    pub minor: u32,
}

impl GuidelineVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for GuidelineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for GuidelineVersion {
    type Err = GuidelinesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || GuidelinesError::InvalidVersion(s.to_string());
        let mut parts = s.splitn(2, '.');
        let major = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let minor = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self { major, minor })
    }
}

/// `available <= supported && supported.major - available.major <= 1`
/// (§9 SUPPLEMENT 2). A document from a too-old or too-new engine is
/// rejected rather than partially honored.
pub fn is_compatible(available: GuidelineVersion, supported: GuidelineVersion) -> bool {
    available <= supported && supported.major.saturating_sub(available.major) <= 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_version_is_compatible() {
        let v = GuidelineVersion::new(1, 0);
        assert!(is_compatible(v, v));
    }

    #[test]
    fn one_major_behind_is_compatible() {
        assert!(is_compatible(GuidelineVersion::new(1, 0), GuidelineVersion::new(2, 0)));
    }

    #[test]
    fn two_majors_behind_is_incompatible() {
        assert!(!is_compatible(GuidelineVersion::new(1, 0), GuidelineVersion::new(3, 0)));
    }

    #[test]
    fn newer_than_supported_is_incompatible() {
        assert!(!is_compatible(GuidelineVersion::new(2, 0), GuidelineVersion::new(1, 0)));
    }

    #[test]
    fn parses_dotted_pair() {
        assert_eq!("1.2".parse::<GuidelineVersion>().unwrap(), GuidelineVersion::new(1, 2));
        assert!("1.2.3".parse::<GuidelineVersion>().is_err());
        assert!("1".parse::<GuidelineVersion>().is_err());
    }
}
