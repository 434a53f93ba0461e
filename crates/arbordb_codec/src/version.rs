//! Wire-stable format versions.
//!
//! Every versioned stream (tree candidates, snapshots) starts with a
//! two-byte big-endian version code. Codes are never renumbered; a new
//! format revision always gets a new, larger code.

use crate::error::{CodecResult, VersionError};
use std::fmt;
use std::io::{Read, Write};

/// Identifies the format revision of a persisted stream.
///
/// Variants are declared in ascending code order, so the derived ordering
/// matches the numeric ordering of the codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum VersionTag {
    /// Sentinel below every supported version. Never produced by [`VersionTag::parse`].
    TestPast = 0,
    /// Oldest supported format: qualified names written literally.
    SodiumSr1 = 7,
    /// Introduces per-stream qualified name interning.
    Magnesium = 8,
    /// Same stream layout as Magnesium, adds snapshot metadata framing.
    ChlorineSr2 = 9,
    /// Current format.
    Potassium = 10,
    /// Sentinel above every supported version. Never produced by [`VersionTag::parse`].
    TestFuture = 65535,
}

impl VersionTag {
    /// The oldest version this build can still read.
    pub const OLDEST_SUPPORTED: Self = Self::SodiumSr1;

    /// Returns the newest production version.
    #[must_use]
    pub const fn current() -> Self {
        Self::Potassium
    }

    /// Resolves a wire code into a supported version.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::PastVersion`] for codes older than
    /// [`Self::OLDEST_SUPPORTED`] and [`VersionError::FutureVersion`] for codes
    /// newer than [`Self::current`]. The test sentinels resolve to errors too.
    pub const fn parse(code: u16) -> Result<Self, VersionError> {
        match code {
            7 => Ok(Self::SodiumSr1),
            8 => Ok(Self::Magnesium),
            9 => Ok(Self::ChlorineSr2),
            10 => Ok(Self::Potassium),
            0..=6 => Err(VersionError::PastVersion {
                attempted: code,
                closest: Self::OLDEST_SUPPORTED,
            }),
            _ => Err(VersionError::FutureVersion {
                attempted: code,
                closest: Self::current(),
            }),
        }
    }

    /// Returns the wire code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Returns the two-byte big-endian encoding.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 2] {
        self.code().to_be_bytes()
    }

    /// Whether qualified names are interned within a stream of this version.
    #[must_use]
    pub fn interns_names(self) -> bool {
        self >= Self::Magnesium
    }

    /// Writes the two-byte header.
    pub fn write_to<W: Write + ?Sized>(self, out: &mut W) -> CodecResult<()> {
        out.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Reads and resolves a two-byte header.
    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self> {
        let mut buf = [0u8; 2];
        input.read_exact(&mut buf)?;
        Ok(Self::parse(u16::from_be_bytes(buf))?)
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TestPast => "TEST_PAST",
            Self::SodiumSr1 => "SODIUM_SR1",
            Self::Magnesium => "MAGNESIUM",
            Self::ChlorineSr2 => "CHLORINE_SR2",
            Self::Potassium => "POTASSIUM",
            Self::TestFuture => "TEST_FUTURE",
        };
        write!(f, "{name}({})", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;

    #[test]
    fn parse_zero_is_past_version() {
        assert_eq!(
            VersionTag::parse(0),
            Err(VersionError::PastVersion {
                attempted: 0,
                closest: VersionTag::SodiumSr1,
            })
        );
    }

    #[test]
    fn parse_max_is_future_version() {
        let err = VersionTag::parse(u16::MAX).unwrap_err();
        assert_eq!(err.attempted(), 65535);
        assert_eq!(err.closest(), VersionTag::current());
        assert!(matches!(err, VersionError::FutureVersion { .. }));
    }

    #[test]
    fn codes_just_outside_the_supported_window() {
        assert!(matches!(
            VersionTag::parse(6),
            Err(VersionError::PastVersion { .. })
        ));
        assert!(matches!(
            VersionTag::parse(11),
            Err(VersionError::FutureVersion { .. })
        ));
    }

    #[test]
    fn known_codes_resolve() {
        for tag in [
            VersionTag::SodiumSr1,
            VersionTag::Magnesium,
            VersionTag::ChlorineSr2,
            VersionTag::Potassium,
        ] {
            assert_eq!(VersionTag::parse(tag.code()), Ok(tag));
        }
    }

    #[test]
    fn current_roundtrips_through_header() {
        let mut buf = Vec::new();
        VersionTag::current().write_to(&mut buf).unwrap();
        assert_eq!(buf, vec![0x00, 0x0A]);

        let decoded = VersionTag::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, VersionTag::current());
    }

    #[test]
    fn ordering_follows_codes() {
        assert!(VersionTag::TestPast < VersionTag::SodiumSr1);
        assert!(VersionTag::Magnesium < VersionTag::Potassium);
        assert!(VersionTag::Potassium < VersionTag::TestFuture);
        assert!(!VersionTag::SodiumSr1.interns_names());
        assert!(VersionTag::ChlorineSr2.interns_names());
    }

    #[test]
    fn truncated_header_is_eof() {
        let result = VersionTag::read_from(&mut [0x00u8].as_slice());
        assert!(matches!(result, Err(CodecError::UnexpectedEof)));
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(VersionTag::Magnesium.to_string(), "MAGNESIUM(8)");
    }
}
