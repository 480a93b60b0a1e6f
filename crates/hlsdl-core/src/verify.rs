//! Post-merge integrity verification (§9 Open Question decision): the
//! Segment Pipeline always does `Checksum`-level validation inline via
//! `crate::checksum`; `Content` and `Deep` are opt-in, invoked only from
//! the CLI's `verify` subcommand, never automatically mid-download.

use std::path::Path;
use std::process::Command;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityLevel {
    Basic,
    Checksum,
    Content,
    Deep,
}

impl std::str::FromStr for IntegrityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Self::Basic),
            "checksum" => Ok(Self::Checksum),
            "content" => Ok(Self::Content),
            "deep" => Ok(Self::Deep),
            other => Err(format!("unknown integrity level: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("output file is empty")]
    Empty,

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("muxer could not decode output: {0}")]
    Undecodable(String),

    #[error("no muxer available to perform a {0:?} check")]
    MuxerUnavailable(IntegrityLevel),
}

#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub level: IntegrityLevel,
    pub bytes: u64,
    pub checksum: Option<String>,
}

/// Runs a `Basic`/`Checksum`/`Content`/`Deep` check against `path`
/// (§9's integrity-level decision). `expected_checksum` is compared when
/// present and `level >= Checksum`. `muxer` is required for `Content`/`Deep`.
pub fn verify_output(
    path: &Path,
    level: IntegrityLevel,
    expected_checksum: Option<&str>,
    muxer: Option<&str>,
) -> Result<IntegrityReport, VerifyError> {
    let metadata = std::fs::metadata(path)?;
    if metadata.len() == 0 {
        return Err(VerifyError::Empty);
    }

    let mut checksum = None;
    if level >= IntegrityLevel::Checksum {
        let actual = crate::checksum::sha256_path(path)
            .map_err(|e| VerifyError::Io(std::io::Error::other(e.to_string())))?;
        if let Some(expected) = expected_checksum {
            if expected != actual {
                return Err(VerifyError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        checksum = Some(actual);
    }

    if level >= IntegrityLevel::Content {
        let muxer = muxer.ok_or(VerifyError::MuxerUnavailable(level))?;
        decode_check(muxer, path, level == IntegrityLevel::Deep)?;
    }

    Ok(IntegrityReport {
        level,
        bytes: metadata.len(),
        checksum,
    })
}

/// Decodes the whole file to the null muxer to surface corruption that a
/// checksum can't catch (§9). `deep` additionally requires a parseable
/// `Duration:` line in stderr, a cheap proxy for "has real stream data".
fn decode_check(muxer: &str, path: &Path, deep: bool) -> Result<(), VerifyError> {
    let path_str = path.display().to_string();
    let output = Command::new(muxer)
        .args(["-v", "error", "-i", path_str.as_str(), "-f", "null", "-"])
        .output()
        .map_err(|e| VerifyError::Undecodable(e.to_string()))?;

    if !output.status.success() {
        return Err(VerifyError::Undecodable(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    if deep {
        let probe = Command::new(muxer)
            .args(["-i", path_str.as_str()])
            .output()
            .map_err(|e| VerifyError::Undecodable(e.to_string()))?;
        let stderr = String::from_utf8_lossy(&probe.stderr);
        if !stderr.contains("Duration:") {
            return Err(VerifyError::Undecodable(
                "no Duration found in stream info".to_string(),
            ));
        }
    }

    Ok(())
}

impl PartialOrd for IntegrityLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IntegrityLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(level: &IntegrityLevel) -> u8 {
            match level {
                IntegrityLevel::Basic => 0,
                IntegrityLevel::Checksum => 1,
                IntegrityLevel::Content => 2,
                IntegrityLevel::Deep => 3,
            }
        }
        rank(self).cmp(&rank(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_fails_basic_check() {
        let f = NamedTempFile::new().unwrap();
        let result = verify_output(f.path(), IntegrityLevel::Basic, None, None);
        assert!(matches!(result, Err(VerifyError::Empty)));
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let mut f = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b"hello\n").unwrap();
        let result = verify_output(f.path(), IntegrityLevel::Checksum, Some("deadbeef"), None);
        assert!(matches!(result, Err(VerifyError::ChecksumMismatch { .. })));
    }

    #[test]
    fn checksum_match_reports_digest() {
        let mut f = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b"hello\n").unwrap();
        let expected = crate::checksum::sha256_path(f.path()).unwrap();
        let report =
            verify_output(f.path(), IntegrityLevel::Checksum, Some(&expected), None).unwrap();
        assert_eq!(report.checksum, Some(expected));
    }

    #[test]
    fn content_check_without_muxer_errors() {
        let mut f = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b"hello\n").unwrap();
        let result = verify_output(f.path(), IntegrityLevel::Content, None, None);
        assert!(matches!(result, Err(VerifyError::MuxerUnavailable(_))));
    }

    #[test]
    fn level_ordering_is_basic_lt_deep() {
        assert!(IntegrityLevel::Basic < IntegrityLevel::Deep);
        assert!(IntegrityLevel::Checksum < IntegrityLevel::Content);
    }
}
