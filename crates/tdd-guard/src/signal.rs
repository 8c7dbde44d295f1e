//! Test-run signal: the most recent test output and how many failures it reports.
//!
//! The failure count is a sum of independent marker counts. Each marker kind
//! (`FAIL`, `failed`, `failing`, and the cross glyphs runners print next to a
//! failing case) is counted separately, case-insensitively, and the counts are
//! added. A single failing test that is reported with two markers (say
//! `FAIL` plus `✕`) therefore counts twice. This is a known approximation
//! kept for compatibility with existing guard setups; it is not a count of
//! failing tests.

use std::io;
use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use regex_lite::Regex;
use thiserror::Error;

/// Default freshness window for the test-output artifact.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

static FAILURE_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)\bFAIL\b", r"(?i)\bfailed\b", r"(?i)\bfailing\b", r"[✗✕×]"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// Errors reading the test signal. All of them block the edit.
#[derive(Debug, Error)]
pub enum SignalError {
    /// No test output has been recorded yet.
    #[error("Run tests first")]
    Unavailable,
    /// The recorded test output is older than the freshness window.
    #[error("Re-run tests")]
    Stale {
        /// How old the artifact was when read.
        age: Duration,
        /// The configured freshness window.
        max_age: Duration,
    },
    /// The artifact exists but could not be read.
    #[error("Cannot read test output {path}: {source}")]
    Io {
        /// Path of the artifact.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// The parsed state of the most recent test run.
#[derive(Debug, Clone)]
pub struct TestSignal {
    /// Full text of the test output.
    pub output: String,
    /// Sum of failure-marker occurrences in `output`.
    pub failing_count: usize,
    /// Wall-clock age of the artifact at read time.
    pub age: Duration,
}

/// Count failure markers in test output.
///
/// See the module docs for why this may exceed the number of failing tests.
pub fn count_failures(output: &str) -> usize {
    FAILURE_MARKERS
        .iter()
        .map(|re| re.find_iter(output).count())
        .sum()
}

/// Returns true if an artifact of the given age is past the freshness window.
///
/// An age exactly equal to `max_age` is still fresh.
pub fn is_stale(age: Duration, max_age: Duration) -> bool {
    age > max_age
}

/// Read the test-output artifact and derive a [`TestSignal`].
pub async fn read_signal(path: &Path, max_age: Duration) -> Result<TestSignal, SignalError> {
    read_signal_at(path, max_age, SystemTime::now()).await
}

/// Like [`read_signal`], measuring the artifact's age against `now`.
pub async fn read_signal_at(
    path: &Path,
    max_age: Duration,
    now: SystemTime,
) -> Result<TestSignal, SignalError> {
    let io_err = |source: io::Error| SignalError::Io {
        path: path.display().to_string(),
        source,
    };

    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(SignalError::Unavailable),
        Err(e) => return Err(io_err(e)),
    };

    // An mtime in the future reads as age zero.
    let modified = metadata.modified().map_err(io_err)?;
    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
    if is_stale(age, max_age) {
        tracing::debug!(path = %path.display(), ?age, ?max_age, "test output is stale");
        return Err(SignalError::Stale { age, max_age });
    }

    // Runners and console code pages do not always emit UTF-8.
    let output = match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(SignalError::Unavailable),
        Err(e) => return Err(io_err(e)),
    };
    let failing_count = count_failures(&output);

    Ok(TestSignal {
        output,
        failing_count,
        age,
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_count_passing_output() {
        assert_eq!(count_failures("PASS all"), 0);
        assert_eq!(count_failures(""), 0);
        assert_eq!(count_failures("Tests: 12 passed, 12 total"), 0);
    }

    #[test]
    fn test_count_each_fail_line() {
        assert_eq!(count_failures("FAIL one\nFAIL two"), 2);
        assert_eq!(count_failures("FAIL src/a.test.ts"), 1);
    }

    #[test]
    fn test_count_is_case_insensitive() {
        assert_eq!(count_failures("fail: x"), 1);
        assert_eq!(count_failures("1 FAILED"), 1);
        assert_eq!(count_failures("Failing: 1"), 1);
    }

    #[test]
    fn test_count_sums_marker_kinds() {
        // One failing test, reported with a header and a glyph, counts twice.
        let output = "FAIL src/a.test.ts\n  ✕ adds numbers (3 ms)\n";
        assert_eq!(count_failures(output), 2);

        let vitest = " × sums\nTest Files  1 failed (1)\n";
        assert_eq!(count_failures(vitest), 2);
    }

    #[test]
    fn test_count_ignores_embedded_words() {
        assert_eq!(count_failures("failover handled"), 0);
        assert_eq!(count_failures("no failures"), 0);
    }

    #[test]
    fn test_staleness_boundary() {
        let max = Duration::from_secs(300);
        assert!(!is_stale(Duration::from_secs(300), max));
        assert!(is_stale(Duration::from_secs(300) + Duration::from_nanos(1), max));
        assert!(!is_stale(Duration::ZERO, max));
    }

    #[tokio::test]
    async fn test_missing_artifact_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = read_signal(&dir.path().join("test-output.txt"), DEFAULT_MAX_AGE)
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::Unavailable));
        assert_eq!(err.to_string(), "Run tests first");
    }

    #[tokio::test]
    async fn test_fresh_artifact_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test-output.txt");
        fs::write(&path, "FAIL only one").unwrap();

        let signal = read_signal(&path, DEFAULT_MAX_AGE).await.unwrap();
        assert_eq!(signal.failing_count, 1);
        assert_eq!(signal.output, "FAIL only one");
    }

    #[tokio::test]
    async fn test_non_utf8_output_is_read_lossily() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test-output.txt");
        fs::write(&path, b"PASS all \xff\xfe done\n").unwrap();

        let signal = read_signal(&path, DEFAULT_MAX_AGE).await.unwrap();
        assert_eq!(signal.failing_count, 0);
        assert!(signal.output.starts_with("PASS all "));

        fs::write(&path, b"FAIL \xff src/a.test.ts").unwrap();
        let signal = read_signal(&path, DEFAULT_MAX_AGE).await.unwrap();
        assert_eq!(signal.failing_count, 1);
    }

    #[tokio::test]
    async fn test_age_equal_to_window_is_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test-output.txt");
        fs::write(&path, "PASS").unwrap();
        let modified = fs::metadata(&path).unwrap().modified().unwrap();

        let now = modified + Duration::from_secs(60);
        let signal = read_signal_at(&path, Duration::from_secs(60), now)
            .await
            .unwrap();
        assert_eq!(signal.age, Duration::from_secs(60));
        assert_eq!(signal.failing_count, 0);
    }

    #[tokio::test]
    async fn test_age_past_window_is_stale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test-output.txt");
        fs::write(&path, "PASS").unwrap();
        let modified = fs::metadata(&path).unwrap().modified().unwrap();

        let now = modified + Duration::from_secs(60) + Duration::from_millis(1);
        let err = read_signal_at(&path, Duration::from_secs(60), now)
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::Stale { .. }));
        assert_eq!(err.to_string(), "Re-run tests");
    }

    #[tokio::test]
    async fn test_future_mtime_is_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test-output.txt");
        fs::write(&path, "PASS").unwrap();
        let modified = fs::metadata(&path).unwrap().modified().unwrap();

        let now = modified - Duration::from_secs(5);
        let signal = read_signal_at(&path, Duration::ZERO, now).await.unwrap();
        assert_eq!(signal.age, Duration::ZERO);
    }
}
