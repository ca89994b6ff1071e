use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::shared::constants::{RECORDING_EXTENSION, RECORDING_PREFIX};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
const SEQUENCE_MODULUS: u32 = 10_000;

/// Hands out unique artifact names: `recording_YYYYMMDD_HHMMSS_mmm_SSSS.mjpeg`.
///
/// UTC timestamp first, then a process-wide sequence number, so lexical and
/// chronological order coincide and two sessions opening in the same
/// millisecond still get distinct names.
#[derive(Debug, Default)]
pub struct RecordingNamer {
    seq: AtomicU32,
}

impl RecordingNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_name(&self, created_at: DateTime<Utc>) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) % SEQUENCE_MODULUS;
        format!(
            "{RECORDING_PREFIX}{}_{seq:04}.{RECORDING_EXTENSION}",
            created_at.format(TIMESTAMP_FORMAT)
        )
    }
}

/// Recovers the creation time embedded in a generated name.
///
/// Returns `None` for names this namer did not produce (e.g. files copied
/// into the directory by hand).
pub fn parse_created_at(filename: &str) -> Option<DateTime<Utc>> {
    let stem = filename
        .strip_prefix(RECORDING_PREFIX)?
        .strip_suffix(RECORDING_EXTENSION)?
        .strip_suffix('.')?;
    // "YYYYMMDD_HHMMSS_mmm" is 19 chars, followed by "_SSSS".
    if stem.len() <= 19 || !stem.is_char_boundary(19) {
        return None;
    }
    let (timestamp, seq) = stem.split_at(19);
    if seq.len() != 5 || !seq.starts_with('_') || !seq[1..].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Whether `filename` is a plain artifact name inside the storage area.
pub fn is_artifact_name(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains(['/', '\\'])
        && filename
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| !stem.is_empty() && ext == RECORDING_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use rstest::rstest;

    fn at(ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 14, 22, 33)
            .unwrap()
            .with_nanosecond(ms * 1_000_000)
            .unwrap()
    }

    #[test]
    fn test_name_format() {
        let namer = RecordingNamer::new();
        assert_eq!(
            namer.next_name(at(7)),
            "recording_20261018_142233_007_0000.mjpeg"
        );
        assert_eq!(
            namer.next_name(at(7)),
            "recording_20261018_142233_007_0001.mjpeg"
        );
    }

    #[test]
    fn test_lexical_order_is_chronological() {
        let namer = RecordingNamer::new();
        let earlier = namer.next_name(at(999));
        let later = namer.next_name(at(0) + chrono::Duration::seconds(1));
        assert!(earlier < later);
    }

    #[test]
    fn test_parse_round_trips() {
        let namer = RecordingNamer::new();
        let name = namer.next_name(at(123));
        assert_eq!(parse_created_at(&name), Some(at(123)));
    }

    #[rstest]
    #[case::foreign("holiday.mjpeg")]
    #[case::wrong_extension("recording_20261018_142233_007_0000.mp4")]
    #[case::bad_sequence("recording_20261018_142233_007_00x0.mjpeg")]
    #[case::bad_date("recording_20261318_142233_007_0000.mjpeg")]
    fn test_parse_rejects(#[case] name: &str) {
        assert!(parse_created_at(name).is_none());
    }

    #[rstest]
    #[case("recording_20261018_142233_007_0000.mjpeg", true)]
    #[case("clip.mjpeg", true)]
    #[case("clip.mjpeg.part", false)]
    #[case(".mjpeg", false)]
    #[case("../etc/passwd.mjpeg", false)]
    #[case("sub\\clip.mjpeg", false)]
    #[case("clip.mp4", false)]
    #[case("", false)]
    fn test_is_artifact_name(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_artifact_name(name), expected);
    }
}
