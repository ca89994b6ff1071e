const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;
const GB: f64 = MB * 1024.0;

/// Formats a byte count for dashboards: `512 B`, `1.5 KB`, `12.0 MB`.
pub fn human_size(bytes: u64) -> String {
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else if b < GB {
        format!("{:.1} MB", b / MB)
    } else {
        format!("{:.1} GB", b / GB)
    }
}

/// Formats whole seconds as `HH:MM:SS`.
pub fn clock_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0 B")]
    #[case(1023, "1023 B")]
    #[case(1024, "1.0 KB")]
    #[case(1536, "1.5 KB")]
    #[case(5 * 1024 * 1024, "5.0 MB")]
    #[case(3 * 1024 * 1024 * 1024, "3.0 GB")]
    fn test_human_size(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(human_size(bytes), expected);
    }

    #[rstest]
    #[case(0, "00:00:00")]
    #[case(59, "00:00:59")]
    #[case(61, "00:01:01")]
    #[case(3 * 3600 + 25 * 60 + 7, "03:25:07")]
    fn test_clock_duration(#[case] secs: u64, #[case] expected: &str) {
        assert_eq!(clock_duration(secs), expected);
    }
}
