//! Marker scan over captured script output.

const LINE_SEPARATOR: &str = "\r\n";

/// Search the last `window` lines of `output` for `marker`, ignoring case.
///
/// Lines are separated by `\r\n` only. Output ending in `\r\n` has an empty
/// last line, which takes up one slot of the window, and LF-only output is a
/// single line. Returns the offset from the end of the first matching line
/// (0 = last line).
pub fn scan_tail(output: &str, marker: &str, window: usize) -> Option<usize> {
    let needle = marker.to_lowercase();
    if needle.is_empty() {
        return None;
    }

    output
        .rsplit(LINE_SEPARATOR)
        .take(window)
        .position(|line| line.to_lowercase().contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_case_marker_in_tail() {
        let output = "booting\r\nflashing\r\nDevice Control SUCCEED\r\ndone\r\n";
        assert_eq!(scan_tail(output, "succeed", 3), Some(2));
    }

    #[test]
    fn test_marker_outside_window() {
        let output = "succeed\r\nline 2\r\nline 3\r\nline 4\r\n";
        assert_eq!(scan_tail(output, "succeed", 4), None);
        assert_eq!(scan_tail(output, "succeed", 5), Some(4));
    }

    #[test]
    fn test_trailing_separator_uses_window_slot() {
        let output = "x\r\nSUCCEED\r\ny\r\nz\r\n";
        assert_eq!(scan_tail(output, "succeed", 3), None);
        assert_eq!(scan_tail(output, "succeed", 4), Some(3));
    }

    #[test]
    fn test_lf_only_output_is_one_line() {
        let output = "a\nb\nall good: Succeed";
        assert_eq!(scan_tail(output, "SUCCEED", 1), Some(0));
        assert_eq!(scan_tail("succeed\nx\ny\n", "succeed", 1), Some(0));
    }

    #[test]
    fn test_empty_output_and_marker() {
        assert_eq!(scan_tail("", "succeed", 3), None);
        assert_eq!(scan_tail("succeed\n", "", 3), None);
    }

    #[test]
    fn test_zero_window() {
        assert_eq!(scan_tail("succeed", "succeed", 0), None);
    }
}
