use std::time::Duration;

/// Convert an integer number of bytes to something a human being might reasonably interpret. Allows
/// for one place of decimal precision for low quanta of a given denomination.
/// ```rust
/// # use camwatch::formatting::human_readable_size;
/// assert_eq!(human_readable_size(12), "12".to_string());
/// assert_eq!(human_readable_size(2055), "2k".to_string());
/// assert_eq!(human_readable_size(36700244), "35m".to_string());
/// assert_eq!(human_readable_size(3650722201), "3.4g".to_string());
/// ```
pub fn human_readable_size(bytes: u64) -> String {
    let mut multiplier: u64 = 1;

    if bytes < 1024 {
        return format!("{}", bytes);
    }
    for unit in &['k', 'm', 'g', 't'] {
        multiplier *= 1024;
        if *unit != 'k' && bytes < multiplier * 10 {
            return format!("{:.1}{}", bytes as f64 / multiplier as f64, unit);
        }
        if bytes < 1024 * multiplier {
            return format!("{:.0}{}", bytes as f64 / multiplier as f64, unit);
        }
    }
    format!("{}t", bytes as f64 / multiplier as f64)
}

/// Format a given `Duration` as a formatted amount of time a human might reasonably interpret.
/// ```rust
/// # use camwatch::formatting::human_readable_time;
/// use std::time::Duration;
///
/// assert_eq!(human_readable_time(Duration::from_secs(45)), "45s".to_string());
/// assert_eq!(human_readable_time(Duration::from_secs(45311)), "12h35m11s".to_string());
/// ```
pub fn human_readable_time(time: Duration) -> String {
    let total = time.as_secs();
    let (hours, mins, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    match (hours, mins) {
        (0, 0) => format!("{}s", secs),
        (0, _) => format!("{}m{}s", mins, secs),
        _ => format!("{}h{}m{}s", hours, mins, secs),
    }
}

/// Label a video offset as a zero padded `HH-MM-SS` string, suitable for use in file names.
/// ```rust
/// # use camwatch::formatting::offset_label;
/// assert_eq!(offset_label(0), "00-00-00");
/// assert_eq!(offset_label(3725), "01-02-05");
/// ```
pub fn offset_label(offset_secs: u64) -> String {
    let hours = offset_secs / 3600;
    let mins = (offset_secs % 3600) / 60;
    let secs = offset_secs % 60;
    format!("{:02}-{:02}-{:02}", hours, mins, secs)
}
