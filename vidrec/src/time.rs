/*!
    Elapsed-time formatting for progress display.
*/

/**
    Format a millisecond count as `HH:MM:SS`.

    Negative values read as zero. Hours are not wrapped, so 100 hours renders
    as `100:00:00`.
*/
pub fn format_hms(millis: i64) -> String {
    let secs = millis.max(0) / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}
