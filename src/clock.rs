use time::macros::format_description;
use time::OffsetDateTime;

/// Local wall-clock time, or UTC when the local offset cannot be determined.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// `YYYY-MM-DD HH:MM`, as shown on the results page.
pub fn format_display(ts: OffsetDateTime) -> String {
    ts.format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

/// `YYYY-MM-DD HH:MM:SS.ffffff`, used for contact log lines.
pub fn format_log(ts: OffsetDateTime) -> String {
    ts.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
    ))
    .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}
