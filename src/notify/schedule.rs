//! Pure due-date arithmetic: which thresholds fire today, and what the
//! forward projection of remaining reminders looks like.

use chrono::NaiveDate;

pub fn days_remaining(due_on: NaiveDate, today: NaiveDate) -> i64 {
    (due_on - today).num_days()
}

/// Thresholds that fire for `due_on` as of `today`, excluding any that
/// already have a successful dispatch.
///
/// A threshold fires only on the exact day the remaining-day count
/// equals it; once the due date is in the past nothing fires. Duplicate
/// thresholds in the profile fire at most once.
pub fn due_thresholds(
    due_on: NaiveDate,
    today: NaiveDate,
    thresholds: &[i32],
    already_sent: &[i32],
) -> Vec<i32> {
    let remaining = days_remaining(due_on, today);
    if remaining < 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    for &threshold in thresholds {
        if i64::from(threshold) == remaining
            && !already_sent.contains(&threshold)
            && !out.contains(&threshold)
        {
            out.push(threshold);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UpcomingReminder {
    pub threshold_days: i32,
    pub send_on: NaiveDate,
}

/// Remaining reminder dates for `due_on`, strictly after `today`,
/// soonest first. Thresholds already covered by a successful dispatch
/// are omitted.
pub fn upcoming(
    due_on: NaiveDate,
    today: NaiveDate,
    thresholds: &[i32],
    already_sent: &[i32],
) -> Vec<UpcomingReminder> {
    let mut out: Vec<UpcomingReminder> = Vec::new();
    for &threshold in thresholds {
        if already_sent.contains(&threshold) {
            continue;
        }
        let send_on = due_on - chrono::Duration::days(i64::from(threshold));
        if send_on > today && !out.iter().any(|r| r.threshold_days == threshold) {
            out.push(UpcomingReminder {
                threshold_days: threshold,
                send_on,
            });
        }
    }
    out.sort_by_key(|r| r.send_on);
    out
}
