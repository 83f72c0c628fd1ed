use chrono::{DateTime, Utc};

use crate::error::{Result, TimeEntryError};

/// 経過秒数を丸め単位(分)の最も近い倍数に丸める。
///
/// 丸め単位のちょうど半分は切り上げる。丸め単位が0以下なら何もしない。
///
/// # Examples
///
/// ```
/// assert_eq!(timekeep::duration::apply_time_rounding(450, 15), 900);
/// assert_eq!(timekeep::duration::apply_time_rounding(449, 15), 0);
/// ```
pub fn apply_time_rounding(duration_seconds: i64, interval_minutes: i64) -> i64 {
    if interval_minutes <= 0 {
        return duration_seconds;
    }

    let interval_seconds = interval_minutes * 60;
    let remainder = duration_seconds.rem_euclid(interval_seconds);

    if remainder * 2 >= interval_seconds {
        duration_seconds + (interval_seconds - remainder)
    } else {
        duration_seconds - remainder
    }
}

/// 開始から終了までの経過秒数を返す。
///
/// 0秒以下は呼び出し側のバグとして扱い、エラーにする。
pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64> {
    let seconds = (end - start).num_seconds();
    if seconds <= 0 {
        return Err(TimeEntryError::validation(format!(
            "Time entry would have a non-positive duration ({}s): end time must be after start time",
            seconds
        )));
    }

    Ok(seconds)
}
