use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

#[cfg(not(test))]
/// 現在のUTC時間を取得する。
pub fn now() -> DateTime<Utc> {
    Utc::now()
}


#[cfg(test)]
pub use mock_datetime::now;

/// UTCでその日の00:00:00を返す。
pub fn day_start(datetime: DateTime<Utc>) -> DateTime<Utc> {
    midnight(datetime.date_naive())
}

/// UTCでその週の日曜日00:00:00を返す。
pub fn week_start(datetime: DateTime<Utc>) -> DateTime<Utc> {
    let date = datetime.date_naive();
    let offset = date.weekday().num_days_from_sunday() as i64;
    midnight(date - Duration::days(offset))
}

/// UTCでその月の1日00:00:00を返す。
pub fn month_start(datetime: DateTime<Utc>) -> DateTime<Utc> {
    midnight(first_of_month(datetime.date_naive()))
}

/// UTCで翌月の1日00:00:00を返す。
pub fn next_month_start(datetime: DateTime<Utc>) -> DateTime<Utc> {
    // 1日から32日進めれば必ず翌月に入る
    let first = first_of_month(datetime.date_naive());
    midnight(first_of_month(first + Duration::days(32)))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.day0() as i64)
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// 日付をパースする。
///
/// `YYYY-MM-DD`をLocalタイムゾーンの00:00:00として解釈する。
pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let naive_date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Failed to parse date: {}", s))?;
    local_to_utc(&naive_date.and_time(NaiveTime::MIN))
}

/// 日時をパースする。
///
/// RFC3339、またはLocalタイムゾーンの`YYYY-MM-DD HH:MM`を受け付ける。
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(s) {
        return Ok(datetime.to_utc());
    }

    let naive_datetime = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .with_context(|| format!("Failed to parse datetime: {}", s))?;
    local_to_utc(&naive_datetime)
}

fn local_to_utc(naive_datetime: &NaiveDateTime) -> Result<DateTime<Utc>> {
    let datetime = Local
        .from_local_datetime(naive_datetime)
        .single()
        .context("Failed to convert to DateTime<Local>")?
        .to_utc();

    Ok(datetime)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use rstest::rstest;

    use super::{day_start, mock_datetime, month_start, next_month_start, parse_datetime, week_start};

    /// 何も設定しない場合は、現在時間が取得できることを確認する。
    ///
    ///  - 現在時刻での比較を行なっているため、ミリ秒単位まで比較するとテストが失敗する可能性があり、秒単位で比較している。
    #[test]
    fn test_now() {
        assert_eq!(
            mock_datetime::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
    }

    /// モック時間を設定した時に、その時間が取得できることを確認する。
    #[test]
    fn test_now_specific_datetime() {
        let datetime = String::from("2024-01-01T00:00:00+00:00");
        mock_datetime::set_mock_time(
            DateTime::parse_from_rfc3339(datetime.as_str())
                .unwrap()
                .to_utc(),
        );

        assert_eq!(mock_datetime::now().to_rfc3339(), datetime);
    }

    /// モック時間をリセットした時に、現在時間が取得できることを確認する。
    #[test]
    fn test_now_after_clear_mock_time() {
        let datetime = String::from("2024-01-01T00:00:00+00:00");
        mock_datetime::set_mock_time(
            DateTime::parse_from_rfc3339(datetime.as_str())
                .unwrap()
                .to_utc(),
        );
        mock_datetime::clear_mock_time();

        assert_eq!(
            mock_datetime::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
    }

    #[test]
    fn test_day_start() {
        let datetime = Utc.with_ymd_and_hms(2024, 3, 14, 15, 9, 26).unwrap();

        assert_eq!(day_start(datetime), Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap());
    }

    /// 2024-03-10は日曜日。
    #[rstest]
    #[case::sunday(Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap())]
    #[case::wednesday(Utc.with_ymd_and_hms(2024, 3, 13, 23, 59, 59).unwrap())]
    #[case::saturday(Utc.with_ymd_and_hms(2024, 3, 16, 12, 0, 0).unwrap())]
    fn test_week_start(#[case] datetime: DateTime<Utc>) {
        assert_eq!(week_start(datetime), Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap());
    }

    #[rstest]
    #[case::january(Utc.with_ymd_and_hms(2024, 1, 31, 10, 0, 0).unwrap(), (2024, 1), (2024, 2))]
    #[case::leap_february(Utc.with_ymd_and_hms(2024, 2, 29, 10, 0, 0).unwrap(), (2024, 2), (2024, 3))]
    #[case::december(Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap(), (2023, 12), (2024, 1))]
    fn test_month_bounds(
        #[case] datetime: DateTime<Utc>,
        #[case] start: (i32, u32),
        #[case] end: (i32, u32),
    ) {
        assert_eq!(
            month_start(datetime),
            Utc.with_ymd_and_hms(start.0, start.1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            next_month_start(datetime),
            Utc.with_ymd_and_hms(end.0, end.1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_datetime_rfc3339() {
        let parsed = parse_datetime("2024-01-01T09:30:00+09:00").unwrap();

        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap());
        assert!(parse_datetime("yesterday").is_err());
    }
}
