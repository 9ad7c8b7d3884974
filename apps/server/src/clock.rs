use chrono::{DateTime, FixedOffset, Utc};

/// Shop timezone offset: São Paulo, UTC-3.
const SHOP_OFFSET_SECS: i32 = 3 * 3600;

/// Current time in the shop's timezone.
pub fn shop_now() -> DateTime<FixedOffset> {
    let tz = FixedOffset::west_opt(SHOP_OFFSET_SECS).unwrap();
    Utc::now().with_timezone(&tz)
}

pub fn shop_today() -> String {
    shop_now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shop_now_is_behind_utc() {
        use chrono::Offset;
        let offset = shop_now().offset().fix().local_minus_utc();
        assert_eq!(offset, -SHOP_OFFSET_SECS);
    }

    #[test]
    fn test_shop_today_format() {
        let today = shop_today();
        assert_eq!(today.len(), 10);
        assert!(chrono::NaiveDate::parse_from_str(&today, "%Y-%m-%d").is_ok());
    }
}
