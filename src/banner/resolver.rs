//! Derives the four banner dates from a promotion and the configured offsets.
use chrono::{Days, NaiveDate};

use super::model::{BannerFieldSet, PromotionRecord};
use crate::config::OffsetConfig;

/// Resolve the banner dates for one promotion.
///
/// - sale start is pulled `sale_pre_days` earlier; sale end is copied as is
/// - PI start is pulled `pi_pre_days` earlier
/// - PI end is the real end when there is one, otherwise the *unshifted* PI
///   start plus `pi_post_days`
///
/// Missing inputs give missing outputs. A date pushed outside the calendar
/// range is treated as missing.
pub fn resolve(record: &PromotionRecord, offsets: &OffsetConfig) -> BannerFieldSet {
    BannerFieldSet {
        sale_start: record
            .sale_start
            .and_then(|d| days_before(d, offsets.sale_pre_days)),
        sale_end: record.sale_end,
        pi_start: record
            .pi_start
            .and_then(|d| days_before(d, offsets.pi_pre_days)),
        pi_end: record.pi_end.or_else(|| {
            record
                .pi_start
                .and_then(|d| d.checked_add_days(Days::new(offsets.pi_post_days.into())))
        }),
    }
}

fn days_before(date: NaiveDate, days: u32) -> Option<NaiveDate> {
    date.checked_sub_days(Days::new(days.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn offsets(x: u32, y: u32, z: u32) -> OffsetConfig {
        OffsetConfig {
            sale_pre_days: x,
            pi_pre_days: y,
            pi_post_days: z,
        }
    }

    #[test]
    fn sale_only_promotion_pulls_start_forward() {
        let record = PromotionRecord {
            sale_start: Some(d("2025-06-01")),
            sale_end: Some(d("2025-06-15")),
            ..PromotionRecord::new("gid://shopify/Product/1")
        };

        let got = resolve(&record, &offsets(3, 0, 0));
        assert_eq!(
            got,
            BannerFieldSet {
                sale_start: Some(d("2025-05-29")),
                sale_end: Some(d("2025-06-15")),
                pi_start: None,
                pi_end: None,
            }
        );
    }

    #[test]
    fn open_ended_price_increase_ends_from_unshifted_start() {
        let record = PromotionRecord {
            pi_start: Some(d("2025-07-01")),
            ..PromotionRecord::new("gid://shopify/Product/2")
        };

        let got = resolve(&record, &offsets(0, 2, 5));
        assert_eq!(
            got,
            BannerFieldSet {
                sale_start: None,
                sale_end: None,
                pi_start: Some(d("2025-06-29")),
                pi_end: Some(d("2025-07-06")),
            }
        );
    }

    #[test]
    fn real_price_increase_end_ignores_post_days() {
        let record = PromotionRecord {
            pi_start: Some(d("2025-07-01")),
            pi_end: Some(d("2025-07-20")),
            ..PromotionRecord::new("p")
        };

        for z in [0, 1, 30] {
            assert_eq!(resolve(&record, &offsets(0, 0, z)).pi_end, Some(d("2025-07-20")));
        }
    }

    #[test]
    fn pi_end_without_start_is_copied() {
        let record = PromotionRecord {
            pi_end: Some(d("2025-07-20")),
            ..PromotionRecord::new("p")
        };
        let got = resolve(&record, &offsets(0, 4, 9));
        assert_eq!(got.pi_start, None);
        assert_eq!(got.pi_end, Some(d("2025-07-20")));
    }

    #[test]
    fn zero_offsets_track_source_dates() {
        let record = PromotionRecord {
            product_id: "p".into(),
            sale_start: Some(d("2025-03-01")),
            sale_end: Some(d("2025-03-09")),
            pi_start: Some(d("2025-04-01")),
            pi_end: None,
        };
        let got = resolve(&record, &OffsetConfig::default());
        assert_eq!(got.sale_start, record.sale_start);
        assert_eq!(got.sale_end, record.sale_end);
        assert_eq!(got.pi_start, record.pi_start);
        assert_eq!(got.pi_end, record.pi_start);
    }

    #[test]
    fn offsets_cross_month_and_leap_day_boundaries() {
        let record = PromotionRecord {
            sale_start: Some(d("2024-03-02")),
            pi_start: Some(d("2024-02-27")),
            ..PromotionRecord::new("p")
        };
        let got = resolve(&record, &offsets(2, 0, 3));
        assert_eq!(got.sale_start, Some(d("2024-02-29")));
        assert_eq!(got.pi_end, Some(d("2024-03-01")));
    }

    #[test]
    fn everything_absent_stays_absent() {
        let got = resolve(&PromotionRecord::new("p"), &offsets(3, 2, 5));
        assert_eq!(got, BannerFieldSet::default());
    }

    #[test]
    fn out_of_range_shift_is_absent() {
        let record = PromotionRecord {
            sale_start: Some(NaiveDate::MIN),
            pi_start: Some(NaiveDate::MAX),
            ..PromotionRecord::new("p")
        };
        let got = resolve(&record, &offsets(1, 0, 1));
        assert_eq!(got.sale_start, None);
        assert_eq!(got.pi_start, Some(NaiveDate::MAX));
        assert_eq!(got.pi_end, None);
    }
}
