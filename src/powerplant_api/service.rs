// powerplant_api - Operations dashboard backend for power-plant efficiency metrics
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::client::{HistorianClient, ResampleRequest, TimeSeriesPoint};
use crate::store::{Store, StoreError};
use crate::tags::TagMap;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error;
use std::fmt;

pub const DEFAULT_DAYS: i64 = 3;
pub const DEFAULT_DATA_NUM: i64 = 12;
pub const MAX_DATA_NUM: i64 = 100;

/// Bucket width used for history by days: five minutes.
pub const DAYS_PERIOD_MS: i64 = 5 * 60 * 1000;
const MS_PER_DAY: i64 = 24 * 3600 * 1000;

const LABEL_FORMAT: &str = "%Y-%m-%d %H:%M";
const END_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Values keyed by `YYYY-MM-DD HH:MM` labels in plant-local time. Label order is
/// chronological order.
pub type Series = BTreeMap<String, Option<f64>>;

#[derive(Debug)]
pub enum ServiceError {
    Validation(String),
    Store(StoreError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "{}", msg),
            Self::Store(e) => write!(f, "{}", e),
        }
    }
}

impl error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        ServiceError::Store(e)
    }
}

/// Combines the historian and the relational store into the values served by the API.
///
/// Historian failures never surface as errors from this type: they are logged and the
/// affected call returns an empty result, which callers treat as "no data".
#[derive(Debug)]
pub struct DataService {
    historian: HistorianClient,
    store: Store,
    offset: FixedOffset,
}

impl DataService {
    pub fn new(historian: HistorianClient, store: Store, offset: FixedOffset) -> Self {
        DataService {
            historian,
            store,
            offset,
        }
    }

    /// Current value of every tag in `tags`, keyed by display name.
    pub async fn realtime_by_tag_map(&self, tags: &TagMap) -> BTreeMap<String, Option<f64>> {
        match self.historian.realtime(tags.keys()).await {
            Ok(values) => relabel(tags, &values),
            Err(e) => {
                tracing::warn!(message = "failed to fetch realtime values", num_tags = tags.len(), error = %e);
                BTreeMap::new()
            }
        }
    }

    /// Every tag tied at the largest current value, keyed by display name.
    pub async fn max_value(&self, tags: &TagMap) -> BTreeMap<String, f64> {
        max_entries(&self.realtime_by_tag_map(tags).await)
    }

    /// Five minute means of `tag` over the last `days` days.
    pub async fn history_by_days(&self, tag: &str, days: i64) -> Result<Series, ServiceError> {
        let req = days_window(tag, Utc::now().timestamp_millis(), days)?;
        let points = self.fetch(&req).await;
        Ok(format_series(&points, self.offset))
    }

    /// About `data_num` means of `tag` over the `time_span_ms` milliseconds ending at
    /// `end_time`, which is plant-local time. Only the last `data_num` values are kept.
    pub async fn common_history(
        &self,
        tag: &str,
        end_time: &str,
        time_span_ms: i64,
        data_num: i64,
    ) -> Result<Series, ServiceError> {
        let req = common_window(tag, end_time, time_span_ms, data_num, self.offset)?;
        let points = self.fetch(&req).await;
        let skip = points.len().saturating_sub(data_num as usize);
        Ok(format_series(&points[skip..], self.offset))
    }

    pub async fn latest_stored_record(&self) -> Result<Option<Map<String, Value>>, ServiceError> {
        Ok(self.store.latest_snapshot().await?)
    }

    /// Run caller supplied SQL as-is. There is no restriction on the statement.
    pub async fn execute_raw_query(&self, sql: &str) -> Result<Vec<Map<String, Value>>, ServiceError> {
        tracing::info!(message = "executing raw query", sql = %sql);
        Ok(self.store.query(sql).await?)
    }

    async fn fetch(&self, req: &ResampleRequest) -> Vec<TimeSeriesPoint> {
        self.historian.history(req).await.unwrap_or_else(|e| {
            tracing::warn!(message = "failed to fetch history", tag = %req.tag, error = %e);
            Vec::new()
        })
    }
}

/// Plant-local offset `hours` east of UTC.
pub fn utc_offset(hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(hours.checked_mul(3600)?)
}

/// Key `values` (keyed by tag) by the display name of each tag in `tags`. Tags missing
/// from `values` are present with no value.
fn relabel(tags: &TagMap, values: &BTreeMap<String, Option<f64>>) -> BTreeMap<String, Option<f64>> {
    tags.iter()
        .map(|(key, display)| (display.clone(), values.get(key).copied().flatten()))
        .collect()
}

/// Entries tied at the maximum non-null value. Empty when every value is null.
pub fn max_entries(values: &BTreeMap<String, Option<f64>>) -> BTreeMap<String, f64> {
    let max = values
        .values()
        .flatten()
        .copied()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))));

    match max {
        Some(max) => values
            .iter()
            .filter_map(|(k, v)| v.filter(|v| *v == max).map(|v| (k.clone(), v)))
            .collect(),
        None => BTreeMap::new(),
    }
}

fn days_window(tag: &str, now_ms: i64, days: i64) -> Result<ResampleRequest, ServiceError> {
    if days < 1 {
        return Err(ServiceError::Validation("days must be a positive integer".to_owned()));
    }

    let span = days
        .checked_mul(MS_PER_DAY)
        .ok_or_else(|| ServiceError::Validation("days is too large".to_owned()))?;
    Ok(ResampleRequest::new(tag, now_ms - span, now_ms, DAYS_PERIOD_MS))
}

fn common_window(
    tag: &str,
    end_time: &str,
    time_span_ms: i64,
    data_num: i64,
    offset: FixedOffset,
) -> Result<ResampleRequest, ServiceError> {
    if !(1..=MAX_DATA_NUM).contains(&data_num) {
        return Err(ServiceError::Validation(format!(
            "dataNum must be between 1 and {}",
            MAX_DATA_NUM
        )));
    }

    if time_span_ms < 1 {
        return Err(ServiceError::Validation("timeSpan must be a positive number of milliseconds".to_owned()));
    }

    let end_ms = parse_end_time(end_time, offset)?;
    let start_ms = end_ms
        .checked_sub(time_span_ms)
        .ok_or_else(|| ServiceError::Validation("timeSpan is too large".to_owned()))?;
    Ok(ResampleRequest::with_points(tag, start_ms, end_ms, data_num as u32))
}

/// Milliseconds since the epoch for a plant-local `YYYY-MM-DD HH:MM:SS` (or ISO 8601)
/// time. Times that carry their own UTC offset are taken as-is.
pub fn parse_end_time(s: &str, offset: FixedOffset) -> Result<i64, ServiceError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }

    END_TIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| {
            ServiceError::Validation(format!(
                "time data '{}' does not match format 'YYYY-MM-DD HH:MM:SS'",
                s
            ))
        })
}

/// Round to two decimal places, ties to even.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round_ties_even() / 100.0
}

/// Label each point with its plant-local time to the minute and round its value.
pub fn format_series(points: &[TimeSeriesPoint], offset: FixedOffset) -> Series {
    points
        .iter()
        .filter_map(|p| {
            let label = Utc
                .timestamp_millis_opt(p.timestamp_ms)
                .single()?
                .with_timezone(&offset)
                .format(LABEL_FORMAT)
                .to_string();
            Some((label, p.value.map(round2)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::tag_map;

    fn plant() -> FixedOffset {
        utc_offset(8).unwrap()
    }

    #[test]
    fn test_max_entries_keeps_ties() {
        let values = BTreeMap::from([
            ("a".to_owned(), Some(1.0)),
            ("b".to_owned(), Some(5.0)),
            ("c".to_owned(), Some(5.0)),
            ("d".to_owned(), None),
        ]);

        let max = max_entries(&values);
        assert_eq!(BTreeMap::from([("b".to_owned(), 5.0), ("c".to_owned(), 5.0)]), max);
    }

    #[test]
    fn test_max_entries_negative_and_null() {
        let values = BTreeMap::from([("a".to_owned(), Some(-3.0)), ("b".to_owned(), Some(-1.5))]);
        assert_eq!(BTreeMap::from([("b".to_owned(), -1.5)]), max_entries(&values));

        let values = BTreeMap::from([("a".to_owned(), None), ("b".to_owned(), None)]);
        assert!(max_entries(&values).is_empty());
        assert!(max_entries(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_relabel() {
        let tags = tag_map(&[("T1", "主汽压力"), ("T2", "主汽温度")]);
        let values = BTreeMap::from([("T1".to_owned(), Some(16.7))]);

        let out = relabel(&tags, &values);
        assert_eq!(Some(&Some(16.7)), out.get("主汽压力"));
        assert_eq!(Some(&None), out.get("主汽温度"));
    }

    #[test]
    fn test_days_window() {
        let now = 1_700_000_000_000;
        let req = days_window("T1", now, 3).unwrap();
        assert_eq!(now, req.end_ms);
        assert_eq!(now - 3 * 86_400_000, req.start_ms);
        assert_eq!(300_000, req.period_ms);

        assert!(matches!(days_window("T1", now, 0), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_common_window() {
        let req = common_window("T1", "2024-01-01 08:00:00", 3_600_000, 12, plant()).unwrap();
        assert_eq!(1_704_067_200_000, req.end_ms);
        assert_eq!(1_704_067_200_000 - 3_600_000, req.start_ms);
        assert_eq!(300_000, req.period_ms);

        // a short window is never resampled below one second
        let req = common_window("T1", "2024-01-01 08:00:00", 5_000, 12, plant()).unwrap();
        assert_eq!(1000, req.period_ms);
    }

    #[test]
    fn test_common_window_data_num_bounds() {
        for n in [0, 101, -1] {
            let res = common_window("T1", "2024-01-01 08:00:00", 3_600_000, n, plant());
            assert!(matches!(res, Err(ServiceError::Validation(_))), "dataNum {}", n);
        }

        assert!(common_window("T1", "2024-01-01 08:00:00", 3_600_000, 1, plant()).is_ok());
        assert!(common_window("T1", "2024-01-01 08:00:00", 3_600_000, 100, plant()).is_ok());
    }

    #[test]
    fn test_common_window_span_before_epoch_limit() {
        let res = common_window("T1", "1900-01-01 00:00:00", i64::MAX, 12, plant());
        assert!(matches!(res, Err(ServiceError::Validation(_))));

        // a long span from an early end time is still a valid window
        let req = common_window("T1", "1900-01-01 00:00:00", 1_000_000_000_000, 12, plant()).unwrap();
        assert_eq!(req.end_ms - 1_000_000_000_000, req.start_ms);
    }

    #[test]
    fn test_parse_end_time() {
        let offset = plant();
        assert_eq!(1_704_067_200_000, parse_end_time("2024-01-01 08:00:00", offset).unwrap());
        assert_eq!(1_704_067_200_000, parse_end_time("2024-01-01T08:00:00", offset).unwrap());
        assert_eq!(1_704_067_200_000, parse_end_time("2024-01-01T00:00:00Z", offset).unwrap());
        assert!(matches!(parse_end_time("yesterday", offset), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_round2() {
        assert_eq!(1.24, round2(1.235_000_1));
        assert_eq!(-2.5, round2(-2.499_9));
        assert_eq!(3.0, round2(3.0));
    }

    #[test]
    fn test_round2_ties_to_even() {
        assert_eq!(0.12, round2(0.125));
        assert_eq!(-0.12, round2(-0.125));
        assert_eq!(1.12, round2(1.125));
        assert_eq!(0.38, round2(0.375));
    }

    #[test]
    fn test_format_series() {
        let points = vec![
            TimeSeriesPoint {
                timestamp_ms: 1_704_067_200_000,
                value: Some(12.345_6),
            },
            TimeSeriesPoint {
                timestamp_ms: 1_704_067_500_000,
                value: None,
            },
        ];

        let series = format_series(&points, plant());
        let entries: Vec<(&String, &Option<f64>)> = series.iter().collect();
        assert_eq!(2, entries.len());
        assert_eq!("2024-01-01 08:00", entries[0].0);
        assert_eq!(&Some(12.35), entries[0].1);
        assert_eq!("2024-01-01 08:05", entries[1].0);
        assert_eq!(&None, entries[1].1);
    }

    #[test]
    fn test_utc_offset() {
        assert_eq!(Some(28_800), utc_offset(8).map(|o| o.local_minus_utc()));
        assert_eq!(None, utc_offset(30));
    }
}
