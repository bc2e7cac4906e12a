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

mod common;

use common::MockHistorian;
use powerplant_api::client::{ClientError, ResampleRequest, TimeSeriesPoint};
use powerplant_api::service::{parse_end_time, utc_offset, DataService, ServiceError};
use powerplant_api::store::Store;
use powerplant_api::tags::tag_map;
use serde_json::json;
use std::time::Duration;

async fn memory_store() -> Store {
    Store::connect("sqlite::memory:", 1).await.unwrap()
}

#[tokio::test]
async fn test_token_is_cached_between_requests() {
    let mock = MockHistorian::default();
    mock.set_realtime(json!({"A": 1.0}));
    let url = mock.start();
    let (client, metrics, _registry) = common::historian_client(&url, common::PASSWORD);

    client.realtime(["A"]).await.unwrap();
    client.realtime(["A"]).await.unwrap();

    assert_eq!(1, mock.logins());
    assert_eq!(1, metrics.logins());
}

#[tokio::test]
async fn test_expired_token_logs_in_again() {
    let mock = MockHistorian::default();
    mock.set_realtime(json!({"A": 1.0}));
    let url = mock.start();
    let (client, metrics, _registry) = common::historian_client(&url, common::PASSWORD);
    let client = client.with_token_ttl(Duration::ZERO);

    client.realtime(["A"]).await.unwrap();
    client.realtime(["A"]).await.unwrap();

    assert_eq!(2, mock.logins());
    assert_eq!(2, metrics.logins());
}

#[tokio::test]
async fn test_bad_credentials() {
    let mock = MockHistorian::default();
    let url = mock.start();
    let (client, metrics, _registry) = common::historian_client(&url, "wrong");

    let res = client.realtime(["A"]).await;

    assert!(matches!(res, Err(ClientError::Auth(_))), "unexpected result {:?}", res);
    assert_eq!(0, metrics.logins());
}

#[tokio::test]
async fn test_realtime_missing_and_non_numeric() {
    let mock = MockHistorian::default();
    mock.set_realtime(json!({"A": 1.5, "B": "offline", "C": null}));
    let url = mock.start();
    let (client, _metrics, _registry) = common::historian_client(&url, common::PASSWORD);

    let values = client.realtime(["A", "B", "C", "D"]).await.unwrap();

    assert_eq!(4, values.len());
    assert_eq!(Some(1.5), values["A"]);
    assert_eq!(None, values["B"]);
    assert_eq!(None, values["C"]);
    assert_eq!(None, values["D"]);
}

#[tokio::test]
async fn test_history_request_and_ordering() {
    let mock = MockHistorian::default();
    mock.set_history(Some(vec![
        json!({"t": 3000, "A": 3.0}),
        json!({"t": 1000, "A": 1.0}),
        json!({"t": 2000, "A": null}),
        json!({"A": 9.0}),
    ]));
    let url = mock.start();
    let (client, _metrics, _registry) = common::historian_client(&url, common::PASSWORD);

    let points = client.history(&ResampleRequest::new("A", 0, 60_000, 10_000)).await.unwrap();

    assert_eq!(
        vec![
            TimeSeriesPoint { timestamp_ms: 1000, value: Some(1.0) },
            TimeSeriesPoint { timestamp_ms: 2000, value: None },
            TimeSeriesPoint { timestamp_ms: 3000, value: Some(3.0) },
        ],
        points
    );

    let requests = mock.history_requests();
    assert_eq!(1, requests.len());
    let body = &requests[0];
    assert_eq!(common::DB_NAME, body["dbName"]);
    assert_eq!("A", body["tagName"]);
    assert_eq!(0, body["startMsTime"]);
    assert_eq!(60_000, body["endMsTime"]);
    assert_eq!(1, body["resampleMode"]);
    assert_eq!(10_000, body["resamplePriodMs"]);
}

#[tokio::test]
async fn test_history_without_data() {
    let mock = MockHistorian::default();
    mock.set_history(None);
    let url = mock.start();
    let (client, _metrics, _registry) = common::historian_client(&url, common::PASSWORD);

    let points = client.history(&ResampleRequest::new("A", 0, 60_000, 10_000)).await.unwrap();

    assert!(points.is_empty());
}

#[tokio::test]
async fn test_service_common_history_keeps_last_values() {
    let offset = utc_offset(8).unwrap();
    let end = parse_end_time("2024-01-01 12:00:00", offset).unwrap();
    let mock = MockHistorian::default();
    mock.set_history(Some(
        (0..4)
            .map(|i| json!({"t": end - (3 - i) * 60_000, "A": 1.234 + i as f64}))
            .collect(),
    ));
    let url = mock.start();
    let (client, _metrics, _registry) = common::historian_client(&url, common::PASSWORD);
    let service = DataService::new(client, memory_store().await, offset);

    let series = service
        .common_history("A", "2024-01-01 12:00:00", 3_600_000, 2)
        .await
        .unwrap();

    let entries: Vec<(&str, Option<f64>)> = series.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    assert_eq!(
        vec![("2024-01-01 11:59", Some(3.23)), ("2024-01-01 12:00", Some(4.23))],
        entries
    );

    let body = &mock.history_requests()[0];
    assert_eq!(end, body["endMsTime"]);
    assert_eq!(end - 3_600_000, body["startMsTime"]);
    assert_eq!(1_800_000, body["resamplePriodMs"]);
}

#[tokio::test]
async fn test_service_validation() {
    let mock = MockHistorian::default();
    let url = mock.start();
    let (client, _metrics, _registry) = common::historian_client(&url, common::PASSWORD);
    let service = DataService::new(client, memory_store().await, utc_offset(8).unwrap());

    let res = service.common_history("A", "not a time", 60_000, 12).await;
    assert!(matches!(res, Err(ServiceError::Validation(_))));

    let res = service.common_history("A", "2024-01-01 12:00:00", 60_000, 101).await;
    assert!(matches!(res, Err(ServiceError::Validation(_))));

    let res = service.history_by_days("A", 0).await;
    assert!(matches!(res, Err(ServiceError::Validation(_))));

    let res = service.common_history("A", "1900-01-01 00:00:00", i64::MAX, 12).await;
    assert!(matches!(res, Err(ServiceError::Validation(_))));

    assert!(mock.history_requests().is_empty());
}

#[tokio::test]
async fn test_service_unreachable_historian_degrades() {
    let (client, _metrics, _registry) = common::historian_client(&common::unreachable_url(), common::PASSWORD);
    let service = DataService::new(client, memory_store().await, utc_offset(8).unwrap());
    let tags = tag_map(&[("A", "Alpha"), ("B", "Beta")]);

    assert!(service.realtime_by_tag_map(&tags).await.is_empty());
    assert!(service.max_value(&tags).await.is_empty());
    assert!(service.history_by_days("A", 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_service_realtime_by_display_name() {
    let mock = MockHistorian::default();
    mock.set_realtime(json!({"A": 2.0, "B": 7.5, "C": 7.5}));
    let url = mock.start();
    let (client, _metrics, _registry) = common::historian_client(&url, common::PASSWORD);
    let service = DataService::new(client, memory_store().await, utc_offset(8).unwrap());
    let tags = tag_map(&[("A", "Alpha"), ("B", "Beta"), ("C", "Gamma"), ("D", "Delta")]);

    let values = service.realtime_by_tag_map(&tags).await;
    assert_eq!(Some(2.0), values["Alpha"]);
    assert_eq!(None, values["Delta"]);

    let max = service.max_value(&tags).await;
    assert_eq!(2, max.len());
    assert_eq!(7.5, max["Beta"]);
    assert_eq!(7.5, max["Gamma"]);
}
