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

use axum::body::Body;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::MockHistorian;
use powerplant_api::document::DocumentRenderer;
use powerplant_api::http::{router, RequestContext};
use powerplant_api::service::{utc_offset, DataService};
use powerplant_api::store::Store;
use powerplant_api::tags::TagDictionary;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    mock: MockHistorian,
    store: Store,
}

async fn app() -> TestApp {
    let mock = MockHistorian::default();
    let url = mock.start();
    let (client, metrics, registry) = common::historian_client(&url, common::PASSWORD);

    let store = Store::connect("sqlite::memory:", 1).await.unwrap();
    store.create_table().await.unwrap();

    let dictionary = TagDictionary::from_map(BTreeMap::from([
        ("JCYY:U4_ZQYL".to_owned(), "主汽压力".to_owned()),
        ("JCYY:U4_ZQWD".to_owned(), "主汽温度".to_owned()),
        ("JCYY:U4_GSLL".to_owned(), "给水流量".to_owned()),
    ]));

    let service = DataService::new(client, store.clone(), utc_offset(8).unwrap());
    let context = RequestContext::new(
        service,
        Arc::new(dictionary),
        DocumentRenderer::new(Vec::new()),
        metrics,
        registry,
    );

    TestApp {
        router: router(Arc::new(context)),
        mock,
        store,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
    let res = app.router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
    (status, body.to_vec(), headers)
}

async fn send_json(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body, _) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let (status, body) = send_json(&app, get("/health")).await;

    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!({"status": "healthy"}), body);
}

#[tokio::test]
async fn test_unknown_route() {
    let app = app().await;
    let (status, body) = send_json(&app, get("/api/nope")).await;

    assert_eq!(StatusCode::NOT_FOUND, status);
    assert_eq!(json!({"error": "Not found"}), body);
}

#[tokio::test]
async fn test_hcfx_mock() {
    let app = app().await;
    let (status, body) = send_json(&app, get("/api/hcfx/mock")).await;
    assert_eq!(StatusCode::NOT_FOUND, status);
    assert_eq!(json!({"error": "No record found"}), body);

    let snapshot = BTreeMap::from([("boiler_eff".to_owned(), Some(1.25))]);
    app.store.insert_snapshot(&snapshot).await.unwrap();

    let (status, body) = send_json(&app, get("/api/hcfx/mock")).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!(1.25), body["锅炉效率耗差(g/kWh)"]);
    assert!(body.get("id").is_none());
}

#[tokio::test]
async fn test_hcfx_real_and_top1() {
    let app = app().await;
    app.mock.set_realtime(json!({
        "JCYY:U4_MH_GLXL": 1.5,
        "JCYY:U4_MH_FGC": 4.0,
        "JCYY:U4_MH_CLXS": 4.0,
    }));

    let (status, body) = send_json(&app, get("/api/hcfx/real")).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(28, body.as_object().unwrap().len());
    assert_eq!(json!(1.5), body["锅炉效率耗差(g/kWh)"]);
    assert_eq!(Value::Null, body["主汽温度耗差(g/kWh)"]);

    let (status, body) = send_json(&app, get("/api/hcfx/top1")).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!({"峰谷差耗差(g/kWh)": 4.0, "出力系数耗差(g/kWh)": 4.0}), body);
}

#[tokio::test]
async fn test_hcfx_top1_without_values() {
    let app = app().await;
    let (status, body) = send_json(&app, get("/api/hcfx/top1")).await;

    assert_eq!(StatusCode::NOT_FOUND, status);
    assert_eq!(json!({"error": "No data found"}), body);
}

#[tokio::test]
async fn test_loss_and_xnjs_real() {
    let app = app().await;
    app.mock.set_realtime(json!({"JCYY:U4_BOILER_Q_OTHER": 0.3, "JCYY:U4_BOILER_EFF": 93.1}));

    let (status, body) = send_json(&app, get("/api/loss/real")).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!({"q2": null, "q3": null, "q4": null, "q5": null, "q6": 0.3}), body);

    let (status, body) = send_json(&app, get("/api/xnjs/real")).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!(93.1), body["锅炉计算效率(%)"]);
}

#[tokio::test]
async fn test_hcfx_history() {
    let app = app().await;

    let (status, _) = send_json(&app, post("/api/hcfx/history", json!({"days": 1}))).await;
    assert_eq!(StatusCode::BAD_REQUEST, status);

    let (status, _) = send_json(&app, post("/api/hcfx/history", json!({"tagName": "A", "days": 0}))).await;
    assert_eq!(StatusCode::BAD_REQUEST, status);

    app.mock.set_history(Some(Vec::new()));
    let (status, body) = send_json(&app, post("/api/hcfx/history", json!({"tagName": "A"}))).await;
    assert_eq!(StatusCode::NOT_FOUND, status);
    assert_eq!(json!({"error": "No data found for the given tag name"}), body);

    // 2024-01-01 00:00 UTC
    app.mock.set_history(Some(vec![json!({"t": 1_704_067_200_000_i64, "A": 2.346})]));
    let (status, body) = send_json(&app, post("/api/hcfx/history", json!({"tagName": "A", "days": "2"}))).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!({"2024-01-01 08:00": 2.35}), body);

    let requests = app.mock.history_requests();
    let last = requests.last().unwrap();
    assert_eq!(300_000, last["resamplePriodMs"]);
    let span = last["endMsTime"].as_i64().unwrap() - last["startMsTime"].as_i64().unwrap();
    assert_eq!(2 * 86_400_000, span);
}

#[tokio::test]
async fn test_common_real() {
    let app = app().await;
    let request = |data_num: Value| {
        post(
            "/api/common/real",
            json!({"tagName": "A", "endTimeStr": "2024-01-01 12:00:00", "timeSpan": 3_600_000, "dataNum": data_num}),
        )
    };

    let (status, body) = send_json(&app, post("/api/common/real", json!({"tagName": "A"}))).await;
    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!(json!({"error": "tagName and endTimeStr are required"}), body);

    let (status, body) = send_json(
        &app,
        post("/api/common/real", json!({"tagName": "A", "endTimeStr": "2024-01-01 12:00:00"})),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!(json!({"error": "timeSpan is required"}), body);

    for invalid in [json!(0), json!(101), json!("many")] {
        let (status, _) = send_json(&app, request(invalid)).await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
    }

    let (status, body) = send_json(
        &app,
        post(
            "/api/common/real",
            json!({"tagName": "A", "endTimeStr": "1900-01-01 00:00:00", "timeSpan": i64::MAX}),
        ),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!(json!({"error": "timeSpan is too large"}), body);
    assert!(app.mock.history_requests().is_empty());

    // One point per minute ending at 2024-01-01 12:00 plant time
    let end = 1_704_081_600_000_i64;
    app.mock.set_history(Some(
        (0..20)
            .map(|i| json!({"t": end - (19 - i) * 60_000, "A": i}))
            .collect(),
    ));

    let (status, body) = send_json(&app, request(Value::Null)).await;
    assert_eq!(StatusCode::OK, status);
    let series = body.as_object().unwrap();
    assert_eq!(12, series.len());
    assert_eq!(Some(&json!(19.0)), series.get("2024-01-01 12:00"));
    assert!(series.get("2024-01-01 11:48").is_none());
}

#[tokio::test]
async fn test_common_reason_not_implemented() {
    let app = app().await;
    let (status, body) = send_json(&app, get("/api/common/getReason")).await;

    assert_eq!(StatusCode::NOT_IMPLEMENTED, status);
    assert_eq!(json!({"message": "This endpoint is not implemented yet"}), body);
}

#[tokio::test]
async fn test_common_tag_names() {
    let app = app().await;

    let (status, body) = send_json(&app, post("/api/common/getTagNames", json!({}))).await;
    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!(json!({"error": "keywords is required"}), body);

    let (status, body) = send_json(&app, post("/api/common/getTagNames", json!({"keywords": "给水流量"}))).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!({"JCYY:U4_GSLL": "给水流量"}), body);

    let (status, body) = send_json(&app, post("/api/common/getTagNames", json!({"keywords": "zzzzzz"}))).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!({}), body);
}

#[tokio::test]
async fn test_database_query() {
    let app = app().await;

    let (status, body) = send_json(&app, post("/api/database/query", json!({"sql": ""}))).await;
    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!(json!({"error": "SQL query is required"}), body);

    let (status, body) = send_json(&app, post("/api/database/query", json!({"sql": "SELECT * FROM nope"}))).await;
    assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, status);
    assert!(body["error"].is_string());

    let snapshot = BTreeMap::from([("sh_temp".to_owned(), Some(-0.5))]);
    app.store.insert_snapshot(&snapshot).await.unwrap();
    let (status, body) = send_json(
        &app,
        post("/api/database/query", json!({"sql": "SELECT id, sh_temp FROM HCFX"})),
    )
    .await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!([{"id": 1, "sh_temp": -0.5}]), body);
}

#[tokio::test]
async fn test_malformed_json() {
    let app = app().await;
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/database/query")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send_json(&app, req).await;
    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_generate_word() {
    let app = app().await;
    let req = post(
        "/api/generate/word",
        json!({
            "content": "第一段\n第二段",
            "options": {"title": "周报", "table": {"data": [["a", "b"], ["1", "2"]]}},
            "filename": "周报.docx",
        }),
    );

    let (status, body, headers) = send(&app, req).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        headers[CONTENT_TYPE]
    );
    assert_eq!(
        "attachment; filename=\"__.docx\"; filename*=UTF-8''%E5%91%A8%E6%8A%A5.docx",
        headers[CONTENT_DISPOSITION]
    );

    let mut archive = zip::ZipArchive::new(Cursor::new(body)).unwrap();
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .unwrap()
        .read_to_string(&mut xml)
        .unwrap();
    assert!(xml.contains("周报"));
    assert!(xml.contains("第二段"));
    assert!(xml.contains("<w:tbl>"));
}

#[tokio::test]
async fn test_generate_pdf() {
    let app = app().await;
    let (status, body, headers) = send(&app, post("/api/generate/pdf", json!({"content": "Line one"}))).await;

    assert_eq!(StatusCode::OK, status);
    assert_eq!("application/pdf", headers[CONTENT_TYPE]);
    assert_eq!(
        "attachment; filename=\"document.pdf\"; filename*=UTF-8''document.pdf",
        headers[CONTENT_DISPOSITION]
    );
    assert!(body.starts_with(b"%PDF-"));
    assert!(body.ends_with(b"%%EOF\n"));
}

#[tokio::test]
async fn test_metrics() {
    let app = app().await;
    send(&app, post("/api/generate/pdf", json!({}))).await;

    let (status, body, headers) = send(&app, get("/metrics")).await;
    let text = String::from_utf8(body).unwrap();

    assert_eq!(StatusCode::OK, status);
    assert!(headers[CONTENT_TYPE].to_str().unwrap().starts_with("application/openmetrics-text"));
    assert!(text.contains("powerplant_documents_rendered_total{format=\"Pdf\"} 1"));
}
