use super::*;
use crate::test_helpers::STUB_PDF;
use crate::types::{Event, JobId};
use axum::http::header;

fn submit_request(proposal: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/proposals/{proposal}/export"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: String) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn submit(app: &Router, proposal: &str) -> JobId {
    let response = app
        .clone()
        .oneshot(submit_request(proposal, "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    json_body(response).await["jobId"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap()
}

async fn wait_completed(service: &ExportService, job_id: &JobId) {
    let mut events = service.subscribe();
    let proposal = crate::types::ProposalId::new("acme").unwrap();
    if service
        .job_status(&proposal, job_id)
        .await
        .unwrap()
        .is_terminal()
    {
        return;
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Event::Completed { job_id: done, .. } = events.recv().await.unwrap()
                && &done == job_id
            {
                break;
            }
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_submit_returns_accepted() {
    let (app, _service, _dir) = test_router(StubRenderer::default()).await;

    let response = app
        .oneshot(submit_request(
            "acme",
            r#"{"method":"office","quality":"draft","landscape":true}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert!(uuid::Uuid::parse_str(body["jobId"].as_str().unwrap()).is_ok());
    assert_eq!(body["method"], "office");
    assert!(body["estimatedTime"].as_u64().is_some());
}

#[tokio::test]
async fn test_submit_rejects_invalid_options() {
    let (app, _service, _dir) = test_router(StubRenderer::default()).await;

    let response = app
        .clone()
        .oneshot(submit_request(
            "acme",
            r#"{"margins":{"top":-5,"right":10,"bottom":10,"left":10}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "validation_error");
    assert_eq!(body["details"]["field"], "margins.top");

    let response = app
        .oneshot(submit_request("acme", "{not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "validation_error");
}

#[tokio::test]
async fn test_submit_during_shutdown_is_unavailable() {
    let (app, service, _dir) = test_router(StubRenderer::default()).await;
    service.shutdown().await.unwrap();

    let response = app.oneshot(submit_request("acme", "{}")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["code"], "shutting_down");
}

#[tokio::test]
async fn test_status_reports_only_valid_fields() {
    let (app, service, _dir) = test_router(StubRenderer::default()).await;
    let job_id = submit(&app, "acme").await;
    wait_completed(&service, &job_id).await;

    let response = app
        .oneshot(get(format!("/api/proposals/acme/export/status?jobId={job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress"], 100);
    assert_eq!(body["fileSize"], STUB_PDF.len() as u64);
    assert_eq!(body["filePath"], format!("{job_id}.pdf"));
    assert_eq!(body["method"], "browser");
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_status_errors() {
    let (app, _service, _dir) = test_router(StubRenderer::default()).await;
    let job_id = submit(&app, "acme").await;

    let cases = [
        (format!("/api/proposals/acme/export/status?jobId={}", JobId::new()), StatusCode::NOT_FOUND),
        (format!("/api/proposals/other/export/status?jobId={job_id}"), StatusCode::NOT_FOUND),
        ("/api/proposals/acme/export/status".to_string(), StatusCode::BAD_REQUEST),
        ("/api/proposals/acme/export/status?jobId=".to_string(), StatusCode::BAD_REQUEST),
        // Job IDs are opaque, so an unknown one is simply not found
        ("/api/proposals/acme/export/status?jobId=42".to_string(), StatusCode::NOT_FOUND),
    ];
    for (uri, expected) in cases {
        let response = app.clone().oneshot(get(uri.clone())).await.unwrap();
        assert_eq!(response.status(), expected, "{uri}");
    }
}

#[tokio::test]
async fn test_download_before_completion_conflicts() {
    let renderer = StubRenderer {
        delay: Duration::from_secs(30),
        ..Default::default()
    };
    let (app, service, _dir) = test_router(renderer).await;
    let job_id = submit(&app, "acme").await;

    let response = app
        .oneshot(get(format!("/api/proposals/acme/export/download?jobId={job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "invalid_state");
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_download_serves_pdf_attachment() {
    let (app, service, _dir) = test_router(StubRenderer::default()).await;
    let job_id = submit(&app, "acme").await;
    wait_completed(&service, &job_id).await;

    let response = app
        .oneshot(get(format!("/api/proposals/acme/export/download?jobId={job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/pdf"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment;"));
    assert!(disposition.contains("acme.pdf"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], STUB_PDF);
}

#[tokio::test]
async fn test_events_stream_ends_after_terminal_event() {
    let renderer = StubRenderer {
        delay: Duration::from_millis(200),
        ..Default::default()
    };
    let (app, _service, _dir) = test_router(renderer).await;
    let job_id = submit(&app, "acme").await;

    let response = app
        .oneshot(get(format!("/api/proposals/acme/export/events?jobId={job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .contains("text/event-stream")
    );

    // Collecting the whole body only returns because the stream ends
    let body = tokio::time::timeout(
        Duration::from_secs(5),
        axum::body::to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("event stream did not end")
    .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.starts_with("event: status\n"), "{text}");
    let completed = text.find("event: completed").expect("completed event");
    assert!(text[completed..].contains(&format!("\"file_size\":{}", STUB_PDF.len())));
    assert!(!text.contains("event: failed"));
}

#[tokio::test]
async fn test_events_for_finished_job_is_a_single_snapshot() {
    let (app, service, _dir) = test_router(StubRenderer::default()).await;
    let job_id = submit(&app, "acme").await;
    wait_completed(&service, &job_id).await;

    let response = app
        .oneshot(get(format!("/api/proposals/acme/export/events?jobId={job_id}")))
        .await
        .unwrap();
    let body = tokio::time::timeout(
        Duration::from_secs(5),
        axum::body::to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .unwrap()
    .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert_eq!(text.matches("event: ").count(), 1, "{text}");
    assert!(text.contains("\"status\":\"completed\""));
}
