//! Integration tests for the roster backend.

use std::sync::Arc;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::db::{init_database, Repository};
use crate::engine::UpdateEngine;
use crate::identity::IdMode;
use crate::models::IdentityClaims;
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    repo: Arc<Repository>,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_mode(IdMode::Random).await
    }

    async fn with_mode(mode: IdMode) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));
        let engine = Arc::new(UpdateEngine::new((*repo).clone(), mode));

        let state = AppState {
            repo: repo.clone(),
            engine,
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        TestFixture {
            client: Client::new(),
            base_url,
            repo,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn create_student(&self, body: Value) -> Value {
        let resp = self
            .client
            .post(self.url("/students"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_create_returns_edit_token_exactly_once() {
    let fixture = TestFixture::new().await;

    let create_body = fixture.create_student(json!({ "name": "Alice" })).await;
    assert_eq!(create_body["success"], true);
    assert_eq!(create_body["data"]["name"], "Alice");
    assert_eq!(create_body["data"]["version"], 1);

    let student_id = create_body["data"]["id"].as_str().unwrap();
    assert_eq!(student_id.len(), 32);
    let token = create_body["data"]["editToken"].as_str().unwrap();
    assert!(!token.is_empty());

    // The token never appears on reads
    let get_resp = fixture
        .client
        .get(fixture.url(&format!("/students/{}", student_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(get_resp.status(), 200);
    let get_body: Value = get_resp.json().await.unwrap();
    assert_eq!(get_body["data"]["name"], "Alice");
    assert_eq!(get_body["data"]["version"], 1);
    assert!(get_body["data"].get("editToken").is_none());
}

#[tokio::test]
async fn test_update_bumps_version_and_snapshots_history() {
    let fixture = TestFixture::new().await;

    let create_body = fixture.create_student(json!({ "name": "Alice" })).await;
    let student_id = create_body["data"]["id"].as_str().unwrap().to_string();
    let token = create_body["data"]["editToken"].as_str().unwrap().to_string();

    let update_resp = fixture
        .client
        .put(fixture.url(&format!("/students/{}", student_id)))
        .json(&json!({ "editToken": token, "name": "Alicia" }))
        .send()
        .await
        .unwrap();
    assert_eq!(update_resp.status(), 200);
    let update_body: Value = update_resp.json().await.unwrap();
    assert_eq!(update_body["data"]["name"], "Alicia");
    assert_eq!(update_body["data"]["version"], 2);
    assert!(update_body["data"].get("editToken").is_none());

    let history_resp = fixture
        .client
        .get(fixture.url(&format!("/students/{}/history", student_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(history_resp.status(), 200);
    let history_body: Value = history_resp.json().await.unwrap();
    let entries = history_body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["version"], 1);
    assert_eq!(entries[0]["snapshot"]["name"], "Alice");
    assert_eq!(entries[0]["studentId"], student_id.as_str());
}

#[tokio::test]
async fn test_update_with_wrong_token_is_rejected() {
    let fixture = TestFixture::new().await;

    let create_body = fixture.create_student(json!({ "name": "Alice" })).await;
    let student_id = create_body["data"]["id"].as_str().unwrap().to_string();

    let update_resp = fixture
        .client
        .put(fixture.url(&format!("/students/{}", student_id)))
        .json(&json!({ "editToken": "wrong-token", "name": "Mallory" }))
        .send()
        .await
        .unwrap();
    assert_eq!(update_resp.status(), 403);
    let body: Value = update_resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    // Record and history are untouched
    let get_resp = fixture
        .client
        .get(fixture.url(&format!("/students/{}", student_id)))
        .send()
        .await
        .unwrap();
    let get_body: Value = get_resp.json().await.unwrap();
    assert_eq!(get_body["data"]["name"], "Alice");
    assert_eq!(get_body["data"]["version"], 1);

    let history_resp = fixture
        .client
        .get(fixture.url(&format!("/students/{}/history", student_id)))
        .send()
        .await
        .unwrap();
    let history_body: Value = history_resp.json().await.unwrap();
    assert!(history_body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_update_without_token_is_rejected() {
    let fixture = TestFixture::new().await;

    let create_body = fixture.create_student(json!({})).await;
    let student_id = create_body["data"]["id"].as_str().unwrap().to_string();

    let update_resp = fixture
        .client
        .put(fixture.url(&format!("/students/{}", student_id)))
        .json(&json!({ "name": "Mallory" }))
        .send()
        .await
        .unwrap();
    assert_eq!(update_resp.status(), 403);
}

#[tokio::test]
async fn test_repeated_updates_keep_history_contiguous() {
    let fixture = TestFixture::new().await;

    let create_body = fixture.create_student(json!({ "name": "v1" })).await;
    let student_id = create_body["data"]["id"].as_str().unwrap().to_string();
    let token = create_body["data"]["editToken"].as_str().unwrap().to_string();

    for i in 2..=4 {
        let resp = fixture
            .client
            .put(fixture.url(&format!("/students/{}", student_id)))
            .json(&json!({ "editToken": token, "name": format!("v{}", i) }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["version"], i);
    }

    let history_resp = fixture
        .client
        .get(fixture.url(&format!("/students/{}/history", student_id)))
        .send()
        .await
        .unwrap();
    let history_body: Value = history_resp.json().await.unwrap();
    let versions: Vec<i64> = history_body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["version"].as_i64().unwrap())
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_student_not_found() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/students/non-existent-id"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let history_resp = fixture
        .client
        .get(fixture.url("/students/non-existent-id/history"))
        .send()
        .await
        .unwrap();
    assert_eq!(history_resp.status(), 404);
}

#[tokio::test]
async fn test_derived_mode_upsert_by_dob_and_phone() {
    let fixture = TestFixture::with_mode(IdMode::Derived).await;

    let create_body = fixture
        .create_student(json!({
            "dob": "20010403",
            "phone": "09012345678",
            "name": "Alice"
        }))
        .await;
    assert_eq!(create_body["data"]["id"], "2001040309012345678");
    assert_eq!(create_body["data"]["version"], 1);
    assert!(create_body["data"].get("editToken").is_none());

    // Same pair again: an in-place update, not a second record
    let again_body = fixture
        .create_student(json!({
            "dob": "20010403",
            "phone": "09012345678",
            "name": "Alicia"
        }))
        .await;
    assert_eq!(again_body["data"]["id"], "2001040309012345678");
    assert_eq!(again_body["data"]["version"], 2);

    let history_resp = fixture
        .client
        .get(fixture.url("/students/2001040309012345678/history"))
        .send()
        .await
        .unwrap();
    let history_body: Value = history_resp.json().await.unwrap();
    let entries = history_body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["version"], 1);
    assert_eq!(entries[0]["snapshot"]["name"], "Alice");
}

#[tokio::test]
async fn test_derived_mode_rejects_malformed_fields() {
    let fixture = TestFixture::with_mode(IdMode::Derived).await;

    let resp = fixture
        .client
        .post(fixture.url("/students"))
        .json(&json!({
            "dob": "2001-04-03",
            "phone": "09012345678",
            "name": "Alice"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let resp2 = fixture
        .client
        .post(fixture.url("/students"))
        .json(&json!({
            "dob": "20010403",
            "phone": "12345",
            "name": "Alice"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp2.status(), 400);

    // Nothing was persisted
    let get_resp = fixture
        .client
        .get(fixture.url("/students/2001040309012345678"))
        .send()
        .await
        .unwrap();
    assert_eq!(get_resp.status(), 404);
}

#[tokio::test]
async fn test_derived_mode_update_needs_no_token() {
    let fixture = TestFixture::with_mode(IdMode::Derived).await;

    fixture
        .create_student(json!({
            "dob": "20010403",
            "phone": "09012345678",
            "name": "Alice"
        }))
        .await;

    // Knowing the id is knowing the identity fields it was built from
    let update_resp = fixture
        .client
        .put(fixture.url("/students/2001040309012345678"))
        .json(&json!({ "phone": "08099998888" }))
        .send()
        .await
        .unwrap();
    assert_eq!(update_resp.status(), 200);
    let update_body: Value = update_resp.json().await.unwrap();
    assert_eq!(update_body["data"]["version"], 2);
    assert_eq!(update_body["data"]["phone"], "08099998888");
    // The id stays fixed even though the phone under it changed
    assert_eq!(update_body["data"]["id"], "2001040309012345678");
}

#[tokio::test]
async fn test_name_length_is_validated() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/students"))
        .json(&json!({ "name": "x".repeat(101) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_anonymous_submission_roundtrip() {
    let fixture = TestFixture::new().await;

    let create_resp = fixture
        .client
        .post(fixture.url("/submissions"))
        .json(&json!({ "payload": { "answer": 42 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(create_resp.status(), 200);
    let create_body: Value = create_resp.json().await.unwrap();
    assert_eq!(create_body["success"], true);
    assert_eq!(create_body["data"]["payload"]["answer"], 42);
    assert!(create_body["data"].get("userSubject").is_none());
    assert!(create_body["data"]["createdAt"].is_string());

    let submission_id = create_body["data"]["id"].as_str().unwrap();

    let get_resp = fixture
        .client
        .get(fixture.url(&format!("/submissions/{}", submission_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(get_resp.status(), 200);
    let get_body: Value = get_resp.json().await.unwrap();
    assert_eq!(get_body["data"]["payload"]["answer"], 42);
    assert!(get_body["data"].get("userName").is_none());

    // The stored row round-trips through the repository as well
    let stored = fixture
        .repo
        .get_submission(submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payload, json!({ "answer": 42 }));
    assert!(stored.user_subject.is_none());
}

#[tokio::test]
async fn test_submissions_list_newest_first_with_limit() {
    let fixture = TestFixture::new().await;

    for i in 1..=3 {
        let resp = fixture
            .client
            .post(fixture.url("/submissions"))
            .json(&json!({ "payload": { "seq": i } }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }

    let list_resp = fixture
        .client
        .get(fixture.url("/submissions?limit=2"))
        .send()
        .await
        .unwrap();
    assert_eq!(list_resp.status(), 200);
    let list_body: Value = list_resp.json().await.unwrap();
    let items = list_body["data"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["payload"]["seq"], 3);
    assert_eq!(items[1]["payload"]["seq"], 2);
}

#[tokio::test]
async fn test_submission_not_found() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/submissions/non-existent-id"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_submission_linked_to_user_identity() {
    let fixture = TestFixture::new().await;

    // The login flow lives outside this service; seed the identity mirror
    // the way it would.
    fixture
        .repo
        .upsert_identity(&IdentityClaims {
            subject: "provider-sub-1".to_string(),
            email: Some("alice@example.com".to_string()),
            name: Some("Alice Stored".to_string()),
            picture: None,
        })
        .await
        .unwrap();

    let create_resp = fixture
        .client
        .post(fixture.url("/submissions"))
        .json(&json!({
            "payload": { "identity": { "name": "Alice Typed" }, "answer": 1 },
            "userSubject": "provider-sub-1"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(create_resp.status(), 200);
    let create_body: Value = create_resp.json().await.unwrap();
    let submission_id = create_body["data"]["id"].as_str().unwrap();

    let get_resp = fixture
        .client
        .get(fixture.url(&format!("/submissions/{}", submission_id)))
        .send()
        .await
        .unwrap();
    let get_body: Value = get_resp.json().await.unwrap();
    assert_eq!(get_body["data"]["userSubject"], "provider-sub-1");
    assert_eq!(get_body["data"]["userEmail"], "alice@example.com");
    // The stored identity wins over the name typed into the payload
    assert_eq!(get_body["data"]["userName"], "Alice Stored");
}

#[tokio::test]
async fn test_submission_payload_name_is_fallback_only() {
    let fixture = TestFixture::new().await;

    fixture
        .repo
        .upsert_identity(&IdentityClaims {
            subject: "provider-sub-2".to_string(),
            email: None,
            name: None,
            picture: None,
        })
        .await
        .unwrap();

    let create_resp = fixture
        .client
        .post(fixture.url("/submissions"))
        .json(&json!({
            "payload": { "identity": { "name": "Bob Typed" } },
            "userSubject": "provider-sub-2"
        }))
        .send()
        .await
        .unwrap();
    let create_body: Value = create_resp.json().await.unwrap();
    let submission_id = create_body["data"]["id"].as_str().unwrap();

    let get_resp = fixture
        .client
        .get(fixture.url(&format!("/submissions/{}", submission_id)))
        .send()
        .await
        .unwrap();
    let get_body: Value = get_resp.json().await.unwrap();
    assert_eq!(get_body["data"]["userName"], "Bob Typed");
}

#[tokio::test]
async fn test_submission_with_unknown_user_is_rejected() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/submissions"))
        .json(&json!({
            "payload": { "answer": 42 },
            "userSubject": "never-logged-in"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_identity_claims_refresh_on_every_login() {
    let fixture = TestFixture::new().await;

    let first = fixture
        .repo
        .upsert_identity(&IdentityClaims {
            subject: "provider-sub-3".to_string(),
            email: Some("old@example.com".to_string()),
            name: Some("Old Name".to_string()),
            picture: None,
        })
        .await
        .unwrap();

    let second = fixture
        .repo
        .upsert_identity(&IdentityClaims {
            subject: "provider-sub-3".to_string(),
            email: Some("new@example.com".to_string()),
            name: Some("New Name".to_string()),
            picture: Some("https://example.com/p.png".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.email.as_deref(), Some("new@example.com"));
    assert_eq!(second.name.as_deref(), Some("New Name"));

    let stored = fixture
        .repo
        .get_identity("provider-sub-3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.email.as_deref(), Some("new@example.com"));
    assert_eq!(stored.picture.as_deref(), Some("https://example.com/p.png"));
}
