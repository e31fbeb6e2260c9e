//! Session behaviour against a recording transport.

use serde_json::{json, Value};
use spot::transport::TransportError;
use spot::{
    Auth, Body, Grant, Method, Request, RequestOptions, Response, Session, SessionOptions, Token,
    Transport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers token requests with numbered tokens and API requests with 200,
/// recording everything it sees
#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<Request>>,
    issued: Mutex<u32>,
    api_status: Mutex<Option<u16>>,
}

impl Recorder {
    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    fn token_requests(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url.ends_with("/oauth/token"))
            .count()
    }

    fn last(&self) -> Request {
        self.requests().last().cloned().unwrap()
    }
}

impl Transport for Recorder {
    fn send(&self, request: Request) -> Result<Response, TransportError> {
        let is_token = request.url.ends_with("/oauth/token");
        self.requests.lock().unwrap().push(request);

        if is_token {
            let mut issued = self.issued.lock().unwrap();
            *issued += 1;
            let body = json!({
                "access_token": format!("token-{}", *issued),
                "token_type": "Bearer",
                "expires_in": 3599,
                "scope": "test"
            });
            return Ok(Response::new(200, body.to_string()));
        }

        let status = self.api_status.lock().unwrap().unwrap_or(200);
        Ok(Response::new(status, r#"{"success":true}"#)
            .with_header("Content-Type", "application/json"))
    }
}

fn grant() -> Grant {
    Grant::ClientCredentials {
        identity_url: "test/identity".to_string(),
        client_id: "test".to_string(),
        client_secret: "test".to_string(),
    }
}

fn expired_token() -> Token {
    let mut token = Token::new("stale", "Bearer", 3599);
    token.created_at = chrono::Utc::now() - chrono::Duration::seconds(3600);
    token
}

fn session_with(auth: Auth, options: SessionOptions) -> (Session, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let session = Session::with_options("test", auth, recorder.clone(), options);
    (session, recorder)
}

#[test]
fn test_get_composes_rest_url() {
    let (mut session, recorder) = session_with(Auth::new(grant()), SessionOptions::default());

    session.get("foo", RequestOptions::new()).unwrap();
    assert_eq!(recorder.last().url, "test/rest/v1/foo");

    session.get("/foo", RequestOptions::new()).unwrap();
    assert_eq!(recorder.last().url, "test/rest/v1/foo");
}

#[test]
fn test_auto_base_disabled_keeps_url() {
    let options = SessionOptions {
        auto_base: false,
        version: 1,
    };
    let (mut session, recorder) = session_with(Auth::new(grant()), options);

    session.get("foo", RequestOptions::new()).unwrap();
    assert_eq!(recorder.last().url, "foo");
}

#[test]
fn test_caller_headers_are_preserved() {
    let (mut session, recorder) = session_with(Auth::new(grant()), SessionOptions::default());

    session
        .get("foo", RequestOptions::new().header("X", "Y"))
        .unwrap();

    let request = recorder.last();
    assert_eq!(request.header("X"), Some("Y"));
    assert_eq!(request.header("Authorization"), Some("Bearer token-1"));
}

#[test]
fn test_caller_authorization_is_overwritten() {
    let (mut session, recorder) = session_with(Auth::new(grant()), SessionOptions::default());

    session
        .get("foo", RequestOptions::new().header("authorization", "Basic xyz"))
        .unwrap();

    let request = recorder.last();
    assert_eq!(request.headers.len(), 1);
    assert_eq!(request.header("Authorization"), Some("Bearer token-1"));
}

#[test]
fn test_expired_token_refreshed_exactly_once() {
    let (mut session, recorder) = session_with(
        Auth::with_token(grant(), expired_token()),
        SessionOptions::default(),
    );

    let auth = session.auth().unwrap();
    assert!(!auth.expired());
    assert_eq!(auth.access_token(), Some("token-1"));
    assert_eq!(recorder.token_requests(), 1);

    session.get("a", RequestOptions::new()).unwrap();
    session.post("b", RequestOptions::new()).unwrap();
    assert_eq!(recorder.token_requests(), 1);
}

#[test]
fn test_valid_token_is_not_refreshed() {
    let token = Token::new("fresh", "Bearer", 3599);
    let (mut session, recorder) =
        session_with(Auth::with_token(grant(), token), SessionOptions::default());

    assert_eq!(session.auth_header().unwrap(), "Bearer fresh");
    session.delete("contacts/1", RequestOptions::new()).unwrap();
    assert_eq!(recorder.token_requests(), 0);
    assert_eq!(recorder.last().header("Authorization"), Some("Bearer fresh"));
}

#[test]
fn test_forced_refresh_supersedes_token() {
    let (mut session, _recorder) = session_with(Auth::new(grant()), SessionOptions::default());

    let old = session.refresh_auth_token().unwrap().token().cloned().unwrap();
    let new = session.refresh_auth_token().unwrap().token().cloned().unwrap();

    assert_ne!(new.access_token, old.access_token);
    assert!(old.created_at < new.created_at);
    assert!(old.expires_at() < new.expires_at());
}

#[test]
fn test_verbs_and_pass_through_options() {
    let (mut session, recorder) = session_with(Auth::new(grant()), SessionOptions::default());

    session
        .post(
            "leads.json",
            RequestOptions::new()
                .query("access", "x")
                .json(json!({"input": [{"email": "a@example.com"}]})),
        )
        .unwrap();
    let request = recorder.last();
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.query, vec![("access".to_string(), "x".to_string())]);
    assert!(matches!(request.body, Some(Body::Json(_))));

    session
        .put("leads/1.json", RequestOptions::new().text("raw"))
        .unwrap();
    assert_eq!(recorder.last().method, Method::Put);
    assert_eq!(recorder.last().body, Some(Body::Text("raw".to_string())));

    session
        .delete(
            "leads/1.json",
            RequestOptions::new()
                .form(&[("reason", "dup")])
                .timeout(Duration::from_secs(5)),
        )
        .unwrap();
    let request = recorder.last();
    assert_eq!(request.method, Method::Delete);
    assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    assert_eq!(
        request.body,
        Some(Body::Form(vec![("reason".to_string(), "dup".to_string())]))
    );
}

#[test]
fn test_error_status_passes_through() {
    let (mut session, recorder) = session_with(Auth::new(grant()), SessionOptions::default());
    *recorder.api_status.lock().unwrap() = Some(503);

    let response = session.get("foo", RequestOptions::new()).unwrap();
    assert_eq!(response.status(), 503);
    assert!(!response.is_success());

    let body: Value = response.json().unwrap();
    assert_eq!(body["success"], true);
}
