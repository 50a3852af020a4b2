use later_core::{AuthClient, AuthError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn request_token_returns_code() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/oauth/request"))
        .and(header("X-Accept", "application/json"))
        .and(body_partial_json(json!({
            "consumer_key": "consumer",
            "redirect_uri": "laterd:authorization-finished"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "req-token" })))
        .mount(&server)
        .await;

    let client =
        AuthClient::with_base_url(&server.uri(), "consumer", "laterd:authorization-finished")
            .unwrap();
    let code = client.request_token().await.unwrap();

    assert_eq!(code, "req-token");
}

#[tokio::test]
async fn authorize_url_carries_token_and_redirect() {
    let client = AuthClient::with_base_url(
        "https://auth.example",
        "consumer",
        "laterd:authorization-finished",
    )
    .unwrap();

    let url = client.authorize_url("req-token").unwrap();

    assert_eq!(url.path(), "/auth/authorize");
    assert!(
        url.query_pairs()
            .any(|(key, value)| key == "request_token" && value == "req-token")
    );
}

#[tokio::test]
async fn access_token_returns_grant() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/oauth/authorize"))
        .and(body_partial_json(json!({
            "consumer_key": "consumer",
            "code": "req-token"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-token",
            "username": "reader"
        })))
        .mount(&server)
        .await;

    let client =
        AuthClient::with_base_url(&server.uri(), "consumer", "laterd:authorization-finished")
            .unwrap();
    let grant = client.access_token("req-token").await.unwrap();

    assert_eq!(grant.access_token, "access-token");
    assert_eq!(grant.username, "reader");
}

#[tokio::test]
async fn access_token_surfaces_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/oauth/authorize"))
        .respond_with(ResponseTemplate::new(403).set_body_string("code not approved"))
        .mount(&server)
        .await;

    let client =
        AuthClient::with_base_url(&server.uri(), "consumer", "laterd:authorization-finished")
            .unwrap();
    let err = client.access_token("req-token").await.unwrap_err();

    match err {
        AuthError::Api { status, body } => {
            assert_eq!(status.as_u16(), 403);
            assert_eq!(body, "code not approved");
        }
        other => panic!("unexpected error: {other}"),
    }
}
