//! End-to-end behavior of the token refresh chain and the 401 retry
//! contract, against a mock upstream.

use std::collections::HashMap;

use mockito::Matcher;
use serde_json::json;

use hakotalk::client::{Client, ClientOptions, Group};
use hakotalk::error::HakoError;

fn cookie_map(name: &str, value: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    cookies.insert(name.to_string(), value.to_string());
    cookies
}

fn client_against(server: &mockito::Server, options: ClientOptions) -> Client {
    Client::new(
        Group::Nogizaka46,
        ClientOptions {
            api_base: Some(server.url()),
            ..options
        },
    )
    .unwrap()
}

/// With refresh token, cookies, and a browser profile all present, a failing
/// token path falls through to the cookie path; once that succeeds the
/// (expensive) headless path is never reached and the cookie rotation from
/// the response replaces the held value.
#[tokio::test]
async fn chain_falls_through_token_to_cookie() {
    let mut server = mockito::Server::new_async().await;
    let token_attempt = server
        .mock("POST", "/update_token")
        .match_body(Matcher::Json(json!({"refresh_token": "rt-dead"})))
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let cookie_attempt = server
        .mock("POST", "/update_token")
        .match_body(Matcher::Json(json!({"refresh_token": null})))
        .match_header("cookie", "session=rot1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("set-cookie", "session=rot2; Path=/; HttpOnly")
        .with_body(r#"{"access_token":"at-cookie"}"#)
        .expect(1)
        .create_async()
        .await;

    // A real (empty) profile directory makes the headless strategy
    // available; reaching it would try to launch a browser and fail loudly.
    let profile = tempfile::tempdir().unwrap();
    let mut client = client_against(
        &server,
        ClientOptions {
            access_token: Some("expired".to_string()),
            refresh_token: Some("rt-dead".to_string()),
            cookies: Some(cookie_map("session", "rot1")),
            auth_dir: Some(profile.path().to_path_buf()),
            ..Default::default()
        },
    );

    let refreshed = client.refresh_access_token().await.unwrap();
    assert!(refreshed);
    token_attempt.assert_async().await;
    cookie_attempt.assert_async().await;

    assert_eq!(
        client.authorization_header().unwrap().as_bytes(),
        b"Bearer at-cookie"
    );
    // The observed rotation replaced the stale value.
    let cookies = client.session().cookies.as_ref().unwrap();
    assert_eq!(cookies.get("session").map(String::as_str), Some("rot2"));
}

/// A structured invalidation from the cookie path aborts the whole chain:
/// the error propagates and headless re-auth is never silently attempted,
/// even though a profile directory exists.
#[tokio::test]
async fn invalidation_short_circuits_the_chain() {
    let mut server = mockito::Server::new_async().await;
    let cookie_attempt = server
        .mock("POST", "/update_token")
        .match_body(Matcher::Json(json!({"refresh_token": null})))
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code":"invalid_parameter"}"#)
        .expect(1)
        .create_async()
        .await;

    let profile = tempfile::tempdir().unwrap();
    let mut client = client_against(
        &server,
        ClientOptions {
            access_token: Some("expired".to_string()),
            cookies: Some(cookie_map("session", "v1")),
            auth_dir: Some(profile.path().to_path_buf()),
            ..Default::default()
        },
    );

    let err = client.refresh_access_token().await.unwrap_err();
    cookie_attempt.assert_async().await;
    assert!(matches!(err, HakoError::SessionExpired));
    // The stale bearer is untouched after an aborted chain.
    assert_eq!(
        client.authorization_header().unwrap().as_bytes(),
        b"Bearer expired"
    );
}

/// A 401 triggers one refresh and one retry; a second 401 yields absence
/// after exactly two request attempts, never a third.
#[tokio::test]
async fn fetch_json_retries_exactly_once() {
    let mut server = mockito::Server::new_async().await;
    let profile_endpoint = server
        .mock("GET", "/profile")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/update_token")
        .match_body(Matcher::Json(json!({"refresh_token": "rt-1"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"at-2"}"#)
        .expect(1)
        .create_async()
        .await;

    let mut client = client_against(
        &server,
        ClientOptions {
            access_token: Some("at-1".to_string()),
            refresh_token: Some("rt-1".to_string()),
            ..Default::default()
        },
    );

    let result = client.get_profile().await.unwrap();
    assert!(result.is_none());
    profile_endpoint.assert_async().await;
    refresh.assert_async().await;
}

/// A 5xx is surfaced as a server error, never swallowed into absence.
#[tokio::test]
async fn fetch_json_surfaces_server_errors() {
    let mut server = mockito::Server::new_async().await;
    let profile_endpoint = server
        .mock("GET", "/profile")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    let mut client = client_against(
        &server,
        ClientOptions {
            access_token: Some("at-1".to_string()),
            ..Default::default()
        },
    );

    let err = client.get_profile().await.unwrap_err();
    profile_endpoint.assert_async().await;
    match err {
        HakoError::Api { status, endpoint } => {
            assert_eq!(status, 503);
            assert_eq!(endpoint, "/profile");
        }
        other => panic!("expected Api error, got {:?}", other),
    }
}

/// Fetching a timeline with `since_id` retains only strictly newer
/// messages; a null continuation terminates after one page.
#[tokio::test]
async fn get_messages_stops_at_since_id() {
    let mut server = mockito::Server::new_async().await;
    let timeline = server
        .mock("GET", "/groups/1/timeline")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("count".to_string(), "200".to_string()),
            Matcher::UrlEncoded("order".to_string(), "desc".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"messages":[{"id":100},{"id":50},{"id":30}],"continuation":null}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let mut client = client_against(
        &server,
        ClientOptions {
            access_token: Some("at-1".to_string()),
            ..Default::default()
        },
    );

    let messages = client.get_messages(1, Some(60), None).await.unwrap();
    timeline.assert_async().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], 100);
}

/// Descending pages are followed via the continuation cursor and returned
/// ascending, deduplicated by id.
#[tokio::test]
async fn get_messages_follows_continuation() {
    let mut server = mockito::Server::new_async().await;
    let first_page = server
        .mock("GET", "/groups/1/timeline")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("count".to_string(), "200".to_string()),
            Matcher::UrlEncoded("order".to_string(), "desc".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"messages":[{"id":100},{"id":90}],"continuation":"c1"}"#)
        .expect(1)
        .create_async()
        .await;
    let second_page = server
        .mock("GET", "/groups/1/timeline")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("continuation".to_string(), "c1".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"messages":[{"id":90},{"id":80}],"continuation":null}"#)
        .expect(1)
        .create_async()
        .await;

    let mut client = client_against(
        &server,
        ClientOptions {
            access_token: Some("at-1".to_string()),
            ..Default::default()
        },
    );

    let messages = client.get_messages(1, None, None).await.unwrap();
    first_page.assert_async().await;
    second_page.assert_async().await;

    let ids: Vec<i64> = messages.iter().filter_map(|m| m["id"].as_i64()).collect();
    assert_eq!(ids, [80, 90, 100]);
}
