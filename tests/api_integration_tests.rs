use dotenv::dotenv;
use food_rag::api_connection::{ApiConnectionError, GenerationService, Prompt, Provider};
use reqwest::StatusCode;
use std::env;
use std::time::Duration;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const TEST_API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";
const MOCK_KEY_ENV_VAR: &str = "FOOD_RAG_MOCK_API_KEY";
const COMPLETIONS_PATH: &str = "/v1/chat/completions";

fn setup_test_environment() {
    dotenv().ok();
    // Only ever set to the same dummy value, so parallel tests agree.
    unsafe {
        env::set_var(MOCK_KEY_ENV_VAR, "test-key");
    }
}

fn completion(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "id": "cmpl-1",
        "model": "mock",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}]
    }))
}

/// Answers the first `times` completion calls with `status`.
async fn mount_failures(server: &MockServer, status: u16, body: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .up_to_n_times(times)
        .expect(times)
        .mount(server)
        .await;
}

fn mock_provider(server: &MockServer) -> Provider {
    Provider::openai(MOCK_KEY_ENV_VAR)
        .with_base_url(format!("{}/v1", server.uri()))
        .with_model("mock-model")
        .with_timeout(Duration::from_secs(5))
        .with_retry_delay(Duration::from_millis(10))
}

fn prompt() -> Prompt {
    Prompt::new("You are a helpful food recommendation assistant.", "Something light for lunch?")
}

#[tokio::test]
async fn test_missing_api_key_error() {
    dotenv().ok();
    let provider = Provider::openrouter("THIS_KEY_SHOULD_NOT_EXIST_IN_ENV_ABXYZ");
    let result = provider.complete(&prompt()).await;
    assert!(matches!(result, Err(ApiConnectionError::MissingApiKey(_))));
    if let Err(ApiConnectionError::MissingApiKey(key_name)) = result {
        assert_eq!(key_name, "THIS_KEY_SHOULD_NOT_EXIST_IN_ENV_ABXYZ");
    }
}

#[tokio::test]
async fn test_completion_is_returned_and_request_is_well_formed() {
    setup_test_environment();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(completion("  Try the miso soup.  "))
        .expect(1)
        .mount(&server)
        .await;

    let text = mock_provider(&server).complete(&prompt()).await.unwrap();
    assert_eq!(text, "Try the miso soup.");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert_eq!(body["model"], "mock-model");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "Something light for lunch?");
}

#[tokio::test]
async fn test_server_errors_are_retried_with_backoff() {
    setup_test_environment();
    let server = MockServer::start().await;
    mount_failures(&server, 500, "{\"error\":\"boom\"}", 1).await;
    mount_failures(&server, 429, "{\"error\":\"slow down\"}", 1).await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(completion("Grilled fish with a side salad is a great light option."))
        .expect(1)
        .mount(&server)
        .await;

    let provider = mock_provider(&server).with_max_retries(2);
    let text = provider.complete(&prompt()).await.unwrap();
    assert!(text.starts_with("Grilled fish"));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    setup_test_environment();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"bad key\"}"))
        .expect(1)
        .mount(&server)
        .await;

    let result = mock_provider(&server).with_max_retries(3).complete(&prompt()).await;
    match result {
        Err(ApiConnectionError::ApiError { status, error_body }) => {
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert!(error_body.contains("bad key"));
        }
        other => panic!("expected ApiError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retries_are_bounded() {
    setup_test_environment();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("{}"))
        .expect(2)
        .mount(&server)
        .await;

    let result = mock_provider(&server).with_max_retries(1).complete(&prompt()).await;
    assert!(matches!(result, Err(ApiConnectionError::ApiError { status, .. }) if status == StatusCode::SERVICE_UNAVAILABLE));
}

#[tokio::test]
async fn test_empty_completion_is_an_error() {
    setup_test_environment();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(completion("   "))
        .mount(&server)
        .await;

    let result = mock_provider(&server).complete(&prompt()).await;
    assert!(matches!(result, Err(ApiConnectionError::EmptyResponse)));
}

#[tokio::test]
#[ignore]
async fn test_successful_live_call() {
    dotenv().ok();
    if env::var(TEST_API_KEY_ENV_VAR).is_err() {
        println!("Skipping test_successful_live_call: {} not set.", TEST_API_KEY_ENV_VAR);
        return;
    }

    let provider = Provider::openrouter(TEST_API_KEY_ENV_VAR);
    let prompt = Prompt::new(
        "You are a helpful food recommendation assistant.",
        "Name one classic Italian pasta dish. Respond concisely.",
    )
    .with_max_tokens(100);

    let result = provider.complete(&prompt).await;
    assert!(result.is_ok(), "API call failed: {:?}", result.err());
    assert!(!result.unwrap().is_empty());
}
