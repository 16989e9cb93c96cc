//! Container Analysis provider against a mock API.

use cip_checks::{CheckError, GrafeasProvider, Severity, VulnerabilityProvider};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FQIN: &str = "gcr.io/src/a@sha256:1111111111111111111111111111111111111111111111111111111111111111";

fn create_test_provider(server: &MockServer) -> GrafeasProvider {
    GrafeasProvider::new("my-project")
        .expect("client")
        .with_endpoint(&server.uri())
        .expect("endpoint")
        .with_token("test-token")
}

#[tokio::test]
async fn test_lists_vulnerabilities_across_pages() {
    let server = MockServer::start().await;
    let filter = format!("resourceUrl=\"https://{FQIN}\" AND kind=\"PACKAGE_VULNERABILITY\"");

    Mock::given(method("GET"))
        .and(path("/v1/projects/my-project/occurrences"))
        .and(query_param("filter", filter.as_str()))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "occurrences": [{
                "name": "projects/my-project/occurrences/2",
                "kind": "PACKAGE_VULNERABILITY",
                "vulnerability": {"severity": "LOW", "fixAvailable": false}
            }]
        })))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/my-project/occurrences"))
        .and(query_param("filter", filter.as_str()))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "occurrences": [{
                "name": "projects/my-project/occurrences/1",
                "kind": "PACKAGE_VULNERABILITY",
                "vulnerability": {
                    "severity": "MEDIUM",
                    "effectiveSeverity": "CRITICAL",
                    "fixAvailable": true
                }
            }],
            "nextPageToken": "page-2"
        })))
        .mount(&server)
        .await;

    let occurrences = create_test_provider(&server)
        .occurrences(FQIN)
        .await
        .expect("lookup failed");

    assert_eq!(occurrences.len(), 2);
    assert_eq!(occurrences[0].severity, Severity::Critical);
    assert!(occurrences[0].fix_available);
    assert_eq!(occurrences[1].severity, Severity::Low);
    assert!(!occurrences[1].fix_available);
}

#[tokio::test]
async fn test_empty_listing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/my-project/occurrences"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let occurrences = create_test_provider(&server)
        .occurrences(FQIN)
        .await
        .expect("lookup failed");
    assert!(occurrences.is_empty());
}

#[tokio::test]
async fn test_http_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/my-project/occurrences"))
        .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
        .mount(&server)
        .await;

    let err = create_test_provider(&server)
        .occurrences(FQIN)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::Provider { .. }));
    assert!(err.to_string().contains("permission denied"));
}
