use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use account_service::{
    Account, AccountStatus, Container, ContainerStatus, DEFAULT_PRIVATE_CONTAINER_ID,
    DEFAULT_PRIVATE_CONTAINER_NAME, DEFAULT_PUBLIC_CONTAINER_ID, DEFAULT_PUBLIC_CONTAINER_NAME,
    UNKNOWN_ACCOUNT_ID, UNKNOWN_ACCOUNT_NAME, UNKNOWN_CONTAINER_ID, UNKNOWN_CONTAINER_NAME,
};
use axum::http::StatusCode;
use bytes::Bytes;
use cluster_map::{test_objects::TEST_DATACENTER_ID, BlobId, ClusterView, PartitionId};
use futures::StreamExt;
use rand::Rng;
use router::{BlobInfo, BlobRouter, RouterError};

use crate::{
    frontend::security::{ResponsePlan, SecurityService},
    rest::{
        headers, RestError, RestErrorKind, RestMethod, RestRequest, RestResponseChannel,
    },
    testing::{CollaboratorOverrides, MockResponse, RecordingRouter, TestService, TEST_EPOCH_MS},
};

const SERVICE_ID: &str = "integration-test";

fn random_bytes(len: usize) -> Bytes {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill(&mut bytes[..]);
    Bytes::from(bytes)
}

async fn post_blob(
    ts: &TestService,
    extra_headers: &[(&str, &str)],
    body: Bytes,
) -> (MockResponse, Arc<RestRequest>) {
    let mut request_headers: Vec<(&str, &str)> = vec![
        (headers::SERVICE_ID, SERVICE_ID),
        (headers::CONTENT_TYPE, "application/octet-stream"),
        (headers::TTL, "-1"),
    ];
    request_headers.extend_from_slice(extra_headers);
    ts.do_operation(RestMethod::Post, "/", &request_headers, Some(body))
        .await
}

fn location_of(response: &MockResponse) -> String {
    response
        .header(headers::LOCATION)
        .expect("created response carries a location")
        .to_string()
}

fn seeded_account(id: i16, name: &str, legacy_containers: bool) -> Account {
    let mut containers = vec![Container {
        id: 5,
        name: "media".to_string(),
        status: ContainerStatus::Active,
        is_private: false,
        parent_account_id: id,
    }];
    if legacy_containers {
        containers.push(Container {
            id: DEFAULT_PUBLIC_CONTAINER_ID,
            name: DEFAULT_PUBLIC_CONTAINER_NAME.to_string(),
            status: ContainerStatus::Active,
            is_private: false,
            parent_account_id: id,
        });
        containers.push(Container {
            id: DEFAULT_PRIVATE_CONTAINER_ID,
            name: DEFAULT_PRIVATE_CONTAINER_NAME.to_string(),
            status: ContainerStatus::Active,
            is_private: true,
            parent_account_id: id,
        });
    }
    Account {
        id,
        name: name.to_string(),
        status: AccountStatus::Active,
        containers,
    }
}

#[tokio::test]
async fn post_get_head_delete_round_trip() {
    let ts = TestService::new();
    let content = random_bytes(1024);
    let (response, _) = post_blob(
        &ts,
        &[
            (headers::OWNER_ID, "round-trip-owner"),
            ("x-ambry-um-key1", "value1"),
            ("x-ambry-um-key2", "value2"),
        ],
        content.clone(),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.header(headers::CONTENT_LENGTH), Some("0"));
    assert_eq!(
        response.header(headers::CREATION_TIME),
        Some(headers::http_date(TEST_EPOCH_MS).as_str())
    );
    let blob_id = location_of(&response);
    let uri = format!("/{blob_id}");

    // GET returns identical bytes and the original headers
    let (response, _) = ts.do_operation(RestMethod::Get, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, content);
    assert_eq!(response.header(headers::BLOB_SIZE), Some("1024"));
    assert_eq!(response.header(headers::SERVICE_ID), Some(SERVICE_ID));
    assert_eq!(response.header(headers::OWNER_ID), Some("round-trip-owner"));
    assert_eq!(response.header("x-ambry-um-key1"), Some("value1"));
    assert_eq!(response.header("x-ambry-um-key2"), Some("value2"));
    assert_eq!(response.header(headers::CONTENT_LENGTH), Some("1024"));
    assert_eq!(
        response.header(headers::CONTENT_TYPE_STD),
        Some("application/octet-stream")
    );
    assert!(response.header(headers::LAST_MODIFIED).is_some());
    assert!(response.header(headers::DATE).is_some());
    assert!(response
        .header(headers::CACHE_CONTROL)
        .unwrap()
        .starts_with("max-age="));
    let creation_time = response.header(headers::CREATION_TIME).unwrap().to_string();

    // explicit default get option behaves the same
    let (response, _) = ts
        .do_operation(RestMethod::Get, &uri, &[(headers::GET_OPTION, "None")], None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, content);

    // HEAD mirrors GET headers with no body
    let (response, _) = ts.do_operation(RestMethod::Head, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.is_empty());
    assert_eq!(response.header(headers::CONTENT_LENGTH), Some("1024"));
    assert_eq!(response.header(headers::BLOB_SIZE), Some("1024"));

    // closed range
    let (response, _) = ts
        .do_operation(RestMethod::Get, &uri, &[(headers::RANGE, "bytes=100-199")], None)
        .await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.header(headers::CONTENT_RANGE),
        Some("bytes 100-199/1024")
    );
    assert_eq!(response.header(headers::CONTENT_LENGTH), Some("100"));
    assert_eq!(response.body, content.slice(100..200));

    // open-ended range
    let (response, _) = ts
        .do_operation(RestMethod::Get, &uri, &[(headers::RANGE, "bytes=1000-")], None)
        .await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.header(headers::CONTENT_RANGE),
        Some("bytes 1000-1023/1024")
    );
    assert_eq!(response.body, content.slice(1000..1024));

    // suffix range
    let (response, _) = ts
        .do_operation(RestMethod::Get, &uri, &[(headers::RANGE, "bytes=-24")], None)
        .await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.body, content.slice(1000..1024));

    // HEAD with a range reports the window length
    let (response, _) = ts
        .do_operation(RestMethod::Head, &uri, &[(headers::RANGE, "bytes=100-199")], None)
        .await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.header(headers::CONTENT_LENGTH), Some("100"));
    assert!(response.body.is_empty());

    // freshness check, for GET and HEAD alike
    for method in [RestMethod::Get, RestMethod::Head] {
        let (response, _) = ts
            .do_operation(
                method,
                &uri,
                &[(headers::IF_MODIFIED_SINCE, &creation_time)],
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::NOT_MODIFIED);
        assert!(response.body.is_empty());
    }

    // sub-resources
    let (response, _) = ts
        .do_operation(RestMethod::Get, &format!("{uri}/UserMetadata"), &[], None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-ambry-um-key1"), Some("value1"));
    assert!(response.body.is_empty());

    let (response, _) = ts
        .do_operation(RestMethod::Get, &format!("{uri}/BlobInfo"), &[], None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header(headers::BLOB_SIZE), Some("1024"));
    assert_eq!(response.header("x-ambry-um-key2"), Some("value2"));
    assert!(response.body.is_empty());

    // delete, then observe Gone everywhere
    let (response, _) = ts.do_operation(RestMethod::Delete, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.header(headers::CONTENT_LENGTH), Some("0"));

    let (response, _) = ts.do_operation(RestMethod::Get, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::GONE);
    assert_eq!(response.header(headers::DELETED), Some("true"));
    assert_eq!(response.header(headers::ERROR_CODE), Some("Gone"));

    let (response, _) = ts.do_operation(RestMethod::Head, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::GONE);

    // the deleted blob is still readable when explicitly asked for
    let (response, _) = ts
        .do_operation(
            RestMethod::Get,
            &uri,
            &[(headers::GET_OPTION, "Include_Deleted_Blobs")],
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, content);

    // delete is idempotent
    let (response, _) = ts.do_operation(RestMethod::Delete, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn expired_blobs_are_gone_unless_included() {
    let ts = TestService::new();
    let (response, _) = post_blob(&ts, &[(headers::TTL, "1")], random_bytes(16)).await;
    let uri = format!("/{}", location_of(&response));

    let (response, _) = ts.do_operation(RestMethod::Get, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::OK);

    ts.clock.advance(2_000);
    let (response, _) = ts.do_operation(RestMethod::Get, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::GONE);
    assert!(response.header(headers::DELETED).is_none());

    let (response, _) = ts
        .do_operation(
            RestMethod::Get,
            &uri,
            &[(headers::GET_OPTION, "Include_Expired_Blobs")],
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn put_method_is_unsupported() {
    let ts = TestService::new();
    let (response, _) = ts
        .do_operation(RestMethod::Other("PUT".to_string()), "/", &[], None)
        .await;
    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        response.header(headers::ERROR_CODE),
        Some("UnsupportedHttpMethod")
    );
}

#[tokio::test]
async fn frontend_must_be_started() {
    let ts = TestService::new();
    ts.frontend.shutdown();
    let (response, _) = ts.do_operation(RestMethod::Get, "/", &[], None).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.error_kind(), Some(RestErrorKind::ServiceUnavailable));
}

#[tokio::test]
async fn bad_range_header_is_rejected_up_front() {
    let ts = TestService::new();
    let (response, _) = ts
        .do_operation(
            RestMethod::Get,
            "/",
            &[(headers::RANGE, "adsfksakdfsdfkdaklf")],
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_kind(), Some(RestErrorKind::InvalidArgument));
}

#[tokio::test]
async fn unrecognized_get_option_is_rejected() {
    let ts = TestService::new();
    let (response, _) = ts
        .do_operation(
            RestMethod::Get,
            "/whatever",
            &[(headers::GET_OPTION, "Include_Everything")],
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_kind(), Some(RestErrorKind::InvalidArgument));
}

#[tokio::test]
async fn posts_carrying_internal_keys_are_rejected() {
    let ts = TestService::new();
    for key in [headers::TARGET_ACCOUNT_KEY, headers::TARGET_CONTAINER_KEY] {
        let (response, _) = post_blob(&ts, &[(key, "sneaky")], Bytes::new()).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.error_kind(), Some(RestErrorKind::BadRequest));
    }
}

#[tokio::test]
async fn post_requires_service_id_and_content_type() {
    let ts = TestService::new();
    let (response, _) = ts
        .do_operation(
            RestMethod::Post,
            "/",
            &[(headers::CONTENT_TYPE, "text/plain")],
            Some(Bytes::new()),
        )
        .await;
    assert_eq!(response.error_kind(), Some(RestErrorKind::MissingArgs));

    let (response, _) = ts
        .do_operation(
            RestMethod::Post,
            "/",
            &[(headers::SERVICE_ID, SERVICE_ID)],
            Some(Bytes::new()),
        )
        .await;
    assert_eq!(response.error_kind(), Some(RestErrorKind::MissingArgs));
}

#[tokio::test]
async fn post_validates_numeric_and_bool_headers() {
    let ts = TestService::new();
    let (response, _) = post_blob(&ts, &[(headers::BLOB_SIZE, "not-a-number")], Bytes::new()).await;
    assert_eq!(response.error_kind(), Some(RestErrorKind::InvalidArgument));

    let (response, _) = post_blob(&ts, &[(headers::PRIVATE, "maybe")], Bytes::new()).await;
    assert_eq!(response.error_kind(), Some(RestErrorKind::InvalidArgument));

    let (response, _) = post_blob(&ts, &[(headers::TTL, "soon")], Bytes::new()).await;
    assert_eq!(response.error_kind(), Some(RestErrorKind::InvalidArgument));
}

/// Target-header injection against a directory that only knows the unknown
/// account.
#[tokio::test]
async fn post_injection_with_empty_directory() {
    let ts = TestService::new();

    // no target headers at all: unknown account, legacy container by privacy
    let (response, request) = post_blob(&ts, &[], random_bytes(8)).await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(request.target_account().unwrap().id, UNKNOWN_ACCOUNT_ID);
    assert_eq!(
        request.target_container().unwrap().id,
        DEFAULT_PUBLIC_CONTAINER_ID
    );

    let (response, request) =
        post_blob(&ts, &[(headers::PRIVATE, "true")], random_bytes(8)).await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(
        request.target_container().unwrap().id,
        DEFAULT_PRIVATE_CONTAINER_ID
    );

    let cases: &[(Option<&str>, Option<&str>, RestErrorKind)] = &[
        (None, Some("someName"), RestErrorKind::MissingArgs),
        (None, Some(UNKNOWN_CONTAINER_NAME), RestErrorKind::InvalidContainer),
        (Some("someName"), None, RestErrorKind::MissingArgs),
        (Some("someName"), Some("someName"), RestErrorKind::InvalidAccount),
        (Some(UNKNOWN_ACCOUNT_NAME), None, RestErrorKind::InvalidAccount),
        (
            Some(UNKNOWN_ACCOUNT_NAME),
            Some("someName"),
            RestErrorKind::InvalidAccount,
        ),
        (
            Some(UNKNOWN_ACCOUNT_NAME),
            Some(UNKNOWN_CONTAINER_NAME),
            RestErrorKind::InvalidAccount,
        ),
    ];
    for (account, container, expected) in cases {
        let mut extra: Vec<(&str, &str)> = Vec::new();
        if let Some(account) = account {
            extra.push((headers::TARGET_ACCOUNT, account));
        }
        if let Some(container) = container {
            extra.push((headers::TARGET_CONTAINER, container));
        }
        let (response, _) = post_blob(&ts, &extra, Bytes::new()).await;
        assert_eq!(
            response.error_kind(),
            Some(*expected),
            "account={account:?} container={container:?}"
        );
    }
}

/// Target-header injection against a directory seeded with a real account.
#[tokio::test]
async fn post_injection_with_seeded_directory() {
    let ts = TestService::new();
    ts.accounts
        .update_accounts(vec![seeded_account(100, "media-service", false)]);

    // real account and container
    let (response, request) = post_blob(
        &ts,
        &[
            (headers::TARGET_ACCOUNT, "media-service"),
            (headers::TARGET_CONTAINER, "media"),
        ],
        random_bytes(8),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(request.target_account().unwrap().id, 100);
    assert_eq!(request.target_container().unwrap().id, 5);

    let cases: &[(Option<&str>, Option<&str>, RestErrorKind)] = &[
        (Some("media-service"), None, RestErrorKind::MissingArgs),
        (
            Some("media-service"),
            Some("nonExistName"),
            RestErrorKind::InvalidContainer,
        ),
        (
            Some("media-service"),
            Some(UNKNOWN_CONTAINER_NAME),
            RestErrorKind::InvalidContainer,
        ),
        (Some("nonExistName"), None, RestErrorKind::MissingArgs),
        (
            Some("nonExistName"),
            Some("nonExistName"),
            RestErrorKind::InvalidAccount,
        ),
        (
            Some("nonExistName"),
            Some(UNKNOWN_CONTAINER_NAME),
            RestErrorKind::InvalidAccount,
        ),
        (
            Some("nonExistName"),
            Some("media"),
            RestErrorKind::InvalidAccount,
        ),
    ];
    for (account, container, expected) in cases {
        let mut extra: Vec<(&str, &str)> = Vec::new();
        if let Some(account) = account {
            extra.push((headers::TARGET_ACCOUNT, account));
        }
        if let Some(container) = container {
            extra.push((headers::TARGET_CONTAINER, container));
        }
        let (response, _) = post_blob(&ts, &extra, Bytes::new()).await;
        assert_eq!(
            response.error_kind(),
            Some(*expected),
            "account={account:?} container={container:?}"
        );
    }
}

/// The service id doubles as a candidate account name for legacy clients.
#[tokio::test]
async fn service_id_fallback_on_post() {
    let ts = TestService::new();
    ts.accounts.update_accounts(vec![
        seeded_account(100, "legacy-svc", true),
        seeded_account(101, "plain-svc", false),
    ]);

    // account with legacy containers: used directly
    let (response, request) = ts
        .do_operation(
            RestMethod::Post,
            "/",
            &[
                (headers::SERVICE_ID, "legacy-svc"),
                (headers::CONTENT_TYPE, "application/octet-stream"),
            ],
            Some(random_bytes(8)),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(request.target_account().unwrap().id, 100);
    assert_eq!(
        request.target_container().unwrap().id,
        DEFAULT_PUBLIC_CONTAINER_ID
    );

    let (response, request) = ts
        .do_operation(
            RestMethod::Post,
            "/",
            &[
                (headers::SERVICE_ID, "legacy-svc"),
                (headers::CONTENT_TYPE, "application/octet-stream"),
                (headers::PRIVATE, "true"),
            ],
            Some(random_bytes(8)),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(
        request.target_container().unwrap().id,
        DEFAULT_PRIVATE_CONTAINER_ID
    );

    // account without legacy containers: upload falls back to the unknown
    // account rather than failing
    let (response, request) = ts
        .do_operation(
            RestMethod::Post,
            "/",
            &[
                (headers::SERVICE_ID, "plain-svc"),
                (headers::CONTENT_TYPE, "application/octet-stream"),
            ],
            Some(random_bytes(8)),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(request.target_account().unwrap().id, UNKNOWN_ACCOUNT_ID);

    // naming the unknown account directly is not allowed
    let (response, _) = ts
        .do_operation(
            RestMethod::Post,
            "/",
            &[
                (headers::SERVICE_ID, UNKNOWN_ACCOUNT_NAME),
                (headers::CONTENT_TYPE, "application/octet-stream"),
            ],
            Some(Bytes::new()),
        )
        .await;
    assert_eq!(response.error_kind(), Some(RestErrorKind::InvalidAccount));
}

/// Account/container resolution from the ids embedded in a blob id, for
/// GET, HEAD, and DELETE alike.
#[tokio::test]
async fn blob_id_resolution_matrix() {
    let ts = TestService::new();
    ts.accounts
        .update_accounts(vec![seeded_account(100, "media-service", false)]);
    let partition = ts.cluster.writable_partitions()[0];

    let cases: &[(i16, i16, Option<RestErrorKind>)] = &[
        (100, 5, Some(RestErrorKind::NotFound)), // resolves, blob absent
        (100, UNKNOWN_CONTAINER_ID, Some(RestErrorKind::InvalidContainer)),
        (100, 1234, Some(RestErrorKind::InvalidContainer)),
        (UNKNOWN_ACCOUNT_ID, 5, Some(RestErrorKind::InvalidContainer)),
        (UNKNOWN_ACCOUNT_ID, UNKNOWN_CONTAINER_ID, Some(RestErrorKind::NotFound)),
        (UNKNOWN_ACCOUNT_ID, 1234, Some(RestErrorKind::InvalidContainer)),
        (1234, 5, Some(RestErrorKind::InvalidAccount)),
        (1234, UNKNOWN_CONTAINER_ID, Some(RestErrorKind::InvalidAccount)),
        (1234, 1234, Some(RestErrorKind::InvalidAccount)),
    ];
    for method in [RestMethod::Get, RestMethod::Head, RestMethod::Delete] {
        for (account_id, container_id, expected) in cases {
            let blob_id =
                BlobId::new_v2(TEST_DATACENTER_ID, *account_id, *container_id, partition);
            let uri = format!("/{}", blob_id.encode());
            let (response, request) = ts.do_operation(method.clone(), &uri, &[], None).await;
            assert_eq!(
                response.error_kind(),
                *expected,
                "method={method:?} account={account_id} container={container_id}"
            );
            if *expected == Some(RestErrorKind::NotFound) {
                // injection happened before the router missed the blob
                let injected = request.target_account().unwrap();
                assert_eq!(injected.id, *account_id);
                assert_eq!(request.target_container().unwrap().id, *container_id);
            }
        }
    }
}

#[tokio::test]
async fn invalid_blob_ids_are_bad_requests() {
    let ts = TestService::new();
    for uri in ["/12345", "/", "/!!!"] {
        let (response, _) = ts.do_operation(RestMethod::Get, uri, &[], None).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn get_peers_lists_partition_mates() {
    let ts = TestService::new();
    for node in ts.cluster.datanodes() {
        let uri = format!("/peers?name={}&port={}", node.hostname, node.port);
        let (response, _) = ts.do_operation(RestMethod::Get, &uri, &[], None).await;
        assert_eq!(response.status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        let from_response: BTreeSet<String> = body["peers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        let expected = ts.cluster.peers(&node.hostname, node.port).unwrap();
        assert_eq!(from_response, expected, "{node}");
    }

    let (response, _) = ts.do_operation(RestMethod::Get, "/peers", &[], None).await;
    assert_eq!(response.error_kind(), Some(RestErrorKind::MissingArgs));

    let (response, _) = ts
        .do_operation(RestMethod::Get, "/peers?name=elsewhere&port=77", &[], None)
        .await;
    assert_eq!(response.error_kind(), Some(RestErrorKind::NotFound));
}

#[tokio::test]
async fn get_replicas_reports_the_partition() {
    let ts = TestService::new();
    for partition in ts.cluster.writable_partitions() {
        let blob_id = BlobId::new_v1(TEST_DATACENTER_ID, partition);
        let uri = format!("/{}/Replicas", blob_id.encode());
        let (response, _) = ts.do_operation(RestMethod::Get, &uri, &[], None).await;
        assert_eq!(response.status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        let expected = format!(
            "[{}]",
            ts.cluster
                .replicas(partition)
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        assert_eq!(body["replicas"].as_str().unwrap(), expected);
    }

    let (response, _) = ts
        .do_operation(RestMethod::Get, "/12345/Replicas", &[], None)
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let unknown_partition = BlobId::new_v1(TEST_DATACENTER_ID, PartitionId(900));
    let uri = format!("/{}/Replicas", unknown_partition.encode());
    let (response, _) = ts.do_operation(RestMethod::Get, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn legacy_user_metadata_is_served_raw() {
    let ts = TestService::new();
    let legacy_metadata = Bytes::from_static(b"\x00\x01not-a-header-map");
    let properties = router::BlobProperties {
        blob_size: 0,
        service_id: "legacy".to_string(),
        content_type: "application/octet-stream".to_string(),
        owner_id: None,
        ttl_secs: -1,
        is_private: false,
        creation_time_ms: TEST_EPOCH_MS,
    };
    let blob_id = ts
        .router
        .put_blob(
            properties,
            legacy_metadata.clone(),
            futures::stream::iter(vec![Ok::<_, anyhow::Error>(Bytes::from_static(b"body"))])
                .boxed(),
        )
        .await
        .unwrap();

    let (response, _) = ts
        .do_operation(
            RestMethod::Get,
            &format!("/{blob_id}/UserMetadata"),
            &[],
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header(headers::CONTENT_TYPE_STD),
        Some("application/octet-stream")
    );
    assert_eq!(
        response.header(headers::CONTENT_LENGTH),
        Some(legacy_metadata.len().to_string().as_str())
    );
    assert_eq!(response.body, legacy_metadata);

    let (response, _) = ts
        .do_operation(RestMethod::Get, &format!("/{blob_id}/BlobInfo"), &[], None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header(headers::BLOB_SIZE), Some("4"));
    assert!(response.body.is_empty());
}

struct FailingSecurityService {
    fail_pre: bool,
    fail_post: bool,
}

#[async_trait::async_trait]
impl SecurityService for FailingSecurityService {
    async fn pre_process(&self, _request: &RestRequest) -> Result<(), RestError> {
        if self.fail_pre {
            return Err(RestError::new(
                RestErrorKind::Unauthorized,
                "pre-processing rejected the caller",
            ));
        }
        Ok(())
    }

    async fn post_process(&self, _request: &RestRequest) -> Result<(), RestError> {
        if self.fail_post {
            return Err(RestError::new(
                RestErrorKind::Unauthorized,
                "post-processing rejected the caller",
            ));
        }
        Ok(())
    }

    async fn process_response(
        &self,
        _request: &RestRequest,
        _channel: &dyn RestResponseChannel,
        _blob_info: &BlobInfo,
    ) -> Result<ResponsePlan, RestError> {
        Err(RestError::internal("response shaping failed"))
    }
}

#[tokio::test]
async fn security_failures_travel_the_error_path() {
    let ts = TestService::build(|overrides: &mut CollaboratorOverrides, _| {
        overrides.security = Some(Arc::new(FailingSecurityService {
            fail_pre: true,
            fail_post: false,
        }));
    });
    let (response, _) = ts.do_operation(RestMethod::Get, "/whatever", &[], None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.header(headers::ERROR_CODE), Some("Unauthorized"));

    let ts = TestService::build(|overrides: &mut CollaboratorOverrides, _| {
        overrides.security = Some(Arc::new(FailingSecurityService {
            fail_pre: false,
            fail_post: true,
        }));
    });
    let partition = ts.cluster.writable_partitions()[0];
    let uri = format!("/{}", BlobId::new_v1(TEST_DATACENTER_ID, partition).encode());
    let (response, _) = ts.do_operation(RestMethod::Get, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

struct FailingIdConverter;

#[async_trait::async_trait]
impl crate::frontend::id_converter::IdConverter for FailingIdConverter {
    async fn convert(&self, _request: &RestRequest, _input: &str) -> Result<String, RestError> {
        Err(RestError::internal("id conversion blew up"))
    }
}

#[tokio::test]
async fn id_converter_failures_travel_the_error_path() {
    let ts = TestService::build(|overrides: &mut CollaboratorOverrides, _| {
        overrides.id_converter = Some(Arc::new(FailingIdConverter));
    });
    let (response, _) = ts.do_operation(RestMethod::Get, "/whatever", &[], None).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.header(headers::ERROR_CODE), Some("InternalError"));
}

#[tokio::test]
async fn closed_router_maps_to_service_unavailable() {
    let ts = TestService::new();
    let partition = ts.cluster.writable_partitions()[0];
    let uri = format!("/{}", BlobId::new_v1(TEST_DATACENTER_ID, partition).encode());
    ts.router.close();

    let (response, _) = ts.do_operation(RestMethod::Get, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);

    let (response, _) = post_blob(&ts, &[], Bytes::new()).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response.error.as_ref().unwrap().router_code,
        Some(RouterError::RouterClosed)
    );
}

#[tokio::test]
async fn submission_falls_back_to_the_channel_when_the_handler_is_down() {
    let ts = TestService::new();
    let content = random_bytes(64);
    let (response, _) = post_blob(&ts, &[], content.clone()).await;
    let uri = format!("/{}", location_of(&response));

    ts.response_handler.shutdown();

    // the success outcome still arrives, delivered directly
    let (response, request) = ts.do_operation(RestMethod::Get, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, content);
    assert!(!request.is_open());

    // and so does an error outcome, cause intact
    let missing = BlobId::new_v1(TEST_DATACENTER_ID, ts.cluster.writable_partitions()[1]);
    let (response, request) = ts
        .do_operation(RestMethod::Get, &format!("/{}", missing.encode()), &[], None)
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(
        response.error.as_ref().unwrap().router_code,
        Some(RouterError::BlobDoesNotExist)
    );
    assert!(!request.is_open());
}

#[tokio::test]
async fn delete_forwards_the_service_id_to_the_router() {
    let recorded: Arc<Mutex<Option<Option<String>>>> = Arc::new(Mutex::new(None));
    let recorded_handle = recorded.clone();
    let ts = TestService::build(move |overrides, router| {
        overrides.router = Some(Arc::new(RecordingRouter {
            inner: router,
            last_delete_service_id: recorded_handle,
        }));
    });

    let (response, _) = post_blob(&ts, &[], random_bytes(8)).await;
    let uri = format!("/{}", location_of(&response));

    let (response, _) = ts
        .do_operation(
            RestMethod::Delete,
            &uri,
            &[(headers::SERVICE_ID, "delete-service")],
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(
        recorded.lock().unwrap().clone(),
        Some(Some("delete-service".to_string()))
    );

    let (response, _) = ts.do_operation(RestMethod::Delete, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(recorded.lock().unwrap().clone(), Some(None));
}

#[tokio::test]
async fn private_blobs_get_no_store_cache_headers() {
    let ts = TestService::new();
    let (response, _) = post_blob(&ts, &[(headers::PRIVATE, "true")], random_bytes(8)).await;
    let uri = format!("/{}", location_of(&response));
    let (response, _) = ts.do_operation(RestMethod::Get, &uri, &[], None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response
        .header(headers::CACHE_CONTROL)
        .unwrap()
        .contains("no-store"));
    assert_eq!(response.header(headers::PRAGMA), Some("no-cache"));
    assert_eq!(response.header(headers::PRIVATE), Some("true"));
}

#[tokio::test]
async fn unsatisfiable_ranges_are_416() {
    let ts = TestService::new();
    let (response, _) = post_blob(&ts, &[], random_bytes(16)).await;
    let uri = format!("/{}", location_of(&response));
    let (response, _) = ts
        .do_operation(RestMethod::Get, &uri, &[(headers::RANGE, "bytes=100-200")], None)
        .await;
    assert_eq!(response.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.error_kind(),
        Some(RestErrorKind::RangeNotSatisfiable)
    );
}
