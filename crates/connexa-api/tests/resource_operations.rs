//! Integration tests for typed CRUD through resource services.

mod common;

use common::{client, mount_token};
use connexa_api::models::{
    CreateUserRequest, IpServiceRequest, UpdateNetworkRequest, UserGroupRequest, UserListParams,
};
use connexa_api::{ApiVersion, Error};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_create_user_posts_payload() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1.1.0/users"))
        .and(header("authorization", "Bearer integration-token"))
        .and(body_json(json!({
            "email": "ada@example.com",
            "username": "ada",
            "role": "ADMIN"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "u-42",
            "email": "ada@example.com",
            "username": "ada",
            "role": "ADMIN",
            "status": "INVITED",
            "groupId": "g-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, ApiVersion::V1_1_0, json!({})).await;
    let user = client
        .users()
        .create(&CreateUserRequest {
            email: "ada@example.com".to_string(),
            username: "ada".to_string(),
            first_name: None,
            last_name: None,
            role: Some("ADMIN".to_string()),
            group_id: None,
        })
        .await
        .unwrap();

    assert_eq!(user.id, "u-42");
    assert_eq!(user.status.as_deref(), Some("INVITED"));
    assert_eq!(user.group_id.as_deref(), Some("g-1"));
}

#[tokio::test]
async fn test_user_list_sends_filters() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1.1.0/users"))
        .and(query_param("groupId", "g-1"))
        .and(query_param("status", "ACTIVE"))
        .and(query_param("size", "25"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "u-1", "email": "one@example.com" },
            { "id": "u-2", "email": "two@example.com" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, ApiVersion::V1_1_0, json!({})).await;
    let page = client
        .users()
        .list(&UserListParams {
            group_id: Some("g-1".to_string()),
            status: Some("ACTIVE".to_string()),
            size: Some(25),
            ..UserListParams::default()
        })
        .await
        .unwrap();

    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 2);
    assert!(!page.has_more);
}

#[tokio::test]
async fn test_update_network_uses_put() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("PUT"))
        .and(path("/api/v1.1.0/networks/n-1"))
        .and(body_json(json!({ "description": "renamed", "egress": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "id": "n-1",
                "name": "engineering",
                "description": "renamed",
                "egress": false
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, ApiVersion::V1_1_0, json!({})).await;
    let network = client
        .networks()
        .update(
            "n-1",
            &UpdateNetworkRequest {
                description: Some("renamed".to_string()),
                egress: Some(false),
                ..UpdateNetworkRequest::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(network.description.as_deref(), Some("renamed"));
    assert!(!network.egress);
    assert_eq!(network.internet_access, "split_tunnel_on");
}

#[tokio::test]
async fn test_delete_accepts_empty_body() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1.0/ip-services/svc-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, ApiVersion::V1_0, json!({})).await;
    client.ip_services().delete("svc-1").await.unwrap();
}

#[tokio::test]
async fn test_delete_missing_record_is_not_found() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1.1.0/user-groups/g-9"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, ApiVersion::V1_1_0, json!({})).await;
    let err = client.user_groups().delete("g-9").await.unwrap_err();
    assert!(matches!(err, Error::ResourceNotFound { .. }));
}

#[tokio::test]
async fn test_user_group_get_on_legacy_version_scans_list() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1.0/user-groups"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "g-1", "name": "Default", "vpnRegionIds": ["us-east-1"] },
                { "id": "g-2", "name": "Contractors", "maxDevice": 2, "connectAuth": "EVERY_TIME" }
            ],
            "pagination": { "total": 2, "page": 0, "per_page": 100, "has_more": false }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1.0/user-groups/g-2"))
        .respond_with(ResponseTemplate::new(404))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, ApiVersion::V1_0, json!({})).await;
    let group = client.user_groups().get("g-2").await.unwrap().unwrap();

    assert_eq!(group.name, "Contractors");
    assert_eq!(group.max_device, Some(2));
    assert_eq!(group.connect_auth.as_deref(), Some("EVERY_TIME"));
}

#[tokio::test]
async fn test_create_user_group_rejects_zero_devices_locally() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    let client = client(&server, ApiVersion::V1_1_0, json!({})).await;
    let err = client
        .user_groups()
        .create(&UserGroupRequest {
            name: "Contractors".to_string(),
            vpn_region_ids: Vec::new(),
            internet_access: None,
            max_device: Some(0),
            connect_auth: None,
        })
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "VALIDATION_ERROR");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_ip_service_returns_model() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1.1.0/ip-services"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "svc-7",
            "name": "postgres",
            "networkItemId": "n-1",
            "networkItemType": "NETWORK",
            "serviceTypes": ["CUSTOM"],
            "routes": ["10.20.0.0/24"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, ApiVersion::V1_1_0, json!({})).await;
    let service = client
        .ip_services()
        .create(&IpServiceRequest {
            name: "postgres".to_string(),
            description: None,
            network_item_id: Some("n-1".to_string()),
            network_item_type: Some("NETWORK".to_string()),
            service_types: vec!["CUSTOM".to_string()],
            routes: vec!["10.20.0.0/24".to_string()],
        })
        .await
        .unwrap();

    assert_eq!(service.network_item_type.as_deref(), Some("NETWORK"));
    assert_eq!(service.service_types, vec!["CUSTOM".to_string()]);
}
