//! CloudConnexa data models for networks, users, user groups, DNS records and IP services.
//!
//! Models are decoded from normalized (snake_case) records, so the same struct is
//! produced regardless of the API version the record was read from.

use chrono::{DateTime, Utc};
use connexa_core::query::QueryParams;
use connexa_core::ResourceKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// A resource type managed through a [`crate::client::ResourceService`].
pub trait Resource: DeserializeOwned + Send {
    /// Endpoint group and path segment.
    const KIND: ResourceKind;
    /// Payload for `create`.
    type Create: Serialize + Validate + Send + Sync;
    /// Payload for `update`.
    type Update: Serialize + Validate + Send + Sync;
    /// Filters for `list`.
    type ListParams: ListQuery + Default + Send + Sync;
}

/// Converts list filters into query parameters.
pub trait ListQuery {
    /// Query pairs for this filter set.
    fn to_query(&self) -> QueryParams;

    /// Requested page size, if any.
    fn page_size(&self) -> Option<u32>;
}

/// Plain pagination for collections without resource-specific filters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageParams {
    /// Zero-based page index.
    pub page: Option<u32>,
    /// Page size (1-1000).
    pub size: Option<u32>,
}

impl ListQuery for PageParams {
    fn to_query(&self) -> QueryParams {
        let mut query = QueryParams::new();
        query.push_opt("page", self.page);
        query.push_opt("size", self.size);
        query
    }

    fn page_size(&self) -> Option<u32> {
        self.size
    }
}

/// Query parameters supported by `/networks`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NetworkListParams {
    /// Filter by network name.
    pub name: Option<String>,
    /// Filter by VPN region.
    pub vpn_region: Option<String>,
    /// Zero-based page index.
    pub page: Option<u32>,
    /// Page size.
    pub size: Option<u32>,
}

impl ListQuery for NetworkListParams {
    fn to_query(&self) -> QueryParams {
        let mut query = QueryParams::new();
        query.push_opt("name", self.name.as_deref());
        query.push_opt("vpnRegion", self.vpn_region.as_deref());
        query.push_opt("page", self.page);
        query.push_opt("size", self.size);
        query
    }

    fn page_size(&self) -> Option<u32> {
        self.size
    }
}

/// Query parameters supported by `/users`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserListParams {
    /// Filter by email.
    pub email: Option<String>,
    /// Filter by user group.
    pub group_id: Option<String>,
    /// Filter by status.
    pub status: Option<String>,
    /// Zero-based page index.
    pub page: Option<u32>,
    /// Page size.
    pub size: Option<u32>,
}

impl ListQuery for UserListParams {
    fn to_query(&self) -> QueryParams {
        let mut query = QueryParams::new();
        query.push_opt("email", self.email.as_deref());
        query.push_opt("groupId", self.group_id.as_deref());
        query.push_opt("status", self.status.as_deref());
        query.push_opt("page", self.page);
        query.push_opt("size", self.size);
        query
    }

    fn page_size(&self) -> Option<u32> {
        self.size
    }
}

/// WPC network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Network {
    /// Network identifier.
    pub id: String,
    /// Network name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Internet access mode (e.g. `split_tunnel_on`).
    #[serde(default = "default_internet_access")]
    pub internet_access: String,
    /// Whether the network egresses traffic.
    #[serde(default = "default_true")]
    pub egress: bool,
    /// Current status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// VPN region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpn_region: Option<String>,
    /// DNS servers pushed to clients.
    #[serde(default)]
    pub dns_servers: Vec<String>,
    /// Routes exposed by the network.
    #[serde(default)]
    pub routes: Vec<Value>,
    /// Connectors attached to the network.
    #[serde(default)]
    pub connectors: Vec<Value>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_internet_access() -> String {
    "split_tunnel_on".to_string()
}

const fn default_true() -> bool {
    true
}

impl Resource for Network {
    const KIND: ResourceKind = ResourceKind::Network;
    type Create = CreateNetworkRequest;
    type Update = UpdateNetworkRequest;
    type ListParams = NetworkListParams;
}

/// Request payload to create a network.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct CreateNetworkRequest {
    /// Network name.
    #[validate(length(min = 1, max = 40))]
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 120))]
    pub description: Option<String>,
    /// Internet access mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_access: Option<String>,
    /// Egress flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress: Option<bool>,
    /// VPN region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpn_region: Option<String>,
    /// DNS servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_servers: Option<Vec<String>>,
}

/// Request payload to update a network.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct UpdateNetworkRequest {
    /// New network name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 40))]
    pub name: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 120))]
    pub description: Option<String>,
    /// New internet access mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_access: Option<String>,
    /// New egress flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress: Option<bool>,
}

/// CloudConnexa user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// User identifier.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Login name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// First name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Role (e.g. `MEMBER`, `ADMIN`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Current status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// User group the user belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Resource for User {
    const KIND: ResourceKind = ResourceKind::User;
    type Create = CreateUserRequest;
    type Update = UpdateUserRequest;
    type ListParams = UserListParams;
}

/// Request payload to create a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct CreateUserRequest {
    /// Email address.
    #[validate(email)]
    pub email: String,
    /// Login name.
    #[validate(length(min = 1))]
    pub username: String,
    /// First name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// User group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// Request payload to update a user.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct UpdateUserRequest {
    /// New email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(email)]
    pub email: Option<String>,
    /// New first name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// New last name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// New role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// New user group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// User group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserGroup {
    /// Group identifier.
    pub id: String,
    /// Group name.
    pub name: String,
    /// Regions members may connect to.
    #[serde(default)]
    pub vpn_region_ids: Vec<String>,
    /// Internet access mode for members.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_access: Option<String>,
    /// Device limit per member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_device: Option<u32>,
    /// Connection authentication mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_auth: Option<String>,
    /// Whether all regions are allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_regions_included: Option<bool>,
}

impl Resource for UserGroup {
    const KIND: ResourceKind = ResourceKind::UserGroup;
    type Create = UserGroupRequest;
    type Update = UserGroupRequest;
    type ListParams = PageParams;
}

/// Request payload to create or replace a user group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct UserGroupRequest {
    /// Group name.
    #[validate(length(min = 1, max = 40))]
    pub name: String,
    /// Regions members may connect to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vpn_region_ids: Vec<String>,
    /// Internet access mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_access: Option<String>,
    /// Device limit per member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub max_device: Option<u32>,
    /// Connection authentication mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_auth: Option<String>,
}

/// DNS record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsRecord {
    /// Record identifier.
    pub id: String,
    /// Record name.
    pub name: String,
    /// Record type (`A`, `AAAA`, `CNAME`, ...).
    #[serde(rename = "type")]
    pub record_type: String,
    /// Record value.
    pub value: String,
    /// Time to live in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    /// Network the record belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
}

impl Resource for DnsRecord {
    const KIND: ResourceKind = ResourceKind::DnsRecord;
    type Create = DnsRecordRequest;
    type Update = DnsRecordRequest;
    type ListParams = PageParams;
}

/// Request payload to create or replace a DNS record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct DnsRecordRequest {
    /// Record name.
    #[validate(length(min = 1, max = 253))]
    pub name: String,
    /// Record type.
    #[serde(rename = "type")]
    #[validate(length(min = 1))]
    pub record_type: String,
    /// Record value.
    #[validate(length(min = 1))]
    pub value: String,
    /// Time to live in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    /// Network the record belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
}

/// IP service exposed through a network or host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpService {
    /// Service identifier.
    pub id: String,
    /// Service name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Owning network or host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_item_id: Option<String>,
    /// `NETWORK` or `HOST`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_item_type: Option<String>,
    /// Service types (e.g. `ANY`, `HTTP`).
    #[serde(default)]
    pub service_types: Vec<String>,
    /// Routed subnets.
    #[serde(default)]
    pub routes: Vec<String>,
}

impl Resource for IpService {
    const KIND: ResourceKind = ResourceKind::IpService;
    type Create = IpServiceRequest;
    type Update = IpServiceRequest;
    type ListParams = PageParams;
}

/// Request payload to create or replace an IP service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct IpServiceRequest {
    /// Service name.
    #[validate(length(min = 1, max = 40))]
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Owning network or host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_item_id: Option<String>,
    /// `NETWORK` or `HOST`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_item_type: Option<String>,
    /// Service types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_types: Vec<String>,
    /// Routed subnets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<String>,
}
