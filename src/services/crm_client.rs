//! CRM API client.
//!
//! HTTP client for the JSON:API-shaped CRM backend. Every request mints a
//! fresh short-lived bearer token scoped to a fixed admin identity; tokens
//! are not cached across calls.

use crate::error::SyncError;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bearer token lifetime in seconds.
const TOKEN_LIFETIME_SECS: i64 = 3600;

/// CRM client configuration.
#[derive(Debug, Clone, Default)]
pub struct CrmClientConfig {
    /// Base URL of the CRM instance (e.g. `https://crm.example.org`).
    pub base_url: String,

    /// Shared secret used to sign bearer tokens (HS256).
    pub api_secret: String,

    /// Person UUID of the admin identity tokens are scoped to.
    pub admin_person_uuid: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// CRM API client.
#[derive(Debug, Clone)]
pub struct CrmClient {
    client: Client,
    config: CrmClientConfig,
}

/// Claims embedded in every outbound bearer token.
#[derive(Debug, Serialize)]
struct TokenClaims {
    sub: String,
    iat: i64,
    exp: i64,
    jti: String,
}

/// One page of the remote organization collection.
#[derive(Debug)]
pub struct OrganizationPage {
    pub organizations: Vec<CrmOrganization>,
    pub total_pages: u32,
}

/// A normalized organization resource from the CRM.
#[derive(Debug, Clone)]
pub struct CrmOrganization {
    pub uuid: String,
    pub legal_name: String,
    pub legal_name_en: Option<String>,
    pub legal_name_fr: Option<String>,
    pub alternate_name: Option<String>,
    pub org_type: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub identifying_number: Option<String>,
    pub people_count: i64,
    pub parent_org_uuid: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// A normalized person-organization connection from the CRM.
///
/// The raw payload carries the target organization under either a generic
/// `to` relationship or a named `organization` relationship; normalization
/// into `organization_uuid` happens once at ingest.
#[derive(Debug, Clone)]
pub struct CrmConnection {
    pub uuid: String,
    pub connection_type: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<String>,
    pub ends_at: Option<String>,
    pub organization_uuid: String,
}

/// Result of an idempotent connection create.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateConnectionResult {
    pub success: bool,
    #[serde(default)]
    pub already_existed: bool,
    /// UUID of the created (or pre-existing) connection.
    #[serde(default)]
    pub connection_uuid: Option<String>,
}

// Wire-format types (JSON:API shapes)

#[derive(Debug, Deserialize)]
struct Document<T> {
    data: T,
    #[serde(default)]
    meta: Option<DocumentMeta>,
}

#[derive(Debug, Deserialize)]
struct DocumentMeta {
    #[serde(default)]
    page: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct OrgResource {
    id: String,
    attributes: OrgAttributes,
    #[serde(default)]
    relationships: Option<OrgRelationships>,
}

#[derive(Debug, Deserialize)]
struct OrgAttributes {
    legal_name: String,
    #[serde(default)]
    legal_name_en: Option<String>,
    #[serde(default)]
    legal_name_fr: Option<String>,
    #[serde(default)]
    alternate_name: Option<String>,
    #[serde(rename = "type", default)]
    org_type: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    identifying_number: Option<String>,
    #[serde(default)]
    people_count: i64,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrgRelationships {
    #[serde(default)]
    parent_organization: Option<Relationship>,
}

#[derive(Debug, Deserialize)]
struct ConnectionResource {
    id: String,
    attributes: ConnectionAttributes,
    #[serde(default)]
    relationships: Option<ConnectionRelationships>,
}

#[derive(Debug, Deserialize)]
struct ConnectionAttributes {
    #[serde(rename = "type", default)]
    connection_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    starts_at: Option<String>,
    #[serde(default)]
    ends_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionRelationships {
    #[serde(default)]
    organization: Option<Relationship>,
    #[serde(default)]
    to: Option<Relationship>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(default)]
    data: Option<ResourceIdentifier>,
}

#[derive(Debug, Deserialize)]
struct ResourceIdentifier {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PersonResource {
    id: String,
}

impl OrgResource {
    fn normalize(self) -> CrmOrganization {
        let parent_org_uuid = self
            .relationships
            .and_then(|r| r.parent_organization)
            .and_then(|rel| rel.data)
            .map(|ident| ident.id);

        CrmOrganization {
            uuid: self.id,
            legal_name: self.attributes.legal_name,
            legal_name_en: self.attributes.legal_name_en,
            legal_name_fr: self.attributes.legal_name_fr,
            alternate_name: self.attributes.alternate_name,
            org_type: self.attributes.org_type,
            slug: self.attributes.slug,
            description: self.attributes.description,
            identifying_number: self.attributes.identifying_number,
            people_count: self.attributes.people_count,
            parent_org_uuid,
            created_at: self.attributes.created_at,
            updated_at: self.attributes.updated_at,
        }
    }
}

impl ConnectionResource {
    /// Resolve the target organization from whichever relationship shape the
    /// payload uses. `None` when neither shape carries an identifier.
    fn target_organization(&self) -> Option<String> {
        let rels = self.relationships.as_ref()?;

        rels.organization
            .as_ref()
            .or(rels.to.as_ref())
            .and_then(|rel| rel.data.as_ref())
            .map(|ident| ident.id.clone())
    }

    fn normalize(self) -> Option<CrmConnection> {
        let organization_uuid = self.target_organization()?;

        Some(CrmConnection {
            uuid: self.id,
            connection_type: self.attributes.connection_type,
            description: self.attributes.description,
            starts_at: self.attributes.starts_at,
            ends_at: self.attributes.ends_at,
            organization_uuid,
        })
    }
}

impl CrmClient {
    /// Create a new CRM client.
    ///
    /// Fails with [`SyncError::Unconfigured`] when credentials are absent,
    /// before any network call is attempted.
    pub fn new(config: CrmClientConfig) -> Result<Self, SyncError> {
        if config.base_url.trim().is_empty() {
            return Err(SyncError::unconfigured("CRM base URL is not set"));
        }
        if config.api_secret.trim().is_empty() {
            return Err(SyncError::unconfigured("CRM API secret is not set"));
        }
        if config.admin_person_uuid.trim().is_empty() {
            return Err(SyncError::unconfigured("CRM admin person UUID is not set"));
        }

        let timeout = if config.timeout_secs == 0 {
            30
        } else {
            config.timeout_secs
        };

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout))
            .build()
            .map_err(|e| SyncError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Mint a fresh short-lived bearer token for one request.
    fn mint_token(&self) -> Result<String, SyncError> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: self.config.admin_person_uuid.clone(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
            jti: Uuid::new_v4().to_string(),
        };

        let key = EncodingKey::from_secret(self.config.api_secret.as_bytes());
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &key)?;

        Ok(token)
    }

    /// Get the full URL for an API endpoint path.
    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Send a GET request with a freshly minted token.
    async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Response, SyncError> {
        let token = self.mint_token()?;
        let response = self
            .client
            .get(self.api_url(endpoint))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        Ok(response)
    }

    /// Handle API response errors, extracting the remote-provided message
    /// from the JSON:API error body when present.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, SyncError> {
        let status = response.status();

        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| SyncError::internal(format!("Failed to parse response: {}", e)))
        } else {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            let body_message = extract_error_message(&body);

            let message = match (status, &body_message) {
                (StatusCode::UNAUTHORIZED, _) => "CRM rejected the bearer token".to_string(),
                (StatusCode::FORBIDDEN, _) => "Access denied".to_string(),
                (StatusCode::NOT_FOUND, _) => "Resource not found".to_string(),
                (StatusCode::TOO_MANY_REQUESTS, _) => "Rate limit exceeded".to_string(),
                (_, Some(msg)) => msg.clone(),
                _ => format!("Request failed ({}): {}", status_code, body),
            };

            Err(SyncError::remote_api_full(message, status_code, endpoint))
        }
    }

    /// Fetch one page of the organization collection.
    ///
    /// `GET /organizations?page[number]=N&page[size]=M`
    pub async fn get_organizations_page(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<OrganizationPage, SyncError> {
        let endpoint = "/organizations";
        let response = self
            .get(
                endpoint,
                &[
                    ("page[number]", page.to_string()),
                    ("page[size]", per_page.to_string()),
                ],
            )
            .await?;

        let document: Document<Vec<OrgResource>> =
            self.handle_response(response, endpoint).await?;

        let total_pages = document
            .meta
            .and_then(|m| m.page)
            .map(|p| p.total_pages)
            .unwrap_or(1);

        Ok(OrganizationPage {
            organizations: document.data.into_iter().map(OrgResource::normalize).collect(),
            total_pages,
        })
    }

    /// Point lookup of a single organization. A remote 404 is `None`.
    pub async fn get_organization(
        &self,
        uuid: &str,
    ) -> Result<Option<CrmOrganization>, SyncError> {
        let endpoint = format!("/organizations/{}", uuid);
        let response = self.get(&endpoint, &[]).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let document: Document<OrgResource> = self.handle_response(response, &endpoint).await?;
        Ok(Some(document.data.normalize()))
    }

    /// Fetch a person's current connections.
    ///
    /// Connections whose payload carries no resolvable target organization
    /// (neither relationship shape) are dropped with a warning.
    pub async fn get_person_connections(
        &self,
        person_uuid: &str,
    ) -> Result<Vec<CrmConnection>, SyncError> {
        let endpoint = format!("/people/{}/connections", person_uuid);
        let response = self.get(&endpoint, &[]).await?;

        let document: Document<Vec<ConnectionResource>> =
            self.handle_response(response, &endpoint).await?;

        let mut connections = Vec::with_capacity(document.data.len());
        for resource in document.data {
            let id = resource.id.clone();
            match resource.normalize() {
                Some(conn) => connections.push(conn),
                None => {
                    log::warn!("connection {} has no target organization, skipping", id);
                }
            }
        }

        Ok(connections)
    }

    /// Look up a person's UUID by email. `None` when no person matches.
    pub async fn get_person_uuid_by_email(
        &self,
        email: &str,
    ) -> Result<Option<String>, SyncError> {
        let endpoint = "/people";
        let response = self
            .get(endpoint, &[("filter[emails_primary_email_eq]", email.to_string())])
            .await?;

        let document: Document<Vec<PersonResource>> =
            self.handle_response(response, endpoint).await?;

        Ok(document.data.into_iter().next().map(|p| p.id))
    }

    /// Create a person-organization connection (idempotent on the remote:
    /// an existing identical connection reports `already_existed`).
    pub async fn create_connection(
        &self,
        person_uuid: &str,
        org_uuid: &str,
        connection_type: &str,
    ) -> Result<CreateConnectionResult, SyncError> {
        let endpoint = "/connections";
        let token = self.mint_token()?;

        let body = serde_json::json!({
            "person_uuid": person_uuid,
            "org_uuid": org_uuid,
            "type": connection_type,
        });

        let response = self
            .client
            .post(self.api_url(endpoint))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        self.handle_response(response, endpoint).await
    }

    /// Delete a connection on the remote. Returns the remote success flag.
    pub async fn delete_connection(&self, connection_uuid: &str) -> Result<bool, SyncError> {
        let endpoint = format!("/connections/{}", connection_uuid);
        let token = self.mint_token()?;

        let response = self
            .client
            .delete(self.api_url(&endpoint))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status().is_success() {
            #[derive(Deserialize)]
            struct DeleteResult {
                #[serde(default = "default_true")]
                success: bool,
            }
            fn default_true() -> bool {
                true
            }

            let result: DeleteResult = response.json().await.unwrap_or(DeleteResult { success: true });
            Ok(result.success)
        } else {
            Err(SyncError::remote_api_full(
                "Failed to delete connection",
                response.status().as_u16(),
                &endpoint,
            ))
        }
    }
}

/// Extract a human-readable message from a JSON:API error body.
///
/// Accepts `{"message": "..."}` or `{"errors": [{"detail"|"title": "..."}]}`.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;

    if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
        return Some(message.to_string());
    }

    value
        .get("errors")
        .and_then(|e| e.as_array())
        .and_then(|arr| arr.first())
        .and_then(|err| err.get("detail").or_else(|| err.get("title")))
        .and_then(|m| m.as_str())
        .map(String::from)
}
