use async_trait::async_trait;
use azrbac_application::{
    PimSchedulesApi, RoleAssignmentsApi, RoleDefinitionsApi, RoleManagementPoliciesApi,
};
use azrbac_core::{ApiError, ApiResult, AppError, AppResult};
use azrbac_domain::{
    PimAssignmentKind, PolicyAssignment, PolicyRule, RoleAssignment, RoleAssignmentId,
    RoleAssignmentProperties, RoleDefinition, RoleManagementPolicy, ScheduleFilter,
    ScheduleInstance, ScheduleRequest, ScopeKind, ScopedPolicyId, odata_literal,
};
use http::StatusCode;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use uuid::Uuid;

mod wire;

use wire::{
    ErrorEnvelope, ListEnvelope, PolicyAssignmentResource, PolicyResource, PolicyRulesBody,
    PropertiesBody, RoleAssignmentResource, RoleDefinitionResource, ScheduleInstanceResource,
    ScheduleRequestProperties, ScheduleRequestResource,
};

const AUTHORIZATION_PROVIDER: &str = "/providers/Microsoft.Authorization";
const ROLE_ASSIGNMENTS_API_VERSION: &str = "2022-04-01";
const ROLE_DEFINITIONS_API_VERSION: &str = "2022-04-01";
const PIM_API_VERSION: &str = "2020-10-01";
const POLICIES_API_VERSION: &str = "2020-10-01";

/// Azure Resource Manager client for the authorization endpoints.
///
/// Each call is a single request. Waiting and retrying belong to the
/// reconciliation services, so transport errors surface unchanged.
#[derive(Clone)]
pub struct ArmRestClient {
    http_client: reqwest::Client,
    endpoint: Url,
    access_token: String,
}

impl ArmRestClient {
    /// Creates a client for the given ARM endpoint and bearer token.
    pub fn new(
        http_client: reqwest::Client,
        endpoint: &str,
        access_token: impl Into<String>,
    ) -> AppResult<Self> {
        let parsed = Url::parse(endpoint).map_err(|error| {
            AppError::Validation(format!("invalid ARM endpoint '{endpoint}': {error}"))
        })?;
        if parsed.cannot_be_a_base() {
            return Err(AppError::Validation(format!(
                "ARM endpoint '{endpoint}' must be an absolute http(s) URL"
            )));
        }

        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(AppError::Validation(
                "ARM access token must not be empty".to_owned(),
            ));
        }

        Ok(Self {
            http_client,
            endpoint: parsed,
            access_token,
        })
    }

    fn url(&self, path: &str, api_version: &str, query: &[(&str, &str)]) -> Url {
        resource_url(&self.endpoint, path, api_version, query)
    }

    fn role_assignment_url(&self, id: &RoleAssignmentId) -> Url {
        let tenant_id = id.tenant_id().map(|tenant_id| tenant_id.to_string());
        let query = tenant_id
            .as_deref()
            .map(|tenant_id| vec![("tenantId", tenant_id)])
            .unwrap_or_default();

        self.url(
            id.resource_path().as_str(),
            ROLE_ASSIGNMENTS_API_VERSION,
            &query,
        )
    }

    fn role_definitions_url(&self, scope: &str, role_name: &str) -> ApiResult<Url> {
        let lookup_scope = ScopeKind::role_definition_scope_of(scope)
            .map_err(|error| ApiError::new(StatusCode::BAD_REQUEST, None, error.to_string()))?;
        let filter = format!("roleName eq {}", odata_literal(role_name));

        Ok(self.url(
            provider_path(lookup_scope, "roleDefinitions").as_str(),
            ROLE_DEFINITIONS_API_VERSION,
            &[("$filter", filter.as_str())],
        ))
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        debug!(method = %method, url = %url, "sending ARM request");
        self.http_client
            .request(method, url)
            .bearer_auth(self.access_token.as_str())
    }

    async fn list_all<T: DeserializeOwned>(&self, first: Url) -> ApiResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next.take() {
            let page: ListEnvelope<T> = read_json(self.request(Method::GET, url)).await?;
            items.extend(page.value);
            next = page
                .next_link
                .filter(|link| !link.trim().is_empty())
                .map(|link| {
                    Url::parse(link.as_str()).map_err(|error| {
                        ApiError::transport(format!("invalid nextLink '{link}': {error}"))
                    })
                })
                .transpose()?;
        }

        Ok(items)
    }
}

/// Builds `{endpoint}{path}?api-version=...` with additional encoded query pairs.
pub(crate) fn resource_url(
    endpoint: &Url,
    path: &str,
    api_version: &str,
    query: &[(&str, &str)],
) -> Url {
    let mut url = endpoint.clone();
    url.set_path(path);
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.append_pair("api-version", api_version);
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }

    url
}

/// Joins a scope with a path under the authorization provider.
pub(crate) fn provider_path(scope: &str, suffix: &str) -> String {
    format!(
        "{}{AUTHORIZATION_PROVIDER}/{suffix}",
        scope.trim_end_matches('/')
    )
}

/// Decodes an ARM `{"error": {"code", "message"}}` body, falling back to the raw text.
pub(crate) fn decode_error(status: StatusCode, body: &str) -> ApiError {
    let fallback = || {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_owned()
        } else {
            trimmed.to_owned()
        }
    };

    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => ApiError::new(
            status,
            envelope.error.code,
            envelope.error.message.unwrap_or_else(fallback),
        ),
        Err(_) => ApiError::new(status, None, fallback()),
    }
}

fn schedule_requests_segment(kind: PimAssignmentKind) -> &'static str {
    match kind {
        PimAssignmentKind::Active => "roleAssignmentScheduleRequests",
        PimAssignmentKind::Eligible => "roleEligibilityScheduleRequests",
    }
}

fn schedule_instances_segment(kind: PimAssignmentKind) -> &'static str {
    match kind {
        PimAssignmentKind::Active => "roleAssignmentScheduleInstances",
        PimAssignmentKind::Eligible => "roleEligibilityScheduleInstances",
    }
}

async fn send(builder: reqwest::RequestBuilder) -> ApiResult<String> {
    let response = builder
        .send()
        .await
        .map_err(|error| ApiError::transport(format!("ARM request failed: {error}")))?;
    let status = response.status();
    let body = response.text().await.map_err(|error| {
        ApiError::transport(format!("failed to read ARM response body: {error}"))
    })?;

    if !status.is_success() {
        return Err(decode_error(status, body.as_str()));
    }

    Ok(body)
}

async fn read_json<T: DeserializeOwned>(builder: reqwest::RequestBuilder) -> ApiResult<T> {
    let body = send(builder).await?;
    serde_json::from_str(body.as_str()).map_err(|error| {
        ApiError::new(
            StatusCode::OK,
            None,
            format!("failed to decode ARM response: {error}"),
        )
    })
}

#[async_trait]
impl RoleAssignmentsApi for ArmRestClient {
    async fn create_role_assignment(
        &self,
        id: &RoleAssignmentId,
        properties: &RoleAssignmentProperties,
    ) -> ApiResult<RoleAssignment> {
        let url = self.role_assignment_url(id);
        let resource: RoleAssignmentResource = read_json(
            self.request(Method::PUT, url)
                .json(&PropertiesBody { properties }),
        )
        .await?;

        Ok(resource.into_assignment(id))
    }

    async fn get_role_assignment(&self, id: &RoleAssignmentId) -> ApiResult<RoleAssignment> {
        let url = self.role_assignment_url(id);
        let resource: RoleAssignmentResource = read_json(self.request(Method::GET, url)).await?;
        Ok(resource.into_assignment(id))
    }

    async fn delete_role_assignment(&self, id: &RoleAssignmentId) -> ApiResult<()> {
        let url = self.role_assignment_url(id);
        send(self.request(Method::DELETE, url)).await.map(|_| ())
    }
}

#[async_trait]
impl RoleDefinitionsApi for ArmRestClient {
    async fn get_role_definition(&self, role_definition_id: &str) -> ApiResult<RoleDefinition> {
        let url = self.url(role_definition_id, ROLE_DEFINITIONS_API_VERSION, &[]);
        let resource: RoleDefinitionResource = read_json(self.request(Method::GET, url)).await?;
        Ok(resource.into())
    }

    async fn find_role_definitions_by_name(
        &self,
        scope: &str,
        role_name: &str,
    ) -> ApiResult<Vec<RoleDefinition>> {
        let url = self.role_definitions_url(scope, role_name)?;
        let resources: Vec<RoleDefinitionResource> = self.list_all(url).await?;
        Ok(resources.into_iter().map(RoleDefinition::from).collect())
    }
}

#[async_trait]
impl PimSchedulesApi for ArmRestClient {
    async fn create_schedule_request(
        &self,
        kind: PimAssignmentKind,
        request: &ScheduleRequest,
    ) -> ApiResult<ScheduleRequest> {
        let name = Uuid::new_v4();
        let path = provider_path(
            request.scope.as_str(),
            format!("{}/{name}", schedule_requests_segment(kind)).as_str(),
        );
        let url = self.url(path.as_str(), PIM_API_VERSION, &[]);
        let properties = ScheduleRequestProperties::from_request(request);

        let resource: ScheduleRequestResource = read_json(
            self.request(Method::PUT, url)
                .json(&PropertiesBody {
                    properties: &properties,
                }),
        )
        .await?;

        Ok(resource.into_request(request.scope.as_str()))
    }

    async fn list_schedule_instances(
        &self,
        kind: PimAssignmentKind,
        scope: &str,
        filter: &ScheduleFilter,
    ) -> ApiResult<Vec<ScheduleInstance>> {
        let odata = filter.to_odata();
        let url = self.url(
            provider_path(scope, schedule_instances_segment(kind)).as_str(),
            PIM_API_VERSION,
            &[("$filter", odata.as_str())],
        );

        let resources: Vec<ScheduleInstanceResource> = self.list_all(url).await?;
        Ok(resources.into_iter().map(ScheduleInstance::from).collect())
    }

    async fn list_schedule_requests(
        &self,
        kind: PimAssignmentKind,
        scope: &str,
        filter: &ScheduleFilter,
    ) -> ApiResult<Vec<ScheduleRequest>> {
        let odata = filter.to_odata();
        let url = self.url(
            provider_path(scope, schedule_requests_segment(kind)).as_str(),
            PIM_API_VERSION,
            &[("$filter", odata.as_str())],
        );

        let resources: Vec<ScheduleRequestResource> = self.list_all(url).await?;
        Ok(resources
            .into_iter()
            .map(|resource| resource.into_request(scope))
            .collect())
    }
}

#[async_trait]
impl RoleManagementPoliciesApi for ArmRestClient {
    async fn get_policy(&self, id: &ScopedPolicyId) -> ApiResult<RoleManagementPolicy> {
        let url = self.url(id.to_string().as_str(), POLICIES_API_VERSION, &[]);
        let resource: PolicyResource = read_json(self.request(Method::GET, url)).await?;
        Ok(resource.into_policy(id))
    }

    async fn update_policy(
        &self,
        id: &ScopedPolicyId,
        rules: &[PolicyRule],
    ) -> ApiResult<RoleManagementPolicy> {
        let url = self.url(id.to_string().as_str(), POLICIES_API_VERSION, &[]);
        let resource: PolicyResource = read_json(
            self.request(Method::PATCH, url)
                .json(&PropertiesBody {
                    properties: &PolicyRulesBody { rules },
                }),
        )
        .await?;

        Ok(resource.into_policy(id))
    }

    async fn list_policy_assignments(&self, scope: &str) -> ApiResult<Vec<PolicyAssignment>> {
        let url = self.url(
            provider_path(scope, "roleManagementPolicyAssignments").as_str(),
            POLICIES_API_VERSION,
            &[],
        );

        let resources: Vec<PolicyAssignmentResource> = self.list_all(url).await?;
        Ok(resources
            .into_iter()
            .filter_map(PolicyAssignmentResource::into_assignment)
            .collect())
    }
}
