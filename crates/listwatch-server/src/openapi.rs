use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "listwatch API",
        version = "0.1.0",
        description = "Background crawl jobs tracking classifieds listings from active to sold."
    ),
    paths(
        crate::routes::create_job,
        crate::routes::list_jobs,
        crate::routes::get_job,
        crate::routes::list_actions,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::CreateJobRequest,
        crate::dto::CreateJobResponse,
        crate::dto::JobResponse,
        crate::dto::JobListResponse,
        crate::dto::ActionInfo,
        crate::dto::ParamInfo,
        crate::dto::ActionsResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "jobs", description = "Crawl job submission and status"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "API key. Set via LISTWATCH_API_KEY environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
