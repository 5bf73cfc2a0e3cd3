//! OpenAPI document assembly, served at `/api-docs/openapi.json` when
//! `config.enable_swagger` is set.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "lmx-server",
    description = "Local multi-model inference orchestration HTTP/SSE surface",
    version = env!("CARGO_PKG_VERSION"),
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
