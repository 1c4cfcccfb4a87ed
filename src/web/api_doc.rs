use utoipa::OpenApi;

use super::api::checks::{AbortRequest, AbortResponse};
use super::api::error::ErrorResponse;

#[derive(OpenApi)]
#[openapi(
    paths(
        super::api::checks::list_checks,
        super::api::checks::abort_checks,
        super::api::checks::status,
        super::api::checks::render_metrics,
        super::api::stream::subscribe,
    ),
    components(
        schemas(
            AbortRequest,
            AbortResponse,
            ErrorResponse,
            crate::message::Message,
        )
    ),
    info(
        title = "Abort Stream API",
        description = "Relays check abort notifications to connected agents",
        version = "0.1.0"
    ),
    tags(
        (name = "checks", description = "Aborted checks"),
        (name = "stream", description = "Live message stream"),
        (name = "status", description = "Liveness")
    )
)]
pub struct ApiDoc;
