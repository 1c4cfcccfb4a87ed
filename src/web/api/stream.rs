use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};

use crate::web::server::AppState;

#[utoipa::path(
    get,
    path = "/stream",
    tag = "stream",
    responses(
        (status = 101, description = "Switched to a websocket carrying JSON stream messages")
    )
)]
pub async fn subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    state.broadcaster.handle_conn(ws).await
}
