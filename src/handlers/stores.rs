use axum::extract::State;

use super::common::success_response;
use crate::collaborators::Store;
use crate::{ApiResponse, ApiResult, AppState};

#[utoipa::path(
    get,
    path = "/api/v1/stores",
    summary = "Pickup stores",
    description = "Active stores that accept pickup orders",
    responses(
        (status = 200, description = "Stores", body = ApiResponse<Vec<Store>>),
    ),
    tag = "Stores"
)]
pub async fn list_stores(State(state): State<AppState>) -> ApiResult<Vec<Store>> {
    let stores = state.services.stores.list_stores().await?;
    Ok(success_response(stores))
}
