use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use parley_types::api::Claims;

use crate::error::{ApiError, join_error};
use crate::state::AppState;

/// Identity resolution boundary: validate the bearer token minted by
/// the external identity service and attach the resolved claims to the
/// request. Also refreshes the local profile cache so hydration can
/// resolve usernames without calling out.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Authentication)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Authentication)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Authentication)?;

    let claims = token_data.claims;

    let db = state.db.clone();
    let profile = claims.clone();
    tokio::task::spawn_blocking(move || {
        db.upsert_user(
            &profile.sub.to_string(),
            &profile.username,
            profile.avatar_url.as_deref(),
            &parley_db::now_ts(),
        )
    })
    .await
    .map_err(join_error)??;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
