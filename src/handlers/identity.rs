use axum::Json;
use tracing::instrument;

use crate::middleware::RequestIdentity;
use crate::models::IdentityResponse;

/// Return the caller's identity as established by the auth layer.
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn me(identity: RequestIdentity) -> Json<IdentityResponse> {
    Json(IdentityResponse {
        expires_at: identity.claims.exp,
        claims: identity.claims.extra,
        id: identity.id,
    })
}
