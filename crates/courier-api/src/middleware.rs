use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use courier_types::api::Claims;

use crate::auth::AppState;

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::auth::create_token;
    use crate::test_support::{call, test_state};

    #[tokio::test]
    async fn protected_routes_reject_missing_or_bad_tokens() {
        let app = crate::router(test_state());

        let (status, _) = call(&app, Method::GET, "/unread_messages", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, Method::GET, "/unread_messages", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let forged = create_token("some-other-secret", uuid::Uuid::new_v4(), "mallory").unwrap();
        let (status, _) = call(&app, Method::GET, "/unread_messages", Some(&forged), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
