use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};

use shared_config::AppConfig;
use shared_models::auth::{User, STAFF_ROLES};
use shared_models::error::AppError;

use crate::jwt::validate_token;

/// Validates the bearer token and stores the acting [`User`] in the request extensions.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let auth_value = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    let token = auth_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))?;

    let user = validate_token(token, &config.supabase_jwt_secret)
        .map_err(|e| AppError::Auth(e.to_string()))?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Front-desk operations are restricted to clinic staff.
pub fn require_staff(user: &User) -> Result<(), AppError> {
    if user.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Role {:?} may not manage schedules; expected one of {}",
            user.role.as_deref().unwrap_or("none"),
            STAFF_ROLES.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestUser;

    #[test]
    fn staff_roles_pass_and_patients_are_forbidden() {
        assert!(require_staff(&TestUser::receptionist("desk@clinic.test").to_user()).is_ok());
        assert!(require_staff(&TestUser::pharmacist("rx@clinic.test").to_user()).is_ok());

        let err = require_staff(&TestUser::patient("someone@example.com").to_user()).unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }
}
