pub mod jwt;
pub mod password;
pub mod session;
pub mod throttle;

use std::marker::PhantomData;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Role, User},
    schema::users,
    state::AppState,
};

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Role gates resolve the user before the handler does.
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        let mut conn = state.db()?;
        let active = session::touch_session(
            &mut conn,
            claims.sid,
            claims.sub,
            Duration::minutes(state.config.session_timeout_minutes),
            Utc::now().naive_utc(),
        )?;
        if !active {
            return Err(AppError::session_expired());
        }

        let user: User = users::table
            .find(claims.sub)
            .first(&mut conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;
        let role = user.role().ok_or_else(AppError::unauthorized)?;

        let authenticated = AuthenticatedUser {
            user_id: user.id,
            session_id: claims.sid,
            username: user.username,
            full_name: user.full_name,
            role,
        };
        parts.extensions.insert(authenticated.clone());
        Ok(authenticated)
    }
}

/// Set of roles allowed through a [`RequireRole`] gate.
pub trait RoleRequirement: Send + Sync + 'static {
    const ROLES: &'static [Role];
}

pub struct AdminOnly;
pub struct ManagerOnly;
pub struct DirectorOnly;
/// Managers and directors.
pub struct Reviewer;
pub struct AnyRole;

impl RoleRequirement for AdminOnly {
    const ROLES: &'static [Role] = &[Role::Admin];
}

impl RoleRequirement for ManagerOnly {
    const ROLES: &'static [Role] = &[Role::Manager];
}

impl RoleRequirement for DirectorOnly {
    const ROLES: &'static [Role] = &[Role::Director];
}

impl RoleRequirement for Reviewer {
    const ROLES: &'static [Role] = &[Role::Manager, Role::Director];
}

impl RoleRequirement for AnyRole {
    const ROLES: &'static [Role] = &Role::ALL;
}

pub struct RequireRole<R> {
    pub user: AuthenticatedUser,
    _requirement: PhantomData<R>,
}

#[async_trait]
impl<R: RoleRequirement> FromRequestParts<AppState> for RequireRole<R> {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !R::ROLES.contains(&user.role) {
            tracing::warn!(
                user_id = %user.user_id,
                role = %user.role,
                path = %parts.uri.path(),
                "role not allowed for route"
            );
            return Err(AppError::forbidden("access denied for this role"));
        }
        Ok(Self {
            user,
            _requirement: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviewer_gate_admits_manager_and_director_only() {
        assert!(Reviewer::ROLES.contains(&Role::Manager));
        assert!(Reviewer::ROLES.contains(&Role::Director));
        assert!(!Reviewer::ROLES.contains(&Role::Admin));
        assert_eq!(AnyRole::ROLES.len(), 3);
    }
}
