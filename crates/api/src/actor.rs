//! Request actor
//!
//! Authentication happens upstream (gateway or admin panel); this service
//! trusts the identity headers it forwards and only evaluates the policy table.

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use pamdes_shared::{can, Action, Resource, Role};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_VILLAGE_HEADER: &str = "x-actor-village";

/// Who is making the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
    /// Village the actor belongs to; `None` only for super admins
    pub village_id: Option<Uuid>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl Actor {
    pub fn from_headers(headers: &HeaderMap) -> ApiResult<Self> {
        let id = header(headers, ACTOR_ID_HEADER)
            .ok_or(ApiError::Unauthorized)?
            .parse::<Uuid>()
            .map_err(|_| ApiError::Unauthorized)?;
        let role = header(headers, ACTOR_ROLE_HEADER)
            .ok_or(ApiError::Unauthorized)?
            .parse::<Role>()
            .map_err(|_| ApiError::Unauthorized)?;
        let village_id = header(headers, ACTOR_VILLAGE_HEADER)
            .map(|v| v.parse::<Uuid>().map_err(|_| ApiError::Unauthorized))
            .transpose()?;

        if village_id.is_none() && role != Role::SuperAdmin {
            return Err(ApiError::Unauthorized);
        }

        Ok(Self {
            id,
            role,
            village_id,
        })
    }

    /// Check tenant scope and the role policy for one operation
    pub fn authorize(&self, village_id: Uuid, action: Action, resource: Resource) -> ApiResult<()> {
        if self.role != Role::SuperAdmin && self.village_id != Some(village_id) {
            tracing::warn!(
                actor_id = %self.id,
                role = %self.role,
                village_id = %village_id,
                "Actor outside its village"
            );
            return Err(ApiError::Forbidden);
        }

        if !can(self.role, action, resource) {
            tracing::warn!(
                actor_id = %self.id,
                role = %self.role,
                action = ?action,
                resource = ?resource,
                "Action not permitted for role"
            );
            return Err(ApiError::Forbidden);
        }

        Ok(())
    }

    /// Customers may only act on their own account
    pub fn ensure_customer(&self, customer_id: Uuid) -> ApiResult<()> {
        if self.role == Role::Customer && self.id != customer_id {
            return Err(ApiError::Forbidden);
        }
        Ok(())
    }
}

/// Middleware that requires actor headers and attaches the [`Actor`] to the request
pub async fn require_actor(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let actor = Actor::from_headers(req.headers())?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}
