// Copyright 2020 Alex Dukhno
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Enforces authentication before a query is dispatched, and screens
//! statements that touch elevated keywords against the principal's
//! permissions, per `spec.md` §4.4.

use crate::context::ConnectionContext;
use crate::error::{GatewayError, Result};
use crate::middleware::Middleware;
use async_trait::async_trait;

/// Keywords that require the `"admin"` permission regardless of the
/// statement's shape.
const ELEVATED_KEYWORDS: &[&str] = &["DROP", "GRANT", "REVOKE", "ALTER", "TRUNCATE"];

/// Rejects queries on unauthenticated connections (post-auth hook) and
/// rejects statements containing an elevated keyword unless the principal
/// carries the `"admin"` permission.
pub struct AuthenticatorMiddleware;

impl AuthenticatorMiddleware {
    /// Builds the middleware. Stateless; the principal lives on the
    /// connection context.
    pub fn new() -> Self {
        AuthenticatorMiddleware
    }

    fn requires_admin(sql: &str) -> bool {
        let upper = sql.to_ascii_uppercase();
        ELEVATED_KEYWORDS.iter().any(|keyword| {
            upper
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|token| token == *keyword)
        })
    }
}

impl Default for AuthenticatorMiddleware {
    fn default() -> Self {
        AuthenticatorMiddleware::new()
    }
}

#[async_trait]
impl Middleware for AuthenticatorMiddleware {
    fn name(&self) -> &'static str {
        "authenticator"
    }

    async fn on_query(&self, context: &mut ConnectionContext, sql: &str) -> Result<()> {
        let principal = context.principal.as_ref().ok_or_else(GatewayError::unauthenticated)?;
        if Self::requires_admin(sql) && !principal.has_permission("admin") {
            return Err(GatewayError::insufficient_permission("admin"));
        }
        Ok(())
    }
}
