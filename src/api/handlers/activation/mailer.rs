//! Activation email issuance, also registered as a post-signup hook.

use anyhow::Result;
use serde_json::{json, Value};
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};

use super::{
    model::{ActivationCode, NewActivationCode},
    storage::{insert_code, latest_pending_code, InactiveUser},
};
use crate::api::{
    email::{enqueue_email, TEMPLATE_ACTIVATION_CREATED, TEMPLATE_ACTIVATION_RESEND},
    handlers::auth::{utils::build_activation_url, HookFuture, NewUser, PostSignupHook},
};

/// Queues activation emails through the outbox.
#[derive(Clone, Debug)]
pub struct ActivationMailer {
    frontend_base_url: String,
}

impl ActivationMailer {
    #[must_use]
    pub fn new(frontend_base_url: impl Into<String>) -> Self {
        Self {
            frontend_base_url: frontend_base_url.into(),
        }
    }

    /// Queue an activation email for `user`.
    ///
    /// The newest pending code is reused; a fresh signup (`created`) gets a new
    /// code when none is pending, a resend without a pending code is a no-op.
    ///
    /// # Errors
    /// Returns an error if the code or the outbox row cannot be written.
    pub(super) async fn issue(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user: &InactiveUser,
        created: bool,
    ) -> Result<Option<ActivationCode>> {
        let code = match latest_pending_code(tx, user.id).await? {
            Some(code) => {
                debug!(
                    user_id = %user.id,
                    code_id = code.id,
                    code_created = %code.created,
                    code_modified = %code.modified,
                    "reusing pending activation code"
                );
                code
            }
            None if created => insert_code(tx, &NewActivationCode::new(user.id)).await?,
            None => {
                debug!(user_id = %user.id, "no pending activation code to resend");
                return Ok(None);
            }
        };

        let payload = self.payload(user, &code.key);
        enqueue_email(tx, &user.email, template(created), &payload).await?;
        info!(user_id = %user.id, created, "activation email queued");
        Ok(Some(code))
    }

    fn payload(&self, user: &InactiveUser, key: &str) -> Value {
        json!({
            "username": user.username,
            "email": user.email,
            "activation_url": build_activation_url(&self.frontend_base_url, key),
            "activation_key": key,
        })
    }
}

fn template(created: bool) -> &'static str {
    if created {
        TEMPLATE_ACTIVATION_CREATED
    } else {
        TEMPLATE_ACTIVATION_RESEND
    }
}

impl From<&NewUser> for InactiveUser {
    fn from(user: &NewUser) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

impl PostSignupHook for ActivationMailer {
    fn name(&self) -> &'static str {
        "activation_mailer"
    }

    fn on_signup<'a>(
        &'a self,
        tx: &'a mut Transaction<'static, Postgres>,
        user: &'a NewUser,
    ) -> HookFuture<'a> {
        Box::pin(async move {
            if user.is_active {
                return Ok(());
            }
            self.issue(tx, &InactiveUser::from(user), true).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::SignupHooks;
    use std::sync::Arc;
    use uuid::Uuid;

    fn user() -> InactiveUser {
        InactiveUser {
            id: Uuid::nil(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
        }
    }

    #[test]
    fn payload_links_to_frontend_activation_page() {
        let mailer = ActivationMailer::new("https://app.example.com/");
        let payload = mailer.payload(&user(), "abc123");
        assert_eq!(payload["username"], "alice");
        assert_eq!(payload["email"], "alice@example.com");
        assert_eq!(payload["activation_key"], "abc123");
        assert_eq!(
            payload["activation_url"],
            "https://app.example.com/activate/abc123"
        );
    }

    #[test]
    fn template_depends_on_signup() {
        assert_eq!(template(true), TEMPLATE_ACTIVATION_CREATED);
        assert_eq!(template(false), TEMPLATE_ACTIVATION_RESEND);
    }

    #[test]
    fn registers_as_signup_hook() {
        let hooks = SignupHooks::new().with(Arc::new(ActivationMailer::new("http://localhost")));
        assert_eq!(hooks.names(), vec!["activation_mailer"]);
    }
}
