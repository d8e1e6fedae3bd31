//! Post-signup hooks.
//!
//! Hooks run inside the signup transaction after the user and profile rows are
//! written. An error from any hook rolls the whole signup back.

use anyhow::{Context, Result};
use sqlx::{Postgres, Transaction};
use std::{fmt, future::Future, pin::Pin, sync::Arc};
use tracing::debug;
use uuid::Uuid;

/// The account a signup just created.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
}

pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

pub trait PostSignupHook: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_signup<'a>(
        &'a self,
        tx: &'a mut Transaction<'static, Postgres>,
        user: &'a NewUser,
    ) -> HookFuture<'a>;
}

/// Ordered set of hooks run after every successful signup.
#[derive(Clone, Default)]
pub struct SignupHooks {
    hooks: Vec<Arc<dyn PostSignupHook>>,
}

impl SignupHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, hook: Arc<dyn PostSignupHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook in registration order, stopping at the first failure.
    ///
    /// # Errors
    /// Returns the first hook error, annotated with the hook name.
    pub async fn run(&self, tx: &mut Transaction<'static, Postgres>, user: &NewUser) -> Result<()> {
        for hook in &self.hooks {
            debug!(hook = hook.name(), user_id = %user.id, "running post-signup hook");
            hook.on_signup(tx, user)
                .await
                .with_context(|| format!("post-signup hook {} failed", hook.name()))?;
        }
        Ok(())
    }
}

impl fmt::Debug for SignupHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl PostSignupHook for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn on_signup<'a>(
            &'a self,
            _tx: &'a mut Transaction<'static, Postgres>,
            _user: &'a NewUser,
        ) -> HookFuture<'a> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn hooks_keep_registration_order() {
        let hooks = SignupHooks::new()
            .with(Arc::new(Named("first")))
            .with(Arc::new(Named("second")));
        assert_eq!(hooks.names(), vec!["first", "second"]);
        assert!(!hooks.is_empty());
        assert_eq!(format!("{hooks:?}"), r#"["first", "second"]"#);
    }

    #[test]
    fn empty_by_default() {
        assert!(SignupHooks::default().is_empty());
    }
}
