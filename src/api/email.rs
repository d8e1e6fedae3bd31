//! Email outbox and delivery.
//!
//! Flows that send mail (activation, password reset) never talk to a mail
//! provider directly. They insert a row in `email_outbox` inside their own
//! transaction through [`enqueue_email`], so the message exists if and only if
//! the surrounding change committed.
//!
//! A background task polls the table, locks a batch with
//! `FOR UPDATE SKIP LOCKED` and hands each row to an [`EmailSender`]. Failures
//! are retried with exponential backoff and jitter until `max_attempts`, then
//! the row is marked `failed`.
//!
//! Two senders ship with the crate: [`LogEmailSender`] logs the message, and
//! [`WebhookEmailSender`] posts it as JSON to an HTTP endpoint that renders and
//! delivers it.
use anyhow::{anyhow, Context, Result};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{error, info, info_span, Instrument};
use url::Url;
use uuid::Uuid;

pub const TEMPLATE_ACTIVATION_CREATED: &str = "activation_created";
pub const TEMPLATE_ACTIVATION_RESEND: &str = "activation_resend";
pub const TEMPLATE_PASSWORD_RESET: &str = "password_reset";

#[derive(Clone, Debug, Serialize)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload: serde_json::Value,
}

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Email delivery abstraction used by the outbox worker.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    fn send<'a>(&'a self, message: &'a EmailMessage) -> SendFuture<'a>;
}

/// Sender that logs the payload instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> SendFuture<'a> {
        Box::pin(async move {
            info!(
                to_email = %message.to_email,
                template = %message.template,
                payload = %message.payload,
                "email outbox send stub"
            );
            Ok(())
        })
    }
}

/// Posts each message as JSON to a delivery webhook.
#[derive(Clone, Debug)]
pub struct WebhookEmailSender {
    client: reqwest::Client,
    url: Url,
}

impl WebhookEmailSender {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(url: &str, token: Option<SecretString>) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid email webhook URL: {url}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("Email webhook URL must use http or https: {url}"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .context("Invalid email webhook token")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build email webhook client")?;

        Ok(Self { client, url })
    }
}

impl EmailSender for WebhookEmailSender {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> SendFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.url.clone())
                .json(message)
                .send()
                .await
                .context("email webhook request failed")?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(anyhow!("email webhook returned {status}"))
            }
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EmailWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl EmailWorkerConfig {
    /// 5s poll interval, 10 messages per batch, 5 attempts and 5s to 5m
    /// exponential backoff.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    /// Replace zero values with the smallest usable ones and keep
    /// `backoff_max >= backoff_base`.
    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        Self {
            poll_interval,
            batch_size: self.batch_size.max(1),
            max_attempts: self.max_attempts.max(1),
            backoff_base,
            backoff_max: self.backoff_max.max(backoff_base),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue a message in the outbox as part of the caller's transaction.
///
/// # Errors
/// Returns an error if the payload cannot be serialized or the insert fails.
pub async fn enqueue_email(
    tx: &mut Transaction<'_, Postgres>,
    to_email: &str,
    template: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    let payload_text = serde_json::to_string(payload).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;

    Ok(())
}

/// Spawn a background task that polls and processes the email outbox.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        let poll_interval = config.poll_interval();

        loop {
            if let Err(err) = process_outbox_batch(&pool, sender.as_ref(), &config).await {
                error!("email outbox batch failed: {err:#}");
            }

            sleep(poll_interval).await;
        }
    })
}

async fn process_outbox_batch(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &EmailWorkerConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start email outbox transaction")?;

    let query = r"
        SELECT id, to_email, template, payload_json::text AS payload_json, attempts
        FROM email_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(0))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load email outbox batch")?;

    if rows.is_empty() {
        tx.commit()
            .await
            .context("failed to commit empty outbox batch")?;
        return Ok(0);
    }

    let row_count = rows.len();
    for row in rows {
        let id: Uuid = row.get("id");
        let attempts: i32 = row.get("attempts");
        let attempts = u32::try_from(attempts).unwrap_or(0);
        let payload_text: String = row.get("payload_json");

        let send_result = match serde_json::from_str(&payload_text) {
            Ok(payload) => {
                let message = EmailMessage {
                    to_email: row.get("to_email"),
                    template: row.get("template"),
                    payload,
                };
                sender.send(&message).await
            }
            Err(err) => Err(anyhow!("invalid outbox payload: {err}")),
        };

        let attempt = attempts.saturating_add(1);
        let state = next_state(attempt, send_result, config);
        update_outbox_status(&mut tx, id, attempt, &state).await?;
    }

    tx.commit()
        .await
        .context("failed to commit email outbox batch")?;

    Ok(row_count)
}

/// Where a row goes after a delivery attempt.
#[derive(Debug, PartialEq, Eq)]
enum OutboxState {
    Sent,
    Retry { error: String, delay: Duration },
    Failed { error: String },
}

impl OutboxState {
    fn status(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Retry { .. } => "pending",
            Self::Failed { .. } => "failed",
        }
    }

    fn error(&self) -> Option<&str> {
        match self {
            Self::Sent => None,
            Self::Retry { error, .. } | Self::Failed { error } => Some(error),
        }
    }

    fn delay(&self) -> Duration {
        match self {
            Self::Retry { delay, .. } => *delay,
            Self::Sent | Self::Failed { .. } => Duration::ZERO,
        }
    }
}

/// `attempt` counts the attempt that just finished, starting at 1.
fn next_state(attempt: u32, send_result: Result<()>, config: &EmailWorkerConfig) -> OutboxState {
    match send_result {
        Ok(()) => OutboxState::Sent,
        Err(err) if attempt >= config.max_attempts() => OutboxState::Failed {
            error: format!("{err:#}"),
        },
        Err(err) => OutboxState::Retry {
            error: format!("{err:#}"),
            delay: backoff_delay(attempt, config.backoff_base(), config.backoff_max()),
        },
    }
}

async fn update_outbox_status(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    attempt: u32,
    state: &OutboxState,
) -> Result<()> {
    if let OutboxState::Failed { error } = state {
        error!(outbox_id = %id, attempts = attempt, "giving up on email: {error}");
    }

    let query = r"
        UPDATE email_outbox
        SET status = $2,
            attempts = $3,
            last_error = $4,
            sent_at = CASE WHEN $2 = 'sent' THEN NOW() ELSE sent_at END,
            next_attempt_at = NOW() + ($5 * INTERVAL '1 millisecond')
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .bind(state.status())
        .bind(i32::try_from(attempt).unwrap_or(i32::MAX))
        .bind(state.error())
        .bind(i64::try_from(state.delay().as_millis()).unwrap_or(i64::MAX))
        .execute(&mut **tx)
        .instrument(span)
        .await
        .with_context(|| format!("failed to mark outbox row {}", state.status()))?;

    Ok(())
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    jitter_delay(delay.min(max))
}

// Uniform in [delay/2, delay].
fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}
