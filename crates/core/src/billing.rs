//! Billing store: plans, credit balances and subscription state.
//!
//! Credit consumption performs the balance check and the increment under
//! one write lock, so concurrent consumers cannot observe the same
//! `used_credits` value and overwrite each other. Subscription events are
//! applied as absolute upserts keyed by the processor's subscription id,
//! never as relative increments, so redelivered events are no-ops.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Standard,
    Enterprise,
}

impl Plan {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Standard => "standard",
            Self::Enterprise => "enterprise",
        }
    }

    /// Monthly credit allotment per plan.
    pub fn credits(self) -> i64 {
        match self {
            Self::Free => 100,
            Self::Standard => 1000,
            Self::Enterprise => 10_000,
        }
    }

    /// Best-effort mapping from the processor's price id or plan label.
    pub fn from_price(price_id: &str, plan_name: Option<&str>) -> Plan {
        let haystack = format!("{} {}", price_id, plan_name.unwrap_or("")).to_lowercase();
        if haystack.contains("enterprise") {
            Plan::Enterprise
        } else {
            Plan::Standard
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Trialing,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Trialing => "trialing",
        }
    }

    pub fn parse(value: &str) -> SubscriptionStatus {
        match value {
            "active" => Self::Active,
            "past_due" => Self::PastDue,
            "trialing" => Self::Trialing,
            _ => Self::Canceled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingAccount {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub total_credits: i64,
    pub used_credits: i64,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BillingAccount {
    pub fn available_credits(&self) -> i64 {
        self.total_credits - self.used_credits
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub user_id: Uuid,
    pub action: String,
    pub credits_used: i64,
    pub credits_remaining: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful credit consumption.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CreditReceipt {
    pub action: String,
    pub credits_consumed: i64,
    pub credits_remaining: i64,
    pub total_credits: i64,
    pub used_credits: i64,
    pub percentage_used: i64,
}

/// Subscription lifecycle events as delivered by the payment processor.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    CheckoutCompleted {
        user_id: Uuid,
        subscription_id: String,
        price_id: String,
        plan_name: Option<String>,
        period_end: Option<DateTime<Utc>>,
    },
    SubscriptionUpdated {
        subscription_id: String,
        price_id: String,
        status: SubscriptionStatus,
        period_end: Option<DateTime<Utc>>,
    },
    SubscriptionDeleted {
        subscription_id: String,
    },
}

#[derive(Debug, Default)]
struct BillingState {
    accounts: HashMap<Uuid, BillingAccount>,
    transactions: Vec<CreditTransaction>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredBillingState {
    accounts: Vec<BillingAccount>,
    transactions: Vec<CreditTransaction>,
}

impl From<StoredBillingState> for BillingState {
    fn from(value: StoredBillingState) -> Self {
        Self {
            accounts: value
                .accounts
                .into_iter()
                .map(|account| (account.user_id, account))
                .collect(),
            transactions: value.transactions,
        }
    }
}

impl From<&BillingState> for StoredBillingState {
    fn from(value: &BillingState) -> Self {
        Self {
            accounts: value.accounts.values().cloned().collect(),
            transactions: value.transactions.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BillingStore {
    state: Arc<RwLock<BillingState>>,
    file_path: PathBuf,
}

impl BillingStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|err| Error::Storage(format!("Failed to create data directory: {}", err)))?;
        let file_path = base_dir.join("billing.json");
        let state = load_state(&file_path).await?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            file_path,
        })
    }

    /// Idempotent: signup calls this once per user; repeated calls keep
    /// the existing account untouched.
    pub async fn ensure_account(&self, user_id: Uuid, org_id: Uuid) -> Result<BillingAccount> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.accounts.get(&user_id) {
            return Ok(existing.clone());
        }
        let account = BillingAccount {
            user_id,
            org_id,
            plan: Plan::Free,
            status: SubscriptionStatus::Active,
            total_credits: Plan::Free.credits(),
            used_credits: 0,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            stripe_price_id: None,
            current_period_end: None,
            updated_at: Utc::now(),
        };
        state.accounts.insert(user_id, account.clone());
        persist_state(&self.file_path, &state).await?;
        Ok(account)
    }

    pub async fn account_for_user(&self, user_id: Uuid) -> Result<BillingAccount> {
        let state = self.state.read().await;
        state
            .accounts
            .get(&user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("Billing information not found".to_string()))
    }

    /// Consume credits for an action. The check and the increment happen
    /// under the same write guard; an insufficient balance leaves
    /// `used_credits` unchanged.
    pub async fn consume(
        &self,
        user_id: Uuid,
        action: &str,
        credits: i64,
        metadata: serde_json::Value,
    ) -> Result<CreditReceipt> {
        if action.trim().is_empty() || credits <= 0 {
            return Err(Error::InvalidInput(
                "\"action\" and a positive \"credits\" amount are required".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&user_id)
            .ok_or_else(|| Error::NotFound("Billing information not found".to_string()))?;

        if account.status != SubscriptionStatus::Active {
            return Err(Error::SubscriptionInactive);
        }
        let available = account.available_credits();
        if available < credits {
            return Err(Error::InsufficientCredits {
                available,
                required: credits,
            });
        }

        account.used_credits += credits;
        account.updated_at = Utc::now();
        let receipt = CreditReceipt {
            action: action.to_string(),
            credits_consumed: credits,
            credits_remaining: account.available_credits(),
            total_credits: account.total_credits,
            used_credits: account.used_credits,
            percentage_used: if account.total_credits > 0 {
                (account.used_credits * 100 + account.total_credits / 2) / account.total_credits
            } else {
                0
            },
        };
        let transaction = CreditTransaction {
            user_id,
            action: action.to_string(),
            credits_used: credits,
            credits_remaining: receipt.credits_remaining,
            metadata,
            created_at: Utc::now(),
        };
        state.transactions.push(transaction);
        persist_state(&self.file_path, &state).await?;
        Ok(receipt)
    }

    /// Apply a subscription lifecycle event. Safe under at-least-once
    /// delivery: every field write is absolute.
    pub async fn apply_event(&self, event: SubscriptionEvent) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        match event {
            SubscriptionEvent::CheckoutCompleted {
                user_id,
                subscription_id,
                price_id,
                plan_name,
                period_end,
            } => {
                let account = state
                    .accounts
                    .get_mut(&user_id)
                    .ok_or_else(|| Error::NotFound("Billing information not found".to_string()))?;
                let plan = Plan::from_price(&price_id, plan_name.as_deref());
                account.plan = plan;
                account.status = SubscriptionStatus::Active;
                account.total_credits = plan.credits();
                account.used_credits = 0;
                account.stripe_subscription_id = Some(subscription_id);
                account.stripe_price_id = Some(price_id);
                account.current_period_end = period_end;
                account.updated_at = now;
            }
            SubscriptionEvent::SubscriptionUpdated {
                subscription_id,
                price_id,
                status,
                period_end,
            } => {
                let Some(account) = state.accounts.values_mut().find(|account| {
                    account.stripe_subscription_id.as_deref() == Some(subscription_id.as_str())
                }) else {
                    // Unknown subscription ids are ignored so a replayed
                    // event for a deleted account cannot fail the webhook.
                    tracing::warn!(%subscription_id, "Subscription update for unknown account");
                    return Ok(());
                };
                account.stripe_price_id = Some(price_id);
                account.status = status;
                account.current_period_end = period_end;
                account.updated_at = now;
            }
            SubscriptionEvent::SubscriptionDeleted { subscription_id } => {
                let Some(account) = state.accounts.values_mut().find(|account| {
                    account.stripe_subscription_id.as_deref() == Some(subscription_id.as_str())
                }) else {
                    tracing::warn!(%subscription_id, "Subscription delete for unknown account");
                    return Ok(());
                };
                account.plan = Plan::Free;
                account.status = SubscriptionStatus::Canceled;
                account.total_credits = Plan::Free.credits();
                account.used_credits = account.used_credits.min(Plan::Free.credits());
                account.stripe_subscription_id = None;
                account.stripe_price_id = None;
                account.current_period_end = None;
                account.updated_at = now;
            }
        }
        persist_state(&self.file_path, &state).await?;
        Ok(())
    }
}

async fn load_state(path: &Path) -> Result<BillingState> {
    if !path.exists() {
        return Ok(BillingState::default());
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::Storage(format!("Failed to read billing store: {}", err)))?;
    if content.trim().is_empty() {
        return Ok(BillingState::default());
    }
    let stored: StoredBillingState = serde_json::from_str(&content)
        .map_err(|err| Error::Storage(format!("Failed to parse billing store: {}", err)))?;
    Ok(stored.into())
}

async fn persist_state(path: &Path, state: &BillingState) -> Result<()> {
    let content = serde_json::to_string_pretty(&StoredBillingState::from(state))
        .map_err(|err| Error::Storage(format!("Failed to serialize billing store: {}", err)))?;
    tokio::fs::write(path, content)
        .await
        .map_err(|err| Error::Storage(format!("Failed to write billing store: {}", err)))?;
    Ok(())
}
