//! Accounts, API tokens and observation quota

use crate::db::{from_millis, now_millis, parse_col, Database};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

/// Subscription plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Starter,
    Pro,
}

impl Default for Plan {
    fn default() -> Self {
        Self::Starter
    }
}

impl Plan {
    /// Observations included per billing period.
    pub fn observation_limit(&self) -> i64 {
        match self {
            Plan::Starter => 50,
            Plan::Pro => 200,
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starter => write!(f, "starter"),
            Self::Pro => write!(f, "pro"),
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            _ => Err(format!("unknown plan: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

impl Default for BillingPeriod {
    fn default() -> Self {
        Self::Monthly
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Monthly => write!(f, "monthly"),
            Self::Yearly => write!(f, "yearly"),
        }
    }
}

impl std::str::FromStr for BillingPeriod {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(format!("unknown billing period: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Inactive,
    Active,
    PastDue,
    Canceled,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Inactive
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Active => write!(f, "active"),
            Self::PastDue => write!(f, "past_due"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(Self::Inactive),
            "active" | "trialing" => Ok(Self::Active),
            "past_due" | "unpaid" => Ok(Self::PastDue),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            _ => Err(format!("unknown subscription status: {}", s)),
        }
    }
}

/// A registered account. The API token hash is never part of this view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub name: String,
    pub plan: Plan,
    pub billing_period: BillingPeriod,
    pub subscription_status: SubscriptionStatus,
    pub observations_used: i64,
    pub observations_limit: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn remaining(&self) -> i64 {
        (self.observations_limit - self.observations_used).max(0)
    }
}

/// Sign-up input
#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub billing_period: BillingPeriod,
}

/// SHA-256 of an API token, hex encoded
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_token() -> String {
    format!("vt_{}", hex::encode(rand::random::<[u8; 32]>()))
}

const ACCOUNT_COLUMNS: &str = "id, email, name, plan, billing_period, subscription_status, \
     observations_used, observations_limit, created_at, updated_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        plan: parse_col(row, 3)?,
        billing_period: parse_col(row, 4)?,
        subscription_status: parse_col(row, 5)?,
        observations_used: row.get(6)?,
        observations_limit: row.get(7)?,
        created_at: from_millis(row.get(8)?),
        updated_at: from_millis(row.get(9)?),
    })
}

/// Account persistence
#[derive(Clone)]
pub struct AccountStore {
    db: Database,
}

impl AccountStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an account. Returns the account and its API token; the token
    /// is not recoverable afterwards.
    pub fn create(&self, input: &NewAccount, activate: bool) -> Result<(Account, String)> {
        let email = input.email.trim().to_ascii_lowercase();
        let name = input.name.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::InvalidInput("a valid email is required".into()));
        }
        if name.is_empty() {
            return Err(Error::InvalidInput("name is required".into()));
        }

        let id = Uuid::new_v4().to_string();
        let token = generate_token();
        let now = now_millis();
        let status = if activate {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::Inactive
        };

        let conn = self.db.connection();
        let conn = conn.lock();
        let inserted = conn.execute(
            "INSERT INTO accounts (id, email, name, plan, billing_period, subscription_status,
                 observations_used, observations_limit, token_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?9)
             ON CONFLICT(email) DO NOTHING",
            params![
                id,
                email,
                name,
                input.plan.to_string(),
                input.billing_period.to_string(),
                status.to_string(),
                input.plan.observation_limit(),
                hash_token(&token),
                now,
            ],
        )?;
        if inserted == 0 {
            return Err(Error::AlreadyExists {
                kind: "account".into(),
                id: email,
            });
        }

        info!(account_id = %id, plan = %input.plan, "Created account");
        let account = Account {
            id,
            email,
            name,
            plan: input.plan,
            billing_period: input.billing_period,
            subscription_status: status,
            observations_used: 0,
            observations_limit: input.plan.observation_limit(),
            created_at: from_millis(now),
            updated_at: from_millis(now),
        };
        Ok((account, token))
    }

    pub fn get(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let account = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS),
                params![id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let account = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE email = ?1", ACCOUNT_COLUMNS),
                params![email.trim().to_ascii_lowercase()],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    /// Resolve a bearer token to its account.
    pub fn find_by_token(&self, token: &str) -> Result<Option<Account>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let account = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE token_hash = ?1", ACCOUNT_COLUMNS),
                params![hash_token(token)],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    /// Reserve `n` observations against the account's quota in one
    /// conditional update. Fails without side effects when the
    /// subscription is not active or the quota would be exceeded.
    pub fn reserve_quota(&self, id: &str, n: i64) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let updated = conn.execute(
            "UPDATE accounts
             SET observations_used = observations_used + ?2, updated_at = ?3
             WHERE id = ?1 AND subscription_status = 'active'
               AND observations_used + ?2 <= observations_limit",
            params![id, n, now_millis()],
        )?;
        if updated == 1 {
            debug!(account_id = %id, n, "Reserved observation quota");
            return Ok(());
        }

        let row: Option<(String, i64, i64)> = conn
            .query_row(
                "SELECT subscription_status, observations_used, observations_limit
                 FROM accounts WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        match row {
            None => Err(Error::not_found("Account", id)),
            Some((status, _, _)) if status != "active" => Err(Error::QuotaExceeded(format!(
                "Subscription is not active (status: {})",
                status
            ))),
            Some((_, used, limit)) => Err(Error::QuotaExceeded(format!(
                "Observation limit reached ({} of {} used, {} requested)",
                used, limit, n
            ))),
        }
    }

    /// Give back a reservation that was not used.
    pub fn release_quota(&self, id: &str, n: i64) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "UPDATE accounts
             SET observations_used = MAX(observations_used - ?2, 0), updated_at = ?3
             WHERE id = ?1",
            params![id, n, now_millis()],
        )?;
        debug!(account_id = %id, n, "Released observation quota");
        Ok(())
    }

    /// Apply a billing update. A plan change also resets the limit.
    pub fn set_subscription(
        &self,
        id: &str,
        status: SubscriptionStatus,
        plan: Option<Plan>,
    ) -> Result<Account> {
        {
            let conn = self.db.connection();
            let conn = conn.lock();
            let updated = match plan {
                Some(plan) => conn.execute(
                    "UPDATE accounts
                     SET subscription_status = ?2, plan = ?3, observations_limit = ?4, updated_at = ?5
                     WHERE id = ?1",
                    params![
                        id,
                        status.to_string(),
                        plan.to_string(),
                        plan.observation_limit(),
                        now_millis()
                    ],
                )?,
                None => conn.execute(
                    "UPDATE accounts SET subscription_status = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, status.to_string(), now_millis()],
                )?,
            };
            if updated == 0 {
                return Err(Error::not_found("Account", id));
            }
        }

        info!(account_id = %id, status = %status, "Updated subscription");
        self.get(id)?.ok_or_else(|| Error::not_found("Account", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AccountStore {
        AccountStore::new(Database::open_memory().unwrap())
    }

    fn signup(plan: Plan) -> NewAccount {
        NewAccount {
            email: "Ada@Example.com".into(),
            name: "Ada".into(),
            plan,
            billing_period: BillingPeriod::Monthly,
        }
    }

    #[test]
    fn test_create_and_find_by_token() {
        let store = store();
        let (account, token) = store.create(&signup(Plan::Pro), false).unwrap();
        assert_eq!(account.email, "ada@example.com");
        assert_eq!(account.observations_limit, 200);
        assert_eq!(account.subscription_status, SubscriptionStatus::Inactive);

        let found = store.find_by_token(&token).unwrap().unwrap();
        assert_eq!(found.id, account.id);
        assert!(store.find_by_token("vt_bogus").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let store = store();
        store.create(&signup(Plan::Starter), false).unwrap();
        let err = store.create(&signup(Plan::Starter), false).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn test_quota_requires_active_subscription() {
        let store = store();
        let (account, _) = store.create(&signup(Plan::Starter), false).unwrap();
        let err = store.reserve_quota(&account.id, 1).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(msg) if msg.contains("inactive")));
    }

    #[test]
    fn test_quota_reservation_is_all_or_nothing() {
        let store = store();
        let (account, _) = store.create(&signup(Plan::Starter), true).unwrap();

        store.reserve_quota(&account.id, 48).unwrap();
        assert!(matches!(
            store.reserve_quota(&account.id, 3),
            Err(Error::QuotaExceeded(_))
        ));
        assert_eq!(store.get(&account.id).unwrap().unwrap().observations_used, 48);

        store.reserve_quota(&account.id, 2).unwrap();
        store.release_quota(&account.id, 5).unwrap();
        assert_eq!(store.get(&account.id).unwrap().unwrap().observations_used, 45);
    }

    #[test]
    fn test_plan_change_updates_limit() {
        let store = store();
        let (account, _) = store.create(&signup(Plan::Starter), false).unwrap();
        let updated = store
            .set_subscription(&account.id, SubscriptionStatus::Active, Some(Plan::Pro))
            .unwrap();
        assert_eq!(updated.plan, Plan::Pro);
        assert_eq!(updated.observations_limit, 200);
        assert_eq!(updated.subscription_status, SubscriptionStatus::Active);

        let canceled = store
            .set_subscription(&account.id, SubscriptionStatus::Canceled, None)
            .unwrap();
        assert_eq!(canceled.plan, Plan::Pro);
        assert_eq!(canceled.subscription_status, SubscriptionStatus::Canceled);
    }

    #[test]
    fn test_subscription_status_aliases() {
        assert_eq!("trialing".parse::<SubscriptionStatus>().unwrap(), SubscriptionStatus::Active);
        assert_eq!("unpaid".parse::<SubscriptionStatus>().unwrap(), SubscriptionStatus::PastDue);
    }
}
