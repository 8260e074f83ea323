//! Account commands

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use viewtrace_common::Account;

use crate::client::{AccountInfo, ApiClient};
use crate::output::{print_item, print_json, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct SignupArgs {
    /// Account email
    #[arg(short, long)]
    pub email: String,

    /// Display name
    #[arg(short, long)]
    pub name: String,

    /// Plan (starter, pro)
    #[arg(long, default_value = "starter")]
    pub plan: String,
}

#[derive(Serialize)]
pub struct AccountDisplay {
    pub id: String,
    pub email: String,
    pub plan: String,
    pub subscription: String,
    pub used: i64,
    pub limit: i64,
    pub remaining: i64,
}

impl AccountDisplay {
    fn new(account: &Account, remaining: i64) -> Self {
        Self {
            id: account.id.clone(),
            email: account.email.clone(),
            plan: account.plan.to_string(),
            subscription: account.subscription_status.to_string(),
            used: account.observations_used,
            limit: account.observations_limit,
            remaining,
        }
    }
}

impl From<AccountInfo> for AccountDisplay {
    fn from(info: AccountInfo) -> Self {
        Self::new(&info.account, info.remaining)
    }
}

impl TableDisplay for AccountDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Email", "Plan", "Subscription", "Used", "Limit", "Remaining"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.email.clone(),
            self.plan.clone(),
            self.subscription.clone(),
            self.used.to_string(),
            self.limit.to_string(),
            self.remaining.to_string(),
        ]
    }
}

pub async fn signup(args: SignupArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let signup = client.signup(&args.email, &args.name, &args.plan).await?;

    if format == OutputFormat::Json {
        print_json(&signup);
        return Ok(());
    }

    print_success(&format!("Account created for {}", signup.account.email));
    print_item(&AccountDisplay::new(&signup.account, signup.account.remaining()), format);
    println!();
    println!("API token (shown once): {}", signup.token);
    println!("export VIEWTRACE_TOKEN={}", signup.token);
    if signup.account.subscription_status != viewtrace_common::SubscriptionStatus::Active {
        print_warning("Subscription is not active yet; observations will be refused until it is");
    }
    Ok(())
}

pub async fn whoami(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let info = client.me().await?;
    print_item(&AccountDisplay::from(info), format);
    Ok(())
}
