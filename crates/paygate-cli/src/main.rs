//! Paygate admin CLI
//!
//! Thin client over the gateway's admin routes; nothing here bypasses
//! the state machine or the audit trail.

mod client;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use client::GatewayClient;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "paygate")]
#[command(about = "Paygate admin tooling", version)]
struct Cli {
    /// Gateway base URL
    #[arg(long, env = "PAYGATE_URL", default_value = "http://127.0.0.1:8080")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect and edit business rules
    Rules {
        #[command(subcommand)]
        action: RuleAction,
    },
    /// List live lock leases
    Locks,
    /// Expire a payment through the lifecycle service
    Expire {
        /// Merchant-facing payment reference (pay_...)
        payment_ref: String,
    },
    /// Recompute every audit integrity hash
    AuditVerify,
    /// Signed getState call for one payment
    State {
        team_slug: String,
        payment_ref: String,
        /// Merchant API password used to sign the call
        #[arg(long, env = "PAYGATE_PASSWORD")]
        password: String,
    },
}

#[derive(Subcommand)]
enum RuleAction {
    /// List every stored rule
    List,
    /// Create a rule
    Add {
        name: String,
        /// PAYMENT_LIMIT, AMOUNT_VALIDATION, CURRENCY_VALIDATION, ...
        #[arg(long)]
        rule_type: String,
        /// ALLOW, DENY, WARN, REQUIRE_APPROVAL, APPLY_FEE, REDIRECT
        #[arg(long, default_value = "DENY")]
        action: String,
        /// Owning team slug; omit for a global rule
        #[arg(long)]
        team: Option<String>,
        #[arg(long)]
        priority: Option<u32>,
        /// key=value parameters, repeatable
        #[arg(long = "param")]
        params: Vec<String>,
    },
    /// Delete a rule by id (rule_...)
    Delete { id: String },
}

fn parse_params(params: &[String]) -> Result<serde_json::Map<String, Value>> {
    let mut map = serde_json::Map::new();
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            bail!("parameter '{param}' is not key=value");
        };
        let value = value
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(value));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = GatewayClient::new(cli.url);

    match cli.command {
        Command::Rules { action } => match action {
            RuleAction::List => print_json(&client.list_rules().await?),
            RuleAction::Add {
                name,
                rule_type,
                action,
                team,
                priority,
                params,
            } => {
                let rule = json!({
                    "name": name,
                    "rule_type": rule_type,
                    "action": action,
                    "team_slug": team,
                    "priority": priority,
                    "parameters": parse_params(&params)?,
                });
                print_json(&client.create_rule(rule).await?);
            }
            RuleAction::Delete { id } => {
                client.delete_rule(&id).await?;
                println!("deleted {id}");
            }
        },
        Command::Locks => print_json(&client.list_locks().await?),
        Command::Expire { payment_ref } => print_json(&client.expire_payment(&payment_ref).await?),
        Command::AuditVerify => {
            let verdict = client.verify_audit().await?;
            print_json(&verdict);
            if verdict.get("intact") != Some(&Value::Bool(true)) {
                bail!("audit log integrity check failed");
            }
        }
        Command::State {
            team_slug,
            payment_ref,
            password,
        } => print_json(&client.get_state(&team_slug, &password, &payment_ref).await?),
    }
    Ok(())
}
