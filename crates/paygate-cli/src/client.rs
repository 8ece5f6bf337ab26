//! HTTP client against the gateway's admin and merchant surfaces

use anyhow::{bail, Context, Result};
use paygate_auth::generate_token;
use serde_json::{json, Map, Value};

pub struct GatewayClient {
    base_url: String,
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn expect_ok(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.context("malformed response body")?;
        if !status.is_success() {
            bail!("gateway answered {status}: {body}");
        }
        Ok(body)
    }

    pub async fn list_rules(&self) -> Result<Value> {
        let response = self.http.get(self.url("/admin/rules")).send().await?;
        Self::expect_ok(response).await
    }

    pub async fn create_rule(&self, rule: Value) -> Result<Value> {
        let response = self
            .http
            .post(self.url("/admin/rules"))
            .json(&rule)
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/admin/rules/{id}")))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("gateway answered {}", response.status());
        }
        Ok(())
    }

    pub async fn list_locks(&self) -> Result<Value> {
        let response = self.http.get(self.url("/admin/locks")).send().await?;
        Self::expect_ok(response).await
    }

    pub async fn expire_payment(&self, payment_ref: &str) -> Result<Value> {
        let response = self
            .http
            .post(self.url(&format!("/admin/payments/{payment_ref}/expire")))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    pub async fn verify_audit(&self) -> Result<Value> {
        let response = self.http.get(self.url("/admin/audit/verify")).send().await?;
        Self::expect_ok(response).await
    }

    /// Signed merchant `getState` call
    pub async fn get_state(&self, team_slug: &str, password: &str, payment_ref: &str) -> Result<Value> {
        let mut body = Map::new();
        body.insert("TeamSlug".into(), json!(team_slug));
        body.insert("PaymentId".into(), json!(payment_ref));
        let token = generate_token(&body, password);
        body.insert("Token".into(), json!(token));

        let response = self
            .http
            .post(self.url("/getState"))
            .json(&Value::Object(body))
            .send()
            .await?;
        Self::expect_ok(response).await
    }
}
