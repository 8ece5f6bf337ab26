//! The acquirer seam
//!
//! Card acquiring and network interchange are out of scope; authorize,
//! capture, reversal, and refund side effects are delegated to this
//! injected interface.

use paygate_types::{Payment, Result};

/// External processor the lifecycle delegates money movement to
#[async_trait::async_trait]
pub trait PaymentAuthorizer: Send + Sync {
    /// Place the hold
    async fn authorize(&self, payment: &Payment) -> Result<()>;

    /// Capture held funds
    async fn capture(&self, payment: &Payment, amount: i64) -> Result<()>;

    /// Release an uncaptured hold
    async fn reverse(&self, payment: &Payment) -> Result<()>;

    /// Return captured funds
    async fn refund(&self, payment: &Payment, amount: i64) -> Result<()>;
}

/// Authorizer that approves everything, for tests and sandbox runs
pub struct AutoApprove;

#[async_trait::async_trait]
impl PaymentAuthorizer for AutoApprove {
    async fn authorize(&self, _payment: &Payment) -> Result<()> {
        Ok(())
    }

    async fn capture(&self, _payment: &Payment, _amount: i64) -> Result<()> {
        Ok(())
    }

    async fn reverse(&self, _payment: &Payment) -> Result<()> {
        Ok(())
    }

    async fn refund(&self, _payment: &Payment, _amount: i64) -> Result<()> {
        Ok(())
    }
}
