//! Wallet DTOs

use counsel_core::models::{LedgerEntry, Wallet};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::common::PaginationMeta;

/// Own wallet with one page of its ledger
#[derive(Debug, Clone, Serialize)]
pub struct WalletResponse {
    pub wallet: Wallet,
    pub entries: Vec<LedgerEntry>,
    pub pagination: PaginationMeta,
}

/// Withdrawal request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WithdrawRequest {
    /// Amount to debit; must be positive
    pub amount: Decimal,

    #[validate(length(min = 1, max = 255, message = "Description is required"))]
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_withdraw_request_validation() {
        let req = WithdrawRequest {
            amount: dec!(50.00),
            description: "payout".to_string(),
        };
        assert!(req.validate().is_ok());

        let req = WithdrawRequest {
            amount: dec!(50.00),
            description: String::new(),
        };
        assert!(req.validate().is_err());
    }
}
