use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::block::{canonical_id, strip_hex_prefix};
use super::MINT_ACCOUNT_ID;

/// Errors that can occur during account operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Account id must not be empty")]
    EmptyId,

    #[error("Account id {id:?} must be written as {canonical:?}")]
    NonCanonicalId { id: String, canonical: String },

    #[error("Account id {0:?} is reserved")]
    ReservedId(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: required more than {required}, available {available}")]
    InsufficientFunds { required: u64, available: i64 },
}

/// Represents an account in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Account {
    /// Unique account id
    pub id: String,

    /// Display label
    pub username: Option<String>,

    /// Cached balance, always recomputable from the chain
    pub balance: i64,
}

impl Account {
    /// Creates a new account with a zero balance
    ///
    /// # Arguments
    ///
    /// * `id` - The account's id
    /// * `username` - Optional display label
    pub fn new(id: impl Into<String>, username: Option<String>) -> Result<Self, AccountError> {
        let id = id.into();
        if id.trim().is_empty() || strip_hex_prefix(&id).is_empty() {
            return Err(AccountError::EmptyId);
        }

        let canonical = canonical_id(&id);
        if canonical == MINT_ACCOUNT_ID {
            return Err(AccountError::ReservedId(id));
        }
        if canonical != id {
            return Err(AccountError::NonCanonicalId { id, canonical });
        }

        Ok(Account {
            id,
            username,
            balance: 0,
        })
    }

    /// Checks that this account can send `amount`
    ///
    /// A transfer is only allowed when the amount is strictly less than the
    /// current balance.
    pub fn check_funds(&self, amount: u64) -> Result<(), AccountError> {
        if amount == 0 {
            return Err(AccountError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        if i128::from(amount) >= i128::from(self.balance) {
            return Err(AccountError::InsufficientFunds {
                required: amount,
                available: self.balance,
            });
        }

        Ok(())
    }
}

/// The account an operation is performed on behalf of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    account_id: String,
}

impl Session {
    pub fn new(account_id: impl Into<String>) -> Self {
        Session {
            account_id: account_id.into(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_creation() {
        let account = Account::new("A", Some("alice".to_string())).unwrap();

        assert_eq!(account.id, "A");
        assert_eq!(account.username.as_deref(), Some("alice"));
        assert_eq!(account.balance, 0);
        assert_eq!(Account::new("  ", None), Err(AccountError::EmptyId));
    }

    #[test]
    fn test_rejects_ids_that_alias_another() {
        assert_eq!(Account::new("0x", None), Err(AccountError::EmptyId));
        assert_eq!(
            Account::new("0x0", None),
            Err(AccountError::ReservedId("0x0".to_string()))
        );
        assert_eq!(Account::new("0", None), Err(AccountError::ReservedId("0".to_string())));
        assert_eq!(
            Account::new("0xB", None),
            Err(AccountError::NonCanonicalId {
                id: "0xB".to_string(),
                canonical: "B".to_string()
            })
        );
        assert!(Account::new("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf", None).is_ok());
        assert!(Account::new("beef", None).is_err());
    }

    #[test]
    fn test_funds_must_exceed_amount() {
        let mut account = Account::new("A", None).unwrap();
        account.balance = 100;

        assert!(account.check_funds(99).is_ok());
        assert_eq!(
            account.check_funds(100),
            Err(AccountError::InsufficientFunds {
                required: 100,
                available: 100
            })
        );
        assert!(account.check_funds(0).is_err());

        account.balance = -5;
        assert!(account.check_funds(1).is_err());
    }

    #[test]
    fn test_session() {
        let session = Session::new("A");
        assert_eq!(session.account_id(), "A");
    }
}
