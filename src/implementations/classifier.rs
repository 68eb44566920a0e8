//! Maps raw wallet and contract failures onto a closed set of user-facing categories.
//!
//! Revert reasons are free text owned by the contract, so the matching is an
//! ordered table of rules that configuration can replace wholesale.

use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::Failure;

/// EIP-1193 code for a request the user declined in the wallet.
pub const USER_REJECTED_CODE: i64 = 4001;
/// Code wallets return while an earlier request is still awaiting approval.
pub const REQUEST_PENDING_CODE: i64 = -32002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    UserRejected,
    PendingRequestExists,
    InsufficientFunds,
    InvalidAmount,
    LockPeriodNotElapsed,
    NoRewardsAvailable,
    InsufficientContractReserve,
    InvalidContractAddress,
    NetworkSwitchFailed,
    NoWalletProvider,
    NoActiveStake,
    Unknown,
}

impl ErrorCategory {
    pub fn message(self) -> &'static str {
        match self {
            ErrorCategory::UserRejected => "Transaction rejected by user.",
            ErrorCategory::PendingRequestExists => {
                "A wallet request is already pending. Check your wallet."
            }
            ErrorCategory::InsufficientFunds => {
                "Insufficient ETH balance to complete the transaction."
            }
            ErrorCategory::InvalidAmount => "Please enter a valid stake amount (greater than 0).",
            ErrorCategory::LockPeriodNotElapsed => "Lock period has not elapsed yet.",
            ErrorCategory::NoRewardsAvailable => "No rewards available to claim.",
            ErrorCategory::InsufficientContractReserve => {
                "Staking contract has insufficient reward tokens."
            }
            ErrorCategory::InvalidContractAddress => "Invalid contract address configured.",
            ErrorCategory::NetworkSwitchFailed => "Failed to switch to the supported network.",
            ErrorCategory::NoWalletProvider => "Please install a browser wallet such as MetaMask.",
            ErrorCategory::NoActiveStake => "No active stake.",
            ErrorCategory::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// The single message shown to the user for an action outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserError {
    pub category: ErrorCategory,
    pub message: &'static str,
}

impl From<ErrorCategory> for UserError {
    fn from(category: ErrorCategory) -> Self {
        Self {
            category,
            message: category.message(),
        }
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

impl std::error::Error for UserError {}

/// One row of the classifier table. A rule with both a code and a substring needs both to match.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MatchRule {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub contains: Option<String>,
    pub category: ErrorCategory,
}

impl MatchRule {
    pub fn code(code: i64, category: ErrorCategory) -> Self {
        Self {
            code: Some(code),
            contains: None,
            category,
        }
    }

    pub fn contains(marker: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            code: None,
            contains: Some(marker.into().to_lowercase()),
            category,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.code.is_some() || self.contains.as_deref().is_some_and(|m| !m.is_empty())
    }

    fn matches(&self, failure: &Failure, lowered_message: &str) -> bool {
        if !self.is_well_formed() {
            return false;
        }
        let code_ok = self.code.is_none_or(|code| failure.code == Some(code));
        let text_ok = self
            .contains
            .as_deref()
            .is_none_or(|marker| lowered_message.contains(&marker.to_lowercase()));
        code_ok && text_ok
    }
}

static DEFAULT_RULES: Lazy<Vec<MatchRule>> = Lazy::new(|| {
    vec![
        MatchRule::code(USER_REJECTED_CODE, ErrorCategory::UserRejected),
        MatchRule::code(REQUEST_PENDING_CODE, ErrorCategory::PendingRequestExists),
        MatchRule::contains("user rejected", ErrorCategory::UserRejected),
        MatchRule::contains("insufficient funds", ErrorCategory::InsufficientFunds),
        MatchRule::contains("insufficient balance", ErrorCategory::InsufficientFunds),
        MatchRule::contains("lock period not elapsed", ErrorCategory::LockPeriodNotElapsed),
        MatchRule::contains("no rewards", ErrorCategory::NoRewardsAvailable),
    ]
});

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<MatchRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_RULES.clone())
    }
}

impl ErrorClassifier {
    pub fn new(rules: Vec<MatchRule>) -> Self {
        Self { rules }
    }

    /// First matching rule wins; `fallback` is the action's own default category.
    pub fn classify(&self, failure: &Failure, fallback: ErrorCategory) -> UserError {
        let lowered = failure.message.to_lowercase();
        let category = self
            .rules
            .iter()
            .find(|rule| rule.matches(failure, &lowered))
            .map(|rule| rule.category)
            .unwrap_or(fallback);
        UserError::from(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(code: Option<i64>, message: &str) -> ErrorCategory {
        ErrorClassifier::default()
            .classify(&Failure::new(code, message), ErrorCategory::Unknown)
            .category
    }

    #[test]
    fn rejection_code_wins_over_message() {
        assert_eq!(
            classify(Some(4001), "insufficient funds for gas"),
            ErrorCategory::UserRejected
        );
    }

    #[test]
    fn pending_request_code() {
        assert_eq!(
            classify(Some(-32002), "Request of type 'wallet_requestPermissions' already pending"),
            ErrorCategory::PendingRequestExists
        );
    }

    #[test]
    fn message_markers_are_case_insensitive() {
        assert_eq!(
            classify(None, "execution reverted: Lock period not elapsed"),
            ErrorCategory::LockPeriodNotElapsed
        );
        assert_eq!(
            classify(Some(-32000), "Insufficient funds for gas * price + value"),
            ErrorCategory::InsufficientFunds
        );
        assert_eq!(
            classify(None, "execution reverted: No rewards to claim"),
            ErrorCategory::NoRewardsAvailable
        );
        assert_eq!(
            classify(None, "ethers-signer: user rejected transaction"),
            ErrorCategory::UserRejected
        );
    }

    #[test]
    fn unmatched_failure_uses_fallback() {
        let user = ErrorClassifier::default().classify(
            &Failure::message("nonce too low"),
            ErrorCategory::NoActiveStake,
        );
        assert_eq!(user.category, ErrorCategory::NoActiveStake);
        assert_eq!(user.message, ErrorCategory::NoActiveStake.message());
    }

    #[test]
    fn custom_table_replaces_defaults() {
        let classifier = ErrorClassifier::new(vec![MatchRule::contains(
            "StillLocked",
            ErrorCategory::LockPeriodNotElapsed,
        )]);
        let locked = classifier.classify(
            &Failure::message("execution reverted: StillLocked()"),
            ErrorCategory::Unknown,
        );
        assert_eq!(locked.category, ErrorCategory::LockPeriodNotElapsed);

        let rejected =
            classifier.classify(&Failure::with_code(4001, "denied"), ErrorCategory::Unknown);
        assert_eq!(rejected.category, ErrorCategory::Unknown);
    }

    #[test]
    fn code_and_substring_rule_needs_both() {
        let classifier = ErrorClassifier::new(vec![MatchRule {
            code: Some(3),
            contains: Some("reserve".into()),
            category: ErrorCategory::InsufficientContractReserve,
        }]);
        let both = Failure::with_code(3, "execution reverted: reserve empty");
        let only_code = Failure::with_code(3, "execution reverted");
        assert_eq!(
            classifier.classify(&both, ErrorCategory::Unknown).category,
            ErrorCategory::InsufficientContractReserve
        );
        assert_eq!(
            classifier.classify(&only_code, ErrorCategory::Unknown).category,
            ErrorCategory::Unknown
        );
    }
}
