use crate::accounts::Account;
use crate::error::{AppError, AppResult};
use crate::practice_tests::PracticeTest;

/// key: access-gate -> premium content decision
///
/// Reads the reconciled subscription flag and nothing else.
pub fn can_access_premium(account: &Account) -> bool {
    account.subscription.is_active
}

pub fn can_start(account: &Account, test: &PracticeTest) -> bool {
    !test.is_premium || can_access_premium(account)
}

pub fn ensure_test_access(account: &Account, test: &PracticeTest) -> AppResult<()> {
    if can_start(account, test) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "test {} requires an active subscription",
            test.id
        )))
    }
}
