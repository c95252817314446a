use std::time::Duration;

use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};

use chronicle_core::{ChronicleError, ChronicleResult};

const BACKOFF_STEP_MS: u64 = 5;

/// Bounded budget for re-running a transaction body after a retryable failure.
///
/// Callers loop: begin, run the body, commit, and hand any error to `absorb`. Fatal
/// errors come straight back; retryable ones are swallowed until the budget runs out,
/// at which point `RetryLimitReached` is returned.
#[derive(Debug)]
pub(crate) struct RetryBudget {
    max_attempts: u32,
    attempts: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts: 0,
        }
    }

    pub async fn absorb(&mut self, err: ChronicleError, operation: &str) -> ChronicleResult<()> {
        if !err.is_retryable() {
            return Err(err);
        }
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            return Err(ChronicleError::retry_limit(
                self.attempts,
                format!("{operation}: {err}"),
            ));
        }
        log::debug!(
            "retrying {operation} after attempt {}/{}: {err}",
            self.attempts,
            self.max_attempts
        );
        tokio::time::sleep(Duration::from_millis(
            BACKOFF_STEP_MS * u64::from(self.attempts),
        ))
        .await;
        Ok(())
    }
}

/// Work that runs inside one transaction and may be re-run from scratch on conflict.
pub(crate) trait TransactionBody {
    type Output;

    async fn run(&self, tx: &DatabaseTransaction) -> ChronicleResult<Self::Output>;
}

/// Begins a transaction, runs `body`, and commits; retryable failures roll back and start
/// over until `max_attempts` is spent.
pub(crate) async fn run_in_transaction<B: TransactionBody>(
    conn: &DatabaseConnection,
    max_attempts: u32,
    operation: &str,
    body: &B,
) -> ChronicleResult<B::Output> {
    let mut budget = RetryBudget::new(max_attempts);
    loop {
        let tx = conn.begin().await?;
        match body.run(&tx).await {
            Ok(output) => match tx.commit().await {
                Ok(()) => return Ok(output),
                Err(err) => budget.absorb(err.into(), operation).await?,
            },
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    log::warn!("{operation}: rollback failed: {rollback}");
                }
                budget.absorb(err, operation).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fatal_errors_pass_through() {
        let mut budget = RetryBudget::new(3);
        let err = budget
            .absorb(ChronicleError::invalid("bad"), "add")
            .await
            .expect_err("fatal");
        assert!(matches!(err, ChronicleError::Validation { .. }));
        assert_eq!(budget.attempts, 0);
    }

    #[tokio::test]
    async fn retryable_errors_exhaust_the_budget() {
        let mut budget = RetryBudget::new(3);
        for _ in 0..2 {
            budget
                .absorb(ChronicleError::optimistic_lock("moved"), "add")
                .await
                .expect("retry");
        }
        let err = budget
            .absorb(ChronicleError::duplicate_key("dup"), "add")
            .await
            .expect_err("exhausted");
        assert!(matches!(
            err,
            ChronicleError::RetryLimitReached { attempts: 3, .. }
        ));
    }
}
