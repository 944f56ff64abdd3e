//! Retrying invocation of catalog procedures.

use std::time::Duration;

use super::{Connector, ExecutionScope, ProcedureCall, ProcedureOutcome};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::log_status;
use crate::retry::RetryPolicy;

pub struct CatalogExecutor<'c> {
    connector: &'c dyn Connector,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<'c> CatalogExecutor<'c> {
    pub fn new(connector: &'c dyn Connector, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            connector,
            policy,
            cancel,
        }
    }

    /// Invoke `call` until it succeeds or the retry policy gives up.
    ///
    /// With a scope, its connection is used and must already be open. Without
    /// one, every attempt opens and releases a private connection. Only
    /// backend errors are considered for retry; anything else propagates on
    /// the first occurrence.
    ///
    /// A scoped call is only repeated while the scope still holds its
    /// connection and, when it began one, its transaction. Otherwise the
    /// backend error is returned as is: earlier calls in the scope are gone
    /// with the transaction and must not be partly redone.
    pub fn execute(
        &self,
        mut scope: Option<&mut ExecutionScope<'_>>,
        call: &ProcedureCall,
        timeout: Duration,
    ) -> Result<ProcedureOutcome> {
        let procedure = call.procedure();
        let mut attempt_count: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::operation_cancelled(procedure));
            }

            let result = match scope.as_mut() {
                Some(scope) => {
                    if !scope.is_open() {
                        return Err(Error::catalog_scope_not_open(procedure));
                    }
                    scope.connection().call(call, timeout)
                }
                None => self.call_on_fresh_connection(call, timeout),
            };

            let err = match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };

            let Some(number) = err.catalog_error_number() else {
                return Err(err);
            };

            if let Some(scope) = scope.as_mut() {
                if !scope.is_open() {
                    log_status!(
                        "catalog",
                        "{} failed with error {} and lost the scope connection",
                        procedure,
                        number
                    );
                    return Err(give_up(err, procedure, number, attempt_count)
                        .with_detail("connectionLost", true));
                }
                if scope.in_transaction() && !scope.transaction_survived() {
                    log_status!(
                        "catalog",
                        "{} failed with error {} and the server rolled back the transaction",
                        procedure,
                        number
                    );
                    return Err(give_up(err, procedure, number, attempt_count)
                        .with_detail("transactionRolledBack", true));
                }
            }

            if !self.policy.should_retry(number, attempt_count) {
                return Err(give_up(err, procedure, number, attempt_count));
            }

            attempt_count += 1;
            log_status!(
                "catalog",
                "{} failed with error {}; retry {} of {} in {:?}",
                procedure,
                number,
                attempt_count,
                self.policy.max_attempts() - 1,
                self.policy.delay()
            );

            if self.cancel.wait(self.policy.delay()) {
                return Err(Error::operation_cancelled(format!(
                    "{} while waiting to retry",
                    procedure
                )));
            }
        }
    }

    fn call_on_fresh_connection(
        &self,
        call: &ProcedureCall,
        timeout: Duration,
    ) -> Result<ProcedureOutcome> {
        let mut connection = self.connector.connect()?;
        connection.open()?;
        let result = connection.call(call, timeout);
        connection.close();
        result
    }
}

fn give_up(err: Error, procedure: &str, number: i32, attempt_count: u32) -> Error {
    err.with_retryable(RetryPolicy::is_transient(number))
        .with_detail("procedure", procedure)
        .with_detail("attempts", attempt_count + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::procedures::CREATE_FOLDER;
    use crate::catalog::testing::{Aftermath, Event, FakeBackend};
    use crate::catalog::{CatalogConnection, SqlValue};
    use std::thread;

    fn create_folder_call() -> ProcedureCall {
        ProcedureCall::new(&CREATE_FOLDER, vec![("@folder_name", SqlValue::text("ETL"))]).unwrap()
    }

    fn executor(backend: &FakeBackend, max_attempts: u32) -> CatalogExecutor<'_> {
        CatalogExecutor::new(
            backend,
            RetryPolicy::new(max_attempts, Duration::ZERO),
            CancellationToken::new(),
        )
    }

    #[test]
    fn fresh_connection_is_opened_and_released() {
        let backend = FakeBackend::new();
        let outcome = executor(&backend, 10)
            .execute(None, &create_folder_call(), Duration::from_secs(1))
            .unwrap();

        assert_eq!(outcome.output_i64("@folder_id"), Some(1));
        assert_eq!(outcome.return_code, 0);
        let events = backend.events();
        assert_eq!(events.first(), Some(&Event::Open));
        assert_eq!(events.last(), Some(&Event::Close));
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let backend = FakeBackend::new();
        backend.fail_next("[catalog].[create_folder]", 1205);
        backend.fail_next("[catalog].[create_folder]", 40501);

        let outcome = executor(&backend, 10)
            .execute(None, &create_folder_call(), Duration::from_secs(1))
            .unwrap();

        assert!(outcome.output_i64("@folder_id").is_some());
        assert_eq!(backend.calls_to("[catalog].[create_folder]").len(), 3);
    }

    #[test]
    fn connection_failures_during_open_are_retried() {
        let backend = FakeBackend::new();
        backend.fail_next_open(53);

        executor(&backend, 10)
            .execute(None, &create_folder_call(), Duration::from_secs(1))
            .unwrap();

        let opens = backend
            .events()
            .into_iter()
            .filter(|e| *e == Event::Open)
            .count();
        assert_eq!(opens, 2);
    }

    #[test]
    fn permanent_failure_propagates_without_retry() {
        let backend = FakeBackend::new();
        backend.fail_next("[catalog].[create_folder]", 18456);

        let err = executor(&backend, 10)
            .execute(None, &create_folder_call(), Duration::from_secs(1))
            .unwrap_err();

        assert_eq!(err.catalog_error_number(), Some(18456));
        assert_eq!(err.retryable, Some(false));
        assert_eq!(err.details["attempts"], serde_json::json!(1));
        assert_eq!(backend.calls_to("[catalog].[create_folder]").len(), 1);
    }

    #[test]
    fn exhausted_transient_failure_is_marked_retryable() {
        let backend = FakeBackend::new();
        for _ in 0..5 {
            backend.fail_next("[catalog].[create_folder]", -2);
        }

        let err = executor(&backend, 3)
            .execute(None, &create_folder_call(), Duration::from_secs(1))
            .unwrap_err();

        assert_eq!(err.catalog_error_number(), Some(-2));
        assert_eq!(err.retryable, Some(true));
        assert_eq!(err.details["attempts"], serde_json::json!(3));
        assert_eq!(backend.calls_to("[catalog].[create_folder]").len(), 3);
    }

    #[test]
    fn scoped_call_reuses_the_scope_connection() {
        let backend = FakeBackend::new();
        let mut scope = ExecutionScope::begin(&backend).unwrap();
        let exec = executor(&backend, 10);

        exec.execute(Some(&mut scope), &create_folder_call(), Duration::from_secs(1))
            .unwrap();
        exec.execute(Some(&mut scope), &create_folder_call(), Duration::from_secs(1))
            .unwrap();

        let opens = backend
            .events()
            .into_iter()
            .filter(|e| *e == Event::Open)
            .count();
        assert_eq!(opens, 1);
        assert!(!backend.events().contains(&Event::Close));
    }

    #[test]
    fn statement_failure_inside_live_transaction_is_retried() {
        let backend = FakeBackend::new();
        backend.fail_next("[catalog].[create_folder]", 40501);
        let mut scope = ExecutionScope::begin(&backend).unwrap();

        executor(&backend, 10)
            .execute(Some(&mut scope), &create_folder_call(), Duration::from_secs(1))
            .unwrap();

        assert_eq!(backend.calls_to("[catalog].[create_folder]").len(), 2);
        assert!(scope.in_transaction());
    }

    #[test]
    fn transaction_rolled_back_by_the_server_is_not_retried() {
        let backend = FakeBackend::new();
        backend.fail_next_with("[catalog].[create_folder]", 1205, Aftermath::AbortTransaction);
        let mut scope = ExecutionScope::begin(&backend).unwrap();

        let err = executor(&backend, 10)
            .execute(Some(&mut scope), &create_folder_call(), Duration::from_secs(1))
            .unwrap_err();

        assert_eq!(err.catalog_error_number(), Some(1205));
        assert_eq!(err.retryable, Some(true));
        assert_eq!(err.details["attempts"], serde_json::json!(1));
        assert_eq!(err.details["transactionRolledBack"], serde_json::json!(true));
        assert_eq!(backend.calls_to("[catalog].[create_folder]").len(), 1);
        assert!(!scope.in_transaction());

        drop(scope);
        assert!(!backend.events().contains(&Event::Rollback));
    }

    #[test]
    fn lost_scope_connection_reports_the_backend_error() {
        let backend = FakeBackend::new();
        backend.fail_next_with("[catalog].[create_folder]", -2, Aftermath::Disconnect);
        let mut scope = ExecutionScope::begin(&backend).unwrap();

        let err = executor(&backend, 10)
            .execute(Some(&mut scope), &create_folder_call(), Duration::from_secs(1))
            .unwrap_err();

        assert_eq!(err.code.as_str(), "catalog.backend_error");
        assert_eq!(err.catalog_error_number(), Some(-2));
        assert_eq!(err.retryable, Some(true));
        assert_eq!(err.details["attempts"], serde_json::json!(1));
        assert_eq!(err.details["connectionLost"], serde_json::json!(true));
        assert_eq!(backend.calls_to("[catalog].[create_folder]").len(), 1);
        assert!(!scope.is_open());
    }

    #[test]
    fn scope_with_closed_connection_is_rejected_without_retry() {
        let backend = FakeBackend::new();
        let mut connection = backend.connection();
        let mut scope = ExecutionScope::borrowing(&mut connection);

        let err = executor(&backend, 10)
            .execute(Some(&mut scope), &create_folder_call(), Duration::from_secs(1))
            .unwrap_err();

        assert_eq!(err.code.as_str(), "catalog.scope_not_open");
        assert!(backend.calls_to("[catalog].[create_folder]").is_empty());
        drop(scope);
        assert!(!connection.is_open());
    }

    #[test]
    fn cancellation_during_retry_wait_abandons_the_call() {
        let backend = FakeBackend::new();
        backend.fail_next("[catalog].[create_folder]", 1205);

        let cancel = CancellationToken::new();
        let exec = CatalogExecutor::new(
            &backend,
            RetryPolicy::new(10, Duration::from_secs(30)),
            cancel.clone(),
        );

        let remote = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let err = exec
            .execute(None, &create_folder_call(), Duration::from_secs(1))
            .unwrap_err();
        handle.join().unwrap();

        assert_eq!(err.code.as_str(), "operation.cancelled");
        assert_eq!(backend.calls_to("[catalog].[create_folder]").len(), 1);
    }
}
