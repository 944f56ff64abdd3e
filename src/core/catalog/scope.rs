//! One connection plus an optional explicit transaction.

use super::{CatalogConnection, Connector};
use crate::error::{Error, Result};
use crate::log_status;

enum Slot<'c> {
    Owned(Box<dyn CatalogConnection>),
    Borrowed(&'c mut dyn CatalogConnection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transaction {
    None,
    Active,
    Finished,
}

/// Connection shared by a sequence of catalog operations.
///
/// Dropping the scope rolls back a transaction that was neither committed
/// nor rolled back, and closes the connection when the scope owns it.
pub struct ExecutionScope<'c> {
    slot: Slot<'c>,
    transaction: Transaction,
}

impl ExecutionScope<'static> {
    /// Open a fresh connection from `connector` and begin a transaction on it.
    pub fn begin(connector: &dyn Connector) -> Result<Self> {
        let mut connection = connector.connect()?;
        connection.open()?;
        let mut scope = ExecutionScope {
            slot: Slot::Owned(connection),
            transaction: Transaction::None,
        };
        scope.begin_transaction()?;
        Ok(scope)
    }
}

impl<'c> ExecutionScope<'c> {
    /// Use a connection managed by the caller. It is left open on drop.
    pub fn borrowing(connection: &'c mut dyn CatalogConnection) -> Self {
        ExecutionScope {
            slot: Slot::Borrowed(connection),
            transaction: Transaction::None,
        }
    }

    pub fn connection(&mut self) -> &mut dyn CatalogConnection {
        match &mut self.slot {
            Slot::Owned(connection) => connection.as_mut(),
            Slot::Borrowed(connection) => &mut **connection,
        }
    }

    fn connection_ref(&self) -> &dyn CatalogConnection {
        match &self.slot {
            Slot::Owned(connection) => connection.as_ref(),
            Slot::Borrowed(connection) => &**connection,
        }
    }

    pub fn is_open(&self) -> bool {
        self.connection_ref().is_open()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction == Transaction::Active
    }

    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.transaction != Transaction::None {
            return Err(Error::internal_unexpected(
                "execution scope already started a transaction",
            ));
        }
        if !self.is_open() {
            return Err(Error::catalog_scope_not_open("BEGIN TRANSACTION"));
        }
        self.connection().begin_transaction()?;
        self.transaction = Transaction::Active;
        Ok(())
    }

    /// Ask the server whether the transaction outlived a failed call.
    ///
    /// A transaction the server already rolled back is marked finished, so
    /// it is neither reused nor rolled back again on drop.
    pub fn transaction_survived(&mut self) -> bool {
        if self.transaction != Transaction::Active || !self.is_open() {
            return false;
        }
        match self.connection().transaction_active() {
            Ok(true) => true,
            Ok(false) => {
                self.transaction = Transaction::Finished;
                false
            }
            Err(err) => {
                log_status!("catalog", "Could not read transaction state: {}", err);
                false
            }
        }
    }

    pub fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT TRANSACTION")?;
        self.connection().commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK TRANSACTION")?;
        self.connection().rollback()
    }

    fn finish(&mut self, statement: &str) -> Result<()> {
        if self.transaction != Transaction::Active {
            return Err(Error::internal_unexpected(format!(
                "{} without an active transaction",
                statement
            )));
        }
        if !self.is_open() {
            self.transaction = Transaction::Finished;
            return Err(Error::catalog_scope_not_open(statement));
        }
        self.transaction = Transaction::Finished;
        Ok(())
    }
}

impl Drop for ExecutionScope<'_> {
    fn drop(&mut self) {
        if self.transaction == Transaction::Active && self.is_open() {
            if let Err(err) = self.connection().rollback() {
                log_status!("catalog", "Implicit rollback failed: {}", err);
            }
        }
        if let Slot::Owned(connection) = &mut self.slot {
            connection.close();
        }
    }
}
