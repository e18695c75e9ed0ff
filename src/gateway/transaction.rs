//! Transaction scopes
//!
//! A scope owns one dedicated connection with one live `BEGIN`-ed
//! transaction. Completion is explicit (commit or rollback, idempotent
//! once done); dropping an uncompleted scope closes the connection and the
//! server discards the open transaction, so abandonment never leaks either.

use crate::config::ConnectionConfig;
use crate::db::connect::OpenClient;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Gateway;
use crate::gateway::command::quote_ident;

pub struct TransactionScope {
    handle: OpenClient,
    completed: bool,
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

impl TransactionScope {
    pub(crate) async fn begin(config: &ConnectionConfig) -> GatewayResult<Self> {
        let handle = OpenClient::open(config).await?;
        handle
            .client
            .batch_execute("BEGIN")
            .await
            .map_err(GatewayError::from_backend)?;
        Ok(Self {
            handle,
            completed: false,
        })
    }

    pub(crate) fn handle(&self) -> &OpenClient {
        &self.handle
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn ensure_active(&self) -> GatewayResult<()> {
        if self.completed {
            return Err(GatewayError::Spec(
                "transaction scope is already completed".to_string(),
            ));
        }
        Ok(())
    }

    /// Commit the transaction. A no-op once the scope is completed.
    pub async fn commit(&mut self) -> GatewayResult<()> {
        if self.completed {
            return Ok(());
        }
        self.handle
            .client
            .batch_execute("COMMIT")
            .await
            .map_err(GatewayError::from_backend)?;
        self.completed = true;
        Ok(())
    }

    /// Roll the transaction back. A no-op once the scope is completed.
    pub async fn rollback(&mut self) -> GatewayResult<()> {
        if self.completed {
            return Ok(());
        }
        self.handle
            .client
            .batch_execute("ROLLBACK")
            .await
            .map_err(GatewayError::from_backend)?;
        self.completed = true;
        Ok(())
    }

    /// Mark a savepoint inside the live transaction.
    pub async fn savepoint(&mut self, name: &str) -> GatewayResult<()> {
        self.ensure_active()?;
        let stmt = format!("SAVEPOINT {}", quote_ident(name));
        self.handle
            .client
            .batch_execute(&stmt)
            .await
            .map_err(GatewayError::from_backend)
    }

    /// Roll back to a previously marked savepoint; the transaction stays
    /// active.
    pub async fn rollback_to_savepoint(&mut self, name: &str) -> GatewayResult<()> {
        self.ensure_active()?;
        let stmt = format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name));
        self.handle
            .client
            .batch_execute(&stmt)
            .await
            .map_err(GatewayError::from_backend)
    }

    /// Release a savepoint without affecting work done since it.
    pub async fn release_savepoint(&mut self, name: &str) -> GatewayResult<()> {
        self.ensure_active()?;
        let stmt = format!("RELEASE SAVEPOINT {}", quote_ident(name));
        self.handle
            .client
            .batch_execute(&stmt)
            .await
            .map_err(GatewayError::from_backend)
    }
}

/// Per-logical-call carrier of the ambient transaction.
///
/// At most one active scope per context; beginning a second while one is
/// active fails with `TransactionAlreadyActive`. Completed scopes stay in
/// place and a fresh `begin_transaction` replaces them.
#[derive(Default)]
pub struct CallContext {
    scope: Option<TransactionScope>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope on a dedicated connection and make it this context's
    /// ambient transaction.
    pub async fn begin_transaction(
        &mut self,
        gateway: &Gateway,
    ) -> GatewayResult<&mut TransactionScope> {
        if self.scope.as_ref().is_some_and(|s| !s.is_completed()) {
            return Err(GatewayError::TransactionAlreadyActive);
        }
        let scope = TransactionScope::begin(gateway.connection_config()).await?;
        Ok(self.scope.insert(scope))
    }

    /// The context's scope while it is still active.
    pub fn active_scope(&self) -> Option<&TransactionScope> {
        self.scope.as_ref().filter(|s| !s.is_completed())
    }

    pub fn active_scope_mut(&mut self) -> Option<&mut TransactionScope> {
        self.scope.as_mut().filter(|s| !s.is_completed())
    }
}
