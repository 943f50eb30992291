use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::types::ConnectionState;

/// Per-account state tracked by the plugin.
#[derive(Debug, Clone)]
pub struct AccountState {
    pub account_id: String,
    pub connection_state: ConnectionState,
}

impl AccountState {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            connection_state: ConnectionState::Disconnected,
        }
    }
}

/// Shared account map, updated from the sidecar reader task.
pub type AccountStateMap = Arc<RwLock<HashMap<String, AccountState>>>;

/// Set one account's connection state. Returns false for unknown accounts.
pub(crate) fn update_state(
    accounts: &AccountStateMap,
    account_id: &str,
    state: ConnectionState,
) -> bool {
    let mut accounts = accounts.write().unwrap_or_else(|e| e.into_inner());
    match accounts.get_mut(account_id) {
        Some(account) => {
            account.connection_state = state;
            true
        },
        None => false,
    }
}

pub(crate) fn mark_all_disconnected(accounts: &AccountStateMap) {
    let mut accounts = accounts.write().unwrap_or_else(|e| e.into_inner());
    for account in accounts.values_mut() {
        account.connection_state = ConnectionState::Disconnected;
    }
}
