//! Account and container directory.
//!
//! Accounts own containers; both carry short numeric ids and unique names.
//! The directory always contains the unknown account, whose containers are
//! used for blobs that predate the directory and for uploads that name no
//! target. Each account may additionally carry two synthetic legacy
//! containers (default-public and default-private) for clients that still
//! identify themselves only through a service id.

use std::{collections::HashMap, sync::RwLock};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

pub const UNKNOWN_ACCOUNT_ID: i16 = -1;
pub const UNKNOWN_ACCOUNT_NAME: &str = "ambry-unknown-account";

pub const UNKNOWN_CONTAINER_ID: i16 = -1;
pub const UNKNOWN_CONTAINER_NAME: &str = "ambry-unknown-container";

pub const DEFAULT_PUBLIC_CONTAINER_ID: i16 = 0;
pub const DEFAULT_PUBLIC_CONTAINER_NAME: &str = "default-public-container";

pub const DEFAULT_PRIVATE_CONTAINER_ID: i16 = 1;
pub const DEFAULT_PRIVATE_CONTAINER_NAME: &str = "default-private-container";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContainerStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, Builder, PartialEq)]
pub struct Container {
    pub id: i16,
    pub name: String,
    #[builder(default = "ContainerStatus::Active")]
    pub status: ContainerStatus,
    #[builder(default)]
    pub is_private: bool,
    pub parent_account_id: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Builder, PartialEq)]
pub struct Account {
    pub id: i16,
    pub name: String,
    #[builder(default = "AccountStatus::Active")]
    pub status: AccountStatus,
    #[builder(default)]
    pub containers: Vec<Container>,
}

impl Account {
    pub fn container_by_id(&self, id: i16) -> Option<&Container> {
        self.containers.iter().find(|c| c.id == id)
    }

    pub fn container_by_name(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// The synthetic legacy container selected by a blob's privacy flag, if
    /// this account carries them.
    pub fn legacy_default_container(&self, is_private: bool) -> Option<&Container> {
        let id = if is_private {
            DEFAULT_PRIVATE_CONTAINER_ID
        } else {
            DEFAULT_PUBLIC_CONTAINER_ID
        };
        self.container_by_id(id)
    }
}

fn legacy_default_containers(parent_account_id: i16) -> Vec<Container> {
    vec![
        Container {
            id: DEFAULT_PUBLIC_CONTAINER_ID,
            name: DEFAULT_PUBLIC_CONTAINER_NAME.to_string(),
            status: ContainerStatus::Active,
            is_private: false,
            parent_account_id,
        },
        Container {
            id: DEFAULT_PRIVATE_CONTAINER_ID,
            name: DEFAULT_PRIVATE_CONTAINER_NAME.to_string(),
            status: ContainerStatus::Active,
            is_private: true,
            parent_account_id,
        },
    ]
}

/// The distinguished record injected when nothing names an account.
pub fn unknown_account() -> Account {
    let mut containers = vec![Container {
        id: UNKNOWN_CONTAINER_ID,
        name: UNKNOWN_CONTAINER_NAME.to_string(),
        status: ContainerStatus::Active,
        is_private: false,
        parent_account_id: UNKNOWN_ACCOUNT_ID,
    }];
    containers.extend(legacy_default_containers(UNKNOWN_ACCOUNT_ID));
    Account {
        id: UNKNOWN_ACCOUNT_ID,
        name: UNKNOWN_ACCOUNT_NAME.to_string(),
        status: AccountStatus::Active,
        containers,
    }
}

pub fn unknown_container() -> Container {
    Container {
        id: UNKNOWN_CONTAINER_ID,
        name: UNKNOWN_CONTAINER_NAME.to_string(),
        status: ContainerStatus::Active,
        is_private: false,
        parent_account_id: UNKNOWN_ACCOUNT_ID,
    }
}

/// Directory lookups. Read-mostly; writes happen through an out-of-band
/// updater, so implementations must allow concurrent readers.
pub trait AccountService: Send + Sync {
    fn account_by_id(&self, id: i16) -> Option<Account>;
    fn account_by_name(&self, name: &str) -> Option<Account>;
}

pub struct InMemoryAccountService {
    by_id: RwLock<HashMap<i16, Account>>,
}

impl InMemoryAccountService {
    /// A directory holding only the unknown account.
    pub fn new() -> Self {
        let service = Self {
            by_id: RwLock::new(HashMap::new()),
        };
        service.update_accounts(vec![unknown_account()]);
        service
    }

    /// Inserts or replaces accounts, keyed by id.
    pub fn update_accounts(&self, accounts: Vec<Account>) {
        let mut by_id = self.by_id.write().unwrap();
        for account in accounts {
            by_id.insert(account.id, account);
        }
    }
}

impl Default for InMemoryAccountService {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountService for InMemoryAccountService {
    fn account_by_id(&self, id: i16) -> Option<Account> {
        self.by_id.read().unwrap().get(&id).cloned()
    }

    fn account_by_name(&self, name: &str) -> Option<Account> {
        self.by_id
            .read()
            .unwrap()
            .values()
            .find(|a| a.name == name)
            .cloned()
    }
}
