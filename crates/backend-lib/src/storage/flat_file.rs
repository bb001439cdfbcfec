// ============================
// crates/backend-lib/src/storage/flat_file.rs
// ============================
//! Flat-file storage backend.
//!
//! Layout under the root directory:
//! - `accounts/{username}.json` holds an account together with its credential
//! - `audit/login.log` is the JSON-lines login audit log
//! - `tokens.json` is a snapshot of the token pool table
//!
//! Every rewritten file goes through a temp file and a rename, so readers see
//! either the old or the new content. Writes run on their own task: once
//! started they finish and update the in-memory view, even if the caller has
//! stopped waiting.
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keygate_common::AccountId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::{fs as tokio_fs, io::AsyncWriteExt, sync::Mutex};

use super::{AccountStore, AuditLog, TokenStore, TokenTable};
use crate::auth::password::validate_username;
use crate::error::StorageError;
use crate::models::{
    Account, CredentialRecord, LiveToken, LoginAuditEntry, NewAccount, ProfileUpdate,
};

const ACCOUNTS_DIR: &str = "accounts";
const AUDIT_DIR: &str = "audit";
const AUDIT_FILE: &str = "login.log";
const TOKENS_FILE: &str = "tokens.json";

/// One account file on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAccount {
    account: Account,
    credential: CredentialRecord,
}

struct Inner {
    root: PathBuf,
    /// id -> username, rebuilt from the account files at open
    ids: RwLock<HashMap<AccountId, String>>,
    /// Serializes account writes
    accounts_lock: Mutex<()>,
    /// Committed token table; readers never wait on disk
    tokens: RwLock<TokenTable>,
    /// Serializes token table rewrites
    token_writer: Mutex<()>,
    audit_lock: Mutex<()>,
}

/// JSON-file implementation of the storage traits
#[derive(Clone)]
pub struct FlatFileStorage {
    inner: Arc<Inner>,
}

impl FlatFileStorage {
    /// Open (or create) a store rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(ACCOUNTS_DIR))?;
        fs::create_dir_all(root.join(AUDIT_DIR))?;

        let mut ids = HashMap::new();
        for entry in fs::read_dir(root.join(ACCOUNTS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stored: StoredAccount = serde_json::from_slice(&fs::read(&path)?)?;
            ids.insert(stored.account.id, stored.account.username);
        }

        let tokens = match fs::read(root.join(TOKENS_FILE)) {
            Ok(bytes) => TokenTable::from_tokens(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => TokenTable::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            root = %root.display(),
            accounts = ids.len(),
            "opened flat-file storage"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                ids: RwLock::new(ids),
                accounts_lock: Mutex::new(()),
                tokens: RwLock::new(tokens),
                token_writer: Mutex::new(()),
                audit_lock: Mutex::new(()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Read back the whole login audit log
    pub async fn read_audit_log(&self) -> Result<Vec<LoginAuditEntry>, StorageError> {
        let path = self.inner.root.join(AUDIT_DIR).join(AUDIT_FILE);
        let content = match tokio_fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StorageError::from))
            .collect()
    }

    fn account_path(&self, username: &str) -> Option<PathBuf> {
        // Usernames become file names
        validate_username(username).then(|| {
            self.inner
                .root
                .join(ACCOUNTS_DIR)
                .join(format!("{username}.json"))
        })
    }

    async fn read_account(&self, username: &str) -> Result<Option<StoredAccount>, StorageError> {
        let Some(path) = self.account_path(username) else {
            return Ok(None);
        };
        match tokio_fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_account(&self, stored: &StoredAccount) -> Result<(), StorageError> {
        let path = self.account_path(&stored.account.username).ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("`{}` is not a safe file name", stored.account.username),
            ))
        })?;
        write_atomic(&path, &serde_json::to_vec_pretty(stored)?).await
    }

    /// Run `write` to completion on its own task and wait for the result.
    async fn detached<T, Fut>(&self, write: impl FnOnce(Self) -> Fut) -> Result<T, StorageError>
    where
        Fut: Future<Output = Result<T, StorageError>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(write(self.clone()))
            .await
            .map_err(|e| StorageError::Unavailable(format!("storage write task failed: {e}")))?
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, StorageError> {
        let _guard = self.inner.accounts_lock.lock().await;

        if self.read_account(&new.username).await?.is_some() {
            return Err(StorageError::Conflict(new.username));
        }

        let id = self.inner.ids.read().keys().max().copied().unwrap_or(0) + 1;
        let account = Account::new(id, &new.username, Utc::now());
        let stored = StoredAccount {
            account: account.clone(),
            credential: CredentialRecord {
                account_id: id,
                username: new.username.clone(),
                salt: new.salt,
                password_hash: new.password_hash,
            },
        };

        self.write_account(&stored).await?;
        self.inner.ids.write().insert(id, new.username);
        Ok(account)
    }

    async fn modify_account(
        &self,
        id: AccountId,
        change: impl FnOnce(&mut StoredAccount),
    ) -> Result<StoredAccount, StorageError> {
        let _guard = self.inner.accounts_lock.lock().await;

        let mut stored = self.read_account_by_id(id).await?;
        change(&mut stored);
        self.write_account(&stored).await?;
        Ok(stored)
    }

    async fn append_line(&self, line: Vec<u8>) -> Result<(), StorageError> {
        let _guard = self.inner.audit_lock.lock().await;
        let path = self.inner.root.join(AUDIT_DIR).join(AUDIT_FILE);
        let mut file = tokio_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Apply `change` to a copy of the token table, persist it, then commit.
    ///
    /// `change` reports whether it touched the table; untouched tables are not
    /// rewritten.
    async fn update_tokens<T, F>(&self, change: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut TokenTable) -> (T, bool) + Send + 'static,
        T: Send + 'static,
    {
        self.detached(move |store| async move {
            let _writer = store.inner.token_writer.lock().await;
            let mut next = store.inner.tokens.read().clone();
            let (result, changed) = change(&mut next);
            if changed {
                let bytes = serde_json::to_vec(&next.to_vec())?;
                write_atomic(&store.inner.root.join(TOKENS_FILE), &bytes).await?;
                *store.inner.tokens.write() = next;
            }
            Ok(result)
        })
        .await
    }

    fn username_for(&self, id: AccountId) -> Option<String> {
        self.inner.ids.read().get(&id).cloned()
    }

    async fn read_account_by_id(&self, id: AccountId) -> Result<StoredAccount, StorageError> {
        let not_found = || StorageError::NotFound(format!("account {id}"));
        let username = self.username_for(id).ok_or_else(not_found)?;
        self.read_account(&username).await?.ok_or_else(not_found)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    tokio_fs::write(&tmp, bytes).await?;
    tokio_fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl AccountStore for FlatFileStorage {
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StorageError> {
        Ok(self.read_account(username).await?.map(|s| s.account))
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StorageError> {
        let Some(username) = self.username_for(id) else {
            return Ok(None);
        };
        Ok(self.read_account(&username).await?.map(|s| s.account))
    }

    async fn find_credential(
        &self,
        username: &str,
    ) -> Result<Option<CredentialRecord>, StorageError> {
        Ok(self.read_account(username).await?.map(|s| s.credential))
    }

    async fn create(&self, new: NewAccount) -> Result<Account, StorageError> {
        self.detached(move |store| async move { store.create_account(new).await })
            .await
    }

    async fn update_profile(
        &self,
        id: AccountId,
        update: &ProfileUpdate,
    ) -> Result<Account, StorageError> {
        let update = update.clone();
        self.detached(move |store| async move {
            let stored = store
                .modify_account(id, |stored| stored.account.apply(&update, Utc::now()))
                .await?;
            Ok(stored.account)
        })
        .await
    }

    async fn update_credential(
        &self,
        id: AccountId,
        password_hash: &str,
    ) -> Result<(), StorageError> {
        let password_hash = password_hash.to_string();
        self.detached(move |store| async move {
            store
                .modify_account(id, |stored| stored.credential.password_hash = password_hash)
                .await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AuditLog for FlatFileStorage {
    /// Append a JSON line to `audit/login.log`
    async fn append(&self, entry: &LoginAuditEntry) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.detached(move |store| async move { store.append_line(line).await })
            .await
    }
}

#[async_trait]
impl TokenStore for FlatFileStorage {
    async fn tokens_for(&self, account_id: AccountId) -> Result<Vec<LiveToken>, StorageError> {
        Ok(self.inner.tokens.read().tokens_for(account_id))
    }

    async fn find_token(&self, token: &str) -> Result<Option<LiveToken>, StorageError> {
        Ok(self.inner.tokens.read().find(token))
    }

    async fn swap_tokens(&self, evict: &[String], insert: LiveToken) -> Result<(), StorageError> {
        let evict = evict.to_vec();
        self.update_tokens(move |table| (table.swap(&evict, insert), true))
            .await
    }

    async fn remove_token(&self, token: &str) -> Result<Option<LiveToken>, StorageError> {
        let token = token.to_string();
        self.update_tokens(move |table| {
            let removed = table.remove(&token);
            let changed = removed.is_some();
            (removed, changed)
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        self.update_tokens(move |table| {
            let purged = table.purge_expired(now);
            (purged, purged > 0)
        })
        .await
    }
}
