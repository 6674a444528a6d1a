//! Email/password accounts and sign-in state.

use std::sync::mpsc::{Receiver, Sender, channel};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::generate_id_with_len;
use crate::storage::{Document, DocumentStore, SERVER_TIMESTAMP, StorageError};

const MIN_PASSWORD_LEN: usize = 6;
const UID_LEN: usize = 28;
const SALT_LEN: usize = 16;

/// Authenticated user as seen by the rest of the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedIn(Identity),
    SignedOut,
}

impl AuthState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthState::SignedIn(identity) => Some(identity),
            AuthState::SignedOut => None,
        }
    }
}

/// Provider failures; messages are shown to the user verbatim.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("The email address is badly formatted.")]
    InvalidEmail,
    #[error("Password should be at least 6 characters")]
    WeakPassword,
    #[error("The email address is already in use by another account.")]
    EmailInUse,
    #[error("There is no user record corresponding to this identifier. The user may have been deleted.")]
    UserNotFound,
    #[error("The password is invalid or the user does not have a password.")]
    WrongPassword,
    #[error("You are already logged in. Logout first to create a new account.")]
    AlreadySignedIn,
    #[error("stored account {0} is corrupt")]
    CorruptAccount(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub trait AuthProvider {
    fn sign_in(&mut self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// Creates the account and signs it in.
    fn sign_up(&mut self, email: &str, password: &str) -> Result<Identity, AuthError>;

    fn sign_out(&mut self) -> Result<(), AuthError>;

    fn current_user(&self) -> Option<&Identity>;

    /// Delivers the current state immediately, then every transition.
    fn subscribe(&mut self) -> Receiver<AuthState>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountDocument {
    uid: String,
    email: String,
    salt: String,
    password_hash: String,
}

/// Accounts kept as documents under `accounts/` in the same store as the data.
pub struct LocalAuth<S> {
    store: S,
    current: Option<Identity>,
    listeners: Vec<Sender<AuthState>>,
}

impl<S: DocumentStore> LocalAuth<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            current: None,
            listeners: Vec::new(),
        }
    }

    /// Re-establishes a previously persisted sign-in if the account still matches.
    pub fn restore(&mut self, identity: &Identity) -> Result<bool, AuthError> {
        let Some(account) = self.load_account(&identity.email)? else {
            warn!(email = %identity.email, "persisted sign-in refers to a missing account");
            return Ok(false);
        };
        if account.uid != identity.uid {
            warn!(email = %identity.email, "persisted sign-in does not match the account");
            return Ok(false);
        }
        self.set_current(Some(Identity {
            uid: account.uid,
            email: account.email,
        }));
        Ok(true)
    }

    fn load_account(&self, email: &str) -> Result<Option<AccountDocument>, AuthError> {
        let path = account_path(email);
        let Some(document) = self.store.get(&path)? else {
            return Ok(None);
        };
        serde_json::from_value(Value::Object(document))
            .map(Some)
            .map_err(|_| AuthError::CorruptAccount(path))
    }

    fn set_current(&mut self, identity: Option<Identity>) {
        if self.current == identity {
            return;
        }
        self.current = identity;
        let state = self.state();
        self.listeners
            .retain(|listener| listener.send(state.clone()).is_ok());
    }

    fn state(&self) -> AuthState {
        match &self.current {
            Some(identity) => AuthState::SignedIn(identity.clone()),
            None => AuthState::SignedOut,
        }
    }
}

impl<S: DocumentStore> AuthProvider for LocalAuth<S> {
    fn sign_in(&mut self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = normalize_email(email)?;
        let account = self.load_account(&email)?.ok_or(AuthError::UserNotFound)?;

        let expected = blake3::Hash::from_hex(&account.password_hash)
            .map_err(|_| AuthError::CorruptAccount(account_path(&email)))?;
        if password_hash(&account.salt, password) != expected {
            warn!(email = %email, "sign-in rejected");
            return Err(AuthError::WrongPassword);
        }

        let identity = Identity {
            uid: account.uid,
            email: account.email,
        };
        info!(uid = %identity.uid, "signed in");
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    fn sign_up(&mut self, email: &str, password: &str) -> Result<Identity, AuthError> {
        if self.current.is_some() {
            return Err(AuthError::AlreadySignedIn);
        }
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        if self.load_account(&email)?.is_some() {
            return Err(AuthError::EmailInUse);
        }

        let identity = Identity {
            uid: generate_id_with_len(UID_LEN),
            email,
        };
        let salt = generate_id_with_len(SALT_LEN);
        let mut document = Document::new();
        document.insert("uid".to_string(), json!(identity.uid));
        document.insert("email".to_string(), json!(identity.email));
        document.insert("salt".to_string(), json!(salt));
        document.insert(
            "passwordHash".to_string(),
            json!(password_hash(&salt, password).to_hex().as_str()),
        );
        document.insert("createdAt".to_string(), json!(SERVER_TIMESTAMP));
        self.store.set_merge(&account_path(&identity.email), document)?;

        info!(uid = %identity.uid, "account created");
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    fn sign_out(&mut self) -> Result<(), AuthError> {
        if let Some(identity) = &self.current {
            info!(uid = %identity.uid, "signed out");
        }
        self.set_current(None);
        Ok(())
    }

    fn current_user(&self) -> Option<&Identity> {
        self.current.as_ref()
    }

    fn subscribe(&mut self) -> Receiver<AuthState> {
        let (sender, receiver) = channel();
        // The receiver is still alive here, so this cannot fail.
        let _ = sender.send(self.state());
        self.listeners.push(sender);
        receiver
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid { Ok(email) } else { Err(AuthError::InvalidEmail) }
}

fn account_path(email: &str) -> String {
    format!("accounts/{}", blake3::hash(email.as_bytes()).to_hex())
}

fn password_hash(salt: &str, password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize()
}
