/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! An in-memory stand-in for the Windows logon and impersonation APIs.
//!
//! Accounts live in a directory held by the backend; the token bound to
//! a thread lives in a thread local, the same way an impersonation token
//! is attached to a Windows thread.  The backend counts every token it
//! issues and closes so tests can check that nothing leaks or is freed
//! twice, and it can be told to fail the next bind, restore or close.
//!
//! Unlike Windows, a `NewCredentials` logon is checked against the
//! directory immediately.  The identity seen during such a logon follows
//! Windows: the thread keeps the process account's name.
use super::Backend;
use crate::{AuthenticationError, Credential, IdentityContext, LogonClass, LOCAL_DOMAIN};
use secrecy::{ExposeSecret, SecretString};
use std::cell::RefCell;
use std::collections::HashSet;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The user name or password is incorrect
pub const ERROR_LOGON_FAILURE: u32 = 1326;
/// The specified domain either does not exist or could not be contacted
pub const ERROR_NO_SUCH_DOMAIN: u32 = 1355;
/// The user has not been granted the requested logon type
pub const ERROR_LOGON_TYPE_NOT_GRANTED: u32 = 1385;

/// The logon session of the process token
pub const PROCESS_LOGON_ID: u64 = 0x3e7;

thread_local! {
    static THREAD_TOKEN: RefCell<Option<Bound>> = RefCell::new(None);
}

#[derive(Clone, Debug)]
struct Bound {
    id: u64,
    account: String,
    class: LogonClass,
    logon_id: u64,
}

/// A logon token issued by `SimulatedBackend`
#[derive(Debug)]
pub struct SimulatedToken(Bound);

impl SimulatedToken {
    pub fn id(&self) -> u64 {
        self.0.id
    }
}

/// The thread's token from before a `bind`
#[derive(Debug)]
pub struct SavedThreadToken(Option<Bound>);

#[derive(Debug)]
struct Account {
    domain: String,
    username: String,
    secret: SecretString,
    denied: HashSet<LogonClass>,
}

impl Account {
    fn principal(&self) -> String {
        format!("{}\\{}", self.domain, self.username)
    }
}

#[derive(Debug)]
struct Directory {
    machine: String,
    process_user: String,
    accounts: Mutex<Vec<Account>>,
    live: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
    logon_attempts: AtomicUsize,
    issued: AtomicUsize,
    closed: AtomicUsize,
    double_closes: AtomicUsize,
    fail_bind: AtomicBool,
    fail_restore: AtomicBool,
    fail_close: AtomicBool,
    fail_inspect: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloning a `SimulatedBackend` shares the directory and the counters
#[derive(Clone, Debug)]
pub struct SimulatedBackend {
    inner: Arc<Directory>,
}

impl SimulatedBackend {
    /// A machine named `machine` whose process runs as `machine\process_user`
    pub fn new<M: Into<String>, U: Into<String>>(machine: M, process_user: U) -> Self {
        Self {
            inner: Arc::new(Directory {
                machine: machine.into(),
                process_user: process_user.into(),
                accounts: Mutex::new(Vec::new()),
                live: Mutex::new(HashSet::new()),
                next_id: AtomicU64::new(1),
                logon_attempts: AtomicUsize::new(0),
                issued: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                double_closes: AtomicUsize::new(0),
                fail_bind: AtomicBool::new(false),
                fail_restore: AtomicBool::new(false),
                fail_close: AtomicBool::new(false),
                fail_inspect: AtomicBool::new(false),
            }),
        }
    }

    pub fn with_account<D, U, S>(self, domain: D, username: U, secret: S) -> Self
    where
        D: Into<String>,
        U: Into<String>,
        S: Into<String>,
    {
        self.add_account(domain, username, secret, &[]);
        self
    }

    /// Register an account that may not use the logon classes in `denied`.
    /// A domain of `.` registers a local account of this machine.
    pub fn add_account<D, U, S>(&self, domain: D, username: U, secret: S, denied: &[LogonClass])
    where
        D: Into<String>,
        U: Into<String>,
        S: Into<String>,
    {
        let domain = domain.into();
        let domain = if domain == LOCAL_DOMAIN {
            self.inner.machine.clone()
        } else {
            domain
        };
        lock(&self.inner.accounts).push(Account {
            domain,
            username: username.into(),
            secret: SecretString::from(secret.into()),
            denied: denied.iter().copied().collect(),
        });
    }

    pub fn machine(&self) -> &str {
        &self.inner.machine
    }

    /// `MACHINE\user` for the process token
    pub fn process_principal(&self) -> String {
        format!("{}\\{}", self.inner.machine, self.inner.process_user)
    }

    pub fn logon_attempts(&self) -> usize {
        self.inner.logon_attempts.load(Ordering::SeqCst)
    }

    pub fn tokens_issued(&self) -> usize {
        self.inner.issued.load(Ordering::SeqCst)
    }

    pub fn tokens_closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn live_tokens(&self) -> usize {
        lock(&self.inner.live).len()
    }

    /// How many times a token that was already closed was closed again
    pub fn double_closes(&self) -> usize {
        self.inner.double_closes.load(Ordering::SeqCst)
    }

    pub fn fail_next_bind(&self) {
        self.inner.fail_bind.store(true, Ordering::SeqCst);
    }

    /// The failed restore leaves the thread bound
    pub fn fail_next_restore(&self) {
        self.inner.fail_restore.store(true, Ordering::SeqCst);
    }

    /// The failed close leaves the token live
    pub fn fail_next_close(&self) {
        self.inner.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_inspect(&self) {
        self.inner.fail_inspect.store(true, Ordering::SeqCst);
    }

    fn resolve_domain<'a>(&'a self, domain: &'a str) -> &'a str {
        if domain == LOCAL_DOMAIN {
            &self.inner.machine
        } else {
            domain
        }
    }

    fn authenticate(
        &self,
        credential: &Credential,
        class: LogonClass,
    ) -> Result<String, AuthenticationError> {
        let domain = self.resolve_domain(credential.domain());
        let accounts = lock(&self.inner.accounts);

        let domain_known = domain.eq_ignore_ascii_case(&self.inner.machine)
            || accounts.iter().any(|a| a.domain.eq_ignore_ascii_case(domain));
        if !domain_known {
            return Err(AuthenticationError::new(
                ERROR_NO_SUCH_DOMAIN,
                "The specified domain either does not exist or could not be contacted.",
            ));
        }

        let account = accounts
            .iter()
            .find(|a| {
                a.domain.eq_ignore_ascii_case(domain)
                    && a.username.eq_ignore_ascii_case(credential.username())
                    && a.secret.expose_secret() == credential.secret().expose_secret()
            })
            .ok_or_else(|| {
                AuthenticationError::new(
                    ERROR_LOGON_FAILURE,
                    "The user name or password is incorrect.",
                )
            })?;

        if account.denied.contains(&class) {
            return Err(AuthenticationError::new(
                ERROR_LOGON_TYPE_NOT_GRANTED,
                "Logon failure: the user has not been granted the requested logon type at this computer.",
            ));
        }

        Ok(account.principal())
    }
}

impl Backend for SimulatedBackend {
    type Token = SimulatedToken;
    type SavedBinding = SavedThreadToken;

    fn logon(
        &self,
        credential: &Credential,
        class: LogonClass,
    ) -> Result<SimulatedToken, AuthenticationError> {
        self.inner.logon_attempts.fetch_add(1, Ordering::SeqCst);
        let account = self.authenticate(credential, class)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.live).insert(id);
        self.inner.issued.fetch_add(1, Ordering::SeqCst);

        Ok(SimulatedToken(Bound {
            id,
            account,
            class,
            logon_id: PROCESS_LOGON_ID + id,
        }))
    }

    fn close(&self, token: SimulatedToken) -> IoResult<()> {
        if self.inner.fail_close.swap(false, Ordering::SeqCst) {
            return Err(IoError::new(ErrorKind::Other, "simulated close failure"));
        }
        if lock(&self.inner.live).remove(&token.0.id) {
            self.inner.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            self.inner.double_closes.fetch_add(1, Ordering::SeqCst);
            Err(IoError::new(
                ErrorKind::InvalidInput,
                format!("token {} was already closed", token.0.id),
            ))
        }
    }

    fn bind(&self, token: &SimulatedToken) -> IoResult<SavedThreadToken> {
        if self.inner.fail_bind.swap(false, Ordering::SeqCst) {
            return Err(IoError::new(
                ErrorKind::PermissionDenied,
                "simulated bind failure",
            ));
        }
        if !lock(&self.inner.live).contains(&token.0.id) {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!("token {} is closed", token.0.id),
            ));
        }
        let previous = THREAD_TOKEN.with(|slot| slot.replace(Some(token.0.clone())));
        Ok(SavedThreadToken(previous))
    }

    fn restore(&self, saved: SavedThreadToken) -> IoResult<()> {
        if self.inner.fail_restore.swap(false, Ordering::SeqCst) {
            return Err(IoError::new(ErrorKind::Other, "simulated restore failure"));
        }
        THREAD_TOKEN.with(|slot| *slot.borrow_mut() = saved.0);
        Ok(())
    }

    fn current_identity(&self) -> IoResult<IdentityContext> {
        if self.inner.fail_inspect.swap(false, Ordering::SeqCst) {
            return Err(IoError::new(
                ErrorKind::PermissionDenied,
                "simulated inspect failure",
            ));
        }
        let bound = THREAD_TOKEN.with(|slot| slot.borrow().clone());
        Ok(match bound {
            Some(bound) => {
                let name = if bound.class.keeps_local_identity() {
                    self.process_principal()
                } else {
                    bound.account
                };
                IdentityContext::new(name, bound.logon_id, true)
            }
            None => IdentityContext::new(self.process_principal(), PROCESS_LOGON_ID, false),
        })
    }
}
