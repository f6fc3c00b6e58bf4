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

use crate::backend::Backend;
#[cfg(windows)]
use crate::backend::windows::WindowsBackend;
use crate::{Credential, Error, ExecuteError, IdentityContext, LogonClass, TokenHandle};
use std::cell::RefCell;
use std::convert::Infallible;
use std::io::{Error as IoError, ErrorKind};

thread_local! {
    /// The principal bound to this thread by the innermost active switch
    static ACTING_AS: RefCell<Option<String>> = RefCell::new(None);
}

/// The thread side of a switch: while this is alive the calling thread
/// runs as the token it was built from.  Dropping it without calling
/// `restore` (which only happens while unwinding) restores anyway.
struct ThreadBinding<'a, B: Backend> {
    backend: &'a B,
    saved: Option<B::SavedBinding>,
    previous_principal: Option<String>,
}

impl<'a, B: Backend> ThreadBinding<'a, B> {
    fn bind(backend: &'a B, token: &TokenHandle<'a, B>, principal: String) -> Result<Self, Error> {
        let raw = token.raw().ok_or_else(|| Error::Bind {
            source: IoError::new(ErrorKind::InvalidInput, "the logon token was already released"),
        })?;
        let saved = backend.bind(raw).map_err(|source| Error::Bind { source })?;
        let previous_principal = ACTING_AS.with(|cell| cell.replace(Some(principal)));
        tracing::trace!(logon_class = %token.logon_class(), "bound logon token to thread");
        Ok(Self {
            backend,
            saved: Some(saved),
            previous_principal,
        })
    }

    /// Put the thread back the way `bind` found it.  Only the first call
    /// does anything.  If the platform restore fails the thread is still
    /// bound, so the principal it is acting as stays recorded.
    fn restore(&mut self) -> Result<(), Error> {
        let saved = match self.saved.take() {
            Some(saved) => saved,
            None => return Ok(()),
        };
        self.backend
            .restore(saved)
            .map_err(|source| Error::Restore { source })?;
        let previous = self.previous_principal.take();
        ACTING_AS.with(|cell| *cell.borrow_mut() = previous);
        tracing::trace!("restored previous thread identity");
        Ok(())
    }
}

impl<'a, B: Backend> Drop for ThreadBinding<'a, B> {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            tracing::warn!("{}", err);
        }
    }
}

/// Restore the thread, then release the token; both always run and
/// every failure is returned.
fn unwind_switch<B: Backend>(
    binding: &mut ThreadBinding<'_, B>,
    token: &mut TokenHandle<'_, B>,
) -> Option<Error> {
    let restored = binding.restore();
    let released = token.release();
    match (restored, released) {
        (Ok(()), Ok(())) => None,
        (Err(err), Ok(())) | (Ok(()), Err(err)) => Some(err),
        (Err(restore), Err(release)) => Some(Error::Cleanup {
            restore: Box::new(restore),
            release: Box::new(release),
        }),
    }
}

/// `IdentitySwitch` runs closures with the calling thread bound to the
/// identity of a credential.
///
/// Each call logs on, impersonates, runs the closure, reverts the thread
/// to whatever it was running as before the call and closes the token.
/// The revert and close happen however the closure finishes, including by
/// panicking.  Bindings are per thread; other threads are unaffected.
///
/// Switching while already switched works and restores the outer identity
/// afterwards, but is not otherwise supported.
pub struct IdentitySwitch<B> {
    backend: B,
    logon_class: LogonClass,
}

#[cfg(windows)]
impl IdentitySwitch<WindowsBackend> {
    /// Use the Windows logon APIs with the `NewCredentials` logon class
    pub fn new() -> Self {
        Self::with_backend(WindowsBackend::default())
    }
}

#[cfg(windows)]
impl Default for IdentitySwitch<WindowsBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> IdentitySwitch<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            logon_class: LogonClass::default(),
        }
    }

    /// Request tokens of a different logon class; see `LogonClass` for
    /// how each one behaves
    pub fn with_logon_class(mut self, class: LogonClass) -> Self {
        self.logon_class = class;
        self
    }

    pub fn logon_class(&self) -> LogonClass {
        self.logon_class
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Take a snapshot of the identity the calling thread runs as.  Works
    /// both inside and outside a switch.
    pub fn current_identity(&self) -> Result<IdentityContext, Error> {
        let identity = self
            .backend
            .current_identity()
            .map_err(|source| Error::Inspect { source })?;
        let principal = ACTING_AS.with(|cell| cell.borrow().clone());
        Ok(identity.acting_as(principal))
    }

    /// Log on with `credential` and call `callback` with the thread
    /// impersonating the result.
    ///
    /// The callback's return value is passed through.  If it returns an
    /// error, that error reaches the caller as `ExecuteError::Callback`
    /// after the thread has been restored and the token released.  If the
    /// logon fails the callback is never called.
    pub fn execute<R, E, F>(&self, credential: Credential, callback: F) -> Result<R, ExecuteError<E>>
    where
        F: FnOnce(&IdentityContext) -> Result<R, E>,
    {
        let principal = credential.principal();
        let mut token = TokenHandle::acquire(&self.backend, &credential, self.logon_class)
            .map_err(Error::from)?;
        drop(credential);

        let mut binding = match ThreadBinding::bind(&self.backend, &token, principal) {
            Ok(binding) => binding,
            Err(err) => return Err(err.followed_by(token.release().err()).into()),
        };

        let outcome = self.current_identity().map(|identity| callback(&identity));
        let cleanup = unwind_switch(&mut binding, &mut token);

        match (outcome, cleanup) {
            (Ok(Ok(value)), None) => Ok(value),
            (Ok(Ok(_)), Some(err)) => Err(ExecuteError::Switch(err)),
            (Ok(Err(error)), cleanup) => Err(ExecuteError::Callback { error, cleanup }),
            (Err(inspect), cleanup) => Err(ExecuteError::Switch(inspect.followed_by(cleanup))),
        }
    }

    /// `execute` for callbacks that cannot fail
    pub fn run<R, F>(&self, credential: Credential, callback: F) -> Result<R, Error>
    where
        F: FnOnce(&IdentityContext) -> R,
    {
        self.execute(credential, |identity| {
            Ok::<R, Infallible>(callback(identity))
        })
        .map_err(|err| match err {
            ExecuteError::Switch(err) => err,
            ExecuteError::Callback { error, .. } => match error {},
        })
    }
}
