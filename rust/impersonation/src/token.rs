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
use crate::{AuthenticationError, Credential, Error, LogonClass};

/// `TokenHandle` owns the logon token issued for one credential.
///
/// The token is freed by `release`, which may be called any number of
/// times but only closes the underlying resource once.  If the handle is
/// dropped while still valid, `Drop` releases it; that path exists for
/// unwinding and cannot report a failure, so callers that care about the
/// outcome call `release` themselves.
pub struct TokenHandle<'a, B: Backend> {
    backend: &'a B,
    raw: Option<B::Token>,
    class: LogonClass,
}

impl<'a, B: Backend> TokenHandle<'a, B> {
    /// Log on with `credential`.  Exactly one logon attempt is made.
    pub fn acquire(
        backend: &'a B,
        credential: &Credential,
        class: LogonClass,
    ) -> Result<Self, AuthenticationError> {
        let raw = backend.logon(credential, class)?;
        tracing::debug!(logon_class = %class, "acquired logon token");
        Ok(Self {
            backend,
            raw: Some(raw),
            class,
        })
    }

    /// The platform token, until it has been released
    pub fn raw(&self) -> Option<&B::Token> {
        self.raw.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    pub fn logon_class(&self) -> LogonClass {
        self.class
    }

    /// Close the token.  The handle is invalid afterwards even if the
    /// platform reported an error; later calls do nothing.
    pub fn release(&mut self) -> Result<(), Error> {
        match self.raw.take() {
            Some(raw) => {
                self.backend
                    .close(raw)
                    .map_err(|source| Error::Release { source })?;
                tracing::debug!(logon_class = %self.class, "released logon token");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl<'a, B: Backend> Drop for TokenHandle<'a, B> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!("{}", err);
        }
    }
}
