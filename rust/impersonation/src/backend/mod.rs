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

//! The platform primitives that `TokenHandle` and `IdentitySwitch` are
//! built from.
//!
//! Every method operates on the *calling thread*.  A backend must never
//! keep the active binding in process-wide state: two threads switching
//! identity at the same time must not observe each other.
use crate::{AuthenticationError, Credential, IdentityContext, LogonClass};
use std::io::Result as IoResult;

#[cfg(any(test, feature = "simulated"))]
pub mod simulated;
#[cfg(windows)]
pub mod windows;

pub trait Backend {
    /// An issued logon token.  Owning one means owning the OS resource.
    type Token;
    /// Whatever is needed to put the thread back the way it was before
    /// `bind` was called.
    type SavedBinding;

    /// Exchange the credential for a token.  Called once per acquisition;
    /// a failure is returned as-is and never retried.
    fn logon(
        &self,
        credential: &Credential,
        class: LogonClass,
    ) -> Result<Self::Token, AuthenticationError>;

    /// Free the token.  The token is consumed whether or not this succeeds.
    fn close(&self, token: Self::Token) -> IoResult<()>;

    /// Make the calling thread run as `token`, returning the binding it
    /// replaced.
    fn bind(&self, token: &Self::Token) -> IoResult<Self::SavedBinding>;

    /// Put back a binding previously returned by `bind` on this thread
    fn restore(&self, saved: Self::SavedBinding) -> IoResult<()>;

    /// Inspect the token the calling thread is effectively running with
    fn current_identity(&self) -> IoResult<IdentityContext>;
}
