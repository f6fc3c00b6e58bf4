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

use serde::Serialize;
use std::fmt;

/// A snapshot of who the calling thread appears to be.
///
/// `name` and `logon_id` come from the token that the platform will use
/// for local access checks.  `acting_as` is the principal that an
/// `IdentitySwitch` bound to this thread, if any; with the
/// `NewCredentials` logon class this is the identity presented to network
/// resources while `name` stays the original account.
///
/// Two snapshots compare equal only if every field matches, so a snapshot
/// taken inside a switch never equals one taken outside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IdentityContext {
    name: String,
    logon_id: u64,
    impersonating: bool,
    acting_as: Option<String>,
}

impl IdentityContext {
    pub fn new<N: Into<String>>(name: N, logon_id: u64, impersonating: bool) -> Self {
        Self {
            name: name.into(),
            logon_id,
            impersonating,
            acting_as: None,
        }
    }

    pub(crate) fn acting_as(mut self, principal: Option<String>) -> Self {
        self.acting_as = principal;
        self
    }

    /// The account name used for local access checks, `DOMAIN\user`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The logon session the token belongs to.  Every logon produces
    /// a new session, even for the same account.
    pub fn logon_id(&self) -> u64 {
        self.logon_id
    }

    /// True if the thread holds an impersonation token rather than
    /// running with the process token
    pub fn is_impersonating(&self) -> bool {
        self.impersonating
    }

    /// The principal bound by an enclosing `IdentitySwitch`
    pub fn principal(&self) -> Option<&str> {
        self.acting_as.as_deref()
    }

    /// The name to show a human: the switched-to principal when there is
    /// one, otherwise the account name
    pub fn display_name(&self) -> &str {
        self.principal().unwrap_or(self.name.as_str())
    }
}

impl fmt::Display for IdentityContext {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(self.display_name())
    }
}
