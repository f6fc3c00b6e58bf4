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

use crate::errors::{Error, UnknownLogonClass};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// The domain name that Windows interprets as "this machine's local
/// account database"
pub const LOCAL_DOMAIN: &str = ".";

/// A username, domain and secret that will be presented to the platform
/// exactly once, to obtain a logon token.
///
/// The secret is held in a `SecretString` so that it is wiped when the
/// credential is dropped and redacted from `Debug` output.  The credential
/// is consumed by `IdentitySwitch::execute`, which drops it as soon as the
/// token has been issued.
pub struct Credential {
    username: String,
    domain: String,
    secret: SecretString,
}

impl Credential {
    /// Construct a credential, rejecting any empty field
    pub fn new<U, D, S>(username: U, domain: D, secret: S) -> Result<Self, Error>
    where
        U: Into<String>,
        D: Into<String>,
        S: Into<String>,
    {
        let username = username.into();
        let domain = domain.into();
        let secret = SecretString::from(secret.into());

        if username.is_empty() {
            return Err(Error::InvalidCredential { field: "username" });
        }
        if domain.is_empty() {
            return Err(Error::InvalidCredential { field: "domain" });
        }
        if secret.expose_secret().is_empty() {
            return Err(Error::InvalidCredential { field: "secret" });
        }

        Ok(Self {
            username,
            domain,
            secret,
        })
    }

    /// Construct a credential for an account in the local machine's
    /// account database
    pub fn local<U, S>(username: U, secret: S) -> Result<Self, Error>
    where
        U: Into<String>,
        S: Into<String>,
    {
        Self::new(username, LOCAL_DOMAIN, secret)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn is_local(&self) -> bool {
        self.domain == LOCAL_DOMAIN
    }

    /// `DOMAIN\user`, the down-level logon name for the account
    pub fn principal(&self) -> String {
        format!("{}\\{}", self.domain, self.username)
    }

    pub(crate) fn secret(&self) -> &SecretString {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Credential")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// How the logon token is obtained.  This decides what the impersonating
/// thread can do with the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogonClass {
    /// The token clones the caller's local identity and carries the
    /// supplied credential for outbound network connections only.
    /// Local access checks are made against the original identity.
    /// The credential is not verified until it is first used on the
    /// network.
    NewCredentials,
    /// A full interactive logon.  The account needs the
    /// "allow log on locally" right.
    Interactive,
    /// A network logon; verifies the password but the token cannot
    /// be used to reach further network resources.
    Network,
    /// Like `Network`, but the credential is cached in the logon session
    /// so that it can be forwarded.
    NetworkCleartext,
    Batch,
    Service,
}

impl LogonClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewCredentials => "new-credentials",
            Self::Interactive => "interactive",
            Self::Network => "network",
            Self::NetworkCleartext => "network-cleartext",
            Self::Batch => "batch",
            Self::Service => "service",
        }
    }

    /// True when the resulting token keeps the caller's local identity
    pub fn keeps_local_identity(self) -> bool {
        self == Self::NewCredentials
    }
}

impl Default for LogonClass {
    fn default() -> Self {
        Self::NewCredentials
    }
}

impl fmt::Display for LogonClass {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for LogonClass {
    type Err = UnknownLogonClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "new-credentials" => Ok(Self::NewCredentials),
            "interactive" => Ok(Self::Interactive),
            "network" => Ok(Self::Network),
            "network-cleartext" => Ok(Self::NetworkCleartext),
            "batch" => Ok(Self::Batch),
            "service" => Ok(Self::Service),
            _ => Err(UnknownLogonClass(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_rejects_empty_fields() {
        assert!(Credential::new("alice", "corp", "pw").is_ok());
        match Credential::new("", "corp", "pw") {
            Err(Error::InvalidCredential { field }) => assert_eq!(field, "username"),
            other => panic!("unexpected {:?}", other),
        }
        match Credential::new("alice", "", "pw") {
            Err(Error::InvalidCredential { field }) => assert_eq!(field, "domain"),
            other => panic!("unexpected {:?}", other),
        }
        match Credential::new("alice", "corp", "") {
            Err(Error::InvalidCredential { field }) => assert_eq!(field, "secret"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn debug_never_shows_the_secret() {
        let cred = Credential::new("alice", "corp", "validpw").unwrap();
        let text = format!("{:?}", cred);
        assert!(text.contains("alice"));
        assert!(!text.contains("validpw"), "{}", text);
    }

    #[test]
    fn local_credentials_use_the_dot_domain() {
        let cred = Credential::local("bob", "pw").unwrap();
        assert!(cred.is_local());
        assert_eq!(cred.principal(), ".\\bob");
        assert!(!Credential::new("bob", "corp", "pw").unwrap().is_local());
    }

    #[test]
    fn logon_class_round_trips_through_its_name() {
        for class in &[
            LogonClass::NewCredentials,
            LogonClass::Interactive,
            LogonClass::Network,
            LogonClass::NetworkCleartext,
            LogonClass::Batch,
            LogonClass::Service,
        ] {
            assert_eq!(class.as_str().parse::<LogonClass>(), Ok(*class));
        }
        assert_eq!(
            "NEW_CREDENTIALS".parse::<LogonClass>(),
            Ok(LogonClass::NewCredentials)
        );
        assert!("remote-desktop".parse::<LogonClass>().is_err());
        assert_eq!(LogonClass::default(), LogonClass::NewCredentials);
    }
}
