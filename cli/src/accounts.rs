//! Loads a simulated account directory for `--simulate`:
//!
//! ```json
//! {
//!   "machine": "HOST",
//!   "process_user": "svc",
//!   "accounts": [
//!     {"domain": "corp", "username": "alice", "password": "validpw",
//!      "denied_classes": ["interactive"]}
//!   ]
//! }
//! ```

use anyhow::Context;
use impersonation::{LogonClass, SimulatedBackend};
use serde::Deserialize;
use std::path::Path;

// No Debug: the entries carry passwords.
#[derive(Deserialize)]
struct AccountsFile {
    machine: String,
    process_user: String,
    #[serde(default)]
    accounts: Vec<AccountEntry>,
}

#[derive(Deserialize)]
struct AccountEntry {
    domain: String,
    username: String,
    password: String,
    #[serde(default)]
    denied_classes: Vec<LogonClass>,
}

pub(crate) fn parse(text: &str) -> crate::Result<SimulatedBackend> {
    let file: AccountsFile = serde_json::from_str(text)?;
    let backend = SimulatedBackend::new(file.machine, file.process_user);
    for entry in file.accounts {
        backend.add_account(
            entry.domain,
            entry.username,
            entry.password,
            &entry.denied_classes,
        );
    }
    tracing::debug!(machine = backend.machine(), "loaded simulated accounts");
    Ok(backend)
}

pub(crate) fn load(path: &Path) -> crate::Result<SimulatedBackend> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading accounts from {}", path.display()))?;
    parse(&text).with_context(|| format!("parsing accounts from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use impersonation::backend::simulated::ERROR_LOGON_TYPE_NOT_GRANTED;
    use impersonation::{Credential, IdentitySwitch};

    const ACCOUNTS: &str = r#"{
        "machine": "HOST",
        "process_user": "svc",
        "accounts": [
            {"domain": "corp", "username": "alice", "password": "validpw",
             "denied_classes": ["interactive"]},
            {"domain": ".", "username": "backup", "password": "tape"}
        ]
    }"#;

    #[test]
    fn parsed_accounts_can_log_on() {
        let backend = parse(ACCOUNTS).unwrap();
        assert_eq!(backend.process_principal(), "HOST\\svc");

        let switch = IdentitySwitch::with_backend(backend.clone())
            .with_logon_class(LogonClass::Network);
        let name = switch
            .run(Credential::local("backup", "tape").unwrap(), |id| {
                id.name().to_string()
            })
            .unwrap();
        assert_eq!(name, "HOST\\backup");
        assert_eq!(backend.live_tokens(), 0);
    }

    #[test]
    fn denied_classes_are_honoured() {
        let switch = IdentitySwitch::with_backend(parse(ACCOUNTS).unwrap())
            .with_logon_class(LogonClass::Interactive);
        let err = switch
            .run(Credential::new("alice", "corp", "validpw").unwrap(), |_| ())
            .unwrap_err();
        assert_eq!(
            err.as_authentication().map(|e| e.code()),
            Some(ERROR_LOGON_TYPE_NOT_GRANTED)
        );
    }

    #[test]
    fn unknown_logon_class_is_rejected() {
        let text = r#"{"machine": "HOST", "process_user": "svc", "accounts": [
            {"domain": "corp", "username": "a", "password": "b", "denied_classes": ["remote"]}
        ]}"#;
        assert!(parse(text).is_err());
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("missing.json"), "{:#}", err);
    }
}
