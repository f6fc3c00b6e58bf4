use anyhow::{anyhow, Context};
use impersonation::{Backend, Credential, ExecuteError, IdentityContext, IdentitySwitch, LogonClass};
use std::sync::Arc;
use std::time::Duration;

type CredentialSupplier = dyn Fn() -> crate::Result<Credential> + Send + Sync;

/// What an action produced, along with the identity of the worker thread
/// just before and just after the switch
#[derive(Debug)]
pub(crate) struct Outcome<R> {
    pub before: IdentityContext,
    pub value: R,
    pub after: IdentityContext,
}

impl<R> Outcome<R> {
    pub fn restored(&self) -> bool {
        self.before == self.after
    }
}

/// Runs actions through an `IdentitySwitch` on tokio's blocking pool.
///
/// The switch binds whichever thread runs it, so each action gets a
/// blocking thread to itself for its whole duration.  A timeout only stops
/// the caller from waiting; the worker thread carries on and still
/// reverts when the action eventually returns.
pub(crate) struct Session<B> {
    switch: Arc<IdentitySwitch<B>>,
    credential: Arc<CredentialSupplier>,
    timeout: Option<Duration>,
}

fn into_anyhow(err: ExecuteError<anyhow::Error>) -> anyhow::Error {
    match err {
        ExecuteError::Switch(err) => err.into(),
        ExecuteError::Callback {
            error,
            cleanup: None,
        } => error,
        ExecuteError::Callback {
            error,
            cleanup: Some(cleanup),
        } => anyhow!("{:#} (cleanup also failed: {})", error, cleanup),
    }
}

impl<B> Session<B>
where
    B: Backend + Send + Sync + 'static,
{
    pub fn new<F>(backend: B, class: LogonClass, credential: F) -> Self
    where
        F: Fn() -> crate::Result<Credential> + Send + Sync + 'static,
    {
        Self {
            switch: Arc::new(IdentitySwitch::with_backend(backend).with_logon_class(class)),
            credential: Arc::new(credential),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `action` under the session's identity
    pub async fn execute<R, F>(&self, action: F) -> crate::Result<Outcome<R>>
    where
        F: FnOnce(&IdentityContext) -> crate::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let credential = (self.credential)()?;
        let switch = Arc::clone(&self.switch);

        let task = tokio::task::spawn_blocking(move || -> crate::Result<Outcome<R>> {
            let before = switch.current_identity()?;
            let value = switch.execute(credential, action).map_err(into_anyhow)?;
            let after = switch.current_identity()?;
            Ok(Outcome {
                before,
                value,
                after,
            })
        });

        let joined = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                anyhow!(
                    "gave up waiting after {:?}; the action is still running",
                    limit
                )
            })?,
            None => task.await,
        };
        joined.context("the impersonated action panicked")?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use impersonation::backend::simulated::ERROR_LOGON_FAILURE;
    use impersonation::SimulatedBackend;

    pub(crate) fn session(secret: &'static str) -> Session<SimulatedBackend> {
        let backend = SimulatedBackend::new("HOST", "svc").with_account("corp", "alice", "validpw");
        Session::new(backend, LogonClass::default(), move || {
            Ok(Credential::new("alice", "corp", secret)?)
        })
    }

    #[tokio::test]
    async fn outcome_reports_identity_around_the_switch() {
        let outcome = session("validpw")
            .execute(|id| Ok(id.clone()))
            .await
            .unwrap();
        assert!(outcome.restored());
        assert_ne!(outcome.value, outcome.before);
        assert_eq!(outcome.value.principal(), Some("corp\\alice"));
    }

    #[tokio::test]
    async fn bad_password_surfaces_the_logon_failure() {
        let err = session("wrongpw")
            .execute(|_| Ok(()))
            .await
            .unwrap_err();
        let err = err.downcast::<impersonation::Error>().unwrap();
        assert_eq!(err.as_authentication().map(|e| e.code()), Some(ERROR_LOGON_FAILURE));
    }

    #[tokio::test]
    async fn action_error_is_passed_through() {
        let err = session("validpw")
            .execute::<(), _>(|_| Err(anyhow!("share is read only")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "share is read only");
    }

    #[tokio::test]
    async fn release_failure_is_reported_alongside_the_action_error() {
        let backend = SimulatedBackend::new("HOST", "svc").with_account("corp", "alice", "validpw");
        backend.fail_next_close();
        let session = Session::new(backend, LogonClass::default(), || {
            Ok(Credential::new("alice", "corp", "validpw")?)
        });

        let err = session
            .execute::<(), _>(|_| Err(anyhow!("share is read only")))
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("share is read only"), "{}", text);
        assert!(text.contains("cleanup also failed"), "{}", text);
        assert!(text.contains("while releasing the logon token"), "{}", text);
    }

    #[tokio::test]
    async fn timeout_stops_waiting_for_a_slow_action() {
        let err = session("validpw")
            .with_timeout(Some(Duration::from_millis(20)))
            .execute(|_| {
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gave up waiting"), "{:#}", err);
    }
}
