//! This crate runs a closure with the current thread bound to another
//! Windows identity and reverts the thread afterwards, whether the closure
//! returns a value, returns an error or panics.
//!
//! Start with [IdentitySwitch](struct.IdentitySwitch.html), which logs on
//! with a [Credential](struct.Credential.html), impersonates the resulting
//! token on the calling thread for the duration of
//! [IdentitySwitch::execute](struct.IdentitySwitch.html#method.execute) and
//! then closes the token.
//!
//! ```norun
//! use impersonation::{Credential, IdentitySwitch};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let before = impersonation::current_identity()?;
//!     let credential = Credential::new("alice", "CORP", "hunter2")?;
//!     let copied = IdentitySwitch::new().run(credential, |id| {
//!         println!("during: {}", id.display_name());
//!         std::fs::copy(r"C:\Temp\Sample.html", r"\\fileserver\share\Sample.html")
//!     })??;
//!     assert_eq!(before, impersonation::current_identity()?);
//!     println!("copied {} bytes", copied);
//!     Ok(())
//! }
//! ```
//!
//! The default logon class is [LogonClass::NewCredentials]: the thread keeps
//! its local identity for access checks on this machine and presents the
//! supplied credential when it reaches out to network resources.  Windows
//! does not validate a new-credentials logon until the first network access,
//! so choose [LogonClass::Interactive] or [LogonClass::Network] when a bad
//! password must be rejected up front.
pub mod backend;
mod credential;
mod errors;
mod identity;
mod switch;
mod token;

pub use backend::Backend;
#[cfg(windows)]
pub use backend::windows::WindowsBackend;
#[cfg(any(test, feature = "simulated"))]
pub use backend::simulated::SimulatedBackend;
pub use credential::{Credential, LogonClass, LOCAL_DOMAIN};
pub use errors::{AuthenticationError, Error, ExecuteError, Result, UnknownLogonClass};
pub use identity::IdentityContext;
pub use switch::IdentitySwitch;
pub use token::TokenHandle;

/// Take a snapshot of the identity the calling thread currently runs as.
#[cfg(windows)]
pub fn current_identity() -> Result<IdentityContext> {
    IdentitySwitch::new().current_identity()
}

/// Log on with `credential` and run `action` impersonating the result,
/// using the default logon class.  This is the one-shot form of
/// [IdentitySwitch::run].
#[cfg(windows)]
pub fn run_impersonated<R, F>(credential: Credential, action: F) -> Result<R>
where
    F: FnOnce(&IdentityContext) -> R,
{
    IdentitySwitch::new().run(credential, action)
}
