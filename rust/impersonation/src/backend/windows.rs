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

//! `LogonUserW` + `ImpersonateLoggedOnUser`, the Win32 way of running a
//! thread as somebody else.
use super::Backend;
use crate::{AuthenticationError, Credential, IdentityContext, LogonClass};
use secrecy::zeroize::Zeroize;
use secrecy::ExposeSecret;
use std::ffi::OsStr;
use std::io::{Error as IoError, Result as IoResult};
use std::os::windows::ffi::OsStrExt;
use std::ptr::{null, null_mut};
use winapi::shared::minwindef::{DWORD, TRUE};
use winapi::shared::winerror::{ERROR_INSUFFICIENT_BUFFER, ERROR_NO_TOKEN};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::handleapi::CloseHandle;
use winapi::um::processthreadsapi::{
    GetCurrentProcess, GetCurrentThread, OpenProcessToken, OpenThreadToken, SetThreadToken,
};
use winapi::um::securitybaseapi::{GetTokenInformation, ImpersonateLoggedOnUser, RevertToSelf};
use winapi::um::winbase::{
    LogonUserW, LookupAccountSidW, LOGON32_LOGON_BATCH, LOGON32_LOGON_INTERACTIVE,
    LOGON32_LOGON_NETWORK, LOGON32_LOGON_NETWORK_CLEARTEXT, LOGON32_LOGON_NEW_CREDENTIALS,
    LOGON32_LOGON_SERVICE, LOGON32_PROVIDER_DEFAULT, LOGON32_PROVIDER_WINNT50,
};
use winapi::um::winnt::{
    TokenStatistics, TokenUser, HANDLE, SID_NAME_USE, TOKEN_IMPERSONATE, TOKEN_INFORMATION_CLASS,
    TOKEN_QUERY, TOKEN_STATISTICS, TOKEN_USER,
};

fn win32_error_with_context(context: &str, err: IoError) -> IoError {
    IoError::new(err.kind(), format!("{}: {}", context, err))
}

fn os_str_to_null_terminated_vec(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// The `LogonUserW` logon type and provider for each class.
/// `LOGON32_LOGON_NEW_CREDENTIALS` is only honoured by the WINNT50
/// provider.
fn logon_parameters(class: LogonClass) -> (DWORD, DWORD) {
    match class {
        LogonClass::NewCredentials => (LOGON32_LOGON_NEW_CREDENTIALS, LOGON32_PROVIDER_WINNT50),
        LogonClass::Interactive => (LOGON32_LOGON_INTERACTIVE, LOGON32_PROVIDER_DEFAULT),
        LogonClass::Network => (LOGON32_LOGON_NETWORK, LOGON32_PROVIDER_DEFAULT),
        LogonClass::NetworkCleartext => (LOGON32_LOGON_NETWORK_CLEARTEXT, LOGON32_PROVIDER_DEFAULT),
        LogonClass::Batch => (LOGON32_LOGON_BATCH, LOGON32_PROVIDER_DEFAULT),
        LogonClass::Service => (LOGON32_LOGON_SERVICE, LOGON32_PROVIDER_DEFAULT),
    }
}

/// An owning wrapper around a token handle.  `close` reports the outcome
/// of `CloseHandle`; dropping closes silently.
pub struct OwnedToken(HANDLE);

impl Drop for OwnedToken {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

impl OwnedToken {
    /// Returns the underlying raw handle value
    pub fn as_handle(&self) -> HANDLE {
        self.0
    }

    fn close(self) -> IoResult<()> {
        let handle = self.0;
        std::mem::forget(self);
        if unsafe { CloseHandle(handle) } == 0 {
            Err(win32_error_with_context(
                "CloseHandle(logon token)",
                IoError::last_os_error(),
            ))
        } else {
            Ok(())
        }
    }

    /// The impersonation token of the current thread, or None if the
    /// thread is running with the process token
    fn with_current_thread() -> IoResult<Option<Self>> {
        let mut token: HANDLE = null_mut();
        // Check access against the process, not the (possibly
        // impersonated) thread, so we can always read our own token
        let open_as_self = TRUE;
        let res = unsafe {
            OpenThreadToken(
                GetCurrentThread(),
                TOKEN_QUERY | TOKEN_IMPERSONATE,
                open_as_self,
                &mut token,
            )
        };
        if res != 0 {
            return Ok(Some(Self(token)));
        }
        let err = IoError::last_os_error();
        if err.raw_os_error() == Some(ERROR_NO_TOKEN as i32) {
            Ok(None)
        } else {
            Err(win32_error_with_context("OpenThreadToken", err))
        }
    }

    fn with_current_process() -> IoResult<Self> {
        let mut token: HANDLE = null_mut();
        let res = unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) };
        if res == 0 {
            Err(win32_error_with_context(
                "OpenProcessToken(GetCurrentProcess)",
                IoError::last_os_error(),
            ))
        } else {
            Ok(Self(token))
        }
    }

    /// Fetch a variable length token information class.  The storage is
    /// u64 so that the structure at its head is suitably aligned.
    fn information(&self, class: TOKEN_INFORMATION_CLASS, context: &str) -> IoResult<Vec<u64>> {
        let mut size: DWORD = 0;
        let err;

        unsafe {
            GetTokenInformation(self.0, class, null_mut(), 0, &mut size);
            err = GetLastError();
        };

        // The call should have failed and told us we need more space
        if err != ERROR_INSUFFICIENT_BUFFER {
            return Err(win32_error_with_context(
                context,
                IoError::from_raw_os_error(err as i32),
            ));
        }

        let mut data = vec![0u64; (size as usize + 7) / 8];
        let res = unsafe {
            GetTokenInformation(self.0, class, data.as_mut_ptr() as *mut _, size, &mut size)
        };
        if res == 0 {
            Err(win32_error_with_context(context, IoError::last_os_error()))
        } else {
            Ok(data)
        }
    }

    /// Resolve the token's user SID to `DOMAIN\name`
    fn account_name(&self) -> IoResult<String> {
        let data = self.information(TokenUser, "GetTokenInformation(TokenUser)")?;
        // This is safe because GetTokenInformation filled the buffer
        // with a TOKEN_USER followed by the SID it points to
        let sid = unsafe { (*(data.as_ptr() as *const TOKEN_USER)).User.Sid };

        let mut name_len: DWORD = 0;
        let mut domain_len: DWORD = 0;
        let mut sid_use: SID_NAME_USE = 0;
        let err;
        unsafe {
            LookupAccountSidW(
                null(),
                sid,
                null_mut(),
                &mut name_len,
                null_mut(),
                &mut domain_len,
                &mut sid_use,
            );
            err = GetLastError();
        }
        if err != ERROR_INSUFFICIENT_BUFFER {
            return Err(win32_error_with_context(
                "LookupAccountSidW",
                IoError::from_raw_os_error(err as i32),
            ));
        }

        let mut name = vec![0u16; name_len as usize];
        let mut domain = vec![0u16; domain_len as usize];
        let res = unsafe {
            LookupAccountSidW(
                null(),
                sid,
                name.as_mut_ptr(),
                &mut name_len,
                domain.as_mut_ptr(),
                &mut domain_len,
                &mut sid_use,
            )
        };
        if res == 0 {
            return Err(win32_error_with_context(
                "LookupAccountSidW",
                IoError::last_os_error(),
            ));
        }

        // On success the lengths no longer include the terminator
        Ok(format!(
            "{}\\{}",
            String::from_utf16_lossy(&domain[..domain_len as usize]),
            String::from_utf16_lossy(&name[..name_len as usize])
        ))
    }

    /// The LUID of the logon session that issued the token
    fn logon_id(&self) -> IoResult<u64> {
        let mut stats: TOKEN_STATISTICS = unsafe { std::mem::zeroed() };
        let mut size: DWORD = 0;
        let res = unsafe {
            GetTokenInformation(
                self.0,
                TokenStatistics,
                &mut stats as *mut TOKEN_STATISTICS as *mut _,
                std::mem::size_of_val(&stats) as u32,
                &mut size,
            )
        };
        if res == 0 {
            return Err(win32_error_with_context(
                "GetTokenInformation(TokenStatistics)",
                IoError::last_os_error(),
            ));
        }
        let luid = stats.AuthenticationId;
        Ok((u64::from(luid.HighPart as u32) << 32) | u64::from(luid.LowPart))
    }
}

/// The thread's impersonation token from before `bind`, if it had one
pub struct SavedThreadToken(Option<OwnedToken>);

/// Windows logon and thread impersonation.  Impersonation tokens are a
/// property of the thread, so nothing here is shared between threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsBackend;

impl Backend for WindowsBackend {
    type Token = OwnedToken;
    type SavedBinding = SavedThreadToken;

    fn logon(
        &self,
        credential: &Credential,
        class: LogonClass,
    ) -> Result<OwnedToken, AuthenticationError> {
        let username = os_str_to_null_terminated_vec(OsStr::new(credential.username()));
        let domain = os_str_to_null_terminated_vec(OsStr::new(credential.domain()));
        let mut secret =
            os_str_to_null_terminated_vec(OsStr::new(credential.secret().expose_secret()));
        let (logon_type, provider) = logon_parameters(class);

        let mut token: HANDLE = null_mut();
        let res = unsafe {
            LogonUserW(
                username.as_ptr(),
                domain.as_ptr(),
                secret.as_ptr(),
                logon_type,
                provider,
                &mut token,
            )
        };
        let err = IoError::last_os_error();
        secret.zeroize();

        if res == 0 {
            Err(AuthenticationError::new(
                err.raw_os_error().unwrap_or_default() as u32,
                err.to_string(),
            ))
        } else {
            Ok(OwnedToken(token))
        }
    }

    fn close(&self, token: OwnedToken) -> IoResult<()> {
        token.close()
    }

    fn bind(&self, token: &OwnedToken) -> IoResult<SavedThreadToken> {
        let previous = OwnedToken::with_current_thread()?;
        let res = unsafe { ImpersonateLoggedOnUser(token.as_handle()) };
        if res == 0 {
            // `previous` is closed on the way out; the thread is unchanged
            Err(win32_error_with_context(
                "ImpersonateLoggedOnUser",
                IoError::last_os_error(),
            ))
        } else {
            Ok(SavedThreadToken(previous))
        }
    }

    fn restore(&self, saved: SavedThreadToken) -> IoResult<()> {
        match saved.0 {
            Some(previous) => {
                let res = unsafe { SetThreadToken(null_mut(), previous.as_handle()) };
                if res == 0 {
                    let err = IoError::last_os_error();
                    drop(previous);
                    Err(win32_error_with_context("SetThreadToken", err))
                } else {
                    Ok(())
                }
            }
            None => {
                if unsafe { RevertToSelf() } == 0 {
                    Err(win32_error_with_context(
                        "RevertToSelf",
                        IoError::last_os_error(),
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn current_identity(&self) -> IoResult<IdentityContext> {
        let (token, impersonating) = match OwnedToken::with_current_thread()? {
            Some(token) => (token, true),
            None => (OwnedToken::with_current_process()?, false),
        };
        Ok(IdentityContext::new(
            token.account_name()?,
            token.logon_id()?,
            impersonating,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, IdentitySwitch};

    #[test]
    fn process_identity_is_not_impersonating() {
        let id = WindowsBackend.current_identity().unwrap();
        assert!(!id.is_impersonating());
        assert!(id.name().contains('\\'), "{:?}", id);
    }

    #[test]
    fn new_credentials_keep_the_local_account() {
        // Windows does not check a new-credentials logon until the
        // credential is used on the network, so any account will do
        let switch = IdentitySwitch::new();
        let before = switch.current_identity().unwrap();
        let cred = Credential::new("nobody", "EXAMPLE", "not-a-password").unwrap();

        let during = switch.run(cred, |id| id.clone()).unwrap();

        assert_eq!(during.name(), before.name());
        assert_ne!(during.logon_id(), before.logon_id());
        assert!(during.is_impersonating());
        assert_eq!(during.principal(), Some("EXAMPLE\\nobody"));
        assert_eq!(switch.current_identity().unwrap(), before);
    }

    #[test]
    fn interactive_logon_rejects_a_bad_password() {
        let switch = IdentitySwitch::new().with_logon_class(LogonClass::Interactive);
        let cred = Credential::local("no-such-user-here", "not-a-password").unwrap();
        let mut called = false;

        match switch.run(cred, |_| called = true) {
            Err(Error::Authentication(err)) => assert_ne!(err.code(), 0),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!called);
    }
}
