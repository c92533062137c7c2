//! Resolves the three judge principal usernames (compiler, user-code, SPJ) to uid/gid pairs
//! through the passwd database, once at startup.

use std::ffi::CString;

use crate::{Error, ErrorKind, Result};

/// Look up `username` in the system passwd database and return its `(uid, gid)`.
pub fn resolve_user(username: &str) -> Result<(u32, u32)> {
    let native_name = CString::new(username)
        .map_err(|_| Error::from(ErrorKind::UnknownPrincipal(username.to_owned())))?;

    // `getpwnam` is not thread-safe (it returns a pointer into a static buffer), but principal
    // resolution only ever runs once, serially, during startup before any worker thread exists.
    let passwd = unsafe { libc::getpwnam(native_name.as_ptr()) };
    if passwd.is_null() {
        return Err(Error::from(ErrorKind::UnknownPrincipal(username.to_owned())));
    }

    let entry = unsafe { *passwd };
    Ok((entry.pw_uid, entry.pw_gid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_root_is_uid_gid_zero() {
        let (uid, gid) = resolve_user("root").unwrap();
        assert_eq!(0, uid);
        assert_eq!(0, gid);
    }

    #[test]
    fn test_resolve_unknown_user_fails() {
        assert!(resolve_user("no-such-wavejudge-principal-user").is_err());
    }
}
