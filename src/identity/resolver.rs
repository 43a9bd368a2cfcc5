use std::ffi::CString;
use std::{io, mem, ptr};

use crate::error::IdentityError;

const MAX_BUFFER: usize = 1 << 20;

/// An OS user the child process runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

/// Only a root caller can switch the child to another user.
pub fn is_privileged() -> bool {
    unsafe { libc::geteuid() == 0 }
}

pub fn lookup(name: &str) -> Result<Identity, IdentityError> {
    let c_name = CString::new(name).map_err(|_| IdentityError::InvalidName)?;
    let mut buf_len = match unsafe { libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX) } {
        n if n > 0 => n as usize,
        _ => 1024,
    };

    loop {
        let mut buf: Vec<libc::c_char> = vec![0; buf_len];
        let mut pwd: libc::passwd = unsafe { mem::zeroed() };
        let mut result: *mut libc::passwd = ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                c_name.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE && buf_len < MAX_BUFFER {
            buf_len *= 2;
            continue;
        }
        if rc != 0 {
            return Err(IdentityError::Lookup(io::Error::from_raw_os_error(rc)));
        }
        if result.is_null() {
            return Err(IdentityError::UnknownUser(name.to_string()));
        }
        return Ok(Identity {
            name: name.to_string(),
            uid: pwd.pw_uid,
            gid: pwd.pw_gid,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_root() {
        let root = lookup("root").unwrap();
        assert_eq!(root.uid, 0);
        assert_eq!(root.gid, 0);
    }

    #[test]
    fn unknown_user_is_reported_by_name() {
        match lookup("no-such-user-for-shell-tunnel") {
            Err(IdentityError::UnknownUser(name)) => {
                assert_eq!(name, "no-such-user-for-shell-tunnel")
            }
            other => panic!("unexpected lookup result: {:?}", other),
        }
    }

    #[test]
    fn nul_in_name_is_rejected() {
        assert!(matches!(lookup("ro\0ot"), Err(IdentityError::InvalidName)));
    }
}
