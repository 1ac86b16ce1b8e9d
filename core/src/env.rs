//! Owned environment arrays for helper processes
//!
//! [`Env`] holds a deep copy of `KEY=VALUE` entries and keeps a parallel,
//! always null-terminated array of C string pointers so the whole set can be
//! handed to a spawn routine expecting an `envp` vector.
//!
//! ## Error Handling
//!
//! Construction and [`Env::append`] never panic or return `Err`. Failures are
//! recorded as a sticky errno queried through [`Env::error`]:
//!
//! - `ENOMEM` when growing the backing storage fails
//! - `EINVAL` when an entry contains an interior NUL byte
//!
//! A failed construction releases everything copied so far and leaves an
//! empty, still null-terminated array behind.

// Dereferencing caller-supplied envp arrays requires unsafe code
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use std::ffi::{CStr, CString, OsStr};
use std::fmt;
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::ptr;
use tracing::{debug, warn};

/// A deep-copied, null-terminated `KEY=VALUE` array
pub struct Env {
    /// Owned entries, in insertion order
    vars: Vec<CString>,
    /// Pointers into `vars`, followed by a single null pointer
    ptrs: Vec<*const c_char>,
    /// Last recorded errno, 0 if none
    errno: i32,
}

impl Env {
    /// Create an empty environment
    pub fn empty() -> Self {
        Self {
            vars: Vec::new(),
            ptrs: vec![ptr::null()],
            errno: 0,
        }
    }

    /// Deep-copy every entry of `existing`
    ///
    /// On failure the partially copied contents are released and the error
    /// is available through [`Env::error`].
    ///
    /// ## Example
    ///
    /// ```rust
    /// use wsrep_glue_core::env::Env;
    ///
    /// let mut env = Env::new(["PATH=/usr/bin:/bin"]);
    /// assert_eq!(env.append("WSREP_SST_OPT_ROLE=donor"), 0);
    /// assert_eq!(env.len(), 2);
    /// ```
    pub fn new<I, S>(existing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut env = Self::empty();
        let copied: Result<()> = existing
            .into_iter()
            .try_for_each(|var| env.push_bytes(var.as_ref()));
        if let Err(e) = copied {
            env.fail_construction(e);
        }
        env
    }

    /// Deep-copy the calling process's environment
    pub fn from_process() -> Self {
        Self::new(std::env::vars_os().map(|(key, value)| {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            entry
        }))
    }

    /// Deep-copy a null-terminated `envp`-style array
    ///
    /// A null `envp` yields an empty environment.
    ///
    /// # Safety
    ///
    /// `envp` must be null or point to an array of pointers to valid
    /// NUL-terminated strings, terminated by a null pointer, that stays valid
    /// for the duration of the call.
    pub unsafe fn from_raw(envp: *const *const c_char) -> Self {
        let mut env = Self::empty();
        if envp.is_null() {
            return env;
        }

        let mut cursor = envp;
        // Safety: the caller guarantees a null-terminated array of C strings
        unsafe {
            while !(*cursor).is_null() {
                if let Err(e) = env.push_bytes(CStr::from_ptr(*cursor).to_bytes()) {
                    env.fail_construction(e);
                    break;
                }
                cursor = cursor.add(1);
            }
        }
        env
    }

    /// Append one `KEY=VALUE` entry
    ///
    /// Returns 0 on success or the errno on failure. A failed append leaves
    /// the prior contents intact and records the error.
    pub fn append(&mut self, var: impl AsRef<[u8]>) -> i32 {
        match self.push_bytes(var.as_ref()) {
            Ok(()) => 0,
            Err(e) => {
                warn!("Failed to append environment variable: {}", e);
                self.errno = e.errno();
                self.errno
            }
        }
    }

    /// The last sticky error, 0 if none occurred
    pub fn error(&self) -> i32 {
        self.errno
    }

    /// Null-terminated array view for handoff to a spawn routine
    ///
    /// The pointer is valid for as long as `self` is neither dropped nor
    /// appended to.
    pub fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }

    /// Number of entries, not counting the terminating null
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over the raw entries in order
    pub fn iter(&self) -> impl Iterator<Item = &CStr> + '_ {
        self.vars.iter().map(CString::as_c_str)
    }

    /// Iterate over entries split at the first `=`
    ///
    /// Entries without a `=` or with an empty key are skipped since they
    /// cannot be expressed as a variable assignment.
    pub fn vars(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> + '_ {
        self.vars.iter().filter_map(|var| {
            let bytes = var.as_bytes();
            match bytes.iter().position(|&b| b == b'=') {
                Some(eq) if eq > 0 => Some((
                    OsStr::from_bytes(&bytes[..eq]),
                    OsStr::from_bytes(&bytes[eq + 1..]),
                )),
                _ => {
                    debug!("Skipping malformed environment entry {:?}", var);
                    None
                }
            }
        })
    }

    fn push_bytes(&mut self, var: &[u8]) -> Result<()> {
        self.vars.try_reserve(1)?;
        self.ptrs.try_reserve(1)?;

        let mut buf = Vec::new();
        buf.try_reserve_exact(var.len() + 1)?;
        buf.extend_from_slice(var);
        let entry = CString::new(buf).map_err(|e| {
            CoreError::ValidationError(format!(
                "environment entry contains a NUL byte at offset {}",
                e.nul_position()
            ))
        })?;

        // The string's heap buffer does not move when `vars` grows
        let last = self.ptrs.len() - 1;
        self.ptrs[last] = entry.as_ptr();
        self.ptrs.push(ptr::null());
        self.vars.push(entry);
        Ok(())
    }

    fn fail_construction(&mut self, e: CoreError) {
        warn!("Failed to copy environment: {}", e);
        self.vars = Vec::new();
        self.ptrs = vec![ptr::null()];
        self.errno = e.errno();
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::empty()
    }
}

impl Clone for Env {
    fn clone(&self) -> Self {
        let mut copy = Self::new(self.vars.iter().map(|v| v.as_bytes()));
        if copy.errno == 0 {
            copy.errno = self.errno;
        }
        copy
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("vars", &self.vars)
            .field("errno", &self.errno)
            .finish()
    }
}
