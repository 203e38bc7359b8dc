//! Format backend adapters.
//!
//! Each adapter wraps one native library behind the same small contract:
//! open, root entry, list children, read bytes and, for the classic format
//! only, the mutating calls. [`Session`] is the closed set of adapters a
//! volume can hold.

pub mod classic;
pub mod plus;

use std::io::Write;

use crate::entry::{EntryRecord, Locator};
use crate::error::{VolumeError, VolumeResult};

use self::classic::ClassicSession;
use self::plus::PlusSession;

pub(crate) enum Session {
    Classic(ClassicSession),
    Plus(PlusSession),
}

impl Session {
    pub(crate) fn backend_name(&self) -> &'static str {
        match self {
            Session::Classic(_) => "HFS",
            Session::Plus(_) => "HFS+",
        }
    }

    pub(crate) fn list_children(&self, dir: &Locator) -> VolumeResult<Vec<EntryRecord>> {
        match (self, dir) {
            (Session::Classic(s), Locator::Classic { path }) => s.list_children(path),
            (Session::Plus(s), Locator::Plus(handle)) => s.list_children(handle),
            _ => Err(mismatch("list_children")),
        }
    }

    pub(crate) fn read_bytes(&self, entry: &Locator, max: usize) -> VolumeResult<Vec<u8>> {
        match (self, entry) {
            (Session::Classic(s), Locator::Classic { path }) => s.read_bytes(path, max),
            (Session::Plus(s), Locator::Plus(handle)) => s.read_bytes(handle, max),
            _ => Err(mismatch("read_bytes")),
        }
    }

    pub(crate) fn copy_out(&self, entry: &Locator, out: &mut dyn Write) -> VolumeResult<u64> {
        match (self, entry) {
            (Session::Classic(s), Locator::Classic { path }) => s.copy_out(path, out),
            (Session::Plus(s), Locator::Plus(handle)) => s.copy_out(handle, out),
            _ => Err(mismatch("copy_out")),
        }
    }

    pub(crate) fn lookup(&self, path: &str) -> VolumeResult<EntryRecord> {
        match self {
            Session::Classic(s) => s.stat(path),
            Session::Plus(s) => s.lookup(path),
        }
    }

    /// The classic session, or the error a mutating call gets on HFS+.
    pub(crate) fn writable_classic(&self, operation: &'static str) -> VolumeResult<&ClassicSession> {
        match self {
            Session::Classic(s) if s.is_writable() => Ok(s),
            Session::Classic(_) => Err(VolumeError::ReadOnly),
            Session::Plus(_) => Err(VolumeError::Unsupported {
                operation,
                backend: "HFS+",
            }),
        }
    }
}

fn mismatch(operation: &'static str) -> VolumeError {
    VolumeError::Operation {
        operation,
        reason: "entry locator does not match the volume backend".to_string(),
    }
}
