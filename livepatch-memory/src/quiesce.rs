//! The single-thread precondition for patching.
//!
//! Rewriting a function entry while another thread executes it, or migrating
//! a global while another thread reads it, is undefined. [`Quiesced`] is the
//! proof the applier demands that this cannot happen: either the process was
//! observed to run a single thread, or the caller vouches for having paused
//! every other thread itself.

use crate::error::QuiesceError;

/// Token proving no other thread can observe the image while it is patched.
#[derive(Debug)]
pub struct Quiesced {
    _private: (),
}

impl Quiesced {
    /// Succeed only if the calling thread is the only thread in the process.
    pub fn check() -> Result<Self, QuiesceError> {
        Self::check_allowing(0)
    }

    /// Like [`Quiesced::check`], but tolerate `helpers` extra threads that
    /// the caller owns and knows never run patched code (e.g. a file-watch
    /// event loop).
    pub fn check_allowing(helpers: usize) -> Result<Self, QuiesceError> {
        let count = thread_count()?;
        if count != 1 + helpers {
            return Err(QuiesceError::OtherThreads { count });
        }
        Ok(Self { _private: () })
    }

    /// Skip the check.
    ///
    /// # Safety
    /// Every other thread must be paused, or provably outside any code and
    /// data the table touches, until the token is dropped.
    pub unsafe fn assume() -> Self {
        Self { _private: () }
    }
}

/// Number of threads in the current process.
#[cfg(target_os = "linux")]
pub fn thread_count() -> Result<usize, QuiesceError> {
    let entries = std::fs::read_dir("/proc/self/task").map_err(QuiesceError::Inspect)?;
    let mut count = 0;
    for entry in entries {
        entry.map_err(QuiesceError::Inspect)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(not(target_os = "linux"))]
pub fn thread_count() -> Result<usize, QuiesceError> {
    Err(QuiesceError::Unsupported)
}
