use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};

use crate::core::chain::ExecutionContext;
use crate::core::error::ChainError;

/// An anonymous private mapping used as a cloned child's initial stack.
///
/// The child gets a copy-on-write view of it (no `CLONE_VM`), so the parent
/// may unmap it as soon as the child has been reaped.
#[derive(Debug)]
pub struct ChildStack {
    mapping: Option<(NonNull<c_void>, NonZeroUsize)>,
}

impl ChildStack {
    pub fn allocate(size: usize) -> Result<Self, ChainError> {
        let len = NonZeroUsize::new(size).ok_or(ChainError::Allocate {
            size,
            source: nix::errno::Errno::EINVAL,
        })?;

        // SAFETY: a fresh anonymous mapping at a kernel-chosen address does
        // not alias any existing memory.
        let ptr = unsafe {
            mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_STACK,
            )
        }
        .map_err(|source| ChainError::Allocate { size, source })?;

        tracing::trace!(size, addr = ?ptr, "mapped child stack");
        Ok(Self {
            mapping: Some((ptr, len)),
        })
    }

    /// The whole mapping. `clone` starts the child at its top end.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.mapping {
            // SAFETY: the mapping is readable, writable and `len` bytes long
            // for as long as `self` holds it, and `&mut self` makes this the
            // only borrow.
            Some((ptr, len)) => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr().cast::<u8>(), len.get())
            },
            None => &mut [],
        }
    }

    fn unmap(&mut self) -> Result<(), ChainError> {
        let Some((ptr, len)) = self.mapping.take() else {
            return Ok(());
        };
        // SAFETY: `ptr`/`len` came from our own mmap and are unmapped once;
        // no slice from `as_mut_slice` outlives `&mut self`.
        unsafe { munmap(ptr, len.get()) }.map_err(|source| ChainError::Release { source })?;
        tracing::trace!(size = len.get(), "unmapped child stack");
        Ok(())
    }
}

impl ExecutionContext for ChildStack {
    fn release(mut self) -> Result<(), ChainError> {
        self.unmap()
    }
}

impl Drop for ChildStack {
    fn drop(&mut self) {
        if let Err(e) = self.unmap() {
            tracing::warn!(error = %e, "failed to unmap child stack");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_writable_memory() {
        let mut stack = ChildStack::allocate(64 * 1024).unwrap();
        let slice = stack.as_mut_slice();
        assert_eq!(slice.len(), 64 * 1024);

        slice[0] = 0xAA;
        let last = slice.len() - 1;
        slice[last] = 0x55;
        assert_eq!(slice[0], 0xAA);
        assert_eq!(slice[last], 0x55);

        stack.release().unwrap();
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = ChildStack::allocate(0).unwrap_err();
        assert!(matches!(err, ChainError::Allocate { size: 0, .. }));
    }

    #[test]
    fn drop_without_release_unmaps() {
        let stack = ChildStack::allocate(128 * 1024).unwrap();
        drop(stack);
    }
}
