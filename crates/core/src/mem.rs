//! Allocation policy for the refcounted containers.
//!
//! Small buffers snap to 64 bytes, mid-size buffers double, large buffers
//! grow by half. Precise (non-growing) capacity is used when the final size
//! is known at allocation time.

use crate::error::RuntimeError;

/// Largest representable container size, in bytes.
pub const MEM_MAX: usize = isize::MAX as usize;

const SNAP: usize = 64;
const DOUBLING_LIMIT: usize = 1024;

/// Capacity to reserve for a buffer that has just grown to `new_size`.
pub fn grow_capacity(new_size: usize) -> usize {
    if new_size <= SNAP {
        SNAP
    } else if new_size < DOUBLING_LIMIT {
        new_size * 2
    } else {
        new_size + new_size / 2
    }
}

/// Validate a requested size before reallocating.
pub fn check_size(new_size: usize) -> Result<(), RuntimeError> {
    if new_size == 0 || new_size > MEM_MAX {
        Err(RuntimeError::Overflow)
    } else {
        Ok(())
    }
}

/// A shrinking buffer reallocates precisely when it drops below half its
/// capacity and the capacity is above the snap size.
pub fn should_shrink(new_size: usize, capacity: usize) -> bool {
    capacity > SNAP && new_size < capacity / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_to_64() {
        assert_eq!(grow_capacity(1), 64);
        assert_eq!(grow_capacity(63), 64);
        assert_eq!(grow_capacity(64), 64);
    }

    #[test]
    fn test_doubling_region() {
        assert_eq!(grow_capacity(65), 130);
        assert_eq!(grow_capacity(1000), 2000);
    }

    #[test]
    fn test_half_growth_region() {
        assert_eq!(grow_capacity(1024), 1024 + 512);
        assert_eq!(grow_capacity(3000), 4500);
    }

    #[test]
    fn test_check_size_rejects_zero() {
        assert!(check_size(0).is_err());
        assert!(check_size(1).is_ok());
    }
}
