//! Shared memory budget.
//!
//! All runners of one service draw their heap usage (message buffers plus a
//! fixed per-runner identity allocation) from a single signed counter.
//! Admission is all-or-nothing: [`MemoryBudget::reserve`] either takes the
//! whole amount or leaves the counter untouched. A [`Reservation`] gives its
//! bytes back when dropped, so retiring a runner releases its memory.
use crate::error::BudgetError;
use alloc::sync::Arc;
use core::cell::Cell;
use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};

//==================================================================================MEMORY_BUDGET
/// Bounded counter guarded by a critical section.
pub struct MemoryBudget {
    remaining: Mutex<CriticalSectionRawMutex, Cell<i64>>,
}

impl MemoryBudget {
    /// Create a budget holding `bytes`.
    pub const fn new(bytes: i64) -> Self {
        Self {
            remaining: Mutex::new(Cell::new(bytes)),
        }
    }

    /// Current remaining amount.
    pub fn get(&self) -> i64 {
        self.remaining.lock(|cell| cell.get())
    }

    /// Overwrite the remaining amount.
    pub fn set(&self, bytes: i64) {
        self.remaining.lock(|cell| cell.set(bytes));
    }

    /// Add `bytes` and return the new value.
    pub fn add(&self, bytes: i64) -> i64 {
        self.remaining.lock(|cell| {
            let value = cell.get().saturating_add(bytes);
            cell.set(value);
            value
        })
    }

    /// Subtract `bytes` unconditionally and return the new value.
    pub fn sub(&self, bytes: i64) -> i64 {
        self.remaining.lock(|cell| {
            let value = cell.get().saturating_sub(bytes);
            cell.set(value);
            value
        })
    }

    /// Subtract `bytes` only if the result does not go negative.
    pub fn sub_if_available(&self, bytes: i64) -> Result<i64, BudgetError> {
        self.remaining.lock(|cell| {
            let available = cell.get();
            match available.checked_sub(bytes) {
                Some(value) if value >= 0 => {
                    cell.set(value);
                    Ok(value)
                }
                _ => Err(BudgetError::Exhausted {
                    requested: usize::try_from(bytes).unwrap_or(usize::MAX),
                    available,
                }),
            }
        })
    }

    /// Reserve `bytes`, returned to the budget when the [`Reservation`] drops.
    pub fn reserve(self: &Arc<Self>, bytes: usize) -> Result<Reservation, BudgetError> {
        let amount = i64::try_from(bytes).map_err(|_| BudgetError::Exhausted {
            requested: bytes,
            available: self.get(),
        })?;
        self.sub_if_available(amount)?;
        Ok(Reservation {
            budget: Arc::clone(self),
            bytes,
        })
    }
}

impl core::fmt::Debug for MemoryBudget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryBudget")
            .field("remaining", &self.get())
            .finish()
    }
}

//==================================================================================RESERVATION
/// Bytes held from a [`MemoryBudget`]; released on drop.
#[derive(Debug)]
pub struct Reservation {
    budget: Arc<MemoryBudget>,
    bytes: usize,
}

impl Reservation {
    /// Amount held.
    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        // `bytes` came from an `i64` in `reserve`.
        self.budget.add(self.bytes as i64);
    }
}
