use crate::net::tcp::context::Context;

/// Fixed pool of `N` connection contexts.
///
/// A slot is free, allocated and locked (being set up or torn down, the
/// other execution context must leave it alone) or allocated and unlocked.
pub(super) struct SlotTable<const N: usize> {
    slots: [Option<Context>; N],
    locks: [bool; N],
}

impl<const N: usize> SlotTable<N> {
    pub(super) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            locks: [false; N],
        }
    }

    pub(super) fn capacity(&self) -> usize {
        N
    }

    pub(super) fn free_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    /// Stores `ctx` in the first free slot and returns its index.
    ///
    /// The slot comes back locked; unlock it once it is ready.
    pub(super) fn alloc(&mut self, ctx: Context) -> Option<usize> {
        let idx = self.slots.iter().position(|slot| slot.is_none())?;
        self.slots[idx] = Some(ctx);
        self.locks[idx] = true;
        Some(idx)
    }

    pub(super) fn is_alloc(&self, idx: usize) -> bool {
        self.slots.get(idx).is_some_and(|slot| slot.is_some())
    }

    pub(super) fn is_lock(&self, idx: usize) -> bool {
        self.locks.get(idx).copied().unwrap_or(false)
    }

    pub(super) fn lock(&mut self, idx: usize) {
        if let Some(lock) = self.locks.get_mut(idx) {
            *lock = true;
        }
    }

    pub(super) fn unlock(&mut self, idx: usize) {
        if let Some(lock) = self.locks.get_mut(idx) {
            *lock = false;
        }
    }

    /// Frees the slot together with any bytes still buffered in it.
    pub(super) fn erase(&mut self, idx: usize) {
        if idx < N {
            self.slots[idx] = None;
            self.locks[idx] = false;
        }
    }

    pub(super) fn get(&self, idx: usize) -> Option<&Context> {
        self.slots.get(idx)?.as_ref()
    }

    pub(super) fn get_mut(&mut self, idx: usize) -> Option<&mut Context> {
        self.slots.get_mut(idx)?.as_mut()
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = &Context> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tcp::config::TcpConfig;
    use std::net::Ipv4Addr;

    fn context(port: u16) -> Context {
        Context::new(Ipv4Addr::UNSPECIFIED, port, true, &TcpConfig::default())
    }

    #[test]
    fn test_alloc_until_full() {
        let mut slots = SlotTable::<2>::new();
        assert_eq!(slots.capacity(), 2);
        assert_eq!(slots.alloc(context(1)), Some(0));
        assert_eq!(slots.alloc(context(2)), Some(1));
        assert_eq!(slots.alloc(context(3)), None);
        assert_eq!(slots.free_count(), 0);
    }

    #[test]
    fn test_alloc_returns_locked_slot() {
        let mut slots = SlotTable::<4>::new();
        let idx = slots.alloc(context(80)).unwrap();
        assert!(slots.is_alloc(idx));
        assert!(slots.is_lock(idx));

        slots.unlock(idx);
        assert!(!slots.is_lock(idx));
        slots.lock(idx);
        assert!(slots.is_lock(idx));
    }

    #[test]
    fn test_erase_reuses_slot() {
        let mut slots = SlotTable::<2>::new();
        let a = slots.alloc(context(1)).unwrap();
        let b = slots.alloc(context(2)).unwrap();
        slots.get_mut(a).unwrap().send.put(b"pending");

        slots.erase(a);
        assert!(!slots.is_alloc(a));
        assert!(!slots.is_lock(a));
        assert_eq!(slots.free_count(), 1);
        assert_eq!(slots.iter().count(), 1);

        let c = slots.alloc(context(3)).unwrap();
        assert_eq!(c, a);
        assert!(slots.get(c).unwrap().send.is_empty());
        assert_eq!(slots.get(b).unwrap().local_port, 2);
    }

    #[test]
    fn test_out_of_range() {
        let mut slots = SlotTable::<1>::new();
        assert!(!slots.is_alloc(5));
        assert!(!slots.is_lock(5));
        assert!(slots.get(5).is_none());
        slots.lock(5);
        slots.erase(5);
    }
}
