use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

/// The `{next, current, old}` atomic-pointer handoff that recurs, per the
/// engine's design notes, in every place a control thread hands an
/// immutable-per-version value to the realtime thread without locking:
/// Programs, per-processor state blobs, and the out-message queue.
///
/// - `publish` (control thread) stages a new value into `next`.
/// - `acquire` (RT thread) promotes `next` into `current` exactly when `old`
///   is empty, demoting the displaced `current` into `old`.
/// - `take_old` (control/pump thread) reclaims the displaced value for
///   teardown once it is no longer reachable from the RT thread.
///
/// At most one value occupies each slot at any instant; this mirrors the
/// invariant the engine's out-message queue relies on.
pub struct TripleBuffer<T> {
    next: ArcSwapOption<T>,
    current: ArcSwapOption<T>,
    old: ArcSwapOption<T>,
}

impl<T> Default for TripleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TripleBuffer<T> {
    pub fn new() -> Self {
        TripleBuffer {
            next: ArcSwapOption::from(None),
            current: ArcSwapOption::from(None),
            old: ArcSwapOption::from(None),
        }
    }

    pub fn with_current(value: Arc<T>) -> Self {
        let buffer = Self::new();
        buffer.current.store(Some(value));
        buffer
    }

    /// Stages `value` into `next`, returning whatever was previously there
    /// (a value the RT thread never picked up) so the caller can tear it
    /// down on the control thread.
    pub fn publish(&self, value: Arc<T>) -> Option<Arc<T>> {
        self.next.swap(Some(value))
    }

    /// Promotes `next -> current` (demoting `current -> old`) when `old` is
    /// empty, then returns whatever `current` holds. A no-op, besides the
    /// read, when `next` is empty or `old` is still occupied.
    pub fn acquire(&self) -> Option<Arc<T>> {
        if self.old.load().is_none() {
            if let Some(incoming) = self.next.swap(None) {
                let displaced = self.current.swap(Some(incoming));
                if let Some(displaced) = displaced {
                    let prev_old = self.old.swap(Some(displaced));
                    debug_assert!(
                        prev_old.is_none(),
                        "triple buffer old slot overwritten while still occupied"
                    );
                }
            }
        }
        self.current.load_full()
    }

    pub fn current(&self) -> Option<Arc<T>> {
        self.current.load_full()
    }

    /// Reclaims and clears the `old` slot.
    pub fn take_old(&self) -> Option<Arc<T>> {
        self.old.swap(None)
    }

    /// Reads the `old` slot without reclaiming it.
    pub fn peek_old(&self) -> Option<Arc<T>> {
        self.old.load_full()
    }

    /// Forcibly empties all three slots, returning them so the caller can
    /// run teardown on whichever were occupied.
    pub fn clear_all(&self) -> [Option<Arc<T>>; 3] {
        [
            self.next.swap(None),
            self.current.swap(None),
            self.old.swap(None),
        ]
    }
}

/// Sibling to [`TripleBuffer`] for values mutated in place while they sit in
/// `current` rather than read through a shared `Arc`: the active `Program`
/// (its buffers are written every block) and the out-message `MessageQueue`
/// (pushed into throughout a block, then handed whole to the notification
/// pump). Ownership moves between slots instead of being cloned, so whoever
/// holds `current` gets an exclusive `&mut T` for as long as they need it.
///
/// Same three-slot vocabulary as [`TripleBuffer`] (`publish`/`acquire`/
/// `take_old`), but backed by `Mutex<Option<T>>` rather than
/// `ArcSwapOption<T>` since the value itself, not just its replacement, needs
/// exclusive access.
pub struct SwapSlots<T> {
    next: Mutex<Option<T>>,
    current: Mutex<Option<T>>,
    old: Mutex<Option<T>>,
}

impl<T> Default for SwapSlots<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SwapSlots<T> {
    pub fn new() -> Self {
        SwapSlots {
            next: Mutex::new(None),
            current: Mutex::new(None),
            old: Mutex::new(None),
        }
    }

    pub fn with_current(value: T) -> Self {
        let slots = Self::new();
        *slots.current.lock() = Some(value);
        slots
    }

    /// Stages `value` into `next`, returning whatever was previously there.
    pub fn publish(&self, value: T) -> Option<T> {
        self.next.lock().replace(value)
    }

    /// Promotes `next -> current` (demoting the displaced `current -> old`)
    /// when `old` is empty. Returns whether `current` is occupied afterward.
    /// A no-op, besides the read, when `next` is empty or `old` is still
    /// occupied -- the caller just keeps working with whatever `current`
    /// already holds.
    pub fn acquire(&self) -> bool {
        let mut old = self.old.lock();
        if old.is_none() {
            let mut next = self.next.lock();
            if let Some(incoming) = next.take() {
                drop(next);
                let mut current = self.current.lock();
                let displaced = current.replace(incoming);
                *old = displaced;
            }
        }
        drop(old);
        self.current.lock().is_some()
    }

    /// Takes `current` out entirely, leaving the slot empty.
    pub fn take_current(&self) -> Option<T> {
        self.current.lock().take()
    }

    /// Sets `current` directly, without going through `acquire`'s promotion.
    /// Used to hand a filled value back after taking it out for exclusive,
    /// lock-free use across a whole block.
    pub fn put_current(&self, value: T) {
        *self.current.lock() = Some(value);
    }

    /// Runs `f` against `current` in place, if occupied.
    pub fn with_current_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.current.lock().as_mut().map(f)
    }

    /// Reclaims and clears the `old` slot.
    pub fn take_old(&self) -> Option<T> {
        self.old.lock().take()
    }

    /// Forcibly empties all three slots, returning them so the caller can run
    /// teardown on whichever were occupied.
    pub fn clear_all(&self) -> [Option<T>; 3] {
        [
            self.next.lock().take(),
            self.current.lock().take(),
            self.old.lock().take(),
        ]
    }
}
