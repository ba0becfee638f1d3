//! Fixed-capacity fiber pool and the yield protocol between its fibers.

use super::bitset::SlotBitset;
use super::context::{switch_out, FiberContext, Suspender, Transfer};
use super::handle::{FiberHandle, FiberId, FiberState, WakeAction, YieldMode};
use crate::config::Config;
use crate::error::Result;
use crate::util::{CachePadded, SpinLock};
use parking_lot::Mutex;
use std::cell::{Cell, UnsafeCell};
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

static POOL_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

const CANARY: u32 = 0xF1BE_C0DE;

/// Body every fiber runs, called again each time it returns.
pub type EntryFn = dyn Fn(&CurrentFiber<'_>) + Send + Sync + 'static;

/// Pointer handed to a fiber on resume so its body can reach the pool.
#[derive(Clone, Copy)]
struct PoolRef(NonNull<FiberPool>);

struct FiberSlot {
    context: UnsafeCell<FiberContext<PoolRef>>,
    suspender: Cell<*const Suspender<PoolRef>>,
    wake: Mutex<WakeAction>,
    canary: u32,
}

struct SlotBits {
    available: SlotBitset,
    hibernated: SlotBitset,
}

/// A fixed set of stackful fibers shared by a group of worker threads.
///
/// All stacks are reserved by [`FiberPool::new`]; afterwards fibers are only
/// recycled. Each worker thread enters the pool through
/// [`start_thread`](FiberPool::start_thread) and from then on runs whichever
/// fiber the previous one yielded to.
pub struct FiberPool {
    // Dropped first: unwinding a suspended fiber may still reach `entry`.
    slots: Box<[CachePadded<FiberSlot>]>,
    bits: SpinLock<SlotBits>,
    entry: Box<EntryFn>,
    id: u32,
    capacity: usize,
    stack_size: usize,
}

// SAFETY: a slot's context is only touched by the dispatcher that currently
// owns the fiber (see `start_thread`), its suspender only by the fiber itself,
// and everything else is behind `bits` or the slot's `wake` lock. Fibers may
// resume on a different OS thread than the one they suspended on; the pool
// reads thread-local state only through the non-inlined accessors below.
unsafe impl Send for FiberPool {}
unsafe impl Sync for FiberPool {}

impl FiberPool {
    /// Builds a pool of `config.fiber_capacity` fibers with
    /// `config.fiber_stack_size` bytes of stack each.
    ///
    /// `entry` is the work loop: a fiber calls it forever, so it should pull
    /// one unit of work (or yield) and return.
    pub fn new<F>(config: &Config, entry: F) -> Result<Arc<FiberPool>>
    where
        F: Fn(&CurrentFiber<'_>) + Send + Sync + 'static,
    {
        config.validate()?;

        let capacity = config.fiber_capacity;
        let stack_size = config.fiber_stack_size;

        let mut slots = Vec::with_capacity(capacity);
        for index in 0..capacity as u32 {
            let context = FiberContext::new(stack_size, move |suspender, pool: PoolRef| {
                // SAFETY: fibers only run inside `start_thread`, which borrows
                // the pool for as long as any of its fibers execute.
                let pool = unsafe { pool.0.as_ref() };
                fiber_main(pool, index, suspender)
            })?;

            slots.push(CachePadded::new(FiberSlot {
                context: UnsafeCell::new(context),
                suspender: Cell::new(ptr::null()),
                wake: Mutex::new(WakeAction::None),
                canary: CANARY ^ index,
            }));
        }

        let id = POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        debug!(pool = id, capacity, stack_size, "fiber pool created");

        Ok(Arc::new(FiberPool {
            slots: slots.into_boxed_slice(),
            bits: SpinLock::new(SlotBits {
                available: SlotBitset::full(capacity),
                hibernated: SlotBitset::empty(capacity),
            }),
            entry: Box::new(entry),
            id,
            capacity,
            stack_size,
        }))
    }

    /// Number of fibers the pool was built with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of stack reserved for each fiber.
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Fibers currently running or hibernated.
    pub fn num_in_use(&self) -> usize {
        self.capacity - self.bits.lock().available.count_ones()
    }

    /// Fibers parked by a [`YieldMode::Hibernate`] yield and not yet resumed.
    pub fn num_hibernated(&self) -> usize {
        self.bits.lock().hibernated.count_ones()
    }

    /// Snapshot of where `id` is in its lifecycle.
    pub fn state(&self, id: FiberId) -> FiberState {
        let bits = self.bits.lock();
        if bits.available.contains(id.index()) {
            FiberState::Available
        } else if bits.hibernated.contains(id.index()) {
            FiberState::Hibernated
        } else {
            FiberState::Running
        }
    }

    /// Takes the lowest-numbered free fiber.
    ///
    /// # Panics
    ///
    /// Panics when every fiber is in use. Size the pool for the worst-case
    /// number of fibers alive at once.
    pub fn acquire_fiber(&self) -> FiberHandle {
        match self.try_acquire_fiber() {
            Some(handle) => handle,
            None => panic!(
                "fiber pool exhausted: all {} fibers are in use",
                self.capacity
            ),
        }
    }

    /// Like [`acquire_fiber`](Self::acquire_fiber), but returns `None` when
    /// every fiber is in use.
    pub fn try_acquire_fiber(&self) -> Option<FiberHandle> {
        let index = self.bits.lock().available.take_first()? as u32;
        self.check_canary(index);
        Some(FiberHandle::new(self.id, index))
    }

    /// Returns a fiber to the pool. Its stack contents are meaningless until
    /// it is acquired and resumed again.
    ///
    /// # Panics
    ///
    /// Panics if the handle belongs to another pool or the fiber still has a
    /// pending wake action.
    pub fn release_fiber(&self, handle: FiberHandle) {
        let index = self.claim(handle);
        self.release_index(index);
    }

    /// The fiber executing on the calling thread, if it belongs to this pool.
    pub fn current_fiber(&self) -> Option<CurrentFiber<'_>> {
        let (pool, index) = thread_slot::get()?;
        if pool != self.addr() {
            return None;
        }
        Some(CurrentFiber {
            pool: self,
            index,
            _not_send: PhantomData,
        })
    }

    /// Turns the calling OS thread into a worker of this pool.
    ///
    /// Acquires a fiber and resumes into it, then keeps resuming whichever
    /// fiber the running one yields to. Returns once a fiber on this thread
    /// calls [`CurrentFiber::exit_thread`].
    ///
    /// # Panics
    ///
    /// Panics when called from inside a fiber, and propagates panics that
    /// escape the entry callback.
    pub fn start_thread(&self) {
        assert!(
            thread_slot::get().is_none(),
            "start_thread called from inside a fiber"
        );

        let first = self.acquire_fiber();
        let mut next = self.claim(first);
        let pool_ref = PoolRef(NonNull::from(self));
        let _slot = ThreadSlotGuard;

        debug!(pool = self.id, fiber = next, "thread entering fiber pool");

        loop {
            thread_slot::set(Some((self.addr(), next)));

            // SAFETY: `next` was handed to this dispatcher alone, either by
            // consuming its handle or by the fiber that consumed it when
            // yielding, so no other thread can be resuming the same context.
            let context = unsafe { &mut *self.slot(next).context.get() };
            match context.resume(pool_ref) {
                Transfer::To(target) => {
                    trace!(pool = self.id, from = next, to = target, "fiber switch");
                    next = target;
                }
                Transfer::Exit => {
                    thread_slot::set(None);
                    self.release_index(next);
                    break;
                }
            }
        }

        debug!(pool = self.id, "thread left fiber pool");
    }

    fn slot(&self, index: u32) -> &FiberSlot {
        &self.slots[index as usize]
    }

    fn addr(&self) -> usize {
        self as *const FiberPool as usize
    }

    fn check_canary(&self, index: u32) {
        debug_assert_eq!(
            self.slot(index).canary,
            CANARY ^ index,
            "fiber slot {} corrupted",
            index
        );
    }

    /// Consumes a handle, returning its slot index. Resuming a hibernated
    /// fiber starts here, so this also clears its hibernated bit.
    fn claim(&self, handle: FiberHandle) -> u32 {
        assert_eq!(
            handle.pool_id, self.id,
            "fiber handle belongs to a different pool"
        );
        let index = handle.index;
        self.check_canary(index);

        let mut bits = self.bits.lock();
        debug_assert!(
            !bits.available.contains(index as usize),
            "handle to available fiber {}",
            index
        );
        bits.hibernated.remove(index as usize);
        index
    }

    fn release_index(&self, index: u32) {
        assert!(
            self.slot(index).wake.lock().is_none(),
            "released {} with a pending wake action",
            FiberId(index)
        );

        let mut bits = self.bits.lock();
        bits.hibernated.remove(index as usize);
        let was_in_use = bits.available.insert(index as usize);
        debug_assert!(was_in_use, "{} released twice", FiberId(index));
    }

    fn set_wake(&self, index: u32, action: WakeAction) {
        let mut wake = self.slot(index).wake.lock();
        assert!(
            wake.is_none(),
            "{} already has a pending wake action",
            FiberId(index)
        );
        *wake = action;
    }
}

impl fmt::Debug for FiberPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberPool")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("stack_size", &self.stack_size)
            .field("in_use", &self.num_in_use())
            .finish()
    }
}

impl Drop for FiberPool {
    fn drop(&mut self) {
        let in_use = self.capacity - self.bits.get_mut().available.count_ones();
        let started = self
            .slots
            .iter_mut()
            .map(|slot| slot.context.get_mut().started())
            .filter(|started| *started)
            .count();

        if in_use > 0 {
            warn!(pool = self.id, in_use, "fiber pool dropped with fibers in use");
        }
        debug!(pool = self.id, started, "fiber pool dropped");
    }
}

/// The fiber running on the calling thread.
///
/// Handed to the entry callback; only valid on the fiber it describes.
pub struct CurrentFiber<'p> {
    pool: &'p FiberPool,
    index: u32,
    _not_send: PhantomData<*const ()>,
}

impl<'p> CurrentFiber<'p> {
    pub fn id(&self) -> FiberId {
        FiberId(self.index)
    }

    /// The pool this fiber belongs to.
    pub fn pool(&self) -> &'p FiberPool {
        self.pool
    }

    /// Hands this OS thread to `to`, or to a freshly acquired fiber when
    /// `to` is `None`.
    ///
    /// Returns once some other fiber yields back to this one. Its own wake
    /// action, if any, has run by then. With [`YieldMode::Release`] the
    /// fiber is returned to the pool by the target, so it only comes back
    /// here after being acquired again.
    ///
    /// # Panics
    ///
    /// Panics if the pool is exhausted while acquiring a fresh fiber, or if
    /// the target still has a pending wake action.
    pub fn yield_to(&self, to: Option<FiberHandle>, mode: YieldMode) {
        let pool = self.pool;
        let target = match to {
            Some(handle) => pool.claim(handle),
            None => {
                let handle = pool.acquire_fiber();
                pool.claim(handle)
            }
        };
        assert_ne!(target, self.index, "{} cannot yield to itself", self.id());

        let action = match mode {
            YieldMode::Release => WakeAction::Release(self.index),
            YieldMode::Hibernate(park) => {
                pool.bits.lock().hibernated.insert(self.index as usize);
                WakeAction::Park {
                    fiber: FiberHandle::new(pool.id, self.index),
                    park,
                }
            }
        };
        pool.set_wake(target, action);

        self.switch(Transfer::To(target));
    }

    /// Ends the `start_thread` call that is running this fiber. The fiber is
    /// released and, if acquired again later, resumes by returning from here.
    pub fn exit_thread(&self) {
        self.switch(Transfer::Exit);
    }

    fn switch(&self, transfer: Transfer) {
        let suspender = self.pool.slot(self.index).suspender.get();
        debug_assert!(!suspender.is_null());

        // SAFETY: set by `fiber_main` before user code runs on this fiber; the
        // yielder lives at the base of this fiber's own stack.
        let suspender = unsafe { &*suspender };
        let _ = switch_out(suspender, transfer);

        self.fire_wake();
    }

    fn fire_wake(&self) {
        let action = std::mem::take(&mut *self.pool.slot(self.index).wake.lock());
        match action {
            WakeAction::None => {}
            WakeAction::Release(index) => self.pool.release_index(index),
            WakeAction::Park { fiber, park } => park(fiber),
        }
    }
}

impl fmt::Debug for CurrentFiber<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrentFiber")
            .field("pool", &self.pool.id)
            .field("index", &self.index)
            .finish()
    }
}

fn fiber_main(pool: &FiberPool, index: u32, suspender: &Suspender<PoolRef>) -> Infallible {
    pool.slot(index).suspender.set(suspender);

    let fiber = CurrentFiber {
        pool,
        index,
        _not_send: PhantomData,
    };
    trace!(pool = pool.id, fiber = index, "fiber started");
    fiber.fire_wake();

    loop {
        (pool.entry)(&fiber);
    }
}

struct ThreadSlotGuard;

impl Drop for ThreadSlotGuard {
    fn drop(&mut self) {
        thread_slot::set(None);
    }
}

/// Which pool and fiber the calling OS thread is running.
///
/// A fiber can move between threads at a yield, so these accessors must
/// never be inlined into code that spans a switch.
mod thread_slot {
    use std::cell::Cell;

    thread_local! {
        static CURRENT: Cell<Option<(usize, u32)>> = const { Cell::new(None) };
    }

    #[inline(never)]
    pub(super) fn get() -> Option<(usize, u32)> {
        CURRENT.with(|current| current.get())
    }

    #[inline(never)]
    pub(super) fn set(value: Option<(usize, u32)>) {
        CURRENT.with(|current| current.set(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread::{self, ThreadId};

    fn small_config(capacity: usize) -> Config {
        Config::builder()
            .fiber_capacity(capacity)
            .fiber_stack_size(64 * 1024)
            .build()
            .unwrap()
    }

    fn idle_pool(capacity: usize) -> Arc<FiberPool> {
        FiberPool::new(&small_config(capacity), |fiber| fiber.exit_thread()).unwrap()
    }

    #[inline(never)]
    fn thread_id() -> ThreadId {
        thread::current().id()
    }

    #[test]
    fn test_acquire_release_counts() {
        let pool = idle_pool(8);
        assert_eq!(pool.num_in_use(), 0);

        let a = pool.acquire_fiber();
        let b = pool.acquire_fiber();
        assert_eq!(a.id(), FiberId(0));
        assert_eq!(b.id(), FiberId(1));
        assert_eq!(pool.num_in_use(), 2);
        assert_eq!(pool.state(a.id()), FiberState::Running);

        let a_id = a.id();
        pool.release_fiber(a);
        assert_eq!(pool.state(a_id), FiberState::Available);
        assert_eq!(pool.num_in_use(), 1);

        // lowest free slot is handed out first
        let c = pool.acquire_fiber();
        assert_eq!(c.id(), FiberId(0));

        pool.release_fiber(b);
        pool.release_fiber(c);
        assert_eq!(pool.num_in_use(), 0);
    }

    #[test]
    #[should_panic(expected = "fiber pool exhausted")]
    fn test_exhaustion_is_fatal() {
        let pool = idle_pool(4);
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.acquire_fiber());
        }
    }

    #[test]
    fn test_try_acquire_reports_exhaustion() {
        let pool = idle_pool(2);
        let a = pool.try_acquire_fiber().unwrap();
        let b = pool.try_acquire_fiber().unwrap();
        assert!(pool.try_acquire_fiber().is_none());
        assert_eq!(pool.num_in_use(), 2);

        pool.release_fiber(b);
        let c = pool.try_acquire_fiber().unwrap();
        assert_eq!(c.id(), FiberId(1));

        pool.release_fiber(a);
        pool.release_fiber(c);
        assert_eq!(pool.num_in_use(), 0);
    }

    #[test]
    #[should_panic(expected = "different pool")]
    fn test_foreign_handle_rejected() {
        let a = idle_pool(2);
        let b = idle_pool(2);
        let handle = a.acquire_fiber();
        b.release_fiber(handle);
    }

    #[test]
    fn test_round_trip_across_threads() {
        let pool = idle_pool(64);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let held: Vec<_> = (0..8).map(|_| pool.acquire_fiber()).collect();
                        assert!(pool.num_in_use() <= pool.capacity());
                        for handle in held {
                            pool.release_fiber(handle);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.num_in_use(), 0);
    }

    #[test]
    fn test_current_fiber_outside_pool() {
        let pool = idle_pool(2);
        assert!(pool.current_fiber().is_none());
    }

    #[test]
    fn test_start_thread_until_exit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let pool = FiberPool::new(&small_config(4), move |fiber| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert_eq!(fiber.pool().current_fiber().map(|f| f.id()), Some(fiber.id()));
            fiber.exit_thread();
        })
        .unwrap();

        pool.start_thread();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.num_in_use(), 0);

        // the released fiber is reacquired and carries on with its loop
        pool.start_thread();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.num_in_use(), 0);
        assert!(pool.current_fiber().is_none());
    }

    #[test]
    fn test_yield_release_recycles_previous_fiber() {
        let step = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(Mutex::new(Vec::new()));

        let (s, o) = (step.clone(), observed.clone());
        let pool = FiberPool::new(&small_config(4), move |fiber| {
            match s.fetch_add(1, Ordering::SeqCst) {
                0 => fiber.yield_to(None, YieldMode::Release),
                _ => {
                    let pool = fiber.pool();
                    o.lock().push((fiber.id(), pool.state(FiberId(0)), pool.num_in_use()));
                    fiber.exit_thread();
                }
            }
        })
        .unwrap();

        pool.start_thread();

        let observed = observed.lock();
        assert_eq!(observed.len(), 1);
        // fiber 1 ran after fiber 0 had been handed back by its wake action
        assert_eq!(observed[0], (FiberId(1), FiberState::Available, 1));
        assert_eq!(pool.num_in_use(), 0);
    }

    #[test]
    fn test_hibernate_and_resume() {
        let step = Arc::new(AtomicUsize::new(0));
        let parked: Arc<Mutex<Option<FiberHandle>>> = Arc::new(Mutex::new(None));
        let log = Arc::new(Mutex::new(Vec::new()));

        let (s, p, l) = (step.clone(), parked.clone(), log.clone());
        let pool = FiberPool::new(&small_config(4), move |fiber| {
            let pool = fiber.pool();
            match s.fetch_add(1, Ordering::SeqCst) {
                0 => {
                    let slot = p.clone();
                    fiber.yield_to(
                        None,
                        YieldMode::Hibernate(Box::new(move |handle| {
                            *slot.lock() = Some(handle);
                        })),
                    );
                    l.lock().push(format!("{} resumed", fiber.id()));
                }
                1 => {
                    assert_eq!(pool.state(FiberId(0)), FiberState::Hibernated);
                    assert_eq!(pool.num_hibernated(), 1);
                    let sleeper = p.lock().take().expect("park callback ran");
                    l.lock().push(format!("{} waking {}", fiber.id(), sleeper.id()));
                    fiber.yield_to(Some(sleeper), YieldMode::Release);
                }
                _ => {
                    l.lock().push(format!(
                        "{} sees fiber#1 {:?}",
                        fiber.id(),
                        pool.state(FiberId(1))
                    ));
                    fiber.exit_thread();
                }
            }
        })
        .unwrap();

        pool.start_thread();

        assert_eq!(
            *log.lock(),
            vec![
                "fiber#1 waking fiber#0".to_string(),
                "fiber#0 resumed".to_string(),
                "fiber#0 sees fiber#1 Available".to_string(),
            ]
        );
        assert_eq!(pool.num_in_use(), 0);
        assert_eq!(pool.num_hibernated(), 0);
    }

    #[test]
    fn test_hibernated_fiber_resumes_on_another_thread() {
        let step = Arc::new(AtomicUsize::new(0));
        let parked: Arc<Mutex<Option<FiberHandle>>> = Arc::new(Mutex::new(None));
        let threads = Arc::new(Mutex::new(Vec::new()));

        let (s, p, t) = (step.clone(), parked.clone(), threads.clone());
        let pool = FiberPool::new(&small_config(4), move |fiber| {
            match s.fetch_add(1, Ordering::SeqCst) {
                0 => {
                    t.lock().push(thread_id());
                    let slot = p.clone();
                    fiber.yield_to(
                        None,
                        YieldMode::Hibernate(Box::new(move |handle| {
                            *slot.lock() = Some(handle);
                        })),
                    );
                    t.lock().push(thread_id());
                }
                1 => fiber.exit_thread(),
                2 => {
                    let sleeper = p.lock().take().expect("parked fiber");
                    fiber.yield_to(Some(sleeper), YieldMode::Release);
                }
                _ => fiber.exit_thread(),
            }
        })
        .unwrap();

        let first = {
            let pool = pool.clone();
            thread::spawn(move || pool.start_thread())
        };
        first.join().unwrap();

        assert_eq!(pool.state(FiberId(0)), FiberState::Hibernated);
        assert_eq!(pool.num_in_use(), 1);

        let second = {
            let pool = pool.clone();
            thread::spawn(move || pool.start_thread())
        };
        second.join().unwrap();

        let threads = threads.lock();
        assert_eq!(threads.len(), 2);
        assert_ne!(threads[0], threads[1]);
        assert_eq!(pool.num_in_use(), 0);
        assert_eq!(pool.num_hibernated(), 0);
    }
}
