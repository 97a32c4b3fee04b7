//! Per-CPU run queues, load balancing, the zombie reaper, and IPI handling.
//!
//! The actual register-level context switch is a platform concern (see
//! [`crate::thread::ParkingPlatform`]); everything here is the portable
//! bookkeeping around it — which run queue a thread sits on, when to move
//! it to another CPU, and how a CPU reacts to an inter-processor interrupt.
use alloc::collections::VecDeque;
use crossbeam_queue::ArrayQueue;
use hal::spinlock::SpinLock;

use super::ThreadId;
use hal::MAX_CPU;

bitflags::bitflags! {
    /// Pending inter-processor interrupt reasons, processed in this order
    /// on receipt: PANIC, OFFLINE, UNIDLE, TLBSHOOTDOWN.
    pub struct IpiKind: u8 {
        const PANIC = 0b0001;
        const OFFLINE = 0b0010;
        const UNIDLE = 0b0100;
        const TLBSHOOTDOWN = 0b1000;
    }
}

const SHOOTDOWN_QUEUE_CAP: usize = 64;

struct PerCpu {
    run_queue: SpinLock<VecDeque<ThreadId>>,
    zombies: SpinLock<VecDeque<ThreadId>>,
    ipi_pending: SpinLock<IpiKind>,
    shootdown: ArrayQueue<u64>,
    is_idle: core::sync::atomic::AtomicBool,
}

impl PerCpu {
    fn new() -> Self {
        PerCpu {
            run_queue: SpinLock::new(VecDeque::new()),
            zombies: SpinLock::new(VecDeque::new()),
            ipi_pending: SpinLock::new(IpiKind::empty()),
            shootdown: ArrayQueue::new(SHOOTDOWN_QUEUE_CAP),
            is_idle: core::sync::atomic::AtomicBool::new(false),
        }
    }
}

// crossbeam_queue::ArrayQueue::new is not const, so the per-CPU table is
// built lazily on first touch rather than as a `static` array literal.
struct CpuTable {
    cpus: alloc::vec::Vec<PerCpu>,
}

static TABLE: SpinLock<Option<CpuTable>> = SpinLock::new(None);

fn with_table<R>(f: impl FnOnce(&CpuTable) -> R) -> R {
    let mut g = TABLE.lock();
    if g.is_none() {
        let ncpu = hal::cpu::count().min(MAX_CPU);
        let mut cpus = alloc::vec::Vec::with_capacity(ncpu);
        for _ in 0..ncpu {
            cpus.push(PerCpu::new());
        }
        *g = Some(CpuTable { cpus });
    }
    let r = f(g.as_ref().unwrap());
    g.unlock();
    r
}

/// Appends `tid` to `cpu`'s run queue tail.
pub fn enqueue(cpu: usize, tid: ThreadId) {
    with_table(|t| {
        let mut rq = t.cpus[cpu].run_queue.lock();
        rq.push_back(tid);
        rq.unlock();
    });
}

/// Removes and returns the head of `cpu`'s run queue, if any.
pub fn dequeue(cpu: usize) -> Option<ThreadId> {
    with_table(|t| {
        let mut rq = t.cpus[cpu].run_queue.lock();
        let r = rq.pop_front();
        rq.unlock();
        r
    })
}

pub fn run_queue_len(cpu: usize) -> usize {
    with_table(|t| {
        let rq = t.cpus[cpu].run_queue.lock();
        let n = rq.len();
        rq.unlock();
        n
    })
}

pub fn set_idle(cpu: usize, idle: bool) {
    with_table(|t| {
        t.cpus[cpu]
            .is_idle
            .store(idle, core::sync::atomic::Ordering::Release)
    });
}

/// Rebalances run queues so no CPU holds more than `ceil(total/ncpus)`
/// threads, pulling excess off the tail of overloaded queues (per spec, the
/// *tail*, so the head — likely to run soonest — is left undisturbed) and
/// appending to underloaded ones. `current` on each CPU is never moved even
/// if it transiently appears in that CPU's queue.
pub fn migrate(current: &[Option<ThreadId>]) {
    with_table(|t| {
        let ncpu = t.cpus.len();
        if ncpu == 0 {
            return;
        }
        let mut queues: alloc::vec::Vec<VecDeque<ThreadId>> = (0..ncpu)
            .map(|i| {
                let mut rq = t.cpus[i].run_queue.lock();
                let q = core::mem::take(&mut *rq);
                rq.unlock();
                q
            })
            .collect();

        let total: usize = queues.iter().map(|q| q.len()).sum();
        let fair_share = (total + ncpu - 1) / ncpu;

        let mut overflow: VecDeque<ThreadId> = VecDeque::new();
        for (i, q) in queues.iter_mut().enumerate() {
            while q.len() > fair_share {
                if let Some(tid) = q.back().copied() {
                    if Some(tid) == current.get(i).copied().flatten() {
                        break;
                    }
                    q.pop_back();
                    overflow.push_back(tid);
                } else {
                    break;
                }
            }
        }

        for (i, q) in queues.iter_mut().enumerate() {
            while q.len() < fair_share {
                if let Some(tid) = overflow.pop_front() {
                    q.push_back(tid);
                } else {
                    break;
                }
                let _ = i;
            }
        }
        // Every thread pulled into `overflow` came from a queue that was
        // over fair_share, so the total deficit across underloaded queues
        // can never be smaller than overflow.len(); this should always
        // drain to empty above. Dumped onto CPU 0 rather than dropped if
        // that invariant is ever wrong.
        debug_assert!(overflow.is_empty(), "migrate: overflow did not drain");
        if !overflow.is_empty() {
            queues[0].extend(overflow);
        }

        for (i, q) in queues.into_iter().enumerate() {
            let mut rq = t.cpus[i].run_queue.lock();
            *rq = q;
            rq.unlock();
        }
    })
}

pub fn ipi_send(target: usize, kind: IpiKind) {
    with_table(|t| {
        let mut g = t.cpus[target].ipi_pending.lock();
        *g |= kind;
        g.unlock();
    });
    hal_trigger_ipi(target);
}

/// Queues a TLB shootdown address for `target`. Caller is responsible for
/// also sending [`IpiKind::TLBSHOOTDOWN`].
pub fn queue_shootdown(target: usize, addr: u64) -> Result<(), u64> {
    with_table(|t| t.cpus[target].shootdown.push(addr))
}

/// Processes pending IPIs for `cpu` in fixed priority order, invoking the
/// provided callbacks. Returns `true` if PANIC or OFFLINE was handled
/// (caller should not return to normal scheduling).
pub fn ipi_handle(
    cpu: usize,
    mut on_halt: impl FnMut(),
    mut on_shootdown: impl FnMut(u64),
) -> bool {
    let pending = with_table(|t| {
        let mut g = t.cpus[cpu].ipi_pending.lock();
        let p = *g;
        *g = IpiKind::empty();
        g.unlock();
        p
    });

    if pending.contains(IpiKind::PANIC) {
        on_halt();
        return true;
    }
    if pending.contains(IpiKind::OFFLINE) {
        on_halt();
        return true;
    }
    // UNIDLE is a no-op: the interrupt itself already did the job of
    // breaking the CPU out of `cpu_idle`.
    if pending.contains(IpiKind::TLBSHOOTDOWN) {
        with_table(|t| {
            while let Some(addr) = t.cpus[cpu].shootdown.pop() {
                on_shootdown(addr);
            }
        });
    }
    false
}

/// Disables scheduling on the panicking CPU and broadcasts PANIC to every
/// other CPU, per spec §4.3.
pub fn panic_all(origin: usize) {
    with_table(|t| {
        let mut rq = t.cpus[origin].run_queue.lock();
        rq.clear();
        rq.unlock();
    });
    let ncpu = with_table(|t| t.cpus.len());
    for cpu in 0..ncpu {
        if cpu != origin {
            ipi_send(cpu, IpiKind::PANIC);
        }
    }
}

#[cfg(not(test))]
fn hal_trigger_ipi(_target: usize) {
    // Real cross-CPU interrupt delivery is a platform concern; builds with
    // real hardware provide it as part of their `hal::cpu::Platform`.
}

#[cfg(test)]
fn hal_trigger_ipi(_target: usize) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ensure_platform;

    // The per-CPU table is a crate-wide static; serialize these tests and
    // reset shared state between them so they don't observe each other's
    // run-queue/IPI state.
    static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn reset_all() {
        let ncpu = with_table(|t| t.cpus.len());
        for cpu in 0..ncpu {
            while dequeue(cpu).is_some() {}
            ipi_handle(cpu, || {}, |_| {});
        }
    }

    #[test]
    fn migrate_balances_within_ceiling() {
        let _guard = TEST_LOCK.lock().unwrap();
        ensure_platform();
        reset_all();
        enqueue(0, 1);
        enqueue(0, 2);
        enqueue(0, 3);
        enqueue(0, 4);
        enqueue(0, 5);
        migrate(&[None, None]);
        let ncpu = with_table(|t| t.cpus.len());
        let total: usize = (0..ncpu).map(run_queue_len).sum();
        assert_eq!(total, 5);
        let fair_share = (5 + ncpu - 1) / ncpu;
        for cpu in 0..ncpu {
            assert!(run_queue_len(cpu) <= fair_share);
        }
    }

    #[test]
    fn ipi_priority_order() {
        let _guard = TEST_LOCK.lock().unwrap();
        ensure_platform();
        reset_all();
        ipi_send(0, IpiKind::UNIDLE);
        ipi_send(0, IpiKind::TLBSHOOTDOWN);
        let mut halted = false;
        let mut shot = 0;
        let stop = ipi_handle(0, || halted = true, |_| shot += 1);
        assert!(!stop);
        assert!(!halted);
    }

    #[test]
    fn panic_ipi_takes_priority_over_shootdown() {
        let _guard = TEST_LOCK.lock().unwrap();
        ensure_platform();
        reset_all();
        ipi_send(1, IpiKind::TLBSHOOTDOWN);
        ipi_send(1, IpiKind::PANIC);
        let mut halted = false;
        let stop = ipi_handle(1, || halted = true, |_| {});
        assert!(stop);
        assert!(halted);
    }
}
