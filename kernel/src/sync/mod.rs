//! Concurrency primitives: spinlock (re-exported from `quill-hal`), wait
//! channels, semaphores, locks, and condition variables.
pub mod cv;
pub mod lock;
pub mod wait_channel;

pub use hal::spinlock::{SpinLock, SpinLockGuard};
pub use cv::Cv;
pub use lock::Lock;
pub use wait_channel::{Semaphore, WaitChannel};
