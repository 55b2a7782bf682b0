//! # Ember Scheduler
//!
//! Tiered background task scheduling for the Ember game server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Schedulers                             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │   Critical   │   │     Main     │   │      Background      │  │
//! │  │ ticks, moves │   │ expiry,      │   │ startup jobs,        │  │
//! │  │              │   │ announcements│   │ cleanup (FIFO)       │  │
//! │  └──────┬───────┘   └──────┬───────┘   └──────────┬───────────┘  │
//! │     TaskQueue           TaskQueue              TaskQueue         │
//! │     + thread            + thread               + thread          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every tier owns one dispatch thread. The thread sleeps until the earliest
//! `next_run` in its queue, or until [`Scheduler::recheck`] is called, then runs
//! every due task from a snapshot of the queue. A failing or panicking task is
//! logged and the loop moves on; repeating tasks are always rescheduled.
//!
//! ## Key Components
//!
//! - [`Scheduler`]: one tier's queue and dispatch thread
//! - [`Schedulers`]: the three tiers of a process
//! - [`ScheduledTask`]: a one-shot or repeating task
//! - [`ExpiryWatch`]: a repeating task whose delay tracks the earliest expiry
//!   in an [`ExpiryList`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use ember_scheduler::Schedulers;
//! use std::time::Duration;
//!
//! let schedulers = Schedulers::start().unwrap();
//! schedulers.background().queue_once("load-main-world", |_| Ok(()));
//! schedulers
//!     .main()
//!     .queue_repeat("announce", Duration::from_secs(60), |_| Ok(()));
//! schedulers.stop_all();
//! ```

pub mod error;
pub mod expiry;
pub mod expiry_list;
pub mod expiry_watch;
pub mod scheduler;
mod scheduler_loop;
pub mod task;
pub mod task_queue;
pub mod tier;

// Re-exports
pub use error::{RecordParseError, SchedulerError, SchedulerResult, TaskError, TaskResult};
pub use expiry::{EXPIRY_RETRY_DELAY, ExpiryRecord, NO_PENDING_EXPIRY};
pub use expiry_list::ExpiryList;
pub use expiry_watch::{ExpiryCallback, ExpiryScan, ExpiryWatch};
pub use scheduler::Scheduler;
pub use task::{ScheduledTask, TaskHandle};
pub use task_queue::TaskQueue;
pub use tier::{Schedulers, Tier};
