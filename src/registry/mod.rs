//! Capture registry for consumer routing
//!
//! The registry maps every overlay consumer to the capture thread serving it.
//! Requests for an identical source share one thread; picker requests always
//! get their own.
//!
//! # Architecture
//!
//! ```text
//!                          CaptureRegistry
//!                     ┌─────────────────────────┐
//!                     │ Mutex<ThreadTable {     │
//!                     │   threads: HashMap<Id,  │
//!                     │     ThreadEntry {       │
//!                     │       source,           │
//!                     │       consumers,        │
//!                     │       inbox: mpsc::Tx,  │
//!                     │     }                   │
//!                     │   >                     │
//!                     │ }>                      │
//!                     └───────────┬─────────────┘
//!                                 │ UpdateData / SetPaused / Quit
//!         ┌───────────────────────┼───────────────────────┐
//!         ▼                       ▼                       ▼
//!   [capture thread]        [capture thread]        [capture thread]
//!    window 0x1f             monitor 0x2             picker
//!    A, B                    C                       D
//! ```
//!
//! # Refresh protocol
//!
//! Settings changes mutate the table and post `UpdateData`. The thread then
//! re-reads its full consumer list, so any number of queued updates collapse
//! into one.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::ConsumerRegistration;
pub use error::RegistryError;
pub use store::CaptureRegistry;
