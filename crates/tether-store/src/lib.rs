//! # tether-store
//!
//! SQLite persistence for the execution engine: scheduled-task CRUD, the
//! append-only run log, and the per-day usage aggregate used for
//! admission control. The engine core never touches SQL directly — it
//! goes through [`TaskStore`].

mod store;

pub use store::TaskStore;
