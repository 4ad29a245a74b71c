#![warn(missing_docs, missing_debug_implementations)]

//! Near-real-time username availability feedback with a race-free submit.
//!
//! A UI feeds every edit of a username field into a
//! [`Coordinator`](coordinator::Coordinator). Edits are debounced into
//! availability checks against a remote service; only the most recently
//! dispatched check may update the visible state, so slow responses for
//! earlier text can never overwrite fresher ones. Submitting performs one
//! more undebounced check and registers the name only if that check says it
//! is still available.
//!
//! # Example
//!
//! ```no_run
//! use username_avail::config::Config;
//! use username_avail::coordinator::{AvailabilityState, Coordinator};
//!
//! let coordinator = Coordinator::new(Config::new("http://localhost:8080"))?;
//! let updates = coordinator.subscribe();
//!
//! coordinator.on_input_changed("alice");
//! for snapshot in updates.iter() {
//!     match snapshot.availability {
//!         AvailabilityState::Pending => continue,
//!         state => {
//!             println!("{}: {state}", snapshot.name);
//!             break;
//!         }
//!     }
//! }
//! # Ok::<(), username_avail::error::ConfigError>(())
//! ```

pub mod check;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod telemetry;
