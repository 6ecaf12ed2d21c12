//! # topup-flow
//!
//! State machines on top of `topup-core` traits:
//!
//! - [`SessionManager`]: auth state, sequence-guarded against stale results
//! - [`CheckoutOrchestrator`]: product selection through payment
//! - [`ReturnHandler`]: resumes a checkout after a gateway redirect
//!
//! Nothing here does I/O directly; providers, repositories and gateways
//! are injected.

pub mod checkout;
pub mod resume;
pub mod session;
pub mod transitions;

#[cfg(test)]
mod testing;

pub use checkout::{CheckoutDeps, CheckoutOrchestrator, CheckoutSnapshot, ContactDetails, PaymentProgress};
pub use resume::ReturnHandler;
pub use session::{SessionConfig, SessionManager, SessionSnapshot, Subscription};
pub use transitions::{next_step, transition, CheckoutEvent, CheckoutStep};
