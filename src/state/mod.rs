//! Per-domain pacing state
//!
//! [`DomainState`] holds the spacing, backoff, and adaptive-delay bookkeeping for
//! one domain. The rate governor owns one instance per domain behind its own lock.

mod domain_state;

pub use domain_state::DomainState;
