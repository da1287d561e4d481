//! Application-wide constants for punchdown.
//!
//! This module centralizes the relay timing and sizing constants so the
//! reconnect schedule, request deadlines and channel capacities live in
//! one place.
//!
//! # Categories
//!
//! - **Reconnection**: Backoff schedule for the relay session
//! - **Requests**: Default deadlines for blocking tool calls
//! - **Channels**: Queue capacities between tasks

use std::time::Duration;

// ============================================================================
// Reconnection
// ============================================================================

/// First reconnect delay. Doubles per attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(1_000);

/// Upper bound for a single reconnect delay.
pub const MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// Reconnect attempts before the session gives up for good.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Upper bound on a single WebSocket open (TCP + TLS + upgrade).
///
/// A connect that hangs longer is treated like a refused connect and goes
/// through the normal backoff path.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on a single frame write to the relay.
///
/// A write that stalls longer fails with a transport error and recycles the
/// session, which releases the sink for pongs and `disconnect`.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Requests
// ============================================================================

/// Default deadline for `request_approval` and `request_input`.
///
/// Five minutes gives a human on a phone time to notice the push and
/// answer, while still guaranteeing the agent gets a terminal answer.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest deadline a blocking request may ask for. Larger values are
/// clamped to this.
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Channels
// ============================================================================

/// Capacity of the inbound envelope queue between the connection task and
/// the message router.
pub const INBOUND_QUEUE_CAPACITY: usize = 100;
