//! Integration tests for hivelink.
//!
//! Organized by the property each suite pins down:
//!
//! - `harness.rs`     - In-memory broker harness, scripted responders, manual links
//! - `correlation.rs` - Every exchange returns its own result, sequential or concurrent
//! - `mismatch.rs`    - Foreign, stale and malformed entries are discarded, never returned
//! - `timeout.rs`     - Queue and overall deadlines, late replies
//! - `resilience.rs`  - The listen loop survives bad commands and domain failures
//! - `roundtrip.rs`   - Wire shape of a full command/result round trip, run records
//! - `reconnect.rs`   - Readiness, subscription renewal and outages

mod mismatch;
mod roundtrip;
mod timeout;
