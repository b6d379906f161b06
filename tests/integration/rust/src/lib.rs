//! Integration test suite for the script debugger core.
//!
//! These tests exercise full debug sessions across component boundaries:
//! a scripted VM on its own thread, the stepping state machine, and the
//! inspection cache, wired together the way an embedding frontend would.

/// Re-export components for test convenience
pub mod components {
    pub use debugger;
    pub use inspector;
    pub use vm_harness;
    pub use vm_interface;
}
