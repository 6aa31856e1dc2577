//! Workspace-level package.
//!
//! Exists to host the cross-crate integration tests in `tests/`; the
//! library surface lives in the member crates (start at `intake`).
