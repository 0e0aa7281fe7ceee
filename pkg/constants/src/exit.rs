//! Process exit codes.

/// Every selected resource applied or was already in the desired state.
pub const EXIT_SUCCESS: i32 = 0;

/// The run aborted before completing its scope (config, auth, resolution, fail-fast).
pub const EXIT_FATAL: i32 = 1;

/// The run completed its scope under continue-on-error but some items failed.
pub const EXIT_PARTIAL: i32 = 2;
