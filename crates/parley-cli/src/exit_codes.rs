//! Process exit codes. Part of the CLI contract.

pub const SUCCESS: i32 = 0;
pub const TESTS_FAILED: i32 = 1; // at least one test did not pass
pub const CONFIG_ERROR: i32 = 2; // bad plan, bad flags, or any other fatal error
pub const PLAN_EXISTS: i32 = 3; // `init` refused to overwrite
pub const NO_RECORD_FOUND: i32 = 4; // `store` query matched nothing
