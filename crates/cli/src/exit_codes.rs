//! CLI Exit Code Registry
//!
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | Success                                              |
//! | 1    | Plan loaded but failed its consistency check         |
//! | 2    | Usage error (bad arguments, malformed `--cell`)      |
//! | 3    | Plan file could not be read, parsed or built         |
//! | 4    | Operation rejected (non-leaf edit, cycle, not found) |

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// `check` found stale or stray cells.
pub const EXIT_INCONSISTENT: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Plan I/O, parse or validation failure.
pub const EXIT_PLAN: u8 = 3;

/// Edit or structural change rejected by the engine.
pub const EXIT_REJECTED: u8 = 4;
