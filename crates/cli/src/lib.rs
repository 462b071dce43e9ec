// fpgrid CLI library: argument types shared by the binary and its tests

pub mod cell_arg;
pub mod exit_codes;
pub mod term_arg;
