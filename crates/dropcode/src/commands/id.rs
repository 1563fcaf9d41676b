//! Id command implementation.

use dropcode_core::code::IdGenerator;

/// Print a freshly generated peer ID.
pub fn run() {
    println!("{}", IdGenerator::new().generate());
}
