//! Operator-facing status lines.

use std::fmt::Display;

/// Print a success line.
pub fn success(message: impl Display) {
    println!("✅  {}", message);
}

/// Print a failure line.
pub fn failure(message: impl Display) {
    println!("❌  {}", message);
}

/// Print an informational line.
pub fn info(message: impl Display) {
    println!("ℹ️  {}", message);
}
