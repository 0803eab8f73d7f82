//! Small internal utilities.

mod rng;

pub use rng::DetRng;
