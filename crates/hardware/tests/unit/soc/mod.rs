/// Cache controller gating and pass-through.
pub mod controller;


/// Root memory endpoint.
pub mod memory;
