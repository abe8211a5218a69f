//! Side-effecting seams: session files and injected platform capabilities.

pub mod platform;
pub mod session;
