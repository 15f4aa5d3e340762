//! Flight stabilization control law.

mod mixer;
pub use mixer::QuadMixer;

mod pid;
pub use pid::Pid;
