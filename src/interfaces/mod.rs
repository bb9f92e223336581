pub mod polling;
pub mod replay;
