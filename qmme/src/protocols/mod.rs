pub mod cause;
pub mod nas;
pub mod peers;
pub mod s6a;
pub mod s11;
