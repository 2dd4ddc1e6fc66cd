mod config;
mod context_store;
mod identity;
mod pdn_context;
mod procedure_store;
mod qos;
mod security_context;
mod subscription;
pub mod tft;
mod ue_context;

pub use config::*;
pub use context_store::*;
pub use identity::*;
pub use pdn_context::*;
pub use procedure_store::*;
pub use qos::*;
pub use security_context::*;
pub use subscription::*;
pub use tft::{PacketFilter, PacketFilterComponent, PacketFilterDirection, Tft, TftOperation};
pub use ue_context::*;
