mod handler_api;
mod procedure;
mod ue_procedures;

pub use handler_api::HandlerApi;
pub use procedure::Procedure;
pub use ue_procedures::{NasTimer, PdnSummary, TimerKind, UeEvent, UeMessageHandler, UeSummary};
