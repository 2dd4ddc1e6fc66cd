use super::HandlerApi;
use slog::{Logger, debug};

/// The MME services plus a logger scoped to whatever the procedure is running on.
pub struct Procedure<'a, A: HandlerApi> {
    pub api: &'a A,
    pub logger: &'a Logger,
}

impl<'a, A: HandlerApi> Procedure<'a, A> {
    pub fn new(api: &'a A, logger: &'a Logger) -> Self {
        Procedure { api, logger }
    }

    pub fn log_message(&self, s: &str) {
        debug!(self.logger, "{}", s)
    }

    pub fn log_received(&self, message_name: &str) {
        self.log_message(&format!(">> {message_name}"))
    }

    pub fn log_sent(&self, message_name: &str) {
        self.log_message(&format!("<< {message_name}"))
    }
}

impl<A: HandlerApi> std::ops::Deref for Procedure<'_, A> {
    type Target = A;

    fn deref(&self) -> &Self::Target {
        self.api
    }
}
