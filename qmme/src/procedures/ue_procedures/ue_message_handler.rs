use super::{Sap, UeEvent, UeProcedure};
use crate::nas::EmmIndication;
use crate::{EnbUeKey, HandlerApi, UeContext};
use anyhow::Result;
use async_channel::{Receiver, Sender};
use slog::{Logger, debug, info, warn};

/// Owns one UE's context and processes its events one at a time, each to completion.
pub struct UeMessageHandler<A: HandlerApi> {
    receiver: Receiver<UeEvent>,
    // Handed to timers so that expiries arrive on this UE's queue.
    sender: Sender<UeEvent>,
    api: A,
    logger: Logger,
}

impl<A: HandlerApi> UeMessageHandler<A> {
    pub fn spawn(
        ue_id: u32,
        enb_ue_key: Option<EnbUeKey>,
        api: A,
        logger: Logger,
    ) -> Sender<UeEvent> {
        let (sender, receiver) = async_channel::unbounded();
        let handler = UeMessageHandler {
            receiver,
            sender: sender.clone(),
            api,
            logger,
        };
        async_std::task::spawn(async move {
            if let Err(e) = handler.run(ue_id, enb_ue_key).await {
                warn!(handler.logger, "UE message handler exiting: {e}");
            }
        });
        sender
    }

    async fn run(&self, ue_id: u32, enb_ue_key: Option<EnbUeKey>) -> Result<()> {
        let mut ue_context = UeContext::new(ue_id, enb_ue_key);
        let result = self.run_inner(&mut ue_context).await;
        self.destroy(&mut ue_context).await;
        result
    }

    async fn run_inner(&self, ue_context: &mut UeContext) -> Result<()> {
        while !ue_context.released {
            let event = self.receiver.recv().await?;
            let ue_procedure = UeProcedure::new(&self.api, ue_context, &self.logger, &self.sender);
            if let Err(e) = Sap::new(ue_procedure).handle(event).await {
                warn!(self.logger, "Error handling UE event - {e}");
            }
        }
        Ok(())
    }

    async fn destroy(&self, ue_context: &mut UeContext) {
        for timer in ue_context.procedures.clear() {
            self.api.stop_timer(timer);
        }

        // Remove the channel to this UE.
        self.api.delete_ue_channel(ue_context.ue_id);
        debug!(self.logger, "<< Indication UeContextReleased");
        self.api
            .emm_indication(ue_context.ue_id, EmmIndication::UeContextReleased)
            .await;
        info!(self.logger, "Released UE context");
    }
}
