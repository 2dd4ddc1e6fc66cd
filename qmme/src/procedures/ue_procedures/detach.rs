//! detach - UE initiated detach, and the implicit detach used when the network gives up on a UE

use super::UeProcedure;
use crate::nas::{DetachRequest, DownlinkNas, EmmIndication};
use crate::{EmmState, HandlerApi};
use anyhow::Result;
use derive_deref::{Deref, DerefMut};
use slog::{info, warn};

#[derive(Deref, DerefMut)]
pub struct DetachProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

impl<'a, A: HandlerApi> DetachProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        DetachProcedure(inner)
    }

    // TS 24.301, 5.5.2.2.2
    pub async fn request(mut self, r: DetachRequest) -> Result<()> {
        info!(self.logger, "UE requested detach, switch off = {}", r.switch_off);
        if self.ue.procedures.attach().is_some() {
            warn!(self.logger, "Detach aborts attach procedure in progress");
        }
        if !r.switch_off {
            self.send_nas(DownlinkNas::DetachAccept).await;
        }
        self.release_all().await;
        self.ue.emm_state = EmmState::Deregistered;
        self.ue.released = true;
        Ok(())
    }

    /// Detach the UE without signalling to it.
    pub async fn implicit(&mut self) {
        warn!(self.logger, "Implicitly detaching UE");
        self.release_all().await;
        self.ue.emm_state = EmmState::Deregistered;
        self.indicate(EmmIndication::ImplicitDetach).await;
    }

    /// Stop every procedure and drop every PDN connection, deleting the sessions the
    /// gateway holds for them.
    pub async fn release_all(&mut self) {
        for timer in self.ue.procedures.clear() {
            self.api.stop_timer(timer);
        }
        let pdns: Vec<_> = self.ue.pdn_contexts.keys().copied().collect();
        for pdn_cid in pdns {
            self.release_pdn(pdn_cid, true).await;
        }
    }
}
