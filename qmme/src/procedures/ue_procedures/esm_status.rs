//! esm_status - ESM STATUS in both directions (TS 24.301, 6.7)

use super::UeProcedure;
use crate::cause::EsmCause;
use crate::{Ebi, HandlerApi, Pti};
use anyhow::Result;
use derive_deref::{Deref, DerefMut};
use slog::{debug, warn};

#[derive(Deref, DerefMut)]
pub struct EsmStatusProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

impl<'a, A: HandlerApi> EsmStatusProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        EsmStatusProcedure(inner)
    }

    /// The UE reports an ESM error.  Only invalid bearer and invalid PTI have a local effect.
    pub async fn received(mut self, pti: Pti, ebi: Ebi, cause: EsmCause) -> Result<()> {
        warn!(self.logger, "ESM status from UE, PTI {pti} EBI {ebi}, cause {cause:?}");
        match cause {
            EsmCause::InvalidEpsBearerIdentity => {
                while self.take_bearer_procedure(|p| p.ebi == ebi).is_some() {}
                if let Some(pdn_cid) = self
                    .ue
                    .pdn_by_default_ebi(ebi)
                    .map(|pdn| pdn.cid)
                {
                    self.release_pdn(pdn_cid, true).await;
                } else if self.ue.remove_bearer(ebi).is_some() {
                    debug!(self.logger, "Released bearer {ebi} unknown to UE");
                }
            }
            EsmCause::InvalidPtiValue if pti.is_assigned() => {
                if let Some(procedure) = self.ue.procedures.free_pdn_connectivity(pti) {
                    self.stop_nas_timer(procedure.base.timer);
                    if let Some(pdn_cid) = procedure.pdn_cid {
                        self.release_pdn(pdn_cid, true).await;
                    }
                }
                while self
                    .take_bearer_procedure(|p| p.base.pti == pti)
                    .is_some()
                {}
            }
            _ => (),
        }
        Ok(())
    }

    pub async fn send(self, pti: Pti, ebi: Ebi, cause: EsmCause) {
        self.send_esm_status(pti, ebi, cause).await
    }
}
