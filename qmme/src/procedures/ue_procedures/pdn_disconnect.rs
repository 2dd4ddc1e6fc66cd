//! pdn_disconnect - UE requested PDN disconnect (TS 24.301, 6.5.2)

use super::{DeactivationProcedure, UeProcedure};
use crate::cause::{EsmCause, GtpCause};
use crate::nas::DownlinkEsm;
use crate::s11::S11Request;
use crate::{BearerContextProc, BearerProcKind, Ebi, HandlerApi, PdnCid, Pti, UeContext};
use anyhow::Result;
use derive_deref::{Deref, DerefMut};
use slog::{debug, info, warn};

#[derive(Deref, DerefMut)]
pub struct PdnDisconnectProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

fn check_request(ue: &UeContext, pti: Pti, linked_ebi: Ebi) -> Result<PdnCid, EsmCause> {
    if !pti.is_valid() {
        return Err(EsmCause::InvalidPtiValue);
    }
    let Some(pdn) = ue.pdn_by_default_ebi(linked_ebi) else {
        return Err(EsmCause::PdnConnectionDoesNotExist);
    };
    if ue.pdn_contexts.len() <= 1 {
        return Err(EsmCause::LastPdnDisconnectionNotAllowed);
    }
    Ok(pdn.cid)
}

impl<'a, A: HandlerApi> PdnDisconnectProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        PdnDisconnectProcedure(inner)
    }

    pub async fn request(mut self, pti: Pti, linked_ebi: Ebi) -> Result<()> {
        let pdn_cid = match check_request(&*self.ue, pti, linked_ebi) {
            Ok(pdn_cid) => pdn_cid,
            Err(cause) => {
                warn!(self.logger, "Rejecting PDN disconnect, cause {cause:?}");
                self.send_esm(DownlinkEsm::PdnDisconnectReject { pti, cause })
                    .await;
                return Ok(());
            }
        };
        if self.ue.procedures.pti_in_use(pti) {
            debug!(self.logger, "Ignoring retransmitted PDN disconnect request, PTI {pti}");
            return Ok(());
        }

        let session = self
            .ue
            .pdn_contexts
            .get(&pdn_cid)
            .and_then(|pdn| pdn.sgw.map(|sgw| (sgw, pdn.local_teid)));
        let Some((sgw, local_teid)) = session else {
            // Nothing at the gateway to tear down.
            return self.deactivate(pti, linked_ebi).await;
        };

        let mut procedure = BearerContextProc::new(
            pti,
            linked_ebi,
            linked_ebi,
            pdn_cid,
            BearerProcKind::PdnDisconnect,
        );
        procedure.saegw = Some(sgw);
        if let Err(e) = self.ue.procedures.create_bearer_context(procedure) {
            warn!(self.logger, "PDN disconnect collides - {e}");
            self.send_esm(DownlinkEsm::PdnDisconnectReject {
                pti,
                cause: EsmCause::RequestRejectedUnspecified,
            })
            .await;
            return Ok(());
        }

        let request = S11Request::DeleteSession {
            pdn_cid,
            linked_ebi,
            local_teid,
            sgw,
        };
        if let Err(e) = self.s11_request(request).await {
            warn!(self.logger, "Failed to delete session - {e}");
            self.ue.procedures.free_bearer_context(pti, linked_ebi);
            return self.deactivate(pti, linked_ebi).await;
        }
        info!(self.logger, "Disconnecting PDN {pdn_cid}");
        Ok(())
    }

    /// The gateway has deleted the session.  Deactivate the default bearer with the UE.
    pub async fn session_deleted(mut self, pdn_cid: PdnCid, cause: GtpCause) -> Result<()> {
        let Some(procedure) = self.take_bearer_procedure(|p| {
            p.pdn_cid == pdn_cid && p.kind == BearerProcKind::PdnDisconnect
        }) else {
            debug!(self.logger, "Delete session response for PDN {pdn_cid} with no disconnect");
            return Ok(());
        };
        if !cause.is_accepted() {
            warn!(self.logger, "Gateway failed to delete session, cause {cause:?}");
        }
        self.deactivate(procedure.base.pti, procedure.linked_ebi)
            .await
    }

    async fn deactivate(&mut self, pti: Pti, linked_ebi: Ebi) -> Result<()> {
        DeactivationProcedure::new(self.reborrow())
            .deactivate(
                pti,
                linked_ebi,
                EsmCause::RegularDeactivation,
                BearerProcKind::Deactivation {
                    gateway_initiated: false,
                },
            )
            .await
    }
}
