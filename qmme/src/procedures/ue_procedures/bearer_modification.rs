//! bearer_modification - network initiated EPS bearer context modification (TS 24.301, 6.4.3)

use super::UeProcedure;
use crate::cause::{EsmCause, GtpCause};
use crate::nas::DownlinkEsm;
use crate::s11::S11Request;
use crate::tft;
use crate::{
    Ambr, BearerContextProc, BearerProcKind, BearerQos, BearerState, Ebi, Fteid, HandlerApi,
    PacketFilter, Pti, Tft,
};
use anyhow::Result;
use derive_deref::{Deref, DerefMut};
use slog::{info, warn};

#[derive(Deref, DerefMut)]
pub struct BearerModificationProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

fn check_request(
    qos: Option<&BearerQos>,
    tft: Option<&Tft>,
    installed: Option<&[PacketFilter]>,
) -> Result<(), EsmCause> {
    if let Some(qos) = qos {
        qos.validate()?;
    }
    if let Some(tft) = tft {
        tft::verify(tft, installed).map_err(|e| e.cause())?;
    }
    Ok(())
}

impl<'a, A: HandlerApi> BearerModificationProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        BearerModificationProcedure(inner)
    }

    async fn respond(&self, sgw: Option<Fteid>, ebi: Ebi, cause: GtpCause) {
        let Some(sgw) = sgw else {
            warn!(self.logger, "No gateway to answer for bearer {ebi}");
            return;
        };
        if let Err(e) = self
            .s11_request(S11Request::UpdateBearerResponse { sgw, ebi, cause })
            .await
        {
            warn!(self.logger, "Failed to send update bearer response - {e}");
        }
    }

    /// Start modifying bearer `ebi` at the gateway's request.  The UE has no timer on this
    /// transaction and the bearer stays MODIFY_PENDING until it answers.
    pub async fn update_bearer_request(
        mut self,
        pti: Pti,
        ebi: Ebi,
        qos: Option<BearerQos>,
        tft: Option<Tft>,
        apn_ambr: Option<Ambr>,
    ) -> Result<()> {
        let Some(pdn) = self.ue.pdn_of_bearer(ebi) else {
            warn!(self.logger, "Update bearer request for unknown bearer {ebi}");
            return Ok(());
        };
        let (pdn_cid, linked_ebi, sgw) = (pdn.cid, pdn.default_ebi, pdn.sgw);
        let installed = pdn.bearers.get(&ebi).and_then(|b| b.tft.clone());

        if let Err(cause) = check_request(qos.as_ref(), tft.as_ref(), installed.as_deref()) {
            warn!(self.logger, "Refusing bearer modification, cause {cause:?}");
            self.respond(sgw, ebi, cause.into()).await;
            return Ok(());
        }

        // The gateway answering a UE's bearer resource modification.
        if pti.is_assigned() {
            self.take_bearer_procedure(|p| {
                p.base.pti == pti && p.kind == BearerProcKind::ResourceModification
            });
        }

        let message = DownlinkEsm::ModifyBearerRequest {
            pti,
            ebi,
            qos,
            tft: tft.clone(),
            apn_ambr,
        };
        let mut procedure =
            BearerContextProc::new(pti, ebi, linked_ebi, pdn_cid, BearerProcKind::Modification);
        procedure.qos = qos;
        procedure.tft = tft;
        procedure.saegw = sgw;
        procedure.base.last_message = Some(message.clone());
        if let Err(e) = self.ue.procedures.create_bearer_context(procedure) {
            warn!(self.logger, "Bearer modification collides - {e}");
            self.respond(sgw, ebi, GtpCause::TemporarilyRejected).await;
            return Ok(());
        }

        let pending = match self.ue.bearer_mut(ebi) {
            Some(bearer) => bearer.set_state(BearerState::ModifyPending),
            None => Ok(()),
        };
        if let Err(e) = pending {
            warn!(self.logger, "{e}");
            self.ue.procedures.free_bearer_context(pti, ebi);
            self.respond(sgw, ebi, GtpCause::TemporarilyRejected).await;
            return Ok(());
        }

        self.send_esm(message).await;
        info!(self.logger, "Modifying bearer {ebi}");
        Ok(())
    }

    fn take_modification(&mut self, ebi: Ebi) -> Option<BearerContextProc> {
        self.take_bearer_procedure(|p| p.ebi == ebi && p.kind == BearerProcKind::Modification)
    }

    pub async fn accept(mut self, ebi: Ebi) -> Result<()> {
        let Some(procedure) = self.take_modification(ebi) else {
            warn!(self.logger, "Modify bearer accept for EBI {ebi} not expected");
            self.send_esm_status(Pti::UNASSIGNED, ebi, EsmCause::MessageTypeNotCompatible)
                .await;
            return Ok(());
        };
        let apn_ambr = match procedure.base.last_message {
            Some(DownlinkEsm::ModifyBearerRequest { apn_ambr, .. }) => apn_ambr,
            _ => None,
        };

        if let Some(bearer) = self.ue.bearer_mut(ebi) {
            if let Some(qos) = procedure.qos {
                bearer.qos = qos;
            }
            if let Some(tft) = &procedure.tft {
                bearer.tft = tft::apply(tft, bearer.tft.as_deref());
            }
            bearer.set_state(BearerState::Active)?;
        }
        if let (Some(ambr), Some(pdn)) = (
            apn_ambr,
            self.ue.pdn_contexts.get_mut(&procedure.pdn_cid),
        ) {
            pdn.ambr = ambr;
        }
        info!(self.logger, "Bearer {ebi} modified");
        self.respond(procedure.saegw, ebi, GtpCause::RequestAccepted)
            .await;
        Ok(())
    }

    pub async fn reject(mut self, ebi: Ebi, cause: EsmCause) -> Result<()> {
        let Some(procedure) = self.take_modification(ebi) else {
            warn!(self.logger, "Modify bearer reject for EBI {ebi} not expected");
            self.send_esm_status(Pti::UNASSIGNED, ebi, EsmCause::MessageTypeNotCompatible)
                .await;
            return Ok(());
        };
        warn!(self.logger, "UE rejected modification of bearer {ebi}, cause {cause:?}");
        if let Some(bearer) = self.ue.bearer_mut(ebi) {
            bearer.set_state(BearerState::Active)?;
        }
        self.respond(procedure.saegw, ebi, cause.into()).await;
        Ok(())
    }
}
