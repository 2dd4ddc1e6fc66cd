//! dedicated_bearer - network initiated dedicated EPS bearer activation (TS 24.301, 6.4.2)

use super::{NasTimer, Retransmission, TimerKind, UeProcedure};
use crate::cause::{EsmCause, GtpCause};
use crate::nas::DownlinkEsm;
use crate::s11::S11Request;
use crate::timer::TimerId;
use crate::tft::{self, TftOperation};
use crate::{
    BearerContext, BearerContextProc, BearerProcKind, BearerQos, BearerState, Ebi, Fteid,
    HandlerApi, Pti, Tft,
};
use anyhow::Result;
use derive_deref::{Deref, DerefMut};
use slog::{info, warn};

const T3485_MAX_EXPIRIES: u32 = 5;

#[derive(Deref, DerefMut)]
pub struct DedicatedBearerProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

fn check_request(qos: &BearerQos, tft: &Tft) -> Result<(), EsmCause> {
    qos.validate()?;
    if tft.operation != TftOperation::CreateNew {
        return Err(EsmCause::SemanticErrorInTftOperation);
    }
    tft::verify(tft, None).map_err(|e| e.cause())
}

impl<'a, A: HandlerApi> DedicatedBearerProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        DedicatedBearerProcedure(inner)
    }

    async fn respond(&self, sgw: Option<Fteid>, ebi: Ebi, cause: GtpCause) {
        let Some(sgw) = sgw else {
            warn!(self.logger, "No gateway to answer for bearer {ebi}");
            return;
        };
        if let Err(e) = self
            .s11_request(S11Request::CreateBearerResponse { sgw, ebi, cause })
            .await
        {
            warn!(self.logger, "Failed to send create bearer response - {e}");
        }
    }

    pub async fn create_bearer_request(
        mut self,
        pti: Pti,
        linked_ebi: Ebi,
        qos: BearerQos,
        tft: Tft,
        s1u_sgw: Fteid,
    ) -> Result<()> {
        let Some(pdn) = self.ue.pdn_by_default_ebi(linked_ebi) else {
            warn!(self.logger, "Create bearer request for unknown default bearer {linked_ebi}");
            return Ok(());
        };
        let (pdn_cid, sgw) = (pdn.cid, pdn.sgw);

        if let Err(cause) = check_request(&qos, &tft) {
            warn!(self.logger, "Refusing dedicated bearer, cause {cause:?}");
            self.respond(sgw, Ebi::UNASSIGNED, cause.into()).await;
            return Ok(());
        }
        let Some(ebi) = self.ue.free_ebi() else {
            self.respond(sgw, Ebi::UNASSIGNED, GtpCause::NoResourcesAvailable)
                .await;
            return Ok(());
        };

        // The gateway answering a UE's bearer resource allocation.
        if pti.is_assigned() {
            self.take_bearer_procedure(|p| {
                p.base.pti == pti && p.kind == BearerProcKind::ResourceAllocation
            });
        }

        let message = DownlinkEsm::ActivateDedicatedBearerRequest {
            pti,
            ebi,
            linked_ebi,
            qos,
            tft: tft.clone(),
        };
        let mut procedure = BearerContextProc::new(
            pti,
            ebi,
            linked_ebi,
            pdn_cid,
            BearerProcKind::DedicatedActivation,
        );
        procedure.qos = Some(qos);
        procedure.tft = Some(tft.clone());
        procedure.saegw = sgw;
        procedure.base.last_message = Some(message.clone());
        if let Err(e) = self.ue.procedures.create_bearer_context(procedure) {
            warn!(self.logger, "Dedicated bearer activation collides - {e}");
            self.respond(sgw, Ebi::UNASSIGNED, GtpCause::TemporarilyRejected)
                .await;
            return Ok(());
        }

        let mut bearer = BearerContext::new(ebi, pdn_cid, qos);
        bearer.set_state(BearerState::ActivePending)?;
        bearer.tft = tft::apply(&tft, None);
        bearer.s1u_sgw = Some(s1u_sgw);
        if let Some(pdn) = self.ue.pdn_contexts.get_mut(&pdn_cid) {
            pdn.bearers.insert(ebi, bearer);
        }

        self.send_esm(message).await;
        let timer = self.start_nas_timer(TimerKind::T3485, pti, ebi);
        if let Some(procedure) = self.ue.procedures.bearer_context(pti, ebi) {
            procedure.base.timer = Some(timer);
        }
        info!(self.logger, "Activating dedicated bearer {ebi} on PDN {pdn_cid}");
        Ok(())
    }

    fn take_activation(&mut self, ebi: Ebi) -> Option<BearerContextProc> {
        self.take_bearer_procedure(|p| {
            p.ebi == ebi && p.kind == BearerProcKind::DedicatedActivation
        })
    }

    pub async fn accept(mut self, ebi: Ebi) -> Result<()> {
        let Some(procedure) = self.take_activation(ebi) else {
            warn!(self.logger, "Dedicated bearer accept for EBI {ebi} not expected");
            self.send_esm_status(Pti::UNASSIGNED, ebi, EsmCause::MessageTypeNotCompatible)
                .await;
            return Ok(());
        };
        if let Some(bearer) = self.ue.bearer_mut(ebi) {
            bearer.set_state(BearerState::Active)?;
        }
        info!(self.logger, "Dedicated bearer {ebi} active");
        self.respond(procedure.saegw, ebi, GtpCause::RequestAccepted)
            .await;
        Ok(())
    }

    pub async fn reject(mut self, ebi: Ebi, cause: EsmCause) -> Result<()> {
        let Some(procedure) = self.take_activation(ebi) else {
            warn!(self.logger, "Dedicated bearer reject for EBI {ebi} not expected");
            self.send_esm_status(Pti::UNASSIGNED, ebi, EsmCause::MessageTypeNotCompatible)
                .await;
            return Ok(());
        };
        warn!(self.logger, "UE rejected dedicated bearer {ebi}, cause {cause:?}");
        self.ue.remove_bearer(ebi);
        self.respond(procedure.saegw, ebi, cause.into()).await;
        Ok(())
    }

    pub async fn t3485_expiry(mut self, id: TimerId, timer: NasTimer) -> Result<()> {
        if self.retransmit_esm(id, timer, T3485_MAX_EXPIRIES).await != Retransmission::Exhausted {
            return Ok(());
        }
        let Some(procedure) = self.take_activation(timer.ebi) else {
            return Ok(());
        };
        self.ue.remove_bearer(timer.ebi);
        self.respond(
            procedure.saegw,
            timer.ebi,
            EsmCause::InsufficientResources.into(),
        )
        .await;
        Ok(())
    }
}
