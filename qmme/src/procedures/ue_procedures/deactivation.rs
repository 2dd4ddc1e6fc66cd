//! deactivation - EPS bearer context deactivation (TS 24.301, 6.4.4)
//!
//! The bearer is marked INACTIVE_PENDING as soon as the request goes out.  Whether the UE
//! accepts or T3495 gives up, the bearer is released; if it was a default bearer the whole
//! PDN connection goes with it.

use super::{NasTimer, Retransmission, TimerKind, UeProcedure};
use crate::cause::{EsmCause, GtpCause};
use crate::nas::DownlinkEsm;
use crate::s11::S11Request;
use crate::timer::TimerId;
use crate::{BearerContextProc, BearerProcKind, BearerState, Ebi, Fteid, HandlerApi, Pti};
use anyhow::Result;
use derive_deref::{Deref, DerefMut};
use slog::{debug, info, warn};

const T3495_MAX_EXPIRIES: u32 = 5;

#[derive(Deref, DerefMut)]
pub struct DeactivationProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

fn is_deactivation(kind: BearerProcKind) -> bool {
    matches!(kind, BearerProcKind::Deactivation { .. })
}

impl<'a, A: HandlerApi> DeactivationProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        DeactivationProcedure(inner)
    }

    /// The gateway wants bearer `ebi` gone.
    pub async fn delete_bearer_request(
        mut self,
        pti: Pti,
        ebi: Ebi,
        cause: Option<EsmCause>,
    ) -> Result<()> {
        if pti.is_assigned() {
            self.take_bearer_procedure(|p| {
                p.base.pti == pti
                    && matches!(
                        p.kind,
                        BearerProcKind::ResourceAllocation | BearerProcKind::ResourceModification
                    )
            });
        }
        self.deactivate(
            pti,
            ebi,
            cause.unwrap_or(EsmCause::RegularDeactivation),
            BearerProcKind::Deactivation {
                gateway_initiated: true,
            },
        )
        .await
    }

    /// Send DEACTIVATE EPS BEARER CONTEXT REQUEST for bearer `ebi`.
    pub async fn deactivate(
        mut self,
        pti: Pti,
        ebi: Ebi,
        cause: EsmCause,
        kind: BearerProcKind,
    ) -> Result<()> {
        let Some(pdn) = self.ue.pdn_of_bearer(ebi) else {
            warn!(self.logger, "Deactivation of unknown bearer {ebi}");
            return Ok(());
        };
        let (pdn_cid, linked_ebi, sgw) = (pdn.cid, pdn.default_ebi, pdn.sgw);
        if let Some(bearer) = self.ue.bearer_mut(ebi) {
            bearer.set_state(BearerState::InactivePending)?;
        }

        // Whatever else was in progress on this bearer is overtaken.
        while let Some(other) = self.take_bearer_procedure(|p| p.ebi == ebi) {
            debug!(self.logger, "Deactivation of {ebi} overtakes {:?}", other.kind);
        }

        let message = DownlinkEsm::DeactivateBearerRequest { pti, ebi, cause };
        let mut procedure = BearerContextProc::new(pti, ebi, linked_ebi, pdn_cid, kind);
        procedure.saegw = sgw;
        procedure.base.last_message = Some(message.clone());
        let timer = self.start_nas_timer(TimerKind::T3495, pti, ebi);
        procedure.base.timer = Some(timer);
        if let Err(e) = self.ue.procedures.create_bearer_context(procedure.clone()) {
            warn!(self.logger, "Cannot track deactivation of {ebi} - {e}, releasing locally");
            self.stop_nas_timer(Some(timer));
            self.finish(procedure).await;
            return Ok(());
        }

        self.send_esm(message).await;
        info!(self.logger, "Deactivating bearer {ebi}, cause {cause:?}");
        Ok(())
    }

    pub async fn accept(mut self, ebi: Ebi) -> Result<()> {
        let Some(procedure) =
            self.take_bearer_procedure(|p| p.ebi == ebi && is_deactivation(p.kind))
        else {
            warn!(self.logger, "Deactivate bearer accept for EBI {ebi} not expected");
            self.send_esm_status(Pti::UNASSIGNED, ebi, EsmCause::MessageTypeNotCompatible)
                .await;
            return Ok(());
        };
        self.finish(procedure).await;
        Ok(())
    }

    pub async fn t3495_expiry(mut self, id: TimerId, timer: NasTimer) -> Result<()> {
        if self.retransmit_esm(id, timer, T3495_MAX_EXPIRIES).await != Retransmission::Exhausted {
            return Ok(());
        }
        let Some(procedure) =
            self.take_bearer_procedure(|p| p.ebi == timer.ebi && is_deactivation(p.kind))
        else {
            return Ok(());
        };
        warn!(self.logger, "UE did not answer deactivation of {}, releasing locally", timer.ebi);
        self.finish(procedure).await;
        Ok(())
    }

    // Release the bearer, or the PDN connection if it is the default bearer.
    async fn finish(&mut self, procedure: BearerContextProc) {
        let ebi = procedure.ebi;
        if ebi == procedure.linked_ebi {
            // The gateway has already deleted the session, or is being asked to.
            self.release_pdn(procedure.pdn_cid, false).await;
        } else if self.ue.remove_bearer(ebi).is_some() {
            info!(self.logger, "Released bearer {ebi}");
        }
        if let BearerProcKind::Deactivation {
            gateway_initiated: true,
        } = procedure.kind
        {
            self.answer_gateway(procedure.saegw, ebi, GtpCause::RequestAccepted)
                .await;
        }
    }

    async fn answer_gateway(&self, sgw: Option<Fteid>, ebi: Ebi, cause: GtpCause) {
        let Some(sgw) = sgw else {
            debug!(self.logger, "No gateway to answer for bearer {ebi}");
            return;
        };
        if let Err(e) = self
            .s11_request(S11Request::DeleteBearerResponse { sgw, ebi, cause })
            .await
        {
            warn!(self.logger, "Failed to send delete bearer response - {e}");
        }
    }
}
