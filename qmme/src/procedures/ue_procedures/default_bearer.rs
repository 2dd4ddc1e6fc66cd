//! default_bearer - default EPS bearer context activation (TS 24.301, 6.4.1)

use super::{EsmResult, NasTimer, Retransmission, TimerKind, UeProcedure};
use crate::cause::EsmCause;
use crate::nas::DownlinkEsm;
use crate::timer::TimerId;
use crate::{BearerState, Ebi, HandlerApi, PdnStage, Pti};
use anyhow::{Result, anyhow};
use derive_deref::{Deref, DerefMut};
use slog::{debug, info, warn};

// A default bearer request outside of attach is sent at most three times.
const T3485_MAX_EXPIRIES: u32 = 3;

#[derive(Deref, DerefMut)]
pub struct DefaultBearerProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

impl<'a, A: HandlerApi> DefaultBearerProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        DefaultBearerProcedure(inner)
    }

    /// Offer the UE the default bearer of the PDN connection set up by transaction `pti`.
    /// During attach the request is handed back to go in ATTACH ACCEPT, and T3450 guards it
    /// instead of T3485.
    pub async fn activate(mut self, pti: Pti) -> Result<EsmResult> {
        let procedure = self
            .ue
            .procedures
            .pdn_connectivity(pti)
            .ok_or_else(|| anyhow!("No PDN connectivity procedure for PTI {pti}"))?;
        let initial_attach = procedure.initial_attach;
        let pdn_cid = procedure
            .pdn_cid
            .ok_or_else(|| anyhow!("No PDN for PTI {pti}"))?;
        let pdn = self
            .ue
            .pdn_contexts
            .get(&pdn_cid)
            .ok_or_else(|| anyhow!("PDN {pdn_cid} missing"))?;
        let bearer = pdn
            .default_bearer()
            .ok_or_else(|| anyhow!("PDN {pdn_cid} has no default bearer"))?;
        let ebi = pdn.default_ebi;
        let message = DownlinkEsm::ActivateDefaultBearerRequest {
            pti,
            ebi,
            qos: bearer.qos,
            apn: pdn.apn.clone(),
            pdn_address: pdn.pdn_address.unwrap_or_default(),
            apn_ambr: pdn.ambr,
            pco: pdn.pco.clone(),
        };

        if let Some(procedure) = self.ue.procedures.pdn_connectivity(pti) {
            procedure.stage = PdnStage::DefaultBearer;
            procedure.base.last_message = Some(message.clone());
        }
        if initial_attach {
            return Ok(EsmResult::AttachAccept(message));
        }

        self.send_esm(message).await;
        let timer = self.start_nas_timer(TimerKind::T3485, pti, ebi);
        if let Some(procedure) = self.ue.procedures.pdn_connectivity(pti) {
            procedure.base.timer = Some(timer);
        }
        Ok(EsmResult::Done)
    }

    // The PTI of the transaction waiting for default bearer `ebi` to be accepted.
    fn waiting_transaction(&mut self, pti: Pti, ebi: Ebi) -> Option<Pti> {
        self.ue
            .procedures
            .pdn_connectivity(pti)
            .filter(|p| p.stage == PdnStage::DefaultBearer && p.default_ebi == ebi)
            .map(|p| p.base.pti)
    }

    /// Returns whether the bearer was activated, as opposed to the accept being discarded.
    pub async fn accept(mut self, pti: Pti, ebi: Ebi) -> Result<bool> {
        let Some(pti) = self.waiting_transaction(pti, ebi) else {
            debug!(self.logger, "Default bearer accept for EBI {ebi} not expected");
            return Ok(false);
        };
        if let Some(procedure) = self.ue.procedures.free_pdn_connectivity(pti) {
            self.stop_nas_timer(procedure.base.timer);
        }
        let Some(bearer) = self.ue.bearer_mut(ebi) else {
            warn!(self.logger, "Default bearer {ebi} vanished");
            return Ok(false);
        };
        bearer.set_state(BearerState::Active)?;
        info!(self.logger, "Default bearer {ebi} active");
        Ok(true)
    }

    /// Returns whether the reject was acted on, as opposed to discarded.
    pub async fn reject(mut self, pti: Pti, ebi: Ebi, cause: EsmCause) -> Result<bool> {
        let Some(pti) = self.waiting_transaction(pti, ebi) else {
            debug!(self.logger, "Default bearer reject for EBI {ebi} not expected");
            return Ok(false);
        };
        if let Some(procedure) = self.ue.procedures.free_pdn_connectivity(pti) {
            self.stop_nas_timer(procedure.base.timer);
        }
        warn!(self.logger, "UE rejected default bearer {ebi}, cause {cause:?}");
        if let Some(pdn_cid) = self.ue.pdn_of_bearer(ebi).map(|pdn| pdn.cid) {
            self.release_pdn(pdn_cid, true).await;
        }
        Ok(true)
    }

    pub async fn t3485_expiry(mut self, id: TimerId, timer: NasTimer) -> Result<EsmResult> {
        match self.retransmit_esm(id, timer, T3485_MAX_EXPIRIES).await {
            Retransmission::Stale | Retransmission::Resent => (),
            Retransmission::Exhausted => {
                if let Some(procedure) = self.ue.procedures.free_pdn_connectivity(timer.pti) {
                    if let Some(pdn_cid) = procedure.pdn_cid {
                        self.release_pdn(pdn_cid, true).await;
                    }
                }
                self.send_esm(DownlinkEsm::PdnConnectivityReject {
                    pti: timer.pti,
                    cause: EsmCause::EsmInformationNotReceived,
                })
                .await;
            }
        }
        Ok(EsmResult::Done)
    }
}
