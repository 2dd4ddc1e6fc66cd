//! sap - routes each UE event to the EMM or ESM procedure that handles it
//!
//! ESM procedures never call into EMM.  They return an EsmResult and it is this module that
//! passes the outcome on to the attach procedure.  Likewise the common EMM procedures return a
//! CommonOutcome rather than resuming the attach themselves.

use super::{
    AttachProcedure, AuthenticationProcedure, BearerModificationProcedure,
    BearerResourceProcedure, CommonOutcome, DeactivationProcedure, DedicatedBearerProcedure,
    DefaultBearerProcedure, DetachProcedure, EsmResult, EsmStatusProcedure,
    IdentificationProcedure, NasTimer, PdnConnectivityProcedure, PdnDisconnectProcedure,
    SecurityModeControlProcedure, TimerKind, TrackingAreaUpdateProcedure, UeEvent, UeProcedure,
    UeSummary,
};
use crate::cause::EsmCause;
use crate::nas::{EsmMessage, UplinkEsm, UplinkNas};
use crate::s6a::S6aAnswer;
use crate::s11::S11Message;
use crate::timer::Expiry;
use crate::{CommonKind, EnbUeKey, HandlerApi, KeyUpdate};
use anyhow::Result;
use derive_deref::{Deref, DerefMut};
use slog::debug;

#[derive(Deref, DerefMut)]
pub struct Sap<'a, A: HandlerApi>(UeProcedure<'a, A>);

impl<'a, A: HandlerApi> Sap<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        Sap(inner)
    }

    pub async fn handle(mut self, event: UeEvent) -> Result<()> {
        match event {
            UeEvent::Uplink {
                ue_id,
                enb_ue_key,
                message,
            } => {
                self.log_received(message.name());
                self.uplink(ue_id, enb_ue_key, message).await
            }
            UeEvent::S6a(answer) => self.s6a_answer(answer).await,
            UeEvent::S11(message) => {
                self.log_received(message.name());
                self.s11_message(message).await
            }
            UeEvent::Timer(expiry) => self.timer_expiry(expiry).await,
            UeEvent::Query(responder) => {
                let _ = responder.send(UeSummary::from(&*self.ue)).await;
                Ok(())
            }
        }
    }

    async fn uplink(
        &mut self,
        ue_id: u32,
        enb_ue_key: Option<EnbUeKey>,
        message: UplinkNas,
    ) -> Result<()> {
        // The store has already been re-keyed.  Bring the context into line.
        if ue_id != self.ue.ue_id {
            debug!(self.logger, "UE id changed from {} to {ue_id}", self.ue.ue_id);
            self.ue.ue_id = ue_id;
        }
        if enb_ue_key.is_some() && enb_ue_key != self.ue.enb_ue_key {
            self.ue.enb_ue_key = enb_ue_key;
            self.update_ue_keys(ue_id, KeyUpdate::EnbUeKey(enb_ue_key))?;
        }

        match message {
            UplinkNas::AttachRequest(r) => AttachProcedure::new(self.reborrow()).request(r).await,
            UplinkNas::AttachComplete { esm_message } => {
                AttachProcedure::new(self.reborrow())
                    .complete(esm_message)
                    .await
            }
            UplinkNas::IdentityResponse { identity } => {
                let outcome = IdentificationProcedure::new(self.reborrow())
                    .response(identity)
                    .await?;
                self.common_outcome(outcome).await
            }
            UplinkNas::AuthenticationResponse { res } => {
                let outcome = AuthenticationProcedure::new(self.reborrow())
                    .response(&res)
                    .await?;
                self.common_outcome(outcome).await
            }
            UplinkNas::AuthenticationFailure { cause, auts } => {
                let outcome = AuthenticationProcedure::new(self.reborrow())
                    .failure(cause, auts)
                    .await?;
                self.common_outcome(outcome).await
            }
            UplinkNas::SecurityModeComplete { imeisv } => {
                let outcome = SecurityModeControlProcedure::new(self.reborrow())
                    .complete(imeisv)
                    .await?;
                self.common_outcome(outcome).await
            }
            UplinkNas::SecurityModeReject { cause } => {
                let outcome = SecurityModeControlProcedure::new(self.reborrow())
                    .reject(cause)
                    .await?;
                self.common_outcome(outcome).await
            }
            UplinkNas::TrackingAreaUpdateRequest(r) => {
                TrackingAreaUpdateProcedure::new(self.reborrow())
                    .request(r)
                    .await
            }
            UplinkNas::TrackingAreaUpdateComplete => {
                TrackingAreaUpdateProcedure::new(self.reborrow())
                    .complete()
                    .await
            }
            UplinkNas::DetachRequest(r) => DetachProcedure::new(self.reborrow()).request(r).await,
            UplinkNas::Esm(message) => {
                let result = self.uplink_esm(message).await?;
                self.esm_result(result).await
            }
        }
    }

    async fn uplink_esm(&mut self, message: EsmMessage) -> Result<EsmResult> {
        let EsmMessage { pti, ebi, body } = message;
        match body {
            UplinkEsm::PdnConnectivityRequest(r) => {
                PdnConnectivityProcedure::new(self.reborrow())
                    .request(pti, ebi, r, false)
                    .await
            }
            UplinkEsm::EsmInformationResponse { apn, pco } => {
                PdnConnectivityProcedure::new(self.reborrow())
                    .esm_information_response(pti, apn, pco)
                    .await
            }
            UplinkEsm::PdnDisconnectRequest { linked_ebi } => {
                PdnDisconnectProcedure::new(self.reborrow())
                    .request(pti, linked_ebi)
                    .await?;
                Ok(EsmResult::Done)
            }
            UplinkEsm::ActivateDefaultBearerAccept => {
                DefaultBearerProcedure::new(self.reborrow())
                    .accept(pti, ebi)
                    .await?;
                Ok(EsmResult::Done)
            }
            UplinkEsm::ActivateDefaultBearerReject { cause } => {
                DefaultBearerProcedure::new(self.reborrow())
                    .reject(pti, ebi, cause)
                    .await?;
                Ok(EsmResult::Done)
            }
            UplinkEsm::ActivateDedicatedBearerAccept => {
                DedicatedBearerProcedure::new(self.reborrow())
                    .accept(ebi)
                    .await?;
                Ok(EsmResult::Done)
            }
            UplinkEsm::ActivateDedicatedBearerReject { cause } => {
                DedicatedBearerProcedure::new(self.reborrow())
                    .reject(ebi, cause)
                    .await?;
                Ok(EsmResult::Done)
            }
            UplinkEsm::ModifyBearerAccept => {
                BearerModificationProcedure::new(self.reborrow())
                    .accept(ebi)
                    .await?;
                Ok(EsmResult::Done)
            }
            UplinkEsm::ModifyBearerReject { cause } => {
                BearerModificationProcedure::new(self.reborrow())
                    .reject(ebi, cause)
                    .await?;
                Ok(EsmResult::Done)
            }
            UplinkEsm::DeactivateBearerAccept => {
                DeactivationProcedure::new(self.reborrow())
                    .accept(ebi)
                    .await?;
                Ok(EsmResult::Done)
            }
            UplinkEsm::BearerResourceAllocationRequest {
                linked_ebi,
                tad,
                qos,
            } => {
                BearerResourceProcedure::new(self.reborrow())
                    .allocation_request(pti, linked_ebi, tad, qos)
                    .await?;
                Ok(EsmResult::Done)
            }
            UplinkEsm::BearerResourceModificationRequest { ebi, tad, qos } => {
                BearerResourceProcedure::new(self.reborrow())
                    .modification_request(pti, ebi, tad, qos)
                    .await?;
                Ok(EsmResult::Done)
            }
            UplinkEsm::EsmStatus { cause } => {
                EsmStatusProcedure::new(self.reborrow())
                    .received(pti, ebi, cause)
                    .await?;
                Ok(EsmResult::Done)
            }
            UplinkEsm::Unknown { message_type } => {
                debug!(self.logger, "Unknown ESM message type {message_type}");
                EsmStatusProcedure::new(self.reborrow())
                    .send(pti, ebi, EsmCause::MessageTypeNonExistent)
                    .await;
                Ok(EsmResult::Done)
            }
        }
    }

    async fn s6a_answer(&mut self, answer: S6aAnswer) -> Result<()> {
        match answer {
            S6aAnswer::AuthenticationInformation(result) => {
                self.log_received("S6a AuthenticationInformationAnswer");
                let outcome = AuthenticationProcedure::new(self.reborrow())
                    .vectors_received(result)
                    .await?;
                self.common_outcome(outcome).await
            }
            S6aAnswer::UpdateLocation(result) => {
                self.log_received("S6a UpdateLocationAnswer");
                let result = PdnConnectivityProcedure::new(self.reborrow())
                    .subscription_received(result)
                    .await?;
                self.esm_result(result).await
            }
        }
    }

    async fn s11_message(&mut self, message: S11Message) -> Result<()> {
        let result = match message {
            S11Message::CreateSessionResponse { pdn_cid, result } => {
                PdnConnectivityProcedure::new(self.reborrow())
                    .session_created(pdn_cid, result)
                    .await?
            }
            S11Message::DeleteSessionResponse { pdn_cid, cause } => {
                PdnDisconnectProcedure::new(self.reborrow())
                    .session_deleted(pdn_cid, cause)
                    .await?;
                EsmResult::Done
            }
            S11Message::CreateBearerRequest {
                pti,
                linked_ebi,
                qos,
                tft,
                s1u_sgw,
            } => {
                DedicatedBearerProcedure::new(self.reborrow())
                    .create_bearer_request(pti, linked_ebi, qos, tft, s1u_sgw)
                    .await?;
                EsmResult::Done
            }
            S11Message::UpdateBearerRequest {
                pti,
                ebi,
                qos,
                tft,
                apn_ambr,
            } => {
                BearerModificationProcedure::new(self.reborrow())
                    .update_bearer_request(pti, ebi, qos, tft, apn_ambr)
                    .await?;
                EsmResult::Done
            }
            S11Message::DeleteBearerRequest { pti, ebi, cause } => {
                DeactivationProcedure::new(self.reborrow())
                    .delete_bearer_request(pti, ebi, cause)
                    .await?;
                EsmResult::Done
            }
            S11Message::BearerResourceFailureIndication {
                pti,
                linked_ebi,
                cause,
            } => {
                BearerResourceProcedure::new(self.reborrow())
                    .failure_indication(pti, linked_ebi, cause)
                    .await?;
                EsmResult::Done
            }
        };
        self.esm_result(result).await
    }

    async fn timer_expiry(&mut self, expiry: Expiry<NasTimer>) -> Result<()> {
        let Expiry { id, arg: timer } = expiry;
        debug!(self.logger, "{:?} expired", timer.kind);
        match timer.kind {
            TimerKind::T3450 => {
                if self.ue.procedures.tau().is_some() {
                    TrackingAreaUpdateProcedure::new(self.reborrow())
                        .t3450_expiry(id)
                        .await
                } else {
                    AttachProcedure::new(self.reborrow()).t3450_expiry(id).await
                }
            }
            TimerKind::T3460 => {
                let outcome = if self.ue.procedures.common.as_ref().is_some_and(|p| {
                    matches!(p.kind, CommonKind::SecurityModeControl { .. })
                }) {
                    SecurityModeControlProcedure::new(self.reborrow())
                        .t3460_expiry(id)
                        .await?
                } else {
                    AuthenticationProcedure::new(self.reborrow())
                        .t3460_expiry(id)
                        .await?
                };
                self.common_outcome(outcome).await
            }
            TimerKind::T3470 => {
                let outcome = IdentificationProcedure::new(self.reborrow())
                    .t3470_expiry(id)
                    .await?;
                self.common_outcome(outcome).await
            }
            TimerKind::T3485 => {
                let result = if timer.pti.is_assigned()
                    && self.ue.procedures.pdn_connectivity(timer.pti).is_some()
                {
                    DefaultBearerProcedure::new(self.reborrow())
                        .t3485_expiry(id, timer)
                        .await?
                } else {
                    DedicatedBearerProcedure::new(self.reborrow())
                        .t3485_expiry(id, timer)
                        .await?;
                    EsmResult::Done
                };
                self.esm_result(result).await
            }
            TimerKind::T3489 => {
                let result = PdnConnectivityProcedure::new(self.reborrow())
                    .t3489_expiry(id, timer)
                    .await?;
                self.esm_result(result).await
            }
            TimerKind::T3495 => {
                DeactivationProcedure::new(self.reborrow())
                    .t3495_expiry(id, timer)
                    .await
            }
        }
    }

    async fn common_outcome(&mut self, outcome: CommonOutcome) -> Result<()> {
        match outcome {
            CommonOutcome::Pending => Ok(()),
            CommonOutcome::Success(continuation) => {
                AttachProcedure::new(self.reborrow())
                    .resume(continuation)
                    .await
            }
            CommonOutcome::Failed(_) | CommonOutcome::Rejected => {
                AttachProcedure::new(self.reborrow())
                    .common_procedure_failed(outcome)
                    .await
            }
        }
    }

    async fn esm_result(&mut self, result: EsmResult) -> Result<()> {
        match result {
            EsmResult::Done => Ok(()),
            result => {
                AttachProcedure::new(self.reborrow())
                    .esm_result(result)
                    .await
            }
        }
    }
}
