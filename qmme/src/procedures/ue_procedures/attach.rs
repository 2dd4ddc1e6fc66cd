//! attach - EPS attach (TS 24.301, 5.5.1)
//!
//! The attach runs identification, authentication and security mode control as needed, then
//! hands the PDN connectivity request in the ATTACH REQUEST to ESM.  ESM answers with the
//! default bearer request that rides in ATTACH ACCEPT, or with the reject for ATTACH REJECT.

use super::{
    AuthenticationProcedure, CommonOutcome, DefaultBearerProcedure, DetachProcedure, EsmResult,
    IdentificationProcedure, PdnConnectivityProcedure, SecurityModeControlProcedure, TimerKind,
    UeProcedure,
};
use crate::cause::EmmCause;
use crate::nas::{
    AttachRequest, DownlinkEsm, DownlinkNas, EmmIndication, EpsAttachType, EsmMessage,
    IdentityType, UplinkEsm,
};
use crate::timer::TimerId;
use crate::{
    AttachProc, CommonKind, Continuation, Ebi, EmmState, HandlerApi, KeyUpdate, Pti,
    SpecificProcedure, Verifiable,
};
use anyhow::{Result, bail};
use derive_deref::{Deref, DerefMut};
use slog::{debug, info, warn};

// The fifth expiry of T3450 aborts the procedure.
const T3450_MAX_EXPIRIES: u32 = 5;

#[derive(Deref, DerefMut)]
pub struct AttachProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

// How ESM dealt with the message carried in ATTACH COMPLETE.
enum CompleteOutcome {
    Accepted,
    Rejected,
    Discarded,
}

// Which attach parameters the network compares when an ATTACH REQUEST repeats.  The ESM
// container is not among them.
fn parameters_changed(old: &AttachRequest, new: &AttachRequest) -> bool {
    old.attach_type != new.attach_type
        || old.ksi != new.ksi
        || old.native_ksi != new.native_ksi
        || old.guti != new.guti
        || old.native_guti != new.native_guti
        || old.imsi != new.imsi
        || old.imei != new.imei
        || old.last_visited_tai != new.last_visited_tai
        || old.originating_tai != new.originating_tai
        || old.originating_ecgi != new.originating_ecgi
        || old.ue_network_capability != new.ue_network_capability
        || old.ms_network_capability != new.ms_network_capability
}

impl<'a, A: HandlerApi> AttachProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        AttachProcedure(inner)
    }

    pub async fn request(mut self, r: AttachRequest) -> Result<()> {
        if r.attach_type == EpsAttachType::Emergency && !self.config().emergency_attach_supported {
            warn!(self.logger, "Emergency attach not supported");
            self.send_nas(DownlinkNas::AttachReject {
                cause: EmmCause::RequestedServiceOptionNotAuthorized,
                esm_message: None,
            })
            .await;
            self.indicate(EmmIndication::AttachReject).await;
            if self.ue.dynamic {
                self.ue.released = true;
            }
            return Ok(());
        }

        if self.absorbed_by_running_procedures(&r).await? {
            return Ok(());
        }
        self.start_fresh(r).await
    }

    // TS 24.301, 5.5.1.2.7.  Returns true if the request has been dealt with, and false if a
    // fresh attach should go ahead.
    async fn absorbed_by_running_procedures(&mut self, r: &AttachRequest) -> Result<bool> {
        let changed = self
            .ue
            .procedures
            .attach()
            .is_none_or(|attach| parameters_changed(&attach.ies, r));

        if let Some(common) = &self.ue.procedures.common {
            let security_mode = matches!(common.kind, CommonKind::SecurityModeControl { .. });
            if security_mode || changed {
                info!(self.logger, "New attach request aborts {} procedure", common.name());
                self.abort().await;
                return Ok(false);
            }
            debug!(self.logger, "Ignoring repeated attach request during {}", common.name());
            return Ok(true);
        }

        match &mut self.ue.procedures.specific {
            Some(SpecificProcedure::Attach(attach)) if attach.accept_sent && !changed => {
                // Resend without counting it as a retransmission.
                let old_timer = attach.timer.take();
                let message = attach.last_message.clone();
                self.stop_nas_timer(old_timer);
                if let Some(message) = message {
                    info!(self.logger, "Repeated attach request, resending attach accept");
                    self.send_nas(message).await;
                }
                let timer =
                    self.start_nas_timer(TimerKind::T3450, Pti::UNASSIGNED, Ebi::UNASSIGNED);
                if let Some(attach) = self.ue.procedures.attach() {
                    attach.timer = Some(timer);
                }
                return Ok(true);
            }
            Some(SpecificProcedure::Attach(_)) if changed => {
                info!(self.logger, "Attach parameters changed, restarting attach");
                self.abort().await;
                return Ok(false);
            }
            Some(SpecificProcedure::Attach(_)) => {
                debug!(self.logger, "Ignoring duplicate attach request");
                return Ok(true);
            }
            Some(SpecificProcedure::TrackingAreaUpdate(_)) => {
                DetachProcedure::new(self.reborrow()).implicit().await;
                return Ok(false);
            }
            None => (),
        }

        if self.ue.emm_state == EmmState::Registered && self.ue.attached_before {
            info!(self.logger, "Attach request from registered UE, detaching it first");
            DetachProcedure::new(self.reborrow()).implicit().await;
            self.ue.security = None;
        }
        Ok(false)
    }

    async fn abort(&mut self) {
        DetachProcedure::new(self.reborrow()).release_all().await;
    }

    async fn start_fresh(&mut self, r: AttachRequest) -> Result<()> {
        let ue_id = self.ue.ue_id;
        self.ue.last_visited_tai = r.last_visited_tai;
        self.ue.originating_tai = Some(r.originating_tai);

        if let Some(imsi) = &r.imsi {
            if self.ue.imsi() != Some(imsi) {
                // A different subscriber.  Nothing learnt about the old one still applies.
                self.ue.auth_vectors.clear();
                self.ue.security = None;
                self.ue.subscription = None;
                self.ue.imsi = Some(Verifiable::present(imsi.clone()));
                self.update_ue_keys(ue_id, KeyUpdate::Imsi(imsi.clone()))?;
            }
        }
        if let Some(guti) = r.guti {
            if self.ue.guti() != Some(guti) {
                self.ue.guti = Some(Verifiable::present(guti));
                self.update_ue_keys(ue_id, KeyUpdate::Guti(Some(guti)))?;
            }
        }
        if let Some(imei) = &r.imei {
            self.ue.imei = Some(Verifiable::present(imei.clone()));
        }
        self.ue.ue_network_capability = Some(r.ue_network_capability);
        self.ue.ms_network_capability = r.ms_network_capability.clone();
        self.ue.emergency = r.attach_type == EpsAttachType::Emergency;

        info!(self.logger, "Attach procedure started, type {:?}", r.attach_type);
        self.ue.procedures.specific = Some(SpecificProcedure::Attach(AttachProc::new(r)));
        self.identify().await
    }

    async fn identify(&mut self) -> Result<()> {
        let Some(attach) = self.ue.procedures.attach() else {
            bail!("No attach procedure");
        };
        let ksi = attach.ies.ksi;

        if self.ue.imsi().is_some() {
            if self.ue.security_active_with(ksi) {
                debug!(self.logger, "Security context {ksi} still in use");
                return self.establish().await;
            }
            let outcome = AuthenticationProcedure::new(self.reborrow())
                .start(Continuation::AttachSecure)
                .await?;
            return self.common_started(outcome).await;
        }

        if self.ue.guti().is_some() {
            let outcome = IdentificationProcedure::new(self.reborrow())
                .start(IdentityType::Imsi, Continuation::AttachIdentify)
                .await?;
            return self.common_started(outcome).await;
        }

        // Unauthenticated emergency attach with only an IMEI is not offered.
        let cause = if self.ue.imei.is_some() {
            EmmCause::ImeiNotAccepted
        } else {
            EmmCause::IllegalUe
        };
        self.reject(cause, None).await
    }

    async fn common_started(&mut self, outcome: CommonOutcome) -> Result<()> {
        match outcome {
            CommonOutcome::Pending => Ok(()),
            CommonOutcome::Success(_) => bail!("Common procedure finished without the UE"),
            outcome => self.fail_common(outcome).await,
        }
    }

    /// Continue the attach after a common procedure has completed.
    pub async fn resume(mut self, continuation: Continuation) -> Result<()> {
        if self.ue.procedures.attach().is_none() {
            debug!(self.logger, "No attach procedure to resume");
            return Ok(());
        }
        match continuation {
            Continuation::AttachIdentify => self.identify().await,
            Continuation::AttachSecure => {
                let outcome = SecurityModeControlProcedure::new(self.reborrow())
                    .start(Continuation::AttachEstablish)
                    .await?;
                self.common_started(outcome).await
            }
            Continuation::AttachEstablish => self.establish().await,
        }
    }

    pub async fn common_procedure_failed(mut self, outcome: CommonOutcome) -> Result<()> {
        self.fail_common(outcome).await
    }

    async fn fail_common(&mut self, outcome: CommonOutcome) -> Result<()> {
        match outcome {
            CommonOutcome::Failed(cause) => {
                self.reject(cause, None).await?;
                self.ue.released = true;
            }
            CommonOutcome::Rejected => {
                warn!(self.logger, "UE failed authentication");
                self.abandon().await;
                self.ue.released = true;
            }
            CommonOutcome::Pending | CommonOutcome::Success(_) => (),
        }
        Ok(())
    }

    async fn establish(&mut self) -> Result<()> {
        let Some(attach) = self.ue.procedures.attach() else {
            bail!("No attach procedure");
        };
        let EsmMessage { pti, ebi, body } = attach.ies.esm_message.clone();
        let request = match body {
            UplinkEsm::PdnConnectivityRequest(request) => request,
            other => {
                warn!(self.logger, "Attach request carries {}", other.name());
                return self.reject(EmmCause::EsmFailure, None).await;
            }
        };
        let result = PdnConnectivityProcedure::new(self.reborrow())
            .request(pti, ebi, request, true)
            .await?;
        self.handle_esm(result).await
    }

    /// Act on the outcome of the PDN connectivity request made for this attach.
    pub async fn esm_result(mut self, result: EsmResult) -> Result<()> {
        if self.ue.procedures.attach().is_none() {
            warn!(self.logger, "ESM outcome {result:?} with no attach procedure");
            return Ok(());
        }
        self.handle_esm(result).await
    }

    async fn handle_esm(&mut self, result: EsmResult) -> Result<()> {
        match result {
            EsmResult::Done => Ok(()),
            EsmResult::AttachAccept(esm_message) => self.send_accept(esm_message).await,
            EsmResult::AttachReject(esm_message) => {
                self.reject(EmmCause::EsmFailure, Some(esm_message)).await
            }
        }
    }

    async fn send_accept(&mut self, esm_message: DownlinkEsm) -> Result<()> {
        if self.ue.procedures.attach().is_none() {
            bail!("No attach procedure");
        }
        // The new GUTI only becomes valid, and findable, once the UE completes.
        let guti = self.allocate_guti();
        self.ue.old_guti = self.ue.guti();
        self.ue.guti = Some(Verifiable::present(guti));
        let tai_list = self.config().tai_list();
        self.ue.tai_list = tai_list.clone();

        let message = DownlinkNas::AttachAccept {
            t3412_secs: self.config().t3412_secs,
            tai_list,
            guti: Some(guti),
            esm_message,
        };
        self.send_nas(message.clone()).await;
        let timer = self.start_nas_timer(TimerKind::T3450, Pti::UNASSIGNED, Ebi::UNASSIGNED);
        if let Some(attach) = self.ue.procedures.attach() {
            attach.accept_sent = true;
            attach.last_message = Some(message);
            attach.timer = Some(timer);
        }
        info!(self.logger, "Sent attach accept with GUTI {guti}");
        Ok(())
    }

    async fn reject(&mut self, cause: EmmCause, esm_message: Option<DownlinkEsm>) -> Result<()> {
        warn!(self.logger, "Rejecting attach with cause {cause:?}");
        let timer = self.ue.procedures.attach().and_then(|attach| attach.timer.take());
        self.stop_nas_timer(timer);
        self.send_nas(DownlinkNas::AttachReject { cause, esm_message }).await;
        self.abandon().await;
        Ok(())
    }

    // Drop the attach and everything set up for it.
    async fn abandon(&mut self) {
        self.ue.procedures.specific = None;
        DetachProcedure::new(self.reborrow()).release_all().await;
        self.ue.emm_state = EmmState::Deregistered;
        self.indicate(EmmIndication::AttachReject).await;
        if self.ue.dynamic {
            self.ue.released = true;
        }
    }

    pub async fn complete(mut self, esm_message: EsmMessage) -> Result<()> {
        let Some(attach) = self.ue.procedures.attach() else {
            warn!(self.logger, "Attach complete with no attach procedure");
            return Ok(());
        };
        if !attach.accept_sent {
            warn!(self.logger, "Attach complete before attach accept");
            return Ok(());
        }
        let timer = attach.timer.take();
        self.stop_nas_timer(timer);
        self.ue.procedures.specific = None;

        if let Some(guti) = self.ue.guti.as_mut() {
            guti.valid = true;
        }
        self.ue.old_guti = None;
        let guti = self.ue.guti();
        let ue_id = self.ue.ue_id;
        self.update_ue_keys(ue_id, KeyUpdate::Guti(guti))?;

        let EsmMessage { pti, ebi, body } = esm_message;
        let outcome = match body {
            UplinkEsm::ActivateDefaultBearerAccept => {
                if DefaultBearerProcedure::new(self.reborrow())
                    .accept(pti, ebi)
                    .await?
                {
                    CompleteOutcome::Accepted
                } else {
                    CompleteOutcome::Discarded
                }
            }
            UplinkEsm::ActivateDefaultBearerReject { cause } => {
                if DefaultBearerProcedure::new(self.reborrow())
                    .reject(pti, ebi, cause)
                    .await?
                {
                    CompleteOutcome::Rejected
                } else {
                    CompleteOutcome::Discarded
                }
            }
            other => {
                debug!(self.logger, "Attach complete carries {}", other.name());
                CompleteOutcome::Discarded
            }
        };

        match outcome {
            CompleteOutcome::Accepted => {
                self.ue.emm_state = EmmState::Registered;
                self.ue.attached_before = true;
                self.ue.dynamic = false;
                info!(self.logger, "UE registered");
                self.indicate(EmmIndication::AttachConfirm).await;
            }
            CompleteOutcome::Rejected => {
                self.indicate(EmmIndication::AttachReject).await;
                DetachProcedure::new(self.reborrow()).implicit().await;
                if self.ue.dynamic {
                    self.ue.released = true;
                }
            }
            CompleteOutcome::Discarded => {
                debug!(self.logger, "ESM message in attach complete discarded");
            }
        }
        Ok(())
    }

    pub async fn t3450_expiry(mut self, id: TimerId) -> Result<()> {
        let Some(attach) = self.ue.procedures.attach() else {
            debug!(self.logger, "T3450 expired with no attach procedure");
            return Ok(());
        };
        if attach.timer != Some(id) {
            debug!(self.logger, "Stale T3450 expiry");
            return Ok(());
        }
        attach.timer = None;
        attach.retx_count += 1;
        let count = attach.retx_count;
        let message = attach.last_message.clone();

        if count < T3450_MAX_EXPIRIES {
            warn!(self.logger, "T3450 expiry {count}, resending attach accept");
            if let Some(message) = message {
                self.send_nas(message).await;
            }
            let timer = self.start_nas_timer(TimerKind::T3450, Pti::UNASSIGNED, Ebi::UNASSIGNED);
            if let Some(attach) = self.ue.procedures.attach() {
                attach.timer = Some(timer);
            }
            return Ok(());
        }

        warn!(self.logger, "T3450 expired {count} times, aborting attach");
        self.abandon().await;
        Ok(())
    }
}
