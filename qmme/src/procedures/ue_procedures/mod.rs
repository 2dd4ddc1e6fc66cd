mod attach;
mod authentication;
mod bearer_modification;
mod bearer_resource;
mod deactivation;
mod dedicated_bearer;
mod default_bearer;
mod detach;
mod esm_status;
mod identification;
mod pdn_connectivity;
mod pdn_disconnect;
mod sap;
mod security_mode_control;
mod tracking_area_update;
mod ue_message_handler;

pub use attach::AttachProcedure;
pub use authentication::AuthenticationProcedure;
pub use bearer_modification::BearerModificationProcedure;
pub use bearer_resource::BearerResourceProcedure;
pub use deactivation::DeactivationProcedure;
pub use dedicated_bearer::DedicatedBearerProcedure;
pub use default_bearer::DefaultBearerProcedure;
pub use detach::DetachProcedure;
pub use esm_status::EsmStatusProcedure;
pub use identification::IdentificationProcedure;
pub use pdn_connectivity::PdnConnectivityProcedure;
pub use pdn_disconnect::PdnDisconnectProcedure;
pub use sap::Sap;
pub use security_mode_control::SecurityModeControlProcedure;
pub use tracking_area_update::TrackingAreaUpdateProcedure;
pub use ue_message_handler::UeMessageHandler;

use super::Procedure;
use crate::cause::{EmmCause, EsmCause};
use crate::nas::{DownlinkEsm, DownlinkNas, EmmIndication, UplinkNas};
use crate::s6a::{S6aAnswer, S6aRequest};
use crate::s11::{S11Message, S11Request};
use crate::timer::{Expiry, TimerId};
use crate::{
    BearerContextProc, BearerState, CommonKind, CommonProc, Continuation, Ebi, EmmState, EnbUeKey,
    Guti, HandlerApi, Imsi, PdnCid, Pti, UeContext,
};
use anyhow::Result;
use async_channel::Sender;
use slog::{Logger, debug, info, warn};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    T3450,
    T3460,
    T3470,
    T3485,
    T3489,
    T3495,
}

/// Identifies what a running NAS timer is guarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NasTimer {
    pub kind: TimerKind,
    pub pti: Pti,
    pub ebi: Ebi,
}

/// Everything a UE's message handler reacts to.
#[derive(Debug)]
pub enum UeEvent {
    Uplink {
        // The UE id the lower layer used, which can change on a repeated attach.
        ue_id: u32,
        enb_ue_key: Option<EnbUeKey>,
        message: UplinkNas,
    },
    S6a(S6aAnswer),
    S11(S11Message),
    Timer(Expiry<NasTimer>),
    Query(Sender<UeSummary>),
}

impl From<Expiry<NasTimer>> for UeEvent {
    fn from(expiry: Expiry<NasTimer>) -> Self {
        UeEvent::Timer(expiry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdnSummary {
    pub apn: String,
    pub default_ebi: Ebi,
    pub bearers: Vec<(Ebi, BearerState)>,
}

/// A snapshot of a UE's state, for management and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeSummary {
    pub ue_id: u32,
    pub emm_state: EmmState,
    pub imsi: Option<Imsi>,
    pub guti: Option<Guti>,
    pub specific_procedure: Option<&'static str>,
    pub common_procedure: Option<&'static str>,
    pub attach_retx_count: Option<u32>,
    pub esm_procedures: usize,
    pub pdns: Vec<PdnSummary>,
}

impl From<&UeContext> for UeSummary {
    fn from(ue: &UeContext) -> Self {
        UeSummary {
            ue_id: ue.ue_id,
            emm_state: ue.emm_state,
            imsi: ue.imsi().cloned(),
            guti: ue.guti(),
            specific_procedure: ue.procedures.specific.as_ref().map(|p| p.name()),
            common_procedure: ue.procedures.common.as_ref().map(|p| p.name()),
            attach_retx_count: match &ue.procedures.specific {
                Some(crate::SpecificProcedure::Attach(p)) => Some(p.retx_count),
                _ => None,
            },
            esm_procedures: ue.procedures.esm_procedures().len(),
            pdns: ue
                .pdn_contexts
                .values()
                .map(|pdn| PdnSummary {
                    apn: pdn.apn.clone(),
                    default_ebi: pdn.default_ebi,
                    bearers: pdn.bearers.values().map(|b| (b.ebi, b.state())).collect(),
                })
                .collect(),
        }
    }
}

/// What an ESM procedure hands back to EMM.
#[derive(Debug)]
pub enum EsmResult {
    Done,
    // The default bearer request to carry in ATTACH ACCEPT.
    AttachAccept(DownlinkEsm),
    // The PDN connectivity reject to carry in ATTACH REJECT.
    AttachReject(DownlinkEsm),
}

/// What a common EMM procedure hands back to the procedure that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommonOutcome {
    Pending,
    Success(Continuation),
    // Fatal to the attach, which is rejected with this cause.
    Failed(EmmCause),
    // The UE has already been told.  Release it.
    Rejected,
}

// Result of a retransmission timer expiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retransmission {
    Stale,
    Resent,
    Exhausted,
}

pub struct UeProcedure<'a, A: HandlerApi> {
    base: Procedure<'a, A>,
    ue: &'a mut UeContext,
    events: &'a Sender<UeEvent>,
}

impl<'a, A: HandlerApi> std::ops::Deref for UeProcedure<'a, A> {
    type Target = Procedure<'a, A>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<'a, A: HandlerApi> UeProcedure<'a, A> {
    pub fn new(
        api: &'a A,
        ue: &'a mut UeContext,
        logger: &'a Logger,
        events: &'a Sender<UeEvent>,
    ) -> Self {
        UeProcedure {
            base: Procedure::new(api, logger),
            ue,
            events,
        }
    }

    /// A shorter lived copy of this procedure, to hand to a sub-procedure.
    pub fn reborrow(&mut self) -> UeProcedure<'_, A> {
        UeProcedure {
            base: Procedure::new(self.base.api, self.base.logger),
            ue: &mut *self.ue,
            events: self.events,
        }
    }

    // Downlink sends are best effort.  A failure is logged and the procedure carries on,
    // relying on its timer or on local cleanup.
    async fn send_nas(&self, message: DownlinkNas) {
        self.log_sent(message.name());
        if let Err(e) = self.api.send_downlink_nas(self.ue.ue_id, message).await {
            warn!(self.logger, "Failed to send downlink NAS - {e}");
        }
    }

    async fn send_esm(&self, message: DownlinkEsm) {
        self.send_nas(DownlinkNas::Esm(message)).await
    }

    async fn indicate(&self, indication: EmmIndication) {
        self.log_message(&format!("<< Indication {indication:?}"));
        self.api.emm_indication(self.ue.ue_id, indication).await
    }

    async fn s6a_request(&self, request: S6aRequest) -> Result<()> {
        self.log_message("<< S6a request");
        self.api.hss_request(self.ue.ue_id, request).await
    }

    async fn s11_request(&self, request: S11Request) -> Result<()> {
        self.log_sent(request.name());
        self.api.gateway_request(self.ue.ue_id, request).await
    }

    fn start_nas_timer(&self, kind: TimerKind, pti: Pti, ebi: Ebi) -> TimerId {
        let timers = &self.config().timers;
        let ms = match kind {
            TimerKind::T3450 => timers.t3450,
            TimerKind::T3460 => timers.t3460,
            TimerKind::T3470 => timers.t3470,
            TimerKind::T3485 => timers.t3485,
            TimerKind::T3489 => timers.t3489,
            TimerKind::T3495 => timers.t3495,
        };
        self.api.start_timer(
            Duration::from_millis(ms),
            NasTimer { kind, pti, ebi },
            self.events.clone(),
        )
    }

    fn stop_nas_timer(&self, timer: Option<TimerId>) {
        if let Some(id) = timer {
            self.api.stop_timer(id);
        }
    }

    fn install_common_procedure(&mut self, procedure: CommonProc) {
        if let Some(old) = self.ue.procedures.common.replace(procedure) {
            debug!(self.logger, "{} procedure replaced", old.name());
            self.stop_nas_timer(old.timer);
        }
        if self.ue.emm_state == EmmState::Deregistered {
            self.ue.emm_state = EmmState::CommonProcedureInitiated;
        }
    }

    // Remove the running common procedure if it is the wanted kind, stopping its timer.
    fn take_common_procedure(
        &mut self,
        wanted: impl Fn(&CommonKind) -> bool,
    ) -> Option<CommonProc> {
        let procedure = self.ue.procedures.common.take_if(|p| wanted(&p.kind))?;
        self.stop_nas_timer(procedure.timer);
        Some(procedure)
    }

    // Resend the last message of the common procedure guarded by timer `id`, or remove the
    // procedure once it has had `max_expiries` expiries.
    async fn retransmit_common(
        &mut self,
        id: TimerId,
        kind: TimerKind,
        max_expiries: u32,
    ) -> Retransmission {
        let Some(procedure) = self
            .ue
            .procedures
            .common
            .as_mut()
            .filter(|p| p.timer == Some(id))
        else {
            debug!(self.logger, "Stale {kind:?} expiry");
            return Retransmission::Stale;
        };
        procedure.timer = None;
        procedure.retx_count += 1;
        let count = procedure.retx_count;
        let name = procedure.name();
        let message = procedure.last_message.clone();

        if count >= max_expiries {
            warn!(self.logger, "{kind:?} expired {count} times, aborting {name}");
            self.ue.procedures.common = None;
            return Retransmission::Exhausted;
        }
        warn!(self.logger, "{kind:?} expiry {count}, resending for {name}");
        if let Some(message) = message {
            self.send_nas(message).await;
        }
        let timer = self.start_nas_timer(kind, Pti::UNASSIGNED, Ebi::UNASSIGNED);
        if let Some(procedure) = self.ue.procedures.common.as_mut() {
            procedure.timer = Some(timer);
        }
        Retransmission::Resent
    }

    // As retransmit_common, for the ESM transaction guarded by timer `id`.  On exhaustion the
    // caller decides what to do with the transaction.
    async fn retransmit_esm(
        &mut self,
        id: TimerId,
        timer: NasTimer,
        max_expiries: u32,
    ) -> Retransmission {
        let Some(base) = self.ue.procedures.esm_by_timer(id) else {
            debug!(self.logger, "Stale {:?} expiry", timer.kind);
            return Retransmission::Stale;
        };
        base.retx_count += 1;
        let count = base.retx_count;
        if count >= max_expiries {
            base.timer = None;
            warn!(
                self.logger,
                "{:?} expired {count} times, PTI {} EBI {}", timer.kind, timer.pti, timer.ebi
            );
            return Retransmission::Exhausted;
        }
        let message = base.last_message.clone();
        warn!(self.logger, "{:?} expiry {count}, resending", timer.kind);
        if let Some(message) = message {
            self.send_esm(message).await;
        }
        let new_timer = self.start_nas_timer(timer.kind, timer.pti, timer.ebi);
        if let Some(base) = self.ue.procedures.esm_by_timer(id) {
            base.timer = Some(new_timer);
        }
        Retransmission::Resent
    }

    // Remove the first bearer context procedure that satisfies `wanted`, stopping its timer.
    fn take_bearer_procedure(
        &mut self,
        wanted: impl Fn(&BearerContextProc) -> bool,
    ) -> Option<BearerContextProc> {
        let procedure = self.ue.procedures.take_bearer_context(wanted)?;
        self.stop_nas_timer(procedure.base.timer);
        Some(procedure)
    }

    // Drop a PDN connection.  If the gateway still holds its session, delete that too.
    async fn release_pdn(&mut self, pdn_cid: PdnCid, delete_session: bool) {
        let Some(pdn) = self.ue.pdn_contexts.remove(&pdn_cid) else {
            return;
        };
        info!(self.logger, "Released PDN connection to {}", pdn.apn);
        let Some(sgw) = pdn.sgw.filter(|_| delete_session) else {
            return;
        };
        let request = S11Request::DeleteSession {
            pdn_cid,
            linked_ebi: pdn.default_ebi,
            local_teid: pdn.local_teid,
            sgw,
        };
        if let Err(e) = self.s11_request(request).await {
            warn!(self.logger, "Failed to delete session for APN {} - {e}", pdn.apn);
        }
    }

    async fn send_esm_status(&self, pti: Pti, ebi: Ebi, cause: EsmCause) {
        self.send_esm(DownlinkEsm::EsmStatus { pti, ebi, cause })
            .await
    }
}
