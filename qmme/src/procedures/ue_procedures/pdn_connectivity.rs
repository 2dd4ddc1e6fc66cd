//! pdn_connectivity - UE requested PDN connectivity (TS 24.301, 6.5.1)
//!
//! The transaction may wait on the UE (ESM information), on the HSS (subscription data) and
//! on the gateway (session creation) before the default bearer is offered to the UE.

use super::{
    DefaultBearerProcedure, EsmResult, NasTimer, Retransmission, TimerKind, UeProcedure,
};
use crate::cause::{EsmCause, GtpCause};
use crate::nas::{DownlinkEsm, PdnConnectivityRequest, RequestType};
use crate::s6a::{S6aError, S6aRequest};
use crate::s11::{CreateSession, S11Request, Session};
use crate::timer::TimerId;
use crate::{
    BearerContext, BearerQos, BearerState, Ebi, EsmProcBase, HandlerApi, PdnCid,
    PdnConnectivityProc, PdnContext, PdnStage, PdnType, ProcedureCollision, Pti, SubscriptionData,
};
use anyhow::{Result, bail};
use derive_deref::{Deref, DerefMut};
use slog::{debug, info, warn};
use std::collections::BTreeMap;

const T3489_MAX_EXPIRIES: u32 = 3;

#[derive(Deref, DerefMut)]
pub struct PdnConnectivityProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

fn check_request(pti: Pti, ebi: Ebi, r: &PdnConnectivityRequest) -> Result<(), EsmCause> {
    if !pti.is_valid() {
        return Err(EsmCause::InvalidPtiValue);
    }
    if ebi.is_assigned() {
        return Err(EsmCause::InvalidEpsBearerIdentity);
    }
    match r.request_type {
        RequestType::Initial => (),
        RequestType::Handover | RequestType::Emergency => {
            return Err(EsmCause::RequestRejectedUnspecified);
        }
        RequestType::Unknown(_) => return Err(EsmCause::InvalidMandatoryInformation),
    }
    if let PdnType::Unknown(_) = r.pdn_type {
        return Err(EsmCause::UnknownPdnType);
    }
    Ok(())
}

/// The PDN type to set up, given what the UE asked for and what it is subscribed to.
fn select_pdn_type(requested: PdnType, subscribed: PdnType) -> Result<PdnType, EsmCause> {
    match (requested, subscribed) {
        (PdnType::Unknown(_), _) | (_, PdnType::Unknown(_)) => Err(EsmCause::UnknownPdnType),
        (PdnType::Ipv4v6, subscribed) => Ok(subscribed),
        (requested, PdnType::Ipv4v6) => Ok(requested),
        (PdnType::Ipv4, PdnType::Ipv6) => Err(EsmCause::PdnTypeIpv6OnlyAllowed),
        (PdnType::Ipv6, PdnType::Ipv4) => Err(EsmCause::PdnTypeIpv4OnlyAllowed),
        (requested, _) => Ok(requested),
    }
}

fn subscription_failure_cause(e: S6aError) -> EsmCause {
    match e {
        S6aError::UserUnknown | S6aError::RoamingNotAllowed => EsmCause::ServiceOptionNotSubscribed,
        S6aError::AuthenticationDataUnavailable | S6aError::UnableToComply => {
            EsmCause::NetworkFailure
        }
    }
}

impl<'a, A: HandlerApi> PdnConnectivityProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        PdnConnectivityProcedure(inner)
    }

    /// Handle PDN CONNECTIVITY REQUEST, either standalone or from within ATTACH REQUEST.
    pub async fn request(
        mut self,
        pti: Pti,
        ebi: Ebi,
        r: PdnConnectivityRequest,
        initial_attach: bool,
    ) -> Result<EsmResult> {
        if let Err(cause) = check_request(pti, ebi, &r) {
            return self.reject(pti, cause, initial_attach).await;
        }

        let esm_information_transfer = r.esm_information_transfer;
        let procedure = PdnConnectivityProc {
            base: EsmProcBase::new(pti),
            apn: r.apn.clone(),
            pco: r.pco.clone(),
            request: r,
            stage: PdnStage::Subscription,
            pdn_cid: None,
            default_ebi: Ebi::UNASSIGNED,
            initial_attach,
            visited_tai: self.ue.originating_tai,
        };
        match self.ue.procedures.create_pdn_connectivity(procedure) {
            Ok(()) => (),
            Err(ProcedureCollision::PdnConnectivityRunning(running)) if running == pti => {
                debug!(self.logger, "Retransmitted PDN connectivity request, PTI {pti}");
                let last = self
                    .ue
                    .procedures
                    .pdn_connectivity(pti)
                    .and_then(|p| p.base.last_message.clone());
                if let Some(message) = last {
                    self.send_esm(message).await;
                }
                return Ok(EsmResult::Done);
            }
            Err(e) => {
                warn!(self.logger, "PDN connectivity request collides - {e}");
                return self
                    .reject(pti, EsmCause::RequestRejectedUnspecified, initial_attach)
                    .await;
            }
        }
        info!(self.logger, "PDN connectivity procedure started, PTI {pti}");

        if esm_information_transfer {
            let message = DownlinkEsm::EsmInformationRequest { pti };
            self.send_esm(message.clone()).await;
            let timer = self.start_nas_timer(TimerKind::T3489, pti, Ebi::UNASSIGNED);
            if let Some(procedure) = self.ue.procedures.pdn_connectivity(pti) {
                procedure.stage = PdnStage::EsmInformation;
                procedure.base.timer = Some(timer);
                procedure.base.last_message = Some(message);
            }
            return Ok(EsmResult::Done);
        }
        self.proceed(pti).await
    }

    pub async fn esm_information_response(
        mut self,
        pti: Pti,
        apn: Option<String>,
        pco: Option<Vec<u8>>,
    ) -> Result<EsmResult> {
        let Some(procedure) = self
            .ue
            .procedures
            .pdn_connectivity(pti)
            .filter(|p| pti.is_assigned() && p.stage == PdnStage::EsmInformation)
        else {
            warn!(self.logger, "Unexpected ESM information response, PTI {pti}");
            return Ok(EsmResult::Done);
        };
        let timer = procedure.base.timer.take();
        procedure.base.last_message = None;
        if apn.is_some() {
            procedure.apn = apn;
        }
        if pco.is_some() {
            procedure.pco = pco;
        }
        self.stop_nas_timer(timer);
        self.proceed(pti).await
    }

    pub async fn t3489_expiry(mut self, id: TimerId, timer: NasTimer) -> Result<EsmResult> {
        match self.retransmit_esm(id, timer, T3489_MAX_EXPIRIES).await {
            Retransmission::Stale | Retransmission::Resent => Ok(EsmResult::Done),
            Retransmission::Exhausted => {
                self.fail(timer.pti, EsmCause::EsmInformationNotReceived)
                    .await
            }
        }
    }

    // APN and PCO are now known.  Make sure there is subscription data to check them against.
    async fn proceed(&mut self, pti: Pti) -> Result<EsmResult> {
        if self.ue.subscription.is_some() {
            return self.create_session(pti).await;
        }
        let Some(imsi) = self.ue.imsi().cloned() else {
            return self.fail(pti, EsmCause::NetworkFailure).await;
        };
        let initial_attach = match self.ue.procedures.pdn_connectivity(pti) {
            Some(procedure) => {
                procedure.stage = PdnStage::Subscription;
                procedure.initial_attach
            }
            None => bail!("No PDN connectivity procedure for PTI {pti}"),
        };
        let request = S6aRequest::UpdateLocation {
            imsi,
            visited_plmn: self.config().plmn,
            initial_attach,
        };
        if let Err(e) = self.s6a_request(request).await {
            warn!(self.logger, "Failed to request subscription data - {e}");
            return self.fail(pti, EsmCause::NetworkFailure).await;
        }
        Ok(EsmResult::Done)
    }

    pub async fn subscription_received(
        mut self,
        result: Result<SubscriptionData, S6aError>,
    ) -> Result<EsmResult> {
        let Some(pti) = self
            .ue
            .procedures
            .pdn_connectivity(Pti::UNASSIGNED)
            .filter(|p| p.stage == PdnStage::Subscription)
            .map(|p| p.base.pti)
        else {
            debug!(self.logger, "Subscription data with no PDN connectivity waiting for it");
            if let Ok(subscription) = result {
                self.ue.subscription = Some(subscription);
            }
            return Ok(EsmResult::Done);
        };
        match result {
            Ok(subscription) => {
                debug!(
                    self.logger,
                    "Subscription has {} APN configurations",
                    subscription.apn_configurations.len()
                );
                self.ue.subscription = Some(subscription);
                self.create_session(pti).await
            }
            Err(e) => {
                warn!(self.logger, "HSS update location failed - {e}");
                self.fail(pti, subscription_failure_cause(e)).await
            }
        }
    }

    async fn create_session(&mut self, pti: Pti) -> Result<EsmResult> {
        let Some(procedure) = self.ue.procedures.pdn_connectivity(pti) else {
            bail!("No PDN connectivity procedure for PTI {pti}");
        };
        let requested_apn = procedure.apn.clone();
        let requested_type = procedure.request.pdn_type;
        let pco = procedure.pco.clone();

        let Some(apn) = self
            .ue
            .subscription
            .as_ref()
            .and_then(|s| s.select_apn(requested_apn.as_deref()))
            .cloned()
        else {
            return self.fail(pti, EsmCause::UnknownApn).await;
        };
        if self.ue.pdn_by_apn(&apn.apn).is_some() {
            return self.fail(pti, EsmCause::MultiplePdnConnectionsNotAllowed).await;
        }
        let pdn_type = match select_pdn_type(requested_type, apn.pdn_type) {
            Ok(pdn_type) => pdn_type,
            Err(cause) => return self.fail(pti, cause).await,
        };
        let (Some(ebi), Some(pdn_cid)) = (self.ue.free_ebi(), self.ue.allocate_pdn_cid()) else {
            return self.fail(pti, EsmCause::InsufficientResources).await;
        };
        let Some(imsi) = self.ue.imsi().cloned() else {
            return self.fail(pti, EsmCause::NetworkFailure).await;
        };

        let qos = BearerQos::non_gbr(apn.qci, apn.arp);
        let mut bearer = BearerContext::new(ebi, pdn_cid, qos);
        bearer.set_state(BearerState::ActivePending)?;
        let local_teid = self.allocate_teid();
        self.ue.pdn_contexts.insert(
            pdn_cid,
            PdnContext {
                cid: pdn_cid,
                apn: apn.apn.clone(),
                context_identifier: apn.context_identifier,
                pdn_type,
                default_ebi: ebi,
                ambr: apn.ambr,
                pdn_address: None,
                local_teid,
                sgw: None,
                pco: None,
                bearers: BTreeMap::from([(ebi, bearer)]),
            },
        );
        if let Some(procedure) = self.ue.procedures.pdn_connectivity(pti) {
            procedure.stage = PdnStage::Session;
            procedure.pdn_cid = Some(pdn_cid);
            procedure.default_ebi = ebi;
        }

        let request = S11Request::CreateSession(CreateSession {
            imsi,
            pdn_cid,
            apn: apn.apn,
            pdn_type,
            default_ebi: ebi,
            qos,
            ambr: apn.ambr,
            serving_network: self.config().plmn,
            local_teid,
            pco,
        });
        if let Err(e) = self.s11_request(request).await {
            warn!(self.logger, "Failed to request session creation - {e}");
            return self.fail(pti, EsmCause::NetworkFailure).await;
        }
        Ok(EsmResult::Done)
    }

    pub async fn session_created(
        mut self,
        pdn_cid: PdnCid,
        result: Result<Session, GtpCause>,
    ) -> Result<EsmResult> {
        let Some(pti) = self
            .ue
            .procedures
            .pdn_connectivity(Pti::UNASSIGNED)
            .filter(|p| p.stage == PdnStage::Session && p.pdn_cid == Some(pdn_cid))
            .map(|p| p.base.pti)
        else {
            warn!(self.logger, "Create session response for PDN {pdn_cid} with no procedure");
            return Ok(EsmResult::Done);
        };

        let session = match result {
            Ok(session) => session,
            Err(cause) => {
                warn!(self.logger, "Gateway refused session, cause {cause:?}");
                return self.fail(pti, EsmCause::RequestRejectedByGw).await;
            }
        };
        let Some(pdn) = self.ue.pdn_contexts.get_mut(&pdn_cid) else {
            bail!("PDN {pdn_cid} missing");
        };
        pdn.pdn_address = Some(session.pdn_address);
        pdn.sgw = Some(session.sgw);
        pdn.pco = session.pco;
        if let Some(bearer) = pdn.default_bearer_mut() {
            bearer.s1u_sgw = session.s1u_sgw;
        }
        let apn = pdn.apn.clone();
        info!(self.logger, "Session created for APN {apn}, SGW {}", session.sgw);
        DefaultBearerProcedure::new(self.reborrow())
            .activate(pti)
            .await
    }

    // End the transaction with PDN CONNECTIVITY REJECT, dropping anything set up for it.
    async fn fail(&mut self, pti: Pti, cause: EsmCause) -> Result<EsmResult> {
        let Some(procedure) = self.ue.procedures.free_pdn_connectivity(pti) else {
            bail!("No PDN connectivity procedure for PTI {pti}");
        };
        self.stop_nas_timer(procedure.base.timer);
        if let Some(pdn_cid) = procedure.pdn_cid {
            self.release_pdn(pdn_cid, true).await;
        }
        self.reject(pti, cause, procedure.initial_attach).await
    }

    async fn reject(
        &mut self,
        pti: Pti,
        cause: EsmCause,
        initial_attach: bool,
    ) -> Result<EsmResult> {
        warn!(self.logger, "Rejecting PDN connectivity, PTI {pti} cause {cause:?}");
        let message = DownlinkEsm::PdnConnectivityReject { pti, cause };
        if initial_attach {
            return Ok(EsmResult::AttachReject(message));
        }
        self.send_esm(message).await;
        Ok(EsmResult::Done)
    }
}
