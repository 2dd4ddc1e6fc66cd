//! bearer_resource - UE requested bearer resource allocation and modification (TS 24.301, 6.5.3 / 6.5.4)
//!
//! Neither procedure has a timer at the MME.  The request is passed to the gateway as a bearer
//! resource command and the gateway answers by starting a dedicated bearer activation, a bearer
//! modification, or with a failure indication.

use super::UeProcedure;
use crate::cause::{EsmCause, GtpCause};
use crate::nas::DownlinkEsm;
use crate::s11::{BearerResourceCommand, S11Request};
use crate::tft::{self, TftError};
use crate::{
    BearerContextProc, BearerProcKind, Ebi, FlowQos, HandlerApi, PacketFilter, PdnCid, Pti, Tft,
};
use anyhow::Result;
use derive_deref::{Deref, DerefMut};
use slog::{debug, info, warn};

#[derive(Deref, DerefMut)]
pub struct BearerResourceProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Allocation,
    Modification,
}

impl Request {
    fn kind(self) -> BearerProcKind {
        match self {
            Request::Allocation => BearerProcKind::ResourceAllocation,
            Request::Modification => BearerProcKind::ResourceModification,
        }
    }

    fn reject(self, pti: Pti, cause: EsmCause) -> DownlinkEsm {
        match self {
            Request::Allocation => DownlinkEsm::BearerResourceAllocationReject { pti, cause },
            Request::Modification => DownlinkEsm::BearerResourceModificationReject { pti, cause },
        }
    }
}

// Only a syntactic error stops the request reaching the gateway.  A semantic error is for
// the gateway to judge against the filters it holds.
fn check_tad(tad: &Tft, installed: Option<&[PacketFilter]>) -> Result<(), EsmCause> {
    match tft::verify(tad, installed) {
        Err(TftError::Syntactic(cause)) => Err(cause),
        _ => Ok(()),
    }
}

struct Target {
    pdn_cid: PdnCid,
    linked_ebi: Ebi,
    ebi: Ebi,
    installed: Option<Vec<PacketFilter>>,
}

impl<'a, A: HandlerApi> BearerResourceProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        BearerResourceProcedure(inner)
    }

    /// BEARER RESOURCE ALLOCATION REQUEST, asking for a new dedicated bearer on the PDN
    /// connection of default bearer `linked_ebi`.
    pub async fn allocation_request(
        mut self,
        pti: Pti,
        linked_ebi: Ebi,
        tad: Tft,
        qos: FlowQos,
    ) -> Result<()> {
        let target = self.ue.pdn_by_default_ebi(linked_ebi).map(|pdn| Target {
            pdn_cid: pdn.cid,
            linked_ebi,
            ebi: Ebi::UNASSIGNED,
            installed: None,
        });
        self.run(Request::Allocation, pti, target, tad, Some(qos))
            .await
    }

    /// BEARER RESOURCE MODIFICATION REQUEST for the existing bearer `ebi`.
    pub async fn modification_request(
        mut self,
        pti: Pti,
        ebi: Ebi,
        tad: Tft,
        qos: Option<FlowQos>,
    ) -> Result<()> {
        let target = self.ue.pdn_of_bearer(ebi).map(|pdn| Target {
            pdn_cid: pdn.cid,
            linked_ebi: pdn.default_ebi,
            ebi,
            installed: pdn.bearers.get(&ebi).and_then(|b| b.tft.clone()),
        });
        self.run(Request::Modification, pti, target, tad, qos).await
    }

    async fn run(
        &mut self,
        request: Request,
        pti: Pti,
        target: Option<Target>,
        tad: Tft,
        qos: Option<FlowQos>,
    ) -> Result<()> {
        if !pti.is_valid() {
            self.send_esm(request.reject(pti, EsmCause::InvalidPtiValue))
                .await;
            return Ok(());
        }
        if self.ue.procedures.pti_in_use(pti) {
            debug!(self.logger, "Ignoring retransmitted {request:?} request, PTI {pti}");
            return Ok(());
        }
        let Some(target) = target else {
            self.send_esm(request.reject(pti, EsmCause::InvalidEpsBearerIdentity))
                .await;
            return Ok(());
        };
        if let Err(cause) = check_tad(&tad, target.installed.as_deref()) {
            warn!(self.logger, "Bearer resource request with bad TFT, cause {cause:?}");
            self.send_esm(request.reject(pti, cause)).await;
            return Ok(());
        }
        let flow_qos = qos.filter(|qos| match qos.validate() {
            Ok(()) => true,
            Err(_) => {
                debug!(self.logger, "Dropping unusable flow QoS {qos:?}");
                false
            }
        });

        let mut procedure = BearerContextProc::new(
            pti,
            target.ebi,
            target.linked_ebi,
            target.pdn_cid,
            request.kind(),
        );
        procedure.tft = Some(tad.clone());
        if let Err(e) = self.ue.procedures.create_bearer_context(procedure) {
            warn!(self.logger, "Bearer resource request collides - {e}");
            self.send_esm(request.reject(pti, EsmCause::RequestRejectedUnspecified))
                .await;
            return Ok(());
        }

        let command = self.ue.pdn_contexts.get(&target.pdn_cid).and_then(|pdn| {
            let sgw = pdn.sgw?;
            Some(BearerResourceCommand {
                pti,
                linked_ebi: target.linked_ebi,
                ebi: target.ebi,
                tad,
                flow_qos,
                local_teid: pdn.local_teid,
                teid: sgw.teid,
                peer_ip: sgw.ip,
            })
        });
        let sent = match command {
            Some(command) => match self
                .s11_request(S11Request::BearerResourceCommand(command))
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    warn!(self.logger, "Failed to send bearer resource command - {e}");
                    false
                }
            },
            None => {
                warn!(self.logger, "No gateway session for PDN {}", target.pdn_cid);
                false
            }
        };
        if !sent {
            self.ue.procedures.free_bearer_context(pti, target.ebi);
            self.send_esm(request.reject(pti, EsmCause::NetworkFailure))
                .await;
            return Ok(());
        }
        info!(self.logger, "Bearer resource {request:?} requested, PTI {pti}");
        Ok(())
    }

    /// The gateway could not satisfy the UE's bearer resource command.
    pub async fn failure_indication(
        mut self,
        pti: Pti,
        linked_ebi: Ebi,
        cause: GtpCause,
    ) -> Result<()> {
        let Some(procedure) = self.take_bearer_procedure(|p| {
            p.base.pti == pti
                && matches!(
                    p.kind,
                    BearerProcKind::ResourceAllocation | BearerProcKind::ResourceModification
                )
        }) else {
            warn!(
                self.logger,
                "Bearer resource failure indication for unknown PTI {pti}, linked EBI {linked_ebi}"
            );
            return Ok(());
        };
        let request = match procedure.kind {
            BearerProcKind::ResourceModification => Request::Modification,
            _ => Request::Allocation,
        };
        warn!(self.logger, "Gateway refused bearer resources, cause {cause:?}");
        self.send_esm(request.reject(pti, cause.into())).await;
        Ok(())
    }
}
