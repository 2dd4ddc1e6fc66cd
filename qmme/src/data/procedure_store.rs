//! procedure_store - the procedures outstanding on one UE
//!
//! A UE runs at most one specific EMM procedure (attach or tracking area update), at most one
//! common EMM procedure, and a bounded set of ESM transactions.  The collision rules between
//! ESM transactions are enforced here rather than by the procedures that create them.

use super::identity::{Ebi, Guti, Pti, Tai};
use super::pdn_context::{Fteid, PdnCid};
use super::qos::BearerQos;
use super::security_context::{AuthVector, SecurityContext};
use super::tft::Tft;
use crate::nas::{
    AttachRequest, DownlinkEsm, DownlinkNas, IdentityType, PdnConnectivityRequest,
    TrackingAreaUpdateRequest,
};
use crate::timer::TimerId;
use thiserror::Error;

// PTI values 1-254 could all be in use in principle, but a UE has at most 11 bearers.
pub const MAX_ESM_PROCEDURES: usize = 11;

/// What to do once a common procedure completes successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    // Re-run attach identification with the identity just obtained.
    AttachIdentify,
    // Run security mode control.
    AttachSecure,
    // Proceed to default bearer establishment.
    AttachEstablish,
}

#[derive(Debug)]
pub struct AttachProc {
    pub ies: AttachRequest,
    pub retx_count: u32,
    pub accept_sent: bool,
    pub timer: Option<TimerId>,
    pub last_message: Option<DownlinkNas>,
}

impl AttachProc {
    pub fn new(ies: AttachRequest) -> Self {
        AttachProc {
            ies,
            retx_count: 0,
            accept_sent: false,
            timer: None,
            last_message: None,
        }
    }
}

#[derive(Debug)]
pub struct TauProc {
    pub ies: TrackingAreaUpdateRequest,
    pub retx_count: u32,
    pub accept_sent: bool,
    pub timer: Option<TimerId>,
    pub last_message: Option<DownlinkNas>,
    pub new_guti: Option<Guti>,
}

#[derive(Debug)]
pub enum SpecificProcedure {
    Attach(AttachProc),
    TrackingAreaUpdate(TauProc),
}

impl SpecificProcedure {
    pub fn timer(&self) -> Option<TimerId> {
        match self {
            SpecificProcedure::Attach(p) => p.timer,
            SpecificProcedure::TrackingAreaUpdate(p) => p.timer,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpecificProcedure::Attach(_) => "Attach",
            SpecificProcedure::TrackingAreaUpdate(_) => "TrackingAreaUpdate",
        }
    }
}

#[derive(Debug)]
pub enum CommonKind {
    Identification {
        identity_type: IdentityType,
    },
    Authentication {
        ksi: u8,
        // None while waiting for vectors from the HSS.
        vector: Option<AuthVector>,
        sync_failures: u32,
    },
    SecurityModeControl {
        context: SecurityContext,
    },
}

#[derive(Debug)]
pub struct CommonProc {
    pub kind: CommonKind,
    pub timer: Option<TimerId>,
    pub retx_count: u32,
    pub last_message: Option<DownlinkNas>,
    pub on_success: Continuation,
}

impl CommonProc {
    pub fn new(kind: CommonKind, on_success: Continuation) -> Self {
        CommonProc {
            kind,
            timer: None,
            retx_count: 0,
            last_message: None,
            on_success,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            CommonKind::Identification { .. } => "Identification",
            CommonKind::Authentication { .. } => "Authentication",
            CommonKind::SecurityModeControl { .. } => "SecurityModeControl",
        }
    }
}

/// State shared by all ESM transactions.
#[derive(Debug, Clone)]
pub struct EsmProcBase {
    pub pti: Pti,
    pub timer: Option<TimerId>,
    pub retx_count: u32,
    pub last_message: Option<DownlinkEsm>,
}

impl EsmProcBase {
    pub fn new(pti: Pti) -> Self {
        EsmProcBase {
            pti,
            timer: None,
            retx_count: 0,
            last_message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdnStage {
    // Waiting for ESM INFORMATION RESPONSE.
    EsmInformation,
    // Waiting for subscription data from the HSS.
    Subscription,
    // Waiting for the gateway to create the session.
    Session,
    // Waiting for the UE to accept the default bearer.
    DefaultBearer,
}

#[derive(Debug, Clone)]
pub struct PdnConnectivityProc {
    pub base: EsmProcBase,
    pub request: PdnConnectivityRequest,
    pub stage: PdnStage,
    pub apn: Option<String>,
    pub pco: Option<Vec<u8>>,
    pub pdn_cid: Option<PdnCid>,
    pub default_ebi: Ebi,
    // Part of an attach, so the default bearer request rides in ATTACH ACCEPT.
    pub initial_attach: bool,
    pub visited_tai: Option<Tai>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerProcKind {
    DedicatedActivation,
    Modification,
    ResourceAllocation,
    ResourceModification,
    PdnDisconnect,
    Deactivation { gateway_initiated: bool },
}

#[derive(Debug, Clone)]
pub struct BearerContextProc {
    pub base: EsmProcBase,
    pub ebi: Ebi,
    pub linked_ebi: Ebi,
    pub pdn_cid: PdnCid,
    pub kind: BearerProcKind,
    pub qos: Option<BearerQos>,
    pub tft: Option<Tft>,
    // Gateway endpoint at the time the procedure started.
    pub saegw: Option<Fteid>,
}

impl BearerContextProc {
    pub fn new(pti: Pti, ebi: Ebi, linked_ebi: Ebi, pdn_cid: PdnCid, kind: BearerProcKind) -> Self {
        BearerContextProc {
            base: EsmProcBase::new(pti),
            ebi,
            linked_ebi,
            pdn_cid,
            kind,
            qos: None,
            tft: None,
            saegw: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum EsmProcedure {
    PdnConnectivity(PdnConnectivityProc),
    BearerContext(BearerContextProc),
}

impl EsmProcedure {
    pub fn base(&self) -> &EsmProcBase {
        match self {
            EsmProcedure::PdnConnectivity(p) => &p.base,
            EsmProcedure::BearerContext(p) => &p.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut EsmProcBase {
        match self {
            EsmProcedure::PdnConnectivity(p) => &mut p.base,
            EsmProcedure::BearerContext(p) => &mut p.base,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureCollision {
    #[error("PDN connectivity procedure with PTI {0} already running")]
    PdnConnectivityRunning(Pti),
    #[error("Bearer context procedure already running")]
    BearerContextRunning,
    #[error("Procedure for PTI {0} EBI {1} already exists")]
    Duplicate(Pti, Ebi),
    #[error("Too many ESM procedures")]
    Full,
}

#[derive(Debug, Default)]
pub struct ProcedureStore {
    pub specific: Option<SpecificProcedure>,
    pub common: Option<CommonProc>,
    esm: Vec<EsmProcedure>,
}

fn matches<T: PartialEq>(wanted: T, actual: T, wildcard: T) -> bool {
    wanted == wildcard || wanted == actual
}

impl ProcedureStore {
    pub fn attach(&mut self) -> Option<&mut AttachProc> {
        match &mut self.specific {
            Some(SpecificProcedure::Attach(p)) => Some(p),
            _ => None,
        }
    }

    pub fn tau(&mut self) -> Option<&mut TauProc> {
        match &mut self.specific {
            Some(SpecificProcedure::TrackingAreaUpdate(p)) => Some(p),
            _ => None,
        }
    }

    pub fn esm_procedures(&self) -> &[EsmProcedure] {
        &self.esm
    }

    pub fn create_pdn_connectivity(
        &mut self,
        proc: PdnConnectivityProc,
    ) -> Result<(), ProcedureCollision> {
        for existing in &self.esm {
            match existing {
                EsmProcedure::PdnConnectivity(p) => {
                    return Err(ProcedureCollision::PdnConnectivityRunning(p.base.pti));
                }
                EsmProcedure::BearerContext(_) => {
                    return Err(ProcedureCollision::BearerContextRunning);
                }
            }
        }
        self.esm.push(EsmProcedure::PdnConnectivity(proc));
        Ok(())
    }

    /// Find the PDN connectivity procedure with the given PTI; an unassigned PTI matches any.
    pub fn pdn_connectivity(&mut self, pti: Pti) -> Option<&mut PdnConnectivityProc> {
        self.esm.iter_mut().find_map(|p| match p {
            EsmProcedure::PdnConnectivity(p) if matches(pti, p.base.pti, Pti::UNASSIGNED) => {
                Some(p)
            }
            _ => None,
        })
    }

    pub fn free_pdn_connectivity(&mut self, pti: Pti) -> Option<PdnConnectivityProc> {
        let index = self.esm.iter().position(|p| match p {
            EsmProcedure::PdnConnectivity(p) => matches(pti, p.base.pti, Pti::UNASSIGNED),
            EsmProcedure::BearerContext(_) => false,
        })?;
        match self.esm.remove(index) {
            EsmProcedure::PdnConnectivity(p) => Some(p),
            EsmProcedure::BearerContext(_) => None,
        }
    }

    pub fn create_bearer_context(
        &mut self,
        proc: BearerContextProc,
    ) -> Result<(), ProcedureCollision> {
        if self.esm.len() >= MAX_ESM_PROCEDURES {
            return Err(ProcedureCollision::Full);
        }
        for existing in &self.esm {
            match existing {
                EsmProcedure::PdnConnectivity(p) => {
                    return Err(ProcedureCollision::PdnConnectivityRunning(p.base.pti));
                }
                EsmProcedure::BearerContext(p)
                    if p.base.pti == proc.base.pti && p.ebi == proc.ebi =>
                {
                    return Err(ProcedureCollision::Duplicate(p.base.pti, p.ebi));
                }
                EsmProcedure::BearerContext(_) => (),
            }
        }
        self.esm.push(EsmProcedure::BearerContext(proc));
        Ok(())
    }

    /// Find a bearer context procedure.  An unassigned PTI or EBI acts as a wildcard.
    pub fn bearer_context(&mut self, pti: Pti, ebi: Ebi) -> Option<&mut BearerContextProc> {
        self.esm.iter_mut().find_map(|p| match p {
            EsmProcedure::BearerContext(p)
                if matches(pti, p.base.pti, Pti::UNASSIGNED)
                    && matches(ebi, p.ebi, Ebi::UNASSIGNED) =>
            {
                Some(p)
            }
            _ => None,
        })
    }

    pub fn free_bearer_context(&mut self, pti: Pti, ebi: Ebi) -> Option<BearerContextProc> {
        let index = self.esm.iter().position(|p| match p {
            EsmProcedure::BearerContext(p) => {
                matches(pti, p.base.pti, Pti::UNASSIGNED) && matches(ebi, p.ebi, Ebi::UNASSIGNED)
            }
            EsmProcedure::PdnConnectivity(_) => false,
        })?;
        match self.esm.remove(index) {
            EsmProcedure::BearerContext(p) => Some(p),
            EsmProcedure::PdnConnectivity(_) => None,
        }
    }

    /// Remove the first bearer context procedure that satisfies `wanted`.
    pub fn take_bearer_context(
        &mut self,
        wanted: impl Fn(&BearerContextProc) -> bool,
    ) -> Option<BearerContextProc> {
        let index = self
            .esm
            .iter()
            .position(|p| matches!(p, EsmProcedure::BearerContext(p) if wanted(p)))?;
        match self.esm.remove(index) {
            EsmProcedure::BearerContext(p) => Some(p),
            EsmProcedure::PdnConnectivity(_) => None,
        }
    }

    /// The ESM transaction guarded by the given timer.
    pub fn esm_by_timer(&mut self, timer: TimerId) -> Option<&mut EsmProcBase> {
        self.esm
            .iter_mut()
            .map(EsmProcedure::base_mut)
            .find(|base| base.timer == Some(timer))
    }

    /// Whether any ESM transaction is using this PTI.
    pub fn pti_in_use(&self, pti: Pti) -> bool {
        pti.is_assigned() && self.esm.iter().any(|p| p.base().pti == pti)
    }

    /// Remove every procedure, returning the timers that were guarding them.
    pub fn clear(&mut self) -> Vec<TimerId> {
        let mut timers = vec![];
        timers.extend(self.specific.take().and_then(|p| p.timer()));
        timers.extend(self.common.take().and_then(|p| p.timer));
        timers.extend(self.esm.drain(..).filter_map(|p| p.base().timer));
        timers
    }
}
