//! nas - decoded EMM and ESM messages exchanged with the lower layer
//!
//! Encoding and decoding of the NAS wire format happens below the MME core; messages
//! arrive here as structured records.

use crate::cause::{EmmCause, EsmCause};
use crate::data::{
    Ambr, BearerQos, Ebi, Ecgi, FlowQos, Guti, Imsi, PdnAddress, PdnType, Pti, Tai, Tft,
    UeNetworkCapability,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpsAttachType {
    Eps,
    CombinedEpsImsi,
    Emergency,
    Reserved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    pub attach_type: EpsAttachType,
    pub ksi: u8,
    // Whether the KSI refers to a native (rather than mapped) security context.
    pub native_ksi: bool,
    pub guti: Option<Guti>,
    pub native_guti: bool,
    pub imsi: Option<Imsi>,
    pub imei: Option<String>,
    pub last_visited_tai: Option<Tai>,
    pub originating_tai: Tai,
    pub originating_ecgi: Option<Ecgi>,
    pub ue_network_capability: UeNetworkCapability,
    pub ms_network_capability: Option<Vec<u8>>,
    pub esm_message: EsmMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityType {
    Imsi,
    Imei,
    Imeisv,
    Tmsi,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MobileIdentity {
    Imsi(Imsi),
    Imei(String),
    Imeisv(String),
    Guti(Guti),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpsUpdateType {
    TaUpdating,
    CombinedTaLaUpdating,
    CombinedTaLaUpdatingWithImsiAttach,
    Periodic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingAreaUpdateRequest {
    pub update_type: EpsUpdateType,
    pub ksi: u8,
    pub old_guti: Guti,
    pub last_visited_tai: Option<Tai>,
    pub originating_tai: Tai,
    pub ue_network_capability: Option<UeNetworkCapability>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachRequest {
    pub switch_off: bool,
    pub ksi: u8,
    pub identity: MobileIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkNas {
    AttachRequest(AttachRequest),
    AttachComplete { esm_message: EsmMessage },
    IdentityResponse { identity: MobileIdentity },
    AuthenticationResponse { res: Vec<u8> },
    AuthenticationFailure { cause: EmmCause, auts: Option<[u8; 14]> },
    SecurityModeComplete { imeisv: Option<String> },
    SecurityModeReject { cause: EmmCause },
    TrackingAreaUpdateRequest(TrackingAreaUpdateRequest),
    TrackingAreaUpdateComplete,
    DetachRequest(DetachRequest),
    Esm(EsmMessage),
}

impl UplinkNas {
    pub fn name(&self) -> &'static str {
        match self {
            UplinkNas::AttachRequest(_) => "AttachRequest",
            UplinkNas::AttachComplete { .. } => "AttachComplete",
            UplinkNas::IdentityResponse { .. } => "IdentityResponse",
            UplinkNas::AuthenticationResponse { .. } => "AuthenticationResponse",
            UplinkNas::AuthenticationFailure { .. } => "AuthenticationFailure",
            UplinkNas::SecurityModeComplete { .. } => "SecurityModeComplete",
            UplinkNas::SecurityModeReject { .. } => "SecurityModeReject",
            UplinkNas::TrackingAreaUpdateRequest(_) => "TrackingAreaUpdateRequest",
            UplinkNas::TrackingAreaUpdateComplete => "TrackingAreaUpdateComplete",
            UplinkNas::DetachRequest(_) => "DetachRequest",
            UplinkNas::Esm(m) => m.body.name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Initial,
    Handover,
    Emergency,
    Unknown(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdnConnectivityRequest {
    pub request_type: RequestType,
    pub pdn_type: PdnType,
    pub apn: Option<String>,
    // The UE has APN and/or PCO to send once ciphering is on.
    pub esm_information_transfer: bool,
    pub pco: Option<Vec<u8>>,
}

/// An uplink ESM message with its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsmMessage {
    pub pti: Pti,
    pub ebi: Ebi,
    pub body: UplinkEsm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkEsm {
    PdnConnectivityRequest(PdnConnectivityRequest),
    PdnDisconnectRequest {
        linked_ebi: Ebi,
    },
    EsmInformationResponse {
        apn: Option<String>,
        pco: Option<Vec<u8>>,
    },
    ActivateDefaultBearerAccept,
    ActivateDefaultBearerReject {
        cause: EsmCause,
    },
    ActivateDedicatedBearerAccept,
    ActivateDedicatedBearerReject {
        cause: EsmCause,
    },
    ModifyBearerAccept,
    ModifyBearerReject {
        cause: EsmCause,
    },
    DeactivateBearerAccept,
    BearerResourceAllocationRequest {
        linked_ebi: Ebi,
        tad: Tft,
        qos: FlowQos,
    },
    BearerResourceModificationRequest {
        ebi: Ebi,
        tad: Tft,
        qos: Option<FlowQos>,
    },
    EsmStatus {
        cause: EsmCause,
    },
    // A message type the decoder does not know.
    Unknown {
        message_type: u8,
    },
}

impl UplinkEsm {
    pub fn name(&self) -> &'static str {
        match self {
            UplinkEsm::PdnConnectivityRequest(_) => "PdnConnectivityRequest",
            UplinkEsm::PdnDisconnectRequest { .. } => "PdnDisconnectRequest",
            UplinkEsm::EsmInformationResponse { .. } => "EsmInformationResponse",
            UplinkEsm::ActivateDefaultBearerAccept => "ActivateDefaultEpsBearerContextAccept",
            UplinkEsm::ActivateDefaultBearerReject { .. } => {
                "ActivateDefaultEpsBearerContextReject"
            }
            UplinkEsm::ActivateDedicatedBearerAccept => "ActivateDedicatedEpsBearerContextAccept",
            UplinkEsm::ActivateDedicatedBearerReject { .. } => {
                "ActivateDedicatedEpsBearerContextReject"
            }
            UplinkEsm::ModifyBearerAccept => "ModifyEpsBearerContextAccept",
            UplinkEsm::ModifyBearerReject { .. } => "ModifyEpsBearerContextReject",
            UplinkEsm::DeactivateBearerAccept => "DeactivateEpsBearerContextAccept",
            UplinkEsm::BearerResourceAllocationRequest { .. } => "BearerResourceAllocationRequest",
            UplinkEsm::BearerResourceModificationRequest { .. } => {
                "BearerResourceModificationRequest"
            }
            UplinkEsm::EsmStatus { .. } => "EsmStatus",
            UplinkEsm::Unknown { .. } => "UnknownEsmMessage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownlinkEsm {
    ActivateDefaultBearerRequest {
        pti: Pti,
        ebi: Ebi,
        qos: BearerQos,
        apn: String,
        pdn_address: PdnAddress,
        apn_ambr: Ambr,
        pco: Option<Vec<u8>>,
    },
    ActivateDedicatedBearerRequest {
        pti: Pti,
        ebi: Ebi,
        linked_ebi: Ebi,
        qos: BearerQos,
        tft: Tft,
    },
    ModifyBearerRequest {
        pti: Pti,
        ebi: Ebi,
        qos: Option<BearerQos>,
        tft: Option<Tft>,
        apn_ambr: Option<Ambr>,
    },
    DeactivateBearerRequest {
        pti: Pti,
        ebi: Ebi,
        cause: EsmCause,
    },
    PdnConnectivityReject {
        pti: Pti,
        cause: EsmCause,
    },
    PdnDisconnectReject {
        pti: Pti,
        cause: EsmCause,
    },
    BearerResourceAllocationReject {
        pti: Pti,
        cause: EsmCause,
    },
    BearerResourceModificationReject {
        pti: Pti,
        cause: EsmCause,
    },
    EsmInformationRequest {
        pti: Pti,
    },
    EsmStatus {
        pti: Pti,
        ebi: Ebi,
        cause: EsmCause,
    },
}

impl DownlinkEsm {
    pub fn name(&self) -> &'static str {
        match self {
            DownlinkEsm::ActivateDefaultBearerRequest { .. } => {
                "ActivateDefaultEpsBearerContextRequest"
            }
            DownlinkEsm::ActivateDedicatedBearerRequest { .. } => {
                "ActivateDedicatedEpsBearerContextRequest"
            }
            DownlinkEsm::ModifyBearerRequest { .. } => "ModifyEpsBearerContextRequest",
            DownlinkEsm::DeactivateBearerRequest { .. } => "DeactivateEpsBearerContextRequest",
            DownlinkEsm::PdnConnectivityReject { .. } => "PdnConnectivityReject",
            DownlinkEsm::PdnDisconnectReject { .. } => "PdnDisconnectReject",
            DownlinkEsm::BearerResourceAllocationReject { .. } => "BearerResourceAllocationReject",
            DownlinkEsm::BearerResourceModificationReject { .. } => {
                "BearerResourceModificationReject"
            }
            DownlinkEsm::EsmInformationRequest { .. } => "EsmInformationRequest",
            DownlinkEsm::EsmStatus { .. } => "EsmStatus",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownlinkNas {
    AttachAccept {
        t3412_secs: u32,
        tai_list: Vec<Tai>,
        guti: Option<Guti>,
        esm_message: DownlinkEsm,
    },
    AttachReject {
        cause: EmmCause,
        esm_message: Option<DownlinkEsm>,
    },
    IdentityRequest {
        identity_type: IdentityType,
    },
    AuthenticationRequest {
        ksi: u8,
        rand: [u8; 16],
        autn: [u8; 16],
    },
    AuthenticationReject,
    SecurityModeCommand {
        ksi: u8,
        eea: u8,
        eia: u8,
        replayed_capability: UeNetworkCapability,
        imeisv_request: bool,
    },
    TrackingAreaUpdateAccept {
        t3412_secs: u32,
        tai_list: Vec<Tai>,
        guti: Option<Guti>,
    },
    TrackingAreaUpdateReject {
        cause: EmmCause,
    },
    DetachAccept,
    Esm(DownlinkEsm),
}

impl DownlinkNas {
    pub fn name(&self) -> &'static str {
        match self {
            DownlinkNas::AttachAccept { .. } => "AttachAccept",
            DownlinkNas::AttachReject { .. } => "AttachReject",
            DownlinkNas::IdentityRequest { .. } => "IdentityRequest",
            DownlinkNas::AuthenticationRequest { .. } => "AuthenticationRequest",
            DownlinkNas::AuthenticationReject => "AuthenticationReject",
            DownlinkNas::SecurityModeCommand { .. } => "SecurityModeCommand",
            DownlinkNas::TrackingAreaUpdateAccept { .. } => "TrackingAreaUpdateAccept",
            DownlinkNas::TrackingAreaUpdateReject { .. } => "TrackingAreaUpdateReject",
            DownlinkNas::DetachAccept => "DetachAccept",
            DownlinkNas::Esm(m) => m.name(),
        }
    }
}

/// Notifications from EMM to the MME application above the lower layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmmIndication {
    AttachConfirm,
    AttachReject,
    ImplicitDetach,
    UeContextReleased,
}
