//! s11 - requests to and messages from the serving / PDN gateway

use crate::cause::{EsmCause, GtpCause};
use crate::data::{
    Ambr, BearerQos, Ebi, FlowQos, Fteid, Imsi, PdnAddress, PdnCid, PdnType, Plmn, Pti, Tft,
};
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSession {
    pub imsi: Imsi,
    pub pdn_cid: PdnCid,
    pub apn: String,
    pub pdn_type: PdnType,
    pub default_ebi: Ebi,
    pub qos: BearerQos,
    pub ambr: Ambr,
    pub serving_network: Plmn,
    pub local_teid: u32,
    pub pco: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerResourceCommand {
    pub pti: Pti,
    pub linked_ebi: Ebi,
    // Unassigned for a bearer resource allocation.
    pub ebi: Ebi,
    pub tad: Tft,
    pub flow_qos: Option<FlowQos>,
    pub local_teid: u32,
    pub teid: u32,
    pub peer_ip: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S11Request {
    CreateSession(CreateSession),
    DeleteSession {
        pdn_cid: PdnCid,
        linked_ebi: Ebi,
        local_teid: u32,
        sgw: Fteid,
    },
    BearerResourceCommand(BearerResourceCommand),
    CreateBearerResponse {
        sgw: Fteid,
        ebi: Ebi,
        cause: GtpCause,
    },
    UpdateBearerResponse {
        sgw: Fteid,
        ebi: Ebi,
        cause: GtpCause,
    },
    DeleteBearerResponse {
        sgw: Fteid,
        ebi: Ebi,
        cause: GtpCause,
    },
}

impl S11Request {
    pub fn name(&self) -> &'static str {
        match self {
            S11Request::CreateSession(_) => "CreateSessionRequest",
            S11Request::DeleteSession { .. } => "DeleteSessionRequest",
            S11Request::BearerResourceCommand(_) => "BearerResourceCommand",
            S11Request::CreateBearerResponse { .. } => "CreateBearerResponse",
            S11Request::UpdateBearerResponse { .. } => "UpdateBearerResponse",
            S11Request::DeleteBearerResponse { .. } => "DeleteBearerResponse",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub pdn_address: PdnAddress,
    pub sgw: Fteid,
    pub s1u_sgw: Option<Fteid>,
    pub pco: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S11Message {
    CreateSessionResponse {
        pdn_cid: PdnCid,
        result: Result<Session, GtpCause>,
    },
    DeleteSessionResponse {
        pdn_cid: PdnCid,
        cause: GtpCause,
    },
    CreateBearerRequest {
        // Set when the request answers a UE bearer resource command.
        pti: Pti,
        linked_ebi: Ebi,
        qos: BearerQos,
        tft: Tft,
        s1u_sgw: Fteid,
    },
    UpdateBearerRequest {
        pti: Pti,
        ebi: Ebi,
        qos: Option<BearerQos>,
        tft: Option<Tft>,
        apn_ambr: Option<Ambr>,
    },
    DeleteBearerRequest {
        pti: Pti,
        ebi: Ebi,
        cause: Option<EsmCause>,
    },
    BearerResourceFailureIndication {
        pti: Pti,
        linked_ebi: Ebi,
        cause: GtpCause,
    },
}

impl S11Message {
    pub fn name(&self) -> &'static str {
        match self {
            S11Message::CreateSessionResponse { .. } => "CreateSessionResponse",
            S11Message::DeleteSessionResponse { .. } => "DeleteSessionResponse",
            S11Message::CreateBearerRequest { .. } => "CreateBearerRequest",
            S11Message::UpdateBearerRequest { .. } => "UpdateBearerRequest",
            S11Message::DeleteBearerRequest { .. } => "DeleteBearerRequest",
            S11Message::BearerResourceFailureIndication { .. } => "BearerResourceFailureIndication",
        }
    }
}
