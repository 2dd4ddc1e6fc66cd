use super::identity::Ebi;
use super::qos::{Ambr, BearerQos};
use super::tft::PacketFilter;
use anyhow::{Result, ensure};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub type PdnCid = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdnType {
    Ipv4,
    Ipv6,
    Ipv4v6,
    // A value that is not a defined PDN type.
    Unknown(u8),
}

/// Fully qualified tunnel endpoint identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fteid {
    pub ip: IpAddr,
    pub teid: u32,
}

impl fmt::Display for Fteid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:#010x}", self.ip, self.teid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PdnAddress {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerState {
    Inactive,
    Active,
    InactivePending,
    ModifyPending,
    ActivePending,
}

#[derive(Debug, Clone)]
pub struct BearerContext {
    pub ebi: Ebi,
    pub pdn_cid: PdnCid,
    pub qos: BearerQos,
    pub tft: Option<Vec<PacketFilter>>,
    // SAE-GW user plane endpoint.
    pub s1u_sgw: Option<Fteid>,
    state: BearerState,
}

impl BearerContext {
    pub fn new(ebi: Ebi, pdn_cid: PdnCid, qos: BearerQos) -> Self {
        BearerContext {
            ebi,
            pdn_cid,
            qos,
            tft: None,
            s1u_sgw: None,
            state: BearerState::Inactive,
        }
    }

    pub fn state(&self) -> BearerState {
        self.state
    }

    /// Move the bearer to a new lifecycle state.  Activation always goes through
    /// ACTIVE_PENDING, and only an active bearer can be modified.
    pub fn set_state(&mut self, state: BearerState) -> Result<()> {
        use BearerState::*;
        let allowed = match state {
            Active => matches!(self.state, ActivePending | ModifyPending | Active),
            ModifyPending => self.state == Active,
            ActivePending => matches!(self.state, Inactive | ActivePending),
            InactivePending | Inactive => true,
        };
        ensure!(
            allowed,
            "Bearer {} cannot move from {:?} to {:?}",
            self.ebi,
            self.state,
            state
        );
        self.state = state;
        Ok(())
    }
}

/// A PDN connection and the bearers that belong to it.
#[derive(Debug, Clone)]
pub struct PdnContext {
    pub cid: PdnCid,
    pub apn: String,
    pub context_identifier: u32,
    pub pdn_type: PdnType,
    pub default_ebi: Ebi,
    pub ambr: Ambr,
    pub pdn_address: Option<PdnAddress>,
    // Our S11 control plane TEID for this session.
    pub local_teid: u32,
    // The SAE-GW's S11 endpoint, known once the session is created.
    pub sgw: Option<Fteid>,
    pub pco: Option<Vec<u8>>,
    pub bearers: BTreeMap<Ebi, BearerContext>,
}

impl PdnContext {
    pub fn default_bearer(&self) -> Option<&BearerContext> {
        self.bearers.get(&self.default_ebi)
    }

    pub fn default_bearer_mut(&mut self) -> Option<&mut BearerContext> {
        self.bearers.get_mut(&self.default_ebi)
    }
}
