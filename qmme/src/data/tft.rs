//! tft - traffic flow templates and the checks applied to TFT operations (TS 24.301, 6.4.2.3 / 6.5.4.3)

use crate::cause::EsmCause;
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

pub const MAX_PACKET_FILTERS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFilterDirection {
    PreRelease7,
    Downlink,
    Uplink,
    Bidirectional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketFilterComponent {
    Ipv4RemoteAddress { addr: Ipv4Addr, mask: Ipv4Addr },
    Ipv6RemoteAddress { addr: Ipv6Addr, prefix_len: u8 },
    ProtocolIdentifier(u8),
    LocalPort(u16),
    LocalPortRange(u16, u16),
    RemotePort(u16),
    RemotePortRange(u16, u16),
    SecurityParameterIndex(u32),
    TypeOfService { value: u8, mask: u8 },
    FlowLabel(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketFilter {
    // 0-15
    pub id: u8,
    pub direction: PacketFilterDirection,
    // Evaluation precedence, unique within a TFT.
    pub precedence: u8,
    // Empty for a delete operation, where only the identifier is signalled.
    pub components: Vec<PacketFilterComponent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TftOperation {
    Spare,
    CreateNew,
    DeleteExisting,
    AddFilters,
    ReplaceFilters,
    DeleteFilters,
    NoOperation,
}

/// A traffic flow template IE: an operation on a bearer's packet filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tft {
    pub operation: TftOperation,
    pub filters: Vec<PacketFilter>,
}

impl Tft {
    pub fn create(filters: Vec<PacketFilter>) -> Self {
        Tft {
            operation: TftOperation::CreateNew,
            filters,
        }
    }
}

/// A rejected TFT operation.  Semantic errors leave the installed filters usable;
/// syntactic errors mean the IE itself cannot be acted on.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TftError {
    #[error("semantic TFT error - {0}")]
    Semantic(EsmCause),
    #[error("syntactic TFT error - {0}")]
    Syntactic(EsmCause),
}

impl TftError {
    pub fn cause(self) -> EsmCause {
        match self {
            TftError::Semantic(c) | TftError::Syntactic(c) => c,
        }
    }

    pub fn is_semantic(self) -> bool {
        matches!(self, TftError::Semantic(_))
    }
}

use EsmCause::{
    SemanticErrorInTftOperation as SEMANTIC_TFT, SemanticErrorsInPacketFilters as SEMANTIC_FILTER,
    SyntacticalErrorInTftOperation as SYNTACTIC_TFT,
    SyntacticalErrorsInPacketFilters as SYNTACTIC_FILTER,
};

/// Check a TFT operation against the filters currently installed on a bearer.
pub fn verify(tft: &Tft, installed: Option<&[PacketFilter]>) -> Result<(), TftError> {
    if tft.filters.len() > MAX_PACKET_FILTERS {
        return Err(TftError::Syntactic(SYNTACTIC_TFT));
    }
    match tft.operation {
        TftOperation::CreateNew => verify_create(tft, installed),
        TftOperation::AddFilters => verify_add(tft, installed),
        TftOperation::ReplaceFilters => verify_replace(tft, installed),
        TftOperation::DeleteFilters => verify_delete(tft, installed),
        TftOperation::DeleteExisting => {
            if installed.is_none() {
                Err(TftError::Semantic(SEMANTIC_TFT))
            } else if !tft.filters.is_empty() {
                Err(TftError::Syntactic(SYNTACTIC_TFT))
            } else {
                Ok(())
            }
        }
        TftOperation::NoOperation => {
            if tft.filters.is_empty() {
                Ok(())
            } else {
                Err(TftError::Syntactic(SYNTACTIC_TFT))
            }
        }
        TftOperation::Spare => Err(TftError::Syntactic(SYNTACTIC_TFT)),
    }
}

fn verify_create(tft: &Tft, installed: Option<&[PacketFilter]>) -> Result<(), TftError> {
    if installed.is_some() || tft.filters.is_empty() {
        return Err(TftError::Semantic(SEMANTIC_TFT));
    }
    if tft.filters.iter().any(|f| f.components.is_empty()) {
        return Err(TftError::Syntactic(SYNTACTIC_TFT));
    }
    unique_ids(&tft.filters)?;
    unique_precedences(tft.filters.iter())
}

fn verify_add(tft: &Tft, installed: Option<&[PacketFilter]>) -> Result<(), TftError> {
    let Some(installed) = installed else {
        return Err(TftError::Semantic(SEMANTIC_TFT));
    };
    if tft.filters.is_empty() || tft.filters.iter().any(|f| f.components.is_empty()) {
        return Err(TftError::Syntactic(SYNTACTIC_TFT));
    }
    if installed.len() + tft.filters.len() > MAX_PACKET_FILTERS {
        return Err(TftError::Semantic(SEMANTIC_TFT));
    }
    unique_ids(&tft.filters)?;
    if tft
        .filters
        .iter()
        .any(|f| installed.iter().any(|i| i.id == f.id))
    {
        return Err(TftError::Syntactic(SYNTACTIC_FILTER));
    }
    unique_precedences(installed.iter().chain(tft.filters.iter()))
}

fn verify_replace(tft: &Tft, installed: Option<&[PacketFilter]>) -> Result<(), TftError> {
    let Some(installed) = installed else {
        return Err(TftError::Semantic(SEMANTIC_TFT));
    };
    if tft.filters.is_empty() || tft.filters.iter().any(|f| f.components.is_empty()) {
        return Err(TftError::Syntactic(SYNTACTIC_TFT));
    }
    unique_ids(&tft.filters)?;
    if tft
        .filters
        .iter()
        .any(|f| !installed.iter().any(|i| i.id == f.id))
    {
        return Err(TftError::Syntactic(SYNTACTIC_TFT));
    }
    let untouched = installed
        .iter()
        .filter(|i| !tft.filters.iter().any(|f| f.id == i.id));
    unique_precedences(untouched.chain(tft.filters.iter()))
}

fn verify_delete(tft: &Tft, installed: Option<&[PacketFilter]>) -> Result<(), TftError> {
    let Some(installed) = installed else {
        return Err(TftError::Semantic(SEMANTIC_TFT));
    };
    if tft.filters.is_empty() {
        return Err(TftError::Syntactic(SYNTACTIC_TFT));
    }
    let mut seen = HashSet::new();
    for filter in tft.filters.iter() {
        if !seen.insert(filter.id) || !installed.iter().any(|i| i.id == filter.id) {
            return Err(TftError::Syntactic(SYNTACTIC_TFT));
        }
    }
    if seen.len() == installed.len() {
        // Removing every filter has to be signalled as "delete existing TFT".
        return Err(TftError::Semantic(SEMANTIC_TFT));
    }
    Ok(())
}

fn unique_ids(filters: &[PacketFilter]) -> Result<(), TftError> {
    let mut seen = HashSet::new();
    if filters.iter().all(|f| f.id < 16 && seen.insert(f.id)) {
        Ok(())
    } else {
        Err(TftError::Syntactic(SYNTACTIC_FILTER))
    }
}

fn unique_precedences<'a>(filters: impl Iterator<Item = &'a PacketFilter>) -> Result<(), TftError> {
    let mut seen = HashSet::new();
    for filter in filters {
        if !seen.insert(filter.precedence) {
            return Err(TftError::Semantic(SEMANTIC_FILTER));
        }
    }
    Ok(())
}

/// The filter set that results from applying a verified TFT operation.
pub fn apply(tft: &Tft, installed: Option<&[PacketFilter]>) -> Option<Vec<PacketFilter>> {
    let mut filters = match tft.operation {
        TftOperation::CreateNew => tft.filters.clone(),
        TftOperation::DeleteExisting => return None,
        TftOperation::AddFilters => {
            let mut filters = installed.map(|f| f.to_vec()).unwrap_or_default();
            filters.extend(tft.filters.iter().cloned());
            filters
        }
        TftOperation::ReplaceFilters => installed
            .unwrap_or_default()
            .iter()
            .map(|i| {
                tft.filters
                    .iter()
                    .find(|f| f.id == i.id)
                    .unwrap_or(i)
                    .clone()
            })
            .collect(),
        TftOperation::DeleteFilters => installed
            .unwrap_or_default()
            .iter()
            .filter(|i| !tft.filters.iter().any(|f| f.id == i.id))
            .cloned()
            .collect(),
        TftOperation::NoOperation | TftOperation::Spare => return installed.map(|f| f.to_vec()),
    };
    filters.sort_by_key(|f| f.precedence);
    Some(filters)
}
