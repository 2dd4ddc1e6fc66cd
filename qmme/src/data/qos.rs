use crate::cause::EsmCause;

/// Allocation and retention priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Arp {
    // 1 (highest) to 15
    pub priority_level: u8,
    pub pre_emption_capability: bool,
    pub pre_emption_vulnerability: bool,
}

/// Uplink and downlink bit rates in kbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitRates {
    pub uplink: u64,
    pub downlink: u64,
}

impl BitRates {
    pub fn is_zero(&self) -> bool {
        self.uplink == 0 && self.downlink == 0
    }

    fn covers(&self, other: &BitRates) -> bool {
        self.uplink >= other.uplink && self.downlink >= other.downlink
    }
}

pub type Ambr = BitRates;

/// EPS bearer level QoS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BearerQos {
    pub qci: u8,
    pub arp: Arp,
    pub gbr: BitRates,
    pub mbr: BitRates,
}

impl BearerQos {
    /// Default bearer QoS: the subscribed QCI and ARP with no bit rates.
    pub fn non_gbr(qci: u8, arp: Arp) -> Self {
        BearerQos {
            qci,
            arp,
            gbr: BitRates::default(),
            mbr: BitRates::default(),
        }
    }

    pub fn is_gbr(&self) -> bool {
        is_gbr_qci(self.qci)
    }

    /// Checks that a bearer may be activated or modified with these values.
    pub fn validate(&self) -> Result<(), EsmCause> {
        if !(1..=15).contains(&self.arp.priority_level) {
            return Err(EsmCause::EpsQosNotAccepted);
        }
        validate_rates(self.qci, &self.gbr, &self.mbr)
    }
}

/// QoS requested by the UE in a bearer resource allocation or modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowQos {
    pub qci: u8,
    pub gbr: BitRates,
    pub mbr: BitRates,
}

impl FlowQos {
    pub fn validate(&self) -> Result<(), EsmCause> {
        validate_rates(self.qci, &self.gbr, &self.mbr)
    }
}

// TS 23.203, table 6.1.7.
fn is_standardized_qci(qci: u8) -> bool {
    matches!(qci, 1..=9 | 65..=67 | 69..=76 | 79..=80 | 82..=85)
}

fn is_operator_qci(qci: u8) -> bool {
    (128..=254).contains(&qci)
}

fn is_gbr_qci(qci: u8) -> bool {
    matches!(qci, 1..=4 | 65..=67 | 71..=76 | 82..=85)
}

fn validate_rates(qci: u8, gbr: &BitRates, mbr: &BitRates) -> Result<(), EsmCause> {
    if !is_standardized_qci(qci) && !is_operator_qci(qci) {
        return Err(EsmCause::EpsQosNotAccepted);
    }
    if is_gbr_qci(qci) {
        if !mbr.covers(gbr) {
            return Err(EsmCause::EpsQosNotAccepted);
        }
    } else if !gbr.is_zero() || !mbr.is_zero() {
        // Non-GBR bearers are governed by the APN-AMBR only.
        return Err(EsmCause::EpsQosNotAccepted);
    }
    Ok(())
}
