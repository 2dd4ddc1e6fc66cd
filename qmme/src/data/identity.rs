use std::fmt;

/// PLMN identity in its 3-byte BCD wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Plmn(pub [u8; 3]);

impl fmt::Display for Plmn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

pub type Imsi = String;

/// EPS GUTI (TS 23.003, 2.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guti {
    pub plmn: Plmn,
    pub mme_group_id: u16,
    pub mme_code: u8,
    pub m_tmsi: u32,
}

impl fmt::Display for Guti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:04x}-{:02x}-{:08x}",
            self.plmn, self.mme_group_id, self.mme_code, self.m_tmsi
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tai {
    pub plmn: Plmn,
    pub tac: u16,
}

impl fmt::Display for Tai {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:04x}", self.plmn, self.tac)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ecgi {
    pub plmn: Plmn,
    // 28 bit E-UTRAN cell identity
    pub cell_id: u32,
}

/// Lower layer correlation key of a UE: the eNB and the eNB's S1AP id for the UE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnbUeKey {
    pub enb_id: u32,
    pub enb_ue_s1ap_id: u32,
}

/// Procedure transaction identity (TS 24.007, 11.2.3.1a).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pti(pub u8);

impl Pti {
    pub const UNASSIGNED: Pti = Pti(0);
    pub const RESERVED: Pti = Pti(255);

    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }

    /// A UE may only use assigned, non-reserved values.
    pub fn is_valid(self) -> bool {
        self != Self::UNASSIGNED && self != Self::RESERVED
    }
}

impl fmt::Display for Pti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// EPS bearer identity (TS 24.007, 11.2.3.1.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ebi(pub u8);

impl Ebi {
    pub const UNASSIGNED: Ebi = Ebi(0);
    pub const FIRST: u8 = 5;
    pub const LAST: u8 = 15;

    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }

    pub fn is_valid(self) -> bool {
        (Self::FIRST..=Self::LAST).contains(&self.0)
    }
}

impl fmt::Display for Ebi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An identity held for a UE, together with whether the network has verified it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verifiable<T> {
    pub value: T,
    pub valid: bool,
}

impl<T> Verifiable<T> {
    pub fn present(value: T) -> Self {
        Verifiable {
            value,
            valid: false,
        }
    }

    pub fn verified(value: T) -> Self {
        Verifiable { value, valid: true }
    }
}
