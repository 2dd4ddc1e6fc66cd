use crate::cause::EmmCause;

pub const KSI_NO_KEY_AVAILABLE: u8 = 7;

/// An E-UTRAN authentication vector as supplied by the HSS.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthVector {
    pub rand: [u8; 16],
    pub autn: [u8; 16],
    pub xres: Vec<u8>,
    pub kasme: [u8; 32],
}

// Keep key material out of logs.
impl std::fmt::Debug for AuthVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthVector(rand={})", hex::encode(self.rand))
    }
}

/// UE network capability (TS 24.301, 9.9.3.34).  Bit 8 of each octet is algorithm 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UeNetworkCapability {
    pub eea: u8,
    pub eia: u8,
    pub uea: Option<u8>,
    pub uia: Option<u8>,
}

impl UeNetworkCapability {
    pub fn supports_eea(&self, algorithm: u8) -> bool {
        algorithm < 8 && self.eea & (0x80 >> algorithm) != 0
    }

    pub fn supports_eia(&self, algorithm: u8) -> bool {
        algorithm < 8 && self.eia & (0x80 >> algorithm) != 0
    }
}

/// EPS security context.  Not in use for NAS until `activated`.
#[derive(Clone)]
pub struct SecurityContext {
    pub ksi: u8,
    pub kasme: [u8; 32],
    pub eea: u8,
    pub eia: u8,
    pub ul_count: u32,
    pub dl_count: u32,
    pub activated: bool,
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("ksi", &self.ksi)
            .field("eea", &self.eea)
            .field("eia", &self.eia)
            .field("activated", &self.activated)
            .finish()
    }
}

impl SecurityContext {
    pub fn new(ksi: u8, vector: &AuthVector) -> Self {
        SecurityContext {
            ksi,
            kasme: vector.kasme,
            eea: 0,
            eia: 0,
            ul_count: 0,
            dl_count: 0,
            activated: false,
        }
    }

    /// Pick the first integrity and ciphering algorithms in the operator's order of
    /// preference that the UE also supports.
    pub fn select_algorithms(
        &mut self,
        capability: &UeNetworkCapability,
        integrity_preference: &[u8],
        ciphering_preference: &[u8],
        emergency: bool,
    ) -> Result<(), EmmCause> {
        // EIA0 is only permitted for unauthenticated emergency bearer services.
        let Some(eia) = integrity_preference
            .iter()
            .copied()
            .find(|a| capability.supports_eia(*a) && (*a != 0 || emergency))
        else {
            return Err(EmmCause::UeSecurityCapabilitiesMismatch);
        };
        let Some(eea) = ciphering_preference
            .iter()
            .copied()
            .find(|a| capability.supports_eea(*a))
        else {
            return Err(EmmCause::UeSecurityCapabilitiesMismatch);
        };
        self.eia = eia;
        self.eea = eea;
        Ok(())
    }
}

/// The next eKSI to assign after `current`.
pub fn next_ksi(current: Option<u8>) -> u8 {
    match current {
        Some(ksi) if ksi < KSI_NO_KEY_AVAILABLE => (ksi + 1) % KSI_NO_KEY_AVAILABLE,
        _ => 0,
    }
}
