use super::identity::{Ebi, EnbUeKey, Guti, Imsi, Tai, Verifiable};
use super::pdn_context::{BearerContext, PdnCid, PdnContext};
use super::procedure_store::ProcedureStore;
use super::security_context::{AuthVector, SecurityContext, UeNetworkCapability};
use super::subscription::SubscriptionData;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmmState {
    Deregistered,
    CommonProcedureInitiated,
    Registered,
}

/// The mobility and session state of one UE.  Owned by the UE's message handler task.
#[derive(Debug)]
pub struct UeContext {
    pub ue_id: u32,
    pub enb_ue_key: Option<EnbUeKey>,
    pub imsi: Option<Verifiable<Imsi>>,
    pub imei: Option<Verifiable<String>>,
    pub guti: Option<Verifiable<Guti>>,
    // The GUTI the UE used before we allocated it a new one.
    pub old_guti: Option<Guti>,
    pub emm_state: EmmState,
    pub security: Option<SecurityContext>,
    pub auth_vectors: Vec<AuthVector>,
    pub ue_network_capability: Option<UeNetworkCapability>,
    pub ms_network_capability: Option<Vec<u8>>,
    pub last_visited_tai: Option<Tai>,
    pub originating_tai: Option<Tai>,
    pub tai_list: Vec<Tai>,
    pub subscription: Option<SubscriptionData>,
    pub attached_before: bool,
    // Created for this attach rather than found in the store.
    pub dynamic: bool,
    pub emergency: bool,
    pub pdn_contexts: BTreeMap<PdnCid, PdnContext>,
    pub procedures: ProcedureStore,
    // Set once the context is torn down; the handler task then exits.
    pub released: bool,
}

impl UeContext {
    pub fn new(ue_id: u32, enb_ue_key: Option<EnbUeKey>) -> Self {
        UeContext {
            ue_id,
            enb_ue_key,
            imsi: None,
            imei: None,
            guti: None,
            old_guti: None,
            emm_state: EmmState::Deregistered,
            security: None,
            auth_vectors: vec![],
            ue_network_capability: None,
            ms_network_capability: None,
            last_visited_tai: None,
            originating_tai: None,
            tai_list: vec![],
            subscription: None,
            attached_before: false,
            dynamic: true,
            emergency: false,
            pdn_contexts: BTreeMap::new(),
            procedures: ProcedureStore::default(),
            released: false,
        }
    }

    pub fn imsi(&self) -> Option<&Imsi> {
        self.imsi.as_ref().map(|x| &x.value)
    }

    pub fn guti(&self) -> Option<Guti> {
        self.guti.as_ref().map(|x| x.value)
    }

    /// Whether NAS security is in use with the given key set identifier.
    pub fn security_active_with(&self, ksi: u8) -> bool {
        self.security
            .as_ref()
            .is_some_and(|sc| sc.activated && sc.ksi == ksi)
    }

    pub fn bearer(&self, ebi: Ebi) -> Option<&BearerContext> {
        self.pdn_contexts
            .values()
            .find_map(|pdn| pdn.bearers.get(&ebi))
    }

    pub fn bearer_mut(&mut self, ebi: Ebi) -> Option<&mut BearerContext> {
        self.pdn_contexts
            .values_mut()
            .find_map(|pdn| pdn.bearers.get_mut(&ebi))
    }

    /// The PDN that owns a bearer.
    pub fn pdn_of_bearer(&self, ebi: Ebi) -> Option<&PdnContext> {
        self.pdn_contexts
            .values()
            .find(|pdn| pdn.bearers.contains_key(&ebi))
    }

    pub fn remove_bearer(&mut self, ebi: Ebi) -> Option<BearerContext> {
        self.pdn_contexts
            .values_mut()
            .find_map(|pdn| pdn.bearers.remove(&ebi))
    }

    pub fn pdn_by_default_ebi(&self, ebi: Ebi) -> Option<&PdnContext> {
        self.pdn_contexts.values().find(|pdn| pdn.default_ebi == ebi)
    }

    pub fn pdn_by_apn(&self, apn: &str) -> Option<&PdnContext> {
        self.pdn_contexts
            .values()
            .find(|pdn| pdn.apn.eq_ignore_ascii_case(apn))
    }

    /// Lowest EPS bearer identity not used by any bearer of the UE, including bearers whose
    /// activation is still pending.
    pub fn free_ebi(&self) -> Option<Ebi> {
        (Ebi::FIRST..=Ebi::LAST)
            .map(Ebi)
            .find(|ebi| self.bearer(*ebi).is_none())
    }

    pub fn allocate_pdn_cid(&self) -> Option<PdnCid> {
        (0..=PdnCid::MAX).find(|cid| !self.pdn_contexts.contains_key(cid))
    }
}
