use super::pdn_context::PdnType;
use super::qos::{Ambr, Arp};

/// One APN configuration from the subscriber's profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnConfiguration {
    pub context_identifier: u32,
    pub apn: String,
    pub pdn_type: PdnType,
    pub qci: u8,
    pub arp: Arp,
    pub ambr: Ambr,
}

/// Subscription data returned by the HSS in an update location answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionData {
    pub msisdn: Option<String>,
    pub ue_ambr: Ambr,
    pub default_context_identifier: u32,
    pub apn_configurations: Vec<ApnConfiguration>,
}

impl SubscriptionData {
    /// Look up the configuration for the requested APN, or the default one if the UE
    /// did not ask for an APN.  APN names compare case insensitively (TS 23.003, 9.1).
    pub fn select_apn(&self, requested: Option<&str>) -> Option<&ApnConfiguration> {
        match requested {
            Some(apn) => self
                .apn_configurations
                .iter()
                .find(|c| c.apn.eq_ignore_ascii_case(apn)),
            None => self
                .apn_configurations
                .iter()
                .find(|c| c.context_identifier == self.default_context_identifier),
        }
    }
}
