mod data;
mod mme;
mod procedures;
mod protocols;
mod timer;

use data::*;
use procedures::HandlerApi;

pub use data::{
    AuthVector, BearerQos, BearerState, Ebi, EmmState, EnbUeKey, FlowQos, Fteid, Guti, Imsi,
    NasTimers, PacketFilter, PacketFilterComponent, PacketFilterDirection, PdnAddress, PdnType,
    Plmn, Pti, SubscriptionData, Tai, Tft, TftOperation, UeNetworkCapability,
};
pub use data::{
    Ambr, ApnConfiguration, Arp, BitRates, Config, Ecgi, load_config_file, parse_config, tft,
};
pub use mme::{Mme, Peers};
pub use procedures::{PdnSummary, UeSummary};
pub use protocols::{cause, nas, peers, s6a, s11};
