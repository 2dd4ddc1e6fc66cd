use super::ue_procedures::{NasTimer, UeEvent};
use crate::nas::{DownlinkNas, EmmIndication};
use crate::s6a::S6aRequest;
use crate::s11::S11Request;
use crate::timer::TimerId;
use crate::{Config, Guti, KeyUpdate};
use anyhow::Result;
use async_channel::Sender;
use async_trait::async_trait;
use std::time::Duration;

/// Trait representing the collection of services needed by MME handlers.
#[async_trait]
pub trait HandlerApi: Send + Sync + Clone + 'static {
    fn config(&self) -> &Config;

    fn update_ue_keys(&self, ue_id: u32, update: KeyUpdate) -> Result<()>;
    fn delete_ue_channel(&self, ue_id: u32);

    fn start_timer(&self, duration: Duration, timer: NasTimer, events: Sender<UeEvent>) -> TimerId;
    fn stop_timer(&self, id: TimerId) -> Option<NasTimer>;

    // A GUTI not currently assigned to any UE.
    fn allocate_guti(&self) -> Guti;
    fn allocate_teid(&self) -> u32;

    async fn send_downlink_nas(&self, ue_id: u32, message: DownlinkNas) -> Result<()>;
    async fn emm_indication(&self, ue_id: u32, indication: EmmIndication);
    async fn hss_request(&self, ue_id: u32, request: S6aRequest) -> Result<()>;
    async fn gateway_request(&self, ue_id: u32, request: S11Request) -> Result<()>;
}
