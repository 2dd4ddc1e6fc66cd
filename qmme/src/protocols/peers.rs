//! peers - the services the MME core talks to, implemented by the embedding process

use super::nas::{DownlinkNas, EmmIndication};
use super::s6a::S6aRequest;
use super::s11::S11Request;
use anyhow::Result;
use async_trait::async_trait;

/// The lower layer (S1AP and NAS codec) towards the UE.
#[async_trait]
pub trait NasTransport: Send + Sync + 'static {
    async fn send_downlink_nas(&self, ue_id: u32, message: DownlinkNas) -> Result<()>;
    async fn indicate(&self, ue_id: u32, indication: EmmIndication);
}

/// S6a client.  Answers come back through `Mme::s6a_answer()`.
#[async_trait]
pub trait HssClient: Send + Sync + 'static {
    async fn send(&self, ue_id: u32, request: S6aRequest) -> Result<()>;
}

/// S11 client.  Responses and gateway initiated requests come back through
/// `Mme::s11_message()`.
#[async_trait]
pub trait GatewayClient: Send + Sync + 'static {
    async fn send(&self, ue_id: u32, request: S11Request) -> Result<()>;
}
