use crate::cause::EmmCause;
use crate::nas::{DownlinkNas, EmmIndication, MobileIdentity, UplinkNas};
use crate::peers::{GatewayClient, HssClient, NasTransport};
use crate::procedures::{NasTimer, UeEvent, UeMessageHandler, UeSummary};
use crate::s6a::{S6aAnswer, S6aRequest};
use crate::s11::{S11Message, S11Request};
use crate::timer::{TimerId, TimerService};
use crate::{Config, EnbUeKey, Guti, HandlerApi, KeyUpdate, UeContextStore};
use anyhow::{Result, anyhow, bail};
use async_channel::Sender;
use async_trait::async_trait;
use atomic_counter::{AtomicCounter, RelaxedCounter};
use slog::{Logger, debug, info, o, warn};
use std::sync::Arc;
use std::time::Duration;

// Reserved for a GUTI that has been deallocated (TS 23.003, 2.4).
const INVALID_M_TMSI: u32 = 0xffff_ffff;

/// The services the MME core uses, implemented by the embedding process.
#[derive(Clone)]
pub struct Peers {
    pub enb: Arc<dyn NasTransport>,
    pub hss: Arc<dyn HssClient>,
    pub gateway: Arc<dyn GatewayClient>,
}

/// The MME signaling core.  Each UE is served by its own task; this object routes events
/// to those tasks and provides the services they need.
#[derive(Clone)]
pub struct Mme {
    config: Config,
    logger: Logger,
    ues: UeContextStore<Sender<UeEvent>>,
    timers: TimerService<NasTimer>,
    next_teid: Arc<RelaxedCounter>,
    peers: Peers,
}

impl Mme {
    pub fn new(config: Config, peers: Peers, logger: Logger) -> Self {
        info!(
            logger,
            "MME started, PLMN {} group {:04x} code {:02x}",
            config.plmn,
            config.mme_group_id,
            config.mme_code
        );
        Mme {
            config,
            logger,
            ues: UeContextStore::new(),
            timers: TimerService::new(),
            next_teid: Arc::new(RelaxedCounter::new(1)),
            peers,
        }
    }

    /// Deliver an uplink NAS message from the lower layer.  `ue_id` is the lower layer's
    /// id for the UE; `enb_ue_key` its correlation key, if it has one.
    pub async fn uplink_nas(
        &self,
        ue_id: u32,
        enb_ue_key: Option<EnbUeKey>,
        message: UplinkNas,
    ) -> Result<()> {
        if !self.ues.contains(ue_id) && !self.route_unknown_ue(ue_id, enb_ue_key, &message).await? {
            return Ok(());
        }
        self.dispatch(
            ue_id,
            UeEvent::Uplink {
                ue_id,
                enb_ue_key,
                message,
            },
        )
        .await
    }

    pub async fn s6a_answer(&self, ue_id: u32, answer: S6aAnswer) -> Result<()> {
        self.dispatch(ue_id, UeEvent::S6a(answer)).await
    }

    pub async fn s11_message(&self, ue_id: u32, message: S11Message) -> Result<()> {
        self.dispatch(ue_id, UeEvent::S11(message)).await
    }

    /// Ask a UE's task for a snapshot of its context.
    pub async fn ue_summary(&self, ue_id: u32) -> Result<UeSummary> {
        let (sender, receiver) = async_channel::bounded(1);
        self.dispatch(ue_id, UeEvent::Query(sender)).await?;
        Ok(receiver.recv().await?)
    }

    pub fn ue_count(&self) -> usize {
        self.ues.len()
    }

    pub fn find_ue_by_imsi(&self, imsi: &str) -> Option<u32> {
        self.ues.find_by_imsi(imsi)
    }

    pub fn find_ue_by_guti(&self, guti: &Guti) -> Option<u32> {
        self.ues.find_by_guti(guti)
    }

    async fn dispatch(&self, ue_id: u32, event: UeEvent) -> Result<()> {
        let Some(sender) = self.ues.find(ue_id) else {
            bail!("UE {ue_id} not found");
        };
        sender
            .send(event)
            .await
            .map_err(|_| anyhow!("UE {ue_id} task has exited"))
    }

    // Find the context a message from a new lower layer id belongs to, moving it onto
    // `ue_id`, or create one if the message is allowed to start a context.  Returns false
    // if the message has been dealt with here.
    async fn route_unknown_ue(
        &self,
        ue_id: u32,
        enb_ue_key: Option<EnbUeKey>,
        message: &UplinkNas,
    ) -> Result<bool> {
        let existing = match message {
            UplinkNas::AttachRequest(r) => r
                .guti
                .and_then(|guti| self.ues.find_by_guti(&guti))
                .or_else(|| r.imsi.as_ref().and_then(|imsi| self.ues.find_by_imsi(imsi)))
                .or_else(|| enb_ue_key.and_then(|key| self.ues.find_by_enb_key(&key))),
            UplinkNas::TrackingAreaUpdateRequest(r) => {
                let existing = self.ues.find_by_guti(&r.old_guti);
                if existing.is_none() {
                    warn!(self.logger, "Tracking area update from unknown GUTI {}", r.old_guti);
                    self.peers
                        .enb
                        .send_downlink_nas(
                            ue_id,
                            DownlinkNas::TrackingAreaUpdateReject {
                                cause: EmmCause::ImplicitlyDetached,
                            },
                        )
                        .await?;
                    return Ok(false);
                }
                existing
            }
            UplinkNas::DetachRequest(r) => match &r.identity {
                MobileIdentity::Guti(guti) => self.ues.find_by_guti(guti),
                MobileIdentity::Imsi(imsi) => self.ues.find_by_imsi(imsi),
                _ => None,
            },
            _ => None,
        };

        match existing {
            Some(old_id) => {
                let old_key = self.ues.enb_ue_key(old_id);
                if old_key.is_some() && enb_ue_key.is_some() && old_key != enb_ue_key {
                    warn!(
                        self.logger,
                        "Duplicate lower layer context for UE {old_id}, now {ue_id}"
                    );
                }
                debug!(self.logger, "Moving UE {old_id} to id {ue_id}");
                self.ues.update_keys(old_id, KeyUpdate::UeId(ue_id))?;
            }
            None if matches!(message, UplinkNas::AttachRequest(_)) => {
                let sender = UeMessageHandler::spawn(
                    ue_id,
                    enb_ue_key,
                    self.clone(),
                    self.logger.new(o!("ue_id" => ue_id)),
                );
                self.ues.insert(ue_id, sender, enb_ue_key)?;
            }
            None => bail!("{} from unknown UE {ue_id}", message.name()),
        }
        Ok(true)
    }
}

#[async_trait]
impl HandlerApi for Mme {
    fn config(&self) -> &Config {
        &self.config
    }

    fn update_ue_keys(&self, ue_id: u32, update: KeyUpdate) -> Result<()> {
        self.ues.update_keys(ue_id, update)
    }

    fn delete_ue_channel(&self, ue_id: u32) {
        self.ues.remove(ue_id);
    }

    fn start_timer(&self, duration: Duration, timer: NasTimer, events: Sender<UeEvent>) -> TimerId {
        self.timers.start(duration, timer, events)
    }

    fn stop_timer(&self, id: TimerId) -> Option<NasTimer> {
        self.timers.stop(id)
    }

    fn allocate_guti(&self) -> Guti {
        loop {
            let guti = Guti {
                plmn: self.config.plmn,
                mme_group_id: self.config.mme_group_id,
                mme_code: self.config.mme_code,
                m_tmsi: rand::random::<u32>(),
            };
            if guti.m_tmsi != INVALID_M_TMSI && self.ues.find_by_guti(&guti).is_none() {
                return guti;
            }
        }
    }

    fn allocate_teid(&self) -> u32 {
        self.next_teid.inc() as u32
    }

    async fn send_downlink_nas(&self, ue_id: u32, message: DownlinkNas) -> Result<()> {
        self.peers.enb.send_downlink_nas(ue_id, message).await
    }

    async fn emm_indication(&self, ue_id: u32, indication: EmmIndication) {
        self.peers.enb.indicate(ue_id, indication).await
    }

    async fn hss_request(&self, ue_id: u32, request: S6aRequest) -> Result<()> {
        self.peers.hss.send(ue_id, request).await
    }

    async fn gateway_request(&self, ue_id: u32, request: S11Request) -> Result<()> {
        self.peers.gateway.send(ue_id, request).await
    }
}
