//! mock_hss - enables a test script to assume the role of the HSS on S6a

use crate::mock::Mock;
use anyhow::Result;
use async_channel::Sender;
use async_trait::async_trait;
use hex_literal::hex;
use qmme::peers::HssClient;
use qmme::s6a::S6aRequest;
use qmme::{Ambr, ApnConfiguration, Arp, AuthVector, PdnType, SubscriptionData};
use slog::{Logger, o};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

pub const XRES: [u8; 8] = hex!("a54211d5e3ba50bf");

pub struct MockHss {
    mock: Mock<S6aRequest>,
}

impl Deref for MockHss {
    type Target = Mock<S6aRequest>;

    fn deref(&self) -> &Self::Target {
        &self.mock
    }
}

impl DerefMut for MockHss {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.mock
    }
}

struct Client(Sender<(u32, S6aRequest)>);

#[async_trait]
impl HssClient for Client {
    async fn send(&self, ue_id: u32, request: S6aRequest) -> Result<()> {
        self.0.send((ue_id, request)).await?;
        Ok(())
    }
}

impl MockHss {
    pub fn new(logger: &Logger) -> Self {
        MockHss {
            mock: Mock::new(logger.new(o!("hss" => 1))),
        }
    }

    pub fn client(&self) -> Arc<dyn HssClient> {
        Arc::new(Client(self.recorder()))
    }

    pub fn auth_vector(&self) -> AuthVector {
        AuthVector {
            rand: hex!("23553cbe9637a89d218ae64dae47bf35"),
            autn: hex!("55f328b43577b9b94a9ffac354dfafb3"),
            xres: XRES.to_vec(),
            kasme: [0x5a; 32],
        }
    }

    /// A subscriber with a default "internet" APN and a second "ims" APN.
    pub fn subscription(&self) -> SubscriptionData {
        let apn = |context_identifier, name: &str, qci, priority_level| ApnConfiguration {
            context_identifier,
            apn: name.to_string(),
            pdn_type: PdnType::Ipv4v6,
            qci,
            arp: Arp {
                priority_level,
                pre_emption_capability: false,
                pre_emption_vulnerability: true,
            },
            ambr: Ambr {
                uplink: 50_000,
                downlink: 100_000,
            },
        };
        SubscriptionData {
            msisdn: Some("33600000001".to_string()),
            ue_ambr: Ambr {
                uplink: 100_000,
                downlink: 200_000,
            },
            default_context_identifier: 1,
            apn_configurations: vec![apn(1, "internet", 9, 8), apn(2, "ims", 5, 2)],
        }
    }
}
