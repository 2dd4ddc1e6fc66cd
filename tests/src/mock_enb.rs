//! mock_enb - enables a test script to assume the role of the lower layer towards the UE

use crate::mock::Mock;
use anyhow::Result;
use async_channel::Sender;
use async_trait::async_trait;
use qmme::nas::{DownlinkNas, EmmIndication};
use qmme::peers::NasTransport;
use slog::{Logger, debug, o};
use std::sync::Arc;

pub struct MockEnb {
    pub nas: Mock<DownlinkNas>,
    pub indications: Mock<EmmIndication>,
}

struct Transport {
    nas: Sender<(u32, DownlinkNas)>,
    indications: Sender<(u32, EmmIndication)>,
    logger: Logger,
}

#[async_trait]
impl NasTransport for Transport {
    async fn send_downlink_nas(&self, ue_id: u32, message: DownlinkNas) -> Result<()> {
        debug!(self.logger, "UE {ue_id} << {}", message.name());
        self.nas.send((ue_id, message)).await?;
        Ok(())
    }

    async fn indicate(&self, ue_id: u32, indication: EmmIndication) {
        debug!(self.logger, "UE {ue_id} indication {indication:?}");
        let _ = self.indications.send((ue_id, indication)).await;
    }
}

impl MockEnb {
    pub fn new(logger: &Logger) -> Self {
        let logger = logger.new(o!("enb" => 1));
        MockEnb {
            nas: Mock::new(logger.clone()),
            indications: Mock::new(logger),
        }
    }

    pub fn transport(&self) -> Arc<dyn NasTransport> {
        Arc::new(Transport {
            nas: self.nas.recorder(),
            indications: self.indications.recorder(),
            logger: self.nas.logger.clone(),
        })
    }
}
