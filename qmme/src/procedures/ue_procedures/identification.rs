//! identification - obtain an identity the network does not have (TS 24.301, 5.4.4)

use super::{CommonOutcome, Retransmission, TimerKind, UeProcedure};
use crate::cause::EmmCause;
use crate::nas::{DownlinkNas, IdentityType, MobileIdentity};
use crate::timer::TimerId;
use crate::{CommonKind, CommonProc, Continuation, Ebi, HandlerApi, KeyUpdate, Pti, Verifiable};
use anyhow::Result;
use derive_deref::{Deref, DerefMut};
use slog::{info, warn};

const T3470_MAX_EXPIRIES: u32 = 5;

#[derive(Deref, DerefMut)]
pub struct IdentificationProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

impl<'a, A: HandlerApi> IdentificationProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        IdentificationProcedure(inner)
    }

    pub async fn start(
        mut self,
        identity_type: IdentityType,
        on_success: Continuation,
    ) -> Result<CommonOutcome> {
        let message = DownlinkNas::IdentityRequest { identity_type };
        self.send_nas(message.clone()).await;
        let mut procedure =
            CommonProc::new(CommonKind::Identification { identity_type }, on_success);
        procedure.timer = Some(self.start_nas_timer(
            TimerKind::T3470,
            Pti::UNASSIGNED,
            Ebi::UNASSIGNED,
        ));
        procedure.last_message = Some(message);
        self.install_common_procedure(procedure);
        Ok(CommonOutcome::Pending)
    }

    pub async fn response(mut self, identity: MobileIdentity) -> Result<CommonOutcome> {
        let Some(procedure) =
            self.take_common_procedure(|k| matches!(k, CommonKind::Identification { .. }))
        else {
            warn!(self.logger, "Identity response with no identification procedure");
            return Ok(CommonOutcome::Pending);
        };

        let ue_id = self.ue.ue_id;
        match identity {
            MobileIdentity::Imsi(imsi) => {
                info!(self.logger, "UE identified as IMSI {imsi}");
                self.ue.imsi = Some(Verifiable::present(imsi.clone()));
                self.update_ue_keys(ue_id, KeyUpdate::Imsi(imsi))?;
            }
            MobileIdentity::Imei(imei) | MobileIdentity::Imeisv(imei) => {
                self.ue.imei = Some(Verifiable::present(imei));
            }
            MobileIdentity::Guti(guti) => {
                warn!(self.logger, "UE answered identity request with GUTI {guti}");
                return Ok(CommonOutcome::Failed(EmmCause::UeIdentityCannotBeDerived));
            }
        }
        Ok(CommonOutcome::Success(procedure.on_success))
    }

    pub async fn t3470_expiry(mut self, id: TimerId) -> Result<CommonOutcome> {
        Ok(
            match self
                .retransmit_common(id, TimerKind::T3470, T3470_MAX_EXPIRIES)
                .await
            {
                Retransmission::Stale | Retransmission::Resent => CommonOutcome::Pending,
                Retransmission::Exhausted => {
                    CommonOutcome::Failed(EmmCause::UeIdentityCannotBeDerived)
                }
            },
        )
    }
}
