//! security_mode_control - put the NAS security context into use (TS 24.301, 5.4.3)

use super::{CommonOutcome, Retransmission, TimerKind, UeProcedure};
use crate::cause::EmmCause;
use crate::nas::DownlinkNas;
use crate::timer::TimerId;
use crate::{CommonKind, CommonProc, Continuation, Ebi, HandlerApi, Pti, Verifiable};
use anyhow::Result;
use derive_deref::{Deref, DerefMut};
use slog::{info, warn};

const T3460_MAX_EXPIRIES: u32 = 5;

#[derive(Deref, DerefMut)]
pub struct SecurityModeControlProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

fn is_security_mode_control(kind: &CommonKind) -> bool {
    matches!(kind, CommonKind::SecurityModeControl { .. })
}

impl<'a, A: HandlerApi> SecurityModeControlProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        SecurityModeControlProcedure(inner)
    }

    /// Send SECURITY MODE COMMAND for the context established by authentication.
    pub async fn start(mut self, on_success: Continuation) -> Result<CommonOutcome> {
        let Some(mut context) = self.ue.security.clone() else {
            warn!(self.logger, "No security context to put into use");
            return Ok(CommonOutcome::Failed(EmmCause::NetworkFailure));
        };
        let Some(capability) = self.ue.ue_network_capability else {
            return Ok(CommonOutcome::Failed(EmmCause::UeSecurityCapabilitiesMismatch));
        };

        let config = self.config();
        if let Err(cause) = context.select_algorithms(
            &capability,
            &config.integrity_algorithms,
            &config.ciphering_algorithms,
            self.ue.emergency,
        ) {
            warn!(self.logger, "No common security algorithms with UE");
            return Ok(CommonOutcome::Failed(cause));
        }

        let message = DownlinkNas::SecurityModeCommand {
            ksi: context.ksi,
            eea: context.eea,
            eia: context.eia,
            replayed_capability: capability,
            imeisv_request: self.ue.imei.is_none(),
        };
        self.send_nas(message.clone()).await;
        let mut procedure =
            CommonProc::new(CommonKind::SecurityModeControl { context }, on_success);
        procedure.timer = Some(self.start_nas_timer(
            TimerKind::T3460,
            Pti::UNASSIGNED,
            Ebi::UNASSIGNED,
        ));
        procedure.last_message = Some(message);
        self.install_common_procedure(procedure);
        Ok(CommonOutcome::Pending)
    }

    pub async fn complete(mut self, imeisv: Option<String>) -> Result<CommonOutcome> {
        let Some(procedure) = self.take_common_procedure(is_security_mode_control) else {
            warn!(self.logger, "Security mode complete with no security mode command outstanding");
            return Ok(CommonOutcome::Pending);
        };
        let on_success = procedure.on_success;
        let CommonKind::SecurityModeControl { mut context } = procedure.kind else {
            return Ok(CommonOutcome::Pending);
        };
        context.activated = true;
        info!(
            self.logger,
            "NAS security in use, EEA{} EIA{}", context.eea, context.eia
        );
        self.ue.security = Some(context);
        if let Some(imeisv) = imeisv {
            self.ue.imei = Some(Verifiable::verified(imeisv));
        }
        Ok(CommonOutcome::Success(on_success))
    }

    pub async fn reject(mut self, cause: EmmCause) -> Result<CommonOutcome> {
        if self.take_common_procedure(is_security_mode_control).is_none() {
            warn!(self.logger, "Security mode reject with no security mode command outstanding");
            return Ok(CommonOutcome::Pending);
        }
        warn!(self.logger, "UE rejected security mode command, cause {cause:?}");
        Ok(CommonOutcome::Failed(EmmCause::SecurityModeRejected))
    }

    pub async fn t3460_expiry(mut self, id: TimerId) -> Result<CommonOutcome> {
        Ok(
            match self
                .retransmit_common(id, TimerKind::T3460, T3460_MAX_EXPIRIES)
                .await
            {
                Retransmission::Stale | Retransmission::Resent => CommonOutcome::Pending,
                Retransmission::Exhausted => CommonOutcome::Failed(EmmCause::SecurityModeRejected),
            },
        )
    }
}
