//! authentication - EPS AKA (TS 24.301, 5.4.2)
//!
//! Vectors come from the HSS.  The procedure waits for them, with no timer running, if the
//! UE context holds none.

use super::{CommonOutcome, Retransmission, TimerKind, UeProcedure};
use crate::cause::EmmCause;
use crate::nas::DownlinkNas;
use crate::s6a::{Resync, S6aError, S6aRequest};
use crate::timer::TimerId;
use crate::{
    AuthVector, CommonKind, CommonProc, Continuation, Ebi, HandlerApi, Pti, SecurityContext,
    next_ksi,
};
use anyhow::{Result, bail};
use derive_deref::{Deref, DerefMut};
use slog::{debug, info, warn};

const T3460_MAX_EXPIRIES: u32 = 5;
const MAX_RESYNCHRONISATIONS: u32 = 2;

#[derive(Deref, DerefMut)]
pub struct AuthenticationProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

fn awaiting_response(kind: &CommonKind) -> bool {
    matches!(
        kind,
        CommonKind::Authentication {
            vector: Some(_),
            ..
        }
    )
}

impl<'a, A: HandlerApi> AuthenticationProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        AuthenticationProcedure(inner)
    }

    /// Start authenticating the UE.  Never completes synchronously, since completion needs
    /// a response from the UE.
    pub async fn start(mut self, on_success: Continuation) -> Result<CommonOutcome> {
        let ksi = next_ksi(self.ue.security.as_ref().map(|sc| sc.ksi));
        self.install_common_procedure(CommonProc::new(
            CommonKind::Authentication {
                ksi,
                vector: None,
                sync_failures: 0,
            },
            on_success,
        ));
        if self.ue.auth_vectors.is_empty() {
            self.request_vectors(None).await
        } else {
            let vector = self.ue.auth_vectors.remove(0);
            self.challenge(vector).await
        }
    }

    async fn request_vectors(&mut self, resync: Option<Resync>) -> Result<CommonOutcome> {
        let Some(imsi) = self.ue.imsi().cloned() else {
            self.ue.procedures.common = None;
            return Ok(CommonOutcome::Failed(EmmCause::UeIdentityCannotBeDerived));
        };
        let request = S6aRequest::AuthenticationInformation {
            imsi,
            visited_plmn: self.config().plmn,
            num_vectors: 1,
            resync,
        };
        if let Err(e) = self.s6a_request(request).await {
            warn!(self.logger, "Failed to request authentication vectors - {e}");
            self.ue.procedures.common = None;
            return Ok(CommonOutcome::Failed(EmmCause::NetworkFailure));
        }
        Ok(CommonOutcome::Pending)
    }

    async fn challenge(&mut self, vector: AuthVector) -> Result<CommonOutcome> {
        let Some(CommonProc {
            kind: CommonKind::Authentication { ksi, vector: slot, .. },
            timer,
            retx_count,
            last_message,
            ..
        }) = &mut self.ue.procedures.common
        else {
            bail!("No authentication procedure");
        };
        let message = DownlinkNas::AuthenticationRequest {
            ksi: *ksi,
            rand: vector.rand,
            autn: vector.autn,
        };
        *slot = Some(vector);
        *retx_count = 0;
        *last_message = Some(message.clone());
        let old_timer = timer.take();

        self.stop_nas_timer(old_timer);
        self.send_nas(message).await;
        let timer = self.start_nas_timer(TimerKind::T3460, Pti::UNASSIGNED, Ebi::UNASSIGNED);
        if let Some(procedure) = self.ue.procedures.common.as_mut() {
            procedure.timer = Some(timer);
        }
        Ok(CommonOutcome::Pending)
    }

    pub async fn vectors_received(
        mut self,
        result: Result<Vec<AuthVector>, S6aError>,
    ) -> Result<CommonOutcome> {
        let waiting = matches!(
            &self.ue.procedures.common,
            Some(CommonProc {
                kind: CommonKind::Authentication { vector: None, .. },
                ..
            })
        );
        match result {
            Err(e) if waiting => {
                warn!(self.logger, "HSS refused authentication vectors - {e}");
                self.ue.procedures.common = None;
                Ok(CommonOutcome::Failed(e.emm_cause()))
            }
            Err(e) => {
                debug!(self.logger, "Ignoring unexpected authentication information error {e}");
                Ok(CommonOutcome::Pending)
            }
            Ok(vectors) => {
                self.ue.auth_vectors.extend(vectors);
                if !waiting {
                    debug!(self.logger, "Stored unsolicited authentication vectors");
                    return Ok(CommonOutcome::Pending);
                }
                if self.ue.auth_vectors.is_empty() {
                    warn!(self.logger, "HSS returned no authentication vectors");
                    self.ue.procedures.common = None;
                    return Ok(CommonOutcome::Failed(EmmCause::NetworkFailure));
                }
                let vector = self.ue.auth_vectors.remove(0);
                self.challenge(vector).await
            }
        }
    }

    pub async fn response(mut self, res: &[u8]) -> Result<CommonOutcome> {
        let Some(procedure) = self.take_common_procedure(awaiting_response) else {
            warn!(self.logger, "Authentication response with no challenge outstanding");
            return Ok(CommonOutcome::Pending);
        };
        let on_success = procedure.on_success;
        let CommonKind::Authentication {
            ksi,
            vector: Some(vector),
            ..
        } = procedure.kind
        else {
            return Ok(CommonOutcome::Pending);
        };

        if vector.xres != res && !self.config().skip_ue_authentication_check {
            warn!(self.logger, "Authentication failure, RES does not match XRES");
            self.send_nas(DownlinkNas::AuthenticationReject).await;
            return Ok(CommonOutcome::Rejected);
        }

        info!(self.logger, "UE authenticated, KSI {ksi}");
        if let Some(imsi) = self.ue.imsi.as_mut() {
            imsi.valid = true;
        }
        self.ue.security = Some(SecurityContext::new(ksi, &vector));
        Ok(CommonOutcome::Success(on_success))
    }

    pub async fn failure(
        mut self,
        cause: EmmCause,
        auts: Option<[u8; 14]>,
    ) -> Result<CommonOutcome> {
        let (rand, sync_failures, timer) = match &mut self.ue.procedures.common {
            Some(CommonProc {
                kind:
                    CommonKind::Authentication {
                        vector: Some(vector),
                        sync_failures,
                        ..
                    },
                timer,
                ..
            }) => (vector.rand, *sync_failures, timer.take()),
            _ => {
                warn!(self.logger, "Authentication failure with no challenge outstanding");
                return Ok(CommonOutcome::Pending);
            }
        };
        self.stop_nas_timer(timer);

        match (cause, auts) {
            (EmmCause::SynchFailure, Some(auts)) if sync_failures < MAX_RESYNCHRONISATIONS => {
                warn!(self.logger, "Synch failure, resynchronising with HSS");
                if let Some(CommonProc {
                    kind:
                        CommonKind::Authentication {
                            vector,
                            sync_failures,
                            ..
                        },
                    ..
                }) = &mut self.ue.procedures.common
                {
                    *vector = None;
                    *sync_failures += 1;
                }
                // Any vectors held were generated with the stale sequence number.
                self.ue.auth_vectors.clear();
                self.request_vectors(Some(Resync { rand, auts })).await
            }
            _ => {
                warn!(self.logger, "Authentication failure with cause {cause:?}");
                self.ue.procedures.common = None;
                self.send_nas(DownlinkNas::AuthenticationReject).await;
                Ok(CommonOutcome::Rejected)
            }
        }
    }

    pub async fn t3460_expiry(mut self, id: TimerId) -> Result<CommonOutcome> {
        Ok(
            match self
                .retransmit_common(id, TimerKind::T3460, T3460_MAX_EXPIRIES)
                .await
            {
                Retransmission::Stale | Retransmission::Resent => CommonOutcome::Pending,
                Retransmission::Exhausted => CommonOutcome::Failed(EmmCause::NetworkFailure),
            },
        )
    }
}
