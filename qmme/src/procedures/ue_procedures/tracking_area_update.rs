//! tracking_area_update - normal and periodic tracking area updating (TS 24.301, 5.5.3)

use super::{DetachProcedure, TimerKind, UeProcedure};
use crate::cause::EmmCause;
use crate::nas::{DownlinkNas, TrackingAreaUpdateRequest};
use crate::timer::TimerId;
use crate::{Ebi, EmmState, HandlerApi, KeyUpdate, Pti, SpecificProcedure, TauProc, Verifiable};
use anyhow::Result;
use derive_deref::{Deref, DerefMut};
use slog::{debug, info, warn};

const T3450_MAX_EXPIRIES: u32 = 5;

#[derive(Deref, DerefMut)]
pub struct TrackingAreaUpdateProcedure<'a, A: HandlerApi>(UeProcedure<'a, A>);

impl<'a, A: HandlerApi> TrackingAreaUpdateProcedure<'a, A> {
    pub fn new(inner: UeProcedure<'a, A>) -> Self {
        TrackingAreaUpdateProcedure(inner)
    }

    pub async fn request(mut self, r: TrackingAreaUpdateRequest) -> Result<()> {
        if self.ue.emm_state != EmmState::Registered {
            warn!(self.logger, "Tracking area update from UE that is not registered");
            self.send_nas(DownlinkNas::TrackingAreaUpdateReject {
                cause: EmmCause::ImplicitlyDetached,
            })
            .await;
            if self.ue.dynamic {
                self.ue.released = true;
            }
            return Ok(());
        }

        if let Some(tau) = self.ue.procedures.tau() {
            let repeated = tau.ies == r;
            let old_timer = tau.timer.take();
            let message = tau.last_message.clone();
            self.stop_nas_timer(old_timer);
            if repeated {
                // Resend without counting it as a retransmission.
                if let Some(message) = message {
                    info!(self.logger, "Repeated tracking area update, resending accept");
                    self.send_nas(message).await;
                }
                let timer =
                    self.start_nas_timer(TimerKind::T3450, Pti::UNASSIGNED, Ebi::UNASSIGNED);
                if let Some(tau) = self.ue.procedures.tau() {
                    tau.timer = Some(timer);
                }
                return Ok(());
            }
        }

        self.ue.last_visited_tai = r.last_visited_tai;
        self.ue.originating_tai = Some(r.originating_tai);
        if let Some(capability) = r.ue_network_capability {
            self.ue.ue_network_capability = Some(capability);
        }

        let new_guti = if self.config().reallocate_guti_on_tau {
            let guti = self.allocate_guti();
            self.ue.old_guti = self.ue.guti();
            self.ue.guti = Some(Verifiable::present(guti));
            Some(guti)
        } else {
            None
        };
        let tai_list = self.config().tai_list();
        self.ue.tai_list = tai_list.clone();
        let message = DownlinkNas::TrackingAreaUpdateAccept {
            t3412_secs: self.config().t3412_secs,
            tai_list,
            guti: new_guti,
        };
        self.send_nas(message.clone()).await;
        info!(self.logger, "Tracking area update accepted, {:?}", r.update_type);

        // Only a GUTI reallocation needs the UE to complete.
        if new_guti.is_none() {
            self.ue.procedures.specific = None;
            return Ok(());
        }
        let timer = self.start_nas_timer(TimerKind::T3450, Pti::UNASSIGNED, Ebi::UNASSIGNED);
        self.ue.procedures.specific = Some(SpecificProcedure::TrackingAreaUpdate(TauProc {
            ies: r,
            retx_count: 0,
            accept_sent: true,
            timer: Some(timer),
            last_message: Some(message),
            new_guti,
        }));
        Ok(())
    }

    pub async fn complete(mut self) -> Result<()> {
        let Some(tau) = self.ue.procedures.tau() else {
            warn!(self.logger, "Tracking area update complete with no update in progress");
            return Ok(());
        };
        let timer = tau.timer.take();
        let new_guti = tau.new_guti;
        self.stop_nas_timer(timer);
        self.ue.procedures.specific = None;

        if let Some(guti) = self.ue.guti.as_mut() {
            if Some(guti.value) == new_guti {
                guti.valid = true;
            }
        }
        self.ue.old_guti = None;
        let ue_id = self.ue.ue_id;
        let guti = self.ue.guti();
        self.update_ue_keys(ue_id, KeyUpdate::Guti(guti))?;
        debug!(self.logger, "Tracking area update complete");
        Ok(())
    }

    pub async fn t3450_expiry(mut self, id: TimerId) -> Result<()> {
        let Some(tau) = self.ue.procedures.tau() else {
            return Ok(());
        };
        if tau.timer != Some(id) {
            debug!(self.logger, "Stale T3450 expiry");
            return Ok(());
        }
        tau.timer = None;
        tau.retx_count += 1;
        let count = tau.retx_count;
        let message = tau.last_message.clone();

        if count < T3450_MAX_EXPIRIES {
            warn!(self.logger, "T3450 expiry {count}, resending tracking area update accept");
            if let Some(message) = message {
                self.send_nas(message).await;
            }
            let timer = self.start_nas_timer(TimerKind::T3450, Pti::UNASSIGNED, Ebi::UNASSIGNED);
            if let Some(tau) = self.ue.procedures.tau() {
                tau.timer = Some(timer);
            }
            return Ok(());
        }

        warn!(self.logger, "T3450 expired {count} times, aborting tracking area update");
        self.ue.procedures.specific = None;
        DetachProcedure::new(self.reborrow()).implicit().await;
        Ok(())
    }
}
