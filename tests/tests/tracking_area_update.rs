use anyhow::{Result, anyhow, bail};
use qmme::cause::EmmCause;
use qmme::nas::{DownlinkNas, EpsUpdateType, TrackingAreaUpdateRequest, UplinkNas};
use qmme::{EmmState, Guti, Plmn};
use qmme_tests::{MockUe, framework::*};
use std::time::Duration;

fn tau_request(ue: &MockUe, old_guti: Guti) -> UplinkNas {
    UplinkNas::TrackingAreaUpdateRequest(TrackingAreaUpdateRequest {
        update_type: EpsUpdateType::TaUpdating,
        ksi: 0,
        old_guti,
        last_visited_tai: Some(ue.tai()),
        originating_tai: ue.tai(),
        ue_network_capability: None,
    })
}

#[async_std::test]
async fn tracking_area_update_on_new_connection() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;
    let guti = ue.guti.ok_or(anyhow!("No GUTI"))?;

    // The UE comes back on a new lower layer connection.
    ue.ue_id = 2;
    ue.send_nas(tau_request(&ue, guti)).await?;
    let message = ue.receive_nas().await?;
    let DownlinkNas::TrackingAreaUpdateAccept { guti: new_guti, tai_list, .. } = message else {
        bail!("Expected tracking area update accept, got {message:?}")
    };
    assert_eq!(new_guti, None);
    assert_eq!(tai_list.len(), 2);

    // No GUTI was reallocated so the update is already complete.
    core.enb.nas.expect_nothing(Duration::from_millis(200)).await?;
    let summary = core.mme.ue_summary(2).await?;
    assert_eq!(summary.emm_state, EmmState::Registered);
    assert_eq!(summary.specific_procedure, None);
    assert_eq!(core.mme.find_ue_by_guti(&guti), Some(2));
    assert_eq!(core.mme.ue_count(), 1);
    Ok(())
}

#[async_std::test]
async fn tracking_area_update_with_guti_reallocation() -> anyhow::Result<()> {
    let core = init_with_config("reallocate_guti_on_tau = true").await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;
    let old_guti = ue.guti.ok_or(anyhow!("No GUTI"))?;

    ue.send_nas(tau_request(&ue, old_guti)).await?;
    let message = ue.receive_nas().await?;
    let DownlinkNas::TrackingAreaUpdateAccept {
        guti: Some(new_guti),
        ..
    } = message
    else {
        bail!("Expected tracking area update accept with GUTI, got {message:?}")
    };
    assert_ne!(new_guti, old_guti);
    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.specific_procedure, Some("TrackingAreaUpdate"));

    ue.send_nas(UplinkNas::TrackingAreaUpdateComplete).await?;
    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.specific_procedure, None);
    assert_eq!(summary.guti, Some(new_guti));
    assert_eq!(core.mme.find_ue_by_guti(&new_guti), Some(ue.ue_id));
    assert_eq!(core.mme.find_ue_by_guti(&old_guti), None);
    Ok(())
}

#[async_std::test]
async fn tracking_area_update_from_unknown_ue_rejected() -> Result<()> {
    let core = init().await?;
    let ue = MockUe::new(nth_imsi(0), 5, &core);
    let unknown = Guti {
        plmn: Plmn([0x02, 0xf8, 0x39]),
        mme_group_id: 32769,
        mme_code: 1,
        m_tmsi: 0x1234_5678,
    };
    ue.send_nas(tau_request(&ue, unknown)).await?;
    assert_eq!(
        ue.receive_nas().await?,
        DownlinkNas::TrackingAreaUpdateReject {
            cause: EmmCause::ImplicitlyDetached
        }
    );
    assert_eq!(core.mme.ue_count(), 0);
    Ok(())
}

#[async_std::test]
async fn repeated_tracking_area_update_resends_accept() -> Result<()> {
    let core = init_with_config("reallocate_guti_on_tau = true").await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;
    let old_guti = ue.guti.ok_or(anyhow!("No GUTI"))?;

    ue.send_nas(tau_request(&ue, old_guti)).await?;
    let first_accept = ue.receive_nas().await?;
    let DownlinkNas::TrackingAreaUpdateAccept {
        guti: Some(new_guti),
        ..
    } = first_accept
    else {
        bail!("Expected tracking area update accept with GUTI, got {first_accept:?}")
    };

    // The UE did not hear the accept and sends the same request again.
    ue.send_nas(tau_request(&ue, old_guti)).await?;
    assert_eq!(ue.receive_nas().await?, first_accept);
    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.specific_procedure, Some("TrackingAreaUpdate"));

    ue.send_nas(UplinkNas::TrackingAreaUpdateComplete).await?;
    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.specific_procedure, None);
    assert_eq!(summary.guti, Some(new_guti));
    Ok(())
}
