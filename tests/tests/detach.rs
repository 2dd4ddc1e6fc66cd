use anyhow::{anyhow, bail};
use qmme::nas::{DetachRequest, DownlinkNas, EmmIndication, MobileIdentity, UplinkNas};
use qmme::s11::S11Request;
use qmme_tests::{MockUe, framework::*};
use std::time::Duration;

#[async_std::test]
async fn ue_initiated_detach() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;
    let guti = ue.guti.ok_or(anyhow!("No GUTI"))?;

    ue.send_nas(UplinkNas::DetachRequest(DetachRequest {
        switch_off: false,
        ksi: 0,
        identity: MobileIdentity::Guti(guti),
    }))
    .await?;
    assert_eq!(ue.receive_nas().await?, DownlinkNas::DetachAccept);

    let (_, request) = core.gateway.receive().await?;
    let S11Request::DeleteSession { .. } = request else {
        bail!("Expected delete session, got {request:?}")
    };
    assert_eq!(
        ue.receive_indication().await?,
        EmmIndication::UeContextReleased
    );
    assert_eq!(core.mme.ue_count(), 0);
    assert_eq!(core.mme.find_ue_by_guti(&guti), None);
    Ok(())
}

#[async_std::test]
async fn switch_off_detach_is_not_answered() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    // Switched off and back on a new lower layer connection, identified by IMSI.
    ue.ue_id = 2;
    ue.send_nas(UplinkNas::DetachRequest(DetachRequest {
        switch_off: true,
        ksi: 0,
        identity: MobileIdentity::Imsi(ue.imsi.clone()),
    }))
    .await?;
    assert_eq!(
        ue.receive_indication().await?,
        EmmIndication::UeContextReleased
    );
    core.enb.nas.expect_nothing(Duration::from_millis(100)).await?;
    assert_eq!(core.mme.ue_count(), 0);
    Ok(())
}

#[async_std::test]
async fn attach_from_registered_ue_detaches_it_first() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    ue.ue_id = 2;
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    assert_eq!(ue.receive_indication().await?, EmmIndication::ImplicitDetach);
    let (_, request) = core.gateway.receive().await?;
    let S11Request::DeleteSession { .. } = request else {
        bail!("Expected delete session, got {request:?}")
    };

    // The subscription is still held so the HSS is not asked again.
    ue.handle_authentication().await?;
    ue.handle_security_mode().await?;
    ue.handle_create_session().await?;
    let (pti, ebi) = ue.receive_attach_accept().await?;
    ue.send_attach_complete(pti, ebi).await?;
    assert_eq!(ue.receive_indication().await?, EmmIndication::AttachConfirm);

    assert_eq!(core.mme.ue_count(), 1);
    let summary = core.mme.ue_summary(2).await?;
    assert_eq!(summary.pdns.len(), 1);
    Ok(())
}
