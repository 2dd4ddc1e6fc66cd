use anyhow::{Result, bail, ensure};
use qmme::cause::{EmmCause, EsmCause};
use qmme::nas::{
    AttachRequest, DownlinkEsm, DownlinkNas, EmmIndication, EpsAttachType, IdentityType,
    MobileIdentity, UplinkEsm, UplinkNas,
};
use qmme::s6a::{S6aAnswer, S6aError, S6aRequest};
use qmme::s11::S11Request;
use qmme::{BearerState, Ebi, EmmState, Guti, Plmn, Pti};
use qmme_tests::{MockUe, framework::*};
use std::time::Duration;

/// A GUTI allocated by some other MME.
fn foreign_guti() -> Guti {
    Guti {
        plmn: Plmn([0x02, 0xf8, 0x39]),
        mme_group_id: 0x8001,
        mme_code: 0x42,
        m_tmsi: 0x0102_0304,
    }
}

fn guti_attach_request(ue: &MockUe) -> AttachRequest {
    let mut request = ue.attach_request();
    request.imsi = None;
    request.guti = Some(foreign_guti());
    request
}

async fn receive_imsi_identity_request(ue: &MockUe<'_>) -> Result<()> {
    let message = ue.receive_nas().await?;
    let DownlinkNas::IdentityRequest {
        identity_type: IdentityType::Imsi,
    } = message
    else {
        bail!("Expected IMSI identity request, got {message:?}")
    };
    Ok(())
}

async fn receive_attach_reject(ue: &MockUe<'_>) -> Result<EmmCause> {
    let message = ue.receive_nas().await?;
    let DownlinkNas::AttachReject { cause, .. } = message else {
        bail!("Expected attach reject, got {message:?}")
    };
    Ok(cause)
}

async fn expect_context_released(ue: &MockUe<'_>) -> Result<()> {
    assert_eq!(ue.receive_indication().await?, EmmIndication::AttachReject);
    assert_eq!(
        ue.receive_indication().await?,
        EmmIndication::UeContextReleased
    );
    assert_eq!(ue.core().mme.ue_count(), 0);
    Ok(())
}

/// Runs the rest of an attach from the point where the MME asks the HSS for vectors.
async fn finish_attach(ue: &mut MockUe<'_>) -> Result<()> {
    ue.handle_authentication().await?;
    ue.handle_security_mode().await?;
    ue.handle_update_location().await?;
    ue.handle_create_session().await?;
    let (pti, ebi) = ue.receive_attach_accept().await?;
    ue.send_attach_complete(pti, ebi).await?;
    assert_eq!(ue.receive_indication().await?, EmmIndication::AttachConfirm);
    Ok(())
}

#[async_std::test]
async fn attach() -> anyhow::Result<()> {
    let core = init().await?;

    // This test carries out the complete attach flow: authentication, security mode
    // control, subscription download, session creation and default bearer activation.
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.emm_state, EmmState::Registered);
    assert_eq!(summary.guti, ue.guti);
    assert_eq!(summary.specific_procedure, None);
    assert_eq!(summary.esm_procedures, 0);
    assert_eq!(summary.pdns.len(), 1);
    assert_eq!(summary.pdns[0].apn, "internet");
    assert_eq!(
        summary.pdns[0].bearers,
        vec![(summary.pdns[0].default_ebi, BearerState::Active)]
    );

    let Some(guti) = ue.guti else {
        bail!("No GUTI allocated");
    };
    assert_eq!(core.mme.find_ue_by_guti(&guti), Some(ue.ue_id));
    assert_eq!(core.mme.find_ue_by_imsi(&ue.imsi), Some(ue.ue_id));
    Ok(())
}

#[async_std::test]
async fn two_ues() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue_1 = MockUe::new(nth_imsi(0), 1, &core);
    ue_1.perform_attach().await?;
    let mut ue_2 = MockUe::new(nth_imsi(1), 2, &core);
    ue_2.perform_attach().await?;

    assert_eq!(core.mme.ue_count(), 2);
    ensure!(ue_1.guti != ue_2.guti, "GUTI allocated twice");
    Ok(())
}

#[async_std::test]
async fn repeated_attach_request_resends_accept() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    let request = ue.attach_request();
    ue.send_nas(UplinkNas::AttachRequest(request.clone())).await?;
    ue.handle_authentication().await?;
    ue.handle_security_mode().await?;
    ue.handle_update_location().await?;
    ue.handle_create_session().await?;
    let (pti, ebi) = ue.receive_attach_accept().await?;
    let first_guti = ue.guti;

    // The UE did not hear the accept and tries again with the same parameters.
    ue.send_nas(UplinkNas::AttachRequest(request)).await?;
    let (resent_pti, resent_ebi) = ue.receive_attach_accept().await?;
    assert_eq!((resent_pti, resent_ebi), (pti, ebi));
    assert_eq!(ue.guti, first_guti);

    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.specific_procedure, Some("Attach"));
    assert_eq!(summary.attach_retx_count, Some(0));

    ue.send_attach_complete(pti, ebi).await?;
    assert_eq!(ue.receive_indication().await?, EmmIndication::AttachConfirm);
    Ok(())
}

#[async_std::test]
async fn attach_aborted_when_accept_unanswered() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    ue.handle_authentication().await?;
    ue.handle_security_mode().await?;
    ue.handle_update_location().await?;
    let session = ue.handle_create_session().await?;
    ue.receive_attach_accept().await?;

    // T3450 resends the accept on each of its first four expiries.
    for _ in 0..4 {
        ue.receive_attach_accept().await?;
    }

    // The fifth expiry aborts the attach and drops the context.
    assert_eq!(ue.receive_indication().await?, EmmIndication::AttachReject);
    assert_eq!(
        ue.receive_indication().await?,
        EmmIndication::UeContextReleased
    );
    let (_, request) = core.gateway.receive().await?;
    let S11Request::DeleteSession { pdn_cid, .. } = request else {
        bail!("Expected delete session, got {request:?}")
    };
    assert_eq!(pdn_cid, session.pdn_cid);
    assert_eq!(core.mme.ue_count(), 0);
    Ok(())
}

#[async_std::test]
async fn emergency_attach_rejected_when_not_supported() -> anyhow::Result<()> {
    let core = init().await?;
    let ue = MockUe::new(nth_imsi(0), 1, &core);
    let mut request = ue.attach_request();
    request.attach_type = EpsAttachType::Emergency;
    ue.send_nas(UplinkNas::AttachRequest(request)).await?;

    let message = ue.receive_nas().await?;
    let DownlinkNas::AttachReject { cause, esm_message } = message else {
        bail!("Expected attach reject, got {message:?}")
    };
    assert_eq!(cause, EmmCause::RequestedServiceOptionNotAuthorized);
    assert_eq!(esm_message, None);
    assert_eq!(ue.receive_indication().await?, EmmIndication::AttachReject);
    Ok(())
}

#[async_std::test]
async fn attach_rejected_for_unknown_subscriber() -> anyhow::Result<()> {
    let core = init().await?;
    let ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    ue.handle_authentication().await?;
    ue.handle_security_mode().await?;

    let (ue_id, request) = core.hss.receive().await?;
    let S6aRequest::UpdateLocation { .. } = request else {
        bail!("Expected update location, got {request:?}")
    };
    core.mme
        .s6a_answer(
            ue_id,
            S6aAnswer::UpdateLocation(Err(S6aError::UserUnknown)),
        )
        .await?;

    let message = ue.receive_nas().await?;
    let DownlinkNas::AttachReject {
        cause,
        esm_message: Some(esm_message),
    } = message
    else {
        bail!("Expected attach reject with ESM message, got {message:?}")
    };
    assert_eq!(cause, EmmCause::EsmFailure);
    assert_eq!(
        esm_message,
        DownlinkEsm::PdnConnectivityReject {
            pti: Pti(1),
            cause: EsmCause::ServiceOptionNotSubscribed,
        }
    );
    assert_eq!(ue.receive_indication().await?, EmmIndication::AttachReject);
    Ok(())
}

#[async_std::test]
async fn attach_without_identity_rejected() -> Result<()> {
    let core = init().await?;
    let ue = MockUe::new(nth_imsi(0), 1, &core);
    let mut request = ue.attach_request();
    request.imsi = None;
    ue.send_nas(UplinkNas::AttachRequest(request)).await?;

    let message = ue.receive_nas().await?;
    let DownlinkNas::AttachReject { cause, .. } = message else {
        bail!("Expected attach reject, got {message:?}")
    };
    assert_eq!(cause, EmmCause::IllegalUe);
    Ok(())
}

#[async_std::test]
async fn attach_with_foreign_guti_identifies_ue() -> Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(guti_attach_request(&ue)))
        .await?;

    receive_imsi_identity_request(&ue).await?;
    ue.send_nas(UplinkNas::IdentityResponse {
        identity: MobileIdentity::Imsi(ue.imsi.clone()),
    })
    .await?;
    finish_attach(&mut ue).await?;

    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.imsi, Some(ue.imsi.clone()));
    assert_eq!(summary.emm_state, EmmState::Registered);
    assert_eq!(core.mme.find_ue_by_imsi(&ue.imsi), Some(ue.ue_id));
    assert_eq!(core.mme.find_ue_by_guti(&foreign_guti()), None);
    Ok(())
}

#[async_std::test]
async fn attach_rejected_when_identity_request_unanswered() -> Result<()> {
    let core = init().await?;
    let ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(guti_attach_request(&ue)))
        .await?;

    // The first send plus a resend on each of T3470's first four expiries.
    for _ in 0..5 {
        receive_imsi_identity_request(&ue).await?;
    }
    assert_eq!(
        receive_attach_reject(&ue).await?,
        EmmCause::UeIdentityCannotBeDerived
    );
    expect_context_released(&ue).await
}

#[async_std::test]
async fn repeated_attach_during_identification_ignored() -> Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    let request = guti_attach_request(&ue);
    ue.send_nas(UplinkNas::AttachRequest(request.clone()))
        .await?;
    receive_imsi_identity_request(&ue).await?;

    ue.send_nas(UplinkNas::AttachRequest(request)).await?;
    core.enb.nas.expect_nothing(Duration::from_millis(50)).await?;
    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.common_procedure, Some("Identification"));

    ue.send_nas(UplinkNas::IdentityResponse {
        identity: MobileIdentity::Imsi(ue.imsi.clone()),
    })
    .await?;
    finish_attach(&mut ue).await
}

#[async_std::test]
async fn changed_attach_during_identification_restarts() -> Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(guti_attach_request(&ue)))
        .await?;
    receive_imsi_identity_request(&ue).await?;

    // This time the UE gives its IMSI, so no identification is needed.
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    finish_attach(&mut ue).await?;
    assert_eq!(core.mme.ue_count(), 1);
    Ok(())
}

#[async_std::test]
async fn attach_rejected_when_authentication_request_unanswered() -> Result<()> {
    let core = init().await?;
    let ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    ue.handle_authentication_information().await?;

    // The first send plus a resend on each of T3460's first four expiries.
    for _ in 0..5 {
        ue.receive_authentication_request().await?;
    }
    assert_eq!(receive_attach_reject(&ue).await?, EmmCause::NetworkFailure);
    expect_context_released(&ue).await
}

#[async_std::test]
async fn authentication_failure_rejects_ue() -> Result<()> {
    let core = init().await?;
    let ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    ue.handle_authentication_information().await?;
    ue.receive_authentication_request().await?;

    ue.send_nas(UplinkNas::AuthenticationFailure {
        cause: EmmCause::MacFailure,
        auts: None,
    })
    .await?;
    assert_eq!(ue.receive_nas().await?, DownlinkNas::AuthenticationReject);
    expect_context_released(&ue).await
}

#[async_std::test]
async fn synch_failure_resynchronises_with_hss() -> Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    ue.handle_authentication_information().await?;
    ue.receive_authentication_request().await?;

    let auts = [0x5a; 14];
    ue.send_nas(UplinkNas::AuthenticationFailure {
        cause: EmmCause::SynchFailure,
        auts: Some(auts),
    })
    .await?;

    // The MME asks for fresh vectors, passing on the RAND it challenged with.
    let request = ue.handle_authentication_information().await?;
    let S6aRequest::AuthenticationInformation {
        resync: Some(resync),
        ..
    } = request
    else {
        bail!("Expected resynchronisation request, got {request:?}")
    };
    assert_eq!(resync.rand, core.hss.auth_vector().rand);
    assert_eq!(resync.auts, auts);

    ue.receive_authentication_request().await?;
    ue.send_authentication_response().await?;
    ue.handle_security_mode().await?;
    ue.handle_update_location().await?;
    ue.handle_create_session().await?;
    let (pti, ebi) = ue.receive_attach_accept().await?;
    ue.send_attach_complete(pti, ebi).await?;
    assert_eq!(ue.receive_indication().await?, EmmIndication::AttachConfirm);
    Ok(())
}

#[async_std::test]
async fn security_mode_reject_rejects_attach() -> Result<()> {
    let core = init().await?;
    let ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    ue.handle_authentication().await?;

    let message = ue.receive_nas().await?;
    let DownlinkNas::SecurityModeCommand { .. } = message else {
        bail!("Expected security mode command, got {message:?}")
    };
    ue.send_nas(UplinkNas::SecurityModeReject {
        cause: EmmCause::UeSecurityCapabilitiesMismatch,
    })
    .await?;
    assert_eq!(
        receive_attach_reject(&ue).await?,
        EmmCause::SecurityModeRejected
    );
    expect_context_released(&ue).await
}

#[async_std::test]
async fn attach_during_security_mode_control_restarts() -> Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    ue.handle_authentication().await?;
    let message = ue.receive_nas().await?;
    let DownlinkNas::SecurityModeCommand { .. } = message else {
        bail!("Expected security mode command, got {message:?}")
    };

    // The security context never took effect, so the UE is authenticated again.
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    finish_attach(&mut ue).await?;
    assert_eq!(core.mme.ue_count(), 1);
    Ok(())
}

#[async_std::test]
async fn esm_information_never_sent_rejects_attach() -> Result<()> {
    let core = init().await?;
    let ue = MockUe::new(nth_imsi(0), 1, &core);
    let mut request = ue.attach_request();
    let UplinkEsm::PdnConnectivityRequest(pdn_request) = &mut request.esm_message.body else {
        bail!("Attach request without PDN connectivity request")
    };
    pdn_request.esm_information_transfer = true;
    ue.send_nas(UplinkNas::AttachRequest(request)).await?;
    ue.handle_authentication().await?;
    ue.handle_security_mode().await?;

    // The first send plus a resend on each of T3489's first two expiries.
    for _ in 0..3 {
        assert_eq!(
            ue.receive_esm().await?,
            DownlinkEsm::EsmInformationRequest { pti: Pti(1) }
        );
    }
    let message = ue.receive_nas().await?;
    let DownlinkNas::AttachReject {
        cause,
        esm_message: Some(esm_message),
    } = message
    else {
        bail!("Expected attach reject with ESM message, got {message:?}")
    };
    assert_eq!(cause, EmmCause::EsmFailure);
    assert_eq!(
        esm_message,
        DownlinkEsm::PdnConnectivityReject {
            pti: Pti(1),
            cause: EsmCause::EsmInformationNotReceived,
        }
    );
    expect_context_released(&ue).await
}

#[async_std::test]
async fn attach_complete_with_default_bearer_reject() -> Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    ue.handle_authentication().await?;
    ue.handle_security_mode().await?;
    ue.handle_update_location().await?;
    let session = ue.handle_create_session().await?;
    let (pti, ebi) = ue.receive_attach_accept().await?;

    ue.send_attach_complete_with(
        pti,
        ebi,
        UplinkEsm::ActivateDefaultBearerReject {
            cause: EsmCause::InsufficientResources,
        },
    )
    .await?;

    let (_, request) = core.gateway.receive().await?;
    let S11Request::DeleteSession { pdn_cid, .. } = request else {
        bail!("Expected delete session, got {request:?}")
    };
    assert_eq!(pdn_cid, session.pdn_cid);
    assert_eq!(ue.receive_indication().await?, EmmIndication::AttachReject);
    assert_eq!(ue.receive_indication().await?, EmmIndication::ImplicitDetach);
    assert_eq!(
        ue.receive_indication().await?,
        EmmIndication::UeContextReleased
    );
    assert_eq!(core.mme.ue_count(), 0);
    Ok(())
}

#[async_std::test]
async fn attach_complete_rejecting_unknown_bearer_discarded() -> Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.send_nas(UplinkNas::AttachRequest(ue.attach_request()))
        .await?;
    ue.handle_authentication().await?;
    ue.handle_security_mode().await?;
    ue.handle_update_location().await?;
    ue.handle_create_session().await?;
    let (pti, ebi) = ue.receive_attach_accept().await?;
    assert_ne!(ebi, Ebi(9));

    ue.send_attach_complete_with(
        pti,
        Ebi(9),
        UplinkEsm::ActivateDefaultBearerReject {
            cause: EsmCause::InsufficientResources,
        },
    )
    .await?;

    // Nothing is torn down and the attach is no longer running.
    core.enb
        .indications
        .expect_nothing(Duration::from_millis(200))
        .await?;
    core.gateway.expect_nothing(Duration::from_millis(50)).await?;
    assert_eq!(core.mme.ue_count(), 1);
    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.specific_procedure, None);
    assert_eq!(summary.pdns.len(), 1);
    Ok(())
}
