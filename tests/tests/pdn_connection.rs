use anyhow::bail;
use qmme::cause::{EsmCause, GtpCause};
use qmme::nas::{DownlinkEsm, PdnConnectivityRequest, RequestType, UplinkEsm};
use qmme::s11::{S11Message, S11Request};
use qmme::{BearerState, Ebi, PdnType, Pti};
use qmme_tests::{MockUe, framework::*};
use std::time::Duration;

#[async_std::test]
async fn second_pdn_connection() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    let ebi = ue.establish_pdn_connection(Pti(2), "ims").await?;
    assert_eq!(ebi, Ebi(6));

    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.esm_procedures, 0);
    let apns: Vec<_> = summary.pdns.iter().map(|pdn| pdn.apn.as_str()).collect();
    assert_eq!(apns, vec!["internet", "ims"]);
    assert_eq!(summary.pdns[1].bearers, vec![(Ebi(6), BearerState::Active)]);
    Ok(())
}

#[async_std::test]
async fn second_connection_to_same_apn_rejected() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    ue.send_pdn_connectivity_request(Pti(2), "internet").await?;
    assert_eq!(
        ue.receive_esm().await?,
        DownlinkEsm::PdnConnectivityReject {
            pti: Pti(2),
            cause: EsmCause::MultiplePdnConnectionsNotAllowed,
        }
    );
    core.gateway.expect_nothing(Duration::from_millis(100)).await
}

#[async_std::test]
async fn unassigned_pti_rejected() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    ue.send_pdn_connectivity_request(Pti::UNASSIGNED, "ims")
        .await?;
    assert_eq!(
        ue.receive_esm().await?,
        DownlinkEsm::PdnConnectivityReject {
            pti: Pti::UNASSIGNED,
            cause: EsmCause::InvalidPtiValue,
        }
    );
    Ok(())
}

#[async_std::test]
async fn request_colliding_with_running_transaction_rejected() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    // PTI 2 is waiting on the gateway when PTI 3 arrives.
    ue.send_pdn_connectivity_request(Pti(2), "ims").await?;
    let (_, request) = core.gateway.receive().await?;
    let S11Request::CreateSession(_) = request else {
        bail!("Expected create session, got {request:?}")
    };
    ue.send_pdn_connectivity_request(Pti(3), "ims").await?;
    assert_eq!(
        ue.receive_esm().await?,
        DownlinkEsm::PdnConnectivityReject {
            pti: Pti(3),
            cause: EsmCause::RequestRejectedUnspecified,
        }
    );
    Ok(())
}

#[async_std::test]
async fn retransmitted_request_gets_same_answer() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    ue.send_pdn_connectivity_request(Pti(2), "ims").await?;
    ue.handle_create_session().await?;
    let ebi = ue.receive_default_bearer_request(Pti(2)).await?;

    ue.send_pdn_connectivity_request(Pti(2), "ims").await?;
    assert_eq!(ue.receive_default_bearer_request(Pti(2)).await?, ebi);
    core.gateway.expect_nothing(Duration::from_millis(50)).await?;

    ue.send_esm(Pti(2), ebi, UplinkEsm::ActivateDefaultBearerAccept)
        .await?;
    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.pdns.len(), 2);
    Ok(())
}

#[async_std::test]
async fn gateway_refuses_session() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    ue.send_pdn_connectivity_request(Pti(2), "ims").await?;
    let (ue_id, request) = core.gateway.receive().await?;
    let S11Request::CreateSession(request) = request else {
        bail!("Expected create session, got {request:?}")
    };
    core.mme
        .s11_message(
            ue_id,
            S11Message::CreateSessionResponse {
                pdn_cid: request.pdn_cid,
                result: Err(GtpCause::NoResourcesAvailable),
            },
        )
        .await?;
    assert_eq!(
        ue.receive_esm().await?,
        DownlinkEsm::PdnConnectivityReject {
            pti: Pti(2),
            cause: EsmCause::RequestRejectedByGw,
        }
    );
    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.pdns.len(), 1);
    Ok(())
}

#[async_std::test]
async fn default_bearer_request_unanswered() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    ue.send_pdn_connectivity_request(Pti(2), "ims").await?;
    let session = ue.handle_create_session().await?;
    let ebi = ue.receive_default_bearer_request(Pti(2)).await?;

    // Two retransmissions, then the third T3485 expiry gives up on the UE.
    for _ in 0..2 {
        assert_eq!(ue.receive_default_bearer_request(Pti(2)).await?, ebi);
    }
    assert_eq!(
        ue.receive_esm().await?,
        DownlinkEsm::PdnConnectivityReject {
            pti: Pti(2),
            cause: EsmCause::EsmInformationNotReceived,
        }
    );
    let (_, request) = core.gateway.receive().await?;
    let S11Request::DeleteSession { pdn_cid, .. } = request else {
        bail!("Expected delete session, got {request:?}")
    };
    assert_eq!(pdn_cid, session.pdn_cid);

    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.pdns.len(), 1);
    assert_eq!(summary.esm_procedures, 0);
    Ok(())
}

#[async_std::test]
async fn pdn_disconnect() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;
    let ebi = ue.establish_pdn_connection(Pti(2), "ims").await?;

    ue.send_esm(
        Pti(3),
        Ebi::UNASSIGNED,
        UplinkEsm::PdnDisconnectRequest { linked_ebi: ebi },
    )
    .await?;
    let (ue_id, request) = core.gateway.receive().await?;
    let S11Request::DeleteSession {
        pdn_cid, linked_ebi, ..
    } = request
    else {
        bail!("Expected delete session, got {request:?}")
    };
    assert_eq!(linked_ebi, ebi);
    core.mme
        .s11_message(
            ue_id,
            S11Message::DeleteSessionResponse {
                pdn_cid,
                cause: GtpCause::RequestAccepted,
            },
        )
        .await?;

    assert_eq!(
        ue.receive_esm().await?,
        DownlinkEsm::DeactivateBearerRequest {
            pti: Pti(3),
            ebi,
            cause: EsmCause::RegularDeactivation,
        }
    );
    ue.send_esm(Pti(3), ebi, UplinkEsm::DeactivateBearerAccept)
        .await?;

    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.pdns.len(), 1);
    assert_eq!(summary.pdns[0].apn, "internet");
    assert_eq!(summary.esm_procedures, 0);
    Ok(())
}

#[async_std::test]
async fn last_pdn_disconnect_rejected() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    ue.send_esm(
        Pti(2),
        Ebi::UNASSIGNED,
        UplinkEsm::PdnDisconnectRequest { linked_ebi: Ebi(5) },
    )
    .await?;
    assert_eq!(
        ue.receive_esm().await?,
        DownlinkEsm::PdnDisconnectReject {
            pti: Pti(2),
            cause: EsmCause::LastPdnDisconnectionNotAllowed,
        }
    );
    Ok(())
}

#[async_std::test]
async fn unknown_esm_message_answered_with_status() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    ue.send_esm(Pti(2), Ebi::UNASSIGNED, UplinkEsm::Unknown { message_type: 0xfe })
        .await?;
    assert_eq!(
        ue.receive_esm().await?,
        DownlinkEsm::EsmStatus {
            pti: Pti(2),
            ebi: Ebi::UNASSIGNED,
            cause: EsmCause::MessageTypeNonExistent,
        }
    );
    Ok(())
}

#[async_std::test]
async fn apn_supplied_by_esm_information_response() -> anyhow::Result<()> {
    let core = init().await?;
    let mut ue = MockUe::new(nth_imsi(0), 1, &core);
    ue.perform_attach().await?;

    // The UE holds back the APN until the MME asks for it.
    let request = PdnConnectivityRequest {
        request_type: RequestType::Initial,
        pdn_type: PdnType::Ipv4v6,
        apn: None,
        esm_information_transfer: true,
        pco: None,
    };
    ue.send_esm(
        Pti(2),
        Ebi::UNASSIGNED,
        UplinkEsm::PdnConnectivityRequest(request),
    )
    .await?;
    assert_eq!(
        ue.receive_esm().await?,
        DownlinkEsm::EsmInformationRequest { pti: Pti(2) }
    );
    ue.send_esm(
        Pti(2),
        Ebi::UNASSIGNED,
        UplinkEsm::EsmInformationResponse {
            apn: Some("ims".to_string()),
            pco: None,
        },
    )
    .await?;

    let session = ue.handle_create_session().await?;
    assert_eq!(session.apn, "ims");
    let ebi = ue.receive_default_bearer_request(Pti(2)).await?;
    ue.send_esm(Pti(2), ebi, UplinkEsm::ActivateDefaultBearerAccept)
        .await?;

    let summary = core.mme.ue_summary(ue.ue_id).await?;
    assert_eq!(summary.esm_procedures, 0);
    assert_eq!(summary.pdns.len(), 2);
    assert_eq!(summary.pdns[1].apn, "ims");
    Ok(())
}
