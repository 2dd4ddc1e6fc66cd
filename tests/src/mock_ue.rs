//! mock_ue - enables a test script to assume the role of a UE and drive the MME's peers for it

use crate::framework::TestCore;
use crate::mock_hss::XRES;
use anyhow::{Result, anyhow, bail, ensure};
use qmme::nas::{
    AttachRequest, DownlinkEsm, DownlinkNas, EmmIndication, EpsAttachType, EsmMessage,
    PdnConnectivityRequest, RequestType, UplinkEsm, UplinkNas,
};
use qmme::s6a::{S6aAnswer, S6aRequest};
use qmme::s11::{CreateSession, S11Message, S11Request, Session};
use qmme::{Ebi, EnbUeKey, Fteid, Guti, PdnType, Plmn, Pti, Tai, UeNetworkCapability};
use slog::{Logger, info, o};

pub struct MockUe<'a> {
    pub ue_id: u32,
    pub imsi: String,
    pub guti: Option<Guti>,
    core: &'a TestCore,
    logger: Logger,
}

impl<'a> MockUe<'a> {
    pub fn new(imsi: String, ue_id: u32, core: &'a TestCore) -> Self {
        MockUe {
            ue_id,
            imsi,
            guti: None,
            core,
            logger: core.logger.new(o!("ue" => ue_id)),
        }
    }

    pub fn core(&self) -> &'a TestCore {
        self.core
    }

    pub fn enb_ue_key(&self) -> EnbUeKey {
        EnbUeKey {
            enb_id: 1,
            enb_ue_s1ap_id: self.ue_id,
        }
    }

    pub fn tai(&self) -> Tai {
        Tai {
            plmn: Plmn([0x02, 0xf8, 0x39]),
            tac: 1,
        }
    }

    /// An IMSI attach carrying a PDN connectivity request for the default APN.
    pub fn attach_request(&self) -> AttachRequest {
        AttachRequest {
            attach_type: EpsAttachType::Eps,
            ksi: 7,
            native_ksi: true,
            guti: None,
            native_guti: false,
            imsi: Some(self.imsi.clone()),
            imei: None,
            last_visited_tai: None,
            originating_tai: self.tai(),
            originating_ecgi: None,
            ue_network_capability: UeNetworkCapability {
                eea: 0xe0,
                eia: 0x60,
                uea: None,
                uia: None,
            },
            ms_network_capability: None,
            esm_message: EsmMessage {
                pti: Pti(1),
                ebi: Ebi::UNASSIGNED,
                body: UplinkEsm::PdnConnectivityRequest(pdn_connectivity_request(None)),
            },
        }
    }

    pub async fn send_nas(&self, message: UplinkNas) -> Result<()> {
        info!(self.logger, "{} >>", message.name());
        self.core
            .mme
            .uplink_nas(self.ue_id, Some(self.enb_ue_key()), message)
            .await
    }

    pub async fn send_esm(&self, pti: Pti, ebi: Ebi, body: UplinkEsm) -> Result<()> {
        self.send_nas(UplinkNas::Esm(EsmMessage { pti, ebi, body }))
            .await
    }

    pub async fn receive_nas(&self) -> Result<DownlinkNas> {
        let (ue_id, message) = self.core.enb.nas.receive().await?;
        ensure!(ue_id == self.ue_id, "{} sent to UE {ue_id}", message.name());
        info!(self.logger, "{} <<", message.name());
        Ok(message)
    }

    pub async fn receive_esm(&self) -> Result<DownlinkEsm> {
        match self.receive_nas().await? {
            DownlinkNas::Esm(message) => Ok(message),
            message => bail!("Expected ESM message, got {message:?}"),
        }
    }

    pub async fn receive_indication(&self) -> Result<EmmIndication> {
        let (ue_id, indication) = self.core.enb.indications.receive().await?;
        ensure!(ue_id == self.ue_id, "{indication:?} for UE {ue_id}");
        Ok(indication)
    }

    pub async fn perform_attach(&mut self) -> Result<()> {
        self.send_nas(UplinkNas::AttachRequest(self.attach_request()))
            .await?;
        self.handle_authentication().await?;
        self.handle_security_mode().await?;
        self.handle_update_location().await?;
        self.handle_create_session().await?;
        let (pti, ebi) = self.receive_attach_accept().await?;
        self.send_attach_complete(pti, ebi).await?;
        let indication = self.receive_indication().await?;
        ensure!(
            indication == EmmIndication::AttachConfirm,
            "Expected attach confirm, got {indication:?}"
        );
        Ok(())
    }

    pub async fn handle_authentication(&self) -> Result<()> {
        self.handle_authentication_information().await?;
        self.receive_authentication_request().await?;
        self.send_authentication_response().await
    }

    /// Play the HSS's part in authentication, returning the request answered.
    pub async fn handle_authentication_information(&self) -> Result<S6aRequest> {
        let (ue_id, request) = self.core.hss.receive().await?;
        let S6aRequest::AuthenticationInformation { imsi, .. } = &request else {
            bail!("Expected authentication information request, got {request:?}")
        };
        ensure!(*imsi == self.imsi, "Authentication information for {imsi}");
        self.core
            .mme
            .s6a_answer(
                ue_id,
                S6aAnswer::AuthenticationInformation(Ok(vec![self.core.hss.auth_vector()])),
            )
            .await?;
        Ok(request)
    }

    pub async fn receive_authentication_request(&self) -> Result<()> {
        let message = self.receive_nas().await?;
        let DownlinkNas::AuthenticationRequest { .. } = message else {
            bail!("Expected authentication request, got {message:?}")
        };
        Ok(())
    }

    pub async fn send_authentication_response(&self) -> Result<()> {
        self.send_nas(UplinkNas::AuthenticationResponse {
            res: XRES.to_vec(),
        })
        .await
    }

    pub async fn handle_security_mode(&self) -> Result<()> {
        let message = self.receive_nas().await?;
        let DownlinkNas::SecurityModeCommand { imeisv_request, .. } = message else {
            bail!("Expected security mode command, got {message:?}")
        };
        let imeisv = imeisv_request.then(|| "3534900698733190".to_string());
        self.send_nas(UplinkNas::SecurityModeComplete { imeisv })
            .await
    }

    pub async fn handle_update_location(&self) -> Result<()> {
        let (ue_id, request) = self.core.hss.receive().await?;
        let S6aRequest::UpdateLocation { .. } = request else {
            bail!("Expected update location request, got {request:?}")
        };
        self.core
            .mme
            .s6a_answer(
                ue_id,
                S6aAnswer::UpdateLocation(Ok(self.core.hss.subscription())),
            )
            .await
    }

    /// Play the gateway's part in creating a session, returning the request.
    pub async fn handle_create_session(&self) -> Result<CreateSession> {
        let (ue_id, request) = self.core.gateway.receive().await?;
        let S11Request::CreateSession(request) = request else {
            bail!("Expected create session request, got {request:?}")
        };
        let gateway = &self.core.gateway;
        let session = Session {
            pdn_address: gateway.ue_address(ue_id, request.pdn_cid),
            sgw: gateway.control_fteid(ue_id, request.pdn_cid),
            s1u_sgw: Some(gateway.user_fteid(ue_id, request.default_ebi.0)),
            pco: None,
        };
        self.core
            .mme
            .s11_message(
                ue_id,
                S11Message::CreateSessionResponse {
                    pdn_cid: request.pdn_cid,
                    result: Ok(session),
                },
            )
            .await?;
        Ok(request)
    }

    /// Returns the PTI and EBI of the default bearer request carried in the accept.
    pub async fn receive_attach_accept(&mut self) -> Result<(Pti, Ebi)> {
        let message = self.receive_nas().await?;
        let DownlinkNas::AttachAccept {
            guti, esm_message, ..
        } = message
        else {
            bail!("Expected attach accept, got {message:?}")
        };
        let DownlinkEsm::ActivateDefaultBearerRequest { pti, ebi, .. } = esm_message else {
            bail!("Expected default bearer request in attach accept, got {esm_message:?}")
        };
        self.guti = Some(guti.ok_or(anyhow!("Attach accept without GUTI"))?);
        Ok((pti, ebi))
    }

    pub async fn send_attach_complete(&self, pti: Pti, ebi: Ebi) -> Result<()> {
        self.send_attach_complete_with(pti, ebi, UplinkEsm::ActivateDefaultBearerAccept)
            .await
    }

    /// An ATTACH COMPLETE carrying an arbitrary ESM message.
    pub async fn send_attach_complete_with(
        &self,
        pti: Pti,
        ebi: Ebi,
        body: UplinkEsm,
    ) -> Result<()> {
        self.send_nas(UplinkNas::AttachComplete {
            esm_message: EsmMessage { pti, ebi, body },
        })
        .await
    }

    pub async fn send_pdn_connectivity_request(&self, pti: Pti, apn: &str) -> Result<()> {
        self.send_esm(
            pti,
            Ebi::UNASSIGNED,
            UplinkEsm::PdnConnectivityRequest(pdn_connectivity_request(Some(apn))),
        )
        .await
    }

    /// Returns the EBI of the default bearer offered.
    pub async fn receive_default_bearer_request(&self, expected_pti: Pti) -> Result<Ebi> {
        let message = self.receive_esm().await?;
        let DownlinkEsm::ActivateDefaultBearerRequest { pti, ebi, .. } = message else {
            bail!("Expected default bearer request, got {message:?}")
        };
        ensure!(pti == expected_pti, "Default bearer request for PTI {pti}");
        Ok(ebi)
    }

    /// Set up an additional PDN connection, returning its default bearer's EBI.
    pub async fn establish_pdn_connection(&self, pti: Pti, apn: &str) -> Result<Ebi> {
        self.send_pdn_connectivity_request(pti, apn).await?;
        self.handle_create_session().await?;
        let ebi = self.receive_default_bearer_request(pti).await?;
        self.send_esm(pti, ebi, UplinkEsm::ActivateDefaultBearerAccept)
            .await?;
        Ok(ebi)
    }

    /// The user plane endpoint the mock gateway would give bearer `ebi`.
    pub fn s1u_sgw(&self, ebi: Ebi) -> Fteid {
        self.core.gateway.user_fteid(self.ue_id, ebi.0)
    }

    /// The control plane endpoint the mock gateway gave PDN connection `pdn_cid`.
    pub fn sgw(&self, pdn_cid: u8) -> Fteid {
        self.core.gateway.control_fteid(self.ue_id, pdn_cid)
    }
}

fn pdn_connectivity_request(apn: Option<&str>) -> PdnConnectivityRequest {
    PdnConnectivityRequest {
        request_type: RequestType::Initial,
        pdn_type: PdnType::Ipv4v6,
        apn: apn.map(str::to_string),
        esm_information_transfer: false,
        pco: None,
    }
}
