//! cause - EMM, ESM and GTP cause values

use thiserror::Error;

/// EMM cause values (TS 24.301, 9.9.3.9).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EmmCause {
    #[error("IMSI unknown in HSS")]
    ImsiUnknownInHss = 2,
    #[error("illegal UE")]
    IllegalUe = 3,
    #[error("IMEI not accepted")]
    ImeiNotAccepted = 5,
    #[error("illegal ME")]
    IllegalMe = 6,
    #[error("EPS services not allowed")]
    EpsServicesNotAllowed = 7,
    #[error("UE identity cannot be derived by the network")]
    UeIdentityCannotBeDerived = 9,
    #[error("implicitly detached")]
    ImplicitlyDetached = 10,
    #[error("PLMN not allowed")]
    PlmnNotAllowed = 11,
    #[error("network failure")]
    NetworkFailure = 17,
    #[error("ESM failure")]
    EsmFailure = 19,
    #[error("MAC failure")]
    MacFailure = 20,
    #[error("synch failure")]
    SynchFailure = 21,
    #[error("UE security capabilities mismatch")]
    UeSecurityCapabilitiesMismatch = 23,
    #[error("security mode rejected, unspecified")]
    SecurityModeRejected = 24,
    #[error("non-EPS authentication unacceptable")]
    NonEpsAuthenticationUnacceptable = 26,
    #[error("requested service option not authorized in this PLMN")]
    RequestedServiceOptionNotAuthorized = 35,
    #[error("protocol error, unspecified")]
    ProtocolErrorUnspecified = 111,
}

impl EmmCause {
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// ESM cause values (TS 24.301, 9.9.4.4).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EsmCause {
    #[error("operator determined barring")]
    OperatorDeterminedBarring = 8,
    #[error("insufficient resources")]
    InsufficientResources = 26,
    #[error("missing or unknown APN")]
    UnknownApn = 27,
    #[error("unknown PDN type")]
    UnknownPdnType = 28,
    #[error("user authentication failed")]
    UserAuthenticationFailed = 29,
    #[error("request rejected by Serving GW or PDN GW")]
    RequestRejectedByGw = 30,
    #[error("request rejected, unspecified")]
    RequestRejectedUnspecified = 31,
    #[error("service option not supported")]
    ServiceOptionNotSupported = 32,
    #[error("requested service option not subscribed")]
    ServiceOptionNotSubscribed = 33,
    #[error("PTI already in use")]
    PtiAlreadyInUse = 35,
    #[error("regular deactivation")]
    RegularDeactivation = 36,
    #[error("EPS QoS not accepted")]
    EpsQosNotAccepted = 37,
    #[error("network failure")]
    NetworkFailure = 38,
    #[error("semantic error in the TFT operation")]
    SemanticErrorInTftOperation = 41,
    #[error("syntactical error in the TFT operation")]
    SyntacticalErrorInTftOperation = 42,
    #[error("invalid EPS bearer identity")]
    InvalidEpsBearerIdentity = 43,
    #[error("semantic errors in packet filter(s)")]
    SemanticErrorsInPacketFilters = 44,
    #[error("syntactical errors in packet filter(s)")]
    SyntacticalErrorsInPacketFilters = 45,
    #[error("PTI mismatch")]
    PtiMismatch = 47,
    #[error("last PDN disconnection not allowed")]
    LastPdnDisconnectionNotAllowed = 49,
    #[error("PDN type IPv4 only allowed")]
    PdnTypeIpv4OnlyAllowed = 50,
    #[error("PDN type IPv6 only allowed")]
    PdnTypeIpv6OnlyAllowed = 51,
    #[error("ESM information not received")]
    EsmInformationNotReceived = 53,
    #[error("PDN connection does not exist")]
    PdnConnectionDoesNotExist = 54,
    #[error("multiple PDN connections for a given APN not allowed")]
    MultiplePdnConnectionsNotAllowed = 55,
    #[error("collision with network initiated request")]
    CollisionWithNetworkInitiatedRequest = 56,
    #[error("invalid PTI value")]
    InvalidPtiValue = 81,
    #[error("semantically incorrect message")]
    SemanticallyIncorrectMessage = 95,
    #[error("invalid mandatory information")]
    InvalidMandatoryInformation = 96,
    #[error("message type non-existent or not implemented")]
    MessageTypeNonExistent = 97,
    #[error("message type not compatible with the protocol state")]
    MessageTypeNotCompatible = 98,
    #[error("protocol error, unspecified")]
    ProtocolErrorUnspecified = 111,
}

impl EsmCause {
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// GTPv2-C cause values used on S11 (TS 29.274, 8.4).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GtpCause {
    #[error("request accepted")]
    RequestAccepted = 16,
    #[error("context not found")]
    ContextNotFound = 64,
    #[error("mandatory IE incorrect")]
    MandatoryIeIncorrect = 69,
    #[error("no resources available")]
    NoResourcesAvailable = 73,
    #[error("semantic error in the TFT operation")]
    SemanticErrorInTftOperation = 74,
    #[error("syntactic error in the TFT operation")]
    SyntacticErrorInTftOperation = 75,
    #[error("semantic errors in packet filter(s)")]
    SemanticErrorsInPacketFilters = 76,
    #[error("syntactic errors in packet filter(s)")]
    SyntacticErrorsInPacketFilters = 77,
    #[error("UE not responding")]
    UeNotResponding = 87,
    #[error("UE refuses")]
    UeRefuses = 88,
    #[error("request rejected")]
    RequestRejected = 94,
    #[error("temporarily rejected due to handover/TAU/RAU procedure in progress")]
    TemporarilyRejected = 110,
}

impl GtpCause {
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn is_accepted(self) -> bool {
        self == GtpCause::RequestAccepted
    }
}

impl From<EsmCause> for GtpCause {
    fn from(cause: EsmCause) -> Self {
        match cause {
            EsmCause::InsufficientResources => GtpCause::NoResourcesAvailable,
            EsmCause::SemanticErrorInTftOperation => GtpCause::SemanticErrorInTftOperation,
            EsmCause::SyntacticalErrorInTftOperation => GtpCause::SyntacticErrorInTftOperation,
            EsmCause::SemanticErrorsInPacketFilters => GtpCause::SemanticErrorsInPacketFilters,
            EsmCause::SyntacticalErrorsInPacketFilters => GtpCause::SyntacticErrorsInPacketFilters,
            EsmCause::InvalidEpsBearerIdentity | EsmCause::PdnConnectionDoesNotExist => {
                GtpCause::ContextNotFound
            }
            EsmCause::EpsQosNotAccepted | EsmCause::InvalidMandatoryInformation => {
                GtpCause::MandatoryIeIncorrect
            }
            EsmCause::CollisionWithNetworkInitiatedRequest => GtpCause::TemporarilyRejected,
            _ => GtpCause::UeRefuses,
        }
    }
}

impl From<GtpCause> for EsmCause {
    fn from(cause: GtpCause) -> Self {
        match cause {
            GtpCause::NoResourcesAvailable => EsmCause::InsufficientResources,
            GtpCause::SemanticErrorInTftOperation => EsmCause::SemanticErrorInTftOperation,
            GtpCause::SyntacticErrorInTftOperation => EsmCause::SyntacticalErrorInTftOperation,
            GtpCause::SemanticErrorsInPacketFilters => EsmCause::SemanticErrorsInPacketFilters,
            GtpCause::SyntacticErrorsInPacketFilters => EsmCause::SyntacticalErrorsInPacketFilters,
            GtpCause::ContextNotFound => EsmCause::InvalidEpsBearerIdentity,
            _ => EsmCause::RequestRejectedByGw,
        }
    }
}
