//! s6a - requests to and answers from the HSS

use crate::cause::EmmCause;
use crate::data::{AuthVector, Imsi, Plmn, SubscriptionData};
use thiserror::Error;

/// Re-synchronisation information from an AUTHENTICATION FAILURE (synch failure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resync {
    pub rand: [u8; 16],
    pub auts: [u8; 14],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S6aRequest {
    AuthenticationInformation {
        imsi: Imsi,
        visited_plmn: Plmn,
        num_vectors: u8,
        resync: Option<Resync>,
    },
    UpdateLocation {
        imsi: Imsi,
        visited_plmn: Plmn,
        initial_attach: bool,
    },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum S6aError {
    #[error("user unknown")]
    UserUnknown,
    #[error("roaming not allowed")]
    RoamingNotAllowed,
    #[error("authentication data unavailable")]
    AuthenticationDataUnavailable,
    #[error("unable to comply")]
    UnableToComply,
}

impl S6aError {
    /// The EMM cause signalled to the UE when the HSS refuses it.
    pub fn emm_cause(self) -> EmmCause {
        match self {
            S6aError::UserUnknown => EmmCause::ImsiUnknownInHss,
            S6aError::RoamingNotAllowed => EmmCause::PlmnNotAllowed,
            S6aError::AuthenticationDataUnavailable | S6aError::UnableToComply => {
                EmmCause::NetworkFailure
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S6aAnswer {
    AuthenticationInformation(Result<Vec<AuthVector>, S6aError>),
    UpdateLocation(Result<SubscriptionData, S6aError>),
}
