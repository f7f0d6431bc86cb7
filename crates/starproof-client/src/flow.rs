//! Issuance flow: a forward-only state machine over six steps, persisted
//! after every transition.
//!
//! | step | state        | entered by          |
//! |------|--------------|---------------------|
//! | 0    | `Draft`      | `resume` / `reset`  |
//! | 1    | `Issued`     | `start_issuance`    |
//! | 2    | `Processing` | `mark_processing`   |
//! | 3    | `Signed`     | `recipient_sign`    |
//! | 4    | `Received`   | `receive`           |
//! | 5    | `Delivered`  | `deliver`           |

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use starproof_crypto::{compute_metadata_hash, MetadataHashInput};
use starproof_types::{
    AccountAddress, CertificateDetails, CertificateId, CertificateStatus, MetadataHash,
    ValidationError,
};
use thiserror::Error;
use tracing::info;

use crate::service::{
    AcknowledgmentReceipt, CertificateService, CertificateServiceError, ConfirmationMode,
    IssueRequest, IssuedCertificate,
};
use crate::store::{FlowStore, StoreError};
use crate::transport::SorobanRpc;
use crate::wallet::{Wallet, WalletSession};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("cannot {action} at step {step}")]
    InvalidTransition { step: u8, action: &'static str },
    #[error("session account {actual} is not the certificate owner {expected}")]
    NotRecipient {
        expected: AccountAddress,
        actual: AccountAddress,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Service(#[from] CertificateServiceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Issuer-entered certificate fields, hashed into the metadata fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDraft {
    pub certificate_id: String,
    pub certificate_type: String,
    pub issue_date: String,
    pub issuer_address: AccountAddress,
    pub recipient: AccountAddress,
    pub action: String,
}

impl CertificateDraft {
    pub fn metadata_hash(&self) -> MetadataHash {
        let issuer = self.issuer_address.to_string();
        let recipient = self.recipient.to_string();
        compute_metadata_hash(&MetadataHashInput {
            certificate_id: &self.certificate_id,
            certificate_type: &self.certificate_type,
            issue_date: &self.issue_date,
            issuer: &issuer,
            recipient: &recipient,
            action: &self.action,
        })
    }

    pub fn issue_request(&self) -> Result<IssueRequest, ValidationError> {
        Ok(IssueRequest {
            id: CertificateId::new(self.certificate_id.as_str())?,
            owner: self.recipient,
            metadata_hash: self.metadata_hash(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedStage {
    pub draft: CertificateDraft,
    pub certificate: IssuedCertificate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStage {
    pub draft: CertificateDraft,
    pub certificate: IssuedCertificate,
    pub on_chain: CertificateDetails,
    pub status: CertificateStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedStage {
    pub processing: ProcessingStage,
    pub acknowledgment: AcknowledgmentReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedStage {
    pub signed: SignedStage,
    pub received_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredStage {
    pub received: ReceivedStage,
    pub delivered_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum FlowState {
    #[default]
    Draft,
    Issued(IssuedStage),
    Processing(ProcessingStage),
    Signed(SignedStage),
    Received(ReceivedStage),
    Delivered(DeliveredStage),
}

impl FlowState {
    pub fn step(&self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Issued(_) => 1,
            Self::Processing(_) => 2,
            Self::Signed(_) => 3,
            Self::Received(_) => 4,
            Self::Delivered(_) => 5,
        }
    }

    pub fn certificate_id(&self) -> Option<&CertificateId> {
        let certificate = match self {
            Self::Draft => return None,
            Self::Issued(stage) => &stage.certificate,
            Self::Processing(stage) => &stage.certificate,
            Self::Signed(stage) => &stage.processing.certificate,
            Self::Received(stage) => &stage.signed.processing.certificate,
            Self::Delivered(stage) => &stage.received.signed.processing.certificate,
        };
        Some(&certificate.id)
    }

    /// Local status annotation; `None` before the on-chain check.
    pub fn certificate_status(&self) -> Option<CertificateStatus> {
        match self {
            Self::Draft => None,
            Self::Issued(_) => Some(CertificateStatus::Pending),
            Self::Processing(stage) => Some(stage.status),
            Self::Signed(_) | Self::Received(_) | Self::Delivered(_) => {
                Some(CertificateStatus::Verified)
            }
        }
    }
}

pub struct FlowController<S: FlowStore> {
    store: S,
    state: FlowState,
}

impl<S: FlowStore> FlowController<S> {
    /// Picks up the last committed state, or a fresh draft.
    pub fn resume(store: S) -> Result<Self, FlowError> {
        let state = store.load()?.unwrap_or_default();
        info!(step = state.step(), "flow resumed");
        Ok(Self { store, state })
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn step(&self) -> u8 {
        self.state.step()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 0 → 1. Hashes the draft and issues the certificate.
    pub async fn start_issuance<T: SorobanRpc, W: Wallet>(
        &mut self,
        service: &CertificateService<T>,
        session: &WalletSession<W>,
        draft: CertificateDraft,
        mode: ConfirmationMode,
    ) -> Result<&FlowState, FlowError> {
        if !matches!(self.state, FlowState::Draft) {
            return Err(self.invalid("start issuance"));
        }
        let request = draft.issue_request()?;
        let certificate = service.issue_certificate(session, request, mode).await?;
        self.commit(FlowState::Issued(IssuedStage { draft, certificate }))
    }

    /// 1 → 2. Reads the on-chain record back and checks the hash.
    pub async fn mark_processing<T: SorobanRpc>(
        &mut self,
        service: &CertificateService<T>,
    ) -> Result<&FlowState, FlowError> {
        let FlowState::Issued(stage) = &self.state else {
            return Err(self.invalid("mark processing"));
        };
        let IssuedStage { draft, certificate } = stage.clone();
        let on_chain = service.get_certificate_details(&certificate.id).await?;
        let valid = service
            .verify_certificate(&certificate.id, &certificate.metadata_hash)
            .await?;
        let status = if valid {
            CertificateStatus::Issued
        } else {
            CertificateStatus::Expired
        };
        self.commit(FlowState::Processing(ProcessingStage {
            draft,
            certificate,
            on_chain,
            status,
        }))
    }

    /// 2 → 3. The certificate owner signs an acknowledgment.
    pub async fn recipient_sign<T: SorobanRpc, W: Wallet>(
        &mut self,
        service: &CertificateService<T>,
        session: &WalletSession<W>,
    ) -> Result<&FlowState, FlowError> {
        let FlowState::Processing(stage) = &self.state else {
            return Err(self.invalid("sign"));
        };
        if session.address() != stage.certificate.owner {
            return Err(FlowError::NotRecipient {
                expected: stage.certificate.owner,
                actual: session.address(),
            });
        }
        let mut processing = stage.clone();
        let acknowledgment = service
            .sign_acknowledgment(
                session,
                &processing.certificate.id,
                &processing.certificate.metadata_hash,
            )
            .await?;
        processing.status = CertificateStatus::Verified;
        self.commit(FlowState::Signed(SignedStage {
            processing,
            acknowledgment,
        }))
    }

    /// 3 → 4.
    pub fn receive(&mut self) -> Result<&FlowState, FlowError> {
        let FlowState::Signed(signed) = &self.state else {
            return Err(self.invalid("receive"));
        };
        let next = FlowState::Received(ReceivedStage {
            signed: signed.clone(),
            received_at: unix_secs(),
        });
        self.commit(next)
    }

    /// 4 → 5.
    pub fn deliver(&mut self) -> Result<&FlowState, FlowError> {
        let FlowState::Received(received) = &self.state else {
            return Err(self.invalid("deliver"));
        };
        let next = FlowState::Delivered(DeliveredStage {
            received: received.clone(),
            delivered_at: unix_secs(),
        });
        self.commit(next)
    }

    /// Starts a new session at step 0.
    pub fn reset(&mut self) -> Result<&FlowState, FlowError> {
        self.commit(FlowState::Draft)
    }

    fn invalid(&self, action: &'static str) -> FlowError {
        FlowError::InvalidTransition {
            step: self.state.step(),
            action,
        }
    }

    fn commit(&mut self, next: FlowState) -> Result<&FlowState, FlowError> {
        self.store.save(&next)?;
        let from = self.state.step();
        self.state = next;
        info!(from, to = self.state.step(), cert_id = ?self.state.certificate_id(), "flow advanced");
        Ok(&self.state)
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
