//! The signing interceptor
//!
//! Order of operations for a signature-required command:
//!
//! 1. Reject if the transaction secret header is missing (no authority
//!    call is made).
//! 2. Sign the canonicalized payload through the authority. Any failure,
//!    including the authority's backend timeout, rejects the command; the
//!    handler never runs.
//! 3. Run the handler with the signature context as an explicit argument.
//! 4. Publish an audit event for the outcome, success or failure.
//!    Publishing is fire-and-forget: the queue being down never fails a
//!    business operation that already happened.

use std::future::Future;
use std::sync::Arc;

use crate::authority::{SigningAuthority, SigningError};
use crate::bus::AuditEventQueue;
use crate::domain::AuditedActionEvent;
use crate::pipeline::command::{
    CommandDescriptor, CommandError, CommandRequest, SignatureContext,
};

/// Header carrying the transaction secret. Kept out of logs and out of the
/// signed payload.
pub const TRANSACTION_SECRET_HEADER: &str = "x-transaction-secret";

/// Why a command was rejected before (or instead of) running
#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    /// Signature required but no secret header was supplied
    #[error("transaction secret header missing")]
    MissingSecret,

    /// The authority rejected or failed the sign request
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The handler reported a business failure
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl InterceptError {
    /// HTTP status this rejection maps to
    pub fn status_code(&self) -> u16 {
        match self {
            InterceptError::MissingSecret => 401,
            InterceptError::Signing(SigningError::InvalidSecret) => 401,
            InterceptError::Signing(SigningError::InvalidArgument(_)) => 400,
            InterceptError::Signing(SigningError::Unavailable(_)) => 503,
            InterceptError::Signing(SigningError::Internal(_)) => 500,
            InterceptError::Command(e) => e.status_code,
        }
    }
}

pub struct SigningInterceptor {
    authority: Arc<SigningAuthority>,
    queue: Arc<dyn AuditEventQueue>,
}

impl SigningInterceptor {
    pub fn new(authority: Arc<SigningAuthority>, queue: Arc<dyn AuditEventQueue>) -> Self {
        Self { authority, queue }
    }

    /// Execute a command through the pipeline.
    ///
    /// The handler receives `Some(SignatureContext)` iff the descriptor
    /// requires a signature; unsigned commands get `None` and skip the
    /// authority entirely.
    #[tracing::instrument(skip_all, fields(operation = %descriptor.operation, user_id = %request.user_id, correlation_id = %request.correlation_id))]
    pub async fn execute<H, Fut, T>(
        &self,
        descriptor: &CommandDescriptor,
        request: CommandRequest,
        handler: H,
    ) -> Result<T, InterceptError>
    where
        H: FnOnce(Option<SignatureContext>) -> Fut,
        Fut: Future<Output = Result<T, CommandError>>,
    {
        let signature_ctx = if descriptor.requires_signature {
            Some(self.obtain_signature(descriptor, &request).await?)
        } else {
            None
        };

        let result = handler(signature_ctx.clone()).await;

        self.publish_audit(descriptor, &request, signature_ctx.as_ref(), &result);

        result.map_err(InterceptError::Command)
    }

    async fn obtain_signature(
        &self,
        descriptor: &CommandDescriptor,
        request: &CommandRequest,
    ) -> Result<SignatureContext, InterceptError> {
        let secret = request
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(InterceptError::MissingSecret)?;

        // The authority bounds its own backend call; a hung backend comes
        // back as Unavailable rather than hanging the request
        let signed = self
            .authority
            .sign(&request.user_id, secret, &request.payload, &descriptor.operation)
            .await?;

        Ok(SignatureContext {
            signature: signed.signature,
            key_id: signed.key_id,
            signed_at: signed.signed_at,
        })
    }

    /// Fire-and-forget audit publish. The business outcome is already
    /// decided; an unreachable queue is logged, not propagated.
    fn publish_audit<T>(
        &self,
        descriptor: &CommandDescriptor,
        request: &CommandRequest,
        signature_ctx: Option<&SignatureContext>,
        result: &Result<T, CommandError>,
    ) {
        let mut event = AuditedActionEvent::new(
            request.correlation_id,
            descriptor.aggregate_type.clone(),
            descriptor.action.clone(),
            request.payload.clone(),
            request.user_id.clone(),
        );
        if let Some(entity_id) = &request.entity_id {
            event = event.with_entity_id(entity_id.clone());
        }
        if let Some(ip) = &request.ip_address {
            event = event.with_ip_address(ip.clone());
        }
        if let Some(ctx) = signature_ctx {
            event = event.with_signature(ctx.signature.clone());
        }
        if let Err(e) = result {
            event = event.failed(e.status_code, e.message.clone());
        }

        let queue = self.queue.clone();
        let event_id = event.event_id;
        tokio::spawn(async move {
            if let Err(e) = queue.enqueue(&event).await {
                tracing::error!(
                    event_id = %event_id,
                    error = %e,
                    "Audit event publish failed"
                );
            }
        });
    }
}
