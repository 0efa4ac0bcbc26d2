//! Ingress adapters. Each one reduces a source-specific payload to the
//! canonical alert shape before handing off to the processor.

pub mod queue;
pub mod webhook;

pub use queue::{QueueNormalizer, QueuePoller, SnsEnvelope};
pub use webhook::{WebhookNormalizer, WebhookPayload};
