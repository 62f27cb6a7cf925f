pub mod delivery;
pub mod security;

pub use delivery::{WebhookDelivery, WebhookEvent, WebhookService, WebhookSubscription};
