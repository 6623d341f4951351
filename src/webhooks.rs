pub mod memberpress;

pub(crate) use memberpress::{memberpress_webhook, ErrorDetail, WebhookSecret};
