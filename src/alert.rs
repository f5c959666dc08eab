//! Alert records, formatting and delivery.

mod formatter;
mod record;
mod sink;

pub use formatter::{AlertFormatter, AlertProfile, AspectRatioClassifier, PostureClassifier};
pub use record::{
    AlertLocation, AlertMetadata, AlertMethod, AlertQuantity, AlertRecord, Orientation, Severity,
};
pub use sink::{AlertSink, BackgroundSink, JsonDirSink, WebhookConfig, WebhookSink, webhook_body};
