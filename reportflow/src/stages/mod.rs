//! The three pipeline stages and the collaborator ports they use.
//!
//! Every stage returns a [`StageResult`](crate::core::StageResult); no stage
//! error escapes as a `Result`.

mod extract;
mod notify;
pub mod ports;
mod publish;

pub use extract::{QueryOutcome, RedashExtractor};
pub use notify::{build_payload, summary_text, WebhookNotifier};
pub use ports::{
    PowerBiService, QueryResult, QuerySpec, RedashSource, RefreshHandle, RefreshState,
    WebhookSender,
};
pub use publish::PowerBiPublisher;
