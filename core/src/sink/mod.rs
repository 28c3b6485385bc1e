pub mod log;

use crate::errors::SinkError;
use crate::transcode::TranscodedEntry;

/// Destination for transcoded entries.
///
/// Once delivery of an entry is confirmed, the sink records the entry's
/// [`crate::transcode::SourcePosition`] in the position store the source task
/// reads from. The source task never writes confirmed positions itself.
#[allow(async_fn_in_trait)]
pub trait Sink: Send + Sync {
    async fn put(&self, entries: Vec<TranscodedEntry>) -> Result<(), SinkError>;
}
