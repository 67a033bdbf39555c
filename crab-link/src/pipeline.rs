//! Print pipeline
//!
//! bytes -> writable channel -> transport-sized chunks -> paced writes.
//! Chunks for one printer are written strictly in order; any failed chunk
//! aborts the job (there is no partial success).

use crab_printer::{Channel, Link, WriteMode, known_channel_rank};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::{LinkError, LinkResult};

// ==================== Channel resolution ====================

/// One way of picking the channel to write to
pub trait ChannelStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn select(&self, channels: &[Channel]) -> Option<Channel>;
}

/// Well-known printer service/characteristic pairs, in fixed priority
pub struct KnownConventions;

impl ChannelStrategy for KnownConventions {
    fn name(&self) -> &'static str {
        "known-conventions"
    }

    fn select(&self, channels: &[Channel]) -> Option<Channel> {
        channels
            .iter()
            .filter(|c| c.is_writable())
            .filter_map(|c| known_channel_rank(c).map(|rank| (rank, c)))
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, c)| c.clone())
    }
}

/// First channel that accepts writes at all
pub struct AnyWritable;

impl ChannelStrategy for AnyWritable {
    fn name(&self) -> &'static str {
        "any-writable"
    }

    fn select(&self, channels: &[Channel]) -> Option<Channel> {
        channels.iter().find(|c| c.is_writable()).cloned()
    }
}

/// Ordered strategy list, stopping at the first hit
pub struct ChannelResolver {
    strategies: Vec<Box<dyn ChannelStrategy>>,
}

impl ChannelResolver {
    pub fn new(strategies: Vec<Box<dyn ChannelStrategy>>) -> Self {
        Self { strategies }
    }

    /// Known conventions, then any writable channel
    pub fn standard() -> Self {
        Self::new(vec![Box::new(KnownConventions), Box::new(AnyWritable)])
    }

    pub fn resolve(&self, link: &dyn Link) -> LinkResult<Channel> {
        let channels = link.channels();
        for strategy in &self.strategies {
            if let Some(channel) = strategy.select(&channels) {
                debug!(strategy = strategy.name(), channel = %channel, "Channel resolved");
                return Ok(channel);
            }
        }
        Err(LinkError::NoWritableChannel(link.address().to_string()))
    }
}

impl Default for ChannelResolver {
    fn default() -> Self {
        Self::standard()
    }
}

// ==================== Delivery ====================

/// Chunking and pacing for one job
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlan {
    /// `None` writes the whole job at once
    pub chunk_size: Option<usize>,
    pub pacing: Duration,
}

impl ChunkPlan {
    /// Chunk size for a transport limit, capped by the configured maximum
    pub fn for_transport(transport_limit: Option<usize>, max_chunk: usize, pacing: Duration) -> Self {
        Self {
            chunk_size: transport_limit.map(|limit| limit.min(max_chunk).max(1)),
            pacing,
        }
    }

    /// Split `bytes` into writes of at most `chunk_size`
    pub fn split<'a>(&self, bytes: &'a [u8]) -> Vec<&'a [u8]> {
        match self.chunk_size {
            Some(size) => bytes.chunks(size.max(1)).collect(),
            None if bytes.is_empty() => Vec::new(),
            None => vec![bytes],
        }
    }
}

/// Outcome of a delivered job
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub bytes: usize,
    pub chunks: usize,
    pub channel: Channel,
    pub mode: Option<WriteMode>,
    pub elapsed: Duration,
}

/// Write `bytes` to `link`
///
/// The first chunk tries each of the channel's write modes in order; the
/// first mode that works is kept for the rest of the job.
#[instrument(skip_all, fields(addr = %link.address(), bytes = bytes.len()))]
pub async fn deliver(
    link: &dyn Link,
    resolver: &ChannelResolver,
    plan: ChunkPlan,
    bytes: &[u8],
) -> LinkResult<DeliveryReport> {
    let started = Instant::now();
    let channel = resolver.resolve(link)?;
    let chunks = plan.split(bytes);
    let total = chunks.len();

    let mut mode: Option<WriteMode> = None;
    for (index, chunk) in chunks.iter().enumerate() {
        match mode {
            Some(chosen) => {
                link.write_chunk(&channel, chunk, chosen).await.map_err(|e| {
                    warn!(chunk = index, total, error = %e, "Chunk write failed, aborting job");
                    LinkError::from(e)
                })?;
            }
            None => mode = Some(write_first(link, &channel, chunk).await?),
        }

        if index + 1 < total && !plan.pacing.is_zero() {
            tokio::time::sleep(plan.pacing).await;
        }
    }

    debug!(chunks = total, mode = ?mode, "Job delivered");
    Ok(DeliveryReport {
        bytes: bytes.len(),
        chunks: total,
        channel,
        mode,
        elapsed: started.elapsed(),
    })
}

async fn write_first(link: &dyn Link, channel: &Channel, chunk: &[u8]) -> LinkResult<WriteMode> {
    let mut last_error = None;
    for &mode in &channel.modes {
        match link.write_chunk(channel, chunk, mode).await {
            Ok(()) => return Ok(mode),
            Err(e) => {
                warn!(%mode, error = %e, "Write mode rejected, trying next");
                last_error = Some(e);
            }
        }
    }
    Err(last_error
        .map(LinkError::from)
        .unwrap_or_else(|| LinkError::NoWritableChannel(link.address().to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crab_printer::KNOWN_CHANNELS;
    use uuid::Uuid;

    fn ble(svc: Uuid, chr: Uuid, modes: Vec<WriteMode>) -> Channel {
        Channel::new(svc, chr, modes)
    }

    #[test]
    fn test_known_conventions_priority() {
        let (svc1, chr1) = KNOWN_CHANNELS[1];
        let (svc3, chr3) = KNOWN_CHANNELS[3];
        let channels = vec![
            ble(Uuid::from_u128(7), Uuid::from_u128(8), vec![WriteMode::WithResponse]),
            ble(svc3, chr3, vec![WriteMode::WithResponse]),
            ble(svc1, chr1, vec![WriteMode::WithoutResponse]),
        ];

        let picked = KnownConventions.select(&channels).unwrap();
        assert_eq!(picked.characteristic, chr1);
    }

    #[test]
    fn test_known_convention_must_be_writable() {
        let (svc, chr) = KNOWN_CHANNELS[0];
        let channels = vec![ble(svc, chr, vec![])];
        assert!(KnownConventions.select(&channels).is_none());
        assert!(AnyWritable.select(&channels).is_none());
    }

    #[test]
    fn test_any_writable_fallback() {
        let channels = vec![
            ble(Uuid::from_u128(1), Uuid::from_u128(2), vec![]),
            ble(Uuid::from_u128(1), Uuid::from_u128(3), vec![WriteMode::WithResponse]),
        ];
        assert!(KnownConventions.select(&channels).is_none());
        assert_eq!(
            AnyWritable.select(&channels).unwrap().characteristic,
            Uuid::from_u128(3)
        );
    }

    #[test]
    fn test_split_sizes() {
        let plan = ChunkPlan::for_transport(Some(244), 244, Duration::ZERO);
        let data = vec![0u8; 500];
        let sizes: Vec<usize> = plan.split(&data).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![244, 244, 12]);
    }

    #[test]
    fn test_split_unconstrained() {
        let plan = ChunkPlan::for_transport(None, 244, Duration::ZERO);
        assert_eq!(plan.split(&[1, 2, 3]).len(), 1);
        assert!(plan.split(&[]).is_empty());
    }

    #[test]
    fn test_configured_cap_applies() {
        let plan = ChunkPlan::for_transport(Some(512), 100, Duration::ZERO);
        assert_eq!(plan.chunk_size, Some(100));
    }
}
