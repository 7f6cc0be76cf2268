//! Chunked snapshot reads

use crate::provider::OfferListReader;
use semibook_types::{BlockNumber, OfferEntry, OfferListKey, SemibookResult};
use tracing::{debug, instrument};

/// Read the best `max_offers` offers of a list as of `at_block`
///
/// Pages of `min(chunk_size, remaining)` offers are requested until the bound
/// is reached or the list ends. Every page is pinned to the same block so the
/// result is a consistent prefix.
#[instrument(skip(reader, key), fields(key = %key))]
pub async fn fetch_prefix(
    reader: &dyn OfferListReader,
    key: &OfferListKey,
    max_offers: usize,
    chunk_size: usize,
    at_block: BlockNumber,
) -> SemibookResult<Vec<OfferEntry>> {
    let chunk_size = chunk_size.max(1);
    let mut entries = Vec::with_capacity(max_offers.min(1024));
    let mut from_id = 0;
    let mut pages = 0u32;

    while entries.len() < max_offers {
        let page_size = chunk_size.min(max_offers - entries.len());
        let page = reader.read_prefix(key, from_id, page_size, at_block).await?;
        pages += 1;

        let has_more = page.has_more();
        let next_id = page.next_id;
        let received = page.entries.len();
        entries.extend(page.entries.into_iter().take(page_size));

        if !has_more || received == 0 {
            break;
        }
        from_id = next_id;
    }

    debug!(pages, offers = entries.len(), "fetched prefix");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;
    use rust_decimal_macros::dec;
    use semibook_types::{OfferId, SemibookError};

    fn entries(ids: impl IntoIterator<Item = OfferId>) -> Vec<OfferEntry> {
        ids.into_iter()
            .map(|id| OfferEntry::new(id, dec!(1), dec!(2)).unwrap())
            .collect()
    }

    fn key() -> OfferListKey {
        OfferListKey::new("0xbase", "0xquote")
    }

    #[tokio::test]
    async fn test_pages_until_list_ends() {
        let chain = MockChain::new(100);
        chain.set_offers(&key(), 100, entries(1..=5));

        let fetched = fetch_prefix(&chain, &key(), 50, 2, 100).await.unwrap();
        assert_eq!(fetched.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);

        let reads = chain.reads();
        assert_eq!(reads.len(), 3);
        assert_eq!((reads[0].from_id, reads[0].page_size), (0, 2));
        assert_eq!((reads[1].from_id, reads[1].page_size), (3, 2));
        assert_eq!((reads[2].from_id, reads[2].page_size), (5, 2));
        assert!(reads.iter().all(|r| r.at_block == 100));
    }

    #[tokio::test]
    async fn test_stops_at_max_offers() {
        let chain = MockChain::new(100);
        chain.set_offers(&key(), 100, entries(1..=10));

        let fetched = fetch_prefix(&chain, &key(), 5, 2, 100).await.unwrap();
        assert_eq!(fetched.len(), 5);

        let sizes: Vec<usize> = chain.reads().iter().map(|r| r.page_size).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_empty_list_single_read() {
        let chain = MockChain::new(7);
        let fetched = fetch_prefix(&chain, &key(), 50, 50, 7).await.unwrap();
        assert!(fetched.is_empty());
        assert_eq!(chain.reads().len(), 1);
    }

    #[tokio::test]
    async fn test_reads_pinned_block() {
        let chain = MockChain::new(20);
        chain.set_offers(&key(), 10, entries([1, 2]));
        chain.set_offers(&key(), 20, entries([3]));

        let old = fetch_prefix(&chain, &key(), 50, 50, 15).await.unwrap();
        assert_eq!(old.len(), 2);
        let new = fetch_prefix(&chain, &key(), 50, 50, 20).await.unwrap();
        assert_eq!(new[0].id, 3);
    }

    #[tokio::test]
    async fn test_paging_matches_single_read() {
        const N: usize = 7;
        for len in 0..=N {
            let chain = MockChain::new(1);
            chain.set_offers(&key(), 1, entries(1..=len as OfferId));
            let whole = fetch_prefix(&chain, &key(), N, N, 1).await.unwrap();
            assert_eq!(whole.len(), len);

            for chunk in 1..=N {
                let paged = fetch_prefix(&chain, &key(), N, chunk, 1).await.unwrap();
                assert_eq!(paged, whole, "list of {} read in pages of {}", len, chunk);
            }
        }
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let chain = MockChain::new(1);
        chain.fail_reads(true);
        let result = fetch_prefix(&chain, &key(), 50, 50, 1).await;
        assert!(matches!(result, Err(SemibookError::Provider { .. })));
    }
}
