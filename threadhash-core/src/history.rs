use crate::error::Error;
use crate::reference::Reference;
use crate::store::{Message, MessageStore};

/// Reads conversation history backward from a reference.
///
/// A page is inclusive of its starting message. Clients continue from the
/// `previous:` handle of the last message they received, which resolves to
/// the first message of the next page as long as timestamps follow append
/// order.
pub struct Paginator<'a, M> {
    store: &'a M,
    max_limit: usize,
}

impl<'a, M: MessageStore> Paginator<'a, M> {
    pub fn new(store: &'a M, max_limit: usize) -> Self {
        Self { store, max_limit }
    }

    /// Up to `limit` messages ending at `reference`, newest first.
    ///
    /// `limit` is clamped to the configured maximum; zero yields nothing.
    pub async fn page(&self, reference: &Reference, limit: usize) -> Result<Vec<Message>, Error> {
        let ctx = self
            .store
            .get_sequence_context(reference)
            .await?
            .ok_or_else(|| Error::NotFound(reference.to_string()))?;
        let limit = limit.min(self.max_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .list_before(&ctx.conversation_id, ctx.sequence, ctx.timestamp, limit)
            .await?)
    }

    /// The whole history ending at `reference`, newest first, read in pages
    /// of `page_size`. Each page after the first starts at the previous
    /// page's last message, which is dropped.
    pub async fn walk(&self, reference: &Reference, page_size: usize) -> Result<Vec<Message>, Error> {
        let page_size = page_size.clamp(2, self.max_limit.max(2));
        let mut history = self.page(reference, page_size).await?;
        loop {
            let Some(last) = history.last() else {
                return Ok(history);
            };
            let cursor = last.reference.clone();
            let next = self.page(&cursor, page_size).await?;
            if next.len() <= 1 {
                return Ok(history);
            }
            history.extend(next.into_iter().skip(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMessageStore;
    use crate::payload::Payload;
    use crate::reference::compute_reference;

    async fn append(store: &MemoryMessageStore, content: &str, timestamp: i64) -> Reference {
        let payload = Payload {
            message_content: content.to_string(),
            timestamp: Some(timestamp),
            ..Payload::default()
        };
        let reference = compute_reference(&payload).unwrap();
        store.append(&reference, "c1", &payload, timestamp).await.unwrap();
        reference
    }

    #[tokio::test]
    async fn equal_timestamps_break_ties_by_sequence() {
        let store = MemoryMessageStore::new();
        let a = append(&store, "A", 100).await;
        let b = append(&store, "B", 100).await;

        let page = Paginator::new(&store, 30).page(&b, 10).await.unwrap();

        let refs: Vec<_> = page.iter().map(|m| m.reference.clone()).collect();
        assert_eq!(refs, [b, a]);
    }

    #[tokio::test]
    async fn page_starts_at_reference_and_respects_limit() {
        let store = MemoryMessageStore::new();
        let mut refs = Vec::new();
        for i in 0..5 {
            refs.push(append(&store, &format!("m{i}"), i).await);
        }

        let page = Paginator::new(&store, 30).page(&refs[3], 2).await.unwrap();

        assert_eq!(page.len(), 2);
        assert_eq!(page[0].reference, refs[3]);
        assert_eq!(page[1].reference, refs[2]);
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let store = MemoryMessageStore::new();
        let mut last = None;
        for i in 0..10 {
            last = Some(append(&store, &format!("m{i}"), i).await);
        }
        let paginator = Paginator::new(&store, 4);
        let last = last.unwrap();

        assert_eq!(paginator.page(&last, 100).await.unwrap().len(), 4);
        assert!(paginator.page(&last, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn walk_returns_full_history() {
        let store = MemoryMessageStore::new();
        let mut refs = Vec::new();
        for i in 0..12 {
            refs.push(append(&store, &format!("m{i}"), 10).await);
        }

        let history = Paginator::new(&store, 30).walk(refs.last().unwrap(), 4).await.unwrap();

        let got: Vec<_> = history.into_iter().map(|m| m.reference).collect();
        let expected: Vec<_> = refs.into_iter().rev().collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn unknown_reference_is_not_found() {
        let store = MemoryMessageStore::new();
        let unknown = compute_reference(&Payload::default()).unwrap();

        let err = Paginator::new(&store, 30).page(&unknown, 5).await.unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
    }
}
